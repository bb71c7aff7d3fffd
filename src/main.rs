use brushwork::basic::BasicEffects;
use brushwork::batch::{
    BatchCoordinator, BatchOptions, Console, InProcessRunner, JobRunner, SubprocessRunner,
};
use brushwork::config::{self, CONFIG_FILENAME, OutputConfig, OutputFormat, StyleConfig};
use brushwork::imaging::{load_image, save_image};
use brushwork::output;
use brushwork::pipeline::{
    Device, Intermediates, Pipeline, PipelineError, Transformed, Transformer, variation_seed,
};
use brushwork::registry::EffectRegistry;
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(name = "brushwork")]
#[command(about = "Turn photos into paintings, sketches and other stylised images")]
#[command(long_about = "\
Turn photos into paintings, sketches and other stylised images

Each image runs through a fixed sequence of stages:

  analyze → flow → material → (primary effect) → compose → reconcile → refine

A stage that fails is skipped and recorded; the image is still produced.
The primary effect is looked up by name among the built-in effects and any
plugin manifests in the configured plugin directory.

Run 'brushwork gen-config' to generate a documented brushwork.toml.
Run 'brushwork effects' to list every available effect.")]
#[command(version)]
struct Cli {
    /// Configuration file (missing file = stock defaults)
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Named preset from the config's [presets] section
    #[arg(long, global = true)]
    preset: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct TransformArgs {
    /// Image to transform
    input: PathBuf,

    /// Where to write the result (format follows the extension)
    #[arg(short, long)]
    output: PathBuf,

    /// Random seed; overrides the config
    #[arg(long)]
    seed: Option<u64>,

    /// Primary effect; overrides the config
    #[arg(long)]
    effect: Option<String>,

    /// Compute device
    #[arg(long, default_value = "cpu")]
    device: Device,

    /// Also write each stage's visualization into this directory
    #[arg(long)]
    intermediates: Option<PathBuf>,

    /// Number of outputs, each with a seed derived from the base seed
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    variations: u32,
}

#[derive(clap::Args)]
struct BatchArgs {
    /// Directory of input images
    #[arg(long)]
    input_dir: PathBuf,

    /// Directory for the results (created if missing)
    #[arg(long)]
    output_dir: PathBuf,

    /// Worker count (default: [processing] max_processes, else all cores)
    #[arg(long)]
    parallel: Option<usize>,

    /// Primary effect for every job
    #[arg(long)]
    effect: Option<String>,

    /// Run each job in its own process
    #[arg(long)]
    isolate: bool,

    /// Per-job wall-clock budget in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Include images in subdirectories
    #[arg(long)]
    recursive: bool,

    /// Compute device
    #[arg(long, default_value = "cpu")]
    device: Device,

    /// Write a JSON summary of every outcome to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Stylise a single image
    Transform(TransformArgs),
    /// Stylise every image in a directory in parallel
    Batch(BatchArgs),
    /// List built-in and plugin effects
    Effects,
    /// Print a stock brushwork.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    match &cli.command {
        Command::Transform(args) => {
            let config = config::load_config(&cli.config, cli.preset.as_deref())?;
            transform(config, args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch(args) => {
            // The preset travels with each job; check it exists before starting
            let config = config::load_config(&cli.config, None)?;
            if let Some(preset) = cli.preset.as_deref() {
                config.with_preset(preset)?;
            }
            let any_failed = batch(config, &cli, args)?;
            Ok(if any_failed {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Effects => {
            let config = config::load_config(&cli.config, cli.preset.as_deref())?;
            let (registry, report) = EffectRegistry::from_config(&config);
            output::print_lines(&output::format_effect_list(&registry.describe()));
            if let Some(report) = report {
                output::print_lines(&output::format_discovery_report(&report));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn transform(mut config: StyleConfig, args: &TransformArgs) -> Result<(), Box<dyn Error>> {
    if let Some(effect) = &args.effect {
        config = config.with_primary_effect(effect);
    }
    if let Some(format) = args
        .output
        .extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
    {
        config.output.format = format;
    }
    let base_seed = args.seed.or(config.seed).unwrap_or_else(rand::random);
    let registry = Arc::new(EffectRegistry::from_config(&config).0);
    let image = load_image(&args.input)?;

    let mut written = Vec::new();
    let mut exported = Vec::new();
    for index in 0..args.variations {
        let seed = if args.variations == 1 {
            base_seed
        } else {
            variation_seed(base_seed, index)
        };
        let variant = config.with_seed(seed);
        let result = run_variant(&image, variant, args, Arc::clone(&registry))?;

        let output_path = variation_path(&args.output, index, args.variations);
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        save_image(&result.image, &output_path, &config.output)?;
        if let (Some(dir), Some(intermediates)) = (&args.intermediates, &result.intermediates) {
            exported.extend(export_intermediates(dir, &output_path, intermediates, &config.output)?);
        }
        written.push((output_path, result.seed));
    }

    output::print_lines(&output::format_transform_output(&args.input, &written, &exported));
    Ok(())
}

/// Full pipeline when the device allows, otherwise the basic effect set.
fn run_variant(
    image: &image::Rgb32FImage,
    variant: StyleConfig,
    args: &TransformArgs,
    registry: Arc<EffectRegistry>,
) -> Result<Transformed, Box<dyn Error>> {
    let want_intermediates = args.intermediates.is_some();
    match Pipeline::with_registry(variant.clone(), args.device, registry) {
        Ok(pipeline) => Ok(pipeline.transform(image, None, want_intermediates)?),
        Err(PipelineError::DeviceUnavailable(device)) => {
            warn!(%device, "advanced pipeline unavailable; using basic effects");
            let seed = variant.seed.unwrap_or_default();
            let styled = BasicEffects::new(variant).transform_image(image, None)?;
            Ok(Transformed {
                image: styled,
                seed,
                intermediates: None,
                store: None,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// `out.png` for a single output, `out-1.png`, `out-2.png`, ... otherwise.
fn variation_path(output: &Path, index: u32, count: u32) -> PathBuf {
    if count == 1 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{}-{}.{}", stem, index + 1, ext.to_string_lossy()),
        None => format!("{}-{}", stem, index + 1),
    };
    output.with_file_name(name)
}

/// Write each visualization as `<dir>/<output stem>_<key>.png`.
fn export_intermediates(
    dir: &Path,
    output_path: &Path,
    intermediates: &Intermediates,
    output_config: &OutputConfig,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let png = OutputConfig {
        format: OutputFormat::Png,
        ..output_config.clone()
    };
    let mut paths = Vec::new();
    for (key, visual) in intermediates {
        let path = dir.join(format!("{stem}_{key}.png"));
        save_image(visual, &path, &png)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Run the batch and print the summary. Returns whether any job failed.
fn batch(config: StyleConfig, cli: &Cli, args: &BatchArgs) -> Result<bool, Box<dyn Error>> {
    let mut options = BatchOptions::from_config(&config);
    if let Some(workers) = args.parallel {
        options.workers = workers.max(1);
    }
    if let Some(secs) = args.timeout_secs {
        options.job_timeout = Some(Duration::from_secs(secs));
    }
    options.recursive = args.recursive;
    options.effect = args.effect.clone();
    options.preset = cli.preset.clone();

    let runner: Arc<dyn JobRunner> = if args.isolate {
        let mut runner = SubprocessRunner::current_exe()?.with_device(args.device);
        if cli.config.exists() {
            runner = runner.with_config_path(&cli.config);
        }
        Arc::new(runner)
    } else {
        let (registry, _) = EffectRegistry::from_config(&config);
        Arc::new(InProcessRunner::new(args.device, Arc::new(registry)))
    };

    let coordinator = BatchCoordinator::new(options, Console::stdout());
    let report = coordinator.run_directory(
        &args.input_dir,
        &args.output_dir,
        Arc::new(config),
        runner,
    )?;
    output::print_batch_summary(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.summary())?;
        std::fs::write(path, json)?;
    }
    Ok(report.has_failures())
}
