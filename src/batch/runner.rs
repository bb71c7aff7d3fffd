//! How one batch job is executed.
//!
//! [`InProcessRunner`] transforms the image on the worker thread.
//! [`SubprocessRunner`] re-invokes the `brushwork transform` command for each
//! job, so a crash in one job cannot take the worker down with it.

use super::BatchJob;
use crate::config::{ConfigError, OutputFormat, StyleConfig};
use crate::imaging::{ImagingError, load_image, save_image};
use crate::pipeline::{Device, PipelineError, Transformer, panic_message, select_transformer};
use crate::registry::EffectRegistry;
use crossbeam_channel::{RecvTimeoutError, bounded};
use image::Rgb32FImage;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Imaging(#[from] ImagingError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout")]
    Timeout,
    #[error("failed to start worker process: {0}")]
    Spawn(std::io::Error),
    #[error("worker exited with {status}: {message}")]
    Subprocess { status: String, message: String },
    #[error("worker reported success but {} is missing", .0.display())]
    MissingOutput(PathBuf),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Executes one job and returns the path it wrote.
///
/// `deadline` is the wall-clock budget for the job. A job past its deadline
/// fails with [`JobError::Timeout`] and writes nothing.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: &BatchJob, deadline: Option<Instant>) -> Result<PathBuf, JobError>;
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// The job's config: preset overlay, then the effect override, then the
/// output format implied by the output path.
pub fn job_config(job: &BatchJob) -> Result<StyleConfig, JobError> {
    let mut config = match job.preset.as_deref() {
        Some(preset) => job.config.with_preset(preset)?,
        None => (*job.config).clone(),
    };
    if let Some(effect) = job.effect_name.as_deref() {
        config = config.with_primary_effect(effect);
    }
    if let Some(format) = job
        .output_path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
    {
        config.output.format = format;
    }
    Ok(config)
}

/// Runs the transformation in this process.
///
/// With a deadline the transform runs on a helper thread so the worker is
/// released on time even if the transform hangs.
pub struct InProcessRunner {
    device: Device,
    registry: Arc<EffectRegistry>,
}

impl InProcessRunner {
    /// `registry` is shared read-only by every worker.
    pub fn new(device: Device, registry: Arc<EffectRegistry>) -> Self {
        Self { device, registry }
    }
}

impl JobRunner for InProcessRunner {
    fn run(&self, job: &BatchJob, deadline: Option<Instant>) -> Result<PathBuf, JobError> {
        let config = job_config(job)?;
        // A preset may rewrite [effects]; such jobs get their own registry
        let registry = match job.preset {
            Some(_) if config.effects != job.config.effects => {
                Arc::new(EffectRegistry::from_config(&config).0)
            }
            _ => Arc::clone(&self.registry),
        };
        let transformer = select_transformer(config.clone(), self.device, registry)?;

        let label = transformer.label().to_string();
        let image = load_image(&job.input_path)?;
        let styled = match deadline {
            Some(deadline) => transform_before(transformer, image, deadline)?,
            None => transformer.transform_image(&image, None)?,
        };
        debug!(input = %job.input_path.display(), runner = %label, "job transformed");

        if expired(deadline) {
            return Err(JobError::Timeout);
        }
        if let Some(parent) = job.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        save_image(&styled, &job.output_path, &config.output)?;
        Ok(job.output_path.clone())
    }
}

/// Transform on a helper thread and stop waiting at `deadline`.
///
/// A transform still running at the deadline is abandoned: its thread runs
/// to completion in the background and the result is dropped.
fn transform_before(
    transformer: Box<dyn Transformer>,
    image: Rgb32FImage,
    deadline: Instant,
) -> Result<Rgb32FImage, JobError> {
    let (tx, rx) = bounded(1);
    let handle = thread::Builder::new()
        .name("brushwork-transform".into())
        .spawn(move || {
            let _ = tx.send(transformer.transform_image(&image, None));
        })?;
    match rx.recv_deadline(deadline) {
        Ok(result) => Ok(result?),
        Err(RecvTimeoutError::Timeout) => Err(JobError::Timeout),
        Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
            Ok(()) => Err(JobError::Panicked(
                "transform thread exited without a result".into(),
            )),
        },
    }
}

/// Runs each job as `<program> transform ...` in its own process.
///
/// Exit code 0 with the output file present is success. Any other exit is a
/// failure whose reason is the last line the child wrote to stderr. A child
/// still running at the deadline is killed.
pub struct SubprocessRunner {
    program: PathBuf,
    config_path: Option<PathBuf>,
    device: Device,
    poll_interval: Duration,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: None,
            device: Device::default(),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// The current executable, for re-invoking ourselves.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The child command line for `job`.
    pub fn command(&self, job: &BatchJob) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        if let Some(preset) = &job.preset {
            cmd.arg("--preset").arg(preset);
        }
        cmd.arg("transform")
            .arg(&job.input_path)
            .arg("--output")
            .arg(&job.output_path)
            .arg("--device")
            .arg(self.device.to_string());
        if let Some(effect) = &job.effect_name {
            cmd.arg("--effect").arg(effect);
        }
        if let Some(seed) = job.config.seed {
            cmd.arg("--seed").arg(seed.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl JobRunner for SubprocessRunner {
    fn run(&self, job: &BatchJob, deadline: Option<Instant>) -> Result<PathBuf, JobError> {
        if let Some(parent) = job.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut child = self.command(job).spawn().map_err(JobError::Spawn)?;

        // Drain stderr concurrently so a chatty child cannot fill the pipe
        let stderr = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if expired(deadline) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(JobError::Timeout);
            }
            thread::sleep(self.poll_interval);
        };
        let stderr = reader.join().unwrap_or_default();

        if status.success() {
            return if job.output_path.is_file() {
                Ok(job.output_path.clone())
            } else {
                Err(JobError::MissingOutput(job.output_path.clone()))
            };
        }
        let message = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no diagnostic output")
            .to_string();
        let status = match status.code() {
            Some(code) => format!("code {code}"),
            None => "a signal".to_string(),
        };
        Err(JobError::Subprocess { status, message })
    }
}
