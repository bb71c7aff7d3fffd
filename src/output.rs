//! CLI output formatting.
//!
//! Every command has a `format_*` function returning `Vec<String>` so the
//! text can be tested without capturing stdout, plus a `print_*` wrapper.
//! Batch workers do not print directly: their blocks go through
//! [`Console::emit`](crate::batch::Console::emit) so concurrent jobs never
//! interleave.
//!
//! # Output Format
//!
//! ## Transform
//!
//! ```text
//! portrait.jpg
//!     001 out/portrait.png (seed 8121)
//!     Intermediate: out/debug/portrait_flow_field.png
//! ```
//!
//! ## Batch
//!
//! ```text
//! [001/003] Saved a.png
//!     Output: out/a.png
//! [002/003] Failed b.png
//!     Source: in/b.png
//!     Reason: timeout
//! Progress: 2/3 (66%)
//! ...
//! Processed 3 images: 2 saved, 1 failed (1.4s)
//! ```
//!
//! ## Effects
//!
//! ```text
//! Effects
//! 001 oil_paint (built-in)
//!     Kuwahara smoothing with flat colour regions
//! 002 sunset (plugin: plugins/sunset.toml)
//! ```

use crate::batch::{BatchOutcome, BatchReport};
use crate::plugin::DiscoveryReport;
use crate::registry::{EffectInfo, EffectOrigin};
use std::path::{Path, PathBuf};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Transform
// ============================================================================

/// One header line for the input, one line per written output, and one per
/// exported intermediate.
pub fn format_transform_output(
    input: &Path,
    outputs: &[(PathBuf, u64)],
    intermediates: &[PathBuf],
) -> Vec<String> {
    let mut lines = vec![file_name(input)];
    for (i, (path, seed)) in outputs.iter().enumerate() {
        lines.push(format!(
            "{}{} {} (seed {})",
            indent(1),
            format_index(i + 1),
            path.display(),
            seed
        ));
    }
    for path in intermediates {
        lines.push(format!("{}Intermediate: {}", indent(1), path.display()));
    }
    lines
}

// ============================================================================
// Batch
// ============================================================================

/// Status block a worker prints when it finishes a job.
pub fn format_job_outcome(completed: usize, total: usize, outcome: &BatchOutcome) -> Vec<String> {
    let position = format!("[{}/{}]", format_index(completed), format_index(total));
    match outcome {
        BatchOutcome::Saved(path) => vec![
            format!("{} Saved {}", position, file_name(path)),
            format!("{}Output: {}", indent(1), path.display()),
        ],
        BatchOutcome::Failed { job, reason } => vec![
            format!("{} Failed {}", position, file_name(&job.input_path)),
            format!("{}Source: {}", indent(1), job.input_path.display()),
            format!("{}Reason: {}", indent(1), reason),
        ],
    }
}

pub fn format_progress(completed: usize, total: usize) -> String {
    let percent = (completed * 100).checked_div(total).unwrap_or(100);
    format!("Progress: {}/{} ({}%)", completed, total, percent)
}

/// Totals, then every failure and warning.
pub fn format_batch_summary(report: &BatchReport) -> Vec<String> {
    let mut lines = Vec::new();
    for warning in &report.warnings {
        lines.push(format!("Warning: {}", warning));
    }
    let total = report.outcomes.len();
    lines.push(format!(
        "Processed {} {}: {} saved, {} failed ({:.1}s)",
        total,
        if total == 1 { "image" } else { "images" },
        report.saved_count(),
        report.failed_count(),
        report.elapsed.as_secs_f64()
    ));
    for outcome in &report.outcomes {
        if let BatchOutcome::Failed { job, reason } = outcome {
            lines.push(format!(
                "{}Failed: {} ({})",
                indent(1),
                job.input_path.display(),
                reason
            ));
        }
    }
    lines
}

pub fn print_batch_summary(report: &BatchReport) {
    print_lines(&format_batch_summary(report));
}

// ============================================================================
// Effects
// ============================================================================

pub fn format_effect_list(effects: &[EffectInfo]) -> Vec<String> {
    let mut lines = vec!["Effects".to_string()];
    for (i, info) in effects.iter().enumerate() {
        let origin = match &info.origin {
            EffectOrigin::Builtin => "built-in".to_string(),
            EffectOrigin::Plugin(path) => format!("plugin: {}", path.display()),
            EffectOrigin::Registered => "registered".to_string(),
        };
        lines.push(format!("{} {} ({})", format_index(i + 1), info.name, origin));
        if let Some(desc) = info.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("{}{}", indent(1), desc));
        }
    }
    lines
}

/// Nothing when no plugin was skipped; otherwise a `Skipped plugins` block.
pub fn format_discovery_report(report: &DiscoveryReport) -> Vec<String> {
    if report.skipped.is_empty() {
        return Vec::new();
    }
    let mut lines = vec!["Skipped plugins".to_string()];
    for (path, reason) in &report.skipped {
        lines.push(format!("{}{}", indent(1), path.display()));
        lines.push(format!("{}{}", indent(2), reason));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchJob;
    use crate::config::StyleConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn failed(input: &str, reason: &str) -> BatchOutcome {
        BatchOutcome::Failed {
            job: BatchJob {
                input_path: PathBuf::from(input),
                output_path: PathBuf::from("out/x.png"),
                effect_name: None,
                preset: None,
                config: Arc::new(StyleConfig::default()),
            },
            reason: reason.to_string(),
        }
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1234), "1234");
    }

    #[test]
    fn saved_outcome_block() {
        let lines = format_job_outcome(3, 5, &BatchOutcome::Saved(PathBuf::from("out/a.png")));
        assert_eq!(lines, vec!["[003/005] Saved a.png", "    Output: out/a.png"]);
    }

    #[test]
    fn failed_outcome_block() {
        let lines = format_job_outcome(1, 2, &failed("in/b.jpg", "timeout"));
        assert_eq!(
            lines,
            vec![
                "[001/002] Failed b.jpg",
                "    Source: in/b.jpg",
                "    Reason: timeout",
            ]
        );
    }

    #[test]
    fn progress_percent() {
        assert_eq!(format_progress(2, 3), "Progress: 2/3 (66%)");
        assert_eq!(format_progress(0, 0), "Progress: 0/0 (100%)");
    }

    #[test]
    fn batch_summary_lists_failures() {
        let report = BatchReport {
            outcomes: vec![
                BatchOutcome::Saved(PathBuf::from("out/a.png")),
                failed("in/b.png", "decode error"),
            ],
            completed: 2,
            elapsed: Duration::from_millis(1500),
            ..BatchReport::default()
        };
        let lines = format_batch_summary(&report);
        assert_eq!(lines[0], "Processed 2 images: 1 saved, 1 failed (1.5s)");
        assert_eq!(lines[1], "    Failed: in/b.png (decode error)");
    }

    #[test]
    fn batch_summary_shows_warnings_first() {
        let report = BatchReport {
            warnings: vec!["no supported images found in in".into()],
            ..BatchReport::default()
        };
        let lines = format_batch_summary(&report);
        assert_eq!(lines[0], "Warning: no supported images found in in");
        assert_eq!(lines[1], "Processed 0 images: 0 saved, 0 failed (0.0s)");
    }

    #[test]
    fn effect_list_shows_origin_and_description() {
        let effects = vec![
            EffectInfo {
                name: "oil_paint".into(),
                origin: EffectOrigin::Builtin,
                description: Some("Kuwahara smoothing".into()),
            },
            EffectInfo {
                name: "sunset".into(),
                origin: EffectOrigin::Plugin(PathBuf::from("plugins/sunset.toml")),
                description: None,
            },
        ];
        assert_eq!(
            format_effect_list(&effects),
            vec![
                "Effects",
                "001 oil_paint (built-in)",
                "    Kuwahara smoothing",
                "002 sunset (plugin: plugins/sunset.toml)",
            ]
        );
    }

    #[test]
    fn discovery_report_only_lists_skips() {
        let mut report = DiscoveryReport::default();
        report.loaded.push("sunset".into());
        assert!(format_discovery_report(&report).is_empty());

        report
            .skipped
            .push((PathBuf::from("plugins/bad.toml"), "no ops".into()));
        assert_eq!(
            format_discovery_report(&report),
            vec!["Skipped plugins", "    plugins/bad.toml", "        no ops"]
        );
    }

    #[test]
    fn transform_output_lists_each_variation() {
        let lines = format_transform_output(
            Path::new("in/face.jpg"),
            &[
                (PathBuf::from("out/face-1.png"), 10),
                (PathBuf::from("out/face-2.png"), 11),
            ],
            &[PathBuf::from("dbg/face_composed.png")],
        );
        assert_eq!(
            lines,
            vec![
                "face.jpg",
                "    001 out/face-1.png (seed 10)",
                "    002 out/face-2.png (seed 11)",
                "    Intermediate: dbg/face_composed.png",
            ]
        );
    }
}
