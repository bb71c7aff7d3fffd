//! Parallel batch runs over a directory of images.
//!
//! ## Flow
//!
//! ```text
//! Idle → Discovering → Dispatching → Running → Draining → Done
//!              │
//!              └─ nothing found ──────────────────────────→ Done (warning)
//! ```
//!
//! [`discover_jobs`] turns the input directory into one [`BatchJob`] per
//! supported image. [`BatchCoordinator::run`] then starts a fixed-size rayon
//! pool of worker loops fed through a bounded crossbeam channel. Each worker
//! runs its job through a [`JobRunner`], catches panics, bumps the shared
//! [`ProgressCounter`], prints its status block through the [`Console`], and
//! sends the outcome back on a result channel.
//!
//! The coordinator never blocks on the pool: it tops up the task channel
//! with `try_send`, drains results with `try_recv`, reports progress, and
//! sleeps for the poll interval.
//!
//! A batch only fails as a whole when the input directory cannot be read or
//! the output directory cannot be created. Every job that was discovered
//! gets exactly one [`BatchOutcome`], in job order.

pub mod progress;
pub mod runner;

pub use progress::{CapturedOutput, Console, ProgressCounter};
pub use runner::{InProcessRunner, JobError, JobRunner, SubprocessRunner, job_config};

use crate::config::{StyleConfig, effective_threads};
use crate::imaging::codec::is_supported_image;
use crate::output::{format_job_outcome, format_progress};
use crate::pipeline::panic_message;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("cannot read input directory {}: {message}", path.display())]
    InputDir { path: PathBuf, message: String },
    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Discovering,
    Dispatching,
    Running { active: usize },
    Draining,
    Done,
}

/// One input image mapped to one output path. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Overrides the config's primary effect.
    pub effect_name: Option<String>,
    /// Preset overlay applied on top of `config`.
    pub preset: Option<String>,
    pub config: Arc<StyleConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Saved(PathBuf),
    Failed { job: BatchJob, reason: String },
}

impl BatchOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, BatchOutcome::Saved(_))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Worker pool size. Clamped to `1..=jobs`.
    pub workers: usize,
    /// How often the coordinator checks for progress.
    pub poll_interval: Duration,
    /// Wall-clock budget per job.
    pub job_timeout: Option<Duration>,
    /// Descend into subdirectories of the input directory.
    pub recursive: bool,
    pub effect: Option<String>,
    pub preset: Option<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: effective_threads(&Default::default()),
            poll_interval: Duration::from_millis(100),
            job_timeout: None,
            recursive: false,
            effect: None,
            preset: None,
        }
    }
}

impl BatchOptions {
    /// Pool size and timeout from `[processing]`.
    pub fn from_config(config: &StyleConfig) -> Self {
        Self {
            workers: effective_threads(&config.processing),
            job_timeout: config.job_timeout(),
            ..Self::default()
        }
    }
}

/// Everything a finished batch knows about itself.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One entry per job, in job order.
    pub outcomes: Vec<BatchOutcome>,
    /// Final value of the progress counter.
    pub completed: usize,
    pub transitions: Vec<BatchState>,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    fn enter(&mut self, state: BatchState) {
        debug!(?state, "batch state");
        self.transitions.push(state);
    }

    pub fn state(&self) -> BatchState {
        self.transitions.last().copied().unwrap_or(BatchState::Idle)
    }

    pub fn saved_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_saved()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.saved_count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    /// Machine-readable form for `--report`.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.outcomes.len(),
            saved: self.saved_count(),
            failed: self.failed_count(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            warnings: self.warnings.clone(),
            outcomes: self
                .outcomes
                .iter()
                .map(|outcome| match outcome {
                    BatchOutcome::Saved(path) => OutcomeRecord {
                        status: "saved",
                        input: None,
                        output: Some(path.clone()),
                        reason: None,
                    },
                    BatchOutcome::Failed { job, reason } => OutcomeRecord {
                        status: "failed",
                        input: Some(job.input_path.clone()),
                        output: None,
                        reason: Some(reason.clone()),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub saved: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
    pub outcomes: Vec<OutcomeRecord>,
}

#[derive(Debug, Serialize)]
pub struct OutcomeRecord {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Discovery
// ============================================================================

/// One job per supported image under `input_dir`, sorted by path.
///
/// Output paths mirror the input layout under `output_dir` with the
/// configured output extension. When two inputs differ only in extension
/// (`a.jpg`, `a.png`) the later one keeps its source extension in the stem.
pub fn discover_jobs(
    input_dir: &Path,
    output_dir: &Path,
    config: &Arc<StyleConfig>,
    options: &BatchOptions,
) -> Result<Vec<BatchJob>, BatchError> {
    if !input_dir.is_dir() {
        return Err(BatchError::InputDir {
            path: input_dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let mut walker = WalkDir::new(input_dir).min_depth(1).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }
    let extension = config.output.format.extension();

    let mut taken = HashSet::new();
    let mut jobs = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(input_dir)
            .unwrap_or(entry.path());
        let mut output_path = output_dir.join(relative).with_extension(extension);
        if taken.contains(&output_path) {
            let stem = relative
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source_ext = relative
                .extension()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            output_path.set_file_name(format!("{stem}-{source_ext}.{extension}"));
        }
        taken.insert(output_path.clone());

        jobs.push(BatchJob {
            input_path: entry.into_path(),
            output_path,
            effect_name: options.effect.clone(),
            preset: options.preset.clone(),
            config: Arc::clone(config),
        });
    }
    Ok(jobs)
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct BatchCoordinator {
    options: BatchOptions,
    console: Console,
}

impl BatchCoordinator {
    pub fn new(options: BatchOptions, console: Console) -> Self {
        Self { options, console }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Discover every image in `input_dir` and run it into `output_dir`.
    pub fn run_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        config: Arc<StyleConfig>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        report.enter(BatchState::Idle);
        report.enter(BatchState::Discovering);

        let jobs = discover_jobs(input_dir, output_dir, &config, &self.options)?;
        if jobs.is_empty() {
            let message = format!("no supported images found in {}", input_dir.display());
            warn!("{message}");
            report.warnings.push(message);
            report.enter(BatchState::Done);
            report.elapsed = started.elapsed();
            return Ok(report);
        }
        info!(jobs = jobs.len(), input = %input_dir.display(), "discovered batch jobs");

        fs::create_dir_all(output_dir).map_err(|source| BatchError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;
        self.execute(jobs, runner, report, started)
    }

    /// Run an explicit job list.
    pub fn run(
        &self,
        jobs: Vec<BatchJob>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        report.enter(BatchState::Idle);
        if jobs.is_empty() {
            report.enter(BatchState::Done);
            return Ok(report);
        }
        self.execute(jobs, runner, report, started)
    }

    fn execute(
        &self,
        jobs: Vec<BatchJob>,
        runner: Arc<dyn JobRunner>,
        mut report: BatchReport,
        started: Instant,
    ) -> Result<BatchReport, BatchError> {
        let total = jobs.len();
        let workers = self.options.workers.clamp(1, total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("brushwork-worker-{i}"))
            .panic_handler(|payload| {
                warn!(panic = %panic_message(payload.as_ref()), "batch worker died");
            })
            .build()?;

        let (task_tx, task_rx) = crossbeam_channel::bounded::<(usize, BatchJob)>(workers);
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, BatchOutcome)>();
        let progress = Arc::new(ProgressCounter::new());

        report.enter(BatchState::Dispatching);
        for _ in 0..workers {
            let worker = Worker {
                tasks: task_rx.clone(),
                done: done_tx.clone(),
                runner: Arc::clone(&runner),
                progress: Arc::clone(&progress),
                console: self.console.clone(),
                timeout: self.options.job_timeout,
                total,
            };
            pool.spawn(move || worker.run());
        }
        drop(task_rx);
        drop(done_tx);

        let mut pending: VecDeque<(usize, BatchJob)> =
            jobs.iter().cloned().enumerate().collect();
        let mut sender = Some(task_tx);
        let mut slots: Vec<Option<BatchOutcome>> = vec![None; total];
        let mut received = 0;
        let mut reported = 0;
        let mut running = false;

        loop {
            if let Some(tx) = sender.take() {
                let mut open = true;
                while let Some(task) = pending.pop_front() {
                    match tx.try_send(task) {
                        Ok(()) => {}
                        Err(TrySendError::Full(task)) => {
                            pending.push_front(task);
                            break;
                        }
                        Err(TrySendError::Disconnected(task)) => {
                            warn!("worker pool stopped accepting jobs");
                            pending.push_front(task);
                            open = false;
                            break;
                        }
                    }
                }
                if !running {
                    report.enter(BatchState::Running { active: workers });
                    running = true;
                }
                if pending.is_empty() {
                    // Dropping the sender closes the channel so idle workers exit
                    report.enter(BatchState::Draining);
                } else if open {
                    sender = Some(tx);
                }
            }

            let mut disconnected = false;
            loop {
                match done_rx.try_recv() {
                    Ok((index, outcome)) => {
                        if slots[index].replace(outcome).is_none() {
                            received += 1;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            let completed = progress.get();
            if completed != reported {
                reported = completed;
                self.console.emit(&[format_progress(completed, total)]);
            }
            if received == total || disconnected {
                break;
            }
            thread::sleep(self.options.poll_interval);
        }

        report.outcomes = slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| {
                slot.unwrap_or_else(|| {
                    progress.increment();
                    BatchOutcome::Failed {
                        job,
                        reason: "worker pool shut down before the job ran".to_string(),
                    }
                })
            })
            .collect();
        report.completed = progress.get();
        report.elapsed = started.elapsed();
        report.enter(BatchState::Done);
        info!(
            saved = report.saved_count(),
            failed = report.failed_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }
}

struct Worker {
    tasks: Receiver<(usize, BatchJob)>,
    done: Sender<(usize, BatchOutcome)>,
    runner: Arc<dyn JobRunner>,
    progress: Arc<ProgressCounter>,
    console: Console,
    timeout: Option<Duration>,
    total: usize,
}

impl Worker {
    fn run(self) {
        for (index, job) in self.tasks.iter() {
            let outcome = execute_job(self.runner.as_ref(), job, self.timeout);
            let completed = self.progress.increment();
            self.console
                .emit(&format_job_outcome(completed, self.total, &outcome));
            if self.done.send((index, outcome)).is_err() {
                break;
            }
        }
    }
}

/// Run one job, converting every failure (panics included) into an outcome.
pub fn execute_job(
    runner: &dyn JobRunner,
    job: BatchJob,
    timeout: Option<Duration>,
) -> BatchOutcome {
    let deadline = timeout.map(|t| Instant::now() + t);
    let result = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&job, deadline)))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));
    match result {
        Ok(path) => BatchOutcome::Saved(path),
        Err(e) => {
            warn!(input = %job.input_path.display(), error = %e, "batch job failed");
            BatchOutcome::Failed {
                job,
                reason: e.to_string(),
            }
        }
    }
}
