//! Augmentation progress reporting.
//!
//! Context generation over the full corpus takes hours against a local
//! LLM, so the augmenter reports each finished batch. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for the augment stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AugmentProgressEvent {
    /// A batch is about to be submitted.
    BatchStarted { batch: usize, batches: usize },
    /// `done` of `total` chunks have finished, `failed` of them without context.
    ChunksDone {
        done: usize,
        total: usize,
        failed: usize,
    },
}

/// Reports augmentation progress. Implementations write to stderr (human or JSON).
pub trait AugmentProgressReporter: Send + Sync {
    fn report(&self, event: AugmentProgressEvent);
}

/// Human-friendly progress on stderr: "augment  1,234 / 5,000 chunks  (3 failed)".
pub struct StderrProgress;

impl AugmentProgressReporter for StderrProgress {
    fn report(&self, event: AugmentProgressEvent) {
        let line = match &event {
            AugmentProgressEvent::BatchStarted { batch, batches } => {
                format!(
                    "augment  batch {} / {}\n",
                    format_number(*batch as u64),
                    format_number(*batches as u64)
                )
            }
            AugmentProgressEvent::ChunksDone {
                done,
                total,
                failed,
            } => format!(
                "augment  {} / {} chunks  ({} failed)\n",
                format_number(*done as u64),
                format_number(*total as u64),
                failed
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AugmentProgressReporter for JsonProgress {
    fn report(&self, event: AugmentProgressEvent) {
        let obj = match &event {
            AugmentProgressEvent::BatchStarted { batch, batches } => serde_json::json!({
                "event": "progress",
                "phase": "batch",
                "batch": batch,
                "batches": batches
            }),
            AugmentProgressEvent::ChunksDone {
                done,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "augmenting",
                "n": done,
                "total": total,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AugmentProgressReporter for NoProgress {
    fn report(&self, _event: AugmentProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AugmentProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
