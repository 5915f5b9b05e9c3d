//! Ingest progress reporting.
//!
//! Reports observable progress during `ipvec ingest` so users see which
//! category is being scanned and how many files are left. Progress is
//! emitted on **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use crate::models::Category;

/// A single progress event for an ingest run.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Walking the corpus for this category. Total unknown.
    Discovering { category: Category },
    /// `n` of `total` files finished for this category.
    Processing {
        category: Category,
        n: u64,
        total: u64,
        items: u64,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest legal  1,234 / 5,000 files  (9,876 items)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { category } => {
                format!("ingest {}  discovering...\n", category)
            }
            IngestProgressEvent::Processing {
                category,
                n,
                total,
                items,
            } => format!(
                "ingest {}  {} / {} files  ({} items)\n",
                category,
                format_number(*n),
                format_number(*total),
                format_number(*items)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Discovering { category } => serde_json::json!({
                "event": "progress",
                "category": category,
                "phase": "discovering"
            }),
            IngestProgressEvent::Processing {
                category,
                n,
                total,
                items,
            } => serde_json::json!({
                "event": "progress",
                "category": category,
                "phase": "processing",
                "n": n,
                "total": total,
                "items": items
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse the `--progress` flag. `auto` picks human on a TTY.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::default_for_tty()),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            "off" => Some(ProgressMode::Off),
            _ => None,
        }
    }

    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
