//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for each discovered file:
//!
//! ```text
//! DISCOVER → READ → NORMALIZE → EMBED → UPSERT → DONE | SKIPPED | FAILED
//! ```
//!
//! Files run concurrently on a [`JoinSet`], bounded by a semaphore of
//! `ingest.concurrency` permits. Failures are scoped:
//!
//! - an item that matches no schema is skipped and counted;
//! - an item whose embedding fails is excluded from its file's batch and
//!   reported (a failed batch is retried item by item to isolate it, until
//!   consecutive unavailable items show the provider is down);
//! - a file that cannot be parsed, or whose upsert fails, is marked failed
//!   and the run continues;
//! - a vector whose length disagrees with its collection aborts the run.
//!
//! Each file's points are upserted as one batch, keyed by ids derived from
//! `(relative path, item index)`, so re-running over unchanged input
//! overwrites instead of duplicating.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::collections::CollectionManager;
use crate::config::Config;
use crate::discover::SourceFile;
use crate::embedding::{EmbedMode, EmbeddingProvider};
use crate::error::{IngestError, ProviderError};
use crate::identity::derive_id;
use crate::models::{CanonicalRecord, Category, UpsertPoint};
use crate::normalize::{normalize_item, SourceInfo};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_errors_per_category: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.ingest.concurrency,
            batch_size: config.embedding.batch_size,
            max_errors_per_category: config.ingest.max_errors_per_category,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 16,
            max_errors_per_category: 10,
        }
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Done,
    Skipped,
    Failed(String),
}

/// What happened to one file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub category: Category,
    pub key: String,
    pub outcome: FileOutcome,
    pub items_normalized: u64,
    pub items_embedded: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    pub errors: Vec<String>,
}

impl FileReport {
    fn new(file: &SourceFile) -> Self {
        Self {
            category: file.category,
            key: file.key.clone(),
            outcome: FileOutcome::Skipped,
            items_normalized: 0,
            items_embedded: 0,
            items_skipped: 0,
            items_failed: 0,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, reason: String) {
        self.errors.push(format!("{}: {}", self.key, reason));
        self.outcome = FileOutcome::Failed(reason);
    }
}

/// Per-category counters of a run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CategoryReport {
    pub files_processed: u64,
    pub files_done: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    /// Files never started because the run was stopped.
    pub files_cancelled: u64,
    pub items_normalized: u64,
    pub items_embedded: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    /// The first `max_errors_per_category` error messages.
    pub errors: Vec<String>,
}

/// Summary of a whole run, printable or serializable with `--json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub categories: BTreeMap<Category, CategoryReport>,
}

impl RunReport {
    fn record(&mut self, file: FileReport, max_errors: usize) {
        let cat = self.categories.entry(file.category).or_default();
        cat.files_processed += 1;
        match file.outcome {
            FileOutcome::Done => cat.files_done += 1,
            FileOutcome::Skipped => cat.files_skipped += 1,
            FileOutcome::Failed(_) => cat.files_failed += 1,
        }
        cat.items_normalized += file.items_normalized;
        cat.items_embedded += file.items_embedded;
        cat.items_skipped += file.items_skipped;
        cat.items_failed += file.items_failed;
        let room = max_errors.saturating_sub(cat.errors.len());
        cat.errors.extend(file.errors.into_iter().take(room));
    }

    pub fn category(&self, category: Category) -> CategoryReport {
        self.categories.get(&category).cloned().unwrap_or_default()
    }

    /// Human summary on stdout.
    pub fn print_summary(&self) {
        for (category, r) in &self.categories {
            if self.dry_run {
                println!("ingest {} (dry-run)", category);
            } else {
                println!("ingest {}", category);
            }
            println!(
                "  files: {} processed, {} done, {} skipped, {} failed",
                r.files_processed, r.files_done, r.files_skipped, r.files_failed
            );
            if r.files_cancelled > 0 {
                println!("  files not started: {}", r.files_cancelled);
            }
            if self.dry_run {
                println!(
                    "  items: {} normalized, {} skipped",
                    r.items_normalized, r.items_skipped
                );
            } else {
                println!(
                    "  items: {} embedded, {} skipped, {} failed",
                    r.items_embedded, r.items_skipped, r.items_failed
                );
            }
            if !r.errors.is_empty() {
                println!("  errors:");
                for e in &r.errors {
                    println!("    {}", e);
                }
            }
        }
        if self.cancelled {
            println!("cancelled after {} ms", self.elapsed_ms);
        } else {
            println!("ok ({} ms)", self.elapsed_ms);
        }
    }
}

/// Keep at most `limit` files per category, preserving order.
pub fn limit_per_category(files: Vec<SourceFile>, limit: Option<usize>) -> Vec<SourceFile> {
    let Some(limit) = limit else {
        return files;
    };
    let mut seen: BTreeMap<Category, usize> = BTreeMap::new();
    files
        .into_iter()
        .filter(|f| {
            let n = seen.entry(f.category).or_default();
            *n += 1;
            *n <= limit
        })
        .collect()
}

/// Records of one file that survived normalization, with their item index.
struct LoadedFile {
    records: Vec<(usize, CanonicalRecord)>,
    skipped: u64,
}

/// READ + NORMALIZE. A top-level object is treated as a one-item array.
async fn load_records(file: &SourceFile) -> Result<LoadedFile, IngestError> {
    let bytes = tokio::fs::read(&file.path).await?;
    let parsed: Value = serde_json::from_slice(&bytes).map_err(|e| IngestError::Parse {
        path: file.key.clone(),
        reason: e.to_string(),
    })?;
    let items = match parsed {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(IngestError::Parse {
                path: file.key.clone(),
                reason: format!("expected a JSON array, found {}", json_kind(&other)),
            })
        }
    };

    let source = SourceInfo::from_file_name(&file.file_name());
    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        match normalize_item(item, file.category, &source) {
            Ok(record) => records.push((index, record)),
            Err(reason) => {
                tracing::debug!(file = %file.key, item = index, ?reason, "item skipped");
                skipped += 1;
            }
        }
    }
    Ok(LoadedFile { records, skipped })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalize every file without embedding or writing anything.
pub async fn dry_run(files: &[SourceFile], max_errors: usize) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport {
        dry_run: true,
        ..RunReport::default()
    };
    for file in files {
        let mut fr = FileReport::new(file);
        match load_records(file).await {
            Ok(loaded) => {
                fr.items_normalized = loaded.records.len() as u64;
                fr.items_skipped = loaded.skipped;
                if !loaded.records.is_empty() {
                    fr.outcome = FileOutcome::Done;
                }
            }
            Err(e) => fr.fail(e.to_string()),
        }
        report.record(fr, max_errors);
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report
}

struct Shared {
    provider: Arc<dyn EmbeddingProvider>,
    collections: Arc<CollectionManager>,
    batch_size: usize,
}

impl Shared {
    /// Run one file to a terminal state. Only fatal errors are returned as
    /// `Err`; everything else is recorded in the report.
    async fn process_file(&self, file: &SourceFile) -> Result<FileReport, IngestError> {
        let mut report = FileReport::new(file);

        let loaded = match load_records(file).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(file = %file.key, error = %e, "file failed");
                report.fail(e.to_string());
                return Ok(report);
            }
        };
        report.items_normalized = loaded.records.len() as u64;
        report.items_skipped = loaded.skipped;

        if loaded.records.is_empty() {
            tracing::debug!(file = %file.key, skipped = loaded.skipped, "nothing to embed");
            return Ok(report);
        }

        let points = self.embed_records(file, &loaded.records, &mut report).await;
        if points.is_empty() {
            let reason = format!("all {} records failed to embed", loaded.records.len());
            tracing::error!(file = %file.key, "{}", reason);
            report.fail(reason);
            return Ok(report);
        }

        match self.collections.upsert(file.category, &points).await {
            Ok(result) => {
                report.items_embedded = result.points as u64;
                report.outcome = FileOutcome::Done;
                tracing::info!(
                    file = %file.key,
                    category = %file.category,
                    points = result.points,
                    skipped = report.items_skipped,
                    failed = report.items_failed,
                    "file ingested"
                );
                Ok(report)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::error!(file = %file.key, error = %e, "upsert failed");
                report.fail(e.to_string());
                Ok(report)
            }
        }
    }

    /// EMBED. Batches that fail are retried one item at a time so a single
    /// bad record cannot take its neighbours down with it. Once single-item
    /// calls keep failing as unavailable the provider is treated as down and
    /// the rest of the file fails without further requests.
    async fn embed_records(
        &self,
        file: &SourceFile,
        records: &[(usize, CanonicalRecord)],
        report: &mut FileReport,
    ) -> Vec<UpsertPoint> {
        let mut points = Vec::with_capacity(records.len());
        let mut outage = OutageGuard::default();

        for batch in records.chunks(self.batch_size.max(1)) {
            if let Some(cause) = outage.cause() {
                for (index, _) in batch {
                    self.item_failed(file, *index, &cause, report);
                }
                continue;
            }

            let texts: Vec<String> = batch.iter().map(|(_, r)| r.text.clone()).collect();
            match self.provider.embed_batch(&texts, EmbedMode::Passage).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    outage.reset();
                    for ((index, record), vector) in batch.iter().zip(vectors) {
                        points.push(UpsertPoint::from_record(
                            derive_id(&file.key, *index),
                            vector,
                            record,
                        ));
                    }
                    continue;
                }
                Ok(vectors) => {
                    tracing::warn!(
                        file = %file.key,
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding batch returned wrong count; retrying per item"
                    );
                }
                Err(e) if batch.len() > 1 => {
                    tracing::warn!(file = %file.key, error = %e, "embedding batch failed; retrying per item");
                }
                Err(e) => {
                    let (index, _) = &batch[0];
                    self.item_failed(file, *index, &e.to_string(), report);
                    if outage.record(&e) {
                        tracing::warn!(file = %file.key, "embedding provider unavailable; failing remaining items");
                    }
                    continue;
                }
            }

            for (index, record) in batch {
                if let Some(cause) = outage.cause() {
                    self.item_failed(file, *index, &cause, report);
                    continue;
                }
                match self.provider.embed(&record.text, EmbedMode::Passage).await {
                    Ok(vector) => {
                        outage.reset();
                        points.push(UpsertPoint::from_record(
                            derive_id(&file.key, *index),
                            vector,
                            record,
                        ));
                    }
                    Err(e) => {
                        self.item_failed(file, *index, &e.to_string(), report);
                        if outage.record(&e) {
                            tracing::warn!(file = %file.key, "embedding provider unavailable; failing remaining items");
                        }
                    }
                }
            }
        }

        points
    }

    fn item_failed(&self, file: &SourceFile, index: usize, error: &str, report: &mut FileReport) {
        tracing::warn!(file = %file.key, item = index, error = %error, "item failed to embed");
        report.items_failed += 1;
        report.errors.push(format!("{}#{}: {}", file.key, index, error));
    }
}

/// Watch interrupt signals for a running pipeline.
///
/// The first signal sets `stop`, so no new file starts while in-flight files
/// finish their upsert. Returns `true` when a second signal arrives; the
/// caller should then exit immediately.
pub async fn watch_interrupts<F, Fut>(stop: Arc<AtomicBool>, mut next_signal: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    tracing::warn!("interrupt received; finishing in-flight files (interrupt again to exit now)");
    stop.store(true, Ordering::SeqCst);
    next_signal().await.is_ok()
}

/// Consecutive single-item embeddings that failed with a retryable error.
const OUTAGE_STREAK: u32 = 2;

/// Tracks whether the provider looks down for the rest of a file.
///
/// A multi-item batch failure does not count: it may be one slow item.
/// Only single-item calls, which the provider has already retried, do.
#[derive(Default)]
struct OutageGuard {
    streak: u32,
    last: String,
}

impl OutageGuard {
    fn reset(&mut self) {
        self.streak = 0;
    }

    /// Returns `true` when this failure trips the guard.
    fn record(&mut self, error: &ProviderError) -> bool {
        if !error.is_retryable() {
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        self.last = error.to_string();
        self.streak == OUTAGE_STREAK
    }

    fn cause(&self) -> Option<String> {
        (self.streak >= OUTAGE_STREAK)
            .then(|| format!("not attempted, provider unavailable ({})", self.last))
    }
}

/// The ingestion orchestrator.
///
/// Holds the long-lived provider and collection handles; both are built
/// once by the caller and shared with every file task.
pub struct Pipeline {
    shared: Arc<Shared>,
    settings: PipelineSettings,
    progress: Arc<dyn IngestProgressReporter>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        collections: Arc<CollectionManager>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                collections,
                batch_size: settings.batch_size,
            }),
            settings,
            progress: Arc::new(NoProgress),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that, once set, prevents files that have not started from
    /// starting. Files already in flight finish their upsert.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Ingest `files`.
    ///
    /// # Errors
    ///
    /// Only fatal errors ([`IngestError::is_fatal`]) end the run early;
    /// remaining tasks are aborted. File and item failures are in the report.
    pub async fn run(&self, files: Vec<SourceFile>) -> Result<RunReport, IngestError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        let mut totals: BTreeMap<Category, u64> = BTreeMap::new();
        for file in &files {
            *totals.entry(file.category).or_default() += 1;
        }
        for category in totals.keys() {
            report.categories.entry(*category).or_default();
            self.progress
                .report(IngestProgressEvent::Discovering { category: *category });
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut set = JoinSet::new();
        for file in files {
            let shared = Arc::clone(&self.shared);
            let semaphore = Arc::clone(&semaphore);
            let stop = Arc::clone(&self.stop);
            set.spawn(async move {
                let category = file.category;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (category, None);
                };
                if stop.load(Ordering::SeqCst) {
                    return (category, None);
                }
                (category, Some(shared.process_file(&file).await))
            });
        }

        while let Some(joined) = set.join_next().await {
            let (category, result) = match joined {
                Ok(r) => r,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => continue,
            };
            match result {
                None => {
                    report.cancelled = true;
                    report.categories.entry(category).or_default().files_cancelled += 1;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "aborting run");
                    set.abort_all();
                    return Err(e);
                }
                Some(Ok(file_report)) => {
                    report.record(file_report, self.settings.max_errors_per_category);
                    let cat = report.category(category);
                    self.progress.report(IngestProgressEvent::Processing {
                        category,
                        n: cat.files_processed,
                        total: totals.get(&category).copied().unwrap_or(0),
                        items: cat.items_embedded,
                    });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(category: Category, key: &str) -> SourceFile {
        SourceFile {
            category,
            path: PathBuf::from(key),
            key: key.to_string(),
        }
    }

    #[test]
    fn limit_applies_per_category() {
        let files = vec![
            file(Category::Legal, "a.json"),
            file(Category::Legal, "b.json"),
            file(Category::Patent, "c.json"),
            file(Category::Patent, "d.json"),
        ];
        let kept = limit_per_category(files.clone(), Some(1));
        let keys: Vec<_> = kept.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a.json", "c.json"]);
        assert_eq!(limit_per_category(files, None).len(), 4);
    }

    #[test]
    fn errors_capped_per_category() {
        let mut report = RunReport::default();
        for i in 0..3 {
            let mut fr = FileReport::new(&file(Category::Legal, &format!("{}.json", i)));
            fr.fail("bad".into());
            report.record(fr, 2);
        }
        let legal = report.category(Category::Legal);
        assert_eq!(legal.files_failed, 3);
        assert_eq!(legal.errors.len(), 2);
        assert_eq!(legal.errors[0], "0.json: bad");
    }

    #[test]
    fn report_serializes_category_keys() {
        let mut report = RunReport::default();
        report.record(FileReport::new(&file(Category::Patent, "x.json")), 10);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["categories"]["patent"]["files_skipped"], 1);
    }

    #[tokio::test]
    async fn scalar_top_level_is_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("case_civil_kr.json");
        std::fs::write(&path, "42").unwrap();
        let f = SourceFile {
            category: Category::Legal,
            path,
            key: "case_civil_kr.json".into(),
        };
        assert!(matches!(
            load_records(&f).await,
            Err(IngestError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn top_level_object_is_one_item() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("case_civil_kr.json");
        std::fs::write(&path, r#"{"title": "T", "output": "O"}"#).unwrap();
        let f = SourceFile {
            category: Category::Legal,
            path,
            key: "case_civil_kr.json".into(),
        };
        let loaded = load_records(&f).await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].0, 0);
    }

    #[test]
    fn outage_guard_trips_on_consecutive_unavailable() {
        let down = ProviderError::Unavailable("503".into());
        let rejected = ProviderError::Rejected {
            status: 400,
            body: "bad".into(),
        };

        let mut guard = OutageGuard::default();
        assert!(!guard.record(&down));
        assert!(guard.cause().is_none());
        guard.reset();
        assert!(!guard.record(&down));
        assert!(!guard.record(&rejected));
        assert!(!guard.record(&down));
        assert!(guard.record(&down));
        assert!(guard.cause().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn first_interrupt_stops_second_exits() {
        let stop = Arc::new(AtomicBool::new(false));
        let exit = watch_interrupts(stop.clone(), || async { Ok(()) }).await;
        assert!(stop.load(Ordering::SeqCst));
        assert!(exit);
    }

    #[tokio::test]
    async fn single_interrupt_only_stops() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut signals = vec![
            Err(std::io::Error::other("signal handler gone")),
            Ok(()),
        ];
        let exit = watch_interrupts(stop.clone(), move || {
            let next = signals.pop().unwrap_or(Ok(()));
            async move { next }
        })
        .await;
        assert!(stop.load(Ordering::SeqCst));
        assert!(!exit);
    }

    #[tokio::test]
    async fn no_signal_handler_leaves_run_alone() {
        let stop = Arc::new(AtomicBool::new(false));
        let exit = watch_interrupts(stop.clone(), || async {
            Err(std::io::Error::other("unsupported"))
        })
        .await;
        assert!(!stop.load(Ordering::SeqCst));
        assert!(!exit);
    }
}
