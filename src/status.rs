//! Live status snapshot for the admin dashboard.
//!
//! Aggregates queue, retry and failed summaries plus the progress of the
//! page currently being translated into one `status.json`, polled by the
//! dashboard. Per-field progress updates arrive far faster than a disk
//! write is worth, so writes are throttled; stage boundaries force a
//! snapshot.

use crate::scenario::Scenario;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Queue counters as shown on the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub pending: usize,
    /// Slug currently being processed, if any.
    pub processing: Option<String>,
    pub done: usize,
    pub errors: usize,
    pub total: usize,
    /// Slugs of recently errored items, for the status message.
    #[serde(skip)]
    pub error_slugs: Vec<String>,
}

/// Progress of the page currently being translated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProgress {
    pub slug: String,
    pub scenario: Scenario,
    /// Coarse stage: "classifying", "translating", "syncing", "saving".
    pub stage: String,
    pub language: Option<String>,
    pub languages_done: usize,
    pub languages_total: usize,
    pub fields_done: usize,
    pub fields_total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum OverallStatus {
    Idle,
    Translating,
    Error,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrySummary {
    count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailedSummary {
    count: usize,
    slugs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveStatus<'a> {
    status: OverallStatus,
    message: String,
    queue: &'a QueueSummary,
    retry: RetrySummary,
    failed: FailedSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: &'a Option<CurrentProgress>,
    updated_at: String,
}

#[derive(Default)]
struct Inner {
    queue: QueueSummary,
    retry_count: usize,
    failed_slugs: Vec<String>,
    current: Option<CurrentProgress>,
    last_write: Option<Instant>,
}

/// Throttled writer for the aggregated status file.
pub struct StatusReporter {
    path: PathBuf,
    throttle: Duration,
    inner: Mutex<Inner>,
}

impl StatusReporter {
    pub fn new(path: PathBuf, throttle_ms: u64) -> Self {
        Self {
            path,
            throttle: Duration::from_millis(throttle_ms),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Update queue counters. Forced: queue transitions are rare and the
    /// dashboard should see them immediately.
    pub fn publish_queue(&self, queue: QueueSummary) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.queue = queue;
        self.write(&mut inner, true);
    }

    /// Update retry/failed bookkeeping counters.
    pub fn publish_retry(&self, retry_count: usize, failed_slugs: Vec<String>) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.retry_count = retry_count;
        inner.failed_slugs = failed_slugs;
        self.write(&mut inner, true);
    }

    /// Begin reporting progress for one page.
    pub fn begin_page(&self, slug: &str, scenario: Scenario) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.current = Some(CurrentProgress {
            slug: slug.to_string(),
            scenario,
            stage: "classifying".to_string(),
            language: None,
            languages_done: 0,
            languages_total: 0,
            fields_done: 0,
            fields_total: 0,
        });
        self.write(&mut inner, true);
    }

    /// Fine-grained progress update; throttled.
    pub fn progress(
        &self,
        stage: &str,
        language: Option<&str>,
        languages: (usize, usize),
        fields: (usize, usize),
    ) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        if let Some(current) = inner.current.as_mut() {
            current.stage = stage.to_string();
            current.language = language.map(String::from);
            current.languages_done = languages.0;
            current.languages_total = languages.1;
            current.fields_done = fields.0;
            current.fields_total = fields.1;
        }
        self.write(&mut inner, false);
    }

    /// Clear the current-page progress block.
    pub fn end_page(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.current = None;
        self.write(&mut inner, true);
    }

    fn write(&self, inner: &mut Inner, force: bool) {
        if !force {
            if let Some(last) = inner.last_write {
                if last.elapsed() < self.throttle {
                    return;
                }
            }
        }

        let (status, message) = compose_message(inner);
        let snapshot = LiveStatus {
            status,
            message,
            queue: &inner.queue,
            retry: RetrySummary {
                count: inner.retry_count,
            },
            failed: FailedSummary {
                count: inner.failed_slugs.len(),
                slugs: inner.failed_slugs.clone(),
            },
            current: &inner.current,
            updated_at: Utc::now().to_rfc3339(),
        };

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!("Failed to write status file: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize status: {}", e),
        }

        inner.last_write = Some(Instant::now());
    }
}

fn compose_message(inner: &Inner) -> (OverallStatus, String) {
    if !inner.queue.error_slugs.is_empty() || !inner.failed_slugs.is_empty() {
        let mut slugs: Vec<&str> = inner
            .queue
            .error_slugs
            .iter()
            .chain(inner.failed_slugs.iter())
            .map(String::as_str)
            .collect();
        slugs.sort_unstable();
        slugs.dedup();
        return (
            OverallStatus::Error,
            format!("Errors: {}", slugs.join(", ")),
        );
    }

    if let Some(processing) = &inner.queue.processing {
        let processed = inner.queue.done + 1;
        let mut message = format!(
            "Translating {}/{}: {}",
            processed, inner.queue.total, processing
        );
        if inner.queue.pending > 0 {
            message.push_str(&format!(" ({} more queued)", inner.queue.pending));
        }
        return (OverallStatus::Translating, message);
    }

    if inner.queue.pending > 0 {
        return (
            OverallStatus::Translating,
            format!("Queued: {} file(s)", inner.queue.pending),
        );
    }

    (OverallStatus::Idle, "Waiting for changes".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_status(path: &std::path::Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_idle_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(path.clone(), 0);

        reporter.publish_queue(QueueSummary::default());

        let status = read_status(&path);
        assert_eq!(status["status"], "idle");
        assert_eq!(status["message"], "Waiting for changes");
        assert!(status.get("current").is_none());
    }

    #[test]
    fn test_translating_message() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(path.clone(), 0);

        reporter.publish_queue(QueueSummary {
            pending: 2,
            processing: Some("pdf-to-word".to_string()),
            done: 1,
            errors: 0,
            total: 4,
            error_slugs: vec![],
        });

        let status = read_status(&path);
        assert_eq!(status["status"], "translating");
        assert_eq!(status["message"], "Translating 2/4: pdf-to-word (2 more queued)");
    }

    #[test]
    fn test_error_status_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(path.clone(), 0);

        reporter.publish_queue(QueueSummary {
            errors: 1,
            total: 1,
            error_slugs: vec!["broken-page".to_string()],
            ..Default::default()
        });

        let status = read_status(&path);
        assert_eq!(status["status"], "error");
        assert_eq!(status["message"], "Errors: broken-page");
    }

    #[test]
    fn test_error_message_lists_each_slug_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(path.clone(), 0);

        // One slug errored in the queue AND sits in the failed list
        reporter.publish_retry(0, vec!["broken-page".to_string()]);
        reporter.publish_queue(QueueSummary {
            errors: 1,
            total: 1,
            error_slugs: vec!["broken-page".to_string()],
            ..Default::default()
        });

        let status = read_status(&path);
        assert_eq!(status["message"], "Errors: broken-page");
    }

    #[test]
    fn test_progress_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(path.clone(), 0);

        reporter.begin_page("pdf-to-word", Scenario::Incremental);
        reporter.progress("translating", Some("de"), (1, 2), (3, 5));

        let status = read_status(&path);
        let current = &status["current"];
        assert_eq!(current["slug"], "pdf-to-word");
        assert_eq!(current["scenario"], "incremental");
        assert_eq!(current["language"], "de");
        assert_eq!(current["languagesDone"], 1);
        assert_eq!(current["fieldsTotal"], 5);

        reporter.end_page();
        let status = read_status(&path);
        assert!(status.get("current").is_none());
    }

    #[test]
    fn test_throttle_suppresses_rapid_progress_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        // Large throttle; only forced writes land
        let reporter = StatusReporter::new(path.clone(), 60_000);

        reporter.begin_page("a", Scenario::New);
        let first = std::fs::read_to_string(&path).unwrap();

        reporter.progress("translating", Some("ru"), (1, 2), (0, 0));
        let second = std::fs::read_to_string(&path).unwrap();
        // Throttled write changed nothing on disk
        assert_eq!(first, second);

        reporter.end_page();
        let third = read_status(&path);
        assert!(third.get("current").is_none());
    }
}
