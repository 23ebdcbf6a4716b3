//! Durable FIFO translation queue.
//!
//! Every requested file becomes a queue item persisted to `queue.json`, so
//! a crash mid-batch loses nothing: items found in `processing` state at
//! startup revert to `pending`. Draining is strictly serial (the provider
//! rate-limits hard) and re-entrancy is a cheap `try_lock`: a drain
//! triggered while one is already running is a no-op because the active
//! drain will pick up whatever was enqueued meanwhile.

use crate::config::Config;
use crate::processor::{PageProcessor, ProcessOutcome};
use crate::retry::RetryScheduler;
use crate::status::{QueueSummary, StatusReporter};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Processing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub file: PathBuf,
    pub slug: String,
    pub state: ItemState,
    pub force: bool,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// On-disk queue shape. `processing`/`currentFile` are denormalized from
/// the items for the dashboard's benefit.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    items: Vec<QueueItem>,
    #[serde(default)]
    processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_file: Option<PathBuf>,
}

#[derive(Default)]
struct State {
    items: Vec<QueueItem>,
    /// Items completed during the current drain, for progress messages.
    done: usize,
}

pub struct QueueManager {
    queue_file: PathBuf,
    retention: Duration,
    state: Mutex<State>,
    drain: tokio::sync::Mutex<()>,
    processor: Arc<PageProcessor>,
    retry: Arc<RetryScheduler>,
    status: Arc<StatusReporter>,
}

impl QueueManager {
    pub fn new(
        config: &Config,
        processor: Arc<PageProcessor>,
        retry: Arc<RetryScheduler>,
        status: Arc<StatusReporter>,
    ) -> Self {
        let queue_file = config.queue_file();
        let mut items = load_queue(&queue_file);
        // Items caught mid-flight by a crash go back to pending.
        for item in &mut items {
            if item.state == ItemState::Processing {
                info!("Recovering interrupted queue item '{}'", item.slug);
                item.state = ItemState::Pending;
            }
        }
        Self {
            queue_file,
            retention: Duration::seconds(config.error_retention_secs as i64),
            state: Mutex::new(State { items, done: 0 }),
            drain: tokio::sync::Mutex::new(()),
            processor,
            retry,
            status,
        }
    }

    /// Add a file to the queue. Returns false if an equivalent item is
    /// already pending or processing; the force flag still merges.
    pub fn enqueue(&self, file: &Path, force: bool) -> bool {
        let slug = file_slug(file);
        let mut state = self.state.lock().expect("queue lock poisoned");

        if let Some(existing) = state
            .items
            .iter_mut()
            .find(|i| i.file == file && matches!(i.state, ItemState::Pending | ItemState::Processing))
        {
            existing.force |= force;
            if existing.state == ItemState::Pending {
                existing.added_at = Utc::now();
            }
            debug!("'{}' already queued, merged", slug);
            drop(state);
            self.persist_and_publish();
            return false;
        }

        info!("Queued '{}'{}", slug, if force { " (forced)" } else { "" });
        state.items.push(QueueItem {
            file: file.to_path_buf(),
            slug,
            state: ItemState::Pending,
            force,
            added_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        drop(state);
        self.persist_and_publish();
        true
    }

    /// Drain the queue serially. A second concurrent call is a no-op.
    pub async fn run(&self) {
        let Ok(_guard) = self.drain.try_lock() else {
            debug!("Queue drain already running");
            return;
        };

        loop {
            let next = {
                let mut state = self.state.lock().expect("queue lock poisoned");
                let next = state
                    .items
                    .iter_mut()
                    .filter(|i| i.state == ItemState::Pending)
                    .min_by_key(|i| i.added_at);
                match next {
                    Some(item) => {
                        item.state = ItemState::Processing;
                        Some((item.file.clone(), item.slug.clone(), item.force))
                    }
                    None => None,
                }
            };
            let Some((file, slug, force)) = next else {
                break;
            };
            self.persist_and_publish();

            match self.processor.process_file(&file, force).await {
                Ok(outcome) => {
                    match &outcome {
                        ProcessOutcome::Translated {
                            scenario,
                            languages,
                        } => info!(
                            "Translated '{}' ({} scenario, {} languages)",
                            slug,
                            scenario,
                            languages.len()
                        ),
                        ProcessOutcome::Unchanged => debug!("'{}' unchanged", slug),
                        ProcessOutcome::Skipped(reason) => {
                            info!("Skipped '{}': {}", slug, reason)
                        }
                    }
                    // Any clean outcome wipes the failure history.
                    self.retry.clear(&slug);
                    self.retry.clear_failed(&slug);

                    let mut state = self.state.lock().expect("queue lock poisoned");
                    state.items.retain(|i| i.file != file || i.state != ItemState::Processing);
                    state.done += 1;
                }
                Err(e) => {
                    let detail = format!("{:#}", e.source);
                    warn!("Processing '{}' failed: {}", slug, detail);
                    self.retry.record_failure(&file, &e.slug, &detail, e.scenario);

                    let mut state = self.state.lock().expect("queue lock poisoned");
                    if let Some(item) = state
                        .items
                        .iter_mut()
                        .find(|i| i.file == file && i.state == ItemState::Processing)
                    {
                        item.state = ItemState::Error;
                        item.finished_at = Some(Utc::now());
                        item.error = Some(detail);
                    }
                }
            }

            self.gc();
            self.persist_and_publish();
        }

        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.done = 0;
        }
        self.persist_and_publish();
    }

    /// Drop error items past the retention window. Pending and processing
    /// items are never collected. Returns whether anything was removed.
    fn gc(&self) -> bool {
        let cutoff = Utc::now() - self.retention;
        let mut state = self.state.lock().expect("queue lock poisoned");
        let before = state.items.len();
        state.items.retain(|i| {
            i.state != ItemState::Error || i.finished_at.map(|t| t > cutoff).unwrap_or(true)
        });
        state.items.len() != before
    }

    /// Expire stale error items even when no drain is running; the watch
    /// sweep calls this so a quiet session still cleans up.
    pub fn collect_garbage(&self) {
        if self.gc() {
            self.persist_and_publish();
        }
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.state.lock().expect("queue lock poisoned").items.clone()
    }

    fn summary(&self) -> QueueSummary {
        let state = self.state.lock().expect("queue lock poisoned");
        let pending = state
            .items
            .iter()
            .filter(|i| i.state == ItemState::Pending)
            .count();
        let processing = state
            .items
            .iter()
            .find(|i| i.state == ItemState::Processing)
            .map(|i| i.slug.clone());
        let errors: Vec<String> = state
            .items
            .iter()
            .filter(|i| i.state == ItemState::Error)
            .map(|i| i.slug.clone())
            .collect();
        let in_flight = usize::from(processing.is_some());
        QueueSummary {
            pending,
            processing,
            done: state.done,
            errors: errors.len(),
            total: pending + in_flight + state.done + errors.len(),
            error_slugs: errors,
        }
    }

    fn persist_and_publish(&self) {
        let items = self.items();
        let current_file = items
            .iter()
            .find(|i| i.state == ItemState::Processing)
            .map(|i| i.file.clone());
        let snapshot = QueueFile {
            processing: current_file.is_some(),
            current_file,
            items,
        };
        if let Err(e) = save_queue(&self.queue_file, &snapshot) {
            warn!("Failed to persist queue: {:#}", e);
        }
        self.status.publish_queue(self.summary());
        self.status.publish_retry(
            self.retry.retry_records().len(),
            self.retry
                .failed_records()
                .iter()
                .map(|r| r.slug.clone())
                .collect(),
        );
    }
}

fn file_slug(file: &Path) -> String {
    file.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn load_queue(path: &Path) -> Vec<QueueItem> {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<QueueFile>(&text) {
            Ok(file) => file.items,
            Err(e) => {
                warn!("Corrupt queue file {}, starting empty: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

fn save_queue(path: &Path, queue: &QueueFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(queue)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
