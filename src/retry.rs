//! Retry scheduling for failed page translations.
//!
//! Failures are tracked as durable records: a fixed-delay, bounded-attempt
//! retry list (`retry.json`) and a permanent-failure quarantine
//! (`failed.json`). Records survive restarts; a periodic sweep re-enqueues
//! due retries. Every time-sensitive operation has an `_at(now)` variant
//! so tests drive a synthetic clock instead of sleeping.

use crate::scenario::Scenario;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// One page currently in backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub file: PathBuf,
    pub slug: String,
    pub first_failed_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub scenario: Scenario,
}

/// One page that exhausted all retries. Permanent until an operator
/// re-runs it via the fix-failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub file: PathBuf,
    pub slug: String,
    pub first_failed_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub scenario: Scenario,
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another retry is scheduled.
    Scheduled,
    /// Attempts exhausted; the slug moved to the failed list.
    Quarantined,
}

pub struct RetryScheduler {
    retry_file: PathBuf,
    failed_file: PathBuf,
    max_attempts: u32,
    delay: Duration,
    retries: Mutex<Vec<RetryRecord>>,
    failed: Mutex<Vec<FailedRecord>>,
}

impl RetryScheduler {
    /// Load scheduler state from the given files. Unreadable or corrupt
    /// state files start empty rather than failing the pipeline.
    pub fn new(retry_file: PathBuf, failed_file: PathBuf, max_attempts: u32, delay_secs: u64) -> Self {
        let retries = load_records(&retry_file);
        let failed = load_records(&failed_file);
        Self {
            retry_file,
            failed_file,
            max_attempts,
            delay: Duration::seconds(delay_secs as i64),
            retries: Mutex::new(retries),
            failed: Mutex::new(failed),
        }
    }

    /// Record a processing failure for a slug.
    pub fn record_failure(
        &self,
        file: &Path,
        slug: &str,
        error: &str,
        scenario: Scenario,
    ) -> FailureOutcome {
        self.record_failure_at(file, slug, error, scenario, Utc::now())
    }

    /// Clock-injected variant of `record_failure`.
    pub fn record_failure_at(
        &self,
        file: &Path,
        slug: &str,
        error: &str,
        scenario: Scenario,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        let mut retries = self.retries.lock().expect("retry lock poisoned");

        let (attempts, first_failed_at) = match retries.iter().find(|r| r.slug == slug) {
            Some(existing) => (existing.attempts + 1, existing.first_failed_at),
            None => (1, now),
        };

        if attempts > self.max_attempts {
            retries.retain(|r| r.slug != slug);
            drop(retries);
            self.persist_retries();

            warn!(
                "Page '{}' failed {} times, moving to permanent failed list: {}",
                slug, attempts, error
            );
            let mut failed = self.failed.lock().expect("failed lock poisoned");
            failed.retain(|r| r.slug != slug);
            failed.push(FailedRecord {
                file: file.to_path_buf(),
                slug: slug.to_string(),
                first_failed_at,
                failed_at: now,
                attempts,
                last_error: error.to_string(),
                scenario,
            });
            drop(failed);
            self.persist_failed();
            return FailureOutcome::Quarantined;
        }

        let next_retry_at = now + self.delay;
        info!(
            "Scheduling retry {}/{} for '{}' at {}",
            attempts, self.max_attempts, slug, next_retry_at
        );
        retries.retain(|r| r.slug != slug);
        retries.push(RetryRecord {
            file: file.to_path_buf(),
            slug: slug.to_string(),
            first_failed_at,
            next_retry_at,
            attempts,
            last_error: error.to_string(),
            scenario,
        });
        drop(retries);
        self.persist_retries();
        FailureOutcome::Scheduled
    }

    /// All retry records whose scheduled time has elapsed.
    pub fn due(&self) -> Vec<RetryRecord> {
        self.due_at(Utc::now())
    }

    /// Clock-injected variant of `due`.
    pub fn due_at(&self, now: DateTime<Utc>) -> Vec<RetryRecord> {
        self.retries
            .lock()
            .expect("retry lock poisoned")
            .iter()
            .filter(|r| r.next_retry_at <= now)
            .cloned()
            .collect()
    }

    /// Drop a slug's retry record (successful processing or manual edit).
    pub fn clear(&self, slug: &str) -> bool {
        let mut retries = self.retries.lock().expect("retry lock poisoned");
        let before = retries.len();
        retries.retain(|r| r.slug != slug);
        let removed = retries.len() != before;
        drop(retries);
        if removed {
            self.persist_retries();
        }
        removed
    }

    /// Drop a slug's permanent-failure record.
    pub fn clear_failed(&self, slug: &str) -> bool {
        let mut failed = self.failed.lock().expect("failed lock poisoned");
        let before = failed.len();
        failed.retain(|r| r.slug != slug);
        let removed = failed.len() != before;
        drop(failed);
        if removed {
            self.persist_failed();
        }
        removed
    }

    pub fn retry_records(&self) -> Vec<RetryRecord> {
        self.retries.lock().expect("retry lock poisoned").clone()
    }

    pub fn failed_records(&self) -> Vec<FailedRecord> {
        self.failed.lock().expect("failed lock poisoned").clone()
    }

    fn persist_retries(&self) {
        let records = self.retries.lock().expect("retry lock poisoned").clone();
        if let Err(e) = save_records(&self.retry_file, &records) {
            warn!("Failed to persist retry state: {:#}", e);
        }
    }

    fn persist_failed(&self) {
        let records = self.failed.lock().expect("failed lock poisoned").clone();
        if let Err(e) = save_records(&self.failed_file, &records) {
            warn!("Failed to persist failed state: {:#}", e);
        }
    }
}

fn load_records<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(records) => records,
            Err(e) => {
                warn!("Corrupt state file {}, starting empty: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

fn save_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
