//! Filesystem watch orchestration.
//!
//! Bridges notify's callback API into the tokio runtime and turns raw
//! events into queue work. Three filters sit between an event and the
//! queue: only `.yml` files count, saves made by the pipeline itself are
//! suppressed for a short window, and a per-file debounce coalesces the
//! bursts editors and CMS writes produce. An independent periodic sweep
//! re-enqueues due retries so a quiet repository still makes progress.

use crate::config::Config;
use crate::queue::QueueManager;
use crate::retry::RetryScheduler;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Remembers files the pipeline saved recently so its own writes do not
/// re-trigger translation.
pub struct SaveTracker {
    suppress: Duration,
    saves: Mutex<HashMap<PathBuf, Instant>>,
}

impl SaveTracker {
    pub fn new(suppress_ms: u64) -> Self {
        Self {
            suppress: Duration::from_millis(suppress_ms),
            saves: Mutex::new(HashMap::new()),
        }
    }

    /// Record that the pipeline is about to write this path.
    pub fn mark(&self, path: &Path) {
        self.saves
            .lock()
            .expect("save tracker lock poisoned")
            .insert(path.to_path_buf(), Instant::now());
    }

    /// Whether an event on this path is attributable to our own save.
    pub fn is_own_save(&self, path: &Path) -> bool {
        let mut saves = self.saves.lock().expect("save tracker lock poisoned");
        saves.retain(|_, t| t.elapsed() < self.suppress);
        saves.contains_key(path)
    }
}

fn is_page_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("yml")
}

fn file_slug(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or_default()
}

/// Drain the debounce map of entries whose quiet period has elapsed.
fn take_due(debounce: &mut HashMap<PathBuf, Instant>, window: Duration) -> Vec<PathBuf> {
    let due: Vec<PathBuf> = debounce
        .iter()
        .filter(|(_, t)| t.elapsed() >= window)
        .map(|(p, _)| p.clone())
        .collect();
    for path in &due {
        debounce.remove(path);
    }
    due
}

pub struct WatchOrchestrator {
    config: Config,
    queue: Arc<QueueManager>,
    retry: Arc<RetryScheduler>,
    saves: Arc<SaveTracker>,
}

impl WatchOrchestrator {
    pub fn new(
        config: Config,
        queue: Arc<QueueManager>,
        retry: Arc<RetryScheduler>,
        saves: Arc<SaveTracker>,
    ) -> Self {
        Self {
            config,
            queue,
            retry,
            saves,
        }
    }

    /// Watch the content directory until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .context("Failed to create file watcher")?;
        watcher
            .watch(&self.config.content_dir, RecursiveMode::NonRecursive)
            .with_context(|| {
                format!("Failed to watch {}", self.config.content_dir.display())
            })?;
        info!("Watching {} for changes", self.config.content_dir.display());

        let window = Duration::from_millis(self.config.debounce_ms);
        let mut debounce: HashMap<PathBuf, Instant> = HashMap::new();
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip the sweep burst.
        sweep.tick().await;

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    self.handle_event(&event, &mut debounce);
                }
                _ = tick.tick() => {
                    let due = take_due(&mut debounce, window);
                    if !due.is_empty() {
                        for path in due {
                            let slug = file_slug(&path).to_string();
                            // A manual edit resets the slug's failure history
                            self.retry.clear(&slug);
                            self.retry.clear_failed(&slug);
                            self.queue.enqueue(&path, false);
                        }
                        self.queue.run().await;
                    }
                }
                _ = sweep.tick() => {
                    self.queue.collect_garbage();
                    self.sweep_retries().await;
                }
            }
        }
    }

    fn handle_event(&self, event: &Event, debounce: &mut HashMap<PathBuf, Instant>) {
        for path in &event.paths {
            if !is_page_file(path) {
                continue;
            }
            if matches!(event.kind, EventKind::Remove(_)) {
                let slug = file_slug(path);
                info!("Page file removed: {}", slug);
                debounce.remove(path);
                self.retry.clear(slug);
                self.retry.clear_failed(slug);
                continue;
            }
            if self.saves.is_own_save(path) {
                debug!("Ignoring own save of {}", path.display());
                continue;
            }
            debounce.insert(path.clone(), Instant::now());
        }
    }

    /// Re-enqueue every retry whose scheduled time has elapsed.
    async fn sweep_retries(&self) {
        let due = self.retry.due();
        if due.is_empty() {
            return;
        }
        info!("Re-enqueueing {} due retries", due.len());
        for record in due {
            self.queue.enqueue(&record.file, false);
        }
        self.queue.run().await;
    }
}
