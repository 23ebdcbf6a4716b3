//! Per-page translation execution.
//!
//! The processor takes one page file from classification to saved result.
//! Disk writes are all-or-nothing: the raw file bytes are snapshotted up
//! front and restored on any failure, so a half-translated page never
//! reaches the repository. Scenario strategy, slug renaming, the
//! incremental field diff and the concurrent-edit guard all live here;
//! queueing and retry policy do not.

use crate::config::Config;
use crate::hash::{content_hash, field_hashes};
use crate::i18n::Language;
use crate::page::{PageDocument, STATUS_READY, STATUS_TRANSLATING};
use crate::paths::{get_by_path, is_length_marker, set_by_path, sync_structure, terminal_key};
use crate::provider::{TranslationProvider, SKIP_KEYS};
use crate::scenario::{classify, Scenario};
use crate::status::StatusReporter;
use crate::watch::SaveTracker;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a file was skipped without either translating it or erroring.
/// Skips are terminal: none of these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Unparseable or schema-invalid page.
    Invalid,
    /// Auto-generated numeric-suffix duplicate; the file was deleted.
    DuplicateRemoved,
    /// The slug's canonical filename is taken by a different page.
    Collision,
    /// The author edited the file while translation was in flight.
    ConcurrentEdit,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SkipReason::Invalid => "invalid",
            SkipReason::DuplicateRemoved => "duplicate-removed",
            SkipReason::Collision => "collision",
            SkipReason::ConcurrentEdit => "concurrent-edit",
        };
        f.write_str(name)
    }
}

/// Result of processing one page file.
#[derive(Debug, PartialEq)]
pub enum ProcessOutcome {
    Translated {
        scenario: Scenario,
        languages: Vec<String>,
    },
    Unchanged,
    Skipped(SkipReason),
}

/// A failed translation attempt. Carries the scenario so retry records
/// know which strategy was being run.
#[derive(Debug, Error)]
#[error("translation of '{slug}' failed ({scenario} scenario): {source}")]
pub struct ProcessError {
    pub slug: String,
    pub scenario: Scenario,
    #[source]
    pub source: anyhow::Error,
}

pub struct PageProcessor {
    config: Config,
    provider: TranslationProvider,
    status: Arc<StatusReporter>,
    saves: Arc<SaveTracker>,
    http: reqwest::Client,
}

impl PageProcessor {
    pub fn new(
        config: Config,
        provider: TranslationProvider,
        status: Arc<StatusReporter>,
        saves: Arc<SaveTracker>,
    ) -> Self {
        Self {
            config,
            provider,
            status,
            saves,
            http: reqwest::Client::new(),
        }
    }

    /// Run one page through classification and the matching translation
    /// strategy. `force` always takes the full-translation path.
    pub async fn process_file(
        &self,
        path: &Path,
        force: bool,
    ) -> Result<ProcessOutcome, ProcessError> {
        let original = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot read {}, skipping: {}", path.display(), e);
                return Ok(ProcessOutcome::Skipped(SkipReason::Invalid));
            }
        };
        let mut page = match PageDocument::from_str(path, &original) {
            Ok(page) => page,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                return Ok(ProcessOutcome::Skipped(SkipReason::Invalid));
            }
        };
        if let Err(e) = page.validate() {
            warn!("Skipping {}: {:#}", path.display(), e);
            return Ok(ProcessOutcome::Skipped(SkipReason::Invalid));
        }
        let slug = match page.slug() {
            Some(slug) => slug.to_string(),
            None => return Ok(ProcessOutcome::Skipped(SkipReason::Invalid)),
        };

        let scenario = classify(&page);

        match self.reconcile_filename(&mut page, &slug) {
            Ok(None) => {}
            Ok(Some(skip)) => return Ok(ProcessOutcome::Skipped(skip)),
            Err(e) => {
                return Err(ProcessError {
                    slug,
                    scenario,
                    source: e,
                })
            }
        }
        let path = page.path().to_path_buf();

        if scenario == Scenario::Unchanged && !force {
            debug!("Page '{}' is up to date", slug);
            return Ok(ProcessOutcome::Unchanged);
        }

        info!(
            "Processing '{}' ({} scenario{})",
            slug,
            scenario,
            if force { ", forced full" } else { "" }
        );
        self.status.begin_page(&slug, scenario);

        let result = if force || scenario.is_full_translation() {
            self.full_translation(&mut page, &slug).await
        } else if scenario == Scenario::MissingLangs {
            self.backfill(&mut page, &slug).await
        } else {
            self.incremental(&mut page, &slug).await
        };
        self.status.end_page();

        match result {
            Ok(Some(languages)) => Ok(ProcessOutcome::Translated {
                scenario,
                languages,
            }),
            Ok(None) => Ok(ProcessOutcome::Skipped(SkipReason::ConcurrentEdit)),
            Err(e) => {
                // Put the file back exactly as found; the retry layer
                // decides what happens next.
                self.saves.mark(&path);
                if let Err(restore_err) = std::fs::write(&path, &original) {
                    warn!(
                        "Failed to restore {} after error: {}",
                        path.display(),
                        restore_err
                    );
                }
                Err(ProcessError {
                    slug,
                    scenario,
                    source: e,
                })
            }
        }
    }

    /// Keep filename and internal slug in agreement. A CMS slug edit
    /// renames the file; a CMS "duplicate page" action leaves a
    /// `<slug>-N.yml` copy that gets deleted once detected.
    fn reconcile_filename(
        &self,
        page: &mut PageDocument,
        slug: &str,
    ) -> Result<Option<SkipReason>> {
        let current = page.path().to_path_buf();
        let stem = current
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if stem == slug {
            return Ok(None);
        }

        let target = current.with_file_name(format!("{}.yml", slug));
        if target.exists() {
            if is_numeric_suffix_duplicate(stem, slug) {
                info!(
                    "Removing duplicate {} of slug '{}'",
                    current.display(),
                    slug
                );
                self.saves.mark(&current);
                std::fs::remove_file(&current)
                    .with_context(|| format!("Failed to remove {}", current.display()))?;
                return Ok(Some(SkipReason::DuplicateRemoved));
            }
            warn!(
                "File {} declares slug '{}' but {} already exists, skipping",
                current.display(),
                slug,
                target.display()
            );
            return Ok(Some(SkipReason::Collision));
        }

        info!("Renaming {} -> {}", current.display(), target.display());
        self.saves.mark(&current);
        self.saves.mark(&target);
        std::fs::rename(&current, &target)
            .with_context(|| format!("Failed to rename {}", current.display()))?;
        page.set_path(target);
        Ok(None)
    }

    /// Translate every enabled language from scratch.
    async fn full_translation(
        &self,
        page: &mut PageDocument,
        slug: &str,
    ) -> Result<Option<Vec<String>>> {
        let source = Language::from_code(page.source_lang())
            .with_context(|| format!("Page '{}' has an unusable source language", slug))?;

        // Hide the page from public readers while entries are in flux.
        if page.status() != Some(STATUS_TRANSLATING) {
            page.set_status(STATUS_TRANSLATING);
            self.saves.mark(page.path());
            page.save()?;
        }
        let baseline = mtime(page.path());

        let languages = Language::all_enabled();
        let total = languages.len();
        let content = page.content_data();
        let mut done = Vec::with_capacity(total);

        for (i, lang) in languages.iter().enumerate() {
            self.status
                .progress("translating", Some(lang.code()), (i, total), (0, 0));
            let (meta, page_content) = if *lang == source {
                (content["meta"].clone(), content["pageContent"].clone())
            } else {
                let meta = self
                    .provider
                    .translate_value(&content["meta"], source, *lang)
                    .await
                    .with_context(|| format!("Failed to translate '{}' meta to {}", slug, lang))?;
                let page_content = self
                    .provider
                    .translate_value(&content["pageContent"], source, *lang)
                    .await
                    .with_context(|| {
                        format!("Failed to translate '{}' content to {}", slug, lang)
                    })?;
                (meta, page_content)
            };
            page.set_translation(lang.code(), meta, page_content);
            done.push(lang.code().to_string());
        }

        page.set_status(STATUS_READY);
        page.set_hashes(
            slug,
            &content_hash(&content["meta"], &content["pageContent"]),
            &field_hashes(&content),
        );

        self.finish_save(page, slug, baseline, (total, total))
            .map(|saved| saved.then(|| {
                self.warm_cache(slug, &done);
                done
            }))
    }

    /// Translate only the languages lacking a complete entry; existing
    /// entries stay byte-identical.
    async fn backfill(&self, page: &mut PageDocument, slug: &str) -> Result<Option<Vec<String>>> {
        let source = Language::from_code(page.source_lang())
            .with_context(|| format!("Page '{}' has an unusable source language", slug))?;
        let baseline = mtime(page.path());
        let content = page.content_data();

        let missing: Vec<Language> = Language::all_enabled()
            .into_iter()
            .filter(|lang| !page.translation_complete(lang.code()))
            .collect();
        let total = missing.len();
        let mut done = Vec::with_capacity(total);

        for (i, lang) in missing.iter().enumerate() {
            self.status
                .progress("translating", Some(lang.code()), (i, total), (0, 0));
            let (meta, page_content) = if *lang == source {
                (content["meta"].clone(), content["pageContent"].clone())
            } else {
                let meta = self
                    .provider
                    .translate_value(&content["meta"], source, *lang)
                    .await
                    .with_context(|| format!("Failed to translate '{}' meta to {}", slug, lang))?;
                let page_content = self
                    .provider
                    .translate_value(&content["pageContent"], source, *lang)
                    .await
                    .with_context(|| {
                        format!("Failed to translate '{}' content to {}", slug, lang)
                    })?;
                (meta, page_content)
            };
            page.set_translation(lang.code(), meta, page_content);
            done.push(lang.code().to_string());
        }

        page.set_status(STATUS_READY);
        page.set_hashes(
            slug,
            &content_hash(&content["meta"], &content["pageContent"]),
            &field_hashes(&content),
        );

        self.finish_save(page, slug, baseline, (total, total))
            .map(|saved| saved.then(|| {
                self.warm_cache(slug, &done);
                done
            }))
    }

    /// Re-translate only what changed since the saved field hashes.
    ///
    /// Mutation is purely in-memory until the final save, so a failed
    /// incremental attempt leaves the disk untouched by construction.
    async fn incremental(
        &self,
        page: &mut PageDocument,
        slug: &str,
    ) -> Result<Option<Vec<String>>> {
        let source = Language::from_code(page.source_lang())
            .with_context(|| format!("Page '{}' has an unusable source language", slug))?;
        let baseline = mtime(page.path());
        let content = page.content_data();

        let saved = page.hashes().map(|h| h.fields).unwrap_or_default();
        let current = field_hashes(&content);

        // Deletions and array shrinkage both require a structural sync.
        let mut structural = false;
        for (path, old) in &saved {
            if is_length_marker(path) {
                match current.get(path) {
                    Some(new) => {
                        if let (Ok(new_len), Ok(old_len)) =
                            (new.parse::<u64>(), old.parse::<u64>())
                        {
                            if new_len < old_len {
                                structural = true;
                            }
                        }
                    }
                    None => structural = true,
                }
            } else if !current.contains_key(path) {
                structural = true;
            }
        }

        let mut verbatim = Vec::new();
        let mut translatable = Vec::new();
        for (path, hash) in &current {
            if is_length_marker(path) {
                continue;
            }
            if saved.get(path) == Some(hash) {
                continue;
            }
            let key = terminal_key(path).unwrap_or_default();
            if SKIP_KEYS.contains(&key.as_str()) {
                verbatim.push(path.clone());
            } else {
                translatable.push(path.clone());
            }
        }

        debug!(
            "Incremental diff for '{}': {} translatable, {} verbatim, structural={}",
            slug,
            translatable.len(),
            verbatim.len(),
            structural
        );

        if structural {
            self.status.progress("syncing", None, (0, 0), (0, 0));
            for lang in Language::all_enabled() {
                if let Some(entry) = page.translation_mut(lang.code()) {
                    sync_structure(&content, entry);
                }
            }
        }

        for path in &verbatim {
            let Some(value) = get_by_path(&content, path) else {
                continue;
            };
            let value = value.clone();
            for lang in Language::all_enabled() {
                if let Some(entry) = page.translation_mut(lang.code()) {
                    set_by_path(entry, path, value.clone())?;
                }
            }
        }

        let targets = Language::targets(source);
        let field_total = translatable.len();
        for (li, lang) in targets.iter().enumerate() {
            for (fi, path) in translatable.iter().enumerate() {
                self.status.progress(
                    "translating",
                    Some(lang.code()),
                    (li, targets.len()),
                    (fi, field_total),
                );
                let Some(value) = get_by_path(&content, path) else {
                    continue;
                };
                let translated = self
                    .provider
                    .translate_value(value, source, *lang)
                    .await
                    .with_context(|| {
                        format!("Failed to translate '{}' field {} to {}", slug, path, lang)
                    })?;
                if let Some(entry) = page.translation_mut(lang.code()) {
                    set_by_path(entry, path, translated)?;
                }
            }
        }

        // The source entry always mirrors the authored content exactly.
        page.set_translation(
            source.code(),
            content["meta"].clone(),
            content["pageContent"].clone(),
        );

        page.set_status(STATUS_READY);
        page.set_hashes(
            slug,
            &content_hash(&content["meta"], &content["pageContent"]),
            &current,
        );

        let languages: Vec<String> = Language::all_enabled()
            .iter()
            .map(|l| l.code().to_string())
            .collect();
        self.finish_save(page, slug, baseline, (targets.len(), targets.len()))
            .map(|saved| saved.then(|| {
                self.warm_cache(slug, &languages);
                languages
            }))
    }

    /// Save unless the author edited the file while we were translating.
    /// Returns `Ok(false)` on a concurrent edit.
    fn finish_save(
        &self,
        page: &PageDocument,
        slug: &str,
        baseline: Option<SystemTime>,
        languages: (usize, usize),
    ) -> Result<bool> {
        if mtime(page.path()) != baseline {
            warn!(
                "Page '{}' was edited during translation, discarding the result",
                slug
            );
            return Ok(false);
        }
        self.status.progress("saving", None, languages, (0, 0));
        self.saves.mark(page.path());
        page.save()?;
        info!("Saved '{}'", slug);
        Ok(true)
    }

    /// Best-effort cache warming of the localized pages after a save.
    fn warm_cache(&self, slug: &str, languages: &[String]) {
        let Some(base) = self.config.site_base_url.clone() else {
            return;
        };
        let client = self.http.clone();
        let slug = slug.to_string();
        let languages = languages.to_vec();
        tokio::spawn(async move {
            for lang in languages {
                let url = format!("{}/{}/{}", base.trim_end_matches('/'), lang, slug);
                match client.get(&url).send().await {
                    Ok(response) => debug!("Cache warm {} -> {}", url, response.status()),
                    Err(e) => debug!("Cache warm {} failed: {}", url, e),
                }
            }
        });
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

fn is_numeric_suffix_duplicate(stem: &str, slug: &str) -> bool {
    stem.strip_prefix(slug)
        .and_then(|rest| rest.strip_prefix('-'))
        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}
