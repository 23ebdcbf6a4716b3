//! Lifecycle scenario classification.
//!
//! Each classification is independent: given the page's current hashes and
//! translations it names exactly one of six terminal scenarios, which
//! decides the translation strategy. Duplicated/corrupted checks dominate,
//! so a broken page is never treated as merely missing languages.

use crate::hash::content_hash;
use crate::i18n::Language;
use crate::page::{PageDocument, STATUS_TRANSLATING};
use serde::{Deserialize, Serialize};

/// The classified lifecycle state of a page document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// No hash snapshot and no translations: first-ever translation.
    New,
    /// Hash snapshot exists but records a different slug: the file is a
    /// copy-pasted duplicate and needs a full re-translation.
    Duplicated,
    /// A language entry is structurally broken, or a `translating` flag
    /// survived a crash. Full re-translation repairs it.
    Corrupted,
    /// Existing entries are intact but at least one configured language
    /// has no translation at all.
    MissingLangs,
    /// Full coverage and the content hash matches the snapshot.
    Unchanged,
    /// Full coverage but the content changed: field-level diffing needed.
    Incremental,
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scenario::New => "new",
            Scenario::Duplicated => "duplicated",
            Scenario::Corrupted => "corrupted",
            Scenario::MissingLangs => "missing-langs",
            Scenario::Unchanged => "unchanged",
            Scenario::Incremental => "incremental",
        };
        f.write_str(name)
    }
}

impl Scenario {
    /// Whether this scenario takes the full-translation path.
    pub fn is_full_translation(&self) -> bool {
        matches!(
            self,
            Scenario::New | Scenario::Duplicated | Scenario::Corrupted
        )
    }
}

/// Classify a page's current state. Total: every valid document maps to
/// exactly one scenario.
pub fn classify(page: &PageDocument) -> Scenario {
    let hashes = page.hashes();
    let has_translations = page
        .translations()
        .map(|map| !map.is_empty())
        .unwrap_or(false);

    if hashes.is_none() && !has_translations {
        return Scenario::New;
    }

    if let Some(snapshot) = &hashes {
        if let (Some(recorded), Some(current)) = (snapshot.slug.as_deref(), page.slug()) {
            if recorded != current {
                return Scenario::Duplicated;
            }
        }
    }

    // A translating flag left on disk means a prior run was interrupted
    // mid-pipeline; the entries cannot be trusted.
    if page.status() == Some(STATUS_TRANSLATING) {
        return Scenario::Corrupted;
    }

    let mut missing_lang = false;
    for lang in Language::all_enabled() {
        match page.translation(lang.code()) {
            None => missing_lang = true,
            Some(_) => {
                if !page.translation_complete(lang.code()) {
                    return Scenario::Corrupted;
                }
            }
        }
    }
    if missing_lang {
        return Scenario::MissingLangs;
    }

    let current = content_hash(
        page.meta().unwrap_or(&serde_json::Value::Null),
        page.page_content().unwrap_or(&serde_json::Value::Null),
    );
    match hashes.and_then(|snapshot| snapshot.content) {
        Some(saved) if saved == current => Scenario::Unchanged,
        _ => Scenario::Incremental,
    }
}
