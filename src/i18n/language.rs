//! Validated language type.
//!
//! A `Language` can only be constructed for a code present in the
//! registry, so downstream code never has to re-validate strings.

use crate::i18n::{LanguageConfig, LanguageRegistry};
use anyhow::{bail, Result};

/// A validated language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    code: &'static str,
}

impl Language {
    /// Create a Language from a language code string.
    ///
    /// Fails for unknown codes and for languages that exist in the
    /// registry but are not enabled.
    pub fn from_code(code: &str) -> Result<Language> {
        let registry = LanguageRegistry::get();

        match registry.get_by_code(code) {
            Some(config) if config.enabled => Ok(Language { code: config.code }),
            Some(_) => bail!("Language '{}' is not enabled", code),
            None => bail!("Unknown language code: '{}'", code),
        }
    }

    /// The canonical (source) language, from which translations derive.
    pub fn canonical() -> Language {
        let config = LanguageRegistry::get().canonical();
        Language { code: config.code }
    }

    /// All enabled languages, in publication order.
    pub fn all_enabled() -> Vec<Language> {
        LanguageRegistry::get()
            .list_enabled()
            .iter()
            .map(|config| Language { code: config.code })
            .collect()
    }

    /// Enabled translation targets: every enabled language except `source`.
    pub fn targets(source: Language) -> Vec<Language> {
        Self::all_enabled()
            .into_iter()
            .filter(|lang| *lang != source)
            .collect()
    }

    /// ISO 639-1 code ("en", "de", ...).
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Full registry configuration for this language.
    pub fn config(&self) -> &'static LanguageConfig {
        LanguageRegistry::get()
            .get_by_code(self.code)
            .expect("Language code should always be valid")
    }

    /// The remote provider's code for this language ("EN", "PT-PT", ...).
    pub fn provider_code(&self) -> &'static str {
        self.config().provider_code
    }

    /// English name of the language.
    pub fn name(&self) -> &'static str {
        self.config().name
    }

    /// Whether this is the canonical source language.
    pub fn is_canonical(&self) -> bool {
        self.config().is_canonical
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code)
    }
}
