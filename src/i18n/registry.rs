//! Language registry: single source of truth for all supported languages.
//!
//! Uses a singleton with `OnceLock` for thread-safe lazy initialization.
//! The set of enabled languages defines full translation coverage: a page
//! is only fully translated when every enabled language has an entry.

use std::sync::OnceLock;

/// Configuration for a supported language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code used in page documents (e.g., "en", "de")
    pub code: &'static str,

    /// Full ISO tag for HTML/SEO surfaces (e.g., "en-US")
    pub iso: &'static str,

    /// English name of the language
    pub name: &'static str,

    /// Native name of the language
    pub native_name: &'static str,

    /// The remote translation provider's code for this language. Some
    /// generic codes must map to a regional variant (e.g. "pt" -> "PT-PT").
    pub provider_code: &'static str,

    /// Whether this is the canonical/source language (exactly one is true)
    pub is_canonical: bool,

    /// Whether this language is enabled for publication
    pub enabled: bool,
}

/// Global language registry singleton.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the global registry instance, initializing it on first access.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Look up a language configuration by code.
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    /// All enabled languages, in publication order.
    pub fn list_enabled(&self) -> Vec<&LanguageConfig> {
        self.languages.iter().filter(|lang| lang.enabled).collect()
    }

    /// Codes of all enabled languages, in publication order.
    pub fn enabled_codes(&self) -> Vec<&'static str> {
        self.languages
            .iter()
            .filter(|lang| lang.enabled)
            .map(|lang| lang.code)
            .collect()
    }

    /// The canonical (source) language configuration.
    ///
    /// # Panics
    /// Panics if zero or multiple canonical languages are configured —
    /// that is a registry definition error, not a runtime condition.
    pub fn canonical(&self) -> &LanguageConfig {
        let canonical: Vec<_> = self
            .languages
            .iter()
            .filter(|lang| lang.is_canonical)
            .collect();

        match canonical.len() {
            0 => panic!("No canonical language found in registry"),
            1 => canonical[0],
            _ => panic!("Multiple canonical languages found in registry"),
        }
    }

    /// Whether a code names a supported, enabled language.
    pub fn is_enabled(&self, code: &str) -> bool {
        self.get_by_code(code)
            .map(|lang| lang.enabled)
            .unwrap_or(false)
    }
}

/// The languages the site publishes in. The disabled entries are staged
/// for future rollout and document their provider mappings up front.
fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            code: "en",
            iso: "en-US",
            name: "English",
            native_name: "English",
            provider_code: "EN",
            is_canonical: true,
            enabled: true,
        },
        LanguageConfig {
            code: "ru",
            iso: "ru-RU",
            name: "Russian",
            native_name: "Русский",
            provider_code: "RU",
            is_canonical: false,
            enabled: true,
        },
        LanguageConfig {
            code: "de",
            iso: "de-DE",
            name: "German",
            native_name: "Deutsch",
            provider_code: "DE",
            is_canonical: false,
            enabled: true,
        },
        LanguageConfig {
            code: "es",
            iso: "es-ES",
            name: "Spanish",
            native_name: "Español",
            provider_code: "ES",
            is_canonical: false,
            enabled: false,
        },
        LanguageConfig {
            code: "pt",
            iso: "pt-PT",
            name: "Portuguese",
            native_name: "Português",
            provider_code: "PT-PT",
            is_canonical: false,
            enabled: false,
        },
    ]
}
