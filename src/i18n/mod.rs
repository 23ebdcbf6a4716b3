//! Internationalization (i18n) module.
//!
//! Central registry of the languages the site publishes in, plus the
//! validated `Language` type used throughout the pipeline.
//!
//! - `registry`: single source of truth for supported languages and their
//!   metadata, including the translation provider's regional codes
//! - `language`: type-safe `Language` validated against the registry

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};
