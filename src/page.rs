//! Page document: one YAML file per content slug.
//!
//! The document is the single source of truth for a page: authored
//! source-language content, the `translations` map, the `_hashes`
//! bookkeeping block and the transient `_status` flag. It is loaded into a
//! generic `serde_json::Value` (the incremental differ needs dynamic field
//! access), but the translatable schema is validated once on load through
//! typed structs — pages that fail validation are skipped, never
//! half-processed.

use crate::i18n::LanguageRegistry;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// `_status` value while the pipeline is translating a page. Public
/// readers (renderer, sitemap, link listings) must skip such pages.
pub const STATUS_TRANSLATING: &str = "translating";

/// `_status` value once translation finished.
pub const STATUS_READY: &str = "ready";

/// The persisted hash bookkeeping block (`_hashes`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSnapshot {
    /// Slug recorded at last save; a mismatch with the document's own slug
    /// signals a copy-pasted duplicate file.
    pub slug: Option<String>,
    /// Whole-document content hash.
    pub content: Option<String>,
    /// Per-field hash map over the flattened source fields.
    pub fields: BTreeMap<String, String>,
}

// Typed view of the translatable schema, used only for validation.
// Unknown keys are tolerated; the generic Value remains the working copy.

#[derive(Debug, Deserialize)]
struct MetaSchema {
    title: String,
    description: String,
    #[serde(default)]
    #[allow(dead_code)]
    keywords: Option<String>,
    #[serde(default, rename = "ogImage")]
    #[allow(dead_code)]
    og_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HowToStepSchema {
    #[allow(dead_code)]
    title: String,
    #[allow(dead_code)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct HowToSchema {
    #[allow(dead_code)]
    title: String,
    steps: Vec<HowToStepSchema>,
}

#[derive(Debug, Deserialize)]
struct FeatureItemSchema {
    #[allow(dead_code)]
    title: String,
    #[allow(dead_code)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct FeaturesSchema {
    #[allow(dead_code)]
    title: String,
    items: Vec<FeatureItemSchema>,
}

#[derive(Debug, Deserialize)]
struct FaqEntrySchema {
    #[allow(dead_code)]
    question: String,
    #[allow(dead_code)]
    answer: String,
}

#[derive(Debug, Deserialize)]
struct PageContentSchema {
    #[serde(rename = "mainTitle")]
    main_title: String,
    #[serde(default)]
    how_to: Option<HowToSchema>,
    #[serde(default)]
    features: Option<FeaturesSchema>,
    #[serde(default)]
    #[allow(dead_code)]
    faq: Option<Vec<FaqEntrySchema>>,
}

/// A loaded page document plus the path it came from.
#[derive(Debug, Clone)]
pub struct PageDocument {
    path: PathBuf,
    doc: Value,
}

impl PageDocument {
    /// Load and parse a page file. Parsing failures and non-mapping roots
    /// are errors; schema validation is separate (`validate`).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read page file {}", path.display()))?;
        Self::from_str(path, &text)
    }

    /// Parse a page document from already-read text.
    pub fn from_str(path: &Path, text: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(text)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?;
        if !doc.is_object() {
            bail!("Page file {} is not a mapping", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    /// Construct from an in-memory value (tests and snapshots).
    pub fn from_value(path: &Path, doc: Value) -> Self {
        Self {
            path: path.to_path_buf(),
            doc,
        }
    }

    /// Serialize the document back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.doc).context("Failed to serialize page document")
    }

    /// Persist the document to its file.
    pub fn save(&self) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(&self.path, yaml)
            .with_context(|| format!("Failed to write page file {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-point the document at a new file (after a slug rename).
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn as_value(&self) -> &Value {
        &self.doc
    }

    pub fn slug(&self) -> Option<&str> {
        self.doc.get("slug").and_then(Value::as_str)
    }

    /// The language all source fields are authored in. Defaults to "en"
    /// like the content schema does.
    pub fn source_lang(&self) -> &str {
        self.doc
            .get("source_lang")
            .and_then(Value::as_str)
            .unwrap_or("en")
    }

    pub fn meta(&self) -> Option<&Value> {
        self.doc.get("meta")
    }

    pub fn page_content(&self) -> Option<&Value> {
        self.doc.get("pageContent")
    }

    /// The translatable source document: `{meta, pageContent}`.
    pub fn content_data(&self) -> Value {
        serde_json::json!({
            "meta": self.meta().cloned().unwrap_or(Value::Null),
            "pageContent": self.page_content().cloned().unwrap_or(Value::Null),
        })
    }

    pub fn translations(&self) -> Option<&serde_json::Map<String, Value>> {
        self.doc.get("translations").and_then(Value::as_object)
    }

    pub fn translation(&self, lang: &str) -> Option<&Value> {
        self.translations().and_then(|map| map.get(lang))
    }

    pub fn translation_mut(&mut self, lang: &str) -> Option<&mut Value> {
        self.doc
            .get_mut("translations")
            .and_then(Value::as_object_mut)
            .and_then(|map| map.get_mut(lang))
    }

    /// Install a complete `{meta, pageContent}` entry for a language.
    pub fn set_translation(&mut self, lang: &str, meta: Value, page_content: Value) {
        let translations = self
            .doc
            .as_object_mut()
            .expect("document root is a mapping")
            .entry("translations".to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !translations.is_object() {
            *translations = Value::Object(serde_json::Map::new());
        }
        translations.as_object_mut().expect("just ensured object").insert(
            lang.to_string(),
            serde_json::json!({ "meta": meta, "pageContent": page_content }),
        );
    }

    /// Whether a language has a complete translation entry: `meta` and
    /// `pageContent` present with non-empty `title` / `mainTitle` leaves.
    pub fn translation_complete(&self, lang: &str) -> bool {
        let Some(entry) = self.translation(lang) else {
            return false;
        };
        let title = entry
            .get("meta")
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str);
        let main_title = entry
            .get("pageContent")
            .and_then(|c| c.get("mainTitle"))
            .and_then(Value::as_str);
        matches!((title, main_title), (Some(t), Some(m)) if !t.is_empty() && !m.is_empty())
    }

    pub fn status(&self) -> Option<&str> {
        self.doc.get("_status").and_then(Value::as_str)
    }

    pub fn set_status(&mut self, status: &str) {
        self.doc
            .as_object_mut()
            .expect("document root is a mapping")
            .insert("_status".to_string(), Value::from(status));
    }

    /// The persisted `_hashes` block, if any.
    pub fn hashes(&self) -> Option<HashSnapshot> {
        let block = self.doc.get("_hashes")?.as_object()?;
        let mut fields = BTreeMap::new();
        if let Some(map) = block.get("fields").and_then(Value::as_object) {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    fields.insert(k.clone(), s.to_string());
                }
            }
        }
        Some(HashSnapshot {
            slug: block.get("_slug").and_then(Value::as_str).map(String::from),
            content: block
                .get("content")
                .and_then(Value::as_str)
                .map(String::from),
            fields,
        })
    }

    /// Overwrite the `_hashes` block with a fresh snapshot.
    pub fn set_hashes(&mut self, slug: &str, content: &str, fields: &BTreeMap<String, String>) {
        let fields_map: serde_json::Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        self.doc.as_object_mut().expect("document root is a mapping").insert(
            "_hashes".to_string(),
            serde_json::json!({
                "_slug": slug,
                "content": content,
                "fields": fields_map,
            }),
        );
    }

    /// Validate the translatable schema once, on load.
    ///
    /// Required: a non-empty `slug`, an enabled `source_lang`, `meta` with
    /// title/description, `pageContent` with a mainTitle; `how_to`/
    /// `features`, when present, must carry their required leaves. Unknown
    /// keys pass through.
    pub fn validate(&self) -> Result<()> {
        let slug = self.slug().unwrap_or("");
        if slug.is_empty() {
            bail!("Page {} has no slug", self.path.display());
        }

        // A bad source language is a document defect, not a transient
        // failure; it must never reach the retry loop.
        let source_lang = self.source_lang();
        if !LanguageRegistry::get().is_enabled(source_lang) {
            bail!(
                "Page '{}' has unknown or disabled source_lang '{}'",
                slug,
                source_lang
            );
        }

        let meta = self
            .meta()
            .with_context(|| format!("Page '{}' has no meta block", slug))?;
        let meta_schema: MetaSchema = serde_json::from_value(meta.clone())
            .with_context(|| format!("Page '{}' has an invalid meta block", slug))?;
        if meta_schema.title.is_empty() || meta_schema.description.is_empty() {
            bail!("Page '{}' meta.title/meta.description must be non-empty", slug);
        }

        let content = self
            .page_content()
            .with_context(|| format!("Page '{}' has no pageContent block", slug))?;
        let content_schema: PageContentSchema = serde_json::from_value(content.clone())
            .with_context(|| format!("Page '{}' has an invalid pageContent block", slug))?;
        if content_schema.main_title.is_empty() {
            bail!("Page '{}' pageContent.mainTitle must be non-empty", slug);
        }
        if let Some(how_to) = &content_schema.how_to {
            if how_to.steps.is_empty() {
                bail!("Page '{}' how_to.steps must not be empty", slug);
            }
        }
        if let Some(features) = &content_schema.features {
            if features.items.is_empty() {
                bail!("Page '{}' features.items must not be empty", slug);
            }
        }

        Ok(())
    }
}
