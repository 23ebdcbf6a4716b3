//! Remote translation provider client.
//!
//! Wraps the provider's two RPCs: a text-batch translate endpoint and a
//! quota usage endpoint. The client is deliberately policy-free: it never
//! retries and surfaces every non-success as a typed `TranslationError` —
//! retry/backoff decisions belong to the processor and retry layers.

use crate::i18n::Language;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Keys whose values are machine-facing identifiers or media references
/// and must be copied verbatim across languages, never translated.
pub const SKIP_KEYS: &[&str] = &[
    "slug", "image", "ogImage", "src", "url", "href", "icon", "platform",
];

/// Marker tag the provider is told to leave untouched. Placeholders like
/// `{count}` are wrapped in it before the call and unwrapped after.
const KEEP_TAG: &str = "keep";

/// HTTP status DeepL-compatible providers use for quota exhaustion.
const STATUS_QUOTA_EXCEEDED: u16 = 456;

/// Typed translation failure.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation API rate limit hit (429)")]
    RateLimited,

    #[error("Translation quota exhausted: {body}")]
    QuotaExceeded { body: String },

    #[error("Translation API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Translation API returned no translations")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: Vec<&'a str>,
    source_lang: &'a str,
    target_lang: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_handling: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ignore_tags: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
}

/// Quota usage as reported by the provider.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UsageInfo {
    pub character_count: u64,
    pub character_limit: u64,
}

/// Client for the remote translation service.
#[derive(Debug, Clone)]
pub struct TranslationProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    request_delay: Duration,
}

impl TranslationProvider {
    pub fn new(api_url: &str, api_key: &str, request_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            request_delay,
        }
    }

    /// Translate one string.
    ///
    /// Returns the input unchanged when source and target match, when the
    /// text is blank, or when it looks like a path or URL — those are
    /// never sent to the remote service. `{placeholder}` tokens survive
    /// translation via inert marker tags.
    pub async fn translate_text(
        &self,
        text: &str,
        from: Language,
        to: Language,
    ) -> Result<String, TranslationError> {
        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }
        if text.starts_with('/') || text.starts_with("http") {
            return Ok(text.to_string());
        }

        let protected = protect_placeholders(text);
        let uses_tags = protected != text;

        // Fixed pacing between remote calls; the provider rate-limits
        // aggressively and the pipeline is serial anyway.
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let request = TranslateRequest {
            text: vec![protected.as_str()],
            source_lang: from.provider_code(),
            target_lang: to.provider_code(),
            tag_handling: uses_tags.then_some("xml"),
            ignore_tags: if uses_tags { vec![KEEP_TAG] } else { vec![] },
        };

        let response = self
            .client
            .post(format!("{}/v2/translate", self.api_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            if status.as_u16() == 429 {
                return Err(TranslationError::RateLimited);
            }
            if status.as_u16() == STATUS_QUOTA_EXCEEDED {
                warn!("Translation quota exhausted: {}", body);
                if let Some(usage) = self.usage().await {
                    warn!(
                        "Quota usage: {}/{} characters",
                        usage.character_count, usage.character_limit
                    );
                }
                return Err(TranslationError::QuotaExceeded { body });
            }
            return Err(TranslationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranslateResponse = response.json().await?;
        let translated = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or(TranslationError::EmptyResponse)?;

        Ok(restore_placeholders(&translated))
    }

    /// Recursively translate an arbitrary nested value.
    ///
    /// Strings go through `translate_text`; arrays element-wise in order;
    /// object values likewise, except skip-listed keys which are copied
    /// verbatim without recursing. Scalars pass through.
    pub fn translate_value<'a>(
        &'a self,
        value: &'a Value,
        from: Language,
        to: Language,
    ) -> BoxFuture<'a, Result<Value, TranslationError>> {
        async move {
            match value {
                Value::String(s) => {
                    let translated = self.translate_text(s, from, to).await?;
                    Ok(Value::String(translated))
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.translate_value(item, from, to).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, v) in map {
                        if SKIP_KEYS.contains(&key.as_str()) {
                            out.insert(key.clone(), v.clone());
                        } else {
                            out.insert(key.clone(), self.translate_value(v, from, to).await?);
                        }
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    /// Quota introspection. Failure is non-fatal: logs a warning and
    /// returns `None` — this endpoint only feeds operator diagnostics.
    pub async fn usage(&self) -> Option<UsageInfo> {
        let result = self
            .client
            .get(format!("{}/v2/usage", self.api_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<UsageInfo>().await {
                    Ok(usage) => Some(usage),
                    Err(e) => {
                        warn!("Failed to parse usage response: {}", e);
                        None
                    }
                }
            }
            Ok(response) => {
                warn!("Usage endpoint returned {}", response.status());
                None
            }
            Err(e) => {
                warn!("Usage request failed: {}", e);
                None
            }
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("static regex"))
}

fn keep_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<keep>\s*([A-Za-z0-9_]+)\s*</keep>").expect("static regex"))
}

/// Swap `{name}` placeholders for inert `<keep>name</keep>` markers the
/// provider is told not to translate.
fn protect_placeholders(text: &str) -> String {
    placeholder_re()
        .replace_all(text, format!("<{0}>$1</{0}>", KEEP_TAG).as_str())
        .into_owned()
}

/// Swap the inert markers back to `{name}` placeholder syntax.
fn restore_placeholders(text: &str) -> String {
    keep_tag_re().replace_all(text, "{$1}").into_owned()
}
