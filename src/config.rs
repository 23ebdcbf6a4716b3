use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // Content
    pub content_dir: PathBuf,
    pub state_dir: PathBuf,

    // Translation provider
    pub translate_api_url: String,
    pub translate_api_key: String,

    // Optional site base URL for post-translation cache warming
    pub site_base_url: Option<String>,

    // Retry policy
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,

    // Pacing
    pub request_delay_ms: u64,
    pub debounce_ms: u64,
    pub save_suppress_ms: u64,
    pub error_retention_secs: u64,
    pub status_throttle_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            content_dir: std::env::var("CONTENT_DIR")
                .unwrap_or_else(|_| "content/pages".to_string())
                .into(),
            state_dir: std::env::var("STATE_DIR")
                .unwrap_or_else(|_| "public/admin".to_string())
                .into(),

            translate_api_url: std::env::var("TRANSLATE_API_URL")
                .unwrap_or_else(|_| "https://api-free.deepl.com".to_string()),
            translate_api_key: std::env::var("TRANSLATE_API_KEY")
                .context("TRANSLATE_API_KEY not set")?,

            site_base_url: std::env::var("SITE_BASE_URL").ok(),

            max_retry_attempts: env_or("MAX_RETRY_ATTEMPTS", 3),
            retry_delay_secs: env_or("RETRY_DELAY_SECS", 300),

            request_delay_ms: env_or("REQUEST_DELAY_MS", 150),
            debounce_ms: env_or("DEBOUNCE_MS", 2000),
            save_suppress_ms: env_or("SAVE_SUPPRESS_MS", 5000),
            error_retention_secs: env_or("ERROR_RETENTION_SECS", 300),
            status_throttle_ms: env_or("STATUS_THROTTLE_MS", 500),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", 60),
        })
    }

    pub fn queue_file(&self) -> PathBuf {
        self.state_dir.join("queue.json")
    }

    pub fn retry_file(&self) -> PathBuf {
        self.state_dir.join("retry.json")
    }

    pub fn failed_file(&self) -> PathBuf {
        self.state_dir.join("failed.json")
    }

    pub fn status_file(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    /// Path of the page file for a slug.
    pub fn page_file(&self, slug: &str) -> PathBuf {
        self.content_dir.join(format!("{}.yml", slug))
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
