//! Automatic translation pipeline for YAML page content.
//!
//! Watches a directory of page documents, classifies each change into a
//! lifecycle scenario (new, duplicated, corrupted, missing languages,
//! unchanged, incremental) and keeps a `translations` block per enabled
//! language up to date through a remote translation provider. Work flows
//! through a durable FIFO queue with bounded fixed-delay retries, and a
//! throttled status file feeds the admin dashboard.

pub mod config;
pub mod hash;
pub mod i18n;
pub mod page;
pub mod paths;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod scenario;
pub mod status;
pub mod watch;
