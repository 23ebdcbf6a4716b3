//! End-to-end pipeline tests: real files in a temp content directory, a
//! wiremock translation provider, and the full queue/processor/retry
//! stack wired together the way the binary wires it.

use auto_translate::config::Config;
use auto_translate::hash::{content_hash, field_hashes};
use auto_translate::page::PageDocument;
use auto_translate::processor::{PageProcessor, ProcessOutcome};
use auto_translate::provider::TranslationProvider;
use auto_translate::queue::QueueManager;
use auto_translate::retry::RetryScheduler;
use auto_translate::scenario::{classify, Scenario};
use auto_translate::status::StatusReporter;
use auto_translate::watch::SaveTracker;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Pipeline {
    _dir: TempDir,
    content_dir: PathBuf,
    state_dir: PathBuf,
    processor: Arc<PageProcessor>,
    queue: QueueManager,
    retry: Arc<RetryScheduler>,
}

fn pipeline(api_url: &str) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let content_dir = dir.path().join("pages");
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(&content_dir).unwrap();

    let config = Config {
        content_dir: content_dir.clone(),
        state_dir: state_dir.clone(),
        translate_api_url: api_url.to_string(),
        translate_api_key: "test-key".to_string(),
        site_base_url: None,
        max_retry_attempts: 3,
        retry_delay_secs: 300,
        request_delay_ms: 0,
        debounce_ms: 50,
        save_suppress_ms: 100,
        error_retention_secs: 300,
        status_throttle_ms: 0,
        sweep_interval_secs: 60,
    };
    let provider = TranslationProvider::new(api_url, "test-key", Duration::ZERO);
    let status = Arc::new(StatusReporter::new(config.status_file(), 0));
    let saves = Arc::new(SaveTracker::new(100));
    let retry = Arc::new(RetryScheduler::new(
        config.retry_file(),
        config.failed_file(),
        config.max_retry_attempts,
        config.retry_delay_secs,
    ));
    let processor = Arc::new(PageProcessor::new(
        config.clone(),
        provider,
        status.clone(),
        saves,
    ));
    let queue = QueueManager::new(&config, processor.clone(), retry.clone(), status);
    Pipeline {
        _dir: dir,
        content_dir,
        state_dir,
        processor,
        queue,
        retry,
    }
}

fn source_value(slug: &str) -> Value {
    json!({
        "slug": slug,
        "source_lang": "en",
        "meta": {
            "title": "PDF to Word",
            "description": "Convert PDFs online",
            "ogImage": "og.png"
        },
        "pageContent": {
            "mainTitle": "Convert PDF to Word",
            "faq": [
                { "question": "Is it free?", "answer": "Yes." },
                { "question": "Is it safe?", "answer": "Also yes." }
            ]
        }
    })
}

/// A page as it looks after a successful full pass: complete entries for
/// en/ru/de plus a matching `_hashes` snapshot.
fn translated_value(slug: &str) -> Value {
    let mut value = source_value(slug);
    let content = json!({
        "meta": value["meta"].clone(),
        "pageContent": value["pageContent"].clone(),
    });
    let mut translations = serde_json::Map::new();
    translations.insert("en".into(), content.clone());
    for lang in ["ru", "de"] {
        translations.insert(
            lang.into(),
            json!({
                "meta": {
                    "title": format!("{}-title", lang),
                    "description": format!("{}-desc", lang),
                    "ogImage": "og.png"
                },
                "pageContent": {
                    "mainTitle": format!("{}-main", lang),
                    "faq": [
                        { "question": format!("{}-q1", lang), "answer": format!("{}-a1", lang) },
                        { "question": format!("{}-q2", lang), "answer": format!("{}-a2", lang) }
                    ]
                }
            }),
        );
    }
    value["translations"] = Value::Object(translations);

    let fields: serde_json::Map<String, Value> = field_hashes(&content)
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    value["_hashes"] = json!({
        "_slug": slug,
        "content": content_hash(&content["meta"], &content["pageContent"]),
        "fields": fields,
    });
    value["_status"] = json!("ready");
    value
}

fn write_page(p: &Pipeline, slug: &str, value: &Value) -> PathBuf {
    let path = p.content_dir.join(format!("{}.yml", slug));
    std::fs::write(&path, serde_yaml::to_string(value).unwrap()).unwrap();
    path
}

fn load(path: &std::path::Path) -> Value {
    serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn status_json(p: &Pipeline) -> Value {
    serde_json::from_str(&std::fs::read_to_string(p.state_dir.join("status.json")).unwrap())
        .unwrap()
}

async fn mock_translate(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": reply }]
        })))
        .mount(server)
        .await;
}

// ==================== Scenario 1: New Page ====================

#[tokio::test]
async fn test_new_page_translated_to_all_languages() {
    let server = MockServer::start().await;
    mock_translate(&server, "T").await;
    let p = pipeline(&server.uri());

    let file = write_page(&p, "pdf-to-word", &source_value("pdf-to-word"));
    p.queue.enqueue(&file, false);
    p.queue.run().await;

    let saved = load(&file);
    assert_eq!(saved["_status"], "ready");
    for lang in ["en", "ru", "de"] {
        assert!(
            saved["translations"][lang].is_object(),
            "missing {} entry",
            lang
        );
    }
    // Source entry is verbatim, targets translated
    assert_eq!(saved["translations"]["en"]["meta"]["title"], "PDF to Word");
    assert_eq!(saved["translations"]["de"]["meta"]["title"], "T");
    // Skip-listed keys never translated, even on the full path
    assert_eq!(saved["translations"]["ru"]["meta"]["ogImage"], "og.png");
    assert_eq!(saved["_hashes"]["_slug"], "pdf-to-word");

    // Queue drained, dashboard idle
    assert!(p.queue.items().is_empty());
    assert_eq!(status_json(&p)["status"], "idle");
}

// ==================== Scenario 2: One-Field Incremental ====================

#[tokio::test]
async fn test_single_field_edit_translates_only_that_field() {
    let server = MockServer::start().await;
    // One changed field, two target languages: exactly two calls
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": "NEW" }]
        })))
        .expect(2)
        .mount(&server)
        .await;
    let p = pipeline(&server.uri());

    let mut value = translated_value("pdf-to-word");
    value["meta"]["title"] = json!("PDF to Word, Faster");
    let file = write_page(&p, "pdf-to-word", &value);

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    let saved = load(&file);
    assert_eq!(saved["translations"]["ru"]["meta"]["title"], "NEW");
    assert_eq!(saved["translations"]["de"]["meta"]["title"], "NEW");
    // Everything else keeps its existing translation
    assert_eq!(saved["translations"]["de"]["meta"]["description"], "de-desc");
    assert_eq!(
        saved["translations"]["ru"]["pageContent"]["faq"][0]["question"],
        "ru-q1"
    );
}

// ==================== Scenario 3: Skip-Listed Field Sync ====================

#[tokio::test]
async fn test_skip_listed_change_syncs_without_provider_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": "X" }]
        })))
        .expect(0)
        .mount(&server)
        .await;
    let p = pipeline(&server.uri());

    let mut value = translated_value("pdf-to-word");
    value["meta"]["ogImage"] = json!("og-v2.png");
    let file = write_page(&p, "pdf-to-word", &value);

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    let saved = load(&file);
    for lang in ["en", "ru", "de"] {
        assert_eq!(saved["translations"][lang]["meta"]["ogImage"], "og-v2.png");
    }
    assert_eq!(saved["translations"]["de"]["meta"]["title"], "de-title");
}

// ==================== Scenario 4: Array Shrinkage ====================

#[tokio::test]
async fn test_array_shrinkage_trims_every_language() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": "X" }]
        })))
        .expect(0)
        .mount(&server)
        .await;
    let p = pipeline(&server.uri());

    let mut value = translated_value("pdf-to-word");
    value["pageContent"]["faq"].as_array_mut().unwrap().pop();
    let file = write_page(&p, "pdf-to-word", &value);

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    let saved = load(&file);
    for lang in ["en", "ru", "de"] {
        assert_eq!(
            saved["translations"][lang]["pageContent"]["faq"]
                .as_array()
                .unwrap()
                .len(),
            1,
            "{} faq not trimmed",
            lang
        );
    }
    // Surviving entries keep their translations
    assert_eq!(
        saved["translations"]["de"]["pageContent"]["faq"][0]["answer"],
        "de-a1"
    );
}

// ==================== Scenario 5: Mid-Batch Failure ====================

#[tokio::test]
async fn test_provider_failure_rolls_back_and_schedules_retry() {
    let server = MockServer::start().await;
    // First call succeeds, everything after fails mid-batch
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": "T" }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let p = pipeline(&server.uri());

    let file = write_page(&p, "pdf-to-word", &source_value("pdf-to-word"));
    let before = std::fs::read_to_string(&file).unwrap();

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    // Disk byte-identical, one retry scheduled, dashboard shows the error
    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
    let records = p.retry.retry_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].scenario, Scenario::New);
    assert_eq!(status_json(&p)["status"], "error");
}

#[tokio::test]
async fn test_incremental_mid_batch_failure_leaves_disk_untouched() {
    let server = MockServer::start().await;
    // Three changed translatable fields; the 2nd field of the 1st target
    // language fails
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "translations": [{ "text": "T" }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let p = pipeline(&server.uri());

    let mut value = translated_value("pdf-to-word");
    value["meta"]["title"] = json!("Edited title");
    value["meta"]["description"] = json!("Edited description");
    value["pageContent"]["mainTitle"] = json!("Edited main title");
    let file = write_page(&p, "pdf-to-word", &value);
    let before = std::fs::read_to_string(&file).unwrap();

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
    let records = p.retry.retry_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].scenario, Scenario::Incremental);
}

// ==================== All-or-Nothing at Every Failure Point ====================

#[tokio::test]
async fn test_rollback_is_byte_identical_wherever_the_batch_fails() {
    // Minimal page: 3 translatable strings x 2 target languages = 6 calls.
    // Fail at each call index in turn.
    for succeed_first in 0..6u64 {
        let server = MockServer::start().await;
        if succeed_first > 0 {
            Mock::given(method("POST"))
                .and(url_path("/v2/translate"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "translations": [{ "text": "T" }]
                })))
                .up_to_n_times(succeed_first)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(url_path("/v2/translate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let p = pipeline(&server.uri());
        let value = json!({
            "slug": "minimal",
            "source_lang": "en",
            "meta": { "title": "Title", "description": "Desc" },
            "pageContent": { "mainTitle": "Main" }
        });
        let file = write_page(&p, "minimal", &value);
        let before = std::fs::read_to_string(&file).unwrap();

        let err = p.processor.process_file(&file, false).await.unwrap_err();
        assert_eq!(err.scenario, Scenario::New);
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            before,
            "rollback not byte-identical when failing after {} calls",
            succeed_first
        );
    }
}

// ==================== Convergence ====================

#[tokio::test]
async fn test_successful_pass_converges_to_unchanged() {
    let server = MockServer::start().await;
    mock_translate(&server, "T").await;
    let p = pipeline(&server.uri());

    let file = write_page(&p, "pdf-to-word", &source_value("pdf-to-word"));
    let first = p.processor.process_file(&file, false).await.unwrap();
    assert!(matches!(first, ProcessOutcome::Translated { .. }));

    let page = PageDocument::load(&file).unwrap();
    assert_eq!(classify(&page), Scenario::Unchanged);

    let second = p.processor.process_file(&file, false).await.unwrap();
    assert_eq!(second, ProcessOutcome::Unchanged);
}

#[tokio::test]
async fn test_backfill_converges_to_unchanged() {
    let server = MockServer::start().await;
    mock_translate(&server, "T").await;
    let p = pipeline(&server.uri());

    let mut value = translated_value("pdf-to-word");
    value["translations"].as_object_mut().unwrap().remove("de");
    let file = write_page(&p, "pdf-to-word", &value);

    let outcome = p.processor.process_file(&file, false).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Translated {
            scenario: Scenario::MissingLangs,
            ..
        }
    ));
    let page = PageDocument::load(&file).unwrap();
    assert_eq!(classify(&page), Scenario::Unchanged);
}

// ==================== Retry Lifecycle ====================

#[tokio::test]
async fn test_failed_page_succeeds_on_retry() {
    let server = MockServer::start().await;
    // Every call of the first attempt fails, later attempts succeed
    Mock::given(method("POST"))
        .and(url_path("/v2/translate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mock_translate(&server, "T").await;
    let p = pipeline(&server.uri());

    let file = write_page(&p, "pdf-to-word", &source_value("pdf-to-word"));
    p.queue.enqueue(&file, false);
    p.queue.run().await;
    assert_eq!(p.retry.retry_records().len(), 1);

    // The sweep would do this once the delay elapses
    let due = p.retry.due_at(chrono::Utc::now() + chrono::Duration::seconds(301));
    assert_eq!(due.len(), 1);
    p.queue.enqueue(&due[0].file, false);
    p.queue.run().await;

    assert!(p.retry.retry_records().is_empty());
    let saved = load(&file);
    assert_eq!(saved["_status"], "ready");
    assert_eq!(saved["translations"]["de"]["meta"]["title"], "T");
}

// ==================== Validation Failures ====================

#[tokio::test]
async fn test_bad_source_lang_never_enters_retry_loop() {
    let server = MockServer::start().await;
    let p = pipeline(&server.uri());

    let mut value = source_value("bad-lang");
    value["source_lang"] = json!("fr");
    let file = write_page(&p, "bad-lang", &value);
    let before = std::fs::read_to_string(&file).unwrap();

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    // A document defect is skipped outright, never scheduled for retry
    assert!(p.retry.retry_records().is_empty());
    assert!(p.retry.failed_records().is_empty());
    assert_eq!(std::fs::read_to_string(&file).unwrap(), before);
}

// ==================== Queue Semantics ====================

#[tokio::test]
async fn test_queue_processes_files_in_order_and_dedupes() {
    let server = MockServer::start().await;
    mock_translate(&server, "T").await;
    let p = pipeline(&server.uri());

    let a = write_page(&p, "page-a", &source_value("page-a"));
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = write_page(&p, "page-b", &source_value("page-b"));

    assert!(p.queue.enqueue(&a, false));
    assert!(p.queue.enqueue(&b, false));
    assert!(!p.queue.enqueue(&a, false), "duplicate must merge");
    assert_eq!(p.queue.items().len(), 2);

    p.queue.run().await;

    assert!(p.queue.items().is_empty());
    assert_eq!(load(&a)["_status"], "ready");
    assert_eq!(load(&b)["_status"], "ready");
}

// ==================== Duplicate File Handling ====================

#[tokio::test]
async fn test_duplicated_page_is_fully_retranslated() {
    let server = MockServer::start().await;
    mock_translate(&server, "COPY").await;
    let p = pipeline(&server.uri());

    // A CMS duplicate: complete translations copied from another page,
    // hash snapshot still naming the source slug.
    let mut value = translated_value("pdf-to-word");
    value["slug"] = json!("word-to-pdf");
    let file = write_page(&p, "word-to-pdf", &value);

    let page = PageDocument::load(&file).unwrap();
    assert_eq!(classify(&page), Scenario::Duplicated);

    p.queue.enqueue(&file, false);
    p.queue.run().await;

    // Stale translations replaced wholesale, not diffed
    let saved = load(&file);
    assert_eq!(saved["translations"]["de"]["meta"]["title"], "COPY");
    assert_eq!(saved["translations"]["ru"]["pageContent"]["mainTitle"], "COPY");
    assert_eq!(saved["translations"]["en"]["meta"]["title"], "PDF to Word");
    // Snapshot now owned by the new slug, and the page has converged
    assert_eq!(saved["_hashes"]["_slug"], "word-to-pdf");
    let page = PageDocument::load(&file).unwrap();
    assert_eq!(classify(&page), Scenario::Unchanged);
    assert!(p.retry.retry_records().is_empty());
}

#[tokio::test]
async fn test_cms_duplicate_file_is_removed() {
    let server = MockServer::start().await;
    let p = pipeline(&server.uri());

    write_page(&p, "pdf-to-word", &translated_value("pdf-to-word"));
    let dup = write_page(&p, "pdf-to-word-1", &source_value("pdf-to-word"));

    p.queue.enqueue(&dup, false);
    p.queue.run().await;

    assert!(!dup.exists());
    assert!(p.content_dir.join("pdf-to-word.yml").exists());
    assert!(p.retry.retry_records().is_empty());
}
