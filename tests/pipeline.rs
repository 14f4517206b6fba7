//! Integration tests for the collection pipeline.
//!
//! These run the real enumerator, store and pacer against a scripted
//! in-memory [`ExtractionClient`], so they need no API key and no network.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use edgequake_img2csv::{
    collect_with, CollectError, CollectProgressCallback, Extraction, ExtractionClient,
    ExtractionError, ImageRecord, ImageSource, ImageStatus, ResultStore, RunConfig, RunStats,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers from a fixed script; unscripted images echo their name as `text`.
#[derive(Default)]
struct ScriptedClient {
    script: HashMap<String, Result<Vec<(&'static str, String)>, &'static str>>,
    calls: Mutex<Vec<String>>,
    latency: Duration,
}

impl ScriptedClient {
    fn new() -> Self {
        Self::default()
    }

    fn answer(mut self, id: &str, text: &str) -> Self {
        self.script
            .insert(id.to_string(), Ok(vec![("text", text.to_string())]));
        self
    }

    fn answer_fields(mut self, id: &str, fields: Vec<(&'static str, String)>) -> Self {
        self.script.insert(id.to_string(), Ok(fields));
        self
    }

    fn fail(mut self, id: &str) -> Self {
        self.script.insert(id.to_string(), Err("scripted failure"));
        self
    }

    fn latency(mut self, d: Duration) -> Self {
        self.latency = d;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ExtractionClient for &ScriptedClient {
    async fn extract(&self, image: &ImageRecord) -> Result<Extraction, ExtractionError> {
        self.calls.lock().unwrap().push(image.identifier.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.script.get(&image.identifier) {
            Some(Ok(fields)) => Ok(Extraction::from_pairs(fields.iter().cloned())),
            Some(Err(detail)) => Err(ExtractionError::ApiFailed {
                identifier: image.identifier.clone(),
                retries: 3,
                detail: detail.to_string(),
            }),
            None => Ok(Extraction::from_pairs([("text", image.identifier.clone())])),
        }
    }
}

/// Route library logs to the test output; `RUST_LOG=debug` shows pacing.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn with_images(names: &[&str]) -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        let ws = Self { dir };
        for n in names {
            ws.add_image(n);
        }
        ws
    }

    fn add_image(&self, name: &str) {
        std::fs::write(self.images().join(name), b"\x89PNG fake").unwrap();
    }

    fn images(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("results.csv")
    }

    fn config(&self) -> RunConfig {
        RunConfig::builder()
            .source(ImageSource::Directory(self.images()))
            .store_path(self.store())
            .delay(Duration::ZERO)
            .build()
            .unwrap()
    }

    fn csv(&self) -> String {
        read(&self.store())
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

// ── Worked example ───────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_image_is_absent_and_retried_next_run() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg", "c.jpg"]);
    let config = ws.config();

    let first = ScriptedClient::new()
        .answer("a.jpg", "A")
        .fail("b.jpg")
        .answer("c.jpg", "C");
    let report = collect_with(&config, &first).await.unwrap();

    assert_eq!(first.calls(), vec!["a.jpg", "b.jpg", "c.jpg"]);
    assert!(!report.is_success(), "a failed image must make the run unsuccessful");
    assert_eq!(report.stats.recorded, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(ws.csv(), "identifier,text\na.jpg,A\nc.jpg,C\n");
    assert!(report.clone().into_result().is_err());

    let second = ScriptedClient::new().answer("b.jpg", "B");
    let report = collect_with(&config, &second).await.unwrap();

    assert_eq!(second.calls(), vec!["b.jpg"]);
    assert!(report.is_success());
    assert_eq!(report.stats.skipped, 2);
    assert_eq!(report.stats.recorded, 1);
    // Append order, not sorted.
    assert_eq!(ws.csv(), "identifier,text\na.jpg,A\nc.jpg,C\nb.jpg,B\n");
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_is_idempotent() {
    let ws = Workspace::with_images(&["1.png", "2.png", "3.png"]);
    let config = ws.config();

    let client = ScriptedClient::new();
    collect_with(&config, &client).await.unwrap();
    let after_first = ws.csv();

    let again = ScriptedClient::new();
    let report = collect_with(&config, &again).await.unwrap();

    assert!(again.calls().is_empty(), "second run must not call the API");
    assert_eq!(report.stats.skipped, 3);
    assert!(report.images.iter().all(|r| r.status == ImageStatus::Skipped));
    assert_eq!(ws.csv(), after_first);
}

#[tokio::test]
async fn new_images_are_picked_up_on_resume() {
    let ws = Workspace::with_images(&["a.jpg"]);
    let config = ws.config();
    collect_with(&config, &ScriptedClient::new()).await.unwrap();

    ws.add_image("b.jpg");
    let client = ScriptedClient::new();
    let report = collect_with(&config, &client).await.unwrap();

    assert_eq!(client.calls(), vec!["b.jpg"]);
    assert_eq!(report.stats, RunStats {
        total: 2,
        recorded: 1,
        skipped: 1,
        failed: 0,
        total_input_tokens: 0,
        total_output_tokens: 0,
        total_duration_ms: report.stats.total_duration_ms,
    });
}

// ── Overwrite ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn overwrite_rebuilds_from_current_enumeration() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg"]);
    std::fs::write(
        ws.store(),
        "identifier,text\ngone.jpg,OLD\na.jpg,OLD\n",
    )
    .unwrap();

    let mut config = ws.config();
    config.overwrite = true;
    let client = ScriptedClient::new().answer("a.jpg", "A").answer("b.jpg", "B");
    let report = collect_with(&config, &client).await.unwrap();

    assert_eq!(client.calls(), vec!["a.jpg", "b.jpg"]);
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(ws.csv(), "identifier,text\na.jpg,A\nb.jpg,B\n");
}

#[tokio::test]
async fn overwrite_accepts_store_with_another_schema() {
    let ws = Workspace::with_images(&["a.jpg"]);
    std::fs::write(ws.store(), "identifier,title,price\na.jpg,T,1\n").unwrap();

    let mut config = ws.config();
    config.overwrite = true;
    collect_with(&config, &ScriptedClient::new().answer("a.jpg", "A"))
        .await
        .unwrap();

    assert_eq!(ws.csv(), "identifier,text\na.jpg,A\n");
}

#[tokio::test]
async fn single_file_overwrite_truncates_whole_store() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg"]);
    let config = ws.config();
    collect_with(&config, &ScriptedClient::new()).await.unwrap();

    let single = RunConfig::builder()
        .source(ImageSource::File(ws.images().join("b.jpg")))
        .store_path(ws.store())
        .delay(Duration::ZERO)
        .overwrite(true)
        .build()
        .unwrap();
    collect_with(&single, &ScriptedClient::new().answer("b.jpg", "NEW"))
        .await
        .unwrap();

    assert_eq!(ws.csv(), "identifier,text\nb.jpg,NEW\n");
}

// ── Single-file mode ─────────────────────────────────────────────────────────

#[tokio::test]
async fn single_file_mode_touches_one_image() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg", "c.jpg"]);
    let config = RunConfig::builder()
        .source(ImageSource::File(ws.images().join("b.jpg")))
        .store_path(ws.store())
        .delay(Duration::ZERO)
        .build()
        .unwrap();

    let client = ScriptedClient::new().answer("b.jpg", "B");
    let report = collect_with(&config, &client).await.unwrap();

    assert_eq!(client.calls(), vec!["b.jpg"]);
    assert_eq!(report.stats.total, 1);
    assert_eq!(ws.csv(), "identifier,text\nb.jpg,B\n");
}

#[tokio::test]
async fn single_file_mode_skips_when_already_recorded() {
    let ws = Workspace::with_images(&["a.jpg"]);
    std::fs::write(ws.store(), "identifier,text\na.jpg,A\n").unwrap();
    let config = RunConfig::builder()
        .source(ImageSource::File(ws.images().join("a.jpg")))
        .store_path(ws.store())
        .build()
        .unwrap();

    let client = ScriptedClient::new();
    let report = collect_with(&config, &client).await.unwrap();
    assert!(client.calls().is_empty());
    assert_eq!(report.stats.skipped, 1);
}

// ── Pacing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn calls_are_spaced_by_the_delay() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let delay = Duration::from_millis(60);
    let mut config = ws.config();
    config.delay = delay;

    let start = Instant::now();
    let client = ScriptedClient::new();
    collect_with(&config, &client).await.unwrap();

    assert_eq!(client.calls().len(), 4);
    assert!(
        start.elapsed() >= delay * 3,
        "elapsed {:?} < 3 × {:?}",
        start.elapsed(),
        delay
    );
}

#[tokio::test]
async fn delay_is_measured_after_slow_calls() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg"]);
    let delay = Duration::from_millis(50);
    let latency = Duration::from_millis(50);
    let mut config = ws.config();
    config.delay = delay;

    let start = Instant::now();
    let client = ScriptedClient::new().latency(latency);
    collect_with(&config, &client).await.unwrap();

    // call, pause after it ends, call
    assert!(start.elapsed() >= latency * 2 + delay);
}

#[tokio::test]
async fn skipped_images_are_not_paced() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg", "c.jpg"]);
    std::fs::write(ws.store(), "identifier,text\na.jpg,A\nb.jpg,B\nc.jpg,C\n").unwrap();
    let mut config = ws.config();
    config.delay = Duration::from_secs(30);

    let start = Instant::now();
    collect_with(&config, &ScriptedClient::new()).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_store_aborts_before_any_call() {
    let ws = Workspace::with_images(&["a.jpg"]);
    let corrupt = "identifier,text\na.jpg,A,B,C\n";
    std::fs::write(ws.store(), corrupt).unwrap();

    let client = ScriptedClient::new();
    let err = collect_with(&ws.config(), &client).await.unwrap_err();

    assert!(matches!(err, CollectError::CorruptStore { .. }), "got {err:?}");
    assert!(client.calls().is_empty());
    assert_eq!(ws.csv(), corrupt);
}

#[tokio::test]
async fn schema_mismatch_aborts_before_any_call() {
    let ws = Workspace::with_images(&["a.jpg"]);
    std::fs::write(ws.store(), "identifier,text\nz.jpg,Z\n").unwrap();

    let config = RunConfig::builder()
        .source(ImageSource::Directory(ws.images()))
        .store_path(ws.store())
        .fields(["title"])
        .build()
        .unwrap();
    let client = ScriptedClient::new();
    let err = collect_with(&config, &client).await.unwrap_err();

    assert!(matches!(err, CollectError::SchemaMismatch { .. }), "got {err:?}");
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn missing_input_is_not_found() {
    let ws = Workspace::with_images(&[]);
    let config = RunConfig::builder()
        .source(ImageSource::File(ws.images().join("nope.jpg")))
        .store_path(ws.store())
        .build()
        .unwrap();

    let err = collect_with(&config, &ScriptedClient::new()).await.unwrap_err();
    assert!(matches!(err, CollectError::NotFound { .. }));
    assert!(!ws.store().exists());
}

// ── Rows ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_field_rows_follow_schema_order() {
    let ws = Workspace::with_images(&["r1.jpg"]);
    let config = RunConfig::builder()
        .source(ImageSource::Directory(ws.images()))
        .store_path(ws.store())
        .delay(Duration::ZERO)
        .fields(["merchant", "total"])
        .build()
        .unwrap();

    let client = ScriptedClient::new().answer_fields(
        "r1.jpg",
        vec![
            ("total", "12.50".to_string()),
            ("merchant", "Café \"Le Coin\", Paris".to_string()),
            ("ignored", "x".to_string()),
        ],
    );
    collect_with(&config, &client).await.unwrap();

    assert_eq!(
        ws.csv(),
        "identifier,merchant,total\nr1.jpg,\"Café \"\"Le Coin\"\", Paris\",12.50\n"
    );

    let store = ResultStore::load(ws.store(), &config.fields).unwrap();
    let row = store.get("r1.jpg").unwrap();
    assert_eq!(row.value(store.header(), "merchant"), Some("Café \"Le Coin\", Paris"));
}

// ── Progress callbacks ───────────────────────────────────────────────────────

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl CollectProgressCallback for EventLog {
    fn on_run_start(&self, total: usize, pending: usize) {
        self.0.lock().unwrap().push(format!("start {total} {pending}"));
    }
    fn on_image_skipped(&self, index: usize, _total: usize, identifier: &str) {
        self.0.lock().unwrap().push(format!("skip {index} {identifier}"));
    }
    fn on_image_start(&self, index: usize, _total: usize, identifier: &str) {
        self.0.lock().unwrap().push(format!("begin {index} {identifier}"));
    }
    fn on_image_complete(&self, index: usize, _total: usize, identifier: &str) {
        self.0.lock().unwrap().push(format!("ok {index} {identifier}"));
    }
    fn on_image_error(&self, index: usize, _total: usize, identifier: &str, _error: &str) {
        self.0.lock().unwrap().push(format!("err {index} {identifier}"));
    }
    fn on_run_complete(&self, stats: &RunStats) {
        self.0.lock().unwrap().push(format!(
            "done {} {} {}",
            stats.recorded, stats.skipped, stats.failed
        ));
    }
}

#[tokio::test]
async fn progress_events_follow_enumeration_order() {
    let ws = Workspace::with_images(&["a.jpg", "b.jpg", "c.jpg"]);
    std::fs::write(ws.store(), "identifier,text\na.jpg,A\n").unwrap();

    let log = Arc::new(EventLog::default());
    let config = RunConfig::builder()
        .source(ImageSource::Directory(ws.images()))
        .store_path(ws.store())
        .delay(Duration::ZERO)
        .progress_callback(log.clone())
        .build()
        .unwrap();

    collect_with(&config, &ScriptedClient::new().fail("c.jpg"))
        .await
        .unwrap();

    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            "start 3 2",
            "skip 1 a.jpg",
            "begin 2 b.jpg",
            "ok 2 b.jpg",
            "begin 3 c.jpg",
            "err 3 c.jpg",
            "done 1 1 1",
        ]
    );
}
