//! Coordinator tests with in-memory stand-ins for the three services.
//!
//! The fake recognizer reacts to the image bytes:
//!   * `reject…` → the OCR service refuses the image
//!   * `panic…`  → the unit of work panics
//!   * `raw…`    → the model answers without sentinels (degraded)
//!   * anything else → clean table

use async_trait::async_trait;
use invoice_sheets::{
    ArtifactStore, ArtifactUpload, BatchConverter, BatchError, BatchFile, BatchProgressCallback,
    PipelineConfig, StorageRecord, TaskError, TaskErrorKind, TaskState, TextGenerator,
    TextRecognizer,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeRecognizer {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, image: &[u8], _content_type: &str) -> Result<String, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = String::from_utf8_lossy(image).to_string();
        if text.starts_with("reject") {
            return Err(TaskError::RecognitionRejected {
                status: Some(400),
                body: "InvalidImageSize".into(),
            });
        }
        if text.starts_with("panic") {
            panic!("recognizer blew up on {text}");
        }
        Ok(format!("INVOICE {text} "))
    }
}

#[derive(Default)]
struct FakeGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("INVOICE raw") {
            Ok("Serial.no.,Quantity.\n1,10".into())
        } else {
            Ok("Here you go:\n<*>Serial.no.,Quantity.\n1,10\n2,20<*>".into())
        }
    }
}

#[derive(Default)]
struct FakeStore {
    uploads: Mutex<Vec<ArtifactUpload>>,
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn store(&self, upload: ArtifactUpload) -> Result<StorageRecord, TaskError> {
        let mut uploads = self.uploads.lock().unwrap();
        let record = StorageRecord {
            id: format!("rec{}", uploads.len() + 1),
            collection: "excel_files".into(),
            file_name: upload.file_name.clone(),
            owner_id: upload.owner_id.clone(),
        };
        uploads.push(upload);
        Ok(record)
    }
}

/// Records every stage transition per file index.
#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<(usize, &'static str)>>,
    started: AtomicUsize,
    completed: Mutex<Option<(usize, usize)>>,
}

impl StageRecorder {
    fn labels_for(&self, index: usize) -> Vec<&'static str> {
        self.stages
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, l)| *l)
            .collect()
    }
}

impl BatchProgressCallback for StageRecorder {
    fn on_batch_start(&self, total_files: usize) {
        self.started.store(total_files, Ordering::SeqCst);
    }

    fn on_stage(&self, index: usize, _name: &str, state: &TaskState) {
        self.stages.lock().unwrap().push((index, state.label()));
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        *self.completed.lock().unwrap() = Some((total_files, success_count));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Harness {
    converter: BatchConverter,
    recognizer: Arc<FakeRecognizer>,
    generator: Arc<FakeGenerator>,
    store: Arc<FakeStore>,
    _dir: tempfile::TempDir,
    out: std::path::PathBuf,
}

fn harness_with(recognizer: FakeRecognizer, tweak: impl FnOnce(PipelineConfig) -> PipelineConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sheets");
    let config = tweak(
        PipelineConfig::builder()
            .output_dir(out.clone())
            .build()
            .unwrap(),
    );
    let recognizer = Arc::new(recognizer);
    let generator = Arc::new(FakeGenerator::default());
    let store = Arc::new(FakeStore::default());
    let converter = BatchConverter::new(
        config,
        recognizer.clone(),
        generator.clone(),
        store.clone(),
    );
    Harness {
        converter,
        recognizer,
        generator,
        store,
        _dir: dir,
        out,
    }
}

fn harness() -> Harness {
    harness_with(FakeRecognizer::default(), |c| c)
}

fn file(name: &str, content: &str) -> BatchFile {
    BatchFile::from_bytes(name, content.as_bytes().to_vec())
}

fn xlsx_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|x| x == "xlsx"))
                .count()
        })
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_file_gets_exactly_one_outcome_in_order() {
    let h = harness();
    let files = vec![file("a.jpg", "one"), file("b.jpg", "two"), file("c.jpg", "three")];

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.succeeded(), 3);
    assert_eq!(result.owner_id, "u_42");
    let names: Vec<_> = result.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.jpg", "c.jpg"]);
    for (i, f) in result.files.iter().enumerate() {
        assert_eq!(f.index, i);
        assert!(!f.degraded);
        assert_eq!(f.record().unwrap().owner_id, "u_42");
    }
    assert_eq!(xlsx_count(&h.out), 3);
    assert_eq!(h.store.uploads.lock().unwrap().len(), 3);
    assert_eq!(result.summary(), "3 of 3 files processed");
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_work() {
    let h = harness();
    let files: Vec<_> = (0..11).map(|i| file(&format!("{i}.jpg"), "x")).collect();

    let err = h.converter.convert(files, "u_42").await.unwrap_err();

    assert!(matches!(err, BatchError::BatchTooLarge { count: 11, max: 10 }));
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.uploads.lock().unwrap().is_empty());
    assert!(!h.out.exists());
}

#[tokio::test]
async fn ten_files_is_the_largest_accepted_batch() {
    let h = harness();
    let files: Vec<_> = (0..10).map(|i| file(&format!("{i}.jpg"), "x")).collect();
    let result = h.converter.convert(files, "u_42").await.unwrap();
    assert_eq!(result.len(), 10);
    assert_eq!(result.succeeded(), 10);
}

#[tokio::test]
async fn empty_batch_is_an_empty_result() {
    let h = harness();
    let result = h.converter.convert(Vec::new(), "u_42").await.unwrap();
    assert!(result.is_empty());
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failing_file_does_not_affect_its_siblings() {
    let h = harness();
    let files = vec![file("a.jpg", "one"), file("b.jpg", "reject"), file("c.jpg", "three")];

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert_eq!(result.len(), 3);
    assert!(result.files[0].is_success());
    assert!(result.files[2].is_success());
    assert_eq!(
        result.files[1].error().map(TaskError::kind),
        Some(TaskErrorKind::RecognitionRejected)
    );
    assert_eq!(result.failures_of(TaskErrorKind::RecognitionRejected), 1);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.uploads.lock().unwrap().len(), 2);
    assert_eq!(xlsx_count(&h.out), 2);
    assert!(result.summary().starts_with("2 of 3 files processed; 1 failed: b.jpg"));
}

#[tokio::test]
async fn missing_sentinels_mark_the_file_degraded_but_successful() {
    let h = harness();
    let files = vec![file("a.jpg", "clean"), file("b.jpg", "raw")];

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert_eq!(result.succeeded(), 2);
    assert!(!result.files[0].degraded);
    assert!(result.files[1].degraded);
    assert_eq!(result.degraded(), 1);
}

#[tokio::test]
async fn stages_are_reported_in_order() {
    let recorder = Arc::new(StageRecorder::default());
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .build()
        .unwrap();
    let converter = BatchConverter::new(
        config,
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeGenerator::default()),
        Arc::new(FakeStore::default()),
    )
    .with_progress(recorder.clone());

    let files = vec![file("a.jpg", "one"), file("b.jpg", "reject")];
    let result = converter.convert(files, "u_42").await.unwrap();

    assert_eq!(
        recorder.labels_for(0),
        ["recognizing", "extracting", "materializing", "persisting", "succeeded"]
    );
    assert_eq!(recorder.labels_for(1), ["recognizing"]);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
    assert_eq!(*recorder.completed.lock().unwrap(), Some((2, 1)));
    assert_eq!(result.failed(), 1);
}

#[tokio::test]
async fn panicking_unit_is_reported_as_aborted() {
    let h = harness();
    let files = vec![file("a.jpg", "one"), file("b.jpg", "panic"), file("c.jpg", "three")];

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.files[1].name, "b.jpg");
    assert!(matches!(
        result.files[1].error(),
        Some(TaskError::TaskAborted { .. })
    ));
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_files() {
    let recognizer = FakeRecognizer {
        delay: Some(Duration::from_millis(30)),
        ..Default::default()
    };
    let h = harness_with(recognizer, |mut c| {
        c.concurrency = 2;
        c
    });
    let files: Vec<_> = (0..6).map(|i| file(&format!("{i}.jpg"), "x")).collect();

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert_eq!(result.succeeded(), 6);
    let peak = h.recognizer.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak in-flight was {peak}");
}

#[tokio::test]
async fn source_image_is_attached_when_configured() {
    let h = harness_with(FakeRecognizer::default(), |mut c| {
        c.attach_source_image = true;
        c
    });

    h.converter
        .convert(vec![file("scan.jpg", "one")], "u_42")
        .await
        .unwrap();

    let uploads = h.store.uploads.lock().unwrap();
    let image = uploads[0].image.as_ref().expect("image attached");
    assert_eq!(image.name, "scan.jpg");
    assert_eq!(image.bytes, b"one");
    assert_eq!(uploads[0].owner_id, "u_42");
    assert!(uploads[0].file_name.starts_with("output_"));
    assert!(!uploads[0].spreadsheet.is_empty());
}

#[tokio::test]
async fn source_image_is_omitted_by_default() {
    let h = harness();
    h.converter
        .convert(vec![file("scan.jpg", "one")], "u_42")
        .await
        .unwrap();
    assert!(h.store.uploads.lock().unwrap()[0].image.is_none());
}

#[tokio::test]
async fn unreadable_source_fails_only_that_file() {
    let h = harness();
    let files = vec![
        BatchFile::from_path(h.out.join("does-not-exist.jpg")),
        file("b.jpg", "two"),
    ];

    let result = h.converter.convert(files, "u_42").await.unwrap();

    assert!(matches!(
        result.files[0].error(),
        Some(TaskError::SourceUnreadable { .. })
    ));
    assert!(result.files[1].is_success());
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn uploaded_spreadsheet_holds_the_extracted_table() {
    use calamine::{open_workbook_auto, DataType, Reader};

    let h = harness();
    let result = h
        .converter
        .convert(vec![file("a.jpg", "one")], "u_42")
        .await
        .unwrap();

    let record = result.files[0].record().unwrap();
    let path = h.out.join(&record.file_name);
    let mut workbook = open_workbook_auto(&path).unwrap();
    let range = workbook.worksheet_range("Sheet1").unwrap();
    let rows: Vec<Vec<Option<String>>> = range
        .rows()
        .map(|r| r.iter().map(|c| c.as_string()).collect())
        .collect();
    assert_eq!(rows[0][0].as_deref(), Some("Serial.no."));
    assert_eq!(rows[0][1].as_deref(), Some("Quantity."));
    assert_eq!(rows[2][1].as_deref(), Some("20"));
}

#[tokio::test]
async fn batch_result_serializes_per_file_errors() {
    let h = harness();
    let result = h
        .converter
        .convert(vec![file("a.jpg", "reject")], "u_42")
        .await
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["files"][0]["name"], "a.jpg");
    assert!(json["files"][0]["result"]["Err"].is_object());
}
