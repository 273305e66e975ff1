//! Offline integration tests for the full extraction pipeline.
//!
//! OCR and the model are replaced by in-process fakes, so these run without
//! network access, OCR models or API keys. Outputs go to temp directories.

use async_trait::async_trait;
use invoice2json::{
    extract, extract_text, extract_to_files, render_json, structure_text, ExtractError,
    ExtractionConfig, ExtractionOutcome, ExtractionProgressCallback, Generation,
    GenerationError, GenerationRequest, OcrDetection, OcrEngine, OcrError, OcrLine, OcrWord,
    Stage, StructuringFailure, TextGenerator,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Returns the given lines regardless of the image.
struct ScriptedOcr(Vec<Vec<(&'static str, Option<f32>)>>);

impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, _image: &image::DynamicImage) -> Result<OcrDetection, OcrError> {
        Ok(OcrDetection {
            lines: self
                .0
                .iter()
                .map(|words| OcrLine {
                    words: words
                        .iter()
                        .map(|(text, conf)| {
                            let w = OcrWord::new(*text);
                            match conf {
                                Some(c) => w.with_confidence(*c),
                                None => w,
                            }
                        })
                        .collect(),
                })
                .collect(),
        })
    }
}

fn one_line_ocr() -> Arc<dyn OcrEngine> {
    Arc::new(ScriptedOcr(vec![vec![("INV-1", None), ("100", None)]]))
}

/// Replies with a fixed completion and remembers every prompt.
struct FakeModel {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(Generation {
            text: self.reply.clone(),
            input_tokens: 120,
            output_tokens: 30,
        })
    }
}

/// A model that panics if called.
struct UnreachableModel;

#[async_trait]
impl TextGenerator for UnreachableModel {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, GenerationError> {
        panic!("the model must not be called");
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for RecordingCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start {stage}"));
    }

    fn on_stage_complete(&self, stage: Stage, _detail: &str) {
        self.events.lock().unwrap().push(format!("done {stage}"));
    }

    fn on_structuring_fallback(&self, _reason: &str) {
        self.events.lock().unwrap().push("fallback".into());
    }

    fn on_extraction_complete(&self, structured: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("complete structured={structured}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_invoice_png(dir: &Path) -> PathBuf {
    let path = dir.join("invoice.png");
    image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

fn config(dir: &Path, ocr: Arc<dyn OcrEngine>, model: Arc<dyn TextGenerator>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .ocr_engine(ocr)
        .generator(model)
        .output_dir(dir)
        .max_retries(0)
        .build()
        .expect("valid config")
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ── Full pipeline ────────────────────────────────────────────────────────────

#[tokio::test]
async fn structured_run_writes_json_and_csv() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let reply = r#"{"Invoice Number": "INV-1", "Full Total": 100, "Purchased Items": [{"name": "Pen", "quantity": 2}], "SGST": null}"#;
    let model = FakeModel::new(reply);
    let cfg = config(dir.path(), one_line_ocr(), model.clone());

    let written = extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();

    assert_eq!(written.output.text, "INV-1 100");
    assert!(model.prompts.lock().unwrap()[0].contains("Extracted Invoice Text:\nINV-1 100\n"));

    let expected: Value = serde_json::from_str(reply).unwrap();
    assert_eq!(written.output.outcome, ExtractionOutcome::Structured(expected.clone()));

    // JSON file: exact pretty form, and it reads back to the same value.
    let json_text = read(&written.json_path);
    assert_eq!(json_text, render_json(&expected));
    assert!(json_text.starts_with("{\n    \"Invoice Number\": \"INV-1\",\n"));
    let back: Value = serde_json::from_str(&json_text).unwrap();
    assert_eq!(back, expected);

    // CSV file: header + one row per top-level key, in order.
    assert_eq!(
        read(&written.csv_path),
        ",Extracted Value\n\
         Invoice Number,INV-1\n\
         Full Total,100\n\
         Purchased Items,\"[{\"\"name\"\":\"\"Pen\"\",\"\"quantity\"\":2}]\"\n\
         SGST,\n"
    );

    let stats = &written.output.stats;
    assert_eq!((stats.ocr_lines, stats.ocr_words), (1, 2));
    assert_eq!((stats.input_tokens, stats.output_tokens), (120, 30));
    assert_eq!(stats.retries, 0);
    assert!(!stats.prompt_truncated);
}

#[tokio::test]
async fn default_file_names_are_used() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let cfg = config(dir.path(), one_line_ocr(), FakeModel::new("{}"));

    let written = extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(written.json_path, dir.path().join("invoice_extracted_data.json"));
    assert_eq!(written.csv_path, dir.path().join("invoice_extracted_data.csv"));
    assert_eq!(read(&written.json_path), "{}");
    assert_eq!(read(&written.csv_path), ",Extracted Value\n");
}

#[tokio::test]
async fn refusal_writes_fallback_record() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let cfg = config(dir.path(), one_line_ocr(), FakeModel::new("Sorry, I cannot help"));

    let written = extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();

    match &written.output.outcome {
        ExtractionOutcome::Unstructured { raw_text, reason } => {
            assert_eq!(raw_text, "INV-1 100");
            assert!(matches!(reason, StructuringFailure::InvalidJson { .. }));
        }
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(
        read(&written.json_path),
        "{\n    \"error\": \"Mistral AI failed to structure the data\",\n    \"raw_text\": \"INV-1 100\"\n}"
    );
    assert_eq!(
        read(&written.csv_path),
        ",Extracted Value\nerror,Mistral AI failed to structure the data\nraw_text,INV-1 100\n"
    );
}

#[tokio::test]
async fn second_run_overwrites_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());

    let first = config(
        dir.path(),
        one_line_ocr(),
        FakeModel::new(r#"{"Invoice Number": "INV-1", "Customer Name": "ACME"}"#),
    );
    extract_to_files(image.to_str().unwrap(), &first).await.unwrap();

    let second = config(dir.path(), one_line_ocr(), FakeModel::new(r#"{"Invoice Number": "INV-2"}"#));
    let written = extract_to_files(image.to_str().unwrap(), &second).await.unwrap();

    assert_eq!(read(&written.json_path), "{\n    \"Invoice Number\": \"INV-2\"\n}");
    assert_eq!(read(&written.csv_path), ",Extracted Value\nInvoice Number,INV-2\n");
}

#[tokio::test]
async fn non_ascii_values_are_escaped_in_json_only() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let cfg = config(
        dir.path(),
        one_line_ocr(),
        FakeModel::new(r#"{"Customer Name": "Zoë Café", "Full Total": "₹118"}"#),
    );

    let written = extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();
    let json_text = read(&written.json_path);
    assert!(json_text.is_ascii());
    assert!(json_text.contains(r#""Zo\u00eb Caf\u00e9""#));
    assert!(json_text.contains(r#""\u20b9118""#));
    assert!(read(&written.csv_path).contains("Customer Name,Zoë Café\n"));
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let cb = Arc::new(RecordingCallback::default());
    let cfg = ExtractionConfig::builder()
        .ocr_engine(one_line_ocr())
        .generator(FakeModel::new("not json"))
        .output_dir(dir.path())
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();

    assert_eq!(
        *cb.events.lock().unwrap(),
        vec![
            "start OCR",
            "done OCR",
            "start Structuring",
            "fallback",
            "done Structuring",
            "start Persistence",
            "done Persistence",
            "complete structured=false",
        ]
    );
}

#[tokio::test]
async fn extract_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let out_dir = dir.path().join("out");
    let cfg = config(&out_dir, one_line_ocr(), FakeModel::new(r#"{"a": 1}"#));

    let output = extract(image.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(output.outcome.field("a"), Some(&json!(1)));
    assert!(!out_dir.exists());
}

// ── OCR behaviour ────────────────────────────────────────────────────────────

#[tokio::test]
async fn words_from_all_lines_are_joined_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let ocr = Arc::new(ScriptedOcr(vec![
        vec![("Invoice", None), ("No:", None), ("INV-7", None)],
        vec![],
        vec![("Total:", None), ("  118.00 ", None)],
    ]));
    let cfg = config(dir.path(), ocr, Arc::new(UnreachableModel));

    let text = extract_text(image.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(text, "Invoice No: INV-7 Total: 118.00");
}

#[tokio::test]
async fn min_confidence_drops_low_scored_words() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let ocr = Arc::new(ScriptedOcr(vec![vec![
        ("INV-1", Some(0.95)),
        ("smudge", Some(0.1)),
        ("100", None),
    ]]));
    let cfg = ExtractionConfig::builder()
        .ocr_engine(ocr)
        .generator(Arc::new(UnreachableModel))
        .min_confidence(0.5)
        .build()
        .unwrap();

    let text = extract_text(image.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(text, "INV-1 100");
}

#[tokio::test]
async fn blank_invoice_still_reaches_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let model = FakeModel::new("{}");
    let cfg = config(dir.path(), Arc::new(ScriptedOcr(vec![])), model.clone());

    let output = extract(image.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(output.text, "");
    assert_eq!(model.prompts.lock().unwrap().len(), 1);
}

// ── Structuring only ─────────────────────────────────────────────────────────

#[tokio::test]
async fn structure_text_parses_fenced_reply() {
    let cfg = ExtractionConfig::builder()
        .generator(FakeModel::new("Sure!\n```json\n{\"Invoice Number\": \"INV-1\"}\n```"))
        .build()
        .unwrap();
    let outcome = structure_text("INV-1 100", &cfg).await.unwrap();
    assert_eq!(outcome, ExtractionOutcome::Structured(json!({"Invoice Number": "INV-1"})));
}

#[tokio::test]
async fn structure_text_falls_back_on_prose() {
    let cfg = ExtractionConfig::builder()
        .generator(FakeModel::new("Sorry, I cannot help"))
        .build()
        .unwrap();
    let outcome = structure_text("INV-1 100", &cfg).await.unwrap();
    assert_eq!(
        outcome.to_json(),
        json!({"error": "Mistral AI failed to structure the data", "raw_text": "INV-1 100"})
    );
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_image_is_fatal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), one_line_ocr(), Arc::new(UnreachableModel));
    let missing = dir.path().join("nope.png");

    let err = extract_to_files(missing.to_str().unwrap(), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::FileNotFound { .. }), "got {err:?}");
    assert!(!cfg.json_path().exists());
    assert!(!cfg.csv_path().exists());
}

#[tokio::test]
async fn text_file_is_not_an_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice.png");
    std::fs::write(&path, "Invoice INV-1, total 100").unwrap();
    let cfg = config(dir.path(), one_line_ocr(), Arc::new(UnreachableModel));

    let err = extract(path.to_str().unwrap(), &cfg).await.unwrap_err();
    assert!(matches!(err, ExtractError::NotAnImage { .. }), "got {err:?}");
}

#[tokio::test]
async fn ocr_engine_failure_is_fatal() {
    struct Broken;
    impl OcrEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn recognize(&self, _image: &image::DynamicImage) -> Result<OcrDetection, OcrError> {
            Err(OcrError::Recognition("no text lines".into()))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let cfg = config(dir.path(), Arc::new(Broken), Arc::new(UnreachableModel));

    let err = extract_to_files(image.to_str().unwrap(), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::OcrFailed { .. }), "got {err:?}");
    assert!(!cfg.json_path().exists());
}

#[tokio::test]
async fn model_failure_is_fatal_and_keeps_previous_outputs() {
    struct Unauthorized;

    #[async_trait]
    impl TextGenerator for Unauthorized {
        fn name(&self) -> &str {
            "unauthorized"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, GenerationError> {
            Err(GenerationError::Provider("HTTP 401 invalid api key".into()))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());
    let good = config(dir.path(), one_line_ocr(), FakeModel::new(r#"{"Invoice Number": "INV-1"}"#));
    let before = extract_to_files(image.to_str().unwrap(), &good).await.unwrap();
    let json_before = read(&before.json_path);
    let csv_before = read(&before.csv_path);

    let cb = Arc::new(RecordingCallback::default());
    let failing = ExtractionConfig::builder()
        .ocr_engine(one_line_ocr())
        .generator(Arc::new(Unauthorized))
        .output_dir(dir.path())
        .max_retries(0)
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    let err = extract_to_files(image.to_str().unwrap(), &failing)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::LlmFailed { .. }), "got {err:?}");
    assert_eq!(read(&before.json_path), json_before);
    assert_eq!(read(&before.csv_path), csv_before);

    let events = cb.events.lock().unwrap();
    assert!(!events.iter().any(|e| e == "fallback" || e.starts_with("complete")));
}

#[tokio::test]
async fn bracketed_refusal_is_not_structured() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_invoice_png(dir.path());

    for reply in [
        "Sorry, I cannot help with that [1].",
        "I could not read the totals {} sorry",
    ] {
        let cfg = config(dir.path(), one_line_ocr(), FakeModel::new(reply));
        let written = extract_to_files(image.to_str().unwrap(), &cfg).await.unwrap();

        assert!(!written.output.outcome.is_structured(), "{reply}");
        assert_eq!(
            serde_json::from_str::<Value>(&read(&written.json_path)).unwrap(),
            json!({"error": "Mistral AI failed to structure the data", "raw_text": "INV-1 100"})
        );
    }
}
