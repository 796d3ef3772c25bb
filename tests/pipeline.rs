//! Offline integration tests for the ingestion pipeline.
//!
//! A scripted transport and a scripted recogniser stand in for the LLM
//! provider and tesseract, so these run without network or binaries.

use async_trait::async_trait;
use edgequake_receipts::pipeline::segment::RECOGNIZED_TEXT_LABEL;
use edgequake_receipts::{
    CancelToken, CatalogEntry, GenerationRequest, GenerationTransport, IngestConfig,
    IngestError, IngestProgressCallback, Ingestor, TextRecognizer, TransportError,
};
use image::{DynamicImage, ImageFormat};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// What the transport saw for one call.
#[derive(Debug, Clone)]
struct Seen {
    prompt: String,
    attachment_mime: Option<String>,
}

/// Answers by the first rule whose needle occurs in the prompt.
struct Scripted {
    rules: Vec<(&'static str, Result<String, TransportError>)>,
    delay: Option<Duration>,
    seen: Mutex<Vec<Seen>>,
}

impl Scripted {
    fn new(rules: Vec<(&'static str, Result<String, TransportError>)>) -> Self {
        Self {
            rules,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationTransport for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
        self.seen.lock().unwrap().push(Seen {
            prompt: request.prompt.clone(),
            attachment_mime: request.attachment.as_ref().map(|a| a.mime_type.clone()),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.rules
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Ok("{}".to_string()))
    }
}

/// Hands out one scripted line list per band, in order.
struct Bands {
    queue: Mutex<VecDeque<Vec<String>>>,
    heights: Mutex<Vec<u32>>,
}

impl Bands {
    fn new(bands: &[&[&str]]) -> Self {
        Self {
            queue: Mutex::new(
                bands
                    .iter()
                    .map(|b| b.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
            heights: Mutex::new(Vec::new()),
        }
    }
}

impl TextRecognizer for Bands {
    fn recognize(&self, image: &DynamicImage) -> Option<Vec<String>> {
        self.heights.lock().unwrap().push(image.height());
        self.queue.lock().unwrap().pop_front()
    }
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    batches: AtomicUsize,
    succeeded_reported: AtomicUsize,
}

impl IngestProgressCallback for Counting {
    fn on_batch_start(&self, _total: usize) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }
    fn on_item_start(&self, _index: usize, _total: usize, _label: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_item_complete(&self, _index: usize, _total: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_item_error(&self, _index: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total: usize, succeeded: usize) {
        self.succeeded_reported.store(succeeded, Ordering::SeqCst);
    }
}

fn estimate_reply(calories: f64) -> Result<String, TransportError> {
    Ok(format!(
        "```json\n{{\"calories\": \"{calories}\", \"protein\": 1, \"servingGrams\": null}}\n```"
    ))
}

// ── Receipts from images ─────────────────────────────────────────────────────

#[tokio::test]
async fn tall_receipt_is_segmented_and_deduplicated_into_the_prompt() {
    let transport = Arc::new(Scripted::new(vec![(
        RECOGNIZED_TEXT_LABEL,
        Ok(r#"{"storeName":"Lidl","items":[{"name":"Milk","price":1.29},{"name":"Eggs","price":"2.49"}]}"#
            .to_string()),
    )]));
    let bands = Arc::new(Bands::new(&[
        &["LIDL", "MILK 1.29", "EGGS 2.49"],
        &["MILK 1.29", "EGGS 2.49", "BREAD 1.99"],
        &["BREAD 1.99", "TOTAL 5.77"],
    ]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default())
        .with_recognizer(bands.clone());

    let image = DynamicImage::new_rgb8(100, 9000);
    let receipt = ingestor
        .receipt_from_image(&image, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.store_name.as_deref(), Some("Lidl"));
    assert_eq!(receipt.items.len(), 2);
    assert_eq!(*bands.heights.lock().unwrap(), vec![4000, 4000, 1400]);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let expected = format!(
        "{RECOGNIZED_TEXT_LABEL}\nLIDL\nMILK 1.29\nEGGS 2.49\nBREAD 1.99\nTOTAL 5.77"
    );
    assert!(
        calls[0].prompt.ends_with(&expected),
        "prompt tail was: {:?}",
        &calls[0].prompt[calls[0].prompt.len().saturating_sub(120)..]
    );
    assert_eq!(calls[0].attachment_mime.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn receipt_without_recognised_text_still_attaches_image() {
    let transport = Arc::new(Scripted::new(vec![(
        "",
        Ok(r#"[{"name":"Apples","price":"0.99","category":"Produce"}]"#.to_string()),
    )]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default())
        .with_recognizer(Arc::new(Bands::new(&[])));

    let receipt = ingestor
        .receipt_from_image(&DynamicImage::new_rgb8(400, 600), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.items[0].name, "Apples");
    let calls = transport.calls();
    assert!(!calls[0].prompt.contains(RECOGNIZED_TEXT_LABEL));
    assert!(calls[0].attachment_mime.is_some());
}

#[tokio::test]
async fn unreadable_response_is_a_parse_error() {
    let transport = Arc::new(Scripted::new(vec![(
        "",
        Ok("Sorry, I cannot read this receipt.".to_string()),
    )]));
    let ingestor = Ingestor::new(transport, IngestConfig::default()).without_recognizer();
    let err = ingestor
        .receipt_from_text("MILK 1.29", &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(_)), "got {err:?}");
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_during_transport_call_yields_no_record() {
    let transport = Arc::new(
        Scripted::new(vec![("", estimate_reply(52.0))]).slow(Duration::from_secs(30)),
    );
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default());
    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = ingestor
        .estimate_nutrition("apple", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn cancelled_batch_reports_every_item_as_failed() {
    let transport = Arc::new(Scripted::new(vec![("", estimate_reply(52.0))]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let entries = vec![CatalogEntry::new("1", "Apple"), CatalogEntry::new("2", "Pear")];
    let output = ingestor.estimate_batch(&entries, &cancel).await;

    assert_eq!(output.succeeded, 0);
    assert_eq!(output.failed, 2);
    assert!(transport.calls().is_empty());
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_tally_counts_mixed_failures() {
    let transport = Arc::new(Scripted::new(vec![
        (
            "Dragonfruit",
            Err(TransportError::RateLimited {
                provider: "scripted".into(),
            }),
        ),
        ("Mystery", Ok("no idea".to_string())),
        ("", estimate_reply(250.0)),
    ]));
    let ingestor = Ingestor::new(transport, IngestConfig::default());
    let entries = vec![
        CatalogEntry::new("1", "Rye bread"),
        CatalogEntry::new("2", "Dragonfruit"),
        CatalogEntry::new("3", "Mystery"),
        CatalogEntry::new("4", "Oat milk"),
    ];

    let output = ingestor.estimate_batch(&entries, &CancelToken::new()).await;

    assert_eq!(output.total(), 4);
    assert_eq!(output.succeeded, 2);
    assert_eq!(output.failed, 2);
    let indices: Vec<usize> = output.items.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let records: Vec<_> = output.records().collect();
    assert_eq!(records[0].food_name.as_deref(), Some("Rye bread"));
    assert_eq!(records[0].serving_grams, 100.0);
    assert_eq!(records[1].nutrition.calories, 250.0);

    let errors: Vec<_> = output.errors().collect();
    assert_eq!(errors[0].label, "Dragonfruit");
    assert!(errors[0].detail.contains("rate limit"));
    assert_eq!(errors[1].label, "Mystery");
}

#[tokio::test]
async fn missing_input_fails_only_its_own_item() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("receipt.png");
    DynamicImage::new_rgb8(300, 500)
        .save_with_format(&good, ImageFormat::Png)
        .unwrap();
    let missing = dir.path().join("missing.png");

    let transport = Arc::new(Scripted::new(vec![(
        "",
        Ok(r#"{"items":[{"name":"Tea","price":3}]}"#.to_string()),
    )]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default());
    let inputs = vec![
        missing.display().to_string(),
        good.display().to_string(),
    ];

    let output = ingestor
        .receipts_from_inputs(&inputs, &CancelToken::new())
        .await;

    assert_eq!((output.succeeded, output.failed), (1, 1));
    assert!(output.items[0].outcome.is_err());
    assert_eq!(output.items[1].outcome.as_ref().unwrap().items[0].name, "Tea");
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn progress_callback_sees_every_item_once() {
    let counting = Arc::new(Counting::default());
    let config = IngestConfig::builder()
        .concurrency(3)
        .progress_callback(counting.clone() as Arc<dyn IngestProgressCallback>)
        .build()
        .unwrap();
    let transport = Arc::new(Scripted::new(vec![
        ("Broken", Err(TransportError::Network { detail: "reset".into() })),
        ("", estimate_reply(10.0)),
    ]));
    let ingestor = Ingestor::new(transport, config);
    let entries: Vec<CatalogEntry> = ["Apple", "Broken", "Carrot", "Date", "Egg"]
        .iter()
        .enumerate()
        .map(|(i, n)| CatalogEntry::new(i.to_string(), *n))
        .collect();

    let output = ingestor.estimate_batch(&entries, &CancelToken::new()).await;

    assert_eq!(counting.batches.load(Ordering::SeqCst), 1);
    assert_eq!(counting.started.load(Ordering::SeqCst), 5);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 4);
    assert_eq!(counting.failed.load(Ordering::SeqCst), 1);
    assert_eq!(counting.succeeded_reported.load(Ordering::SeqCst), output.succeeded);
}

// ── Matching ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_match_skips_the_model() {
    let transport = Arc::new(Scripted::new(vec![]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default());
    let catalog = vec![CatalogEntry::new("b", "Bananas"), CatalogEntry::new("m", "Milk")];

    let result = ingestor
        .match_food("ORG BANANAS", &catalog, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.entry_id.as_deref(), Some("b"));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn remote_match_falls_back_and_checks_the_catalog() {
    let transport = Arc::new(Scripted::new(vec![(
        "",
        Ok(r#"{"foodName":"whole milk","confidence":"0.8","isNewFood":"false"}"#.to_string()),
    )]));
    let ingestor = Ingestor::new(transport.clone(), IngestConfig::default());
    let catalog = vec![CatalogEntry::new("m", "Whole Milk"), CatalogEntry::new("t", "Tea")];

    let result = ingestor
        .match_food("VOLLMILCH 3.5%", &catalog, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(transport.calls().len(), 1);
    assert_eq!(result.entry_id.as_deref(), Some("m"));
    assert_eq!(result.food_name.as_deref(), Some("Whole Milk"));
    assert!((result.confidence - 0.8).abs() < 1e-9);
}
