//! Ingestion entry points: the pipeline orchestrator.
//!
//! An [`Ingestor`] owns one [`GenerationTransport`], an optional
//! [`TextRecognizer`] and an [`IngestConfig`]. Each single-item method runs
//!
//! ```text
//! (image) ─▶ text extraction ─▶ prompt ─▶ transport ─▶ normalise ─▶ record
//! ```
//!
//! and returns `Err(IngestError)` on the first failure. Batch methods
//! attempt every item independently, never abort early, and report a
//! succeeded/failed tally in [`BatchOutput`].
//!
//! Every method takes a [`CancelToken`]. It is checked before the
//! transport call and raced against it; a cancelled call returns
//! `TransportError::Cancelled` and produces no record.

use crate::cancel::CancelToken;
use crate::config::IngestConfig;
use crate::error::{IngestError, ItemError, TransportError};
use crate::pipeline::segment::{augment_prompt, TesseractRecognizer, TextExtractor, TextRecognizer};
use crate::pipeline::transport::{GenerationRequest, GenerationTransport, LlmTransport};
use crate::pipeline::{encode, input, normalize, resolve};
use crate::prompts::{build_prompt, PromptTask};
use crate::records::{
    CatalogEntry, EstimatedNutrition, ExtractedNutritionRecord, ExtractedReceipt, MatchResult,
};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

// ── Batch output ─────────────────────────────────────────────────────────

/// Outcome of one batch item.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem<T> {
    /// 0-based position in the batch input.
    pub index: usize,
    pub label: String,
    pub outcome: Result<T, ItemError>,
}

/// Every item of a batch, in input order, with the final tally.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput<T> {
    pub items: Vec<BatchItem<T>>,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T> BatchOutput<T> {
    fn from_items(mut items: Vec<BatchItem<T>>) -> Self {
        items.sort_by_key(|i| i.index);
        let succeeded = items.iter().filter(|i| i.outcome.is_ok()).count();
        let failed = items.len() - succeeded;
        Self {
            items,
            succeeded,
            failed,
        }
    }

    /// Successful records, in input order.
    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter_map(|i| i.outcome.as_ref().ok())
    }

    /// Failures, in input order.
    pub fn errors(&self) -> impl Iterator<Item = &ItemError> {
        self.items.iter().filter_map(|i| i.outcome.as_ref().err())
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

// ── Ingestor ─────────────────────────────────────────────────────────────

/// Runs ingestion tasks against one transport.
pub struct Ingestor {
    transport: Arc<dyn GenerationTransport>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    config: IngestConfig,
}

impl Ingestor {
    /// Ingestor over an explicit transport, without text recognition.
    pub fn new(transport: Arc<dyn GenerationTransport>, config: IngestConfig) -> Self {
        Self {
            transport,
            recognizer: None,
            config,
        }
    }

    /// Recognise text in images before sending them to the model.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Send images to the model without recognised text.
    pub fn without_recognizer(mut self) -> Self {
        self.recognizer = None;
        self
    }

    /// Ingestor over the configured LLM provider.
    ///
    /// Uses `tesseract` for text recognition when it is installed.
    pub async fn from_config(config: IngestConfig) -> Result<Self, IngestError> {
        let (provider, name) = resolve_provider(&config).await?;
        let transport = LlmTransport::new(provider, name)
            .with_temperature(config.temperature)
            .with_timeout(Duration::from_secs(config.api_timeout_secs));

        let mut ingestor = Self::new(Arc::new(transport), config);
        if TesseractRecognizer::is_available() {
            let recognizer = TesseractRecognizer::new(ingestor.config.ocr_language.clone());
            ingestor = ingestor.with_recognizer(Arc::new(recognizer));
        } else {
            warn!("tesseract not found; images are sent without recognised text");
        }
        Ok(ingestor)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    // ── Receipts ─────────────────────────────────────────────────────────

    /// Extract a receipt from a photo.
    ///
    /// Recognised text (if any) is appended to the prompt and the image is
    /// attached, so the model can cross-check one against the other.
    pub async fn receipt_from_image(
        &self,
        image: &DynamicImage,
        cancel: &CancelToken,
    ) -> Result<ExtractedReceipt, IngestError> {
        let prompt = build_prompt(&PromptTask::ReceiptImage);
        let prompt = match self.extract_text(image).await? {
            Some(text) => augment_prompt(&prompt, &text),
            None => prompt,
        };
        let raw = self.generate_with_image(prompt, image, cancel).await?;
        normalize::parse_receipt(&raw)
    }

    /// Extract a receipt from typed or pasted text. No text recognition runs.
    pub async fn receipt_from_text(
        &self,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<ExtractedReceipt, IngestError> {
        if text.trim().is_empty() {
            return Err(IngestError::InvalidInput {
                input: "<empty receipt text>".to_string(),
            });
        }
        let prompt = build_prompt(&PromptTask::ReceiptText {
            text: text.to_string(),
        });
        let raw = self
            .generate(GenerationRequest::new(prompt, self.config.max_tokens), cancel)
            .await?;
        normalize::parse_receipt(&raw)
    }

    /// Resolve every item of `receipt` against `catalog` with the configured threshold.
    pub fn link_receipt(
        &self,
        receipt: &mut ExtractedReceipt,
        catalog: &[CatalogEntry],
    ) -> Vec<MatchResult> {
        resolve::link_receipt(receipt, catalog, self.config.match_threshold)
    }

    // ── Nutrition ────────────────────────────────────────────────────────

    /// Read a nutrition-facts label photo.
    pub async fn nutrition_from_label(
        &self,
        image: &DynamicImage,
        cancel: &CancelToken,
    ) -> Result<ExtractedNutritionRecord, IngestError> {
        let prompt = build_prompt(&PromptTask::NutritionLabel);
        let prompt = match self.extract_text(image).await? {
            Some(text) => augment_prompt(&prompt, &text),
            None => prompt,
        };
        let raw = self.generate_with_image(prompt, image, cancel).await?;
        normalize::parse_nutrition_label(&raw)
    }

    /// Estimate nutrition for a food from its name alone.
    pub async fn estimate_nutrition(
        &self,
        food_name: &str,
        cancel: &CancelToken,
    ) -> Result<EstimatedNutrition, IngestError> {
        if food_name.trim().is_empty() {
            return Err(IngestError::InvalidInput {
                input: "<empty food name>".to_string(),
            });
        }
        let prompt = build_prompt(&PromptTask::EstimateNutrition {
            food_name: food_name.to_string(),
        });
        let raw = self
            .generate(GenerationRequest::new(prompt, self.config.max_tokens), cancel)
            .await?;
        let mut estimate = normalize::parse_nutrition_estimate(&raw)?;
        if estimate.food_name.is_none() {
            estimate.food_name = Some(food_name.trim().to_string());
        }
        Ok(estimate)
    }

    // ── Matching ─────────────────────────────────────────────────────────

    /// Local containment match with the configured threshold. No I/O.
    pub fn resolve_local(&self, candidate: &str, catalog: &[CatalogEntry]) -> MatchResult {
        resolve::resolve_with_threshold(candidate, catalog, self.config.match_threshold)
    }

    /// Ask the model which catalog entry `candidate` names.
    pub async fn match_food_remote(
        &self,
        candidate: &str,
        catalog: &[CatalogEntry],
        cancel: &CancelToken,
    ) -> Result<MatchResult, IngestError> {
        let prompt = build_prompt(&PromptTask::MatchFood {
            candidate: candidate.to_string(),
            catalog_names: catalog.iter().map(|e| e.name.clone()).collect(),
        });
        let raw = self
            .generate(GenerationRequest::new(prompt, self.config.max_tokens), cancel)
            .await?;
        normalize::parse_food_match(&raw, catalog)
    }

    /// Local match first; the model is only asked when that finds nothing.
    pub async fn match_food(
        &self,
        candidate: &str,
        catalog: &[CatalogEntry],
        cancel: &CancelToken,
    ) -> Result<MatchResult, IngestError> {
        let local = self.resolve_local(candidate, catalog);
        if local.is_match() || catalog.is_empty() || candidate.trim().is_empty() {
            return Ok(local);
        }
        debug!("No local match for '{}', asking {}", candidate, self.transport.name());
        self.match_food_remote(candidate, catalog, cancel).await
    }

    // ── Text recognition ─────────────────────────────────────────────────

    /// Recognised text of `image` on its own.
    pub async fn recognize_text(&self, image: &DynamicImage) -> Result<String, IngestError> {
        self.extract_text(image)
            .await?
            .ok_or(IngestError::NoTextRecognized)
    }

    // ── Batches ──────────────────────────────────────────────────────────

    /// Extract receipts from several image paths or URLs.
    pub async fn receipts_from_inputs(
        &self,
        inputs: &[String],
        cancel: &CancelToken,
    ) -> BatchOutput<ExtractedReceipt> {
        self.run_batch(inputs.to_vec(), |index| async move {
            let image = input::load_image(&inputs[index], self.config.download_timeout_secs).await?;
            self.receipt_from_image(&image, cancel).await
        })
        .await
    }

    /// Estimate nutrition for many catalog entries.
    pub async fn estimate_batch(
        &self,
        entries: &[CatalogEntry],
        cancel: &CancelToken,
    ) -> BatchOutput<EstimatedNutrition> {
        let labels = entries.iter().map(|e| e.name.clone()).collect();
        self.run_batch(labels, |index| async move {
            self.estimate_nutrition(&entries[index].name, cancel).await
        })
        .await
    }

    async fn run_batch<T, F, Fut>(&self, labels: Vec<String>, run: F) -> BatchOutput<T>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let total = labels.len();
        let start = Instant::now();
        let cb = self.config.progress_callback.clone();
        if let Some(ref cb) = cb {
            cb.on_batch_start(total);
        }

        let items: Vec<BatchItem<T>> = stream::iter(labels.into_iter().enumerate().map(
            |(index, label)| {
                let cb = cb.clone();
                let fut = run(index);
                async move {
                    if let Some(ref cb) = cb {
                        cb.on_item_start(index, total, &label);
                    }
                    let outcome = fut.await.map_err(|e| {
                        warn!("Item {} ({}) failed: {}", index, label, e);
                        ItemError {
                            index,
                            label: label.clone(),
                            detail: e.to_string(),
                        }
                    });
                    if let Some(ref cb) = cb {
                        match &outcome {
                            Ok(_) => cb.on_item_complete(index, total),
                            Err(e) => cb.on_item_error(index, total, &e.detail),
                        }
                    }
                    BatchItem {
                        index,
                        label,
                        outcome,
                    }
                }
            },
        ))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        let output = BatchOutput::from_items(items);
        info!(
            "Batch complete: {}/{} succeeded, {} failed, {:?}",
            output.succeeded,
            total,
            output.failed,
            start.elapsed()
        );
        if let Some(ref cb) = cb {
            cb.on_batch_complete(total, output.succeeded);
        }
        output
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Segment-and-dedup extraction on a blocking thread.
    async fn extract_text(&self, image: &DynamicImage) -> Result<Option<String>, IngestError> {
        let Some(recognizer) = self.recognizer.clone() else {
            return Ok(None);
        };
        let image = image.clone();
        let segmentation = self.config.segmentation;
        tokio::task::spawn_blocking(move || {
            TextExtractor::new(&*recognizer, segmentation).extract(&image)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("text recognition task failed: {e}")))
    }

    async fn generate_with_image(
        &self,
        prompt: String,
        image: &DynamicImage,
        cancel: &CancelToken,
    ) -> Result<String, IngestError> {
        let attachment = encode::encode_attachment(image, self.config.max_attachment_pixels)
            .map_err(|e| IngestError::ImageDecode {
                input: "<attachment>".to_string(),
                detail: e.to_string(),
            })?;
        let request =
            GenerationRequest::new(prompt, self.config.max_tokens).with_attachment(attachment);
        self.generate(request, cancel).await
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<String, IngestError> {
        debug!(
            "{}: sending {} prompt chars{}",
            self.transport.name(),
            request.prompt.len(),
            if request.attachment.is_some() { " + image" } else { "" }
        );
        let raw = cancel
            .run(self.transport.generate(request))
            .await
            .ok_or(TransportError::Cancelled)??;
        Ok(raw)
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Extract a receipt from an image path or URL with a one-off [`Ingestor`].
pub async fn ingest_receipt(
    input_str: impl AsRef<str>,
    config: &IngestConfig,
) -> Result<ExtractedReceipt, IngestError> {
    let input_str = input_str.as_ref();
    info!("Ingesting receipt: {}", input_str);
    let image = input::load_image(input_str, config.download_timeout_secs).await?;
    let ingestor = Ingestor::from_config(config.clone()).await?;
    ingestor
        .receipt_from_image(&image, &CancelToken::new())
        .await
}

/// Instantiate a named provider with the given model.
fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the API key is read from that provider's usual
///    environment variable.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`OPENAI_API_KEY`** present → OpenAI, so users with several keys get
///    a stable default.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
///
/// Returns the provider and the name it is logged under.
pub async fn resolve_provider(
    config: &IngestConfig,
) -> Result<(Arc<dyn LLMProvider>, String), IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_provider(name, model)?, name.clone()));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_provider(&prov, &model)?, prov));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok((create_provider("openai", model)?, "openai".to_string()));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}
