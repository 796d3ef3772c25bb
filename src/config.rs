//! Configuration types for receipt and nutrition ingestion.
//!
//! All ingestion behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Setters clamp obviously out-of-range values;
//! [`IngestConfigBuilder::build`] rejects combinations that cannot work.

use crate::error::IngestError;
use crate::pipeline::resolve::DEFAULT_MATCH_THRESHOLD;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How tall images are cut before text recognition.
///
/// The defaults were tuned on phone photos of single-column till receipts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Height of one band in pixels. Default: 4000.
    pub segment_height: u32,
    /// Pixels shared by consecutive bands. Must be below `segment_height`. Default: 200.
    pub overlap: u32,
    /// Images with `height / width` at or below this are recognised whole. Default: 3.0.
    pub aspect_ratio_threshold: f64,
    /// Most lines that can be dropped as overlap between two bands. Default: 10.
    pub max_overlap_lines: usize,
}

impl SegmentationConfig {
    /// Reject a zero band height or an overlap that would stall the band step.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.segment_height == 0 {
            return Err(IngestError::InvalidConfig(
                "Segment height must be ≥ 1".into(),
            ));
        }
        if self.overlap >= self.segment_height {
            return Err(IngestError::InvalidConfig(format!(
                "Segment overlap ({}) must be smaller than segment height ({})",
                self.overlap, self.segment_height
            )));
        }
        Ok(())
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segment_height: 4000,
            overlap: 200,
            aspect_ratio_threshold: 3.0,
            max_overlap_lines: 10,
        }
    }
}

/// Configuration for an [`crate::ingest::Ingestor`].
///
/// # Example
/// ```rust
/// use edgequake_receipts::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .model("gpt-4.1-mini")
///     .match_threshold(0.7)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Band layout for tall images.
    pub segmentation: SegmentationConfig,

    /// Minimum containment score for a local catalog match. Range: 0.0–1.0. Default: 0.6.
    pub match_threshold: f64,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription, not writing; low temperature keeps the
    /// model close to what is printed.
    pub temperature: f32,

    /// Response-size budget per call, in tokens. Default: 4096.
    ///
    /// A long grocery receipt with 60 lines needs roughly 3 000 output
    /// tokens of JSON.
    pub max_tokens: usize,

    /// Per-call timeout for the generation transport, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs, in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Longest edge of an image attachment, in pixels. Default: 2048.
    pub max_attachment_pixels: u32,

    /// Number of batch items processed at once. Default: 1.
    pub concurrency: usize,

    /// Tesseract language code(s), e.g. "eng" or "eng+deu". Default: "eng".
    pub ocr_language: String,

    /// Optional batch progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 120,
            download_timeout_secs: 60,
            max_attachment_pixels: 2048,
            concurrency: 1,
            ocr_language: "eng".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("segmentation", &self.segmentation)
            .field("match_threshold", &self.match_threshold)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_attachment_pixels", &self.max_attachment_pixels)
            .field("concurrency", &self.concurrency)
            .field("ocr_language", &self.ocr_language)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn segmentation(mut self, segmentation: SegmentationConfig) -> Self {
        self.config.segmentation = segmentation;
        self
    }

    pub fn segment_height(mut self, px: u32) -> Self {
        self.config.segmentation.segment_height = px.max(1);
        self
    }

    pub fn segment_overlap(mut self, px: u32) -> Self {
        self.config.segmentation.overlap = px;
        self
    }

    pub fn aspect_ratio_threshold(mut self, ratio: f64) -> Self {
        self.config.segmentation.aspect_ratio_threshold = ratio.max(0.0);
        self
    }

    pub fn max_overlap_lines(mut self, n: usize) -> Self {
        self.config.segmentation.max_overlap_lines = n;
        self
    }

    pub fn match_threshold(mut self, threshold: f64) -> Self {
        self.config.match_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_attachment_pixels(mut self, px: u32) -> Self {
        self.config.max_attachment_pixels = px.max(64);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        c.segmentation.validate()?;
        if !(0.0..=1.0).contains(&c.match_threshold) {
            return Err(IngestError::InvalidConfig(format!(
                "Match threshold must be 0.0–1.0, got {}",
                c.match_threshold
            )));
        }
        if c.max_tokens == 0 {
            return Err(IngestError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
