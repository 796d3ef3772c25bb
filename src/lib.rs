//! # edgequake-receipts
//!
//! Turn photographed or typed grocery receipts and nutrition labels into
//! typed records, using text recognition and an LLM.
//!
//! ## Why this crate?
//!
//! Both halves of the job are unreliable. Text recognisers lose their
//! grip on very tall receipt photos, and LLMs return JSON that is fenced,
//! wrapped in prose, stringly-typed or spells `null` as `"null"`. This
//! crate puts a deterministic layer around each:
//!
//! - tall images are cut into overlapping bands and the repeated lines at
//!   each cut are removed ([`pipeline::segment`])
//! - model output is normalised through a declared schema with an explicit
//!   coercion table ([`pipeline::normalize`], [`schema`])
//! - extracted item names are matched against a known catalog
//!   ([`pipeline::resolve`])
//! - nutrition values are scaled and summed ([`nutrition`])
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo / text
//!  │
//!  ├─ 1. Input      local file or URL → bitmap
//!  ├─ 2. Segment    tall bitmap → overlapping bands → OCR → dedup
//!  ├─ 3. Prompt     task → opaque prompt text
//!  ├─ 4. Transport  gpt-4.1-nano / claude / gemini / … (no retry)
//!  ├─ 5. Normalise  fences, prose, "20" → 20.0, "null" → null
//!  └─ 6. Resolve    exact / containment match against the catalog
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_receipts::{CancelToken, IngestConfig, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let ingestor = Ingestor::from_config(IngestConfig::default()).await?;
//!     let receipt = ingestor
//!         .receipt_from_text("MILK 1L 1.29\nEGGS 12 2.49", &CancelToken::new())
//!         .await?;
//!     println!("{} items, {:.2} total", receipt.items.len(), receipt.total_price());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipts` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod ingest;
pub mod nutrition;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod records;
pub mod review;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use config::{IngestConfig, IngestConfigBuilder, SegmentationConfig};
pub use error::{IngestError, ItemError, ParseFailure, TransportError, ValidationFailure};
pub use ingest::{ingest_receipt, BatchItem, BatchOutput, Ingestor};
pub use nutrition::{scale, sum, summarize, DateRange, LineItem, NutritionSummary, SummaryItem};
pub use pipeline::normalize::normalize;
pub use pipeline::resolve::{link_receipt, resolve, resolve_with_threshold};
pub use pipeline::segment::{TesseractRecognizer, TextExtractor, TextRecognizer};
pub use pipeline::transport::{Attachment, GenerationRequest, GenerationTransport, LlmTransport};
pub use progress::{IngestProgressCallback, NoopProgressCallback};
pub use prompts::{build_prompt, PromptTask};
pub use records::{
    CatalogEntry, Category, EstimatedNutrition, ExtractedNutritionRecord, ExtractedReceipt,
    ExtractedReceiptItem, MatchResult, NutritionFacts, Subcategory,
};
pub use review::{ReceiptReview, RecordSink};
pub use schema::Schema;
