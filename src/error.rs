//! Error types for the edgequake-receipts library.
//!
//! The taxonomy mirrors the two places an ingestion can go wrong:
//!
//! * [`IngestError`] — **Fatal** for one ingestion call: the transport
//!   failed, the response could not be normalised, or a decoded value
//!   broke a domain invariant. Returned as `Err(IngestError)` from every
//!   single-item entry point in [`crate::ingest`].
//!
//! * [`ItemError`] — **Non-fatal** inside a batch: one photo or one catalog
//!   entry failed but the rest of the batch carries on. Stored in
//!   [`crate::ingest::BatchItem`] and counted in the final tally.
//!
//! A resolver that finds nothing above its threshold is not an error at
//! all; it returns [`crate::records::MatchResult::no_match`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-receipts library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The text-generation transport failed (auth, rate limit, network, ...).
    #[error("Extraction failed: {0}")]
    Extraction(#[from] TransportError),

    /// The model answered, but the answer could not be normalised.
    #[error("Could not read the model response: {0}")]
    Parse(#[from] ParseFailure),

    /// A decoded value violates a domain invariant.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationFailure),

    /// The text recogniser produced nothing for a text-only task.
    #[error("No text could be recognised in the image")]
    NoTextRecognized,

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a supported image.
    #[error("Could not decode image '{input}': {detail}")]
    ImageDecode { input: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// `true` when the call was abandoned through a [`crate::cancel::CancelToken`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Extraction(TransportError::Cancelled))
    }
}

/// Failures reported by a [`crate::pipeline::transport::GenerationTransport`].
///
/// None of these are retried automatically: every call may be billed, so a
/// retry is always an explicit re-invocation by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The provider rejected the API key (401/403).
    #[error("invalid credentials for provider '{provider}': {detail}")]
    InvalidCredentials { provider: String, detail: String },

    /// The provider returned HTTP 429.
    #[error("rate limit exceeded for provider '{provider}'")]
    RateLimited { provider: String },

    /// The request was rejected as malformed (400) or could not be built.
    #[error("malformed request: {detail}")]
    MalformedRequest { detail: String },

    /// Any other non-success status from the provider.
    #[error("upstream error (HTTP {status}): {detail}")]
    Upstream { status: u16, detail: String },

    /// The provider could not be reached at all.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// The call did not complete within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller cancelled before the response arrived.
    #[error("request cancelled")]
    Cancelled,
}

/// Why a model response could not be turned into a record.
///
/// Each variant renders a distinct message so interactive flows can show
/// the user exactly what the model got wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// Neither `{`/`[` nor a matching closing bracket was found.
    #[error("no JSON object/array found in the response")]
    NoJson,

    /// A required key is absent.
    #[error("missing required key '{field}'")]
    MissingKey { field: String },

    /// A value has the wrong JSON type and no coercion applies.
    #[error("type mismatch at '{path}': expected {expected}")]
    TypeMismatch { path: String, expected: String },

    /// A non-nullable value is `null` (or the string "null").
    #[error("unexpected null at '{path}'")]
    UnexpectedNull { path: String },

    /// The JSON text itself is broken.
    #[error("corrupt JSON: {detail}")]
    Corrupt { detail: String },
}

/// A decoded value that breaks a domain invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("'{field}' must not be negative (got {value})")]
    Negative { field: String, value: f64 },

    #[error("'{field}' must be a finite number (got {value})")]
    NotFinite { field: String, value: f64 },

    #[error("'{field}' must be within {min}–{max} (got {value})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("item name must not be empty")]
    EmptyName,

    #[error("subcategory '{subcategory}' does not belong to category '{category}'")]
    SubcategoryMismatch {
        category: String,
        subcategory: String,
    },

    #[error("item index {index} is out of range ({len} items)")]
    NoSuchItem { index: usize, len: usize },
}

/// A non-fatal failure of one item inside a batch.
///
/// Stored alongside the batch output; the batch continues regardless.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("Item {index} ({label}): {detail}")]
pub struct ItemError {
    /// 0-based position in the batch input.
    pub index: usize,
    /// Human label for the item (file name, food name, ...).
    pub label: String,
    /// Rendered cause.
    pub detail: String,
}
