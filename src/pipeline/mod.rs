//! Pipeline stages for receipt and nutrition-label ingestion.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ segment ──▶ (prompts) ──▶ transport ──▶ normalize ──▶ resolve
//! (path/URL)  (OCR)                    (LLM)         (schema)     (catalog)
//!     └──▶ encode ──────────────────────▲
//! ```
//!
//! 1. [`input`]     — load a local path or HTTP(S) URL and decode it
//! 2. [`segment`]   — split tall images into overlapping bands, recognise
//!    each, and dedup the overlap; strictly sequential
//! 3. [`encode`]    — PNG-encode the bitmap as a transport attachment
//! 4. [`transport`] — the only stage with network I/O; no retry
//! 5. [`normalize`] — tolerant JSON extraction and schema coercion
//! 6. [`resolve`]   — exact / containment matching against a catalog

pub mod encode;
pub mod input;
pub mod normalize;
pub mod resolve;
pub mod segment;
pub mod transport;
