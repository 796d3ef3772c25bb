//! Response normalisation: raw model text → validated, typed record.
//!
//! ## Why is normalisation necessary?
//!
//! Even with a strict prompt, generative models routinely:
//!
//! - wrap the JSON in ` ```json ... ``` ` fences
//! - add a sentence of prose before or after it
//! - encode numbers as strings (`"20"`) and nulls as the string `"null"`
//! - invent enum values outside the allowed set
//!
//! This module strips the envelope (steps 1–3) and hands the decoded value
//! to a declarative [`Schema`] for field-level coercion (step 4). Any
//! failure is classified into a [`ParseFailure`] with a readable message
//! (step 5).
//!
//! ## Idempotence
//!
//! The canonical JSON produced by [`normalize`] is a fixed point: feeding
//! [`canonical_json`] of a normalised record back through [`normalize`]
//! yields an identical value, and therefore an identical typed record.

use crate::error::{IngestError, ParseFailure, ValidationFailure};
use crate::records::{
    CatalogEntry, EstimatedNutrition, ExtractedNutritionRecord, ExtractedReceipt, MatchResult,
};
use crate::schema::{self, Schema};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Normalise raw model output against `schema`, returning canonical JSON.
///
/// Steps:
/// 1. Trim surrounding whitespace
/// 2. Strip a leading and/or trailing markdown fence, then trim again
/// 3. Slice from the first `{`/`[` to the last `}`/`]`
/// 4. Decode and coerce field by field against the schema
pub fn normalize(raw: &str, schema: &Schema) -> Result<Value, ParseFailure> {
    let json_text = extract_json_span(raw)?;
    let value: Value = serde_json::from_str(json_text).map_err(|e| {
        debug!("JSON decode failed: {}", e);
        ParseFailure::Corrupt {
            detail: e.to_string(),
        }
    })?;
    schema.apply(&value)
}

/// Canonical re-serialisation of a normalised value.
pub fn canonical_json(value: &Value) -> String {
    // Serialising a `Value` cannot fail: all map keys are strings.
    serde_json::to_string(value).unwrap_or_default()
}

// ── Steps 1–3: envelope stripping ────────────────────────────────────────

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*\r?\n?").unwrap());

static RE_CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());

/// Strip a markdown fence at the start and/or end of the text.
pub fn strip_fences(input: &str) -> &str {
    let s = input.trim();
    let start = RE_OPENING_FENCE.find(s).map_or(0, |m| m.end());
    let rest = &s[start..];
    let end = RE_CLOSING_FENCE
        .find(rest)
        .map_or(rest.len(), |m| m.start());
    rest[..end].trim()
}

/// Locate the JSON span in the response: first `{`/`[` to last `}`/`]`.
pub fn extract_json_span(raw: &str) -> Result<&str, ParseFailure> {
    let s = strip_fences(raw);
    let start = s.find(['{', '[']).ok_or(ParseFailure::NoJson)?;
    let end = s.rfind(['}', ']']).ok_or(ParseFailure::NoJson)?;
    if end < start {
        return Err(ParseFailure::NoJson);
    }
    Ok(&s[start..=end])
}

// ── Typed entry points ───────────────────────────────────────────────────

fn decode<T: DeserializeOwned>(canonical: Value) -> Result<T, ParseFailure> {
    // The schema guarantees the shape; a failure here means the schema and
    // the record type disagree.
    serde_json::from_value(canonical).map_err(|e| ParseFailure::Corrupt {
        detail: format!("canonical record did not decode: {e}"),
    })
}

/// Parse a receipt-extraction response.
pub fn parse_receipt(raw: &str) -> Result<ExtractedReceipt, IngestError> {
    let receipt: ExtractedReceipt = decode(normalize(raw, &schema::RECEIPT)?)?;
    receipt.validate()?;
    debug!("Parsed receipt with {} items", receipt.items.len());
    Ok(receipt)
}

/// Parse a nutrition-label response (values per 100 g).
pub fn parse_nutrition_label(raw: &str) -> Result<ExtractedNutritionRecord, IngestError> {
    let record: ExtractedNutritionRecord = decode(normalize(raw, &schema::NUTRITION_LABEL)?)?;
    record.nutrition.validate()?;
    Ok(record)
}

/// Parse a nutrition-estimate response.
pub fn parse_nutrition_estimate(raw: &str) -> Result<EstimatedNutrition, IngestError> {
    let estimate: EstimatedNutrition = decode(normalize(raw, &schema::NUTRITION_ESTIMATE)?)?;
    estimate.nutrition.validate()?;
    crate::records::non_negative("servingGrams", estimate.serving_grams)?;
    Ok(estimate)
}

/// Parse a remote-matcher response into the same [`MatchResult`] shape the
/// local resolver produces.
///
/// The proposed name is looked up in `catalog` (case-insensitively). A name
/// the catalog does not contain cannot be linked, so it is reported as new
/// food with no match. A confidence outside `0..=1` is a validation failure.
pub fn parse_food_match(raw: &str, catalog: &[CatalogEntry]) -> Result<MatchResult, IngestError> {
    let result: MatchResult = decode(normalize(raw, &schema::FOOD_MATCH)?)?;
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err(ValidationFailure::OutOfRange {
            field: "confidence".into(),
            value: result.confidence,
            min: 0.0,
            max: 1.0,
        }
        .into());
    }

    if result.is_new_food {
        return Ok(MatchResult {
            confidence: result.confidence,
            ..MatchResult::no_match()
        });
    }

    let proposed = result.food_name.as_deref().map(super::resolve::normalize_name);
    let entry = proposed.and_then(|name| {
        catalog
            .iter()
            .find(|e| super::resolve::normalize_name(&e.name) == name)
    });

    Ok(match entry {
        Some(entry) => MatchResult::matched(entry, result.confidence),
        None => {
            debug!(
                "Remote matcher proposed {:?}, which is not in the catalog",
                result.food_name
            );
            MatchResult::no_match()
        }
    })
}
