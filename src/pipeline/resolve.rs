//! Local entity resolution: extracted item name → catalog entry.
//!
//! Two passes over the catalog snapshot:
//!
//! 1. **Exact**: normalised names equal → match with confidence 1.0. This
//!    always wins, whatever else the catalog contains.
//! 2. **Containment**: one normalised name contains the other → score is
//!    `len(shorter) / len(longer)`. The strictly best score wins (first seen
//!    on ties) and is accepted only at or above the threshold.
//!
//! Lengths are counted in `char`s so accented names score the same as
//! their ASCII spelling would.

use crate::records::{CatalogEntry, ExtractedReceipt, MatchResult};
use tracing::debug;

/// Minimum containment score accepted as a match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Lowercase and trim.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Containment score of two normalised names, or `None` when neither
/// contains the other.
pub fn containment_score(a: &str, b: &str) -> Option<f64> {
    if a.is_empty() || b.is_empty() || !(a.contains(b) || b.contains(a)) {
        return None;
    }
    let (la, lb) = (a.chars().count(), b.chars().count());
    Some(la.min(lb) as f64 / la.max(lb) as f64)
}

/// Resolve `candidate` against `catalog` with the default threshold.
pub fn resolve(candidate: &str, catalog: &[CatalogEntry]) -> MatchResult {
    resolve_with_threshold(candidate, catalog, DEFAULT_MATCH_THRESHOLD)
}

/// Resolve `candidate` against `catalog`, accepting containment matches
/// scoring at least `threshold`.
pub fn resolve_with_threshold(
    candidate: &str,
    catalog: &[CatalogEntry],
    threshold: f64,
) -> MatchResult {
    let needle = normalize_name(candidate);
    if needle.is_empty() {
        return MatchResult::no_match();
    }

    let normalized: Vec<String> = catalog.iter().map(|e| normalize_name(&e.name)).collect();

    if let Some(idx) = normalized.iter().position(|n| *n == needle) {
        debug!("'{}' matched '{}' exactly", candidate, catalog[idx].name);
        return MatchResult::matched(&catalog[idx], 1.0);
    }

    let mut best: Option<(usize, f64)> = None;
    for (idx, name) in normalized.iter().enumerate() {
        if let Some(score) = containment_score(&needle, name) {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
    }

    match best {
        Some((idx, score)) if score >= threshold => {
            debug!(
                "'{}' matched '{}' by containment ({:.2})",
                candidate, catalog[idx].name, score
            );
            MatchResult::matched(&catalog[idx], score)
        }
        Some((idx, score)) => {
            debug!(
                "'{}': best containment '{}' ({:.2}) below threshold {:.2}",
                candidate, catalog[idx].name, score, threshold
            );
            MatchResult::no_match()
        }
        None => MatchResult::no_match(),
    }
}

/// Resolve every item of `receipt` and record the matched entry id.
///
/// Items already linked are left alone. Returns one [`MatchResult`] per
/// item, in item order (already-linked items report their existing link
/// with confidence 1.0).
pub fn link_receipt(
    receipt: &mut ExtractedReceipt,
    catalog: &[CatalogEntry],
    threshold: f64,
) -> Vec<MatchResult> {
    receipt
        .items
        .iter_mut()
        .map(|item| {
            if let Some(existing) = item
                .linked_entry_id
                .as_deref()
                .and_then(|id| catalog.iter().find(|e| e.id == id))
            {
                return MatchResult::matched(existing, 1.0);
            }
            let result = resolve_with_threshold(&item.name, catalog, threshold);
            item.linked_entry_id = result.entry_id.clone();
            result
        })
        .collect()
}
