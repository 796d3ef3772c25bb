//! Nutrition scaling and aggregation.
//!
//! Every [`NutritionFacts`] value in this crate is per 100 g. Before two
//! records can be added they must be scaled to the mass actually bought or
//! eaten; [`scale`] does that and [`sum`] adds the results field by field.
//! [`summarize`] runs both over a collection of line items and attaches a
//! day count for averaging.
//!
//! Nothing here fails: missing nutrition contributes zero, and an empty
//! collection yields an all-zero summary.

use crate::records::NutritionFacts;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Scale a per-100 g record to `grams` of product.
pub fn scale(record: &NutritionFacts, grams: f64) -> NutritionFacts {
    let factor = grams / 100.0;
    record.map(|v| v * factor)
}

/// Field-wise sum; the empty sum is the all-zero record.
pub fn sum<I>(records: I) -> NutritionFacts
where
    I: IntoIterator<Item = NutritionFacts>,
{
    records.into_iter().sum()
}

impl Add for NutritionFacts {
    type Output = NutritionFacts;

    fn add(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl AddAssign for NutritionFacts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for NutritionFacts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(NutritionFacts::zero(), Add::add)
    }
}

impl<'a> Sum<&'a NutritionFacts> for NutritionFacts {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// ── Summaries ────────────────────────────────────────────────────────────

/// Something that was bought or eaten: a trip line item, a meal line item.
pub trait LineItem {
    /// Mass in grams.
    fn grams(&self) -> f64;

    /// Per-100 g nutrition of the linked catalog entry, if any.
    fn nutrition_per_100g(&self) -> Option<&NutritionFacts>;

    /// Day the item was bought or eaten.
    fn recorded_on(&self) -> NaiveDate;

    /// The user marked this item as not to be counted.
    fn is_skipped(&self) -> bool {
        false
    }

    /// The linked catalog entry is flagged "excluded".
    fn is_excluded(&self) -> bool {
        false
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range covering both dates, whichever order they are given in.
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Number of days in the range, counting both ends. Never below 1.
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).num_days().max(0) + 1;
        u32::try_from(span).unwrap_or(u32::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Totals over a filtered collection, with the day count used for averages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionSummary {
    pub totals: NutritionFacts,
    /// 0 only when no range was given and nothing passed the filters.
    pub day_count: u32,
    /// Items that passed the filters.
    pub item_count: usize,
    /// Of those, items that had nutrition to contribute.
    pub items_with_nutrition: usize,
}

impl NutritionSummary {
    /// Totals divided by the day count; all zeros when the day count is 0.
    pub fn daily_average(&self) -> NutritionFacts {
        if self.day_count == 0 {
            return NutritionFacts::zero();
        }
        let days = f64::from(self.day_count);
        self.totals.map(|v| v / days)
    }
}

/// Sum the scaled nutrition of every qualifying item.
///
/// Items are dropped when skipped, when `exclude_flagged` is set and the
/// item is excluded, or when `range` is given and the item's day falls
/// outside it. Items without nutrition still count towards the day span but
/// add nothing to the totals.
pub fn summarize<T: LineItem>(
    items: &[T],
    range: Option<DateRange>,
    exclude_flagged: bool,
) -> NutritionSummary {
    let kept: Vec<&T> = items
        .iter()
        .filter(|item| !item.is_skipped())
        .filter(|item| !(exclude_flagged && item.is_excluded()))
        .filter(|item| range.map_or(true, |r| r.contains(item.recorded_on())))
        .collect();

    let scaled: Vec<NutritionFacts> = kept
        .iter()
        .filter_map(|item| {
            item.nutrition_per_100g()
                .map(|facts| scale(facts, item.grams()))
        })
        .collect();

    let day_count = match range {
        Some(r) => r.days(),
        None => {
            let first = kept.iter().map(|i| i.recorded_on()).min();
            let last = kept.iter().map(|i| i.recorded_on()).max();
            match (first, last) {
                (Some(first), Some(last)) => DateRange::new(first, last).days(),
                _ => 0,
            }
        }
    };

    NutritionSummary {
        totals: sum(scaled.iter().copied()),
        day_count,
        item_count: kept.len(),
        items_with_nutrition: scaled.len(),
    }
}

/// Plain line item, e.g. as read from a JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryItem {
    #[serde(default)]
    pub name: Option<String>,
    pub grams: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub nutrition: Option<NutritionFacts>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub excluded: bool,
}

impl LineItem for SummaryItem {
    fn grams(&self) -> f64 {
        self.grams
    }

    fn nutrition_per_100g(&self) -> Option<&NutritionFacts> {
        self.nutrition.as_ref()
    }

    fn recorded_on(&self) -> NaiveDate {
        self.date
    }

    fn is_skipped(&self) -> bool {
        self.skipped
    }

    fn is_excluded(&self) -> bool {
        self.excluded
    }
}
