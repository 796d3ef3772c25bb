//! Typed records produced by the ingestion pipeline.
//!
//! Every struct here is plain data: no I/O, no persistence hooks. The
//! normaliser in [`crate::pipeline::normalize`] is the only producer of
//! extracted records, and it guarantees that deserialising its canonical
//! JSON into these types cannot fail on shape.
//!
//! JSON keys are camelCase because that is what the prompts ask the model
//! for; the same shape is used when records are written back out.

use crate::error::ValidationFailure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Name used when the model returns an item without one.
pub const PLACEHOLDER_ITEM_NAME: &str = "Unknown item";

// ── Receipt ──────────────────────────────────────────────────────────────

/// A receipt as read by the model, before any human review.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedReceipt {
    #[serde(default)]
    pub store_name: Option<String>,
    /// Date as printed; see [`ExtractedReceipt::purchase_date`].
    #[serde(default)]
    pub date: Option<String>,
    /// Line items in receipt order. May be empty, never absent.
    #[serde(default)]
    pub items: Vec<ExtractedReceiptItem>,
}

impl ExtractedReceipt {
    /// Parse [`Self::date`] in any of the layouts commonly printed on receipts.
    ///
    /// Slash dates are read month-first (`03/04/2024` is March 4th).
    pub fn purchase_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_receipt_date)
    }

    /// Sum of all item prices.
    pub fn total_price(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }

    /// Sum of all item masses in grams.
    pub fn total_grams(&self) -> f64 {
        self.items.iter().map(|i| i.quantity_grams).sum()
    }

    /// Check every item against the domain invariants.
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        self.items.iter().try_for_each(ExtractedReceiptItem::validate)
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    // Short years before long ones, and both before "%Y/%m/%d": chrono's
    // "%Y" happily reads "24" or "03" as a year.
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d.%m.%y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
];

/// Parse a date string in one of the receipt layouts we have seen in the wild.
pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Some models append a time ("2024-03-04 18:22"); the date part is enough.
    let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        })
}

/// One purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedReceiptItem {
    pub name: String,
    /// Purchased mass in grams.
    #[serde(rename = "quantity", default)]
    pub quantity_grams: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<Subcategory>,
    /// Identity of the catalog entry this item was linked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_entry_id: Option<String>,
}

impl Default for ExtractedReceiptItem {
    fn default() -> Self {
        Self {
            name: PLACEHOLDER_ITEM_NAME.to_string(),
            quantity_grams: 0.0,
            price: 0.0,
            category: Category::Other,
            subcategory: None,
            linked_entry_id: None,
        }
    }
}

impl ExtractedReceiptItem {
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        if self.name.trim().is_empty() {
            return Err(ValidationFailure::EmptyName);
        }
        non_negative("quantity", self.quantity_grams)?;
        non_negative("price", self.price)?;
        if let Some(sub) = self.subcategory {
            if sub.category() != self.category {
                return Err(ValidationFailure::SubcategoryMismatch {
                    category: self.category.label().to_string(),
                    subcategory: sub.label().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Drop a subcategory that does not belong to the item's category.
    pub fn drop_foreign_subcategory(&mut self) {
        if self.subcategory.is_some_and(|s| s.category() != self.category) {
            self.subcategory = None;
        }
    }
}

pub(crate) fn non_negative(field: &str, value: f64) -> Result<(), ValidationFailure> {
    if !value.is_finite() {
        return Err(ValidationFailure::NotFinite {
            field: field.to_string(),
            value,
        });
    }
    if value < 0.0 {
        return Err(ValidationFailure::Negative {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

// ── Categories ───────────────────────────────────────────────────────────

/// Closed set of grocery categories. Unknown labels fall back to [`Category::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Produce,
    Dairy,
    Meat,
    Seafood,
    Bakery,
    Pantry,
    Frozen,
    Beverages,
    Snacks,
    Household,
    PersonalCare,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Produce,
        Category::Dairy,
        Category::Meat,
        Category::Seafood,
        Category::Bakery,
        Category::Pantry,
        Category::Frozen,
        Category::Beverages,
        Category::Snacks,
        Category::Household,
        Category::PersonalCare,
        Category::Other,
    ];

    pub const LABELS: [&'static str; 12] = [
        "produce",
        "dairy",
        "meat",
        "seafood",
        "bakery",
        "pantry",
        "frozen",
        "beverages",
        "snacks",
        "household",
        "personal_care",
        "other",
    ];

    pub fn label(self) -> &'static str {
        // ALL and LABELS are declared in the same order.
        let idx = Self::ALL.iter().position(|c| *c == self).unwrap_or(11);
        Self::LABELS[idx]
    }

    /// Case-insensitive lookup; spaces and dashes are treated as underscores.
    pub fn from_label(raw: &str) -> Option<Category> {
        let key = canonical_label(raw);
        Self::LABELS
            .iter()
            .position(|l| *l == key)
            .map(|idx| Self::ALL[idx])
    }

    /// Subcategories allowed under this category.
    pub fn subcategories(self) -> Vec<Subcategory> {
        Subcategory::ALL
            .iter()
            .copied()
            .filter(|s| s.category() == self)
            .collect()
    }
}

/// Finer-grained tag, only valid under its parent [`Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subcategory {
    Fruit,
    Vegetable,
    Herbs,
    Milk,
    Cheese,
    Yogurt,
    Butter,
    Eggs,
    Beef,
    Pork,
    Poultry,
    Deli,
    Fish,
    Shellfish,
    Bread,
    Pastry,
    Grains,
    Pasta,
    Canned,
    Condiments,
    Spices,
    Baking,
    Oils,
    FrozenMeals,
    IceCream,
    FrozenVegetables,
    Water,
    Soda,
    Juice,
    Coffee,
    Tea,
    Alcohol,
    Chips,
    Candy,
    Nuts,
    Cookies,
    Cleaning,
    Paper,
    Hygiene,
    Medicine,
}

impl Subcategory {
    pub const ALL: [Subcategory; 40] = [
        Subcategory::Fruit,
        Subcategory::Vegetable,
        Subcategory::Herbs,
        Subcategory::Milk,
        Subcategory::Cheese,
        Subcategory::Yogurt,
        Subcategory::Butter,
        Subcategory::Eggs,
        Subcategory::Beef,
        Subcategory::Pork,
        Subcategory::Poultry,
        Subcategory::Deli,
        Subcategory::Fish,
        Subcategory::Shellfish,
        Subcategory::Bread,
        Subcategory::Pastry,
        Subcategory::Grains,
        Subcategory::Pasta,
        Subcategory::Canned,
        Subcategory::Condiments,
        Subcategory::Spices,
        Subcategory::Baking,
        Subcategory::Oils,
        Subcategory::FrozenMeals,
        Subcategory::IceCream,
        Subcategory::FrozenVegetables,
        Subcategory::Water,
        Subcategory::Soda,
        Subcategory::Juice,
        Subcategory::Coffee,
        Subcategory::Tea,
        Subcategory::Alcohol,
        Subcategory::Chips,
        Subcategory::Candy,
        Subcategory::Nuts,
        Subcategory::Cookies,
        Subcategory::Cleaning,
        Subcategory::Paper,
        Subcategory::Hygiene,
        Subcategory::Medicine,
    ];

    pub const LABELS: [&'static str; 40] = [
        "fruit",
        "vegetable",
        "herbs",
        "milk",
        "cheese",
        "yogurt",
        "butter",
        "eggs",
        "beef",
        "pork",
        "poultry",
        "deli",
        "fish",
        "shellfish",
        "bread",
        "pastry",
        "grains",
        "pasta",
        "canned",
        "condiments",
        "spices",
        "baking",
        "oils",
        "frozen_meals",
        "ice_cream",
        "frozen_vegetables",
        "water",
        "soda",
        "juice",
        "coffee",
        "tea",
        "alcohol",
        "chips",
        "candy",
        "nuts",
        "cookies",
        "cleaning",
        "paper",
        "hygiene",
        "medicine",
    ];

    pub fn label(self) -> &'static str {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        Self::LABELS[idx]
    }

    pub fn from_label(raw: &str) -> Option<Subcategory> {
        let key = canonical_label(raw);
        Self::LABELS
            .iter()
            .position(|l| *l == key)
            .map(|idx| Self::ALL[idx])
    }

    pub fn category(self) -> Category {
        use Subcategory::*;
        match self {
            Fruit | Vegetable | Herbs => Category::Produce,
            Milk | Cheese | Yogurt | Butter | Eggs => Category::Dairy,
            Beef | Pork | Poultry | Deli => Category::Meat,
            Fish | Shellfish => Category::Seafood,
            Bread | Pastry => Category::Bakery,
            Grains | Pasta | Canned | Condiments | Spices | Baking | Oils => Category::Pantry,
            FrozenMeals | IceCream | FrozenVegetables => Category::Frozen,
            Water | Soda | Juice | Coffee | Tea | Alcohol => Category::Beverages,
            Chips | Candy | Nuts | Cookies => Category::Snacks,
            Cleaning | Paper => Category::Household,
            Hygiene | Medicine => Category::PersonalCare,
        }
    }
}

fn canonical_label(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

// ── Nutrition ────────────────────────────────────────────────────────────

macro_rules! nutrition_facts {
    ($( $(#[$doc:meta])* $field:ident => $key:literal ),+ $(,)?) => {
        /// Nutrient amounts, every field per 100 g of product.
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        pub struct NutritionFacts {
            $(
                $(#[$doc])*
                #[serde(rename = $key, default)]
                pub $field: f64,
            )+
        }

        impl NutritionFacts {
            /// JSON keys, in declaration order.
            pub const KEYS: &'static [&'static str] = &[$($key),+];

            /// Apply `f` to every field.
            pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
                Self { $($field: f(self.$field)),+ }
            }

            /// Combine two records field by field.
            pub fn zip_with(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
                Self { $($field: f(self.$field, other.$field)),+ }
            }

            /// `(key, value)` pairs in declaration order.
            pub fn entries(&self) -> Vec<(&'static str, f64)> {
                vec![$(($key, self.$field)),+]
            }
        }
    };
}

nutrition_facts! {
    /// kcal
    calories => "calories",
    /// g
    protein => "protein",
    /// g
    carbohydrates => "carbohydrates",
    /// g
    fat => "fat",
    /// g
    saturated_fat => "saturatedFat",
    /// g
    trans_fat => "transFat",
    /// g
    fiber => "fiber",
    /// g
    sugar => "sugar",
    /// mg
    sodium => "sodium",
    /// mg
    cholesterol => "cholesterol",
    /// mg
    potassium => "potassium",
    /// mg
    calcium => "calcium",
    /// mg
    iron => "iron",
    /// µg
    vitamin_a => "vitaminA",
    /// mg
    vitamin_c => "vitaminC",
    /// µg
    vitamin_d => "vitaminD",
}

impl NutritionFacts {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.entries().iter().all(|(_, v)| *v == 0.0)
    }

    /// Check every field is finite and non-negative.
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        self.entries()
            .into_iter()
            .try_for_each(|(key, value)| non_negative(key, value))
    }
}

/// A nutrition label as read by the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedNutritionRecord {
    /// Product name when the label shows one.
    #[serde(default)]
    pub food_name: Option<String>,
    #[serde(flatten)]
    pub nutrition: NutritionFacts,
}

/// Model estimate of a food's nutrition from its name alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedNutrition {
    #[serde(default)]
    pub food_name: Option<String>,
    /// Typical serving in grams; 100 when the model does not say.
    pub serving_grams: f64,
    #[serde(flatten)]
    pub nutrition: NutritionFacts,
}

// ── Catalog & matching ───────────────────────────────────────────────────

/// A previously known food, read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Outcome of matching a name against the catalog, local or remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Matched catalog name; `None` means no confident match.
    #[serde(default)]
    pub food_name: Option<String>,
    /// Identity of the matched catalog entry, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub is_new_food: bool,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            food_name: None,
            entry_id: None,
            confidence: 0.0,
            is_new_food: true,
        }
    }

    pub fn matched(entry: &CatalogEntry, confidence: f64) -> Self {
        Self {
            food_name: Some(entry.name.clone()),
            entry_id: Some(entry.id.clone()),
            confidence: confidence.clamp(0.0, 1.0),
            is_new_food: false,
        }
    }

    pub fn is_match(&self) -> bool {
        self.food_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_lookup_is_lenient() {
        assert_eq!(Category::from_label("Dairy"), Some(Category::Dairy));
        assert_eq!(
            Category::from_label(" personal care "),
            Some(Category::PersonalCare)
        );
        assert_eq!(Category::from_label("electronics"), None);
        assert_eq!(Category::PersonalCare.label(), "personal_care");
    }

    #[test]
    fn every_subcategory_has_a_label_and_parent() {
        for sub in Subcategory::ALL {
            assert_eq!(Subcategory::from_label(sub.label()), Some(sub));
            assert!(sub.category().subcategories().contains(&sub));
        }
        assert!(Category::Other.subcategories().is_empty());
    }

    #[test]
    fn item_validation() {
        let mut item = ExtractedReceiptItem {
            name: "Milk".into(),
            quantity_grams: 1000.0,
            price: 1.29,
            category: Category::Dairy,
            subcategory: Some(Subcategory::Milk),
            linked_entry_id: None,
        };
        assert!(item.validate().is_ok());

        item.price = -1.0;
        assert!(matches!(
            item.validate(),
            Err(ValidationFailure::Negative { .. })
        ));

        item.price = 1.0;
        item.subcategory = Some(Subcategory::Beef);
        assert!(matches!(
            item.validate(),
            Err(ValidationFailure::SubcategoryMismatch { .. })
        ));
        item.drop_foreign_subcategory();
        assert_eq!(item.subcategory, None);
    }

    #[test]
    fn receipt_dates_in_several_layouts() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        for raw in [
            "2024-03-04",
            "2024/03/04",
            "03/04/2024",
            "03/04/24",
            "04.03.2024",
            "Mar 04, 2024",
            "March 4, 2024",
            "2024-03-04 18:22",
        ] {
            assert_eq!(parse_receipt_date(raw), Some(d), "layout {raw}");
        }
        assert_eq!(parse_receipt_date("yesterday"), None);
    }

    #[test]
    fn receipt_totals() {
        let receipt = ExtractedReceipt {
            store_name: None,
            date: None,
            items: vec![
                ExtractedReceiptItem {
                    price: 2.5,
                    quantity_grams: 500.0,
                    ..Default::default()
                },
                ExtractedReceiptItem {
                    price: 1.0,
                    quantity_grams: 250.0,
                    ..Default::default()
                },
            ],
        };
        assert!((receipt.total_price() - 3.5).abs() < 1e-9);
        assert!((receipt.total_grams() - 750.0).abs() < 1e-9);
    }

    #[test]
    fn nutrition_keys_cover_all_fields() {
        assert_eq!(NutritionFacts::KEYS.len(), 16);
        let n = NutritionFacts {
            calories: 1.0,
            ..Default::default()
        };
        assert_eq!(n.entries()[0], ("calories", 1.0));
        assert!(NutritionFacts::zero().is_zero());
    }

    #[test]
    fn nutrition_record_serialises_flat() {
        let rec = ExtractedNutritionRecord {
            food_name: Some("Oats".into()),
            nutrition: NutritionFacts {
                calories: 389.0,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["foodName"], "Oats");
        assert_eq!(json["calories"], 389.0);
    }
}
