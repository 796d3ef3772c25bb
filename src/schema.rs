//! Declarative response schemas and the coercion table.
//!
//! Model output is loosely typed: numbers arrive as strings, optional
//! fields arrive as the literal string `"null"`, enums arrive in any case.
//! Rather than scattering fallbacks across every call site, each response
//! shape is declared once as a [`Schema`] of [`Field`]s, and
//! [`Schema::apply`] turns an arbitrary [`serde_json::Value`] into the
//! canonical JSON for that shape (or a [`ParseFailure`]).
//!
//! ## Coercion table
//!
//! | Kind | Accepts | Absent / `null` / `"null"` |
//! |------|---------|----------------------------|
//! | `RequiredString` | string | `MissingKey` / `UnexpectedNull` |
//! | `OptionalString` | string | `null` |
//! | `StringOr(d)` | string | `d` |
//! | `Number { default }` | number, numeric string (`"20"`, `"$3.49"`, `"1,5"`) | `default` |
//! | `Bool(fallback)` | bool, `"true"`/`"false"` any case | fallback |
//! | `Enum { default }` | known label, any case | `default` (also for unknown labels) |
//! | `DependentEnum` | label valid under the parent field's value | `null` (also when invalid) |
//! | `Array(schema)` | array of objects | `[]` |
//!
//! Canonical output is a fixed point: applying the same schema to it again
//! yields an identical value. Strings are trimmed, numbers are always
//! floats, enums use their canonical label, and every declared field is
//! present.

use crate::error::ParseFailure;
use crate::records::{Category, NutritionFacts, Subcategory, PLACEHOLDER_ITEM_NAME};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// What to do with a boolean field the model left out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoolFallback {
    Const(bool),
    /// `true` when the named sibling field is absent (or normalises to `null`).
    WhenAbsent(&'static str),
}

/// How a single field is read and what it defaults to.
#[derive(Debug, Clone)]
pub enum FieldKind {
    RequiredString,
    OptionalString,
    /// String that falls back to a placeholder instead of `null`.
    StringOr(&'static str),
    Number {
        default: f64,
    },
    Bool(BoolFallback),
    Enum {
        allowed: &'static [&'static str],
        default: &'static str,
    },
    /// Optional label whose valid values depend on another field's label.
    /// `resolve(parent_label, candidate)` returns the canonical label or `None`.
    DependentEnum {
        parent: &'static str,
        resolve: fn(&str, &str) -> Option<&'static str>,
    },
    Array(Schema),
}

/// One named field of a record.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    /// Other keys the model is known to use for the same value.
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
        }
    }

    pub fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }
}

/// A record shape.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
    /// When the response is a bare array, treat it as the value of this field.
    pub bare_array_field: Option<&'static str>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            bare_array_field: None,
        }
    }

    pub fn with_bare_array_field(mut self, name: &'static str) -> Self {
        self.bare_array_field = Some(name);
        self
    }

    /// Normalise a decoded JSON value against this schema.
    pub fn apply(&self, value: &Value) -> Result<Value, ParseFailure> {
        match value {
            Value::Object(obj) => self.apply_object(obj, ""),
            Value::Array(items) => {
                if let Some(field) = self.bare_array_field {
                    debug!("Bare array response treated as '{}'", field);
                    let mut wrapped = Map::new();
                    wrapped.insert(field.to_string(), Value::Array(items.clone()));
                    return self.apply_object(&wrapped, "");
                }
                match items.first() {
                    Some(Value::Object(obj)) => {
                        debug!("Array response: using the first of {} objects", items.len());
                        self.apply_object(obj, "")
                    }
                    _ => Err(ParseFailure::TypeMismatch {
                        path: "$".into(),
                        expected: "object".into(),
                    }),
                }
            }
            Value::Null => Err(ParseFailure::UnexpectedNull { path: "$".into() }),
            _ => Err(ParseFailure::TypeMismatch {
                path: "$".into(),
                expected: "object".into(),
            }),
        }
    }

    fn apply_object(&self, obj: &Map<String, Value>, prefix: &str) -> Result<Value, ParseFailure> {
        let mut out = Map::new();

        // Independent fields first; dependent enums and bool fallbacks read
        // their siblings' canonical values.
        for field in &self.fields {
            if matches!(
                field.kind,
                FieldKind::Bool(_) | FieldKind::DependentEnum { .. }
            ) {
                continue;
            }
            let path = join_path(prefix, field.name);
            let raw = lookup(obj, field);
            out.insert(field.name.to_string(), coerce(&field.kind, raw, &path)?);
        }

        for field in &self.fields {
            if let FieldKind::DependentEnum { parent, resolve } = &field.kind {
                let raw = lookup(obj, field).and_then(non_null_str);
                let parent_label = out.get(*parent).and_then(Value::as_str).unwrap_or("");
                let value = raw
                    .and_then(|candidate| resolve(parent_label, candidate))
                    .map(|label| Value::String(label.to_string()))
                    .unwrap_or(Value::Null);
                out.insert(field.name.to_string(), value);
            }
        }

        for field in &self.fields {
            if let FieldKind::Bool(fallback) = &field.kind {
                let path = join_path(prefix, field.name);
                let raw = lookup(obj, field);
                let value = match coerce_bool(raw, &path)? {
                    Some(b) => b,
                    None => match fallback {
                        BoolFallback::Const(b) => *b,
                        BoolFallback::WhenAbsent(sibling) => {
                            out.get(*sibling).map_or(true, Value::is_null)
                        }
                    },
                };
                out.insert(field.name.to_string(), Value::Bool(value));
            }
        }

        Ok(Value::Object(out))
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Find a field by name, then by alias, then case/underscore-insensitively.
fn lookup<'a>(obj: &'a Map<String, Value>, field: &Field) -> Option<&'a Value> {
    if let Some(v) = obj.get(field.name) {
        return Some(v);
    }
    if let Some(v) = field.aliases.iter().find_map(|a| obj.get(*a)) {
        return Some(v);
    }
    let wanted: Vec<String> = std::iter::once(field.name)
        .chain(field.aliases.iter().copied())
        .map(fold_key)
        .collect();
    obj.iter()
        .find(|(k, _)| wanted.contains(&fold_key(k)))
        .map(|(_, v)| v)
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

/// `Some(trimmed)` for a real string; `None` for null, `"null"` and blanks.
fn non_null_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(t)
            }
        }
        _ => None,
    }
}

fn is_nullish(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("null"),
        _ => false,
    }
}

fn coerce(kind: &FieldKind, raw: Option<&Value>, path: &str) -> Result<Value, ParseFailure> {
    match kind {
        FieldKind::RequiredString => match raw {
            None => Err(ParseFailure::MissingKey { field: path.into() }),
            Some(v) if is_nullish(Some(v)) => {
                Err(ParseFailure::UnexpectedNull { path: path.into() })
            }
            Some(Value::String(s)) => Ok(Value::String(s.trim().to_string())),
            Some(_) => Err(mismatch(path, "string")),
        },
        FieldKind::OptionalString => match raw {
            None | Some(Value::Null) => Ok(Value::Null),
            Some(v @ Value::String(_)) => Ok(non_null_str(v)
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null)),
            Some(_) => Err(mismatch(path, "string or null")),
        },
        FieldKind::StringOr(default) => match raw {
            None | Some(Value::Null) => Ok(Value::String(default.to_string())),
            Some(v @ Value::String(_)) => Ok(Value::String(
                non_null_str(v).unwrap_or(*default).to_string(),
            )),
            Some(_) => Err(mismatch(path, "string or null")),
        },
        FieldKind::Number { default } => {
            let n = match raw {
                None | Some(Value::Null) => *default,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(*default),
                Some(Value::String(s)) => parse_loose_number(s).unwrap_or(*default),
                Some(_) => return Err(mismatch(path, "number")),
            };
            let n = if n.is_finite() { n } else { *default };
            Ok(Value::from(n))
        }
        FieldKind::Enum { allowed, default } => {
            let label = raw
                .and_then(non_null_str)
                .map(canonical_label)
                .and_then(|key| allowed.iter().copied().find(|a| *a == key))
                .unwrap_or(*default);
            Ok(Value::String(label.to_string()))
        }
        FieldKind::Array(schema) => match raw {
            None | Some(Value::Null) => Ok(Value::Array(Vec::new())),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    match item {
                        Value::Object(obj) => schema.apply_object(obj, &item_path),
                        _ => Err(mismatch(&item_path, "object")),
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Some(_) => Err(mismatch(path, "array")),
        },
        // Resolved in later passes of `apply_object`.
        FieldKind::Bool(_) | FieldKind::DependentEnum { .. } => Ok(Value::Null),
    }
}

fn coerce_bool(raw: Option<&Value>, path: &str) -> Result<Option<bool>, ParseFailure> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            "null" | "" => Ok(None),
            _ => Err(mismatch(path, "boolean")),
        },
        Some(_) => Err(mismatch(path, "boolean")),
    }
}

fn mismatch(path: &str, expected: &str) -> ParseFailure {
    ParseFailure::TypeMismatch {
        path: path.into(),
        expected: expected.into(),
    }
}

fn canonical_label(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

static RE_LOOSE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\d+\-.,]*([+-]?[\d.,]*\d)\s*[^\d]*$").unwrap());

static RE_GROUPED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").unwrap());

static RE_DECIMAL_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d*,\d{1,2}$").unwrap());

/// Parse `"20"`, `" 3.5 "`, `"$3.49"`, `"120 g"`, `"1,5"` or `"$1,299.00"`.
///
/// A comma is a thousands separator when it splits groups of three digits,
/// and a decimal mark when one or two digits follow it. Anything else,
/// including `"1.234,56"`, is `None` so the field default applies.
pub fn parse_loose_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<f64>() {
        return Some(n);
    }
    let caps = RE_LOOSE_NUMBER.captures(raw)?;
    let token = &caps[1];
    let plain = if RE_GROUPED_NUMBER.is_match(token) {
        token.replace(',', "")
    } else if RE_DECIMAL_COMMA.is_match(token) {
        token.replace(',', ".")
    } else if token.contains(',') {
        return None;
    } else {
        token.to_string()
    };
    plain.parse::<f64>().ok()
}

// ── Built-in schemas ─────────────────────────────────────────────────────

fn resolve_subcategory(parent: &str, candidate: &str) -> Option<&'static str> {
    let sub = Subcategory::from_label(candidate)?;
    let parent = Category::from_label(parent)?;
    (sub.category() == parent).then(|| sub.label())
}

fn receipt_item_schema() -> Schema {
    Schema::new(vec![
        Field::new("name", FieldKind::StringOr(PLACEHOLDER_ITEM_NAME))
            .with_aliases(&["itemName", "item", "description"]),
        Field::new("quantity", FieldKind::Number { default: 0.0 })
            .with_aliases(&["quantityGrams", "grams", "weight"]),
        Field::new("price", FieldKind::Number { default: 0.0 })
            .with_aliases(&["totalPrice", "amount"]),
        Field::new(
            "category",
            FieldKind::Enum {
                allowed: &Category::LABELS,
                default: "other",
            },
        ),
        Field::new(
            "subcategory",
            FieldKind::DependentEnum {
                parent: "category",
                resolve: resolve_subcategory,
            },
        ),
        Field::new("linkedEntryId", FieldKind::OptionalString),
    ])
}

/// `{ storeName?, date?, items: [...] }`
pub static RECEIPT: Lazy<Schema> = Lazy::new(|| {
    Schema::new(vec![
        Field::new("storeName", FieldKind::OptionalString).with_aliases(&["store", "merchant"]),
        Field::new("date", FieldKind::OptionalString).with_aliases(&["purchaseDate"]),
        Field::new("items", FieldKind::Array(receipt_item_schema())).with_aliases(&["lineItems"]),
    ])
    .with_bare_array_field("items")
});

fn nutrition_fields() -> Vec<Field> {
    NutritionFacts::KEYS
        .iter()
        .map(|key| Field::new(*key, FieldKind::Number { default: 0.0 }))
        .collect()
}

/// `{ foodName?, calories, protein, ... }`, all per 100 g.
pub static NUTRITION_LABEL: Lazy<Schema> = Lazy::new(|| {
    let mut fields =
        vec![Field::new("foodName", FieldKind::OptionalString).with_aliases(&["productName", "name"])];
    fields.extend(nutrition_fields());
    Schema::new(fields)
});

/// Nutrition label fields plus `servingGrams`, which defaults to a 100 g serving.
pub static NUTRITION_ESTIMATE: Lazy<Schema> = Lazy::new(|| {
    let mut fields = vec![
        Field::new("foodName", FieldKind::OptionalString).with_aliases(&["name"]),
        Field::new("servingGrams", FieldKind::Number { default: 100.0 })
            .with_aliases(&["servingSize", "servingSizeGrams"]),
    ];
    fields.extend(nutrition_fields());
    Schema::new(fields)
});

/// `{ foodName?, confidence, isNewFood }` from the remote matcher.
pub static FOOD_MATCH: Lazy<Schema> = Lazy::new(|| {
    Schema::new(vec![
        Field::new("foodName", FieldKind::OptionalString).with_aliases(&["match", "matchedName"]),
        Field::new("confidence", FieldKind::Number { default: 0.0 }),
        Field::new("isNewFood", FieldKind::Bool(BoolFallback::WhenAbsent("foodName"))),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_numbers() {
        assert_eq!(parse_loose_number("20"), Some(20.0));
        assert_eq!(parse_loose_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_loose_number("$3.49"), Some(3.49));
        assert_eq!(parse_loose_number("120 g"), Some(120.0));
        assert_eq!(parse_loose_number("1,5"), Some(1.5));
        assert_eq!(parse_loose_number("-2"), Some(-2.0));
        assert_eq!(parse_loose_number("about twenty"), None);
        assert_eq!(parse_loose_number(""), None);
    }

    #[test]
    fn thousands_separators_are_not_decimal_marks() {
        assert_eq!(parse_loose_number("1,000"), Some(1000.0));
        assert_eq!(parse_loose_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_loose_number("$1,299.00"), Some(1299.0));
        assert_eq!(parse_loose_number("12,500 g"), Some(12500.0));
        assert_eq!(parse_loose_number("1,5"), Some(1.5));
        assert_eq!(parse_loose_number("2,49 €"), Some(2.49));
        assert_eq!(parse_loose_number("1.234,56"), None);
        assert_eq!(parse_loose_number("1,2345"), None);
    }

    #[test]
    fn required_string_failures_are_classified() {
        let schema = Schema::new(vec![Field::new("name", FieldKind::RequiredString)]);
        assert_eq!(
            schema.apply(&json!({})),
            Err(ParseFailure::MissingKey {
                field: "name".into()
            })
        );
        assert_eq!(
            schema.apply(&json!({"name": null})),
            Err(ParseFailure::UnexpectedNull { path: "name".into() })
        );
        assert_eq!(
            schema.apply(&json!({"name": "NULL"})),
            Err(ParseFailure::UnexpectedNull { path: "name".into() })
        );
        assert_eq!(
            schema.apply(&json!({"name": 7})),
            Err(ParseFailure::TypeMismatch {
                path: "name".into(),
                expected: "string".into()
            })
        );
        assert_eq!(
            schema.apply(&json!({"name": "  Oats "})).unwrap(),
            json!({"name": "Oats"})
        );
    }

    #[test]
    fn number_coercions() {
        let v = NUTRITION_LABEL
            .apply(&json!({"calories": 100, "protein": null, "carbohydrates": "20", "fat": "n/a"}))
            .unwrap();
        assert_eq!(v["calories"], json!(100.0));
        assert_eq!(v["protein"], json!(0.0));
        assert_eq!(v["carbohydrates"], json!(20.0));
        assert_eq!(v["fat"], json!(0.0), "unparseable strings default");
        assert_eq!(v["vitaminD"], json!(0.0), "absent fields default");
        assert_eq!(v["foodName"], Value::Null);
    }

    #[test]
    fn number_field_rejects_objects() {
        let err = NUTRITION_LABEL
            .apply(&json!({"calories": {"value": 5}}))
            .unwrap_err();
        assert_eq!(
            err,
            ParseFailure::TypeMismatch {
                path: "calories".into(),
                expected: "number".into()
            }
        );
    }

    #[test]
    fn domain_baseline_default() {
        let v = NUTRITION_ESTIMATE.apply(&json!({"calories": 52})).unwrap();
        assert_eq!(v["servingGrams"], json!(100.0));
    }

    #[test]
    fn bool_fallback_reads_sibling() {
        let v = FOOD_MATCH.apply(&json!({"foodName": "null"})).unwrap();
        assert_eq!(v["foodName"], Value::Null);
        assert_eq!(v["isNewFood"], json!(true));

        let v = FOOD_MATCH.apply(&json!({"foodName": "Oat Milk"})).unwrap();
        assert_eq!(v["isNewFood"], json!(false));

        let v = FOOD_MATCH
            .apply(&json!({"foodName": "Oat Milk", "isNewFood": "TRUE"}))
            .unwrap();
        assert_eq!(v["isNewFood"], json!(true));

        let err = FOOD_MATCH.apply(&json!({"isNewFood": "maybe"})).unwrap_err();
        assert!(matches!(err, ParseFailure::TypeMismatch { .. }));
    }

    #[test]
    fn enums_fall_back_and_subcategories_follow_parent() {
        let v = RECEIPT
            .apply(&json!({"items": [
                {"name": "Milk", "category": "DAIRY", "subcategory": "Milk"},
                {"name": "Laptop", "category": "electronics", "subcategory": "milk"},
                {"name": "Steak", "category": "meat", "subcategory": "cheese"}
            ]}))
            .unwrap();
        let items = v["items"].as_array().unwrap();
        assert_eq!(items[0]["category"], "dairy");
        assert_eq!(items[0]["subcategory"], "milk");
        assert_eq!(items[1]["category"], "other");
        assert_eq!(items[1]["subcategory"], Value::Null);
        assert_eq!(items[2]["category"], "meat");
        assert_eq!(items[2]["subcategory"], Value::Null);
    }

    #[test]
    fn nested_paths_in_errors() {
        let err = RECEIPT
            .apply(&json!({"items": [{"name": "a"}, {"name": "b", "price": [1]}]}))
            .unwrap_err();
        assert_eq!(
            err,
            ParseFailure::TypeMismatch {
                path: "items[1].price".into(),
                expected: "number".into()
            }
        );
    }

    #[test]
    fn bare_array_and_aliases() {
        let v = RECEIPT
            .apply(&json!([{"item_name": "Bread", "Grams": "400", "price": "$2.10"}]))
            .unwrap();
        let item = &v["items"][0];
        assert_eq!(item["name"], "Bread");
        assert_eq!(item["quantity"], json!(400.0));
        assert_eq!(item["price"], json!(2.1));
        assert_eq!(v["storeName"], Value::Null);
    }

    #[test]
    fn canonical_output_is_a_fixed_point() {
        let first = RECEIPT
            .apply(&json!({"store": " Aldi ", "items": [{"name": null, "price": "3"}]}))
            .unwrap();
        let second = RECEIPT.apply(&first).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["items"][0]["name"], PLACEHOLDER_ITEM_NAME);
    }
}
