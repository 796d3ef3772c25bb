//! Prompts for each ingestion task.
//!
//! [`build_prompt`] is a pure function from a [`PromptTask`] to the text sent
//! to the model. Everything downstream treats that text as opaque; the only
//! contract is that each prompt asks for the JSON shape the matching schema
//! in [`crate::schema`] reads.

use crate::records::{Category, NutritionFacts};

/// What the model is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptTask {
    /// Read a receipt photo (sent as an attachment).
    ReceiptImage,
    /// Read a receipt that was typed or pasted.
    ReceiptText { text: String },
    /// Read a nutrition-facts label photo.
    NutritionLabel,
    /// Estimate per-100 g nutrition for a named food.
    EstimateNutrition { food_name: String },
    /// Pick the catalog entry that names the same food as `candidate`.
    MatchFood {
        candidate: String,
        catalog_names: Vec<String>,
    },
}

const JSON_ONLY: &str = "Respond with JSON only. Do not add commentary or markdown fences.";

/// Build the prompt text for `task`.
pub fn build_prompt(task: &PromptTask) -> String {
    match task {
        PromptTask::ReceiptImage => format!(
            "Extract every purchased line item from this grocery receipt.\n\n{}\n\n{}",
            receipt_shape(),
            JSON_ONLY
        ),
        PromptTask::ReceiptText { text } => format!(
            "Extract every purchased line item from the receipt text below.\n\n{}\n\n{}\n\nReceipt:\n\"\"\"\n{}\n\"\"\"",
            receipt_shape(),
            JSON_ONLY,
            text.trim()
        ),
        PromptTask::NutritionLabel => format!(
            "Read the nutrition facts label in this image. Convert every value to \
             an amount per 100 g of product, using the serving size printed on the \
             label when values are given per serving.\n\n\
             Return an object with \"foodName\" (string or null) and these numeric \
             fields: {}. Use 0 for nutrients that are not listed. Energy is kcal; \
             sodium, cholesterol, potassium, calcium, iron and vitamin C are mg; \
             vitamins A and D are µg; everything else is g.\n\n{}",
            nutrient_keys(),
            JSON_ONLY
        ),
        PromptTask::EstimateNutrition { food_name } => format!(
            "Estimate typical nutrition for \"{}\" per 100 g.\n\n\
             Return an object with \"foodName\", \"servingGrams\" (a typical serving \
             in grams) and these numeric fields: {}. Use the same units as a US \
             nutrition label.\n\n{}",
            food_name.trim(),
            nutrient_keys(),
            JSON_ONLY
        ),
        PromptTask::MatchFood {
            candidate,
            catalog_names,
        } => {
            let list = catalog_names
                .iter()
                .map(|n| format!("- {n}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "A receipt lists the item \"{}\". Which of the known foods below is the \
                 same product? Ignore brand names, sizes and abbreviations.\n\n\
                 Known foods:\n{}\n\n\
                 Return {{\"foodName\": <exact name from the list, or null>, \
                 \"confidence\": <0.0-1.0>, \"isNewFood\": <true if none match>}}.\n\n{}",
                candidate.trim(),
                if list.is_empty() { "(none)".to_string() } else { list },
                JSON_ONLY
            )
        }
    }
}

fn receipt_shape() -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| {
            let subs = c
                .subcategories()
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>();
            if subs.is_empty() {
                c.label().to_string()
            } else {
                format!("{} ({})", c.label(), subs.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "Return an object:\n\
         {{\"storeName\": string or null, \"date\": \"YYYY-MM-DD\" or null, \
         \"items\": [{{\"name\": string, \"quantity\": grams as a number, \
         \"price\": number, \"category\": string, \"subcategory\": string or null}}]}}\n\n\
         Estimate grams from the package size when the receipt does not print a weight. \
         Prices are the line total. Categories (with allowed subcategories): {categories}."
    )
}

fn nutrient_keys() -> String {
    NutritionFacts::KEYS.join(", ")
}
