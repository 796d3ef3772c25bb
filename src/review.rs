//! Human review of an extracted receipt.
//!
//! Records in [`crate::records`] are plain data. Edits made during review go
//! through [`ReceiptReview`], whose setters validate the new value first and
//! only then apply it and call the sink's named hook. A rejected edit leaves
//! both the record and the sink untouched.

use crate::error::ValidationFailure;
use crate::records::{non_negative, Category, ExtractedReceipt, Subcategory};
use tracing::debug;

/// Receives a callback after every accepted edit, typically to persist it.
pub trait RecordSink {
    /// Item `index` of `receipt` was changed.
    fn item_changed(&mut self, receipt: &ExtractedReceipt, index: usize);

    /// A receipt-level field (store name, date) was changed.
    fn receipt_changed(&mut self, receipt: &ExtractedReceipt) {
        let _ = receipt;
    }
}

/// Sink that ignores every change.
#[derive(Debug, Default)]
pub struct NoopSink;

impl RecordSink for NoopSink {
    fn item_changed(&mut self, _receipt: &ExtractedReceipt, _index: usize) {}
}

/// An extracted receipt under review.
#[derive(Debug)]
pub struct ReceiptReview<S: RecordSink> {
    receipt: ExtractedReceipt,
    sink: S,
}

impl<S: RecordSink> ReceiptReview<S> {
    pub fn new(receipt: ExtractedReceipt, sink: S) -> Self {
        Self { receipt, sink }
    }

    pub fn receipt(&self) -> &ExtractedReceipt {
        &self.receipt
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Finish the review and hand back the receipt and sink.
    pub fn into_parts(self) -> (ExtractedReceipt, S) {
        (self.receipt, self.sink)
    }

    pub fn set_item_grams(&mut self, index: usize, grams: f64) -> Result<(), ValidationFailure> {
        non_negative("quantity", grams)?;
        self.update_item(index, |item| item.quantity_grams = grams)
    }

    pub fn set_item_price(&mut self, index: usize, price: f64) -> Result<(), ValidationFailure> {
        non_negative("price", price)?;
        self.update_item(index, |item| item.price = price)
    }

    pub fn set_item_name(&mut self, index: usize, name: &str) -> Result<(), ValidationFailure> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationFailure::EmptyName);
        }
        self.update_item(index, |item| item.name = name.to_string())
    }

    /// Set the category, and optionally a subcategory that must belong to it.
    ///
    /// A subcategory from the previous category is dropped.
    pub fn set_item_category(
        &mut self,
        index: usize,
        category: Category,
        subcategory: Option<Subcategory>,
    ) -> Result<(), ValidationFailure> {
        if let Some(sub) = subcategory {
            if sub.category() != category {
                return Err(ValidationFailure::SubcategoryMismatch {
                    category: category.label().to_string(),
                    subcategory: sub.label().to_string(),
                });
            }
        }
        self.update_item(index, |item| {
            item.category = category;
            item.subcategory = subcategory;
        })
    }

    pub fn set_item_link(
        &mut self,
        index: usize,
        entry_id: Option<String>,
    ) -> Result<(), ValidationFailure> {
        self.update_item(index, |item| item.linked_entry_id = entry_id)
    }

    pub fn set_store_name(&mut self, name: Option<String>) {
        self.receipt.store_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.sink.receipt_changed(&self.receipt);
    }

    pub fn set_date(&mut self, date: Option<String>) {
        self.receipt.date = date;
        self.sink.receipt_changed(&self.receipt);
    }

    fn update_item(
        &mut self,
        index: usize,
        apply: impl FnOnce(&mut crate::records::ExtractedReceiptItem),
    ) -> Result<(), ValidationFailure> {
        let len = self.receipt.items.len();
        let item = self
            .receipt
            .items
            .get_mut(index)
            .ok_or(ValidationFailure::NoSuchItem { index, len })?;
        apply(item);
        debug!("Review: item {} updated", index);
        self.sink.item_changed(&self.receipt, index);
        Ok(())
    }
}
