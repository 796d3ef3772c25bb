//! Progress-callback trait for batch ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as a batch (several photos, or many catalog entries to estimate)
//! is worked through. Single-item calls emit no events.
//!
//! # Example
//!
//! ```rust
//! use edgequake_receipts::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for FailureCounter {
//!     fn on_item_error(&self, index: usize, total: usize, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("item {}/{} failed: {}", index + 1, total, error);
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter { failed: AtomicUsize::new(0) });
//! let config = IngestConfig::builder()
//!     .progress_callback(counter as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by batch entry points as each item is attempted.
///
/// All methods default to no-ops. With `concurrency > 1` the per-item
/// methods may be called concurrently from different tasks, so shared
/// state needs `Mutex`/atomics.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before the first item.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before an item's transport call.
    ///
    /// `index` is 0-based; `label` is the file name, URL or food name.
    fn on_item_start(&self, index: usize, total: usize, label: &str) {
        let _ = (index, total, label);
    }

    /// Called when an item produced a record.
    fn on_item_complete(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an item failed. The batch carries on.
    fn on_item_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every item has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl IngestProgressCallback for TrackingCallback {
        fn on_item_start(&self, _index: usize, _total: usize, _label: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _index: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_item_start(0, 2, "a.jpg");
        cb.on_item_complete(0, 2);
        cb.on_item_error(1, 2, "no JSON");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb: Arc<TrackingCallback> = Arc::new(TrackingCallback::default());
        let dyn_cb: ProgressCallback = cb.clone();
        dyn_cb.on_item_start(0, 2, "a.jpg");
        dyn_cb.on_item_complete(0, 2);
        dyn_cb.on_item_start(1, 2, "b.jpg");
        dyn_cb.on_item_error(1, 2, "rate limited");
        dyn_cb.on_batch_complete(2, 1);

        assert_eq!(cb.starts.load(Ordering::SeqCst), 2);
        assert_eq!(cb.completes.load(Ordering::SeqCst), 1);
        assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
        assert_eq!(cb.succeeded.load(Ordering::SeqCst), 1);
    }
}
