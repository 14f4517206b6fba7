//! Progress-callback trait for per-image collection events.
//!
//! Inject an [`Arc<dyn CollectProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events as
//! the collector walks the enumerated images.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2csv::{CollectProgressCallback, RunConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     recorded: AtomicUsize,
//! }
//!
//! impl CollectProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, identifier: &str) {
//!         self.recorded.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{index}/{total}] {identifier}");
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { recorded: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunStats;
use std::sync::Arc;

/// Called by the collector as it processes each image.
///
/// The collector is sequential, so events arrive in enumeration order and
/// never overlap. The trait is still `Send + Sync` so a callback can be shared
/// with other tasks (a UI thread, a channel forwarder). All methods default
/// to no-ops.
///
/// `index` is 1-based over the enumerated images, skipped ones included.
pub trait CollectProgressCallback: Send + Sync {
    /// Called once after enumeration and store load, before the first image.
    ///
    /// # Arguments
    /// * `total`   — number of enumerated images
    /// * `pending` — how many of them are not yet in the store
    fn on_run_start(&self, total: usize, pending: usize) {
        let _ = (total, pending);
    }

    /// Called when an image is already in the store and is not reprocessed.
    fn on_image_skipped(&self, index: usize, total: usize, identifier: &str) {
        let _ = (index, total, identifier);
    }

    /// Called just before the extraction call for an image (after pacing).
    fn on_image_start(&self, index: usize, total: usize, identifier: &str) {
        let _ = (index, total, identifier);
    }

    /// Called once the image's row has been persisted.
    fn on_image_complete(&self, index: usize, total: usize, identifier: &str) {
        let _ = (index, total, identifier);
    }

    /// Called when extraction failed; no row was written.
    fn on_image_error(&self, index: usize, total: usize, identifier: &str, error: &str) {
        let _ = (index, total, identifier, error);
    }

    /// Called once after every image has been visited.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CollectProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn CollectProgressCallback>;
