//! Progress-callback trait for the image upload pool.
//!
//! Pass an [`Arc<dyn UploadProgressCallback>`] to
//! [`crate::pipeline::upload::upload_images`] to receive events as each
//! image is uploaded. The CLI renders them with an `indicatif` bar; library
//! callers can count them, forward them to a channel, or ignore them.
//!
//! # Example
//!
//! ```rust
//! use rosenwald_batch::UploadProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl UploadProgressCallback for Counter {
//!     fn on_item_complete(&self, key: &str, file_id: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{key} -> {file_id}");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the upload pool as it works through the images.
///
/// Implementations must be `Send + Sync`: up to `workers` uploads run at
/// once, so `on_item_*` may be called concurrently. All methods default to
/// no-ops.
pub trait UploadProgressCallback: Send + Sync {
    /// Called once before the first upload, with the number of uploads planned.
    fn on_upload_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an image uploaded and its mapping line was written.
    fn on_item_complete(&self, key: &str, file_id: &str) {
        let _ = (key, file_id);
    }

    /// Called when an image failed after all retries.
    fn on_item_error(&self, key: &str, error: &str) {
        let _ = (key, error);
    }

    /// Called once after every planned upload was attempted.
    fn on_upload_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// The default when no callback is given.
pub struct NoopProgressCallback;

impl UploadProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn UploadProgressCallback>;
