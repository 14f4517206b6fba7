//! Error types for the edgequake-img2csv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CollectError`] — **Fatal**: the run cannot proceed at all (input path
//!   missing, existing CSV unreadable or written with another schema,
//!   provider not configured). Returned as `Err(CollectError)` from the
//!   top-level `collect*` functions, always before any image is processed,
//!   except for [`CollectError::StoreWriteFailed`].
//!
//! * [`ExtractionError`] — **Non-fatal**: a single image failed (unreadable
//!   file, API error, garbage response). Stored inside
//!   [`crate::output::ImageResult`]; no row is written, so the image stays
//!   pending and is retried automatically by the next run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-img2csv library.
///
/// Per-image failures use [`ExtractionError`] and are stored in
/// [`crate::output::ImageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum CollectError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The image directory or file does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Listing the image directory failed for another reason.
    #[error("Failed to list '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The output CSV exists but cannot be parsed.
    #[error("Result store '{path}' is corrupt: {detail}\nFix or move the file, or rerun with --overwrite.")]
    CorruptStore { path: PathBuf, detail: String },

    /// The output CSV header does not match the configured fields.
    #[error(
        "Result store '{path}' has header {found:?}, expected {expected:?}\n\
Use the same --fields as the run that created it, or rerun with --overwrite."
    )]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Reading the existing store failed at the I/O level.
    #[error("Failed to read result store '{path}': {source}")]
    StoreReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row could not be persisted; the durability contract is broken so
    /// the run stops.
    #[error("Failed to write result store '{path}': {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row was rejected by the store (wrong width, duplicate identifier).
    #[error("Invalid row for '{identifier}': {detail}")]
    InvalidRow { identifier: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Run outcome ───────────────────────────────────────────────────────
    /// Some images were recorded but at least one failed.
    ///
    /// Returned by [`crate::output::RunReport::into_result`] when the caller
    /// wants to treat any image failure as an error.
    #[error("{failed}/{attempted} images failed extraction")]
    PartialFailure {
        recorded: usize,
        failed: usize,
        attempted: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The image file could not be read.
    #[error("{identifier}: failed to read image: {detail}")]
    ReadFailed { identifier: String, detail: String },

    /// The bytes are not an image format the VLM accepts.
    #[error("{identifier}: unsupported image format")]
    UnsupportedFormat { identifier: String },

    /// The API call failed on every attempt.
    #[error("{identifier}: extraction failed after {retries} retries: {detail}")]
    ApiFailed {
        identifier: String,
        retries: u32,
        detail: String,
    },

    /// The API answered but the answer is not a JSON object of fields.
    #[error("{identifier}: unusable response: {detail}")]
    InvalidResponse { identifier: String, detail: String },
}

impl ExtractionError {
    /// Whether retrying the same image later may succeed.
    ///
    /// Only API failures are transient; the others depend on the file or the
    /// model and will usually fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::ApiFailed { .. })
    }

    /// The identifier of the image that failed.
    pub fn identifier(&self) -> &str {
        match self {
            ExtractionError::ReadFailed { identifier, .. }
            | ExtractionError::UnsupportedFormat { identifier }
            | ExtractionError::ApiFailed { identifier, .. }
            | ExtractionError::InvalidResponse { identifier, .. } => identifier,
        }
    }
}
