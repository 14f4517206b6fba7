//! Run outcome types: per-image results and aggregate statistics.
//!
//! A [`RunReport`] is returned even when some images failed; the failures are
//! listed in [`RunReport::images`] and counted in [`RunStats::failed`].
//! Everything here is `Serialize` so the CLI can print it with `--json`.

use crate::error::{CollectError, ExtractionError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened to one enumerated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Extracted and appended to the store.
    Recorded,
    /// Already present in the store; not sent to the API.
    Skipped,
    /// Extraction failed; no row written.
    Failed,
}

/// Result for a single image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub identifier: String,
    pub status: ImageStatus,
    /// Wall time of the extraction call, 0 for skipped images.
    pub duration_ms: u64,
    /// Retries the client needed (0 when the first attempt succeeded).
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<ExtractionError>,
}

impl ImageResult {
    pub(crate) fn skipped(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            status: ImageStatus::Skipped,
            duration_ms: 0,
            retries: 0,
            input_tokens: 0,
            output_tokens: 0,
            error: None,
        }
    }

    pub(crate) fn failed(
        identifier: impl Into<String>,
        error: ExtractionError,
        duration_ms: u64,
    ) -> Self {
        let retries = match error {
            ExtractionError::ApiFailed { retries, .. } => retries,
            _ => 0,
        };
        Self {
            identifier: identifier.into(),
            status: ImageStatus::Failed,
            duration_ms,
            retries,
            input_tokens: 0,
            output_tokens: 0,
            error: Some(error),
        }
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Images enumerated from the source.
    pub total: usize,
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

impl RunStats {
    /// Images that reached the extraction client.
    pub fn attempted(&self) -> usize {
        self.recorded + self.failed
    }

    pub(crate) fn tally(results: &[ImageResult]) -> Self {
        let mut stats = RunStats {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.status {
                ImageStatus::Recorded => stats.recorded += 1,
                ImageStatus::Skipped => stats.skipped += 1,
                ImageStatus::Failed => stats.failed += 1,
            }
            stats.total_input_tokens += r.input_tokens;
            stats.total_output_tokens += r.output_tokens;
        }
        stats
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The CSV the rows were written to.
    pub store_path: PathBuf,
    /// One entry per enumerated image, in enumeration order.
    pub images: Vec<ImageResult>,
    pub stats: RunStats,
}

impl RunReport {
    /// True when no image failed (skips count as success).
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    /// Identifiers that failed and remain pending for the next run.
    pub fn failed_identifiers(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .filter(|r| r.status == ImageStatus::Failed)
            .map(|r| r.identifier.as_str())
    }

    /// Treat any image failure as an error.
    pub fn into_result(self) -> Result<Self, CollectError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CollectError::PartialFailure {
                recorded: self.stats.recorded,
                failed: self.stats.failed,
                attempted: self.stats.attempted(),
            })
        }
    }
}
