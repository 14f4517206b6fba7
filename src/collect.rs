//! The collection run: enumerate, skip what is stored, pace, extract, append.
//!
//! ## Ordering
//!
//! Images are processed one at a time, in enumeration order. An image's row
//! is flushed to disk before the next image is paced, so whatever a crashed
//! run leaves behind is exactly the set of images that completed. The next
//! run reloads the store and picks up the rest.
//!
//! ## Fatal vs. per-image errors
//!
//! Everything that can make the whole run pointless (missing input, corrupt
//! or foreign CSV, no provider) is checked before the first extraction. After
//! that, a failing image is reported in the [`RunReport`] and the loop moves
//! on; only a failed store write stops it.

use crate::config::{RunConfig, VisionConfig};
use crate::error::CollectError;
use crate::output::{ImageResult, ImageStatus, RunReport, RunStats};
use crate::pipeline::enumerate::{self, ImageRecord};
use crate::pipeline::extract::{ExtractionClient, VisionExtractor};
use crate::pipeline::pacer::Pacer;
use crate::pipeline::store::{ResultStore, Row};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one collection pass of [`RunConfig`] against an [`ExtractionClient`].
#[derive(Debug)]
pub struct Collector<'a, C> {
    config: &'a RunConfig,
    client: C,
}

impl<'a, C: ExtractionClient> Collector<'a, C> {
    pub fn new(config: &'a RunConfig, client: C) -> Self {
        Self { config, client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Execute the run.
    ///
    /// # Returns
    /// `Ok(RunReport)` whenever the loop completed, even if images failed
    /// (check [`RunReport::is_success`]).
    ///
    /// # Errors
    /// Fatal errors only: input not found, store corrupt or schema mismatch,
    /// store write failure.
    pub async fn run(&self) -> Result<RunReport, CollectError> {
        let run_start = Instant::now();
        let config = self.config;

        // ── Init: enumerate before touching the store ────────────────────
        let images = enumerate::enumerate(&config.source)?;
        info!(
            "Enumerated {} images from {}",
            images.len(),
            config.source.path().display()
        );

        // Overwrite is per run: the store is reset once here, never per row.
        let mut store = if config.overwrite {
            ResultStore::reset(&config.store_path, &config.fields)?
        } else {
            ResultStore::load(&config.store_path, &config.fields)?
        };

        let total = images.len();
        let pending = images
            .iter()
            .filter(|img| !store.contains(&img.identifier))
            .count();
        info!("{} pending, {} already recorded", pending, total - pending);
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_start(total, pending);
        }

        // ── Per-image loop ───────────────────────────────────────────────
        let mut pacer = Pacer::new(config.delay);
        let mut results = Vec::with_capacity(total);

        for (i, image) in images.iter().enumerate() {
            let index = i + 1;

            if store.contains(&image.identifier) {
                debug!("Skip existing: {}", image.identifier);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_skipped(index, total, &image.identifier);
                }
                results.push(ImageResult::skipped(&image.identifier));
                continue;
            }

            pacer.wait().await;
            let result = self.process_image(&mut store, image, index, total).await;
            pacer.mark();
            results.push(result?);
        }

        // ── Terminal ─────────────────────────────────────────────────────
        let mut stats = RunStats::tally(&results);
        stats.total_duration_ms = run_start.elapsed().as_millis() as u64;

        info!(
            "Run complete: {} recorded, {} skipped, {} failed in {}ms",
            stats.recorded, stats.skipped, stats.failed, stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(&stats);
        }

        Ok(RunReport {
            store_path: config.store_path.clone(),
            images: results,
            stats,
        })
    }

    /// Extract one image and persist its row. Only store failures are `Err`.
    async fn process_image(
        &self,
        store: &mut ResultStore,
        image: &ImageRecord,
        index: usize,
        total: usize,
    ) -> Result<ImageResult, CollectError> {
        let config = self.config;
        if let Some(ref cb) = config.progress_callback {
            cb.on_image_start(index, total, &image.identifier);
        }

        let start = Instant::now();
        let outcome = self.client.extract(image).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(extraction) => {
                let row = Row::project(&image.identifier, &config.fields, &extraction.fields);
                store.append(row)?;
                debug!("Recorded {} in {}ms", image.identifier, duration_ms);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_complete(index, total, &image.identifier);
                }
                Ok(ImageResult {
                    identifier: image.identifier.clone(),
                    status: ImageStatus::Recorded,
                    duration_ms,
                    retries: extraction.retries,
                    input_tokens: extraction.input_tokens,
                    output_tokens: extraction.output_tokens,
                    error: None,
                })
            }
            Err(e) => {
                warn!("Failed: {}", e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_error(index, total, &image.identifier, &e.to_string());
                }
                Ok(ImageResult::failed(&image.identifier, e, duration_ms))
            }
        }
    }
}

/// Run a collection with the VLM extractor described by `vision`.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use edgequake_img2csv::{collect, ImageSource, RunConfig, VisionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let run = RunConfig::builder()
///     .source(ImageSource::Directory("receipts".into()))
///     .store_path("receipts.csv")
///     .fields(["merchant", "date", "total"])
///     .build()?;
/// let report = collect(&run, &VisionConfig::default()).await?;
/// eprintln!("{} recorded, {} failed", report.stats.recorded, report.stats.failed);
/// # Ok(())
/// # }
/// ```
pub async fn collect(config: &RunConfig, vision: &VisionConfig) -> Result<RunReport, CollectError> {
    let extractor = VisionExtractor::from_config(vision, &config.fields)?;
    collect_with(config, extractor).await
}

/// Run a collection with any [`ExtractionClient`].
pub async fn collect_with<C: ExtractionClient>(
    config: &RunConfig,
    client: C,
) -> Result<RunReport, CollectError> {
    Collector::new(config, client).run().await
}

/// Synchronous wrapper around [`collect`].
///
/// Creates a temporary tokio runtime internally.
pub fn collect_sync(config: &RunConfig, vision: &VisionConfig) -> Result<RunReport, CollectError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CollectError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(collect(config, vision))
}
