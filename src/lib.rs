//! # edgequake-img2csv
//!
//! Extract structured fields from a folder of images into a CSV file using
//! Vision Language Models (VLMs), one resumable row per image.
//!
//! ## Why this crate?
//!
//! Batch extraction jobs over hundreds of photos, scans or receipts get
//! interrupted: quotas run out, laptops sleep, one image makes the API choke.
//! This crate treats the CSV itself as the checkpoint. Every successful image
//! is appended and synced immediately, images already in the file are
//! skipped, and failed images are simply absent, so rerunning the same
//! command finishes the job without paying for anything twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images/ or one file
//!  │
//!  ├─ 1. Enumerate  image files, sorted by name (identifier = file name)
//!  ├─ 2. Store      load CSV (or reset it with --overwrite), index identifiers
//!  ├─ 3. Skip       identifiers already in the CSV
//!  ├─ 4. Pace       fixed delay between consecutive API calls
//!  ├─ 5. Extract    VLM call with retry/backoff → JSON object of fields
//!  └─ 6. Append     one CSV row, flushed and synced before the next image
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2csv::{collect, ImageSource, RunConfig, VisionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let run = RunConfig::builder()
//!         .source(ImageSource::Directory("images".into()))
//!         .store_path("results.csv")
//!         .fields(["title", "price"])
//!         .build()?;
//!     let report = collect(&run, &VisionConfig::default()).await?;
//!     eprintln!(
//!         "{} recorded, {} skipped, {} failed",
//!         report.stats.recorded, report.stats.skipped, report.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Custom extraction backends
//!
//! The collector is generic over [`ExtractionClient`]. Implement it to route
//! images to an OCR engine, a local model or a test double, and run it with
//! [`collect_with`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod collect;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use collect::{collect, collect_sync, collect_with, Collector};
pub use config::{ImageSource, RunConfig, RunConfigBuilder, VisionConfig, VisionConfigBuilder};
pub use error::{CollectError, ExtractionError};
pub use output::{ImageResult, ImageStatus, RunReport, RunStats};
pub use pipeline::enumerate::{enumerate, ImageRecord};
pub use pipeline::extract::{Extraction, ExtractionClient, VisionExtractor};
pub use pipeline::pacer::Pacer;
pub use pipeline::store::{ResultStore, Row, IDENTIFIER_COLUMN};
pub use progress::{CollectProgressCallback, NoopProgressCallback, ProgressCallback};
