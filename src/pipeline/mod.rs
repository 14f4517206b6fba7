//! Pipeline stages for image-to-CSV collection.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the [`crate::collect::Collector`] only wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! enumerate ──▶ store.contains? ──▶ pacer ──▶ extract ──▶ store.append
//! (dir/file)    (skip if known)    (delay)   (VLM)       (flush + fsync)
//! ```
//!
//! 1. [`enumerate`] — list image files of a directory, or take the one file
//! 2. [`store`]     — the CSV result store: load, membership, durable append
//! 3. [`pacer`]     — fixed pause between consecutive extraction calls
//! 4. [`encode`]    — image bytes → base64 `ImageData` with a sniffed MIME type
//! 5. [`extract`]   — the extraction-client seam and its VLM implementation;
//!    the only stage with network I/O

pub mod encode;
pub mod enumerate;
pub mod extract;
pub mod pacer;
pub mod store;
