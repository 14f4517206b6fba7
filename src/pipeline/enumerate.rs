//! Input enumeration: turn a directory or a single file into the ordered list
//! of images a run will visit.
//!
//! The identifier of an image is its file name, not its path. That is what
//! lands in the CSV, so moving the folder between runs does not lose the
//! resume state. Directory listings are sorted by name so two runs over the
//! same folder visit images in the same order.

use crate::config::ImageSource;
use crate::error::CollectError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions (lower-case) recognised as images in directory mode.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// One image to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Stable key: the file name.
    pub identifier: String,
    /// Where to read the bytes from.
    pub path: PathBuf,
}

impl ImageRecord {
    pub fn new(identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
        }
    }

    fn from_path(path: PathBuf) -> Self {
        let identifier = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { identifier, path }
    }
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`], case-insensitively.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Enumerate the images of `source`.
///
/// * `File` — exactly that file, no extension check.
/// * `Directory` — regular files with an image extension, sorted by file
///   name, deduplicated. Subdirectories are not descended into.
///
/// # Errors
/// [`CollectError::NotFound`] if the path does not exist; permission and
/// other listing failures map to their own variants.
pub fn enumerate(source: &ImageSource) -> Result<Vec<ImageRecord>, CollectError> {
    match source {
        ImageSource::File(path) => enumerate_file(path),
        ImageSource::Directory(path) => enumerate_dir(path),
    }
}

fn enumerate_file(path: &Path) -> Result<Vec<ImageRecord>, CollectError> {
    let meta = std::fs::metadata(path).map_err(|e| map_io(path, e))?;
    if meta.is_dir() {
        return Err(CollectError::InvalidConfig(format!(
            "'{}' is a directory; use directory mode to process it",
            path.display()
        )));
    }
    debug!("Single-file input: {}", path.display());
    Ok(vec![ImageRecord::from_path(path.to_path_buf())])
}

fn enumerate_dir(path: &Path) -> Result<Vec<ImageRecord>, CollectError> {
    if !path.exists() {
        return Err(CollectError::NotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_dir() {
        return Err(CollectError::InvalidConfig(format!(
            "'{}' is not a directory; use single-file mode to process it",
            path.display()
        )));
    }

    let mut records = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| map_io(path, e))? {
        let entry = entry.map_err(|e| map_io(path, e))?;
        let entry_path = entry.path();
        // Follows symlinks, so linked images are included and dangling links are not.
        if entry_path.is_file() && is_image_path(&entry_path) {
            records.push(ImageRecord::from_path(entry_path));
        }
    }

    records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    records.dedup_by(|a, b| a.identifier == b.identifier);

    debug!(
        "Found {} images in {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

fn map_io(path: &Path, e: std::io::Error) -> CollectError {
    match e.kind() {
        ErrorKind::NotFound => CollectError::NotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => CollectError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => CollectError::InputReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    }
}
