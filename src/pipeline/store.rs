//! The CSV result store: one row per successfully processed image.
//!
//! ## File format
//!
//! ```text
//! identifier,text
//! a.jpg,"Hello, world"
//! c.jpg,C
//! ```
//!
//! Row 0 names the columns: [`IDENTIFIER_COLUMN`] followed by the extraction
//! fields in configured order. Rows follow in processing order across all
//! runs. Quoting is RFC 4180, handled by the `csv` crate.
//!
//! ## Durability
//!
//! Every [`ResultStore::append`] writes one complete record, flushes it, and
//! `fsync`s the file before returning. A crash loses at most the row being
//! written, and because records are appended whole, a reader never sees a
//! row that is half old and half new. Whole-file rewrites
//! ([`ResultStore::reset`], [`ResultStore::persist`]) go through a temp file
//! in the same directory and an atomic rename.

use crate::error::CollectError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Name of the first CSV column.
pub const IDENTIFIER_COLUMN: &str = "identifier";

/// One stored row: the image identifier and one value per extraction field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub identifier: String,
    pub values: Vec<String>,
}

impl Row {
    pub fn new(identifier: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            values,
        }
    }

    /// Lay `extracted` out in `fields` order. Missing fields become empty
    /// cells; fields not in the schema are dropped.
    pub fn project(
        identifier: impl Into<String>,
        fields: &[String],
        extracted: &BTreeMap<String, String>,
    ) -> Self {
        let identifier = identifier.into();
        let values = fields
            .iter()
            .map(|f| match extracted.get(f) {
                Some(v) => v.clone(),
                None => {
                    warn!("{}: response has no '{}' field, leaving it empty", identifier, f);
                    String::new()
                }
            })
            .collect();
        for extra in extracted.keys().filter(|k| !fields.contains(k)) {
            debug!("{}: dropping field '{}' not in the schema", identifier, extra);
        }
        Self { identifier, values }
    }

    /// Value of `field` given the store header.
    pub fn value<'a>(&'a self, header: &[String], field: &str) -> Option<&'a str> {
        header
            .iter()
            .skip(1)
            .position(|h| h == field)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    fn record(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.identifier.as_str()).chain(self.values.iter().map(String::as_str))
    }
}

/// The CSV file as an ordered, identifier-indexed set of rows.
///
/// Created once per run by the collector and owned by it.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
    /// Whether the file on disk already starts with the header row.
    header_on_disk: bool,
    writer: Option<csv::Writer<File>>,
}

impl ResultStore {
    /// Load the store at `path` for the given extraction `fields`.
    ///
    /// A missing or empty file gives an empty store; the header is written
    /// with the first row.
    ///
    /// # Errors
    /// * [`CollectError::SchemaMismatch`] — header differs from
    ///   `identifier,<fields…>`
    /// * [`CollectError::CorruptStore`] — ragged rows, invalid UTF-8, empty or
    ///   duplicate identifiers
    pub fn load(path: impl AsRef<Path>, fields: &[String]) -> Result<Self, CollectError> {
        let path = path.as_ref().to_path_buf();
        let header = header_for(fields);
        let mut store = Self::empty(path.clone(), header);

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No store at {}, starting fresh", path.display());
                return Ok(store);
            }
            Err(e) => return Err(CollectError::StoreReadFailed { path, source: e }),
        };
        let len = file
            .metadata()
            .map_err(|e| CollectError::StoreReadFailed {
                path: path.clone(),
                source: e,
            })?
            .len();
        if len == 0 {
            debug!("Store {} is empty, starting fresh", path.display());
            return Ok(store);
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let found: Vec<String> = reader
            .headers()
            .map_err(|e| corrupt(&path, e))?
            .iter()
            .map(str::to_string)
            .collect();
        if found != store.header {
            return Err(CollectError::SchemaMismatch {
                path,
                expected: store.header,
                found,
            });
        }

        for result in reader.records() {
            let record = result.map_err(|e| corrupt(&path, e))?;
            let mut cells = record.iter();
            let identifier = cells.next().unwrap_or_default().to_string();
            if identifier.is_empty() {
                return Err(CollectError::CorruptStore {
                    path,
                    detail: format!(
                        "empty identifier on line {}",
                        record.position().map(|p| p.line()).unwrap_or(0)
                    ),
                });
            }
            if store.index.contains_key(&identifier) {
                return Err(CollectError::CorruptStore {
                    path,
                    detail: format!("identifier '{identifier}' appears more than once"),
                });
            }
            let row = Row::new(identifier, cells.map(str::to_string).collect());
            store.insert(row);
        }
        store.header_on_disk = true;

        info!("Loaded {} rows from {}", store.rows.len(), path.display());
        Ok(store)
    }

    /// Discard every prior row: atomically replace the file at `path` with a
    /// header-only store.
    pub fn reset(path: impl AsRef<Path>, fields: &[String]) -> Result<Self, CollectError> {
        let mut store = Self::empty(path.as_ref().to_path_buf(), header_for(fields));
        store.persist()?;
        info!("Reset result store {}", store.path.display());
        Ok(store)
    }

    /// Whether a row for `identifier` is present.
    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&Row> {
        self.index.get(identifier).map(|&i| &self.rows[i])
    }

    /// Rows in file order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row to memory and disk; durable when this returns `Ok`.
    ///
    /// # Errors
    /// * [`CollectError::InvalidRow`] — wrong width or identifier already stored
    /// * [`CollectError::StoreWriteFailed`] — the write, flush or sync failed
    pub fn append(&mut self, row: Row) -> Result<(), CollectError> {
        if row.values.len() + 1 != self.header.len() {
            return Err(CollectError::InvalidRow {
                identifier: row.identifier,
                detail: format!(
                    "{} values for {} fields",
                    row.values.len(),
                    self.header.len() - 1
                ),
            });
        }
        if self.contains(&row.identifier) {
            return Err(CollectError::InvalidRow {
                identifier: row.identifier,
                detail: "already present in the store".into(),
            });
        }

        self.write_row(&row)
            .map_err(|e| CollectError::StoreWriteFailed {
                path: self.path.clone(),
                source: e,
            })?;
        debug!("Appended row for {}", row.identifier);
        self.insert(row);
        Ok(())
    }

    /// Atomically rewrite the whole file from the in-memory rows.
    pub fn persist(&mut self) -> Result<(), CollectError> {
        // The open append handle would point at the replaced inode.
        self.writer = None;
        write_atomically(&self.path, &self.header, &self.rows).map_err(|e| {
            CollectError::StoreWriteFailed {
                path: self.path.clone(),
                source: e,
            }
        })?;
        self.header_on_disk = true;
        Ok(())
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn empty(path: PathBuf, header: Vec<String>) -> Self {
        Self {
            path,
            header,
            rows: Vec::new(),
            index: HashMap::new(),
            header_on_disk: false,
            writer: None,
        }
    }

    fn insert(&mut self, row: Row) {
        self.index.insert(row.identifier.clone(), self.rows.len());
        self.rows.push(row);
    }

    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.open_writer()?);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::other("store writer unavailable"));
        };

        if !self.header_on_disk {
            writer.write_record(&self.header).map_err(io::Error::from)?;
        }
        writer.write_record(row.record()).map_err(io::Error::from)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.header_on_disk = true;
        Ok(())
    }

    fn open_writer(&self) -> io::Result<csv::Writer<File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        // A hand-edited file may lack the final newline; the next record
        // would otherwise be glued onto the last one.
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }

        Ok(csv_writer(file))
    }
}

fn header_for(fields: &[String]) -> Vec<String> {
    std::iter::once(IDENTIFIER_COLUMN.to_string())
        .chain(fields.iter().cloned())
        .collect()
}

fn csv_writer<W: Write>(w: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(w)
}

fn corrupt(path: &Path, e: csv::Error) -> CollectError {
    CollectError::CorruptStore {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Temp file in the destination directory + rename, so the target is either
/// the old file or the complete new one.
fn write_atomically(path: &Path, header: &[String], rows: &[Row]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    let mut writer = csv_writer(tmp);
    writer.write_record(header).map_err(io::Error::from)?;
    for row in rows {
        writer.write_record(row.record()).map_err(io::Error::from)?;
    }
    let tmp = writer
        .into_inner()
        .map_err(|e| io::Error::other(e.to_string()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
