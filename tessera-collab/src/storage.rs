//! On-disk document storage.
//!
//! ```text
//! <dir>/
//!   document.json   metadata (camelCase JSON)
//!   cells.bin       columns*rows u16 words, little-endian
//! ```
//!
//! Each file is replaced through a temporary sibling and a rename. The pair
//! is not written atomically: a crash between the two writes leaves
//! metadata and cells from different revisions, and [`FileStore::load`]
//! rejects that pair when the cell count no longer matches.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::document::{DocumentMetadata, Snapshot};

pub const METADATA_FILE: &str = "document.json";
pub const CELLS_FILE: &str = "cells.bin";

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no stored document at {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid stored document: {0}")]
    InvalidFormat(String),
}

/// The two-file store under one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn cells_path(&self) -> PathBuf {
        self.dir.join(CELLS_FILE)
    }

    /// Whether both files are present.
    pub fn exists(&self) -> bool {
        self.metadata_path().is_file() && self.cells_path().is_file()
    }

    pub fn write_metadata(&self, metadata: &DocumentMetadata) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(metadata)?;
        self.replace(&self.metadata_path(), &json)
    }

    pub fn write_cells(&self, cells: &[u8]) -> Result<(), StoreError> {
        self.replace(&self.cells_path(), cells)
    }

    pub fn read_metadata(&self) -> Result<DocumentMetadata, StoreError> {
        let bytes = read_existing(&self.metadata_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn read_cells(&self) -> Result<Vec<u8>, StoreError> {
        read_existing(&self.cells_path())
    }

    /// Write metadata, then cells, as two independent operations.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        self.write_metadata(&snapshot.metadata)?;
        self.write_cells(&snapshot.cells)?;
        log::debug!(
            "Saved {}x{} document to {}",
            snapshot.metadata.columns,
            snapshot.metadata.rows,
            self.dir.display()
        );
        Ok(())
    }

    /// Read both files and check they belong together.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let metadata = self.read_metadata()?;
        let cells = self.read_cells()?;
        let expected = usize::from(metadata.columns) * usize::from(metadata.rows) * 2;
        if cells.len() != expected {
            return Err(StoreError::InvalidFormat(format!(
                "{}x{} metadata expects {expected} cell bytes, {} has {}",
                metadata.columns,
                metadata.rows,
                CELLS_FILE,
                cells.len()
            )));
        }
        Ok(Snapshot { metadata, cells })
    }

    fn replace(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.to_path_buf()),
        _ => StoreError::Io(e),
    })
}
