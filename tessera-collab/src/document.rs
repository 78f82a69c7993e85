//! The canonical shared document and its owner.
//!
//! [`DocumentStore`] is the only writer of a [`Document`]. Every mutation
//! goes through it and bumps a revision counter, which the persistence
//! timer compares against the last saved revision.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tessera_codec::sauce::{DATA_TYPE_CHARACTER, DATA_TYPE_XBIN, FILE_TYPE_ANSI};
use tessera_codec::{
    decode_xbin, encode_ansi, encode_xbin, import_stamp, CellGrid, CodecError, LetterSpacing,
    Sauce,
};

use crate::protocol::{Delta, SettingChange};
use crate::storage::{FileStore, StoreError};

/// Oldest chat entries are evicted beyond this.
pub const MAX_CHAT_LOG: usize = 128;

pub const DEFAULT_FONT: &str = "IBM VGA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub handle: String,
    pub text: String,
}

/// Everything but the cells, as sent in `start` and saved as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub columns: u16,
    pub rows: u16,
    pub letter_spacing: bool,
    pub ice_colours: bool,
    pub font_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub chat_log: Vec<ChatEntry>,
}

/// Metadata plus the raw little-endian cell dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub metadata: DocumentMetadata,
    pub cells: Vec<u8>,
}

impl Snapshot {
    pub fn metadata_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub letter_spacing: bool,
    pub ice_colours: bool,
    pub font_name: String,
    pub title: String,
    pub author: String,
    pub group: String,
    chat_log: VecDeque<ChatEntry>,
    cells: CellGrid,
}

impl Document {
    fn blank(columns: u16, rows: u16, font_name: &str) -> Self {
        Self {
            letter_spacing: false,
            ice_colours: false,
            font_name: font_name.to_string(),
            title: String::new(),
            author: String::new(),
            group: String::new(),
            chat_log: VecDeque::with_capacity(MAX_CHAT_LOG),
            cells: CellGrid::new(columns, rows),
        }
    }

    pub fn columns(&self) -> u16 {
        self.cells.columns()
    }

    pub fn rows(&self) -> u16 {
        self.cells.rows()
    }

    pub fn cells(&self) -> &CellGrid {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<u16> {
        self.cells.get(index)
    }

    pub fn chat_log(&self) -> impl Iterator<Item = &ChatEntry> {
        self.chat_log.iter()
    }

    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            columns: self.columns(),
            rows: self.rows(),
            letter_spacing: self.letter_spacing,
            ice_colours: self.ice_colours,
            font_name: self.font_name.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            group: self.group.clone(),
            chat_log: self.chat_log.iter().cloned().collect(),
        }
    }

    fn sauce(&self, data_type: u8, file_type: u8) -> Sauce {
        let spacing = if self.letter_spacing {
            LetterSpacing::NinePixel
        } else {
            LetterSpacing::EightPixel
        };
        Sauce {
            title: self.title.clone(),
            author: self.author.clone(),
            group: self.group.clone(),
            date: Sauce::today(),
            file_size: 0,
            data_type,
            file_type,
            width: self.columns(),
            height: self.rows(),
            flags: Sauce::make_flags(self.ice_colours, spacing),
            font_name: self.font_name.clone(),
        }
    }
}

/// Document errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("cell index {index} out of range for {len} cells")]
    IndexOutOfRange { index: u32, len: usize },
    #[error("invalid document dimensions {columns}x{rows}")]
    InvalidDimensions { columns: u16, rows: u16 },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Owner of the canonical document.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    document: Document,
    revision: u64,
}

impl DocumentStore {
    /// Blank `columns × rows` document with default cells.
    pub fn new(columns: u16, rows: u16, font_name: &str) -> Result<Self, DocumentError> {
        check_dimensions(columns, rows)?;
        Ok(Self {
            document: Document::blank(columns, rows, font_name),
            revision: 0,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Incremented by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply_delta(&mut self, index: u32, value: u16) -> Result<(), DocumentError> {
        let len = self.document.cells.len();
        if !self.document.cells.set(index as usize, value) {
            return Err(DocumentError::IndexOutOfRange { index, len });
        }
        self.revision += 1;
        Ok(())
    }

    /// Apply a whole `draw` payload, or nothing if any index is out of range.
    pub fn apply_deltas(&mut self, deltas: &[Delta]) -> Result<(), DocumentError> {
        let len = self.document.cells.len();
        if let Some(bad) = deltas.iter().find(|d| d.index as usize >= len) {
            return Err(DocumentError::IndexOutOfRange {
                index: bad.index,
                len,
            });
        }
        for delta in deltas {
            self.document.cells.set(delta.index as usize, delta.value);
        }
        if !deltas.is_empty() {
            self.revision += 1;
        }
        Ok(())
    }

    pub fn append_chat(&mut self, handle: &str, text: &str) {
        if self.document.chat_log.len() == MAX_CHAT_LOG {
            self.document.chat_log.pop_front();
        }
        self.document.chat_log.push_back(ChatEntry {
            handle: handle.to_string(),
            text: text.to_string(),
        });
        self.revision += 1;
    }

    /// Reallocate the cell buffer, keeping the overlapping region.
    pub fn resize(&mut self, columns: u16, rows: u16) -> Result<(), DocumentError> {
        check_dimensions(columns, rows)?;
        self.document.cells.resize(columns, rows);
        self.revision += 1;
        Ok(())
    }

    pub fn set_ice_colours(&mut self, on: bool) {
        self.document.ice_colours = on;
        self.revision += 1;
    }

    pub fn set_letter_spacing(&mut self, on: bool) {
        self.document.letter_spacing = on;
        self.revision += 1;
    }

    pub fn set_font(&mut self, font_name: &str) {
        self.document.font_name = font_name.to_string();
        self.revision += 1;
    }

    pub fn set_sauce(&mut self, title: &str, author: &str, group: &str) {
        self.document.title = title.to_string();
        self.document.author = author.to_string();
        self.document.group = group.to_string();
        self.revision += 1;
    }

    /// Apply a document-wide setting change.
    pub fn apply_setting(&mut self, change: &SettingChange) -> Result<(), DocumentError> {
        match change {
            SettingChange::Resize { columns, rows } => self.resize(*columns, *rows)?,
            SettingChange::IceColours(on) => self.set_ice_colours(*on),
            SettingChange::LetterSpacing(on) => self.set_letter_spacing(*on),
            SettingChange::Font(name) => self.set_font(name),
            SettingChange::Sauce {
                title,
                author,
                group,
            } => self.set_sauce(title, author, group),
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            metadata: self.document.metadata(),
            cells: self.document.cells.to_le_bytes(),
        }
    }

    /// Rebuild a document from a snapshot. The cell dump must hold exactly
    /// `columns * rows` words.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, DocumentError> {
        let meta = &snapshot.metadata;
        check_dimensions(meta.columns, meta.rows)?;
        let cells = CellGrid::from_le_bytes(meta.columns, meta.rows, &snapshot.cells)?;
        let mut chat_log: VecDeque<ChatEntry> = meta.chat_log.iter().cloned().collect();
        while chat_log.len() > MAX_CHAT_LOG {
            chat_log.pop_front();
        }
        Ok(Self {
            document: Document {
                letter_spacing: meta.letter_spacing,
                ice_colours: meta.ice_colours,
                font_name: meta.font_name.clone(),
                title: meta.title.clone(),
                author: meta.author.clone(),
                group: meta.group.clone(),
                chat_log,
                cells,
            },
            revision: 0,
        })
    }

    /// Write the metadata file, then the cell file.
    ///
    /// The two writes are independent: a failure between them leaves a
    /// mismatched pair on disk, which [`DocumentStore::restore`] rejects.
    pub fn persist(&self, store: &FileStore) -> Result<(), StoreError> {
        store.save(&self.snapshot())
    }

    pub fn restore(store: &FileStore) -> Result<Self, StoreError> {
        let snapshot = store.load()?;
        Self::from_snapshot(&snapshot)
            .map_err(|e| StoreError::InvalidFormat(format!("stored document rejected: {e}")))
    }

    /// Build a document from an XBin file, taking SAUCE fields when present.
    pub fn import_xbin(bytes: &[u8]) -> Result<Self, DocumentError> {
        let image = decode_xbin(bytes)?;
        check_dimensions(image.grid.columns(), image.grid.rows())?;
        let mut document = Document::blank(image.grid.columns(), image.grid.rows(), DEFAULT_FONT);
        document.cells = image.grid;
        document.ice_colours = image.no_blink;
        if let Some(sauce) = image.sauce {
            document.letter_spacing = sauce.letter_spacing() == LetterSpacing::NinePixel;
            document.title = sauce.title;
            document.author = sauce.author;
            document.group = sauce.group;
            if !sauce.font_name.is_empty() {
                document.font_name = sauce.font_name;
            }
        }
        Ok(Self {
            document,
            revision: 0,
        })
    }

    /// XBin file with a SAUCE trailer.
    pub fn export_xbin(&self) -> Vec<u8> {
        let doc = &self.document;
        let mut out = encode_xbin(&doc.cells, doc.ice_colours);
        doc.sauce(DATA_TYPE_XBIN, 0).append_to(&mut out);
        out
    }

    /// ANSI stream with a SAUCE trailer.
    pub fn export_ansi(&self) -> Vec<u8> {
        let doc = &self.document;
        let mut out = encode_ansi(&doc.cells);
        doc.sauce(DATA_TYPE_CHARACTER, FILE_TYPE_ANSI).append_to(&mut out);
        out
    }

    /// Deltas that paste a stamp with its top-left corner at `(x, y)`.
    /// Cells falling outside the document are dropped.
    pub fn stamp_deltas(&self, x: u16, y: u16, stamp: &[u8]) -> Result<Vec<Delta>, DocumentError> {
        let grid = import_stamp(stamp)?;
        let cells = &self.document.cells;
        let mut deltas = Vec::with_capacity(grid.len());
        for sy in 0..grid.rows() {
            for sx in 0..grid.columns() {
                let (Some(tx), Some(ty)) = (x.checked_add(sx), y.checked_add(sy)) else {
                    continue;
                };
                let (Some(target), Some(source)) = (cells.index_of(tx, ty), grid.index_of(sx, sy))
                else {
                    continue;
                };
                if let Some(value) = grid.get(source) {
                    deltas.push(Delta::new(target as u32, value));
                }
            }
        }
        Ok(deltas)
    }
}

fn check_dimensions(columns: u16, rows: u16) -> Result<(), DocumentError> {
    if columns == 0 || rows == 0 {
        return Err(DocumentError::InvalidDimensions { columns, rows });
    }
    Ok(())
}
