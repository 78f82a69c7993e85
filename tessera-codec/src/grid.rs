//! Fixed-size buffer of packed cells.
//!
//! `words.len() == columns * rows` holds for the whole lifetime of a grid;
//! every operation that changes the dimensions reallocates.

use crate::cell::Cell;
use crate::error::CodecError;

/// Row-major buffer of packed cell words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    columns: u16,
    rows: u16,
    words: Vec<u16>,
}

impl CellGrid {
    /// Allocate a grid filled with [`Cell::DEFAULT`].
    pub fn new(columns: u16, rows: u16) -> Self {
        let len = usize::from(columns) * usize::from(rows);
        Self {
            columns,
            rows,
            words: vec![Cell::DEFAULT.pack(); len],
        }
    }

    /// Wrap an existing word buffer, checking its length.
    pub fn from_words(columns: u16, rows: u16, words: Vec<u16>) -> Result<Self, CodecError> {
        let expected = usize::from(columns) * usize::from(rows);
        if words.len() != expected {
            return Err(CodecError::invalid(format!(
                "{columns}x{rows} grid needs {expected} cells, got {}",
                words.len()
            )));
        }
        Ok(Self {
            columns,
            rows,
            words,
        })
    }

    /// Rebuild a grid from its little-endian byte dump.
    pub fn from_le_bytes(columns: u16, rows: u16, bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::invalid(format!(
                "cell dump has odd length {}",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_words(columns, rows, words)
    }

    /// Flat little-endian dump, two bytes per cell.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 2);
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.words.get(index).copied()
    }

    /// Overwrite one cell. Returns `false` (and writes nothing) when `index`
    /// is outside the grid.
    pub fn set(&mut self, index: usize, word: u16) -> bool {
        match self.words.get_mut(index) {
            Some(slot) => {
                *slot = word;
                true
            }
            None => false,
        }
    }

    /// Linear index of `(x, y)`, if inside the grid.
    pub fn index_of(&self, x: u16, y: u16) -> Option<usize> {
        if x < self.columns && y < self.rows {
            Some(usize::from(y) * usize::from(self.columns) + usize::from(x))
        } else {
            None
        }
    }

    pub fn cell_at(&self, x: u16, y: u16) -> Option<Cell> {
        self.index_of(x, y).map(|i| Cell::unpack(self.words[i]))
    }

    /// Decoded cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.words.iter().map(|&w| Cell::unpack(w))
    }

    /// Reallocate to new dimensions, keeping the overlapping top-left region.
    pub fn resize(&mut self, columns: u16, rows: u16) {
        if columns == self.columns && rows == self.rows {
            return;
        }
        let mut resized = CellGrid::new(columns, rows);
        let copy_cols = usize::from(columns.min(self.columns));
        let copy_rows = usize::from(rows.min(self.rows));
        for y in 0..copy_rows {
            let src = y * usize::from(self.columns);
            let dst = y * usize::from(columns);
            resized.words[dst..dst + copy_cols].copy_from_slice(&self.words[src..src + copy_cols]);
        }
        *self = resized;
    }

    /// Copy out the sub-image at `(x, y)` of at most `width × height`,
    /// clipped to the grid bounds.
    pub fn region(&self, x: u16, y: u16, width: u16, height: u16) -> CellGrid {
        let width = width.min(self.columns.saturating_sub(x));
        let height = height.min(self.rows.saturating_sub(y));
        let mut words = Vec::with_capacity(usize::from(width) * usize::from(height));
        for row in y..y + height {
            let start = usize::from(row) * usize::from(self.columns) + usize::from(x);
            words.extend_from_slice(&self.words[start..start + usize::from(width)]);
        }
        CellGrid {
            columns: width,
            rows: height,
            words,
        }
    }
}
