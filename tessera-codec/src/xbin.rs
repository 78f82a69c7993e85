//! XBin binary art format.
//!
//! ```text
//! ┌────────────┬───────┬────────┬───────────┬───────┬──────────────────────┐
//! │ "XBIN" 1A  │ width │ height │ font size │ flags │ width*height cells   │
//! │ 5 bytes    │ u16LE │ u16LE  │ u8        │ u8    │ [glyph, fg | bg<<4]  │
//! └────────────┴───────┴────────┴───────────┴───────┴──────────────────────┘
//! ```
//!
//! Optionally followed by a SAUCE trailer.

use crate::error::CodecError;
use crate::grid::CellGrid;
use crate::sauce::{Sauce, SAUCE_LEN};

pub const SIGNATURE: &[u8; 5] = b"XBIN\x1A";
pub const HEADER_LEN: usize = 11;
/// Font height written on export (8x16 VGA glyphs).
pub const FONT_SIZE: u8 = 16;

const FLAG_PALETTE: u8 = 0b0000_0001;
const FLAG_FONT: u8 = 0b0000_0010;
const FLAG_COMPRESS: u8 = 0b0000_0100;
const FLAG_NO_BLINK: u8 = 0b0000_1000;
const FLAG_512_CHARS: u8 = 0b0001_0000;

const PALETTE_LEN: usize = 48;

/// Decoded XBin file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XBinImage {
    pub grid: CellGrid,
    pub font_size: u8,
    /// iCE colours: the blink bit selects bright backgrounds.
    pub no_blink: bool,
    pub sauce: Option<Sauce>,
}

/// Serialize a grid as XBin (header + raw cells, no trailer).
pub fn encode_xbin(grid: &CellGrid, no_blink: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + grid.len() * 2);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&grid.columns().to_le_bytes());
    out.extend_from_slice(&grid.rows().to_le_bytes());
    out.push(FONT_SIZE);
    out.push(if no_blink { FLAG_NO_BLINK } else { 0 });
    for &word in grid.words() {
        // Packed words already hold [glyph, attribute] in little-endian order.
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

/// Parse an XBin file.
///
/// Embedded palettes and fonts are skipped. RLE-compressed XBin is not
/// supported. Anything after the cell data other than exactly one SAUCE
/// record is rejected.
pub fn decode_xbin(data: &[u8]) -> Result<XBinImage, CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::invalid(format!(
            "XBin header needs {HEADER_LEN} bytes, got {}",
            data.len()
        )));
    }
    if &data[..5] != SIGNATURE {
        return Err(CodecError::invalid("missing XBIN signature"));
    }
    let columns = u16::from_le_bytes([data[5], data[6]]);
    let rows = u16::from_le_bytes([data[7], data[8]]);
    let font_size = data[9];
    let flags = data[10];

    if flags & FLAG_COMPRESS != 0 {
        return Err(CodecError::invalid("compressed XBin is not supported"));
    }

    let mut pos = HEADER_LEN;
    if flags & FLAG_PALETTE != 0 {
        pos += PALETTE_LEN;
    }
    if flags & FLAG_FONT != 0 {
        let glyphs = if flags & FLAG_512_CHARS != 0 { 512 } else { 256 };
        pos += usize::from(font_size) * glyphs;
    }

    let cell_bytes = usize::from(columns) * usize::from(rows) * 2;
    let body = data
        .get(pos..)
        .filter(|rest| rest.len() >= cell_bytes)
        .ok_or_else(|| {
            CodecError::invalid(format!(
                "{columns}x{rows} XBin needs {cell_bytes} cell bytes after offset {pos}, file has {}",
                data.len()
            ))
        })?;
    let (cells, trailing) = body.split_at(cell_bytes);

    let sauce = match trailing.len() {
        0 => None,
        SAUCE_LEN => Some(Sauce::decode(trailing)?),
        n => {
            return Err(CodecError::invalid(format!(
                "{n} unexpected bytes after XBin cell data"
            )))
        }
    };

    Ok(XBinImage {
        grid: CellGrid::from_le_bytes(columns, rows, cells)?,
        font_size,
        no_blink: flags & FLAG_NO_BLINK != 0,
        sauce,
    })
}
