//! Sub-image ("stamp") transfer blobs.
//!
//! A stamp is an XBin-encoded grid behind a one-byte tag saying whether
//! the payload went through LZ77 or is stored raw:
//! ```text
//! ┌──────┬────────────────────────────────────┐
//! │ tag  │ XBin bytes  (tag 0)                │
//! │ u8   │ lz77(XBin bytes)  (tag 1)          │
//! └──────┴────────────────────────────────────┘
//! ```

use crate::error::CodecError;
use crate::grid::CellGrid;
use crate::lz77;
use crate::xbin::{decode_xbin, encode_xbin};

/// Pointer width used for stamps: 256-byte matches, 255-byte window.
pub const STAMP_POINTER_WIDTH: u8 = 8;

const TAG_RAW: u8 = 0;
const TAG_LZ77: u8 = 1;

/// Serialize a sub-image, compressing it when that makes it smaller.
pub fn export_stamp(grid: &CellGrid) -> Vec<u8> {
    let xbin = encode_xbin(grid, false);
    match lz77::compress(&xbin, STAMP_POINTER_WIDTH) {
        Some(packed) => {
            let mut out = Vec::with_capacity(packed.len() + 1);
            out.push(TAG_LZ77);
            out.extend_from_slice(&packed);
            out
        }
        None => {
            let mut out = Vec::with_capacity(xbin.len() + 1);
            out.push(TAG_RAW);
            out.extend_from_slice(&xbin);
            out
        }
    }
}

/// Reverse [`export_stamp`].
pub fn import_stamp(blob: &[u8]) -> Result<CellGrid, CodecError> {
    let (&tag, payload) = blob
        .split_first()
        .ok_or_else(|| CodecError::invalid("empty stamp"))?;
    let image = match tag {
        TAG_RAW => decode_xbin(payload)?,
        TAG_LZ77 => decode_xbin(&lz77::decompress(payload)?)?,
        other => return Err(CodecError::invalid(format!("unknown stamp tag {other}"))),
    };
    Ok(image.grid)
}
