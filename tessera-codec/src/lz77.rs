//! LZ77 byte-stream compression with a configurable pointer width.
//!
//! Encoded layout:
//! ```text
//! ┌──────────────┬───────┬──────────────────────────────┬─────┐
//! │ original len │ width │ token (u16 LE) │ literal (u8)│ ... │
//! │ u32 LE       │ W     │ dist << W | len-1            │     │
//! └──────────────┴───────┴──────────────────────────────┴─────┘
//! ```
//!
//! A record back-references `len` bytes at `dist` and then appends one
//! literal. `dist == 0` is a bare literal. With width `W` a match covers at
//! most `2^W` bytes and reaches back at most `2^(16-W) - 1` bytes.

use crate::error::CodecError;

/// Header: original length (4) + pointer width (1).
pub const HEADER_LEN: usize = 5;
/// Token (2) + literal (1).
pub const RECORD_LEN: usize = 3;
/// Inputs this short can never shrink below their own length.
pub const MIN_COMPRESSIBLE: usize = 12;

/// Smallest and largest supported pointer widths.
pub const MIN_WIDTH: u8 = 1;
pub const MAX_WIDTH: u8 = 15;

#[inline]
fn max_match_len(width: u8) -> usize {
    1usize << width
}

#[inline]
fn max_distance(width: u8) -> usize {
    (1usize << (16 - width)) - 1
}

/// Compress `input` with match lengths of `width` bits.
///
/// Returns `None` when compression is not worthwhile: the input is shorter
/// than [`MIN_COMPRESSIBLE`], or the output grows to the input's size at any
/// point during the scan. Callers store the raw bytes in that case.
pub fn compress(input: &[u8], width: u8) -> Option<Vec<u8>> {
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        log::warn!("lz77: unsupported pointer width {width}");
        return None;
    }
    let n = input.len();
    if n < MIN_COMPRESSIBLE {
        return None;
    }
    let original_len = u32::try_from(n).ok()?;

    let max_len = max_match_len(width);
    let window = max_distance(width);

    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(&original_len.to_le_bytes());
    out.push(width);

    let mut pos = 0;
    while pos < n {
        if out.len() + RECORD_LEN >= n {
            return None;
        }

        // Always leave one byte for the trailing literal.
        let limit = (n - pos - 1).min(max_len);
        let (distance, len) = longest_match(input, pos, limit, window);

        let token = if len == 0 {
            0
        } else {
            ((distance << width) | (len - 1)) as u16
        };
        out.extend_from_slice(&token.to_le_bytes());
        out.push(input[pos + len]);
        pos += len + 1;
    }

    Some(out)
}

/// Longest run at `pos` that repeats bytes `distance` back, capped at
/// `limit`. Ties go to the first (closest) distance scanned.
fn longest_match(input: &[u8], pos: usize, limit: usize, window: usize) -> (usize, usize) {
    let mut best = (0, 0);
    if limit == 0 {
        return best;
    }
    for distance in 1..=pos.min(window) {
        let mut len = 0;
        // Overlap is fine: the decoder copies byte by byte.
        while len < limit && input[pos + len] == input[pos + len - distance] {
            len += 1;
        }
        if len > best.1 {
            best = (distance, len);
            if len == limit {
                break;
            }
        }
    }
    best
}

/// Reverse [`compress`].
///
/// Any reference outside the bytes produced so far, a truncated record, or a
/// stream that does not end exactly at the declared length is a
/// [`CodecError::CorruptStream`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::corrupt(format!(
            "header needs {HEADER_LEN} bytes, got {}",
            data.len()
        )));
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let width = data[4];
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(CodecError::corrupt(format!("pointer width {width} out of range")));
    }

    let body = &data[HEADER_LEN..];
    if body.len() % RECORD_LEN != 0 {
        return Err(CodecError::corrupt("truncated record"));
    }
    let mask = (1u16 << width) - 1;

    // Never trust `declared` for the allocation: bound it by what the
    // records could possibly expand to.
    let bound = (body.len() / RECORD_LEN).saturating_mul(max_match_len(width) + 1);
    let mut out = Vec::with_capacity(declared.min(bound));

    let mut records = body.chunks_exact(RECORD_LEN);
    while out.len() < declared {
        let record = records
            .next()
            .ok_or_else(|| CodecError::corrupt("stream ends before declared length"))?;
        let token = u16::from_le_bytes([record[0], record[1]]);
        let literal = record[2];

        let distance = usize::from(token >> width);
        if distance > 0 {
            let len = usize::from(token & mask) + 1;
            if distance > out.len() {
                return Err(CodecError::corrupt(format!(
                    "distance {distance} reaches before start at offset {}",
                    out.len()
                )));
            }
            if out.len() + len + 1 > declared {
                return Err(CodecError::corrupt("match overruns declared length"));
            }
            let start = out.len() - distance;
            for i in 0..len {
                let byte = out[start + i];
                out.push(byte);
            }
        }
        out.push(literal);
    }

    if records.next().is_some() {
        return Err(CodecError::corrupt("records past declared length"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_art(len: usize) -> Vec<u8> {
        // Runs of repeated glyphs, like blank or shaded stretches of a canvas.
        let mut data = Vec::with_capacity(len);
        let mut i = 0u32;
        while data.len() < len {
            let byte = ((i * 37) % 251) as u8;
            data.extend(std::iter::repeat(byte).take(50));
            i += 1;
        }
        data.truncate(len);
        data
    }

    #[test]
    fn test_short_input_not_compressed() {
        for len in 0..=11 {
            let data = vec![0u8; len];
            for width in MIN_WIDTH..=MAX_WIDTH {
                assert!(compress(&data, width).is_none(), "len {len} width {width}");
            }
        }
    }

    #[test]
    fn test_roundtrip_every_width() {
        let data = sample_art(2048);
        for width in MIN_WIDTH..=MAX_WIDTH {
            match compress(&data, width) {
                Some(packed) => {
                    assert!(packed.len() < data.len());
                    assert_eq!(packed[4], width);
                    assert_eq!(decompress(&packed).unwrap(), data, "width {width}");
                }
                // One-bit lengths cover at most three bytes per three-byte record.
                None => assert_eq!(width, 1),
            }
        }
    }

    #[test]
    fn test_roundtrip_uniform_run() {
        let data = vec![b'x'; 1000];
        let packed = compress(&data, 8).unwrap();
        // 1000 bytes = 1 literal + 3 full matches of 256 + remainder
        assert!(packed.len() < 30, "got {} bytes", packed.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_incompressible_returns_none() {
        // Distinct bytes leave nothing to back-reference.
        let data: Vec<u8> = (0..=255u8).collect();
        assert!(compress(&data, 4).is_none());
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let data = vec![7u8; 300];
        let packed = compress(&data, 6).unwrap();
        assert_eq!(&packed[..4], &300u32.to_le_bytes());
    }

    #[test]
    fn test_invalid_width_rejected() {
        let data = vec![0u8; 100];
        assert!(compress(&data, 0).is_none());
        assert!(compress(&data, 16).is_none());
    }

    #[test]
    fn test_overlapping_self_reference() {
        // "ab" then a match of length 6 at distance 2 expands to "abababab", then 'c'.
        let mut stream = Vec::new();
        stream.extend_from_slice(&9u32.to_le_bytes());
        stream.push(4);
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.push(b'a');
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.push(b'b');
        stream.extend_from_slice(&((2u16 << 4) | 5).to_le_bytes());
        stream.push(b'c');
        assert_eq!(decompress(&stream).unwrap(), b"ababababc");
    }

    #[test]
    fn test_distance_before_start_is_corrupt() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&4u32.to_le_bytes());
        stream.push(4);
        stream.extend_from_slice(&((3u16 << 4) | 1).to_le_bytes());
        stream.push(b'z');
        assert!(matches!(decompress(&stream), Err(CodecError::CorruptStream(_))));
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        let data = sample_art(512);
        let packed = compress(&data, 8).unwrap();
        assert!(decompress(&packed[..packed.len() - 1]).is_err());
        assert!(decompress(&packed[..packed.len() - 3]).is_err());
        assert!(decompress(&packed[..3]).is_err());
    }

    #[test]
    fn test_trailing_records_are_corrupt() {
        let data = vec![1u8; 64];
        let mut packed = compress(&data, 8).unwrap();
        packed.extend_from_slice(&[0, 0, 9]);
        assert!(matches!(decompress(&packed), Err(CodecError::CorruptStream(_))));
    }

    #[test]
    fn test_empty_declared_length() {
        let mut stream = 0u32.to_le_bytes().to_vec();
        stream.push(8);
        assert!(decompress(&stream).unwrap().is_empty());
    }
}
