//! SAUCE metadata trailer.
//!
//! Fixed 129-byte record appended to art files:
//! ```text
//! off  len  field
//!   0    1  EOF marker 0x1A
//!   1    7  "SAUCE00"
//!   8   35  title        (space padded)
//!  43   20  author       (space padded)
//!  63   20  group        (space padded)
//!  83    8  date         YYYYMMDD
//!  91    4  file size    u32 LE
//!  95    1  data type
//!  96    1  file type
//!  97    2  width        u16 LE
//!  99    2  height       u16 LE
//! 101    5  (unused info fields, zero)
//! 106    1  flags
//! 107   22  font name    (zero padded)
//! ```

use crate::error::CodecError;

pub const SAUCE_LEN: usize = 129;
pub const SIGNATURE: &[u8; 7] = b"SAUCE00";
const EOF_MARKER: u8 = 0x1A;

pub const TITLE_LEN: usize = 35;
pub const AUTHOR_LEN: usize = 20;
pub const GROUP_LEN: usize = 20;
pub const DATE_LEN: usize = 8;
pub const FONT_LEN: usize = 22;

const TITLE_AT: usize = 8;
const AUTHOR_AT: usize = 43;
const GROUP_AT: usize = 63;
const DATE_AT: usize = 83;
const FILE_SIZE_AT: usize = 91;
const DATA_TYPE_AT: usize = 95;
const FILE_TYPE_AT: usize = 96;
const WIDTH_AT: usize = 97;
const HEIGHT_AT: usize = 99;
const FLAGS_AT: usize = 106;
const FONT_AT: usize = 107;

/// SAUCE data type: character-based (ANSI, ASCII, ...).
pub const DATA_TYPE_CHARACTER: u8 = 1;
/// SAUCE data type: XBin.
pub const DATA_TYPE_XBIN: u8 = 6;
/// Character file type: ANSi.
pub const FILE_TYPE_ANSI: u8 = 1;

const FLAG_ICE_COLOURS: u8 = 0b0000_0001;
const LETTER_SPACING_SHIFT: u8 = 1;
const LETTER_SPACING_MASK: u8 = 0b0000_0110;

/// Letter-spacing preference stored in flag bits 1-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterSpacing {
    Unspecified,
    EightPixel,
    NinePixel,
}

/// Decoded SAUCE record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sauce {
    pub title: String,
    pub author: String,
    pub group: String,
    /// `YYYYMMDD`
    pub date: String,
    /// Size of the file content preceding the trailer.
    pub file_size: u32,
    pub data_type: u8,
    pub file_type: u8,
    pub width: u16,
    pub height: u16,
    pub flags: u8,
    pub font_name: String,
}

impl Sauce {
    /// Today's local date in SAUCE form.
    pub fn today() -> String {
        chrono::Local::now().format("%Y%m%d").to_string()
    }

    /// Compose the flags byte.
    pub fn make_flags(ice_colours: bool, letter_spacing: LetterSpacing) -> u8 {
        let ls = match letter_spacing {
            LetterSpacing::Unspecified => 0,
            LetterSpacing::EightPixel => 1,
            LetterSpacing::NinePixel => 2,
        };
        let ice = if ice_colours { FLAG_ICE_COLOURS } else { 0 };
        ice | (ls << LETTER_SPACING_SHIFT)
    }

    pub fn ice_colours(&self) -> bool {
        self.flags & FLAG_ICE_COLOURS != 0
    }

    pub fn letter_spacing(&self) -> LetterSpacing {
        match (self.flags & LETTER_SPACING_MASK) >> LETTER_SPACING_SHIFT {
            1 => LetterSpacing::EightPixel,
            2 => LetterSpacing::NinePixel,
            _ => LetterSpacing::Unspecified,
        }
    }

    /// Serialize into the fixed 129-byte record.
    pub fn encode(&self) -> [u8; SAUCE_LEN] {
        let mut out = [0u8; SAUCE_LEN];
        out[0] = EOF_MARKER;
        out[1..8].copy_from_slice(SIGNATURE);
        write_field(&mut out[TITLE_AT..TITLE_AT + TITLE_LEN], &self.title, b' ');
        write_field(&mut out[AUTHOR_AT..AUTHOR_AT + AUTHOR_LEN], &self.author, b' ');
        write_field(&mut out[GROUP_AT..GROUP_AT + GROUP_LEN], &self.group, b' ');
        write_field(&mut out[DATE_AT..DATE_AT + DATE_LEN], &self.date, b' ');
        out[FILE_SIZE_AT..FILE_SIZE_AT + 4].copy_from_slice(&self.file_size.to_le_bytes());
        out[DATA_TYPE_AT] = self.data_type;
        out[FILE_TYPE_AT] = self.file_type;
        out[WIDTH_AT..WIDTH_AT + 2].copy_from_slice(&self.width.to_le_bytes());
        out[HEIGHT_AT..HEIGHT_AT + 2].copy_from_slice(&self.height.to_le_bytes());
        out[FLAGS_AT] = self.flags;
        write_field(&mut out[FONT_AT..FONT_AT + FONT_LEN], &self.font_name, 0);
        out
    }

    /// Parse exactly one 129-byte record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != SAUCE_LEN {
            return Err(CodecError::invalid(format!(
                "SAUCE record must be {SAUCE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != EOF_MARKER || &bytes[1..8] != SIGNATURE {
            return Err(CodecError::invalid("missing SAUCE00 signature"));
        }
        Ok(Self {
            title: read_field(&bytes[TITLE_AT..TITLE_AT + TITLE_LEN]),
            author: read_field(&bytes[AUTHOR_AT..AUTHOR_AT + AUTHOR_LEN]),
            group: read_field(&bytes[GROUP_AT..GROUP_AT + GROUP_LEN]),
            date: read_field(&bytes[DATE_AT..DATE_AT + DATE_LEN]),
            file_size: u32::from_le_bytes([
                bytes[FILE_SIZE_AT],
                bytes[FILE_SIZE_AT + 1],
                bytes[FILE_SIZE_AT + 2],
                bytes[FILE_SIZE_AT + 3],
            ]),
            data_type: bytes[DATA_TYPE_AT],
            file_type: bytes[FILE_TYPE_AT],
            width: u16::from_le_bytes([bytes[WIDTH_AT], bytes[WIDTH_AT + 1]]),
            height: u16::from_le_bytes([bytes[HEIGHT_AT], bytes[HEIGHT_AT + 1]]),
            flags: bytes[FLAGS_AT],
            font_name: read_field(&bytes[FONT_AT..FONT_AT + FONT_LEN]),
        })
    }

    /// Split a file into its content and trailing SAUCE record, if one is
    /// present at the very end.
    pub fn split_trailer(file: &[u8]) -> (&[u8], Option<Sauce>) {
        if file.len() < SAUCE_LEN {
            return (file, None);
        }
        let (content, tail) = file.split_at(file.len() - SAUCE_LEN);
        match Sauce::decode(tail) {
            Ok(sauce) => (content, Some(sauce)),
            Err(_) => (file, None),
        }
    }

    /// Append this record to `content`, stamping `file_size` from it.
    pub fn append_to(&self, content: &mut Vec<u8>) {
        let mut record = self.clone();
        record.file_size = u32::try_from(content.len()).unwrap_or(u32::MAX);
        content.extend_from_slice(&record.encode());
    }
}

fn write_field(dst: &mut [u8], value: &str, pad: u8) {
    dst.fill(pad);
    // Non-ASCII characters have no single-byte form here.
    for (slot, ch) in dst.iter_mut().zip(value.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
}

fn read_field(src: &[u8]) -> String {
    let text: String = src
        .iter()
        .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
        .collect();
    text.trim_end_matches([' ', '\0']).to_string()
}
