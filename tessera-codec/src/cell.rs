//! Single-cell packing.
//!
//! Wire and storage layout of one canvas cell:
//! ```text
//! ┌───────────────┬───────────────┬──────────────────┐
//! │ bits 12..16   │ bits 8..12    │ bits 0..8        │
//! │ background    │ foreground    │ glyph code (CP437)│
//! └───────────────┴───────────────┴──────────────────┘
//! ```
//!
//! The high byte is the same attribute byte XBin stores on disk.

/// Default foreground (light gray).
pub const DEFAULT_FG: u8 = 7;
/// Default background (black).
pub const DEFAULT_BG: u8 = 0;

/// Pack a glyph code and a fg/bg pair into one 16-bit word.
///
/// Colors are masked to 4 bits, so out-of-range inputs never bleed into
/// neighbouring fields.
#[inline]
pub fn pack(code: u8, fg: u8, bg: u8) -> u16 {
    u16::from(code) | (u16::from(attribute(fg, bg)) << 8)
}

/// Split a packed word back into `(code, fg, bg)`.
#[inline]
pub fn unpack(word: u16) -> (u8, u8, u8) {
    let code = (word & 0xFF) as u8;
    let attr = (word >> 8) as u8;
    (code, attr & 0x0F, attr >> 4)
}

/// Combine fg/bg nibbles into the XBin attribute byte.
#[inline]
pub fn attribute(fg: u8, bg: u8) -> u8 {
    (fg & 0x0F) | ((bg & 0x0F) << 4)
}

/// One decoded character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub code: u8,
    pub fg: u8,
    pub bg: u8,
}

impl Cell {
    /// Glyph 0 on the default colors; what a freshly allocated canvas holds.
    pub const DEFAULT: Cell = Cell {
        code: 0,
        fg: DEFAULT_FG,
        bg: DEFAULT_BG,
    };

    pub fn new(code: u8, fg: u8, bg: u8) -> Self {
        Self {
            code,
            fg: fg & 0x0F,
            bg: bg & 0x0F,
        }
    }

    /// Packed 16-bit representation.
    #[inline]
    pub fn pack(self) -> u16 {
        pack(self.code, self.fg, self.bg)
    }

    #[inline]
    pub fn unpack(word: u16) -> Self {
        let (code, fg, bg) = unpack(word);
        Self { code, fg, bg }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u16> for Cell {
    fn from(word: u16) -> Self {
        Cell::unpack(word)
    }
}

impl From<Cell> for u16 {
    fn from(cell: Cell) -> Self {
        cell.pack()
    }
}
