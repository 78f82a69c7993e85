//! ANSI (SGR escape sequence) export.
//!
//! Only encoding is provided; the stream is written for viewers, not read
//! back.

use crate::cell::{DEFAULT_BG, DEFAULT_FG};
use crate::grid::CellGrid;

const ESC: u8 = 0x1B;
const RESET: &[u8] = b"\x1b[0m";

/// EGA palette order to ANSI SGR order: blue/red and cyan/brown swap.
const EGA_TO_ANSI: [u8; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

/// Glyphs that would be read as control bytes inside the stream, with the
/// substitutes exported in their place.
fn safe_glyph(code: u8) -> u8 {
    match code {
        10 => 9,
        13 => 14,
        26 => 16,
        27 => 17,
        other => other,
    }
}

/// Attribute state carried between cells.
#[derive(Debug, Clone, Copy)]
struct Pen {
    fg: u8,
    bg: u8,
    bold: bool,
    blink: bool,
}

impl Pen {
    const RESET: Pen = Pen {
        fg: DEFAULT_FG,
        bg: DEFAULT_BG,
        bold: false,
        blink: false,
    };
}

/// Encode a grid as an ANSI byte stream in row-major order.
///
/// Bright foregrounds are expressed as bold, bright backgrounds as blink.
/// All attribute changes needed before a cell go into one `ESC[...m`.
pub fn encode_ansi(grid: &CellGrid) -> Vec<u8> {
    let mut out = Vec::with_capacity(RESET.len() + grid.len() * 2);
    out.extend_from_slice(RESET);

    let mut pen = Pen::RESET;
    let mut attrs: Vec<String> = Vec::with_capacity(4);

    for cell in grid.cells() {
        let bold = cell.fg >= 8;
        let fg = if bold { cell.fg - 8 } else { cell.fg };
        let blink = cell.bg >= 8;
        let bg = if blink { cell.bg - 8 } else { cell.bg };

        attrs.clear();
        if (pen.bold && !bold) || (pen.blink && !blink) {
            attrs.push("0".to_string());
            pen = Pen::RESET;
        }
        if bold && !pen.bold {
            attrs.push("1".to_string());
            pen.bold = true;
        }
        if blink && !pen.blink {
            attrs.push("5".to_string());
            pen.blink = true;
        }
        if fg != pen.fg {
            attrs.push(format!("3{}", EGA_TO_ANSI[usize::from(fg)]));
            pen.fg = fg;
        }
        if bg != pen.bg {
            attrs.push(format!("4{}", EGA_TO_ANSI[usize::from(bg)]));
            pen.bg = bg;
        }

        if !attrs.is_empty() {
            out.push(ESC);
            out.push(b'[');
            out.extend_from_slice(attrs.join(";").as_bytes());
            out.push(b'm');
        }
        out.push(safe_glyph(cell.code));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn grid_of(cells: &[Cell]) -> CellGrid {
        let words = cells.iter().map(|c| c.pack()).collect();
        CellGrid::from_words(cells.len() as u16, 1, words).unwrap()
    }

    #[test]
    fn test_default_colors_need_no_escapes() {
        let grid = grid_of(&[Cell::new(b'h', 7, 0), Cell::new(b'i', 7, 0)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0mhi");
    }

    #[test]
    fn test_color_remap() {
        // EGA blue (1) is ANSI 4, EGA cyan (3) is ANSI 6.
        let grid = grid_of(&[Cell::new(b'a', 1, 3)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[34;46ma");
        let grid = grid_of(&[Cell::new(b'a', 4, 6)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[31;43ma");
    }

    #[test]
    fn test_bold_and_blink() {
        // Bright white on bright blue.
        let grid = grid_of(&[Cell::new(b'x', 15, 9)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[1;5;44mx");
    }

    #[test]
    fn test_reset_when_bold_turns_off() {
        let grid = grid_of(&[Cell::new(b'a', 12, 0), Cell::new(b'b', 2, 0)]);
        // 12 = bold red (EGA 4 → ANSI 1); then plain green needs a reset first.
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[1;31ma\x1b[0;32mb");
    }

    #[test]
    fn test_reset_restores_default_tracking() {
        // After a reset the pen is back to 7/0, so a plain 7/0 cell needs only the reset.
        let grid = grid_of(&[Cell::new(b'a', 15, 0), Cell::new(b'b', 7, 0)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[1ma\x1b[0mb");
    }

    #[test]
    fn test_unchanged_attributes_not_repeated() {
        let grid = grid_of(&[Cell::new(b'a', 2, 1), Cell::new(b'b', 2, 1)]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x1b[32;44mab");
    }

    #[test]
    fn test_control_glyphs_substituted() {
        let grid = grid_of(&[
            Cell::new(10, 7, 0),
            Cell::new(13, 7, 0),
            Cell::new(26, 7, 0),
            Cell::new(27, 7, 0),
        ]);
        assert_eq!(encode_ansi(&grid), b"\x1b[0m\x09\x0e\x10\x11");
    }
}
