//! # tessera-codec: cell packing and legacy art-file formats
//!
//! Everything here is pure and synchronous; the collaboration layer calls
//! into it only at document I/O boundaries (load, save, export, stamps).
//!
//! ## Modules
//!
//! - [`cell`]: 16-bit cell word packing
//! - [`grid`]: fixed-size cell buffer with resize and sub-image copy
//! - [`lz77`]: LZ77 compressor with configurable pointer width
//! - [`xbin`]: XBin encode/decode
//! - [`ansi`]: ANSI escape-sequence export
//! - [`sauce`]: SAUCE metadata trailer
//! - [`stamp`]: compressed sub-image blobs

pub mod ansi;
pub mod cell;
pub mod error;
pub mod grid;
pub mod lz77;
pub mod sauce;
pub mod stamp;
pub mod xbin;

pub use ansi::encode_ansi;
pub use cell::{pack, unpack, Cell};
pub use error::CodecError;
pub use grid::CellGrid;
pub use sauce::{LetterSpacing, Sauce};
pub use stamp::{export_stamp, import_stamp};
pub use xbin::{decode_xbin, encode_xbin, XBinImage};
