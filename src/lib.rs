//! [pepatch](https://crates.io/crates/pepatch) locates the structural regions of a PE32+ image held in
//! memory and patches bytes inside them.
//!
//! The crate is built around the [`Image`](Image) object, which owns the raw file bytes alongside a parsed
//! view of the COFF header, the optional header and the section table. Offsets into the image are resolved
//! by [`layout`](layout), which always recomputes them from the current contents of the buffer: a patch
//! written through [`buffer::write_bytes`](buffer::write_bytes) is visible to the next lookup.
//!
//! ```rust,no_run
//! use pepatch::{Image, ImageDirectoryEntry};
//!
//! let mut image = Image::from_file("game.exe").unwrap();
//! let import_dir = image.data_directory(ImageDirectoryEntry::Import).unwrap();
//! let offset = image.data_directory_entry_offset(import_dir.virtual_address, import_dir.size).unwrap();
//!
//! image.write_bytes(offset, &[0u8; 8]).unwrap();
//! image.save("game.patched.exe").unwrap();
//! ```

pub mod buffer;
pub mod headers;
pub mod image;
pub mod layout;
pub mod records;
pub mod stream;
pub mod types;

#[cfg(test)]
mod tests;

pub use crate::buffer::{find_all_bytes, find_bytes, match_bytes, pad_bytes, write_bytes};
pub use crate::headers::*;
pub use crate::image::Image;
pub use crate::records::*;

use pkbuffer::Error as PKError;

use std::fmt;
use std::io::Error as IoError;

/// Errors produced while resolving, decoding or patching an image.
#[derive(Debug)]
pub enum Error {
    /// The `PE\0\0` signature does not occur anywhere in the buffer.
    SignatureNotFound,
    /// The given virtual address and size pair does not appear verbatim in the data directory.
    EntryNotFound { virtual_address: u32, size: u32 },
    /// No section's virtual range contains the given RVA.
    SectionNotFound(u32),
    /// A section header table of zero entries was requested.
    EmptyHeader,
    /// A range starting at `offset` of `len` bytes does not fit in a buffer of `buffer_len` bytes.
    OutOfRange { offset: usize, len: usize, buffer_len: usize },
    /// A fixed-width record needed `needed` bytes but only `available` remained.
    Truncated { needed: usize, available: usize },
    /// The needle was not found in the haystack.
    NoMatch,
    /// The buffer does not start with `MZ`.
    InvalidDOSSignature,
    /// The offset named by `e_lfanew` does not hold `PE\0\0`.
    InvalidPESignature,
    /// The optional header magic is not the PE32+ magic.
    UnsupportedMagic(u16),
    IoError(IoError),
    PKBufferError(PKError),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureNotFound => write!(f, "PE signature not found"),
            Self::EntryNotFound { virtual_address, size } =>
                write!(f, "data directory entry (va {:#x}, size {:#x}) not found", virtual_address, size),
            Self::SectionNotFound(rva) => write!(f, "no section contains rva {:#x}", rva),
            Self::EmptyHeader => write!(f, "section header size is 0"),
            Self::OutOfRange { offset, len, buffer_len } =>
                write!(f, "range {:#x}+{:#x} is out of bounds of a {:#x}-byte buffer", offset, len, buffer_len),
            Self::Truncated { needed, available } =>
                write!(f, "record truncated: needed {} bytes, {} available", needed, available),
            Self::NoMatch => write!(f, "no bytes matched"),
            Self::InvalidDOSSignature => write!(f, "invalid DOS signature"),
            Self::InvalidPESignature => write!(f, "invalid PE signature"),
            Self::UnsupportedMagic(magic) => write!(f, "unsupported optional header magic {:#06x}", magic),
            Self::IoError(e) => write!(f, "i/o error: {}", e),
            Self::PKBufferError(e) => write!(f, "buffer error: {:?}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}
impl From<IoError> for Error {
    fn from(io_err: IoError) -> Self {
        Self::IoError(io_err)
    }
}
impl From<PKError> for Error {
    fn from(pk_err: PKError) -> Self {
        Self::PKBufferError(pk_err)
    }
}
