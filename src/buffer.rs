//! This module contains the byte-level primitives the rest of the crate is built on: exact substring search
//! over a byte buffer and bounds-checked in-place patching.
//!
//! Everything here operates on plain slices, so it works equally on an [`Image`](crate::Image)'s buffer,
//! a sub-region returned by [`layout`](crate::layout), or any other byte data.

use crate::Error;

/// Check whether every byte of `needle` equals the corresponding byte at the start of `window`.
///
/// The caller guarantees `window.len() >= needle.len()`; a shorter window panics on indexing.
///
/// ```rust
/// use pepatch::buffer::match_bytes;
///
/// assert!(match_bytes(b"PE\0\0\x64\x86", b"PE\0\0"));
/// assert!(!match_bytes(b"MZ\x90\0", b"PE"));
/// ```
pub fn match_bytes(window: &[u8], needle: &[u8]) -> bool {
    for i in 0..needle.len() {
        if window[i] != needle[i] {
            return false;
        }
    }

    true
}

/// Find the lowest offset in `haystack` at which `needle` occurs.
///
/// Fails with [`Error::NoMatch`](Error::NoMatch) if the needle is absent, longer than the haystack, or empty.
///
/// ```rust
/// use pepatch::buffer::find_bytes;
///
/// assert_eq!(find_bytes(b"MZ\0\0PE\0\0", b"PE\0\0").unwrap(), 4);
/// assert!(find_bytes(b"MZ", b"PE\0\0").is_err());
/// ```
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Result<usize, Error> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Err(Error::NoMatch);
    }

    for i in 0..=(haystack.len() - needle.len()) {
        if haystack[i] == needle[0] && match_bytes(&haystack[i..], needle) {
            return Ok(i);
        }
    }

    Err(Error::NoMatch)
}

/// Find every offset in `haystack` at which `needle` occurs, overlapping occurrences included.
/// Returns an empty vector if nothing is found.
pub fn find_all_bytes(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    haystack.windows(needle.len())
        .enumerate()
        .filter(|(_, window)| match_bytes(window, needle))
        .map(|(i, _)| i)
        .collect()
}

/// Overwrite `data[offset..offset+replacement.len()]` with `replacement`.
///
/// The write is all-or-nothing: if the range does not fit in `data`, nothing is written and
/// [`Error::OutOfRange`](Error::OutOfRange) is returned.
pub fn write_bytes(data: &mut [u8], offset: usize, replacement: &[u8]) -> Result<(), Error> {
    let end = offset.checked_add(replacement.len());

    match end {
        Some(e) if e <= data.len() => {
            data[offset..e].copy_from_slice(replacement);
            Ok(())
        },
        _ => Err(Error::OutOfRange { offset, len: replacement.len(), buffer_len: data.len() }),
    }
}

/// Zero-extend `data` to `size` bytes. Data already at least `size` bytes long is returned unchanged,
/// never truncated.
///
/// ```rust
/// use pepatch::buffer::pad_bytes;
///
/// assert_eq!(pad_bytes(vec![1, 2], 4), vec![1, 2, 0, 0]);
/// assert_eq!(pad_bytes(vec![1, 2, 3], 2), vec![1, 2, 3]);
/// ```
pub fn pad_bytes(mut data: Vec<u8>, size: usize) -> Vec<u8> {
    if data.len() < size {
        data.resize(size, 0);
    }

    data
}
