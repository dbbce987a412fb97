//! Small types shared by the formats built on top of patched images: UTF-16 strings and archive
//! index entries.

use widestring::U16String;

/// Encode `value` as UTF-16 with little-endian code units and no terminator.
pub fn utf8_to_utf16le(value: &str) -> Vec<u8> {
    U16String::from_str(value)
        .as_slice()
        .iter()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// A file stored in an archive, addressed by its offset and uncompressed size.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct FileEntry {
    pub filename: String,
    pub filename_lower: u32,
    pub filename_upper: u32,
    pub offset: u64,
    pub uncompressed_size: u64,
}

/// Maps a filename hash back to the filename.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct DataEntry {
    pub hash: u32,
    pub filename: String,
}

/// Get the first entry whose hash is `hash`.
pub fn find_by_hash(entries: &[DataEntry], hash: u32) -> Option<&DataEntry> {
    entries.iter().find(|e| e.hash == hash)
}

/// Get the first entry named `filename`.
pub fn find_by_filename<'a>(entries: &'a [DataEntry], filename: &str) -> Option<&'a DataEntry> {
    entries.iter().find(|e| e.filename == filename)
}
