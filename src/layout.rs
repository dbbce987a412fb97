//! Resolves where the structural regions of a PE32+ image live inside its raw bytes.
//!
//! All offsets are measured from the start of the buffer and derived from the position of the `PE\0\0`
//! signature, which is searched for on every call rather than cached: the buffer may have been patched
//! between two lookups.
//!
//! ```text
//! signature  +4   COFF header (20)
//!            +24  optional header fixed fields (OPTIONAL_HEADER64_FIXED_SIZE)
//!            +136 data directory (16 x 8)
//!            +264 section header table
//! ```

use byteorder::{ByteOrder, LittleEndian};

use log::debug;

use std::ops::Range;

use crate::buffer::find_bytes;
use crate::headers::*;
use crate::Error;

fn checked_range(data: &[u8], offset: usize, len: usize) -> Result<Range<usize>, Error> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(offset..end),
        _ => Err(Error::OutOfRange { offset, len, buffer_len: data.len() }),
    }
}

/// Find the offset of the `PE\0\0` signature that opens the COFF header.
pub fn coff_header_offset(data: &[u8]) -> Result<usize, Error> {
    find_bytes(data, &PE_SIGNATURE).map_err(|_| Error::SignatureNotFound)
}

/// Get the byte range of the data directory table.
pub fn data_directory_range(data: &[u8]) -> Result<Range<usize>, Error> {
    let coff_offset = coff_header_offset(data)?;

    checked_range(data, coff_offset + DATA_DIRECTORY_OFFSET, DATA_DIRECTORY_SIZE)
}

/// Get the bytes of the data directory table.
pub fn data_directory_region(data: &[u8]) -> Result<&[u8], Error> {
    let range = data_directory_range(data)?;

    Ok(&data[range])
}

/// Find the offset of the data directory entry holding exactly `(virtual_address, size)`.
///
/// This is a byte search over the table, not a lookup by index: the first entry (in table order) whose
/// eight bytes match wins.
pub fn data_directory_entry_offset(data: &[u8], virtual_address: u32, size: u32) -> Result<usize, Error> {
    let range = data_directory_range(data)?;

    let mut entry = [0u8; DATA_DIRECTORY_ENTRY_SIZE];
    LittleEndian::write_u32(&mut entry[..4], virtual_address);
    LittleEndian::write_u32(&mut entry[4..], size);

    let index = match find_bytes(&data[range.clone()], &entry) {
        Ok(i) => i,
        Err(_) => return Err(Error::EntryNotFound { virtual_address, size }),
    };

    let offset = range.start + index;
    debug!("data directory entry ({:#x}, {:#x}) at {:#x}", virtual_address, size, offset);

    Ok(offset)
}

/// Get the size in bytes of the region reserved for `section_count` section headers.
pub fn section_header_table_size(section_count: usize) -> Result<usize, Error> {
    if section_count == 0 {
        return Err(Error::EmptyHeader);
    }

    Ok(section_count * SECTION_HEADER_TABLE_STRIDE)
}

/// Get the byte range of `table_size` bytes immediately following the data directory.
pub fn section_header_range(data: &[u8], table_size: usize) -> Result<Range<usize>, Error> {
    let coff_offset = coff_header_offset(data)?;

    checked_range(data, coff_offset + SECTION_HEADER_TABLE_OFFSET, table_size)
}

/// Get `table_size` bytes immediately following the data directory.
pub fn section_header_region(data: &[u8], table_size: usize) -> Result<&[u8], Error> {
    let range = section_header_range(data, table_size)?;

    Ok(&data[range])
}

/// Translate an address local to the section header table into a buffer offset.
pub fn section_header_entry_offset(data: &[u8], local_address: usize) -> Result<usize, Error> {
    let coff_offset = coff_header_offset(data)?;

    Ok(coff_offset + SECTION_HEADER_TABLE_OFFSET + local_address)
}

/// Get the file offset backing `rva`, using the first section in declaration order whose
/// `[virtual_address, virtual_address + size_of_raw_data)` contains it.
pub fn rva_to_offset(sections: &[ImageSectionHeader], rva: u32) -> Result<usize, Error> {
    let section = match sections.iter().find(|s| s.contains_rva(rva)) {
        Some(s) => s,
        None => return Err(Error::SectionNotFound(rva)),
    };

    Ok((rva - section.virtual_address) as usize + section.pointer_to_raw_data as usize)
}

/// Read `size` bytes of section data starting at `rva`.
pub fn section_bytes<'data>(data: &'data [u8], sections: &[ImageSectionHeader], rva: u32, size: u32) -> Result<&'data [u8], Error> {
    let offset = rva_to_offset(sections, rva)?;
    let range = checked_range(data, offset, size as usize)?;

    debug!("section bytes for rva {:#x}: {:#x}..{:#x}", rva, range.start, range.end);

    Ok(&data[range])
}
