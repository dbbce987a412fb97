//! Fixed-width little-endian records.
//!
//! Each record type knows its exact byte width and decodes its fields at fixed offsets. None of them
//! check that the decoded values make sense; whoever positioned the cursor owns that.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use std::cmp;
use std::io::{Cursor, Write};

use crate::headers::*;
use crate::image::Image;
use crate::types::utf8_to_utf16le;
use crate::Error;

/// A value with a fixed little-endian byte layout.
pub trait Record: Sized {
    /// Width of the record in bytes.
    const SIZE: usize;

    /// Decode the record from `bytes`, which is at least [`SIZE`](Record::SIZE) bytes long.
    fn decode(bytes: &[u8]) -> Self;
    /// Encode the record into `bytes`, which is at least [`SIZE`](Record::SIZE) bytes long.
    fn encode(&self, bytes: &mut [u8]);

    /// Decode the record from the start of `data`.
    fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::Truncated { needed: Self::SIZE, available: data.len() });
        }

        Ok(Self::decode(&data[..Self::SIZE]))
    }
    /// Decode the record at the cursor's position and advance the cursor past it.
    ///
    /// If fewer than [`SIZE`](Record::SIZE) bytes remain, fails with [`Error::Truncated`](Error::Truncated)
    /// and leaves the cursor where it was.
    fn read<T: AsRef<[u8]>>(cursor: &mut Cursor<T>) -> Result<Self, Error> {
        let position = cursor.position();
        let record = {
            let data = cursor.get_ref().as_ref();
            let start = cmp::min(position, data.len() as u64) as usize;
            let available = data.len() - start;

            if available < Self::SIZE {
                return Err(Error::Truncated { needed: Self::SIZE, available });
            }

            Self::decode(&data[start..start + Self::SIZE])
        };

        cursor.set_position(position + Self::SIZE as u64);

        Ok(record)
    }
    /// Encode the record into a fresh vector of [`SIZE`](Record::SIZE) bytes.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        self.encode(&mut bytes);

        bytes
    }
    /// Encode the record onto a writer.
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(&self.to_bytes())?;

        Ok(())
    }
}

/// An import descriptor, as found in the import directory.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct ImportDescriptor {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name: u32,
    pub first_thunk: u32,
}
impl Record for ImportDescriptor {
    const SIZE: usize = 20;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            characteristics: LittleEndian::read_u32(&bytes[0..4]),
            time_date_stamp: LittleEndian::read_u32(&bytes[4..8]),
            forwarder_chain: LittleEndian::read_u32(&bytes[8..12]),
            name: LittleEndian::read_u32(&bytes[12..16]),
            first_thunk: LittleEndian::read_u32(&bytes[16..20]),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u32(&mut bytes[0..4], self.characteristics);
        LittleEndian::write_u32(&mut bytes[4..8], self.time_date_stamp);
        LittleEndian::write_u32(&mut bytes[8..12], self.forwarder_chain);
        LittleEndian::write_u32(&mut bytes[12..16], self.name);
        LittleEndian::write_u32(&mut bytes[16..20], self.first_thunk);
    }
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct Thunk {
    pub function: u32,
    pub data_address: u32,
}
impl Record for Thunk {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            function: LittleEndian::read_u32(&bytes[0..4]),
            data_address: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u32(&mut bytes[0..4], self.function);
        LittleEndian::write_u32(&mut bytes[4..8], self.data_address);
    }
}

/// A data directory entry: where a directory lives and how large it is.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct DataDir {
    pub virtual_address: u32,
    pub size: u32,
}
impl DataDir {
    pub fn new(virtual_address: u32, size: u32) -> Self {
        Self { virtual_address, size }
    }
    /// An entry with a zero address names no directory.
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0
    }
}
impl Record for DataDir {
    const SIZE: usize = DATA_DIRECTORY_ENTRY_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            virtual_address: LittleEndian::read_u32(&bytes[0..4]),
            size: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u32(&mut bytes[0..4], self.virtual_address);
        LittleEndian::write_u32(&mut bytes[4..8], self.size);
    }
}

/// One encrypted block of a protected section. The unknown and padding fields are carried verbatim.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct EncBlock {
    pub virtual_address: u32,
    pub raw_size: u32,
    pub virtual_size: u32,
    pub unknown: u32,
    pub crc: u32,
    pub unknown2: u32,
    pub crc2: u32,
    pub pad: u32,
    pub file_offset: u32,
    pub pad2: u64,
    pub pad3: u32,
}
impl Record for EncBlock {
    const SIZE: usize = 48;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            virtual_address: LittleEndian::read_u32(&bytes[0..4]),
            raw_size: LittleEndian::read_u32(&bytes[4..8]),
            virtual_size: LittleEndian::read_u32(&bytes[8..12]),
            unknown: LittleEndian::read_u32(&bytes[12..16]),
            crc: LittleEndian::read_u32(&bytes[16..20]),
            unknown2: LittleEndian::read_u32(&bytes[20..24]),
            crc2: LittleEndian::read_u32(&bytes[24..28]),
            pad: LittleEndian::read_u32(&bytes[28..32]),
            file_offset: LittleEndian::read_u32(&bytes[32..36]),
            pad2: LittleEndian::read_u64(&bytes[36..44]),
            pad3: LittleEndian::read_u32(&bytes[44..48]),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u32(&mut bytes[0..4], self.virtual_address);
        LittleEndian::write_u32(&mut bytes[4..8], self.raw_size);
        LittleEndian::write_u32(&mut bytes[8..12], self.virtual_size);
        LittleEndian::write_u32(&mut bytes[12..16], self.unknown);
        LittleEndian::write_u32(&mut bytes[16..20], self.crc);
        LittleEndian::write_u32(&mut bytes[20..24], self.unknown2);
        LittleEndian::write_u32(&mut bytes[24..28], self.crc2);
        LittleEndian::write_u32(&mut bytes[28..32], self.pad);
        LittleEndian::write_u32(&mut bytes[32..36], self.file_offset);
        LittleEndian::write_u64(&mut bytes[36..44], self.pad2);
        LittleEndian::write_u32(&mut bytes[44..48], self.pad3);
    }
}

/// The description of a protected image handed to the downstream format: where the original entry
/// point is, how the image is laid out, and which blocks were encrypted.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct SectionRecord {
    pub content_id: String,
    pub original_entry_point: u64,
    pub enc_blocks: Vec<EncBlock>,
    pub image_base: u64,
    pub size_of_image: u32,
    pub import_dir: DataDir,
    pub iat_dir: DataDir,
    pub reloc_dir: DataDir,
}
impl SectionRecord {
    /// Fill a record from the parsed headers of `image`. Fails if any of the three directories cannot
    /// be read from the image's data directory.
    pub fn from_image(image: &Image, content_id: &str, enc_blocks: Vec<EncBlock>) -> Result<Self, Error> {
        Ok(Self {
            content_id: content_id.to_string(),
            original_entry_point: image.entry_point() as u64,
            enc_blocks,
            image_base: image.image_base(),
            size_of_image: image.size_of_image(),
            import_dir: image.data_directory(ImageDirectoryEntry::Import)?,
            iat_dir: image.data_directory(ImageDirectoryEntry::IAT)?,
            reloc_dir: image.data_directory(ImageDirectoryEntry::BaseReloc)?,
        })
    }
    /// Serialize the record: the content id as zero-terminated UTF-16LE, the entry point, the block
    /// count and blocks, then the image fields and the three directories.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(&utf8_to_utf16le(&self.content_id))?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u64::<LittleEndian>(self.original_entry_point)?;
        writer.write_u32::<LittleEndian>(self.enc_blocks.len() as u32)?;

        for block in &self.enc_blocks {
            block.write_to(writer)?;
        }

        writer.write_u64::<LittleEndian>(self.image_base)?;
        writer.write_u32::<LittleEndian>(self.size_of_image)?;
        self.import_dir.write_to(writer)?;
        self.iat_dir.write_to(writer)?;
        self.reloc_dir.write_to(writer)?;

        Ok(())
    }
    /// The serialized form of [`write_to`](SectionRecord::write_to) as a vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;

        Ok(bytes)
    }
}
