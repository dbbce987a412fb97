//! The in-memory image: the raw file bytes plus the headers parsed out of them.

use byteorder::{ByteOrder, LittleEndian};

use log::{debug, warn};

use pkbuffer::{Buffer, VecBuffer};

use std::cmp;
use std::io::Cursor;
use std::path::Path;

use crate::buffer;
use crate::headers::*;
use crate::layout;
use crate::records::{DataDir, Record};
use crate::Error;

/// A PE32+ image held in memory.
///
/// The headers are parsed once when the image is loaded. Layout lookups and data directory reads go
/// back to the buffer every time, so they observe patches made with [`write_bytes`](Image::write_bytes).
pub struct Image {
    buffer: VecBuffer,
    pub filename: Option<String>,
    file_header: ImageFileHeader,
    optional_header: ImageOptionalHeader64,
    sections: Vec<ImageSectionHeader>,
}
impl Image {
    /// Load and parse an image from disk.
    pub fn from_file<P: AsRef<Path>>(filename: P) -> Result<Self, Error> {
        let buffer = VecBuffer::from_file(filename.as_ref())?;
        let mut image = Self::from_buffer(buffer)?;
        image.filename = Some(filename.as_ref().to_string_lossy().into_owned());

        Ok(image)
    }
    /// Parse an image from bytes already in memory.
    pub fn from_data<B: AsRef<[u8]>>(data: B) -> Result<Self, Error> {
        Self::from_buffer(VecBuffer::from_data(data))
    }
    fn from_buffer(buffer: VecBuffer) -> Result<Self, Error> {
        let (file_header, optional_header, sections) = parse_headers(buffer.as_slice())?;

        Ok(Self {
            buffer,
            filename: None,
            file_header,
            optional_header,
            sections,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Write the buffer, patches included, to `filename`.
    pub fn save<P: AsRef<Path>>(&self, filename: P) -> Result<(), Error> {
        self.buffer.save(filename)?;

        Ok(())
    }

    pub fn file_header(&self) -> &ImageFileHeader {
        &self.file_header
    }
    pub fn optional_header(&self) -> &ImageOptionalHeader64 {
        &self.optional_header
    }
    /// The section table, in declaration order.
    pub fn sections(&self) -> &[ImageSectionHeader] {
        &self.sections
    }
    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base
    }
    pub fn entry_point(&self) -> u32 {
        self.optional_header.address_of_entry_point
    }
    pub fn size_of_image(&self) -> u32 {
        self.optional_header.size_of_image
    }
    /// Read a data directory entry out of the current buffer contents.
    pub fn data_directory(&self, entry: ImageDirectoryEntry) -> Result<DataDir, Error> {
        let region = layout::data_directory_region(self.as_slice())?;

        DataDir::parse(&region[entry as usize * DATA_DIRECTORY_ENTRY_SIZE..])
    }
    /// Decode a record at `offset` in the buffer.
    pub fn read_record<T: Record>(&self, offset: usize) -> Result<T, Error> {
        match self.as_slice().get(offset..) {
            Some(data) => T::parse(data),
            None => Err(Error::Truncated { needed: T::SIZE, available: 0 }),
        }
    }

    pub fn coff_header_offset(&self) -> Result<usize, Error> {
        layout::coff_header_offset(self.as_slice())
    }
    pub fn data_directory_region(&self) -> Result<&[u8], Error> {
        layout::data_directory_region(self.as_slice())
    }
    pub fn data_directory_entry_offset(&self, virtual_address: u32, size: u32) -> Result<usize, Error> {
        layout::data_directory_entry_offset(self.as_slice(), virtual_address, size)
    }
    /// The size of the section header table region for this image's section count.
    pub fn section_header_table_size(&self) -> Result<usize, Error> {
        layout::section_header_table_size(self.sections.len())
    }
    pub fn section_header_region(&self, table_size: usize) -> Result<&[u8], Error> {
        layout::section_header_region(self.as_slice(), table_size)
    }
    pub fn section_header_entry_offset(&self, local_address: usize) -> Result<usize, Error> {
        layout::section_header_entry_offset(self.as_slice(), local_address)
    }
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize, Error> {
        layout::rva_to_offset(&self.sections, rva)
    }
    pub fn section_bytes(&self, rva: u32, size: u32) -> Result<&[u8], Error> {
        layout::section_bytes(self.as_slice(), &self.sections, rva, size)
    }
    /// Overwrite bytes at `offset`. Nothing is written if the range does not fit.
    pub fn write_bytes(&mut self, offset: usize, replacement: &[u8]) -> Result<(), Error> {
        buffer::write_bytes(self.as_mut_slice(), offset, replacement)
    }
}

fn parse_headers(data: &[u8]) -> Result<(ImageFileHeader, ImageOptionalHeader64, Vec<ImageSectionHeader>), Error> {
    if data.len() < E_LFANEW_OFFSET + 4 {
        return Err(Error::Truncated { needed: E_LFANEW_OFFSET + 4, available: data.len() });
    }

    if LittleEndian::read_u16(&data[0..2]) != DOS_SIGNATURE {
        return Err(Error::InvalidDOSSignature);
    }

    let e_lfanew = LittleEndian::read_u32(&data[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4]) as usize;
    debug!("e_lfanew: {:#x}", e_lfanew);

    match data.get(e_lfanew..e_lfanew.saturating_add(PE_SIGNATURE_SIZE)) {
        Some(signature) if signature == &PE_SIGNATURE[..] => (),
        _ => return Err(Error::InvalidPESignature),
    }

    if let Ok(found) = layout::coff_header_offset(data) {
        if found != e_lfanew {
            warn!("PE signature search hits {:#x} before e_lfanew {:#x}; layout offsets will follow the search", found, e_lfanew);
        }
    }

    let mut cursor = Cursor::new(data);
    cursor.set_position((e_lfanew + PE_SIGNATURE_SIZE) as u64);

    let file_header = ImageFileHeader::read(&mut cursor)?;
    let optional_offset = cursor.position();

    let magic = match data.get(optional_offset as usize..optional_offset as usize + 2) {
        Some(m) => LittleEndian::read_u16(m),
        None => return Err(Error::Truncated { needed: 2, available: data.len().saturating_sub(optional_offset as usize) }),
    };

    if magic != HDR64_MAGIC {
        return Err(Error::UnsupportedMagic(magic));
    }

    let optional_header = ImageOptionalHeader64::read(&mut cursor)?;
    debug!("{:#x}: {:#x?}", optional_offset, optional_header);

    cursor.set_position(optional_offset + file_header.size_of_optional_header as u64);

    let mut sections = Vec::with_capacity(file_header.number_of_sections as usize);

    for _ in 0..file_header.number_of_sections {
        sections.push(ImageSectionHeader::read(&mut cursor)?);
    }

    debug!(
        "{} sections, {} data directories",
        sections.len(),
        cmp::min(optional_header.number_of_rva_and_sizes as usize, DATA_DIRECTORY_ENTRIES)
    );

    Ok((file_header, optional_header, sections))
}
