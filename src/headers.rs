//! This module contains the PE32+ headers needed to find the data directory and section table of an image,
//! along with the constants that make up the layout contract.
//!
//! Objects taken directly from C are prefixed with "Image" and closely resemble their C counterparts,
//! named to conform to Rust standards. Unlike C, they are not cast out of the buffer: each one is decoded
//! field by field at fixed little-endian offsets (see [`Record`](crate::records::Record)), so every width
//! below can be checked by reading the field table next to it.

use bitflags::bitflags;

use byteorder::{ByteOrder, LittleEndian};

use chrono::{DateTime, TimeZone, Utc};

use std::cmp;

use crate::records::Record;

pub const DOS_SIGNATURE: u16 = 0x5A4D;
pub const NT_SIGNATURE: u32  = 0x00004550;
pub const HDR32_MAGIC: u16   = 0x010B;
pub const HDR64_MAGIC: u16   = 0x020B;

/// Offset of `e_lfanew` within the DOS header.
pub const E_LFANEW_OFFSET: usize = 0x3C;

/// The bytes that open the COFF header: `PE\0\0`.
pub const PE_SIGNATURE: [u8; 4] = [0x50, 0x45, 0x00, 0x00];
pub const PE_SIGNATURE_SIZE: usize = PE_SIGNATURE.len();

const fn sum_widths(widths: &[usize]) -> usize {
    let mut total = 0;
    let mut i = 0;

    while i < widths.len() {
        total += widths[i];
        i += 1;
    }

    total
}

/// Field widths of [`ImageFileHeader`](ImageFileHeader), in declaration order.
pub const FILE_HEADER_FIELD_WIDTHS: [usize; 7] = [2, 2, 4, 4, 4, 2, 2];
pub const COFF_HEADER_SIZE: usize = sum_widths(&FILE_HEADER_FIELD_WIDTHS);

/// Field widths of [`ImageOptionalHeader64`](ImageOptionalHeader64), in declaration order, from `magic`
/// through `number_of_rva_and_sizes`.
pub const OPTIONAL_HEADER64_FIELD_WIDTHS: [usize; 29] = [
    2,          // magic
    1, 1,       // linker version
    4, 4, 4,    // code and data sizes
    4, 4,       // entry point, base of code
    8,          // image base
    4, 4,       // section and file alignment
    2, 2, 2, 2, 2, 2,
    4, 4, 4, 4, // win32 version, image size, headers size, checksum
    2, 2,       // subsystem, dll characteristics
    8, 8, 8, 8, // stack and heap
    4, 4,       // loader flags, number of rva and sizes
];

/// Width of the PE32+ optional header up to the start of its data directory.
pub const OPTIONAL_HEADER64_FIXED_SIZE: usize = sum_widths(&OPTIONAL_HEADER64_FIELD_WIDTHS);

pub const DATA_DIRECTORY_ENTRIES: usize = 16;
pub const DATA_DIRECTORY_ENTRY_SIZE: usize = 8;
pub const DATA_DIRECTORY_SIZE: usize = DATA_DIRECTORY_ENTRIES * DATA_DIRECTORY_ENTRY_SIZE;

/// Distance from the PE signature to the first data directory entry.
pub const DATA_DIRECTORY_OFFSET: usize = PE_SIGNATURE_SIZE + COFF_HEADER_SIZE + OPTIONAL_HEADER64_FIXED_SIZE;

/// Distance from the PE signature to the byte following the data directory.
pub const SECTION_HEADER_TABLE_OFFSET: usize = DATA_DIRECTORY_OFFSET + DATA_DIRECTORY_SIZE;

/// Per-section stride used when sizing the section header table region.
///
/// This is wider than [`SECTION_HEADER_SIZE`](SECTION_HEADER_SIZE), so a region sized with it reaches
/// past the last section header into whatever follows the table.
pub const SECTION_HEADER_TABLE_STRIDE: usize = 64;

pub const SECTION_NAME_SIZE: usize = 8;
/// Field widths of [`ImageSectionHeader`](ImageSectionHeader), name and characteristics included.
pub const SECTION_HEADER_FIELD_WIDTHS: [usize; 10] = [SECTION_NAME_SIZE, 4, 4, 4, 4, 4, 4, 2, 2, 4];
pub const SECTION_HEADER_SIZE: usize = sum_widths(&SECTION_HEADER_FIELD_WIDTHS);

bitflags! {
    /// A bitflag structure representing file characteristics in the file header.
    #[derive(Default)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED         = 0x0001;
        const EXECUTABLE_IMAGE        = 0x0002;
        const LINE_NUMS_STRIPPED      = 0x0004;
        const LOCAL_SYMS_STRIPPED     = 0x0008;
        const AGGRESSIVE_WS_TRIM      = 0x0010;
        const LARGE_ADDRESS_AWARE     = 0x0020;
        const BYTES_REVERSED_LO       = 0x0080;
        const MACHINE_32BIT           = 0x0100;
        const DEBUG_STRIPPED          = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP       = 0x0800;
        const SYSTEM                  = 0x1000;
        const DLL                     = 0x2000;
        const UP_SYSTEM_ONLY          = 0x4000;
        const BYTES_REVERSED_HI       = 0x8000;
    }
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: FileCharacteristics,
}
impl ImageFileHeader {
    /// The link time of the image, or `None` if chrono cannot represent it.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time_date_stamp as i64, 0).single()
    }
}
impl Record for ImageFileHeader {
    const SIZE: usize = COFF_HEADER_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            machine: LittleEndian::read_u16(&bytes[0..2]),
            number_of_sections: LittleEndian::read_u16(&bytes[2..4]),
            time_date_stamp: LittleEndian::read_u32(&bytes[4..8]),
            pointer_to_symbol_table: LittleEndian::read_u32(&bytes[8..12]),
            number_of_symbols: LittleEndian::read_u32(&bytes[12..16]),
            size_of_optional_header: LittleEndian::read_u16(&bytes[16..18]),
            characteristics: FileCharacteristics::from_bits_truncate(LittleEndian::read_u16(&bytes[18..20])),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u16(&mut bytes[0..2], self.machine);
        LittleEndian::write_u16(&mut bytes[2..4], self.number_of_sections);
        LittleEndian::write_u32(&mut bytes[4..8], self.time_date_stamp);
        LittleEndian::write_u32(&mut bytes[8..12], self.pointer_to_symbol_table);
        LittleEndian::write_u32(&mut bytes[12..16], self.number_of_symbols);
        LittleEndian::write_u16(&mut bytes[16..18], self.size_of_optional_header);
        LittleEndian::write_u16(&mut bytes[18..20], self.characteristics.bits());
    }
}

bitflags! {
    /// A series of bitflags representing DLL characteristics.
    #[derive(Default)]
    pub struct DLLCharacteristics: u16 {
        const HIGH_ENTROPY_VA       = 0x0020;
        const DYNAMIC_BASE          = 0x0040;
        const FORCE_INTEGRITY       = 0x0080;
        const NX_COMPAT             = 0x0100;
        const NO_ISOLATION          = 0x0200;
        const NO_SEH                = 0x0400;
        const NO_BIND               = 0x0800;
        const APPCONTAINER          = 0x1000;
        const WDM_DRIVER            = 0x2000;
        const GUARD_CF              = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// The fixed portion of the PE32+ optional header. The data directory that follows it is decoded
/// separately as [`DataDir`](crate::records::DataDir) entries.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct ImageOptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: DLLCharacteristics,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}
impl Record for ImageOptionalHeader64 {
    const SIZE: usize = OPTIONAL_HEADER64_FIXED_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            magic: LittleEndian::read_u16(&bytes[0..2]),
            major_linker_version: bytes[2],
            minor_linker_version: bytes[3],
            size_of_code: LittleEndian::read_u32(&bytes[4..8]),
            size_of_initialized_data: LittleEndian::read_u32(&bytes[8..12]),
            size_of_uninitialized_data: LittleEndian::read_u32(&bytes[12..16]),
            address_of_entry_point: LittleEndian::read_u32(&bytes[16..20]),
            base_of_code: LittleEndian::read_u32(&bytes[20..24]),
            image_base: LittleEndian::read_u64(&bytes[24..32]),
            section_alignment: LittleEndian::read_u32(&bytes[32..36]),
            file_alignment: LittleEndian::read_u32(&bytes[36..40]),
            major_operating_system_version: LittleEndian::read_u16(&bytes[40..42]),
            minor_operating_system_version: LittleEndian::read_u16(&bytes[42..44]),
            major_image_version: LittleEndian::read_u16(&bytes[44..46]),
            minor_image_version: LittleEndian::read_u16(&bytes[46..48]),
            major_subsystem_version: LittleEndian::read_u16(&bytes[48..50]),
            minor_subsystem_version: LittleEndian::read_u16(&bytes[50..52]),
            win32_version_value: LittleEndian::read_u32(&bytes[52..56]),
            size_of_image: LittleEndian::read_u32(&bytes[56..60]),
            size_of_headers: LittleEndian::read_u32(&bytes[60..64]),
            checksum: LittleEndian::read_u32(&bytes[64..68]),
            subsystem: LittleEndian::read_u16(&bytes[68..70]),
            dll_characteristics: DLLCharacteristics::from_bits_truncate(LittleEndian::read_u16(&bytes[70..72])),
            size_of_stack_reserve: LittleEndian::read_u64(&bytes[72..80]),
            size_of_stack_commit: LittleEndian::read_u64(&bytes[80..88]),
            size_of_heap_reserve: LittleEndian::read_u64(&bytes[88..96]),
            size_of_heap_commit: LittleEndian::read_u64(&bytes[96..104]),
            loader_flags: LittleEndian::read_u32(&bytes[104..108]),
            number_of_rva_and_sizes: LittleEndian::read_u32(&bytes[108..112]),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        LittleEndian::write_u16(&mut bytes[0..2], self.magic);
        bytes[2] = self.major_linker_version;
        bytes[3] = self.minor_linker_version;
        LittleEndian::write_u32(&mut bytes[4..8], self.size_of_code);
        LittleEndian::write_u32(&mut bytes[8..12], self.size_of_initialized_data);
        LittleEndian::write_u32(&mut bytes[12..16], self.size_of_uninitialized_data);
        LittleEndian::write_u32(&mut bytes[16..20], self.address_of_entry_point);
        LittleEndian::write_u32(&mut bytes[20..24], self.base_of_code);
        LittleEndian::write_u64(&mut bytes[24..32], self.image_base);
        LittleEndian::write_u32(&mut bytes[32..36], self.section_alignment);
        LittleEndian::write_u32(&mut bytes[36..40], self.file_alignment);
        LittleEndian::write_u16(&mut bytes[40..42], self.major_operating_system_version);
        LittleEndian::write_u16(&mut bytes[42..44], self.minor_operating_system_version);
        LittleEndian::write_u16(&mut bytes[44..46], self.major_image_version);
        LittleEndian::write_u16(&mut bytes[46..48], self.minor_image_version);
        LittleEndian::write_u16(&mut bytes[48..50], self.major_subsystem_version);
        LittleEndian::write_u16(&mut bytes[50..52], self.minor_subsystem_version);
        LittleEndian::write_u32(&mut bytes[52..56], self.win32_version_value);
        LittleEndian::write_u32(&mut bytes[56..60], self.size_of_image);
        LittleEndian::write_u32(&mut bytes[60..64], self.size_of_headers);
        LittleEndian::write_u32(&mut bytes[64..68], self.checksum);
        LittleEndian::write_u16(&mut bytes[68..70], self.subsystem);
        LittleEndian::write_u16(&mut bytes[70..72], self.dll_characteristics.bits());
        LittleEndian::write_u64(&mut bytes[72..80], self.size_of_stack_reserve);
        LittleEndian::write_u64(&mut bytes[80..88], self.size_of_stack_commit);
        LittleEndian::write_u64(&mut bytes[88..96], self.size_of_heap_reserve);
        LittleEndian::write_u64(&mut bytes[96..104], self.size_of_heap_commit);
        LittleEndian::write_u32(&mut bytes[104..108], self.loader_flags);
        LittleEndian::write_u32(&mut bytes[108..112], self.number_of_rva_and_sizes);
    }
}

bitflags! {
    /// A series of bitflags representing section characteristics.
    #[derive(Default)]
    pub struct SectionCharacteristics: u32 {
        const TYPE_NO_PAD            = 0x00000008;
        const CNT_CODE               = 0x00000020;
        const CNT_INITIALIZED_DATA   = 0x00000040;
        const CNT_UNINITIALIZED_DATA = 0x00000080;
        const LNK_INFO               = 0x00000200;
        const LNK_REMOVE             = 0x00000800;
        const LNK_COMDAT             = 0x00001000;
        const GPREL                  = 0x00008000;
        const ALIGN_MASK             = 0x00F00000;
        const LNK_NRELOC_OVFL        = 0x01000000;
        const MEM_DISCARDABLE        = 0x02000000;
        const MEM_NOT_CACHED         = 0x04000000;
        const MEM_NOT_PAGED          = 0x08000000;
        const MEM_SHARED             = 0x10000000;
        const MEM_EXECUTE            = 0x20000000;
        const MEM_READ               = 0x40000000;
        const MEM_WRITE              = 0x80000000;
    }
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct ImageSectionHeader {
    pub name: [u8; SECTION_NAME_SIZE],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: SectionCharacteristics,
}
impl ImageSectionHeader {
    /// Set the name of this section. The name will be truncated to eight bytes. If `name` is
    /// [`None`](Option::None), it zeroes out the name field.
    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = [0u8; SECTION_NAME_SIZE];

        if let Some(new_name) = name {
            let name_len = cmp::min(new_name.len(), SECTION_NAME_SIZE);
            self.name[..name_len].copy_from_slice(&new_name.as_bytes()[..name_len]);
        }
    }
    /// Get the name of this section up to its first zero byte. Invalid UTF-8 is replaced.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(SECTION_NAME_SIZE);

        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
    /// Check whether `rva` falls inside `[virtual_address, virtual_address + size_of_raw_data)`.
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.size_of_raw_data as u64;

        start <= rva as u64 && (rva as u64) < end
    }
}
impl Record for ImageSectionHeader {
    const SIZE: usize = SECTION_HEADER_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        let mut name = [0u8; SECTION_NAME_SIZE];
        name.copy_from_slice(&bytes[0..8]);

        Self {
            name,
            virtual_size: LittleEndian::read_u32(&bytes[8..12]),
            virtual_address: LittleEndian::read_u32(&bytes[12..16]),
            size_of_raw_data: LittleEndian::read_u32(&bytes[16..20]),
            pointer_to_raw_data: LittleEndian::read_u32(&bytes[20..24]),
            pointer_to_relocations: LittleEndian::read_u32(&bytes[24..28]),
            pointer_to_linenumbers: LittleEndian::read_u32(&bytes[28..32]),
            number_of_relocations: LittleEndian::read_u16(&bytes[32..34]),
            number_of_linenumbers: LittleEndian::read_u16(&bytes[34..36]),
            characteristics: SectionCharacteristics::from_bits_truncate(LittleEndian::read_u32(&bytes[36..40])),
        }
    }
    fn encode(&self, bytes: &mut [u8]) {
        bytes[0..8].copy_from_slice(&self.name);
        LittleEndian::write_u32(&mut bytes[8..12], self.virtual_size);
        LittleEndian::write_u32(&mut bytes[12..16], self.virtual_address);
        LittleEndian::write_u32(&mut bytes[16..20], self.size_of_raw_data);
        LittleEndian::write_u32(&mut bytes[20..24], self.pointer_to_raw_data);
        LittleEndian::write_u32(&mut bytes[24..28], self.pointer_to_relocations);
        LittleEndian::write_u32(&mut bytes[28..32], self.pointer_to_linenumbers);
        LittleEndian::write_u16(&mut bytes[32..34], self.number_of_relocations);
        LittleEndian::write_u16(&mut bytes[34..36], self.number_of_linenumbers);
        LittleEndian::write_u32(&mut bytes[36..40], self.characteristics.bits());
    }
}

/// Indexes into the data directory table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageDirectoryEntry {
    Export         = 0,
    Import         = 1,
    Resource       = 2,
    Exception      = 3,
    Security       = 4,
    BaseReloc      = 5,
    Debug          = 6,
    Architecture   = 7,
    GlobalPTR      = 8,
    TLS            = 9,
    LoadConfig     = 10,
    BoundImport    = 11,
    IAT            = 12,
    DelayImport    = 13,
    COMDescriptor  = 14,
    Reserved       = 15,
}
