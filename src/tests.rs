use std::io::Cursor;

use super::*;
use super::layout::*;
use super::stream::*;
use super::types::*;

const E_LFANEW: usize = 0x80;
const RAW_DATA_START: usize = 0x400;

fn section(name: &str, virtual_address: u32, size_of_raw_data: u32, pointer_to_raw_data: u32) -> ImageSectionHeader {
    let mut header = ImageSectionHeader {
        virtual_size: size_of_raw_data,
        virtual_address,
        size_of_raw_data,
        pointer_to_raw_data,
        characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
        ..Default::default()
    };
    header.set_name(Some(name));

    header
}

/// Lay out a minimal PE32+ file: DOS header, headers at `E_LFANEW`, section data from `RAW_DATA_START`.
fn build_pe64(sections: &[ImageSectionHeader], directories: &[(ImageDirectoryEntry, DataDir)]) -> Vec<u8> {
    let raw_end = sections.iter()
        .map(|s| (s.pointer_to_raw_data + s.size_of_raw_data) as usize)
        .max()
        .unwrap_or(RAW_DATA_START);
    let mut data = vec![0u8; std::cmp::max(raw_end, RAW_DATA_START)];

    data[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
    data[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4].copy_from_slice(&(E_LFANEW as u32).to_le_bytes());
    data[E_LFANEW..E_LFANEW + 4].copy_from_slice(&PE_SIGNATURE);

    let file_header = ImageFileHeader {
        machine: 0x8664,
        number_of_sections: sections.len() as u16,
        time_date_stamp: 0x5F5E1000,
        size_of_optional_header: (OPTIONAL_HEADER64_FIXED_SIZE + DATA_DIRECTORY_SIZE) as u16,
        characteristics: FileCharacteristics::EXECUTABLE_IMAGE | FileCharacteristics::LARGE_ADDRESS_AWARE,
        ..Default::default()
    };
    let mut offset = E_LFANEW + PE_SIGNATURE_SIZE;
    file_header.encode(&mut data[offset..offset + ImageFileHeader::SIZE]);
    offset += ImageFileHeader::SIZE;

    let optional_header = ImageOptionalHeader64 {
        magic: HDR64_MAGIC,
        address_of_entry_point: 0x1010,
        image_base: 0x140000000,
        section_alignment: 0x1000,
        file_alignment: 0x200,
        size_of_image: 0x4000,
        size_of_headers: RAW_DATA_START as u32,
        number_of_rva_and_sizes: DATA_DIRECTORY_ENTRIES as u32,
        ..Default::default()
    };
    optional_header.encode(&mut data[offset..offset + ImageOptionalHeader64::SIZE]);
    offset += ImageOptionalHeader64::SIZE;

    for (entry, dir) in directories {
        let at = offset + *entry as usize * DATA_DIRECTORY_ENTRY_SIZE;
        dir.encode(&mut data[at..at + DataDir::SIZE]);
    }
    offset += DATA_DIRECTORY_SIZE;

    for header in sections {
        header.encode(&mut data[offset..offset + ImageSectionHeader::SIZE]);
        offset += ImageSectionHeader::SIZE;
    }

    data
}

fn sample_pe64() -> Vec<u8> {
    let sections = [
        section(".text", 0x1000, 0x200, 0x400),
        section(".rdata", 0x2000, 0x200, 0x600),
    ];
    let mut data = build_pe64(&sections, &[
        (ImageDirectoryEntry::Import, DataDir::new(0x1000, 0x20)),
        (ImageDirectoryEntry::IAT, DataDir::new(0x2000, 0x40)),
    ]);

    for (i, byte) in data[0x600..0x800].iter_mut().enumerate() {
        *byte = i as u8;
    }

    data
}

#[test]
fn test_layout_constants() {
    assert_eq!(COFF_HEADER_SIZE, 20);
    assert_eq!(OPTIONAL_HEADER64_FIXED_SIZE, 112);
    assert_eq!(OPTIONAL_HEADER64_FIXED_SIZE + DATA_DIRECTORY_SIZE, 240);
    assert_eq!(DATA_DIRECTORY_OFFSET, 136);
    assert_eq!(SECTION_HEADER_TABLE_OFFSET, 264);
    assert_eq!(SECTION_HEADER_SIZE, 40);
    assert_eq!(ImageOptionalHeader64::SIZE, OPTIONAL_HEADER64_FIXED_SIZE);
    assert_eq!(ImageSectionHeader::SIZE, SECTION_HEADER_SIZE);
}

#[test]
fn test_find_bytes() {
    assert_eq!(find_bytes(b"xxabyab", b"ab").unwrap(), 2);
    assert_eq!(find_bytes(b"aaaa", b"aa").unwrap(), 0);
    assert_eq!(find_bytes(b"abc", b"abc").unwrap(), 0);
    assert_eq!(find_bytes(b"xyzabc", b"c").unwrap(), 5);

    assert!(matches!(find_bytes(b"ab", b"abc"), Err(Error::NoMatch)));
    assert!(matches!(find_bytes(b"abcabc", b"cb"), Err(Error::NoMatch)));
    assert!(matches!(find_bytes(b"abc", b""), Err(Error::NoMatch)));
    assert!(matches!(find_bytes(b"", b"a"), Err(Error::NoMatch)));

    assert_eq!(find_all_bytes(b"aaaa", b"aa"), vec![0, 1, 2]);
    assert_eq!(find_all_bytes(b"abcabc", b"bc"), vec![1, 4]);
    assert!(find_all_bytes(b"abc", b"").is_empty());
}

#[test]
fn test_match_bytes() {
    assert!(match_bytes(b"PE\0\0rest", b"PE\0\0"));
    assert!(match_bytes(b"anything", b""));
    assert!(!match_bytes(b"PE\0\x01", b"PE\0\0"));
}

#[test]
fn test_write_bytes() {
    let mut data = vec![0u8; 8];

    write_bytes(&mut data, 2, &[1, 2, 3]).unwrap();
    assert_eq!(data, vec![0, 0, 1, 2, 3, 0, 0, 0]);

    write_bytes(&mut data, 5, &[9, 9, 9]).unwrap();
    assert_eq!(data, vec![0, 0, 1, 2, 3, 9, 9, 9]);

    let before = data.clone();
    let result = write_bytes(&mut data, 6, &[7, 7, 7]);
    assert!(matches!(result, Err(Error::OutOfRange { offset: 6, len: 3, buffer_len: 8 })));
    assert_eq!(data, before);

    assert!(write_bytes(&mut data, usize::MAX, &[1]).is_err());
    assert_eq!(data, before);
}

#[test]
fn test_pad_bytes() {
    assert_eq!(pad_bytes(vec![1, 2, 3], 0), vec![1, 2, 3]);
    assert_eq!(pad_bytes(vec![1, 2, 3], 3), vec![1, 2, 3]);

    let padded = pad_bytes(vec![1, 2, 3], 6);
    assert_eq!(padded.len(), 6);
    assert_eq!(&padded[..3], &[1, 2, 3]);
    assert!(padded[3..].iter().all(|&b| b == 0));

    assert_eq!(pad_bytes(Vec::new(), 2), vec![0, 0]);
}

#[test]
fn test_coff_header_offset() {
    let data = sample_pe64();
    assert_eq!(coff_header_offset(&data).unwrap(), E_LFANEW);

    assert!(matches!(coff_header_offset(&[0u8; 64]), Err(Error::SignatureNotFound)));
}

#[test]
fn test_data_directory_region() {
    let data = sample_pe64();
    let region = data_directory_region(&data).unwrap();

    assert_eq!(region.len(), DATA_DIRECTORY_SIZE);
    assert_eq!(DataDir::parse(&region[8..]).unwrap(), DataDir::new(0x1000, 0x20));
    assert_eq!(DataDir::parse(&region[96..]).unwrap(), DataDir::new(0x2000, 0x40));

    let truncated = &data[..E_LFANEW + DATA_DIRECTORY_OFFSET + 10];
    assert!(matches!(data_directory_region(truncated), Err(Error::OutOfRange { .. })));
}

#[test]
fn test_data_directory_entry_offset() {
    let data = sample_pe64();
    let base = E_LFANEW + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE + OPTIONAL_HEADER64_FIXED_SIZE;

    let import = data_directory_entry_offset(&data, 0x1000, 0x20).unwrap();
    assert_eq!(import, base + ImageDirectoryEntry::Import as usize * DATA_DIRECTORY_ENTRY_SIZE);
    assert_eq!(&data[import..import + 8], &hex::decode("0010000020000000").unwrap()[..]);

    let iat = data_directory_entry_offset(&data, 0x2000, 0x40).unwrap();
    assert_eq!(iat, base + 96);
}

#[test]
fn test_data_directory_entry_first_match_wins() {
    let mut data = sample_pe64();
    let region_start = data_directory_range(&data).unwrap().start;
    let dir = DataDir::new(0x3000, 0x10);

    write_bytes(&mut data, region_start + 5 * 8, &dir.to_bytes()).unwrap();
    write_bytes(&mut data, region_start + 9 * 8, &dir.to_bytes()).unwrap();

    assert_eq!(data_directory_entry_offset(&data, 0x3000, 0x10).unwrap(), region_start + 40);
}

#[test]
fn test_data_directory_entry_not_found() {
    let data = sample_pe64();
    let result = data_directory_entry_offset(&data, 0xDEAD, 0xBEEF);

    assert!(matches!(result, Err(Error::EntryNotFound { virtual_address: 0xDEAD, size: 0xBEEF })));
}

#[test]
fn test_data_directory_entry_bare_layout() {
    let entry_offset = 40;
    let mut data = Vec::new();
    data.extend_from_slice(&PE_SIGNATURE);
    data.extend_from_slice(&[0u8; COFF_HEADER_SIZE]);
    data.extend_from_slice(&[0u8; OPTIONAL_HEADER64_FIXED_SIZE]);

    let mut directory = [0u8; DATA_DIRECTORY_SIZE];
    directory[entry_offset..entry_offset + 8].copy_from_slice(&DataDir::new(0x2000, 0x40).to_bytes());
    data.extend_from_slice(&directory);

    assert_eq!(
        data_directory_entry_offset(&data, 0x2000, 0x40).unwrap(),
        4 + 20 + OPTIONAL_HEADER64_FIXED_SIZE + entry_offset,
    );
}

#[test]
fn test_section_header_table() {
    assert!(matches!(section_header_table_size(0), Err(Error::EmptyHeader)));
    assert_eq!(section_header_table_size(3).unwrap(), 192);

    let data = sample_pe64();
    let table_start = E_LFANEW + SECTION_HEADER_TABLE_OFFSET;

    let region = section_header_region(&data, 2 * SECTION_HEADER_SIZE).unwrap();
    assert_eq!(region, &data[table_start..table_start + 2 * SECTION_HEADER_SIZE]);
    assert_eq!(ImageSectionHeader::parse(region).unwrap().name(), ".text");

    assert_eq!(section_header_entry_offset(&data, 0).unwrap(), table_start);
    assert_eq!(section_header_entry_offset(&data, SECTION_HEADER_SIZE + 12).unwrap(), table_start + 52);

    assert!(matches!(section_header_region(&data, data.len()), Err(Error::OutOfRange { .. })));
}

#[test]
fn test_section_bytes() {
    let data = sample_pe64();
    let sections = [
        section(".text", 0x1000, 0x200, 0x400),
        section(".rdata", 0x2000, 0x200, 0x600),
    ];

    let bytes = section_bytes(&data, &sections, 0x2010, 4).unwrap();
    assert_eq!(bytes, &[0x10, 0x11, 0x12, 0x13]);

    assert_eq!(rva_to_offset(&sections, 0x1000).unwrap(), 0x400);
    assert_eq!(rva_to_offset(&sections, 0x21FF).unwrap(), 0x7FF);

    assert!(matches!(section_bytes(&data, &sections, 0x2200, 4), Err(Error::SectionNotFound(0x2200))));
    assert!(matches!(section_bytes(&data, &sections, 0x500, 4), Err(Error::SectionNotFound(_))));
    assert!(matches!(section_bytes(&data, &sections, 0x21FF, 0x10), Err(Error::OutOfRange { .. })));
}

#[test]
fn test_section_bytes_first_section_wins() {
    let data = sample_pe64();
    let sections = [
        section(".a", 0x2000, 0x200, 0x600),
        section(".b", 0x2000, 0x200, 0x400),
    ];

    assert_eq!(section_bytes(&data, &sections, 0x2001, 1).unwrap(), &[0x01]);
}

#[test]
fn test_image_parse() {
    let image = Image::from_data(sample_pe64()).unwrap();

    assert_eq!(image.file_header().machine, 0x8664);
    assert!(image.file_header().characteristics.contains(FileCharacteristics::EXECUTABLE_IMAGE));
    assert_eq!(image.image_base(), 0x140000000);
    assert_eq!(image.entry_point(), 0x1010);
    assert_eq!(image.size_of_image(), 0x4000);
    assert_eq!(image.sections().len(), 2);
    assert_eq!(image.sections()[1].name(), ".rdata");
    assert_eq!(image.sections()[1].pointer_to_raw_data, 0x600);

    assert_eq!(image.coff_header_offset().unwrap(), E_LFANEW);
    assert_eq!(image.data_directory(ImageDirectoryEntry::IAT).unwrap(), DataDir::new(0x2000, 0x40));
    assert!(image.data_directory(ImageDirectoryEntry::Resource).unwrap().is_empty());
    assert_eq!(image.section_header_table_size().unwrap(), 128);
    assert_eq!(image.section_bytes(0x2000, 2).unwrap(), &[0x00, 0x01]);

    let timestamp = image.file_header().timestamp().unwrap();
    assert_eq!(timestamp.timestamp(), 0x5F5E1000);
}

#[test]
fn test_image_rejects_bad_input() {
    assert!(matches!(Image::from_data([0u8; 16]), Err(Error::Truncated { .. })));

    let mut data = sample_pe64();
    data[0] = 0;
    assert!(matches!(Image::from_data(&data), Err(Error::InvalidDOSSignature)));

    let mut data = sample_pe64();
    data[E_LFANEW + 1] = 0;
    assert!(matches!(Image::from_data(&data), Err(Error::InvalidPESignature)));

    let mut data = sample_pe64();
    let magic_at = E_LFANEW + PE_SIGNATURE_SIZE + COFF_HEADER_SIZE;
    data[magic_at..magic_at + 2].copy_from_slice(&HDR32_MAGIC.to_le_bytes());
    assert!(matches!(Image::from_data(&data), Err(Error::UnsupportedMagic(HDR32_MAGIC))));

    let data = sample_pe64();
    let table_start = E_LFANEW + SECTION_HEADER_TABLE_OFFSET;
    assert!(matches!(Image::from_data(&data[..table_start + 50]), Err(Error::Truncated { needed: 40, available: 10 })));
}

#[test]
fn test_image_patch_is_visible_to_lookups() {
    let mut image = Image::from_data(sample_pe64()).unwrap();
    let offset = image.data_directory_entry_offset(0x1000, 0x20).unwrap();

    image.write_bytes(offset, &DataDir::new(0x5000, 0x80).to_bytes()).unwrap();

    assert_eq!(image.data_directory(ImageDirectoryEntry::Import).unwrap(), DataDir::new(0x5000, 0x80));
    assert_eq!(image.data_directory_entry_offset(0x5000, 0x80).unwrap(), offset);
    assert!(image.data_directory_entry_offset(0x1000, 0x20).is_err());

    let len = image.len();
    assert!(image.write_bytes(len - 1, &[1, 2]).is_err());
}

#[test]
fn test_image_patch_section_header() {
    let mut image = Image::from_data(sample_pe64()).unwrap();
    let mut header = image.sections()[1];
    header.set_name(Some(".ooa"));

    let offset = image.section_header_entry_offset(SECTION_HEADER_SIZE).unwrap();
    image.write_bytes(offset, &header.to_bytes()).unwrap();

    let reread: ImageSectionHeader = image.read_record(offset).unwrap();
    assert_eq!(reread.name(), ".ooa");
    assert_eq!(reread.virtual_address, 0x2000);
}

#[test]
fn test_record_read_truncated() {
    let mut cursor = Cursor::new(vec![0u8; 7]);
    let result = Thunk::read(&mut cursor);

    assert!(matches!(result, Err(Error::Truncated { needed: 8, available: 7 })));
    assert_eq!(cursor.position(), 0);

    let mut cursor = Cursor::new(vec![0u8; 60]);
    cursor.set_position(20);
    assert!(matches!(EncBlock::read(&mut cursor), Err(Error::Truncated { needed: 48, available: 40 })));
    assert_eq!(cursor.position(), 20);

    cursor.set_position(100);
    assert!(matches!(ImportDescriptor::read(&mut cursor), Err(Error::Truncated { available: 0, .. })));
}

#[test]
fn test_stream_read_record_truncated() {
    let mut reader = StreamReader::new(Cursor::new(vec![0u8; 7]));

    assert!(matches!(reader.read_record::<Thunk>(), Err(Error::Truncated { needed: 8, available: 7 })));
    assert_eq!(reader.position().unwrap(), 0);

    let mut reader = StreamReader::new(Cursor::new(vec![0u8; 60]));
    reader.seek_from_start(20).unwrap();
    assert!(matches!(reader.read_record::<EncBlock>(), Err(Error::Truncated { needed: 48, available: 40 })));
    assert_eq!(reader.position().unwrap(), 20);

    assert!(reader.read_record::<ImportDescriptor>().is_ok());
    assert_eq!(reader.position().unwrap(), 40);
}

#[test]
fn test_record_read_sequence() {
    let data = hex::decode(concat!(
        "01000000", "02000000", "03000000", "04000000", "05000000",
        "00300000", "10300000",
        "00100000", "20000000",
    )).unwrap();
    let mut cursor = Cursor::new(data.as_slice());

    let import = ImportDescriptor::read(&mut cursor).unwrap();
    assert_eq!(import.characteristics, 1);
    assert_eq!(import.name, 4);
    assert_eq!(import.first_thunk, 5);
    assert_eq!(cursor.position(), 20);

    let thunk = Thunk::read(&mut cursor).unwrap();
    assert_eq!(thunk, Thunk { function: 0x3000, data_address: 0x3010 });

    let dir = DataDir::read(&mut cursor).unwrap();
    assert_eq!(dir, DataDir::new(0x1000, 0x20));
    assert_eq!(cursor.position(), 36);

    assert!(DataDir::read(&mut cursor).is_err());
}

#[test]
fn test_enc_block_layout() {
    let block = EncBlock {
        virtual_address: 0x1000,
        raw_size: 0x200,
        virtual_size: 0x1F0,
        crc: 0xAABBCCDD,
        file_offset: 0x400,
        pad2: 0x0102030405060708,
        pad3: 0xFFFFFFFF,
        ..Default::default()
    };
    let bytes = block.to_bytes();

    assert_eq!(bytes.len(), 48);
    assert_eq!(&bytes[16..20], &[0xDD, 0xCC, 0xBB, 0xAA]);
    assert_eq!(&bytes[36..44], &[8, 7, 6, 5, 4, 3, 2, 1]);
    assert_eq!(EncBlock::parse(&bytes).unwrap(), block);
}

#[test]
fn test_section_record() {
    let image = Image::from_data(sample_pe64()).unwrap();
    let blocks = vec![EncBlock { virtual_address: 0x1000, raw_size: 0x200, ..Default::default() }];
    let record = SectionRecord::from_image(&image, "ab", blocks).unwrap();

    assert_eq!(record.original_entry_point, 0x1010);
    assert_eq!(record.image_base, 0x140000000);
    assert_eq!(record.import_dir, DataDir::new(0x1000, 0x20));
    assert_eq!(record.iat_dir, DataDir::new(0x2000, 0x40));
    assert!(record.reloc_dir.is_empty());

    let bytes = record.to_bytes().unwrap();
    assert_eq!(&bytes[..6], &[b'a', 0, b'b', 0, 0, 0]);
    assert_eq!(&bytes[6..14], &0x1010u64.to_le_bytes());
    assert_eq!(&bytes[14..18], &1u32.to_le_bytes());
    assert_eq!(bytes.len(), 6 + 8 + 4 + 48 + 8 + 4 + 3 * 8);
}

#[test]
fn test_section_record_missing_data_directory() {
    let mut data = build_pe64(&[], &[]);
    let size_of_optional_at = E_LFANEW + PE_SIGNATURE_SIZE + 16;
    data[size_of_optional_at..size_of_optional_at + 2].copy_from_slice(&(OPTIONAL_HEADER64_FIXED_SIZE as u16).to_le_bytes());
    data.truncate(E_LFANEW + DATA_DIRECTORY_OFFSET + 12);

    let image = Image::from_data(&data).unwrap();
    assert!(matches!(image.data_directory(ImageDirectoryEntry::Import), Err(Error::OutOfRange { .. })));

    let result = SectionRecord::from_image(&image, "ab", Vec::new());
    assert!(matches!(result, Err(Error::OutOfRange { offset: 264, len: 128, buffer_len: 276 })));
}

#[test]
fn test_utf16() {
    assert_eq!(utf8_to_utf16le("PE"), vec![b'P', 0, b'E', 0]);
    assert_eq!(utf8_to_utf16le("é"), vec![0xE9, 0x00]);
    assert_eq!(utf8_to_utf16le("😀"), vec![0x3D, 0xD8, 0x00, 0xDE]);
    assert!(utf8_to_utf16le("").is_empty());
}

#[test]
fn test_entry_lookup() {
    let entries = vec![
        DataEntry { hash: 1, filename: "a.bin".to_string() },
        DataEntry { hash: 2, filename: "b.bin".to_string() },
        DataEntry { hash: 2, filename: "c.bin".to_string() },
    ];

    assert_eq!(find_by_hash(&entries, 2).unwrap().filename, "b.bin");
    assert!(find_by_hash(&entries, 3).is_none());
    assert_eq!(find_by_filename(&entries, "c.bin").unwrap().hash, 2);
    assert!(find_by_filename(&entries, "d.bin").is_none());
}

#[test]
fn test_stream_round_trip() {
    let mut writer = StreamWriter::new(Cursor::new(Vec::new()));
    writer.write_u32(0xDEADBEEF).unwrap();
    writer.write_u64(0x140000000).unwrap();
    writer.write_record(&DataDir::new(0x1000, 0x20)).unwrap();
    writer.write_str("ooa").unwrap();
    writer.write_u8(0).unwrap();

    assert_eq!(writer.size().unwrap(), 4 + 8 + 8 + 4);
    assert_eq!(writer.position().unwrap(), 24);

    let mut reader = StreamReader::new(Cursor::new(writer.into_inner().into_inner()));
    assert_eq!(reader.size().unwrap(), 24);
    assert_eq!(reader.position().unwrap(), 0);
    assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
    assert_eq!(reader.read_u64().unwrap(), 0x140000000);
    assert_eq!(reader.read_record::<DataDir>().unwrap(), DataDir::new(0x1000, 0x20));

    let mut name = [0u8; 3];
    reader.read_exact(&mut name).unwrap();
    assert_eq!(&name, b"ooa");

    reader.seek_from_end(-1).unwrap();
    assert_eq!(reader.read_u8().unwrap(), 0);
    assert!(reader.read_u8().is_err());

    reader.seek_from_start(4).unwrap();
    reader.seek_from_current(8).unwrap();
    assert_eq!(reader.read_u32().unwrap(), 0x1000);
}
