use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::trace;
use thiserror::Error;

/// The magic bytes every ELF file starts with
pub const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

/// Size of the ELF32 file header, in bytes
const ELF32_HEADER_SIZE: usize = 0x34;

/// Size of an ELF32 program header entry, in bytes
const ELF32_PROGRAM_HEADER_SIZE: u16 = 0x20;

/// Program header type for loadable segments
pub const PT_LOAD: u32 = 1;

/// This is a simple ELF32 file parser that makes it easy to extract loadable segments
#[derive(Debug)]
pub struct ElfParser<R> {
    reader: BufReader<R>,
}

/// This is an ELF32 header
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Header {
    /// This byte is set to either 1 or 2 to signify 32- or 64-bit format, respectively
    pub class: Class,
    /// The endianness of the file
    pub endianness: Endianness,
    /// The object file type
    pub file_type: u16,
    /// The target instruction set architecture
    pub machine: u16,
    /// The program entry address
    pub entry_addr: u32,
    /// The program header offset
    pub ph_offset: u32,
    /// The size of a program header entry
    pub ph_entry_size: u16,
    /// The number of program header entries
    pub ph_entry_num: u16,
}

/// ELF32 Program Header
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProgramHeader {
    /// The type of the program header segment
    pub typ: u32,
    /// The offset to the segment in the image file
    pub offset: u32,
    /// The virtual address to map the segment to
    pub virt_addr: u32,
    /// The physical address to map the segment to, when relevant
    pub phys_addr: u32,
    /// Size of the segment in the file image, in bytes
    pub file_size: u32,
    /// Size of the segment in memory, in bytes
    pub mem_size: u32,
    /// Segment-dependent flags
    pub flags: u32,
    /// How to align the section
    ///
    /// 0 and 1 specify no alignment
    pub alignment: u32,
}

impl ProgramHeader {
    /// Returns true if the bootloader has to place this segment in memory
    pub fn is_loadable(&self) -> bool {
        self.typ == PT_LOAD
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Class {
    Elf32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Endianness {
    Little,
}

/// Errors that indicate what went wrong during parsing
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing ELF header")]
    MissingHeader,
    #[error("Input does not contain ELF magic header")]
    InvalidMagicHeader,
    #[error("Input ELF is 64-bit, only 32-bit is supported")]
    ElfIs64Bit,
    #[error("Input has an unsupported ELF version, expected 1")]
    InvalidElfVersion,
    #[error("Input endianness is unsupported, only little endian is supported")]
    UnsupportedEndianness,
    #[error("Input is an unsupported file type, only executable files are supported")]
    UnsupportedFileType,
    #[error("Program header entries are {} bytes, expected {}", _0, ELF32_PROGRAM_HEADER_SIZE)]
    InvalidProgramHeaderSize(u16),
    #[error("Program header table is truncated")]
    TruncatedProgramHeaders,
    #[error("Segment at file offset {:#x} with size {} extends past the end of the file", _0, _1)]
    TruncatedSegment(u32, u32),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

impl<R: Read + Seek> ElfParser<R> {
    pub fn new(reader: R) -> ElfParser<R> {
        let reader = BufReader::new(reader);

        ElfParser { reader }
    }

    pub fn parse_header(&mut self) -> Result<Header, ParseError> {
        // Seek to the beginning of the file
        self.reader.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; ELF32_HEADER_SIZE];

        self.reader
            .read_exact(&mut header)
            .map_err(|_| ParseError::MissingHeader)?;

        if header[0x0..0x4] != ELF_MAGIC {
            return Err(ParseError::InvalidMagicHeader);
        }

        let class = match header[0x4] {
            1 => Class::Elf32,
            _ => return Err(ParseError::ElfIs64Bit),
        };

        let endianness = match header[0x5] {
            1 => Endianness::Little,
            _ => return Err(ParseError::UnsupportedEndianness),
        };

        if header[0x6] != 1 {
            return Err(ParseError::InvalidElfVersion);
        }

        let mut cursor = Cursor::new(&header[0x10..]);

        let file_type = cursor.read_u16::<LittleEndian>()?;

        // Only executables carry final load addresses
        if file_type != 0x02 {
            return Err(ParseError::UnsupportedFileType);
        }

        let machine = cursor.read_u16::<LittleEndian>()?;
        let _version = cursor.read_u32::<LittleEndian>()?;
        let entry_addr = cursor.read_u32::<LittleEndian>()?;
        let ph_offset = cursor.read_u32::<LittleEndian>()?;
        let _sh_offset = cursor.read_u32::<LittleEndian>()?;
        let _flags = cursor.read_u32::<LittleEndian>()?;
        let _header_size = cursor.read_u16::<LittleEndian>()?;
        let ph_entry_size = cursor.read_u16::<LittleEndian>()?;
        let ph_entry_num = cursor.read_u16::<LittleEndian>()?;

        if ph_entry_num > 0 && ph_entry_size != ELF32_PROGRAM_HEADER_SIZE {
            return Err(ParseError::InvalidProgramHeaderSize(ph_entry_size));
        }

        Ok(Header {
            class,
            endianness,
            file_type,
            machine,
            entry_addr,
            ph_offset,
            ph_entry_size,
            ph_entry_num,
        })
    }

    /// Reads every entry of the program header table described by `header`
    pub fn program_headers(&mut self, header: &Header) -> Result<Vec<ProgramHeader>, ParseError> {
        let mut headers = Vec::with_capacity(header.ph_entry_num as usize);

        self.reader
            .seek(SeekFrom::Start(u64::from(header.ph_offset)))?;

        for index in 0..header.ph_entry_num {
            let mut entry = [0u8; ELF32_PROGRAM_HEADER_SIZE as usize];

            self.reader
                .read_exact(&mut entry)
                .map_err(|_| ParseError::TruncatedProgramHeaders)?;

            let mut cursor = Cursor::new(&entry[..]);
            let ph = ProgramHeader {
                typ: cursor.read_u32::<LittleEndian>()?,
                offset: cursor.read_u32::<LittleEndian>()?,
                virt_addr: cursor.read_u32::<LittleEndian>()?,
                phys_addr: cursor.read_u32::<LittleEndian>()?,
                file_size: cursor.read_u32::<LittleEndian>()?,
                mem_size: cursor.read_u32::<LittleEndian>()?,
                flags: cursor.read_u32::<LittleEndian>()?,
                alignment: cursor.read_u32::<LittleEndian>()?,
            };

            trace!("Program header {}: {:x?}", index, ph);

            headers.push(ph);
        }

        Ok(headers)
    }

    /// Reads the bytes the program header `ph` occupies in the file image
    pub fn segment_data(&mut self, ph: &ProgramHeader) -> Result<Vec<u8>, ParseError> {
        let file_len = self.reader.seek(SeekFrom::End(0))?;

        if u64::from(ph.offset) + u64::from(ph.file_size) > file_len {
            return Err(ParseError::TruncatedSegment(ph.offset, ph.file_size));
        }

        let mut data = vec![0u8; ph.file_size as usize];

        self.reader.seek(SeekFrom::Start(u64::from(ph.offset)))?;
        self.reader
            .read_exact(&mut data)
            .map_err(|_| ParseError::TruncatedSegment(ph.offset, ph.file_size))?;

        Ok(data)
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::ElfBuilder;
    use super::*;

    #[test]
    fn it_should_parse_header() {
        let elf = ElfBuilder::new().segment(PT_LOAD, 0x1000_0000, &[1, 2, 3]).build();
        let mut parser = ElfParser::new(Cursor::new(&elf));
        let header = parser.parse_header().unwrap();

        assert_eq!(header.class, Class::Elf32);
        assert_eq!(header.endianness, Endianness::Little);
        assert_eq!(header.machine, 0x28);
        assert_eq!(header.entry_addr, 0x1000_01e9);
        assert_eq!(header.ph_offset, 0x34);
        assert_eq!(header.ph_entry_num, 1);
    }

    #[test]
    fn it_should_read_program_headers_and_data() {
        let elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x1000_0000, b"boot")
            .segment(6, 0, b"")
            .build();
        let mut parser = ElfParser::new(Cursor::new(&elf));
        let header = parser.parse_header().unwrap();
        let headers = parser.program_headers(&header).unwrap();

        assert_eq!(headers.len(), 2);
        assert!(headers[0].is_loadable());
        assert!(!headers[1].is_loadable());
        assert_eq!(headers[0].phys_addr, 0x1000_0000);
        assert_eq!(headers[0].file_size, 4);
        assert_eq!(parser.segment_data(&headers[0]).unwrap(), b"boot");
    }

    #[test]
    fn it_should_reject_missing_magic() {
        let mut input = ElfBuilder::new().build();
        input[0] = 0;
        let mut parser = ElfParser::new(Cursor::new(&input));

        assert!(matches!(
            parser.parse_header(),
            Err(ParseError::InvalidMagicHeader)
        ));
    }

    #[test]
    fn it_should_reject_short_input() {
        let mut parser = ElfParser::new(Cursor::new(&[0x7f, 0x45, 0x4c, 0x46]));

        assert!(matches!(parser.parse_header(), Err(ParseError::MissingHeader)));
    }

    #[test]
    fn it_should_reject_64_bit_elf() {
        let mut input = ElfBuilder::new().build();
        input[4] = 2;
        let mut parser = ElfParser::new(Cursor::new(&input));

        assert!(matches!(parser.parse_header(), Err(ParseError::ElfIs64Bit)));
    }

    #[test]
    fn it_should_reject_truncated_segment() {
        let mut elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x2000_0000, &[0xaa; 16])
            .build();
        elf.truncate(elf.len() - 4);
        let mut parser = ElfParser::new(Cursor::new(&elf));
        let header = parser.parse_header().unwrap();
        let headers = parser.program_headers(&header).unwrap();

        assert!(matches!(
            parser.segment_data(&headers[0]),
            Err(ParseError::TruncatedSegment(_, 16))
        ));
    }
}
