//! Extraction of loadable memory regions from an executable image

use std::io::Cursor;

use log::{debug, warn};

use crate::elf::{ElfParser, ParseError, ELF_MAGIC};
use crate::Error;

/// A contiguous region of memory to be written at `address`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segment {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(address: u32, data: Vec<u8>) -> Segment {
        Segment { address, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of parsing the input as an ELF executable
enum Loadable {
    /// The program header table had loadable entries, these are the non-empty ones
    Segments(Vec<Segment>),
    /// The input is not an ELF executable, or it has nothing marked loadable
    NotFound,
}

/// Extracts the segments of `input` ordered by ascending load address
///
/// When `input` is not an ELF executable or has no loadable program headers, the whole input
/// is treated as a single raw binary loaded at `fallback_base`. Input that starts with the ELF
/// magic but cannot be parsed is rejected instead.
pub fn extract_segments(input: &[u8], fallback_base: u32) -> Result<Vec<Segment>, Error> {
    match elf_segments(input) {
        Ok(Loadable::Segments(segments)) => {
            if segments.is_empty() {
                return Err(Error::NoLoadableData);
            }

            Ok(segments)
        }
        Ok(Loadable::NotFound) => {
            warn!("No loadable program headers, using raw binary at {:#010x}", fallback_base);

            raw_segment(input, fallback_base)
        }
        Err(err) if is_elf(input) => Err(Error::InvalidElf(err)),
        Err(err) => {
            if !input.is_empty() {
                debug!("Input is not an ELF image: {}", err);
                warn!("Using raw binary at {:#010x}", fallback_base);
            }

            raw_segment(input, fallback_base)
        }
    }
}

/// Whether `input` claims to be an ELF image, whatever else it contains
fn is_elf(input: &[u8]) -> bool {
    input.starts_with(&ELF_MAGIC)
}

fn raw_segment(input: &[u8], base: u32) -> Result<Vec<Segment>, Error> {
    if input.is_empty() {
        return Err(Error::NoLoadableData);
    }

    Ok(vec![Segment::new(base, input.to_vec())])
}

fn elf_segments(input: &[u8]) -> Result<Loadable, ParseError> {
    let mut parser = ElfParser::new(Cursor::new(input));
    let header = parser.parse_header()?;

    debug!(
        "ELF machine {:#x}, entry point {:#010x}, {} program headers",
        header.machine, header.entry_addr, header.ph_entry_num
    );

    let program_headers = parser.program_headers(&header)?;
    let mut loadable = program_headers
        .iter()
        .filter(|ph| ph.is_loadable())
        .peekable();

    if loadable.peek().is_none() {
        return Ok(Loadable::NotFound);
    }

    let mut segments = Vec::new();

    for ph in loadable {
        let segment = Segment::new(ph.phys_addr, parser.segment_data(ph)?);

        if segment.is_empty() {
            debug!("Skipping empty segment at {:#010x}", segment.address);
            continue;
        }

        debug!(
            "Segment at {:#010x}, size {} bytes",
            segment.address,
            segment.len()
        );

        segments.push(segment);
    }

    segments.sort_by_key(|segment| segment.address);

    Ok(Loadable::Segments(segments))
}

#[cfg(test)]
mod tests {
    use assert_hex::*;

    use super::*;
    use crate::elf::fixture::ElfBuilder;
    use crate::elf::PT_LOAD;

    const BASE: u32 = 0x1000_0000;

    #[test]
    fn it_should_extract_loadable_segments_sorted_by_address() {
        let elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x2000_0000, b"data")
            .segment(PT_LOAD, 0x1000_0000, b"text")
            .segment(4, 0, b"note")
            .build();
        let segments = extract_segments(&elf, BASE).unwrap();

        assert_eq!(
            segments,
            vec![
                Segment::new(0x1000_0000, b"text".to_vec()),
                Segment::new(0x2000_0000, b"data".to_vec()),
            ]
        );
    }

    #[test]
    fn it_should_skip_empty_loadable_segments() {
        let elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x2000_0000, b"")
            .segment(PT_LOAD, 0x1000_0000, b"text")
            .build();
        let segments = extract_segments(&elf, BASE).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq_hex!(segments[0].address, 0x1000_0000);
    }

    #[test]
    fn it_should_fail_when_all_loadable_segments_are_empty() {
        let elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x2000_0000, b"")
            .segment(PT_LOAD, 0x1000_0000, b"")
            .build();

        assert!(matches!(
            extract_segments(&elf, BASE),
            Err(Error::NoLoadableData)
        ));
    }

    #[test]
    fn it_should_fall_back_to_raw_binary() {
        let input = vec![0x00, 0x20, 0x04, 0x20, 0xeb, 0x00, 0x00, 0x10];
        let segments = extract_segments(&input, BASE).unwrap();

        assert_eq!(segments, vec![Segment::new(BASE, input)]);
    }

    #[test]
    fn it_should_fall_back_when_nothing_is_loadable() {
        let elf = ElfBuilder::new().segment(4, 0, b"note").build();
        let segments = extract_segments(&elf, 0x0800_0000).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq_hex!(segments[0].address, 0x0800_0000);
        assert_eq!(segments[0].data, elf);
    }

    #[test]
    fn it_should_reject_a_truncated_elf_image() {
        let mut elf = ElfBuilder::new()
            .segment(PT_LOAD, 0x1000_0000, &[0x42; 64])
            .build();
        elf.truncate(elf.len() - 8);

        assert!(matches!(
            extract_segments(&elf, BASE),
            Err(Error::InvalidElf(ParseError::TruncatedSegment(_, 64)))
        ));
    }

    #[test]
    fn it_should_reject_elf_images_it_cannot_read() {
        let mut elf64 = ElfBuilder::new().segment(PT_LOAD, BASE, b"text").build();
        elf64[4] = 2;

        assert!(matches!(
            extract_segments(&elf64, BASE),
            Err(Error::InvalidElf(ParseError::ElfIs64Bit))
        ));

        let header_only = &elf64[..16];

        assert!(matches!(
            extract_segments(header_only, BASE),
            Err(Error::InvalidElf(ParseError::MissingHeader))
        ));
    }

    #[test]
    fn it_should_fail_on_empty_input() {
        assert!(matches!(
            extract_segments(&[], BASE),
            Err(Error::NoLoadableData)
        ));
    }
}
