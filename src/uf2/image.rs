use std::io::{self, Read};

use super::{Block, DecodeError, Family, BLOCK_SIZE};

/// Summary of a validated image
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageInfo {
    pub block_count: u32,
    /// Sum of the meaningful payload bytes of every block
    pub payload_bytes: u64,
    /// Lowest target address
    pub start_addr: u32,
    /// One past the highest byte written
    pub end_addr: u64,
    pub family_id: u32,
}

impl ImageInfo {
    pub fn family(&self) -> Option<Family> {
        Family::from_id(self.family_id)
    }
}

/// Reads every block from `reader` until it is exhausted
pub fn read_blocks<R: Read>(reader: &mut R) -> Result<Vec<Block>, DecodeError> {
    let mut blocks = Vec::new();
    let mut record = [0u8; BLOCK_SIZE];

    loop {
        match read_record(reader, &mut record)? {
            0 => break,
            BLOCK_SIZE => blocks.push(Block::from_reader(&mut &record[..])?),
            read => return Err(DecodeError::TruncatedBlock(blocks.len(), read)),
        }
    }

    Ok(blocks)
}

/// Fills `record` as far as `reader` allows, returning the number of bytes read
fn read_record<R: Read>(reader: &mut R, record: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < record.len() {
        match reader.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    Ok(filled)
}

/// Checks that `blocks` form one complete image and summarizes it
pub fn inspect(blocks: &[Block]) -> Result<ImageInfo, DecodeError> {
    let first = blocks.first().ok_or(DecodeError::EmptyImage)?;
    let block_total = first.block_total;

    if blocks.len() as u64 != u64::from(block_total) {
        return Err(DecodeError::BlockCountMismatch(blocks.len(), block_total));
    }

    let mut payload_bytes = 0u64;
    let mut start_addr = u32::MAX;
    let mut end_addr = 0u64;

    for (index, block) in blocks.iter().enumerate() {
        if block.block_total != block_total {
            return Err(DecodeError::InconsistentTotal(block.block_index, block.block_total));
        }

        if block.block_index as usize != index {
            return Err(DecodeError::UnexpectedIndex(index, block.block_index));
        }

        if block.family_id != first.family_id {
            return Err(DecodeError::MixedFamilies(first.family_id, block.family_id));
        }

        payload_bytes += u64::from(block.payload_len);
        start_addr = start_addr.min(block.target_addr);
        end_addr = end_addr.max(u64::from(block.target_addr) + u64::from(block.payload_len));
    }

    Ok(ImageInfo {
        block_count: block_total,
        payload_bytes,
        start_addr,
        end_addr,
        family_id: first.family_id,
    })
}
