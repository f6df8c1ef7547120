use std::convert::TryFrom;

use log::{debug, trace};

use super::{Block, PAYLOAD_SIZE};
use crate::segment::Segment;
use crate::Error;

/// Counts the blocks `segments` encode to, validating that every segment fits in the 32-bit
/// address space
pub fn block_count(segments: &[Segment]) -> Result<u32, Error> {
    let mut total: u64 = 0;

    for segment in segments {
        let length = segment.len() as u64;

        if u64::from(segment.address) + length > u64::from(u32::MAX) {
            return Err(Error::SegmentTooLarge {
                address: segment.address,
                length,
            });
        }

        total += (length + PAYLOAD_SIZE as u64 - 1) / PAYLOAD_SIZE as u64;
    }

    u32::try_from(total).map_err(|_| Error::SegmentTooLarge {
        address: segments.first().map_or(0, |segment| segment.address),
        length: total * PAYLOAD_SIZE as u64,
    })
}

/// Encodes `segments`, in the given order, into blocks tagged with `family_id`
///
/// The total is counted before any block is built, so each block is constructed exactly once
/// with its final index and total.
pub fn encode(segments: &[Segment], family_id: u32) -> Result<Vec<Block>, Error> {
    let block_total = block_count(segments)?;
    let mut blocks = Vec::with_capacity(block_total as usize);

    debug!(
        "Encoding {} segments into {} blocks for family {:#010x}",
        segments.len(),
        block_total,
        family_id
    );

    for segment in segments {
        for (chunk_index, chunk) in segment.data.chunks(PAYLOAD_SIZE).enumerate() {
            // Bounds were checked by `block_count`
            let target_addr = segment.address + (chunk_index * PAYLOAD_SIZE) as u32;
            let block_index = blocks.len() as u32;

            trace!(
                "Block {}/{} at {:#010x} with {} bytes",
                block_index,
                block_total,
                target_addr,
                chunk.len()
            );

            blocks.push(Block::new(
                target_addr,
                chunk,
                block_index,
                block_total,
                family_id,
            ));
        }
    }

    Ok(blocks)
}
