use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::{
    BLOCK_SIZE, DATA_AREA_SIZE, FLAG_FAMILY_ID_PRESENT, HEADER_SIZE, MAGIC_END, MAGIC_START0,
    MAGIC_START1, PAYLOAD_SIZE,
};

/// Errors returned when reading blocks back from an image
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Block has invalid start magic: {:#010x} {:#010x}", _0, _1)]
    InvalidStartMagic(u32, u32),
    #[error("Block has invalid end magic: {:#010x}", _0)]
    InvalidEndMagic(u32),
    #[error("Block {} claims a payload of {} bytes, at most {} are allowed", _0, _1, PAYLOAD_SIZE)]
    PayloadTooLarge(u32, u32),
    #[error("Block index {} is out of range for a total of {} blocks", _0, _1)]
    IndexOutOfRange(u32, u32),
    #[error("Block {} is truncated to {} bytes", _0, _1)]
    TruncatedBlock(usize, usize),
    #[error("Image does not contain any blocks")]
    EmptyImage,
    #[error("Image has {} blocks but claims a total of {}", _0, _1)]
    BlockCountMismatch(usize, u32),
    #[error("Block {} claims a total of {} blocks, which differs from the first block", _0, _1)]
    InconsistentTotal(u32, u32),
    #[error("Expected block {} but found block {}", _0, _1)]
    UnexpectedIndex(usize, u32),
    #[error("Image mixes family {:#010x} with family {:#010x}", _0, _1)]
    MixedFamilies(u32, u32),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

/// A single self-describing UF2 record
#[derive(Clone, Eq, PartialEq)]
pub struct Block {
    pub magic_start0: u32,
    pub magic_start1: u32,
    pub flags: u32,
    /// Device address the payload is flashed to
    pub target_addr: u32,
    /// Number of meaningful bytes at the start of `payload`
    pub payload_len: u32,
    pub block_index: u32,
    pub block_total: u32,
    pub family_id: u32,
    /// Payload, zero padded past `payload_len`
    pub payload: [u8; PAYLOAD_SIZE],
    pub magic_end: u32,
}

impl Block {
    /// Creates a final block carrying `data` at `target_addr`
    ///
    /// `data` is zero padded up to the payload size and must not be longer than it.
    pub(crate) fn new(
        target_addr: u32,
        data: &[u8],
        block_index: u32,
        block_total: u32,
        family_id: u32,
    ) -> Block {
        debug_assert!(data.len() <= PAYLOAD_SIZE);
        debug_assert!(block_index < block_total);

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[..data.len()].copy_from_slice(data);

        Block {
            magic_start0: MAGIC_START0,
            magic_start1: MAGIC_START1,
            flags: FLAG_FAMILY_ID_PRESENT,
            target_addr,
            payload_len: data.len() as u32,
            block_index,
            block_total,
            family_id,
            payload,
            magic_end: MAGIC_END,
        }
    }

    /// The meaningful part of the payload, without padding
    pub fn data(&self) -> &[u8] {
        let len = (self.payload_len as usize).min(PAYLOAD_SIZE);

        &self.payload[..len]
    }

    /// Returns the serialized 512-byte representation of this block
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let header = [
            self.magic_start0,
            self.magic_start1,
            self.flags,
            self.target_addr,
            self.payload_len,
            self.block_index,
            self.block_total,
            self.family_id,
        ];

        for (field, value) in buf[..HEADER_SIZE].chunks_exact_mut(4).zip(&header) {
            LittleEndian::write_u32(field, *value);
        }

        // The rest of the data area stays zeroed
        buf[HEADER_SIZE..HEADER_SIZE + PAYLOAD_SIZE].copy_from_slice(&self.payload);
        LittleEndian::write_u32(&mut buf[HEADER_SIZE + DATA_AREA_SIZE..], self.magic_end);

        buf
    }

    /// Writes the block to the given `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Reads and validates a single block using `reader`
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Block, DecodeError> {
        let magic_start0 = reader.read_u32::<LittleEndian>()?;
        let magic_start1 = reader.read_u32::<LittleEndian>()?;

        if magic_start0 != MAGIC_START0 || magic_start1 != MAGIC_START1 {
            return Err(DecodeError::InvalidStartMagic(magic_start0, magic_start1));
        }

        let flags = reader.read_u32::<LittleEndian>()?;
        let target_addr = reader.read_u32::<LittleEndian>()?;
        let payload_len = reader.read_u32::<LittleEndian>()?;
        let block_index = reader.read_u32::<LittleEndian>()?;
        let block_total = reader.read_u32::<LittleEndian>()?;
        let family_id = reader.read_u32::<LittleEndian>()?;

        if payload_len as usize > PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge(block_index, payload_len));
        }

        if block_index >= block_total {
            return Err(DecodeError::IndexOutOfRange(block_index, block_total));
        }

        let mut data_area = [0u8; DATA_AREA_SIZE];
        reader.read_exact(&mut data_area)?;

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&data_area[..PAYLOAD_SIZE]);

        let magic_end = reader.read_u32::<LittleEndian>()?;

        if magic_end != MAGIC_END {
            return Err(DecodeError::InvalidEndMagic(magic_end));
        }

        Ok(Block {
            magic_start0,
            magic_start1,
            flags,
            target_addr,
            payload_len,
            block_index,
            block_total,
            family_id,
            payload,
            magic_end,
        })
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("flags", &format_args!("{:#010x}", self.flags))
            .field("target_addr", &format_args!("{:#010x}", self.target_addr))
            .field("payload_len", &self.payload_len)
            .field("block_index", &self.block_index)
            .field("block_total", &self.block_total)
            .field("family_id", &format_args!("{:#010x}", self.family_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_hex::*;
    use hex_literal::hex;

    use super::*;

    #[test]
    fn it_should_serialize_header_fields_in_order() {
        let block = Block::new(0x1000_0100, &[0xde, 0xad], 1, 2, 0xe48b_ff56);
        let buf = block.to_bytes();

        assert_eq!(buf.len(), BLOCK_SIZE);
        assert_eq_hex!(
            &buf[..32],
            &hex!(
                "55 46 32 0A 57 51 5D 9E 00 20 00 00 00 01 00 10
                 02 00 00 00 01 00 00 00 02 00 00 00 56 FF 8B E4"
            )[..]
        );
        assert_eq_hex!(&buf[32..36], &[0xde, 0xad, 0x00, 0x00]);
        assert_eq_hex!(&buf[508..], &hex!("30 6F B1 0A")[..]);
    }

    #[test]
    fn it_should_zero_the_unused_data_area() {
        let block = Block::new(0, &[0xff; PAYLOAD_SIZE], 0, 1, 0);
        let buf = block.to_bytes();

        assert!(buf[32..32 + PAYLOAD_SIZE].iter().all(|b| *b == 0xff));
        assert!(buf[32 + PAYLOAD_SIZE..508].iter().all(|b| *b == 0));
    }

    #[test]
    fn it_should_read_written_block() {
        let block = Block::new(0x2000_0000, b"payload", 3, 7, 0x68ed_2b88);
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();

        let read = Block::from_reader(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(read, block);
        assert_eq!(read.data(), b"payload");
    }

    #[test]
    fn it_should_write_exactly_the_serialized_block() {
        let block = Block::new(0x0800_0000, &[0xa5; 100], 0, 1, 0x5775_5a57);
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), BLOCK_SIZE);
        assert_eq_hex!(&buf[..], &block.to_bytes()[..]);
        assert_eq_hex!(&buf[12..16], &hex!("00 00 00 08")[..]);
        assert_eq_hex!(&buf[16..20], &hex!("64 00 00 00")[..]);
    }

    #[test]
    fn it_should_reject_invalid_magic() {
        let mut buf = Block::new(0, b"x", 0, 1, 0).to_bytes();
        buf[0] = 0;

        assert!(matches!(
            Block::from_reader(&mut Cursor::new(&buf[..])),
            Err(DecodeError::InvalidStartMagic(..))
        ));

        let mut buf = Block::new(0, b"x", 0, 1, 0).to_bytes();
        buf[511] = 0;

        assert!(matches!(
            Block::from_reader(&mut Cursor::new(&buf[..])),
            Err(DecodeError::InvalidEndMagic(_))
        ));
    }

    #[test]
    fn it_should_reject_out_of_range_index() {
        let mut block = Block::new(0, b"x", 0, 1, 0);
        block.block_index = 1;

        assert!(matches!(
            Block::from_reader(&mut Cursor::new(&block.to_bytes()[..])),
            Err(DecodeError::IndexOutOfRange(1, 1))
        ));
    }

    #[test]
    fn it_should_reject_truncated_block() {
        let buf = Block::new(0, b"x", 0, 1, 0).to_bytes();

        assert!(matches!(
            Block::from_reader(&mut Cursor::new(&buf[..300])),
            Err(DecodeError::IoError(_))
        ));
    }
}
