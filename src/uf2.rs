//! UF2 block format

mod block;
mod encoder;
mod family;
mod image;

/// First start magic, "UF2\n"
pub const MAGIC_START0: u32 = 0x0A32_4655;
/// Second start magic
pub const MAGIC_START1: u32 = 0x9E5D_5157;
/// End magic
pub const MAGIC_END: u32 = 0x0AB1_6F30;

/// The `family_id` field holds a family identifier
pub const FLAG_FAMILY_ID_PRESENT: u32 = 0x0000_2000;

/// Size of the fixed header at the start of a block
pub const HEADER_SIZE: usize = 32;
/// Number of image bytes carried by each block
pub const PAYLOAD_SIZE: usize = 256;
/// Size of the data area of a serialized block, of which the first `PAYLOAD_SIZE` bytes are used
pub const DATA_AREA_SIZE: usize = 476;
/// Size of a serialized block
pub const BLOCK_SIZE: usize = 512;

pub use block::{Block, DecodeError};
pub use encoder::{block_count, encode};
pub use family::{Family, UnknownFamily};
pub use image::{inspect, read_blocks, ImageInfo};
