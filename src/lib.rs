pub mod controller;
pub mod elf;
mod error;
pub mod segment;
pub mod serial;
pub mod uf2;
pub mod writer;

use std::fs;
use std::path::Path;

pub use error::{Error, SerialError};
pub use segment::{extract_segments, Segment};
pub use uf2::{Block, Family};
pub use writer::{write_blocks, write_image_file};

use log::info;

/// Parameters of a single conversion run
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ConvertOptions {
    /// The chip family the image is tagged for
    pub family: Family,
    /// Load address for raw binaries, defaults to the family's base address
    pub base_address: Option<u32>,
}

impl ConvertOptions {
    pub fn new(family: Family) -> ConvertOptions {
        ConvertOptions {
            family,
            base_address: None,
        }
    }

    /// Sets the load address used for raw binaries to `base_address`
    pub fn base_address(mut self, base_address: u32) -> ConvertOptions {
        self.base_address = Some(base_address);
        self
    }

    fn fallback_base(&self) -> u32 {
        self.base_address.unwrap_or_else(|| self.family.base_address())
    }
}

/// What a conversion wrote
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Summary {
    pub segments: usize,
    pub blocks: u32,
    pub bytes_written: u64,
}

/// Converts an executable or raw binary image into UF2 blocks
///
/// # Examples
///
/// ```
/// use uf2pack::{convert, ConvertOptions, Family};
///
/// let blocks = convert(&[0u8; 300], &ConvertOptions::new(Family::Rp2040))?;
///
/// assert_eq!(blocks.len(), 2);
/// assert_eq!(blocks[1].target_addr, 0x1000_0100);
///
/// # Ok::<(), uf2pack::Error>(())
/// ```
pub fn convert(input: &[u8], options: &ConvertOptions) -> Result<Vec<Block>, Error> {
    let segments = extract_segments(input, options.fallback_base())?;

    uf2::encode(&segments, options.family.id())
}

/// Converts the image at `input_path` and writes the result to `output_path`
///
/// Nothing is written to `output_path` unless the whole conversion succeeds.
pub fn convert_file<P, Q>(
    input_path: P,
    output_path: Q,
    options: &ConvertOptions,
) -> Result<Summary, Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let input_path = input_path.as_ref();
    let input = fs::read(input_path)
        .map_err(|err| Error::InputUnreadable(input_path.to_path_buf(), err))?;

    let segments = extract_segments(&input, options.fallback_base())?;
    let blocks = uf2::encode(&segments, options.family.id())?;
    let bytes_written = write_image_file(output_path.as_ref(), &blocks)?;

    info!(
        "Wrote {} blocks ({} bytes) for {} to {}",
        blocks.len(),
        bytes_written,
        options.family,
        output_path.as_ref().display()
    );

    Ok(Summary {
        segments: segments.len(),
        blocks: blocks.len() as u32,
        bytes_written,
    })
}
