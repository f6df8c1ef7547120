use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::elf::ParseError;

/// Errors that terminate a conversion run
#[derive(Debug, Error)]
pub enum Error {
    #[error("Could not read input image {}: {}", .0.display(), .1)]
    InputUnreadable(PathBuf, #[source] io::Error),
    #[error("Input is a malformed ELF image: {}", _0)]
    InvalidElf(#[source] ParseError),
    #[error("Input does not contain any loadable data")]
    NoLoadableData,
    #[error("Segment at {address:#010x} with length {length} does not fit in the 32-bit address space")]
    SegmentTooLarge { address: u32, length: u64 },
    #[error("Could not write output image: {}", _0)]
    OutputWriteFailed(#[source] io::Error),
}

/// Errors that occur while talking to the kiosk over a serial port
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Error when opening serial port {}: {}", _0, _1)]
    OpenError(String, #[source] serialport::Error),
    #[error("Serial I/O error: {}", _0)]
    IoError(#[from] io::Error),
}
