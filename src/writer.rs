//! Serialization of blocks to an output sink

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace, warn};

use crate::uf2::{Block, BLOCK_SIZE};
use crate::Error;

const MAX_TEMPORARY_ATTEMPTS: usize = 16;

static TEMPORARY_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Writes every block in order, without separators, to `writer`
///
/// Returns the number of bytes written.
pub fn write_blocks<W: Write>(blocks: &[Block], writer: &mut W) -> Result<u64, Error> {
    for block in blocks {
        writer
            .write_all(&block.to_bytes())
            .map_err(Error::OutputWriteFailed)?;
    }

    writer.flush().map_err(Error::OutputWriteFailed)?;

    Ok((blocks.len() * BLOCK_SIZE) as u64)
}

/// Writes the image to `path`
///
/// The blocks are written to a temporary file in the same directory which replaces `path` only
/// once everything was written. On failure the temporary file is removed and `path` is left
/// untouched.
pub fn write_image_file<P: AsRef<Path>>(path: P, blocks: &[Block]) -> Result<u64, Error> {
    debug!("Writing {} blocks to {}", blocks.len(), path.as_ref().display());

    write_atomically(path.as_ref(), |writer| write_blocks(blocks, writer))
}

fn write_atomically<F>(path: &Path, write: F) -> Result<u64, Error>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64, Error>,
{
    let (tmp_path, file) = create_temporary(path)?;

    trace!("Using temporary file {}", tmp_path.display());

    match write_and_sync(file, write).and_then(|written| {
        fs::rename(&tmp_path, path).map_err(Error::OutputWriteFailed)?;
        Ok(written)
    }) {
        Ok(written) => Ok(written),
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&tmp_path) {
                warn!(
                    "Could not remove partial image {}: {}",
                    tmp_path.display(),
                    remove_err
                );
            }

            Err(err)
        }
    }
}

fn write_and_sync<F>(file: File, write: F) -> Result<u64, Error>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64, Error>,
{
    let mut writer = BufWriter::new(file);

    let written = write(&mut writer)?;

    let file = writer
        .into_inner()
        .map_err(|err| Error::OutputWriteFailed(err.into_error()))?;
    file.sync_all().map_err(Error::OutputWriteFailed)?;

    Ok(written)
}

/// Creates a temporary file next to `path` that did not exist before
fn create_temporary(path: &Path) -> Result<(PathBuf, File), Error> {
    for _ in 0..MAX_TEMPORARY_ATTEMPTS {
        let sequence = TEMPORARY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let tmp_path = temporary_path(path, sequence);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(Error::OutputWriteFailed(err)),
        }
    }

    Err(Error::OutputWriteFailed(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free temporary name next to {}", path.display()),
    )))
}

/// Returns `.<name>.<pid>.<sequence>.tmp` next to `path` so the final rename stays on one
/// filesystem
fn temporary_path(path: &Path, sequence: usize) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(format!(".{}.{}.tmp", process::id(), sequence));

    path.with_file_name(name)
}
