//! The random-access byte source the decoder reads through.
//!
//! Concrete sources (files, mmaps, network-backed stores) are deliberately
//! not this crate's concern; callers hand the engine anything that can
//! answer positional reads. The blanket impls below over owned/borrowed byte
//! slices exist only so the engine and its tests have something to drive
//! without pulling in a filesystem dependency.

use crate::error::{Result, UlogError};

/// A random-access, shared-read byte source.
///
/// Reads are positional and idempotent. A short read at EOF is permitted;
/// callers that need every requested byte treat a short result as an error
/// themselves (`ChunkedReader` does exactly that).
pub trait ByteSource {
    /// Total size of the source, in bytes. Fixed for the lifetime of the source.
    fn size(&self) -> u64;

    /// Read up to `length` bytes starting at `offset`. May return fewer bytes
    /// than requested near EOF; never returns more.
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>>;
}

impl ByteSource for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let size = self.len() as u64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = ((offset + length).min(size)) as usize;
        Ok(self[start..end].to_vec())
    }
}

impl ByteSource for Vec<u8> {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.as_slice().read(offset, length)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        (**self).read(offset, length)
    }
}

/// Helper shared by `ChunkedReader`: turn a short/empty read into an explicit
/// error rather than silently feeding fewer bytes downstream.
pub(crate) fn require_full_read(
    source: &(impl ByteSource + ?Sized),
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    let bytes = source.read(offset, length)?;
    if (bytes.len() as u64) < length {
        return Err(UlogError::ShortRead {
            offset,
            requested: length,
            got: bytes.len() as u64,
        });
    }
    Ok(bytes)
}
