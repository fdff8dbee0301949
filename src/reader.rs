//! A cursor over a [`ByteSource`] that caches a sliding window of bytes and
//! stitches adjacent chunks when a primitive straddles a boundary.

use crate::byte_source::{require_full_read, ByteSource};
use crate::error::{Result, UlogError};

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Streaming cursor over a [`ByteSource`], issuing block reads and exposing
/// little-endian primitive decoders.
pub struct ChunkedReader<'s, S: ByteSource + ?Sized> {
    source: &'s S,
    chunk_size: u64,
    size: u64,
    /// Logical offset of the next byte to be read.
    position: u64,
    /// File offset at which `buf[0]` lives. Only meaningful while `buf` is non-empty.
    buf_start: u64,
    buf: Vec<u8>,
}

impl<'s, S: ByteSource + ?Sized> ChunkedReader<'s, S> {
    pub fn new(source: &'s S, chunk_size: u64) -> Self {
        let size = source.size();
        Self {
            source,
            chunk_size: chunk_size.max(1),
            size,
            position: 0,
            buf_start: 0,
            buf: Vec::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    pub fn seek_to(&mut self, absolute: u64) -> Result<()> {
        if absolute > self.size {
            return Err(UlogError::SeekOutOfRange {
                target: absolute as i128,
                size: self.size,
            });
        }
        self.position = absolute;
        Ok(())
    }

    pub fn seek(&mut self, relative: i64) -> Result<()> {
        let target = self.position as i128 + relative as i128;
        if target < 0 || target > self.size as i128 {
            return Err(UlogError::SeekOutOfRange {
                target,
                size: self.size,
            });
        }
        self.position = target as u64;
        Ok(())
    }

    pub fn skip(&mut self, n: i64) -> Result<()> {
        self.seek(n)
    }

    /// Byte at `position()+k` without advancing the cursor.
    pub fn peek_u8(&mut self, k: u64) -> Result<u8> {
        let save = self.position;
        let target = save.checked_add(k).ok_or(UlogError::SeekOutOfRange {
            target: save as i128 + k as i128,
            size: self.size,
        })?;
        self.position = target;
        let result = self.read_u8();
        self.position = save;
        result
    }

    /// Makes sure the loaded chunk covers `[position, position+want)`,
    /// fetching and stitching a new chunk if necessary.
    fn ensure(&mut self, want: u64) -> Result<()> {
        if self.remaining() < want {
            return Err(UlogError::UnexpectedEof {
                offset: self.position,
                needed: want,
                available: self.remaining(),
            });
        }
        let have = self.bytes_loaded_from_position();
        if have >= want {
            return Ok(());
        }

        let tail: Vec<u8> = if have > 0 {
            let start = (self.position - self.buf_start) as usize;
            self.buf[start..].to_vec()
        } else {
            Vec::new()
        };

        let need_more = want - have;
        let fetch_from = self.position + have;
        let file_remaining = self.size - fetch_from;
        let fetch_len = self.chunk_size.max(need_more).min(file_remaining);
        let fetched = require_full_read(self.source, fetch_from, fetch_len)?;

        let mut new_buf = tail;
        new_buf.extend_from_slice(&fetched);
        if (new_buf.len() as u64) < want {
            return Err(UlogError::UnexpectedEof {
                offset: self.position,
                needed: want,
                available: new_buf.len() as u64,
            });
        }
        self.buf = new_buf;
        self.buf_start = self.position;
        Ok(())
    }

    fn bytes_loaded_from_position(&self) -> u64 {
        if !self.buf.is_empty()
            && self.position >= self.buf_start
            && self.position < self.buf_start + self.buf.len() as u64
        {
            (self.buf_start + self.buf.len() as u64) - self.position
        } else {
            0
        }
    }

    fn slice(&self, width: usize) -> &[u8] {
        let start = (self.position - self.buf_start) as usize;
        &self.buf[start..start + width]
    }

    pub fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.ensure(n)?;
        let bytes = self.slice(n as usize).to_vec();
        self.position += n;
        Ok(bytes)
    }

    pub fn read_string(&mut self, n: u64) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.slice(1)[0];
        self.position += 1;
        Ok(v)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = u16::from_le_bytes(self.slice(2).try_into().unwrap());
        self.position += 2;
        Ok(v)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = u32::from_le_bytes(self.slice(4).try_into().unwrap());
        self.position += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = u64::from_le_bytes(self.slice(8).try_into().unwrap());
        self.position += 8;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        let v = f32::from_le_bytes(self.slice(4).try_into().unwrap());
        self.position += 4;
        Ok(v)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        let v = f64::from_le_bytes(self.slice(8).try_into().unwrap());
        self.position += 8;
        Ok(v)
    }
}
