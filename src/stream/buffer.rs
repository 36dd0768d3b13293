use bytes::{BufMut, Bytes, BytesMut};

use crate::{Corrupting, Result, Status};

/// Growable byte buffer with independent read and write cursors. The write
/// cursor is always the end of the buffer; the only backward write is
/// `patch_i32` for size prefixes.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: BytesMut,
    read_pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn write_pos(&self) -> usize { self.data.len() }

    pub fn read_pos(&self) -> usize { self.read_pos }

    pub fn remaining(&self) -> usize { self.data.len() - self.read_pos }

    pub fn as_slice(&self) -> &[u8] { &self.data[..] }

    pub fn unread(&self) -> &[u8] { &self.data[self.read_pos..] }

    pub fn freeze(self) -> Bytes { self.data.freeze() }

    pub fn put_u8(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        self.data.put_slice(src);
    }

    pub fn put_i16(&mut self, v: i16) {
        self.data.put_i16_le(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.data.put_i32_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.data.put_i64_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.data.put_f32_le(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.data.put_f64_le(v);
    }

    pub fn writer(&mut self) -> &mut BytesMut { &mut self.data }

    /// Overwrites four already-written bytes at `pos`.
    pub fn patch_i32(&mut self, pos: usize, v: i32) -> Result<()> {
        if pos + 4 > self.data.len() {
            return Err(Status::corrupted(format!("patch position {} out of range", pos)));
        }
        self.data[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn take(&mut self, len: usize) -> Result<&[u8]> {
        if len > self.remaining() {
            return Err(Status::truncated(len, self.remaining()));
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut rs = [0u8; N];
        rs.copy_from_slice(self.take(N)?);
        Ok(rs)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Moves the read cursor forward to `pos`. Never moves it backward.
    pub fn skip_to(&mut self, pos: usize) -> Result<()> {
        if pos < self.read_pos {
            return Err(Status::corrupted(format!("read cursor {} already past {}", self.read_pos, pos)));
        }
        if pos > self.data.len() {
            return Err(Status::truncated(pos - self.read_pos, self.remaining()));
        }
        self.read_pos = pos;
        Ok(())
    }
}
