use bytes::Bytes;

use crate::base::Varint;
use crate::stream::buffer::Buffer;
use crate::stream::object::WriteObjects;
use crate::{Result, Status};

pub const MAX_SIZE: usize = i32::MAX as usize;

/// Write side of one request or reply. Not shared between calls.
pub struct OutputStream {
    pub(super) buf: Buffer,
    pub(super) slices: Vec<usize>,
    pub(super) encaps: Vec<usize>,
    pub(super) objects: WriteObjects,
}

impl OutputStream {
    pub fn new() -> Self {
        Self {
            buf: Buffer::new(),
            slices: Vec::new(),
            encaps: Vec::new(),
            objects: WriteObjects::default(),
        }
    }

    pub fn len(&self) -> usize { self.buf.len() }

    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    pub fn as_slice(&self) -> &[u8] { self.buf.as_slice() }

    pub fn finished(self) -> Result<Bytes> {
        if !self.slices.is_empty() || !self.encaps.is_empty() {
            return Err(Status::Corruption("output stream finished with open slice or encapsulation".into()));
        }
        Ok(self.buf.freeze())
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(if v { 1 } else { 0 });
    }

    pub fn write_byte(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_short(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_int(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_long(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_double(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Non-negative count, varint encoded.
    pub fn write_size(&mut self, size: usize) -> Result<()> {
        if size > MAX_SIZE {
            return Err(Status::ResourceExhaustion(format!("size {} exceeds {}", size, MAX_SIZE)));
        }
        Varint::<u32>::encode(size as u32, self.buf.writer());
        Ok(())
    }

    pub fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_size(v.len())?;
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    /// Raw bytes with no size prefix.
    pub fn write_blob(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn write_byte_seq(&mut self, v: &[u8]) -> Result<()> {
        self.write_size(v.len())?;
        self.buf.put_slice(v);
        Ok(())
    }

    pub(super) fn reserve_i32(&mut self) -> usize {
        let pos = self.buf.write_pos();
        self.buf.put_i32(0);
        pos
    }

    pub(super) fn patch_size_from(&mut self, pos: usize) -> Result<()> {
        let size = self.buf.write_pos() - pos;
        if size > MAX_SIZE {
            return Err(Status::ResourceExhaustion(format!("section of {} bytes", size)));
        }
        self.buf.patch_i32(pos, size as i32)
    }
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity() {
        let mut os = OutputStream::new();
        os.write_bool(true);
        os.write_int(1);
        os.write_string("123456").unwrap();
        assert_eq!([1, 1, 0, 0, 0, 6, 49, 50, 51, 52, 53, 54], os.as_slice());
    }

    #[test]
    fn open_slice_is_not_finished() {
        let mut os = OutputStream::new();
        os.start_slice("::demo::A").unwrap();
        assert!(os.finished().is_err());
    }
}
