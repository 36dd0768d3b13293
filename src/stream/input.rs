use std::sync::Arc;

use bytes::Bytes;

use crate::base::Varint;
use crate::config::DEFAULT_MAX_SEQUENCE_ELEMENTS;
use crate::stream::buffer::Buffer;
use crate::stream::factory::FactoryRegistry;
use crate::stream::object::ReadObjects;
use crate::{Corrupting, Result, Status};

/// Read side of one request or reply. Not shared between calls.
pub struct InputStream {
    pub(super) buf: Buffer,
    pub(super) max_sequence_elements: usize,
    pub(super) factories: Option<Arc<FactoryRegistry>>,
    pub(super) slices: Vec<usize>,
    pub(super) encaps: Vec<usize>,
    pub(super) objects: ReadObjects,
}

impl InputStream {
    pub fn new(data: &[u8]) -> Self {
        Self {
            buf: Buffer::from_bytes(data),
            max_sequence_elements: DEFAULT_MAX_SEQUENCE_ELEMENTS,
            factories: None,
            slices: Vec::new(),
            encaps: Vec::new(),
            objects: ReadObjects::default(),
        }
    }

    pub fn with_factories(data: &[u8], factories: Arc<FactoryRegistry>, max_sequence_elements: usize) -> Self {
        let mut is = Self::new(data);
        is.factories = Some(factories);
        is.max_sequence_elements = max_sequence_elements;
        is
    }

    pub fn set_max_sequence_elements(&mut self, n: usize) {
        self.max_sequence_elements = n;
    }

    pub fn remaining(&self) -> usize { self.buf.remaining() }

    pub fn read_pos(&self) -> usize { self.buf.read_pos() }

    pub fn is_exhausted(&self) -> bool { self.buf.remaining() == 0 }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.buf.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Status::corrupted(format!("invalid bool byte {}", b))),
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.buf.get_u8()
    }

    pub fn read_short(&mut self) -> Result<i16> {
        self.buf.get_i16()
    }

    pub fn read_int(&mut self) -> Result<i32> {
        self.buf.get_i32()
    }

    pub fn read_long(&mut self) -> Result<i64> {
        self.buf.get_i64()
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.buf.get_f32()
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.buf.get_f64()
    }

    pub fn read_size(&mut self) -> Result<usize> {
        let (size, n) = Varint::<u32>::decode(self.buf.unread())?;
        if size > i32::MAX as u32 {
            return Err(Status::corrupted(format!("negative size {}", size as i32)));
        }
        self.buf.skip(n)?;
        Ok(size as usize)
    }

    /// Reads a size and rejects it unless `size * min_element_size` bytes are
    /// actually left in the stream. Runs before anything is allocated.
    pub fn read_and_check_seq_size(&mut self, min_element_size: usize) -> Result<usize> {
        let size = self.read_size()?;
        self.check_seq_size(size, min_element_size)?;
        Ok(size)
    }

    pub fn check_seq_size(&self, size: usize, min_element_size: usize) -> Result<()> {
        if size > self.max_sequence_elements {
            return Err(Status::ResourceExhaustion(
                format!("sequence of {} elements exceeds limit {}", size, self.max_sequence_elements)));
        }
        let needed = size.saturating_mul(min_element_size.max(1));
        if needed > self.remaining() {
            return Err(Status::ResourceExhaustion(
                format!("sequence of {} elements needs at least {} bytes, {} remaining",
                        size, needed, self.remaining())));
        }
        Ok(())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_size()?;
        let data = self.buf.take(len)?;
        match std::str::from_utf8(data) {
            Ok(s) => Ok(s.to_string()),
            Err(e) => Err(Status::corrupted(format!("invalid utf-8 string: {}", e))),
        }
    }

    pub fn read_blob(&mut self, len: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.buf.take(len)?))
    }

    pub fn read_byte_seq(&mut self) -> Result<Vec<u8>> {
        let len = self.read_and_check_seq_size(1)?;
        Ok(Vec::from(self.buf.take(len)?))
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.buf.skip(len)
    }

    pub(super) fn skip_to(&mut self, pos: usize) -> Result<()> {
        self.buf.skip_to(pos)
    }

    pub(super) fn peek_remaining(&self) -> &[u8] { self.buf.unread() }
}
