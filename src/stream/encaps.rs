use bytes::Bytes;

use crate::stream::{InputStream, OutputStream};
use crate::{Corrupting, Result, Status};

pub const ENCODING_MAJOR: u8 = 1;
pub const ENCODING_MINOR: u8 = 0;
/// i32 size + major + minor
pub const ENCAPS_HEADER_SIZE: usize = 6;

/*
 * +--------+-------+-------+----------------+
 * | size   | major | minor | body           |
 * | i32 LE | u8    | u8    | size - 6 bytes |
 * +--------+-------+-------+----------------+
 */
impl OutputStream {
    pub fn start_encaps(&mut self) {
        let pos = self.reserve_i32();
        self.write_byte(ENCODING_MAJOR);
        self.write_byte(ENCODING_MINOR);
        self.encaps.push(pos);
    }

    pub fn end_encaps(&mut self) -> Result<()> {
        match self.encaps.pop() {
            Some(pos) => self.patch_size_from(pos),
            None => Err(Status::corrupted("end_encaps without start_encaps")),
        }
    }

    pub fn write_empty_encaps(&mut self) -> Result<()> {
        self.start_encaps();
        self.end_encaps()
    }

    /// Copies an already-built encapsulation, header included.
    pub fn write_encaps_bytes(&mut self, encaps: &[u8]) {
        self.write_blob(encaps);
    }
}

impl InputStream {
    pub fn start_read_encaps(&mut self) -> Result<()> {
        let start = self.read_pos();
        let size = self.read_int()?;
        if size < ENCAPS_HEADER_SIZE as i32 {
            return Err(Status::corrupted(format!("encapsulation size {} too small", size)));
        }
        let end = start + size as usize;
        if size as usize - 4 > self.remaining() {
            return Err(Status::truncated(size as usize - 4, self.remaining()));
        }
        let major = self.read_byte()?;
        let minor = self.read_byte()?;
        if major != ENCODING_MAJOR || minor > ENCODING_MINOR {
            return Err(Status::corrupted(format!("unsupported encoding {}.{}", major, minor)));
        }
        self.encaps.push(end);
        Ok(())
    }

    /// Skips whatever the reader did not consume: parameters appended by a
    /// newer peer are ignored. Fails if object references are still unresolved.
    pub fn end_read_encaps(&mut self) -> Result<()> {
        let end = match self.encaps.pop() {
            Some(end) => end,
            None => return Err(Status::corrupted("end_read_encaps without start_read_encaps")),
        };
        if self.objects.has_unresolved() {
            return Err(Status::corrupted("encapsulation ended with unresolved object references"));
        }
        if self.read_pos() > end {
            return Err(Status::corrupted(format!("read {} bytes past end of encapsulation", self.read_pos() - end)));
        }
        self.skip_to(end)
    }

    pub fn encaps_remaining(&self) -> usize {
        match self.encaps.last() {
            Some(end) => end.saturating_sub(self.read_pos()),
            None => self.remaining(),
        }
    }

    /// Returns a whole encapsulation, header included, without decoding it.
    pub fn read_encaps_bytes(&mut self) -> Result<Bytes> {
        let size = match self.peek_remaining() {
            [a, b, c, d, ..] => i32::from_le_bytes([*a, *b, *c, *d]),
            _ => return Err(Status::truncated(4, self.remaining())),
        };
        if size < ENCAPS_HEADER_SIZE as i32 {
            return Err(Status::corrupted(format!("encapsulation size {} too small", size)));
        }
        self.read_blob(size as usize)
    }

    pub fn skip_encaps(&mut self) -> Result<()> {
        self.read_encaps_bytes().map(|_| ())
    }
}
