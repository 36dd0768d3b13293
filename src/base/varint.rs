use std::marker::PhantomData;

use bytes::BufMut;

use crate::{Corrupting, Result, Status};

/// Little-endian base-128 encoding: low 7 bits first, high bit set on every
/// byte except the last.
pub struct Varint<T> {
    data: PhantomData<T>,
}

impl Varint<u32> {
    pub const MAX_LEN: usize = 5;

    pub fn encode(value: u32, buf: &mut impl BufMut) -> usize {
        let mut v = value;
        let mut n = 0;
        while v >= 0x80 {
            buf.put_u8((v as u8 & 0x7f) | 0x80);
            v >>= 7;
            n += 1;
        }
        buf.put_u8(v as u8);
        n + 1
    }

    pub fn decode(buf: &[u8]) -> Result<(u32, usize)> {
        let mut rs = 0u32;
        for (i, b) in buf.iter().enumerate() {
            if i >= Self::MAX_LEN {
                break;
            }
            if i == Self::MAX_LEN - 1 && *b > 0x0f {
                return Err(Status::corrupted("varint32 overflow"));
            }
            rs |= ((b & 0x7f) as u32) << (i * 7);
            if *b < 0x80 {
                return Ok((rs, i + 1));
            }
        }
        if buf.len() >= Self::MAX_LEN {
            Err(Status::corrupted("varint32 too long"))
        } else {
            Err(Status::truncated(buf.len() + 1, buf.len()))
        }
    }

    pub fn encoded_len(value: u32) -> usize {
        let mut v = value;
        let mut n = 1;
        while v >= 0x80 {
            v >>= 7;
            n += 1;
        }
        n
    }
}
