use bytes::{Bytes, BytesMut};
use crc::{Crc, CRC_32_ISCSI};
use num_enum::TryFromPrimitive;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Corrupting, Result, Status};

pub const MAGIC: [u8; 4] = *b"SWRP";
pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 1 + 1 + 4 + 4;
const ZSTD_LEVEL: i32 = 3;

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Clone, Copy, TryFromPrimitive)]
pub enum MessageKind {
    Request,
    Reply,
    Close,
}

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Clone, Copy, TryFromPrimitive)]
pub enum Compression {
    None,
    Zstd,
}

/*
 * +-------+---------+------+-------------+-----------+-------+------+
 * | magic | version | kind | compression | body size | crc32 | body |
 * | 4     | 1       | 1    | 1           | u32 LE    | u32 LE|      |
 * +-------+---------+------+-------------+-----------+-------+------+
 * crc32 covers the uncompressed body
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub compression: Compression,
    pub body_size: usize,
    pub checksum: u32,
}

impl FrameHeader {
    pub fn decode(header: &[u8; FRAME_HEADER_SIZE], max_message_size: usize) -> Result<Self> {
        if header[..4] != MAGIC {
            return Err(Status::corrupted(format!("bad frame magic {:?}", &header[..4])));
        }
        if header[4] != PROTOCOL_VERSION {
            return Err(Status::corrupted(format!("unsupported protocol version {}", header[4])));
        }
        let kind = match MessageKind::try_from_primitive(header[5]) {
            Ok(kind) => kind,
            Err(_) => return Err(Status::corrupted(format!("bad message kind {}", header[5]))),
        };
        let compression = match Compression::try_from_primitive(header[6]) {
            Ok(c) => c,
            Err(_) => return Err(Status::corrupted(format!("bad compression {}", header[6]))),
        };
        let body_size = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        if body_size > max_message_size {
            return Err(Status::ResourceExhaustion(
                format!("frame of {} bytes exceeds limit {}", body_size, max_message_size)));
        }
        let checksum = u32::from_le_bytes([header[11], header[12], header[13], header[14]]);
        Ok(Self { kind, compression, body_size, checksum })
    }
}

pub fn checksum(body: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    let mut digest = crc.digest();
    digest.update(body);
    digest.finalize()
}

/// Builds a whole frame. Bodies of at least `compression_threshold` bytes are
/// compressed unless compression would not make them smaller.
pub fn encode_frame(kind: MessageKind, body: &[u8], compression_threshold: usize) -> Result<Bytes> {
    let mut compression = Compression::None;
    let mut payload = Bytes::copy_from_slice(body);
    if compression_threshold > 0 && body.len() >= compression_threshold {
        let compressed = zstd::encode_all(body, ZSTD_LEVEL)?;
        if compressed.len() < body.len() {
            compression = Compression::Zstd;
            payload = Bytes::from(compressed);
        }
    }
    if payload.len() > u32::MAX as usize {
        return Err(Status::ResourceExhaustion(format!("frame body of {} bytes", payload.len())));
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&[PROTOCOL_VERSION, kind as u8, compression as u8]);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(body).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Decompresses and verifies a body read for `header`.
pub fn decode_body(header: &FrameHeader, payload: Bytes, max_message_size: usize) -> Result<Bytes> {
    let body = match header.compression {
        Compression::None => payload,
        // capacity bounds the decompressed size
        Compression::Zstd => Bytes::from(zstd::bulk::decompress(&payload, max_message_size)?),
    };
    let actual = checksum(&body);
    if actual != header.checksum {
        return Err(Status::corrupted(format!("frame checksum mismatch: {:#x} != {:#x}", actual, header.checksum)));
    }
    Ok(body)
}

/// Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R>(r: &mut R, max_message_size: usize) -> Result<Option<(MessageKind, Bytes)>>
    where R: AsyncRead + Unpin {
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    let n = r.read(&mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    r.read_exact(&mut raw[n..]).await?;
    let header = FrameHeader::decode(&raw, max_message_size)?;

    let mut payload = vec![0u8; header.body_size];
    r.read_exact(&mut payload).await?;
    let body = decode_body(&header, Bytes::from(payload), max_message_size)?;
    Ok(Some((header.kind, body)))
}

pub async fn write_frame<W>(w: &mut W, kind: MessageKind, body: &[u8], compression_threshold: usize) -> Result<()>
    where W: AsyncWrite + Unpin {
    let frame = encode_frame(kind, body, compression_threshold)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}
