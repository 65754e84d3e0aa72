//! Image chunk decoding (`I?` and `F?`).
//!
//! Binary payloads start with a header (version 3) of at least 64 bytes,
//! every field a little-endian `u32`:
//!
//! ```text
//! 0x00 CHUNK_TYPE       0x10 IMAGE_WIDTH    0x20 FRAME_COUNT
//! 0x04 CHUNK_SIZE       0x14 IMAGE_HEIGHT   0x24 STATUS_CODE
//! 0x08 HEADER_SIZE      0x18 PIXEL_FORMAT   0x28 TIME_STAMP_SEC
//! 0x0C HEADER_VERSION   0x1C TIME_STAMP     0x2C TIME_STAMP_NSEC
//!                                           0x30 META_DATA
//! ```
//!
//! The image bytes run from `HEADER_SIZE` to `CHUNK_SIZE`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::ProtocolError;
use crate::protocol::LENGTH_DIGITS;

pub const CHUNK_HEADER_MIN_LEN: usize = 64;
pub const CHUNK_HEADER_VERSION: u32 = 3;

const BMP_MAGIC: &[u8; 2] = b"BM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    pub chunk_type: u32,
    pub chunk_size: u32,
    pub header_size: u32,
    pub header_version: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub pixel_format: u32,
    /// Microseconds
    pub timestamp: u32,
    pub frame_count: u32,
    pub status_code: u32,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
    /// Offset of the null-terminated JSON metadata, 0 if absent.
    pub meta_data: u32,
}

impl ChunkHeader {
    /// Read the fixed fields from the first 64 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < CHUNK_HEADER_MIN_LEN {
            return Err(ProtocolError::malformed(format!(
                "image chunk is {} bytes, shorter than the {}-byte header",
                data.len(),
                CHUNK_HEADER_MIN_LEN
            )));
        }

        let mut rdr = Cursor::new(&data[..CHUNK_HEADER_MIN_LEN]);
        let mut next = || rdr.read_u32::<LittleEndian>();
        let header = ChunkHeader {
            chunk_type: next()?,
            chunk_size: next()?,
            header_size: next()?,
            header_version: next()?,
            image_width: next()?,
            image_height: next()?,
            pixel_format: next()?,
            timestamp: next()?,
            frame_count: next()?,
            status_code: next()?,
            timestamp_sec: next()?,
            timestamp_nsec: next()?,
            meta_data: next()?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.header_version != CHUNK_HEADER_VERSION {
            return Err(ProtocolError::malformed(format!(
                "unsupported chunk header version {}",
                self.header_version
            )));
        }
        let header_size = self.header_size as usize;
        if header_size < CHUNK_HEADER_MIN_LEN || header_size % 16 != 0 {
            return Err(ProtocolError::malformed(format!(
                "chunk header size {} must be a multiple of 16 and at least {}",
                header_size, CHUNK_HEADER_MIN_LEN
            )));
        }
        if self.chunk_size < self.header_size {
            return Err(ProtocolError::malformed(format!(
                "chunk size {} is smaller than header size {}",
                self.chunk_size, self.header_size
            )));
        }
        Ok(())
    }
}

/// A decoded image chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageChunk {
    pub header: ChunkHeader,
    pub metadata: Option<serde_json::Value>,
    pub data: Vec<u8>,
}

/// Decode a raw chunk: header, optional metadata and image bytes.
pub fn decode_image_chunk(payload: &[u8]) -> Result<ImageChunk, ProtocolError> {
    let header = ChunkHeader::parse(payload)?;
    let header_size = header.header_size as usize;
    let chunk_size = header.chunk_size as usize;
    if chunk_size > payload.len() {
        return Err(ProtocolError::malformed(format!(
            "chunk declares {} bytes but only {} arrived",
            chunk_size,
            payload.len()
        )));
    }

    let metadata = parse_metadata(&payload[..header_size], header.meta_data as usize)?;
    Ok(ImageChunk {
        data: payload[header_size..chunk_size].to_vec(),
        header,
        metadata,
    })
}

fn parse_metadata(
    header: &[u8],
    offset: usize,
) -> Result<Option<serde_json::Value>, ProtocolError> {
    if offset == 0 {
        return Ok(None);
    }
    if offset < CHUNK_HEADER_MIN_LEN || offset >= header.len() {
        return Err(ProtocolError::malformed(format!(
            "metadata offset {} is outside the header",
            offset
        )));
    }
    let block = &header[offset..];
    let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
    if end == 0 {
        return Ok(None);
    }
    serde_json::from_slice(&block[..end])
        .map(Some)
        .map_err(|e| ProtocolError::malformed(format!("chunk metadata is not JSON: {}", e)))
}

/// Decode the answer to an image query.
///
/// The answer may start with a 9-digit decimal length of the remaining
/// bytes; it is checked and removed before the chunk header is parsed.
pub fn decode_image_response(payload: &[u8]) -> Result<ImageChunk, ProtocolError> {
    let chunk = strip_length_prefix(payload)?;
    if chunk.starts_with(BMP_MAGIC) {
        return Err(ProtocolError::UnsupportedFormat(
            "BMP image serialization".to_string(),
        ));
    }
    decode_image_chunk(chunk)
}

/// A bare chunk can only start with nine ASCII digits if its `CHUNK_SIZE`
/// bytes are all in `0x30..=0x39`, i.e. the chunk is at least 0x30303030
/// bytes (about 808 MB). Shorter payloads with a digit run are always
/// prefixed, whatever the `CHUNK_TYPE` bytes look like.
fn strip_length_prefix(payload: &[u8]) -> Result<&[u8], ProtocolError> {
    let Some(prefix) = payload.get(..LENGTH_DIGITS) else {
        return Ok(payload);
    };
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Ok(payload);
    }
    let declared = prefix
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    let rest = &payload[LENGTH_DIGITS..];
    if declared != rest.len() {
        return Err(ProtocolError::malformed(format!(
            "image length prefix declares {} bytes, got {}",
            declared,
            rest.len()
        )));
    }
    Ok(rest)
}
