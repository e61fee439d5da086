//! Frame serialization and length-delimited framing
//!
//! Frames are serialized with postcard (compact binary format) and carried
//! length-prefixed so a byte stream can be cut back into frames:
//!
//! ```text
//! [Length: u32 (big-endian)][ServiceFrame bytes (postcard serialized)]
//! ```
//!
//! Maximum frame size is 64 KiB; PnP payloads are small control messages and
//! anything larger indicates a corrupt length prefix.

use crate::error::{ProtocolError, Result};
use crate::messages::ServiceFrame;
use std::io::{Read, Write};

/// Maximum allowed frame size (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode a frame to bytes using postcard
pub fn encode_frame(frame: &ServiceFrame) -> Result<Vec<u8>> {
    postcard::to_allocvec(frame).map_err(ProtocolError::from)
}

/// Decode a frame from bytes using postcard
pub fn decode_frame(bytes: &[u8]) -> Result<ServiceFrame> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}

/// Encode a frame with its length prefix
///
/// # Example
/// ```
/// use protocol::{CommandId, MatchInfoTable, ServiceFrame, encode_framed};
///
/// let frame = ServiceFrame::new(CommandId::AddTest, &MatchInfoTable::test_sample()).unwrap();
/// let framed = encode_framed(&frame).unwrap();
/// assert!(framed.len() >= 4);
/// ```
pub fn encode_framed(frame: &ServiceFrame) -> Result<Vec<u8>> {
    let frame_bytes = encode_frame(frame)?;
    let frame_len = frame_bytes.len();

    if frame_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut framed = Vec::with_capacity(4 + frame_len);
    framed.extend_from_slice(&(frame_len as u32).to_be_bytes());
    framed.extend_from_slice(&frame_bytes);

    Ok(framed)
}

/// Decode a length-prefixed frame
///
/// # Example
/// ```
/// use protocol::{CommandId, MatchInfoTable, ServiceFrame, decode_framed, encode_framed};
///
/// let frame = ServiceFrame::new(CommandId::AddTest, &MatchInfoTable::test_sample()).unwrap();
/// let framed = encode_framed(&frame).unwrap();
/// let decoded = decode_framed(&framed).unwrap();
/// assert_eq!(decoded.cmd, CommandId::AddTest);
/// ```
pub fn decode_framed(framed: &[u8]) -> Result<ServiceFrame> {
    // Need at least the length prefix
    if framed.len() < 4 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4,
            actual: framed.len(),
        });
    }

    let length = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if framed.len() < 4 + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4 + length,
            actual: framed.len(),
        });
    }

    decode_frame(&framed[4..4 + length])
}

/// Write a length-prefixed frame to a writer
pub fn write_framed<W: Write>(writer: &mut W, frame: &ServiceFrame) -> Result<()> {
    let framed = encode_framed(frame)?;
    writer.write_all(&framed)?;
    Ok(())
}

/// Read one length-prefixed frame from a reader
///
/// # Example
/// ```
/// use protocol::{CommandId, MatchInfoTable, ServiceFrame, read_framed, write_framed};
/// use std::io::Cursor;
///
/// let frame = ServiceFrame::new(CommandId::AddTest, &MatchInfoTable::test_sample()).unwrap();
/// let mut buffer = Vec::new();
/// write_framed(&mut buffer, &frame).unwrap();
///
/// let mut cursor = Cursor::new(buffer);
/// let decoded = read_framed(&mut cursor).unwrap();
/// assert_eq!(decoded.cmd, CommandId::AddTest);
/// ```
pub fn read_framed<R: Read>(reader: &mut R) -> Result<ServiceFrame> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let length = u32::from_be_bytes(len_bytes) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame_bytes = vec![0u8; length];
    reader.read_exact(&mut frame_bytes)?;

    decode_frame(&frame_bytes)
}
