//! Length-prefixed framing codec.
//!
//! One wire frame is `[length: i32 big-endian][body: length bytes]`. The
//! codec is stateless and safe to share across concurrent connections; each
//! connection serializes its own reads and writes.
//!
//! Failure modes are terminal for the owning connection: a short read on the
//! prefix or body, a negative or oversized length, or a body that fails to
//! parse all surface as errors the per-connection loop treats as fatal.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::proto::{Message, decode_body, encode_body};

/// Default upper bound on a frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encodes and decodes framed schema messages on a byte stream.
#[derive(Debug, Clone)]
pub struct Codec {
    max_frame_len: usize,
}

impl Codec {
    pub fn new() -> Self {
        Codec { max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }

    /// A codec with a custom frame size bound.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Codec { max_frame_len }
    }

    /// Serialize `msg` and write one frame to `w`.
    pub fn encode<W: Write>(&self, msg: &Message, w: &mut W) -> Result<()> {
        let body = encode_body(msg)?;
        if body.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge { len: body.len() as i64, max: self.max_frame_len });
        }

        w.write_i32::<BigEndian>(body.len() as i32)?;
        w.write_all(&body)?;
        Ok(())
    }

    /// Read one frame from `r` and parse it.
    ///
    /// A zero-length frame is a valid empty message (the validator rejects it
    /// further up the pipeline).
    pub fn decode<R: Read>(&self, r: &mut R) -> Result<Message> {
        let len = r.read_i32::<BigEndian>()?;
        if len < 0 {
            return Err(Error::NegativeFrameLength(len));
        }

        let len = len as usize;
        if len > self.max_frame_len {
            return Err(Error::FrameTooLarge { len: len as i64, max: self.max_frame_len });
        }
        if len == 0 {
            return Ok(Message::default());
        }

        let mut body = vec![0u8; len];
        r.read_exact(&mut body)?;
        decode_body(&body)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}
