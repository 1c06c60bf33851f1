//! Wire format of the ownership channel.
//!
//! Every frame is a 4-byte big-endian payload length followed by a JSON
//! payload. Records travel as `[timestamp, level, line]`; the owner's own
//! client additionally sends `{"barrier": id}` markers.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Error, Level, LogRecord, Result};

/// Largest accepted payload.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size.
pub const FRAME_HEADER_SIZE: usize = 4;

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A formatted record to buffer.
    Record(LogRecord),
    /// Marks that everything sent before it on this connection has been read.
    Barrier(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WirePacket {
    Record(u64, Level, String),
    Barrier { barrier: u64 },
}

impl Packet {
    /// Serialize the payload.
    pub fn encode(self) -> Result<Bytes> {
        let wire = match self {
            Packet::Record(record) => {
                let (timestamp, level, line) = record.into_parts();
                WirePacket::Record(timestamp, level, line)
            }
            Packet::Barrier(barrier) => WirePacket::Barrier { barrier },
        };
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| Error::Transport(format!("failed to encode frame: {}", e)))
    }

    /// Parse a payload produced by [`Packet::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let wire: WirePacket = serde_json::from_slice(payload)
            .map_err(|e| Error::Transport(format!("malformed frame: {}", e)))?;
        Ok(match wire {
            WirePacket::Record(timestamp, level, line) => {
                Packet::Record(LogRecord::new(timestamp, level, line))
            }
            WirePacket::Barrier { barrier } => Packet::Barrier(barrier),
        })
    }
}

/// Length-prefixed framing for [`Packet`]s.
///
/// Decoding yields raw payloads so that a payload which fails to parse can be
/// dropped without losing the position in the stream. Partial frames stay in
/// the read buffer until the rest arrives.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_frame_size: usize,
}

impl RecordCodec {
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    fn too_large(&self, size: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame of {} bytes exceeds limit of {}",
                size, self.max_frame_size
            ),
        )
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Bytes>, io::Error> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = (&buf[..FRAME_HEADER_SIZE]).get_u32() as usize;
        if payload_len > self.max_frame_size {
            return Err(self.too_large(payload_len));
        }

        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(buf.split_to(payload_len).freeze()))
    }
}

impl Encoder<Packet> for RecordCodec {
    type Error = io::Error;

    fn encode(&mut self, packet: Packet, buf: &mut BytesMut) -> std::result::Result<(), io::Error> {
        let payload = packet
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if payload.len() > self.max_frame_size {
            return Err(self.too_large(payload.len()));
        }

        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put(payload);
        Ok(())
    }
}
