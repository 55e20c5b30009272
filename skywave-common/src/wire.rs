//! UDP wire format for encoded voice
//!
//! Each datagram is a 2-byte little-endian length prefix followed by exactly
//! that many bytes of bincode-serialized [`OpusFrame`]. Consumers on the far
//! side decode with the same crate version pinned in the workspace.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One encoded voice frame plus the talk-group metadata a consumer needs to
/// route it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusFrame {
    /// Opus packet bytes (one encoder output)
    pub payload: Vec<u8>,

    pub system_id: u32,
    pub tgid: u16,
    pub source_id: u16,

    /// Voice channel frequency in Hz
    pub frequency: u64,

    /// Duration of the encoded PCM in microseconds
    pub sample_length_us: u32,

    /// Microseconds since the Unix epoch, UTC
    pub timestamp_us: i64,
}

/// Microseconds since the Unix epoch, for stamping outgoing frames.
pub fn timestamp_now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

impl OpusFrame {
    /// Serialize with the length prefix, ready to hand to a UDP socket.
    pub fn to_datagram(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::Internal(format!("frame serialization: {}", e)))?;
        if body.len() > u16::MAX as usize {
            return Err(Error::Internal(format!(
                "frame too large for length prefix: {} bytes",
                body.len()
            )));
        }
        let mut datagram = Vec::with_capacity(2 + body.len());
        datagram.extend_from_slice(&(body.len() as u16).to_le_bytes());
        datagram.extend_from_slice(&body);
        Ok(datagram)
    }

    /// Parse a datagram produced by [`to_datagram`](Self::to_datagram).
    pub fn from_datagram(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < 2 {
            return Err(Error::Internal("datagram shorter than length prefix".into()));
        }
        let len = u16::from_le_bytes([datagram[0], datagram[1]]) as usize;
        let body = datagram
            .get(2..2 + len)
            .ok_or_else(|| Error::Internal("datagram truncated".into()))?;
        bincode::deserialize(body).map_err(|e| Error::Internal(format!("frame parse: {}", e)))
    }
}
