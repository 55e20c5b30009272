//! Trunking control-channel decoding.
//!
//! The frame assembler turns sliced symbols into outbound signaling words;
//! the protocol processor turns runs of words into channel-assignment
//! updates.

pub mod smartnet;
pub mod testing;

use chrono::{DateTime, Utc};

/// One decoded outbound signaling word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OswPacket {
    pub system_id: u32,
    pub address: u16,
    pub group: bool,
    pub command: u16,
    pub raw: [u8; 6],
    pub timestamp: DateTime<Utc>,
}

/// A channel-assignment update emitted by a protocol processor.
///
/// `tgid != 0` assigns a talk group to a voice frequency; `tgid == 0` is a
/// control-channel broadcast naming an (additional) control frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub tgid: u16,
    pub source_id: u16,
    pub frequency: u64,
    pub system_id: u32,
}

impl ChannelUpdate {
    pub fn is_voice_grant(&self) -> bool {
        self.tgid != 0
    }
}
