//! SmartNet frame assembler.
//!
//! Locks onto the 0xAC sync byte, buffers one 84-symbol frame at a time,
//! deinterleaves, applies the single-error convolutional correction, checks
//! the 10-bit CRC, and pushes decoded words to the protocol processor.
//!
//! The assembler runs on the DSP thread and must never stall it: packets are
//! pushed with `try_send` and dropped when the channel is full.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::trunking::OswPacket;

use super::{
    CMD_INV_XOR, CRC_LENGTH, DATA_LENGTH, FRAME_LENGTH, ID_INV_XOR, PAYLOAD_LENGTH, SYNC_MAGIC,
};

const SYNC_TIMEOUT: Duration = Duration::from_secs(1);

/// Decode counters, flushed into per-segment metrics by the owning pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartnetStats {
    pub packets: u64,
    pub crc_failures: u64,
    pub sync_losses: u64,
    pub timer_expiries: u64,
    pub dropped_packets: u64,
}

impl SmartnetStats {
    pub fn take(&mut self) -> SmartnetStats {
        std::mem::take(self)
    }
}

pub struct SmartnetAssembler {
    system_id: u32,
    buf: [u8; 2 * FRAME_LENGTH],
    raw_frame: [u8; PAYLOAD_LENGTH],
    ecc_frame: [u8; DATA_LENGTH + CRC_LENGTH],
    buf_idx: usize,
    rx_count: usize,
    sync_reg: u8,
    in_sync: bool,
    deadline: Instant,
    sync_timeout: Duration,
    output: mpsc::Sender<OswPacket>,
    stats: SmartnetStats,
}

impl SmartnetAssembler {
    pub fn new(system_id: u32, output: mpsc::Sender<OswPacket>) -> Self {
        Self {
            system_id,
            buf: [0; 2 * FRAME_LENGTH],
            raw_frame: [0; PAYLOAD_LENGTH],
            ecc_frame: [0; DATA_LENGTH + CRC_LENGTH],
            buf_idx: 0,
            rx_count: 0,
            sync_reg: 0,
            in_sync: false,
            deadline: Instant::now() + SYNC_TIMEOUT,
            sync_timeout: SYNC_TIMEOUT,
            output,
            stats: SmartnetStats::default(),
        }
    }

    /// Shorten the sync timeout; test hook.
    #[cfg(test)]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Drain the decode counters accumulated since the last call.
    pub fn take_stats(&mut self) -> SmartnetStats {
        self.stats.take()
    }

    /// Feed sliced symbols, one per byte, low bit significant.
    pub fn receive(&mut self, symbols: &[u8]) {
        for &symbol in symbols {
            self.receive_symbol(symbol);
        }
    }

    fn insert_symbol(&mut self, symbol: u8) {
        self.buf[self.buf_idx] = symbol;
        self.buf[self.buf_idx + FRAME_LENGTH] = symbol;
        self.buf_idx = (self.buf_idx + 1) % FRAME_LENGTH;
    }

    fn receive_symbol(&mut self, symbol: u8) {
        self.sync_reg = (self.sync_reg << 1) | (symbol & 1);
        let sync_detected = self.sync_reg == SYNC_MAGIC;

        self.insert_symbol(symbol);
        self.rx_count += 1;

        let now = Instant::now();
        if now >= self.deadline {
            debug!(system = "smartnet", "sync timer expired");
            self.stats.timer_expiries += 1;
            self.in_sync = false;
            self.rx_count = 0;
            self.deadline = now + self.sync_timeout;
            return;
        }

        if sync_detected && !self.in_sync {
            self.in_sync = true;
            self.rx_count = 0;
            return;
        }

        if !self.in_sync || self.rx_count < FRAME_LENGTH {
            return;
        }

        // Sync must reappear exactly at the frame boundary.
        if !sync_detected {
            debug!(system = "smartnet", "sync lost");
            self.stats.sync_losses += 1;
            self.in_sync = false;
            self.rx_count = 0;
            return;
        }

        self.rx_count = 0;

        self.deinterleave();
        self.error_correction();

        match self.crc_check() {
            Some(packet) => {
                self.stats.packets += 1;
                // Never block the DSP thread; freshness beats completeness.
                if self.output.try_send(packet).is_err() {
                    self.stats.dropped_packets += 1;
                }
                self.deadline = Instant::now() + self.sync_timeout;
            }
            None => {
                debug!(system = "smartnet", "CRC failure");
                self.stats.crc_failures += 1;
            }
        }
    }

    /// `raw[k*4 + l] = buf[k + l*19]` over the 76-symbol payload.
    fn deinterleave(&mut self) {
        let window = &self.buf[self.buf_idx..self.buf_idx + PAYLOAD_LENGTH];
        for k in 0..PAYLOAD_LENGTH / 4 {
            for l in 0..4 {
                self.raw_frame[k * 4 + l] = window[k + l * 19];
            }
        }
    }

    /// Convolutional single-error correction: a pair of set syndrome bits one
    /// step apart flips the data bit between them.
    fn error_correction(&mut self) {
        let mut expected = [0u8; PAYLOAD_LENGTH];
        let mut syndrome = [0u8; PAYLOAD_LENGTH];

        expected[0] = self.raw_frame[0] & 1;
        expected[1] = self.raw_frame[0] & 1;
        for k in (2..PAYLOAD_LENGTH).step_by(2) {
            expected[k] = self.raw_frame[k] & 1;
            expected[k + 1] = (self.raw_frame[k] & 1) ^ (self.raw_frame[k - 2] & 1);
        }

        for k in 0..PAYLOAD_LENGTH {
            syndrome[k] = expected[k] ^ (self.raw_frame[k] & 1);
        }

        for k in 0..(PAYLOAD_LENGTH / 2 - 1) {
            if syndrome[2 * k + 1] == 1 && syndrome[2 * k + 3] == 1 {
                self.ecc_frame[k] = !self.raw_frame[2 * k] & 1;
            } else {
                self.ecc_frame[k] = self.raw_frame[2 * k] & 1;
            }
        }
    }

    /// Returns the unpacked word if the CRC over the 27 data bits matches the
    /// inverted 10-bit tail.
    fn crc_check(&self) -> Option<OswPacket> {
        let mut accum: u16 = 0x0393;
        let mut op: u16 = 0x036E;

        for j in 0..DATA_LENGTH {
            if op & 1 == 1 {
                op = (op >> 1) ^ 0x0225;
            } else {
                op >>= 1;
            }
            if self.ecc_frame[j] & 1 != 0 {
                accum ^= op;
            }
        }

        let mut given: u16 = 0;
        for j in 0..CRC_LENGTH {
            given <<= 1;
            given += u16::from(!self.ecc_frame[j + DATA_LENGTH]) & 1;
        }

        if given != accum {
            return None;
        }

        let mut address: u16 = 0;
        for j in 0..16 {
            address = (address << 1) + (u16::from(self.ecc_frame[j]) & 1);
        }
        address ^= ID_INV_XOR;

        let group = self.ecc_frame[16] & 1 == 0;

        let mut command: u16 = 0;
        for j in 17..DATA_LENGTH {
            command = (command << 1) + (u16::from(self.ecc_frame[j]) & 1);
        }
        command ^= CMD_INV_XOR;

        let raw = [
            (address >> 8) as u8,
            (address & 0xFF) as u8,
            group as u8,
            (command >> 8) as u8,
            (command & 0xFF) as u8,
            0,
        ];

        Some(OswPacket {
            system_id: self.system_id,
            address,
            group,
            command,
            raw,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trunking::testing::{encode_stream, sync_symbols};

    fn assembler(capacity: usize) -> (SmartnetAssembler, mpsc::Receiver<OswPacket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SmartnetAssembler::new(7, tx), rx)
    }

    #[test]
    fn test_single_frame_decodes() {
        let (mut asm, mut rx) = assembler(8);
        asm.receive(&encode_stream(&[(0xBEEF, true, 0x308)]));

        let packet = rx.try_recv().expect("one packet");
        assert_eq!(packet.address, 0xBEEF);
        assert!(packet.group);
        assert_eq!(packet.command, 0x308);
        assert_eq!(packet.system_id, 7);
        assert_eq!(packet.raw[0], 0xBE);
        assert_eq!(packet.raw[1], 0xEF);
        assert!(rx.try_recv().is_err());
        assert_eq!(asm.take_stats().packets, 1);
    }

    #[test]
    fn test_back_to_back_frames() {
        let (mut asm, mut rx) = assembler(8);
        asm.receive(&encode_stream(&[
            (0x1234, true, 0x200),
            (0x5678, false, 0x308),
        ]));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.address, first.command), (0x1234, 0x200));
        assert_eq!((second.address, second.command), (0x5678, 0x308));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_idle_padding_between_streams_is_harmless() {
        // Baseline: both words in one contiguous stream
        let (mut asm, mut rx) = assembler(8);
        asm.receive(&encode_stream(&[(0x1234, true, 0x200), (0x5678, false, 0x308)]));
        let baseline: Vec<u16> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.address)
            .collect();

        // The same words as separate streams with a frame of idle zeros
        // injected between them decode identically.
        let (mut asm, mut rx) = assembler(8);
        let mut padded = encode_stream(&[(0x1234, true, 0x200)]);
        padded.extend(std::iter::repeat(0u8).take(84));
        padded.extend(encode_stream(&[(0x5678, false, 0x308)]));
        asm.receive(&padded);
        let got: Vec<u16> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.address)
            .collect();

        assert_eq!(baseline, vec![0x1234, 0x5678]);
        assert_eq!(got, baseline);
    }

    #[test]
    fn test_single_bit_error_corrected() {
        let (mut asm, mut rx) = assembler(8);
        let mut symbols = encode_stream(&[(0xBEEF, true, 0x308)]);
        // Flip one even data position (payload symbol 12 carries raw bit 48)
        symbols[20] ^= 1;
        asm.receive(&symbols);

        let packet = rx.try_recv().expect("corrected packet");
        assert_eq!(packet.address, 0xBEEF);
        assert_eq!(packet.command, 0x308);
        assert_eq!(asm.take_stats().crc_failures, 0);
    }

    #[test]
    fn test_double_error_fails_crc() {
        let (mut asm, mut rx) = assembler(8);
        let mut symbols = encode_stream(&[(0xBEEF, true, 0x308)]);
        // Two even data bits four apart trip a miscorrection between them,
        // which the CRC then catches.
        symbols[13] ^= 1;
        symbols[14] ^= 1;
        asm.receive(&symbols);

        assert!(rx.try_recv().is_err());
        assert_eq!(asm.take_stats().crc_failures, 1);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (mut asm, mut rx) = assembler(1);
        asm.receive(&encode_stream(&[
            (0x1111, false, 0x100),
            (0x2222, false, 0x101),
            (0x3333, false, 0x102),
        ]));

        assert_eq!(rx.try_recv().unwrap().address, 0x1111);
        assert!(rx.try_recv().is_err());
        assert_eq!(asm.take_stats().dropped_packets, 2);
    }

    #[test]
    fn test_sync_timeout_drops_lock() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut asm =
            SmartnetAssembler::new(7, tx).with_sync_timeout(Duration::from_millis(10));

        asm.receive(&encode_stream(&[(0x1234, true, 0x200)]));
        assert!(rx.try_recv().is_ok());

        std::thread::sleep(Duration::from_millis(20));
        // First symbol after the deadline resets the state machine.
        asm.receive(&sync_symbols());
        assert_eq!(asm.take_stats().timer_expiries, 1);
    }
}
