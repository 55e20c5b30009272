//! Core sample and talk-group data types
//!
//! Segments are produced once, numbered in order, and never mutated after
//! publication. All PCM is f32 in [-1.0, 1.0], mono.

use std::sync::Arc;
use std::time::Instant;

use num_complex::Complex;

/// Raw interleaved signed 8-bit I/Q bytes as delivered by an SDR front end.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub sample_rate: u32,
    pub center_freq: u64,
    pub data: Vec<u8>,
}

impl RawSegment {
    /// Convert interleaved i8 byte pairs to complex floats in roughly [-1, 1].
    ///
    /// A trailing odd byte is ignored.
    pub fn to_complex(&self) -> ComplexSegment {
        let pairs = self.data.len() / 2;
        let mut samples = Vec::with_capacity(pairs);
        for chunk in self.data.chunks_exact(2) {
            let i = chunk[0] as i8 as f32 / 127.0;
            let q = chunk[1] as i8 as f32 / 127.0;
            samples.push(Complex::new(i, q));
        }
        ComplexSegment {
            segment_number: 0,
            sample_rate: self.sample_rate,
            center_freq: self.center_freq,
            samples,
        }
    }
}

/// A numbered run of complex baseband samples at a fixed rate and center
/// frequency. Immutable once published by the sample source.
#[derive(Debug, Clone)]
pub struct ComplexSegment {
    pub segment_number: u64,
    pub sample_rate: u32,
    pub center_freq: u64,
    pub samples: Vec<Complex<f32>>,
}

impl ComplexSegment {
    /// Mirror the segment back to interleaved signed 8-bit I/Q, the capture
    /// file format (identical to what the front end delivered).
    pub fn to_cs8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.push((s.re * 127.0).round().clamp(-127.0, 127.0) as i8 as u8);
            out.push((s.im * 127.0).round().clamp(-127.0, 127.0) as i8 as u8);
        }
        out
    }
}

/// Real-valued samples between intermediate DSP stages, and the final PCM
/// handed to audio sinks.
#[derive(Debug, Clone)]
pub struct RealSegment {
    pub segment_number: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// One symbol per byte, value 0 or 1 in the low bit. The handoff from DSP to
/// the frame assembler.
#[derive(Debug, Clone)]
pub struct SymbolSegment {
    pub segment_number: u64,
    pub symbol_rate: u32,
    pub symbols: Vec<u8>,
}

/// A talk-group binding: who is talking (source), to whom (tgid), and where
/// (frequency). Updated in place on re-assignment; staleness is checked on
/// read against `last_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkGroup {
    pub id: u16,
    pub system_id: u32,
    pub source_id: u16,
    pub frequency: u64,
    pub last_update: Instant,
}

impl TalkGroup {
    pub fn new(id: u16, system_id: u32, source_id: u16, frequency: u64) -> Self {
        Self {
            id,
            system_id,
            source_id,
            frequency,
            last_update: Instant::now(),
        }
    }
}

/// Decoded voice PCM plus the talk group it belongs to, as offered to audio
/// sinks. The segment is shared, not copied, across sinks.
#[derive(Debug, Clone)]
pub struct TaggedAudio {
    pub talk_group: TalkGroup,
    pub frequency: u64,
    pub audio: Arc<RealSegment>,
}
