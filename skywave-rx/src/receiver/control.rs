//! Control-channel pipeline.
//!
//! Wideband complex samples in, decoded trunking words out. The DSP chain
//! narrows the wideband input to an 18 kHz IF, FM-demodulates, shapes with
//! an RRC matched filter, and recovers binary FSK symbols; the frame
//! assembler runs synchronously on the same pass.

use std::f64::consts::PI;
use std::sync::Mutex;

use num_complex::Complex;
use tokio::sync::mpsc;
use tracing::info;

use skywave_common::config::{Config, SystemConfig};
use skywave_common::freq::{mhz, mhz_signed};
use skywave_common::metrics::{MetricsSink, Point};
use skywave_common::types::ComplexSegment;
use skywave_common::Result;

use crate::dsp::agc::RmsAgc;
use crate::dsp::chain::{Chain, ChainBuilder, SampleType};
use crate::dsp::demod::QuadDemod;
use crate::dsp::filter::{DecimatingFir, RationalResampler};
use crate::dsp::fir;
use crate::dsp::mixer::Nco;
use crate::dsp::rrc;
use crate::dsp::window::Window;
use crate::modem::fsk4::Fsk4Sync;
use crate::modem::slicer::BinarySlicer;
use crate::trunking::smartnet::SmartnetAssembler;
use crate::trunking::OswPacket;

use super::EXPECTED_SEGMENT_SAMPLES;

/// Target rate for symbol processing; 18000 / 3600 gives 5 samples per
/// symbol.
pub const IF_RATE: u32 = 18_000;

/// Which chain profile a channel uses; the decimation split differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Control,
    Voice,
}

/// First- and second-stage decimation for a wideband rate, chosen so the
/// final IF lands in a small window around the nominal.
pub fn decimation_factors(sample_rate: u32, class: ChannelClass) -> (u32, u32) {
    match (sample_rate, class) {
        (10_000_000, ChannelClass::Control) => (25, 16),
        (10_000_000, ChannelClass::Voice) => (40, 20),
        (8_000_000, ChannelClass::Control) => (20, 16),
        (8_000_000, ChannelClass::Voice) => (20, 32),
        (rate, class) => {
            let mut dec1 = 10;
            if rate > 1_000_000 {
                dec1 *= rate / 1_000_000;
            }
            let dec2 = if class == ChannelClass::Control { 4 } else { 8 };
            (dec1, dec2)
        }
    }
}

/// Fractional beat-frequency-oscillator offset: where the channel lands
/// within the first IF after decimation aliasing, in turns per sample.
pub fn bfo_fraction(shift: i64, if1: u32) -> f64 {
    let mut bfo = shift as f64 / if1 as f64;
    bfo -= bfo.floor();
    if bfo < -0.5 {
        bfo += 1.0;
    }
    if bfo > 0.5 {
        bfo -= 1.0;
    }
    bfo
}

/// Build the control-channel DSP chain for one frequency.
pub fn build_control_chain(
    center_freq: u64,
    sample_rate: u32,
    frequency: u64,
    symbol_rate: u32,
) -> Result<Chain> {
    let (dec1, dec2) = decimation_factors(sample_rate, ChannelClass::Control);
    let if1 = sample_rate / dec1;
    let if2 = if1 / dec2;

    let shift = frequency as i64 - center_freq as i64;
    let bfo = bfo_fraction(shift, if1);

    info!(
        frequency = %mhz(frequency),
        channel_type = "control",
        decimation_1 = dec1,
        decimation_2 = dec2,
        intermediate_freq_1 = if1,
        intermediate_freq_2 = if2,
        intermediate_rate = IF_RATE,
        shift_freq = %mhz_signed(shift),
        bfo_freq = %mhz_signed((if1 as f64 * bfo) as i64),
        "initializing channel"
    );

    let bpf = fir::complex_band_pass(
        1.0,
        sample_rate as f64,
        shift as f64 - if1 as f64 / 2.0,
        shift as f64 + if1 as f64 / 2.0,
        if1 as f64 / 2.0,
        Window::Hamming,
    )?;

    let fa = 6_250.0;
    let fb = if2 as f64 / 2.0;
    let lpf = fir::low_pass(1.0, if1 as f64, (fb + fa) / 2.0, fb - fa, Window::Hamming)?;

    let fa = 6_250.0;
    let fb = fa + 625.0;
    let cutoff = fir::low_pass(1.0, IF_RATE as f64, (fb + fa) / 2.0, fb - fa, Window::Hann)?;

    let sps = IF_RATE / symbol_rate;
    let symbol_taps = rrc::root_raised_cosine(
        1.0,
        IF_RATE as f64,
        symbol_rate as f64,
        0.35,
        (7 * sps | 1) as usize,
    );

    ChainBuilder::new()
        .cc(
            "bandpass_decimator",
            sample_rate,
            if1,
            DecimatingFir::<Complex<f32>, Complex<f32>>::new(bpf, dec1 as usize),
        )
        .cc("bfo_mixer", if1, if1, Nco::new(if1, if1 as f64 * bfo))
        .cc(
            "lowpass_decimator",
            if1,
            if2,
            DecimatingFir::<Complex<f32>, f32>::new(lpf, dec2 as usize),
        )
        .cc(
            "resampler",
            if2,
            IF_RATE,
            RationalResampler::<Complex<f32>>::new(if2, IF_RATE)?,
        )
        .cc(
            "cutoff",
            IF_RATE,
            IF_RATE,
            DecimatingFir::<Complex<f32>, f32>::filter(cutoff),
        )
        .cf(
            "quad_demod",
            IF_RATE,
            IF_RATE,
            QuadDemod::new(IF_RATE as f32 / (2.0 * PI as f32 * symbol_rate as f32)),
        )
        .ff("baseband_amp", IF_RATE, IF_RATE, RmsAgc::new(0.01, 0.61))
        .ff(
            "symbol_filter",
            IF_RATE,
            IF_RATE,
            DecimatingFir::<f32, f32>::filter(symbol_taps),
        )
        .ff(
            "fsk_demodulator",
            IF_RATE,
            symbol_rate,
            Fsk4Sync::new(IF_RATE, symbol_rate, true),
        )
        .fb(
            "binary_slicer",
            symbol_rate,
            symbol_rate,
            BinarySlicer::new(true),
        )
        .build(EXPECTED_SEGMENT_SAMPLES, SampleType::Byte)
}

struct ControlInner {
    chain: Chain,
    assembler: SmartnetAssembler,
}

/// One control channel: a chain plus its frame assembler, owned together so
/// a segment pass hands symbols to the assembler synchronously.
pub struct ControlPipeline {
    pub system_id: u32,
    pub frequency: u64,
    inner: Mutex<ControlInner>,
}

impl ControlPipeline {
    pub fn new(
        config: &Config,
        system: &SystemConfig,
        frequency: u64,
        packets: mpsc::Sender<OswPacket>,
    ) -> Result<Self> {
        let chain = build_control_chain(
            config.center_freq,
            config.sample_rate,
            frequency,
            system.symbol_rate,
        )?;
        Ok(Self {
            system_id: system.id,
            frequency,
            inner: Mutex::new(ControlInner {
                chain,
                assembler: SmartnetAssembler::new(system.id, packets),
            }),
        })
    }

    /// Run one wideband segment through the chain and the assembler.
    pub fn process(&self, segment: &ComplexSegment, metrics: &dyn MetricsSink) {
        let mut point = Point::new("control.processed")
            .tag("frequency", mhz(self.frequency))
            .tag("channel_type", "control")
            .field("sample_length", segment.samples.len() as i64);

        let start = std::time::Instant::now();
        {
            let mut inner = self.inner.lock().expect("control pipeline lock poisoned");
            let inner = &mut *inner;
            inner.chain.process(&segment.samples, &mut point);

            let assembler_start = std::time::Instant::now();
            inner.assembler.receive(inner.chain.symbols());
            point.add_field(
                "assembler_duration_us",
                assembler_start.elapsed().as_micros() as i64,
            );

            let stats = inner.assembler.take_stats();
            point.add_field("packets", stats.packets as i64);
            point.add_field("crc_failures", stats.crc_failures as i64);
            point.add_field("sync_losses", stats.sync_losses as i64);
            point.add_field("dropped_packets", stats.dropped_packets as i64);
        }
        point.add_field("duration_us", start.elapsed().as_micros() as i64);

        metrics.record(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimation_table() {
        assert_eq!(decimation_factors(10_000_000, ChannelClass::Control), (25, 16));
        assert_eq!(decimation_factors(8_000_000, ChannelClass::Control), (20, 16));
        assert_eq!(decimation_factors(8_000_000, ChannelClass::Voice), (20, 32));
        assert_eq!(decimation_factors(2_000_000, ChannelClass::Control), (20, 4));
        assert_eq!(decimation_factors(2_000_000, ChannelClass::Voice), (20, 8));
    }

    #[test]
    fn test_bfo_fraction_wraps_to_half_turn() {
        assert_eq!(bfo_fraction(0, 400_000), 0.0);
        assert_eq!(bfo_fraction(100_000, 400_000), 0.25);
        // 300 kHz aliases to -100 kHz within a 400 kHz IF
        assert_eq!(bfo_fraction(300_000, 400_000), -0.25);
        assert_eq!(bfo_fraction(-100_000, 400_000), -0.25);
        // 1.4125 MHz is 3.53125 IF widths up; the fractional part wraps
        // past +0.5 to -0.46875
        assert!((bfo_fraction(1_412_500, 400_000) + 0.46875).abs() < 1e-9);
    }

    #[test]
    fn test_control_chain_builds_for_standard_rates() {
        for rate in [2_000_000u32, 8_000_000, 10_000_000] {
            build_control_chain(852_500_000, rate, 851_012_500, 3_600)
                .unwrap_or_else(|e| panic!("rate {}: {}", rate, e));
        }
    }
}
