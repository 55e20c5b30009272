//! Voice-channel pipeline.
//!
//! Narrowband FM voice: channel selection, squelch, demodulation,
//! deemphasis, audio band shaping, and resampling down to the configured
//! voice output rate. The PCM leaves here untagged; the output stage looks
//! up the owning talk group by frequency at emission time.

use std::f64::consts::PI;
use std::sync::Mutex;

use num_complex::Complex;
use tracing::info;

use skywave_common::config::{Config, SystemConfig};
use skywave_common::freq::{mhz, mhz_signed};
use skywave_common::metrics::{MetricsSink, Point};
use skywave_common::types::{ComplexSegment, RealSegment};
use skywave_common::Result;

use crate::dsp::chain::{Chain, ChainBuilder, SampleType};
use crate::dsp::deemph::Deemphasis;
use crate::dsp::demod::QuadDemod;
use crate::dsp::filter::{DecimatingFir, RationalResampler};
use crate::dsp::fir;
use crate::dsp::mixer::Nco;
use crate::dsp::squelch::Squelch;
use crate::dsp::window::Window;

use super::control::{bfo_fraction, decimation_factors, ChannelClass};
use super::EXPECTED_SEGMENT_SAMPLES;

/// Peak FM deviation of a narrowband voice channel.
const VOICE_DEVIATION_HZ: f64 = 4_000.0;

/// Untagged PCM from one voice channel pass.
#[derive(Debug)]
pub struct VoicePcm {
    pub system_id: u32,
    pub frequency: u64,
    pub audio: RealSegment,
}

/// Build the voice-channel DSP chain for one frequency.
pub fn build_voice_chain(
    center_freq: u64,
    sample_rate: u32,
    voice_output_rate: u32,
    frequency: u64,
    squelch_db: f32,
) -> Result<Chain> {
    let (dec1, dec2) = decimation_factors(sample_rate, ChannelClass::Voice);
    let if1 = sample_rate / dec1;
    let if2 = if1 / dec2;

    let shift = frequency as i64 - center_freq as i64;
    let bfo = bfo_fraction(shift, if1);

    info!(
        frequency = %mhz(frequency),
        channel_type = "voice",
        decimation_1 = dec1,
        decimation_2 = dec2,
        intermediate_freq_1 = if1,
        intermediate_freq_2 = if2,
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

    // Narrow channel low-pass ahead of the second decimation. The cutoff
    // and transition here are literal values carried over from the field-
    // tuned configuration; the transition is wider than the cutoff gap
    // suggests, and retuning it is an open item.
    let lpf = fir::low_pass(1.0, if1 as f64, 4_000.0, 2_000.0, Window::Hamming)?;

    let audio_lpf = fir::low_pass(1.0, if2 as f64, 3_000.0, 200.0, Window::Hamming)?;
    let audio_hpf = fir::high_pass(1.0, if2 as f64, 200.0, 100.0, Window::Hamming)?;
    let final_bpf = fir::band_pass(
        1.15,
        voice_output_rate as f64,
        300.0,
        3_400.0,
        100.0,
        Window::Hamming,
    )?;

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
        .cc("squelch", if2, if2, Squelch::new(squelch_db, 0.1))
        .cf(
            "quad_demod",
            if2,
            if2,
            QuadDemod::new(if2 as f32 / (4.0 * PI as f32 * VOICE_DEVIATION_HZ as f32)),
        )
        .ff("fm_deemphasis", if2, if2, Deemphasis::new(75e-6, if2))
        .ff(
            "audio_lowpass",
            if2,
            if2,
            DecimatingFir::<f32, f32>::filter(audio_lpf),
        )
        .ff(
            "audio_highpass",
            if2,
            if2,
            DecimatingFir::<f32, f32>::filter(audio_hpf),
        )
        .ff(
            "resampler",
            if2,
            voice_output_rate,
            RationalResampler::<f32>::new(if2, voice_output_rate)?,
        )
        .ff(
            "final_bandpass",
            voice_output_rate,
            voice_output_rate,
            DecimatingFir::<f32, f32>::filter(final_bpf),
        )
        .build(EXPECTED_SEGMENT_SAMPLES, SampleType::Real)
}

/// One dynamically spawned voice channel.
pub struct VoicePipeline {
    pub system_id: u32,
    pub frequency: u64,
    chain: Mutex<Chain>,
}

impl VoicePipeline {
    pub fn new(config: &Config, system: &SystemConfig, frequency: u64) -> Result<Self> {
        let chain = build_voice_chain(
            config.center_freq,
            config.sample_rate,
            config.voice_output_rate,
            frequency,
            system.squelch_db,
        )?;
        Ok(Self {
            system_id: system.id,
            frequency,
            chain: Mutex::new(chain),
        })
    }

    /// Run one wideband segment through the chain; returns the decoded PCM.
    pub fn process(&self, segment: &ComplexSegment, metrics: &dyn MetricsSink) -> VoicePcm {
        let mut point = Point::new("voice.processed")
            .tag("frequency", mhz(self.frequency))
            .tag("channel_type", "voice")
            .field("sample_length", segment.samples.len() as i64);

        let start = std::time::Instant::now();
        let (samples, rate) = {
            let mut chain = self.chain.lock().expect("voice pipeline lock poisoned");
            chain.process(&segment.samples, &mut point);
            (chain.real_output().to_vec(), chain.output_rate())
        };
        point.add_field("duration_us", start.elapsed().as_micros() as i64);
        point.add_field("samples_out", samples.len() as i64);
        metrics.record(point);

        VoicePcm {
            system_id: self.system_id,
            frequency: self.frequency,
            audio: RealSegment {
                segment_number: segment.segment_number,
                sample_rate: rate,
                samples,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_chain_builds_for_standard_rates() {
        for rate in [2_000_000u32, 8_000_000, 10_000_000] {
            build_voice_chain(852_500_000, rate, 8_000, 852_412_500, -50.0)
                .unwrap_or_else(|e| panic!("rate {}: {}", rate, e));
        }
    }

    #[test]
    fn test_mismatched_resampler_rates_refused() {
        // A voice output rate of 0 cannot be resampled to
        assert!(build_voice_chain(852_500_000, 8_000_000, 0, 852_412_500, -50.0).is_err());
    }
}
