//! FIR filter stages: plain, decimating, and polyphase resampling.
//!
//! All of them keep the last `ntaps - 1` input samples as history so segment
//! boundaries are seamless, and carry the decimation phase across calls so a
//! segment length that is not a multiple of the decimation factor does not
//! drift the output grid.

use std::ops::{Add, Mul};

use num_complex::Complex;
use skywave_common::{Error, Result};

use super::fir;
use super::window::Window;
use super::Block;

/// Element types a FIR stage can run over: `f32` against real taps,
/// `Complex<f32>` against real or complex taps.
pub trait FirSample<T>: Copy + Default + Add<Output = Self> + Mul<T, Output = Self> + Send {}

impl FirSample<f32> for f32 {}
impl FirSample<f32> for Complex<f32> {}
impl FirSample<Complex<f32>> for Complex<f32> {}

/// FIR filter with optional integer decimation.
///
/// Taps are stored reversed so the inner dot product against a chronological
/// window is a true convolution.
pub struct DecimatingFir<S, T> {
    taps: Vec<T>,
    decim: usize,
    hist_len: usize,
    buf: Vec<S>,
    phase: usize,
}

impl<S: FirSample<T>, T: Copy + Send> DecimatingFir<S, T> {
    pub fn new(mut taps: Vec<T>, decim: usize) -> Self {
        assert!(decim >= 1, "decimation factor must be at least 1");
        taps.reverse();
        let hist_len = taps.len().saturating_sub(1);
        Self {
            taps,
            decim,
            hist_len,
            buf: vec![S::default(); hist_len],
            phase: 0,
        }
    }

    /// Non-decimating convenience constructor.
    pub fn filter(taps: Vec<T>) -> Self {
        Self::new(taps, 1)
    }

    fn dot(&self, window: &[S]) -> S {
        let mut acc = S::default();
        for (tap, sample) in self.taps.iter().zip(window) {
            acc = acc + *sample * *tap;
        }
        acc
    }
}

impl<S: FirSample<T>, T: Copy + Send> Block<S, S> for DecimatingFir<S, T> {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len / self.decim + 1
    }

    fn work(&mut self, input: &[S], output: &mut [S]) -> usize {
        self.buf.extend_from_slice(input);
        let n = input.len();

        let mut produced = 0;
        let mut idx = self.phase;
        while idx < n {
            // Window ends at the sample `hist_len + idx`; with taps reversed
            // this is y[i] = sum taps[k] * x[i - k].
            output[produced] = self.dot(&self.buf[idx..idx + self.taps.len()]);
            produced += 1;
            idx += self.decim;
        }
        self.phase = idx - n;

        let keep_from = self.buf.len() - self.hist_len;
        self.buf.copy_within(keep_from.., 0);
        self.buf.truncate(self.hist_len);

        produced
    }
}

/// Polyphase rational resampler: up by P, down by Q, with P/Q reduced from the
/// requested rate pair.
pub struct RationalResampler<S> {
    phases: Vec<Vec<f32>>,
    phase_len: usize,
    interp: usize,
    decim: usize,
    ctr: usize,
    next_input: usize,
    hist_len: usize,
    buf: Vec<S>,
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl<S: FirSample<f32>> RationalResampler<S> {
    /// Build a resampler converting `input_rate` to `output_rate`. The
    /// prototype low-pass is designed at the virtual rate `input_rate * P`
    /// with its cutoff inside the narrower of the two Nyquist bands.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::ChainConfig(
                "resampler rates must be nonzero".into(),
            ));
        }
        let g = gcd(input_rate, output_rate);
        let interp = (output_rate / g) as usize;
        let decim = (input_rate / g) as usize;

        let narrow = input_rate.min(output_rate) as f64;
        let virtual_rate = input_rate as f64 * interp as f64;
        let mut prototype = fir::low_pass(
            interp as f64,
            virtual_rate,
            0.4 * narrow,
            0.2 * narrow,
            Window::Hamming,
        )?;

        // Pad to a whole number of phases
        while prototype.len() % interp != 0 {
            prototype.push(0.0);
        }
        let phase_len = prototype.len() / interp;

        // Phase m collects taps m, m+P, m+2P, ... reversed for convolution
        let mut phases = vec![Vec::with_capacity(phase_len); interp];
        for (j, &t) in prototype.iter().enumerate() {
            phases[j % interp].push(t);
        }
        for phase in &mut phases {
            phase.reverse();
        }

        let hist_len = phase_len.saturating_sub(1);
        Ok(Self {
            phases,
            phase_len,
            interp,
            decim,
            ctr: 0,
            next_input: 0,
            hist_len,
            buf: vec![S::default(); hist_len],
        })
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.interp, self.decim)
    }
}

impl<S: FirSample<f32>> Block<S, S> for RationalResampler<S> {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len * self.interp / self.decim + self.interp + 1
    }

    fn work(&mut self, input: &[S], output: &mut [S]) -> usize {
        self.buf.extend_from_slice(input);
        let n = input.len();

        let mut produced = 0;
        while self.next_input < n {
            let window = &self.buf[self.next_input..self.next_input + self.phase_len];
            let taps = &self.phases[self.ctr];
            let mut acc = S::default();
            for (tap, sample) in taps.iter().zip(window) {
                acc = acc + *sample * *tap;
            }
            output[produced] = acc;
            produced += 1;

            self.ctr += self.decim;
            while self.ctr >= self.interp {
                self.ctr -= self.interp;
                self.next_input += 1;
            }
        }
        self.next_input -= n;

        let keep_from = self.buf.len() - self.hist_len;
        self.buf.copy_within(keep_from.., 0);
        self.buf.truncate(self.hist_len);

        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_fir_identity() {
        let mut f: DecimatingFir<f32, f32> = DecimatingFir::filter(vec![1.0]);
        let input = [1.0, -2.0, 3.0, -4.0];
        let mut out = [0.0f32; 8];
        let n = f.work(&input, &mut out);
        assert_eq!(&out[..n], &input);
    }

    #[test]
    fn test_fir_history_across_calls() {
        // Moving average of 2: first output of the second call must see the
        // last sample of the first call.
        let mut f: DecimatingFir<f32, f32> = DecimatingFir::filter(vec![0.5, 0.5]);
        let mut out = [0.0f32; 8];
        let n = f.work(&[2.0, 4.0], &mut out);
        assert_eq!(n, 2);
        assert_eq!(out[0], 1.0); // history starts at zero
        assert_eq!(out[1], 3.0);
        let n = f.work(&[6.0], &mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0], 5.0);
    }

    #[test]
    fn test_decimation_phase_carries_across_calls() {
        let mut f: DecimatingFir<f32, f32> = DecimatingFir::new(vec![1.0], 3);
        let input: Vec<f32> = (0..10).map(|x| x as f32).collect();
        let mut out = [0.0f32; 8];

        // 10 samples then 5 samples through /3 must produce exactly the
        // multiples of 3 regardless of the split.
        let n1 = f.work(&input[..7], &mut out);
        let first: Vec<f32> = out[..n1].to_vec();
        let n2 = f.work(&input[7..], &mut out);
        let mut all = first;
        all.extend_from_slice(&out[..n2]);
        assert_eq!(all, vec![0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_decimating_output_count() {
        let mut f: DecimatingFir<f32, f32> = DecimatingFir::new(vec![1.0], 4);
        let input = vec![1.0f32; 1000];
        let mut out = vec![0.0f32; f.predict_output_size(1000)];
        assert_eq!(f.work(&input, &mut out), 250);
    }

    #[test]
    fn test_complex_fir_with_real_taps() {
        let mut f: DecimatingFir<Complex<f32>, f32> = DecimatingFir::filter(vec![2.0]);
        let input = [Complex::new(1.0, -1.0)];
        let mut out = [Complex::default(); 2];
        f.work(&input, &mut out);
        assert_eq!(out[0], Complex::new(2.0, -2.0));
    }

    #[test]
    fn test_resampler_ratio_reduction() {
        let r: RationalResampler<f32> = RationalResampler::new(25_000, 18_000).unwrap();
        assert_eq!(r.ratio(), (18, 25));
        let r: RationalResampler<f32> = RationalResampler::new(12_500, 8_000).unwrap();
        assert_eq!(r.ratio(), (16, 25));
    }

    #[test]
    fn test_resampler_output_rate() {
        let mut r: RationalResampler<f32> = RationalResampler::new(25_000, 18_000).unwrap();
        let input = vec![1.0f32; 2500];
        let mut out = vec![0.0f32; r.predict_output_size(2500)];
        let produced = r.work(&input, &mut out);
        // 2500 * 18/25 = 1800
        assert_eq!(produced, 1800);
    }

    #[test]
    fn test_resampler_passes_tone() {
        // A 1 kHz tone at 12.5 kS/s resampled to 8 kS/s stays a 1 kHz tone.
        let mut r: RationalResampler<f32> = RationalResampler::new(12_500, 8_000).unwrap();
        let input: Vec<f32> = (0..12_500)
            .map(|n| (2.0 * PI * 1000.0 * n as f64 / 12_500.0).sin() as f32)
            .collect();
        let mut out = vec![0.0f32; r.predict_output_size(input.len())];
        let produced = r.work(&input, &mut out);
        assert_eq!(produced, 8000);

        // Steady-state region: amplitude preserved, frequency preserved.
        let steady = &out[500..7500];
        let rms = (steady.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>()
            / steady.len() as f64)
            .sqrt();
        assert!((rms - 1.0 / 2.0f64.sqrt()).abs() < 0.02, "rms {}", rms);

        let crossings = steady
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        // 7000 samples at 8 kS/s of a 1 kHz tone: 1750 zero crossings
        assert!((1748..=1752).contains(&crossings), "crossings {}", crossings);
    }
}
