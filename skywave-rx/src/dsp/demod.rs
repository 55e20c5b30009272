//! Quadrature FM demodulator.

use num_complex::Complex;

use super::Block;

/// Polar discriminator: the instantaneous frequency is the angle of
/// `z[i] * conj(z[i-1])`, scaled by a gain chosen from the deviation. The
/// last sample is kept so segment boundaries demodulate seamlessly.
pub struct QuadDemod {
    gain: f32,
    last: Complex<f32>,
}

impl QuadDemod {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            last: Complex::default(),
        }
    }
}

impl Block<Complex<f32>, f32> for QuadDemod {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len
    }

    fn work(&mut self, input: &[Complex<f32>], output: &mut [f32]) -> usize {
        for (i, &sample) in input.iter().enumerate() {
            let d = sample * self.last.conj();
            output[i] = self.gain * d.im.atan2(d.re);
            self.last = sample;
        }
        input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_constant_offset_gives_constant_output() {
        // A tone at +1 kHz in a 10 kS/s stream advances 0.2*pi per sample.
        let fs = 10_000.0;
        let freq = 1_000.0;
        let input: Vec<Complex<f32>> = (0..100)
            .map(|n| {
                let phi = 2.0 * PI * freq * n as f64 / fs;
                Complex::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect();

        let mut demod = QuadDemod::new(1.0);
        let mut out = vec![0.0f32; input.len()];
        demod.work(&input, &mut out);

        let expected = (2.0 * PI * freq / fs) as f32;
        for &v in &out[1..] {
            assert!((v - expected).abs() < 1e-4, "got {} want {}", v, expected);
        }
    }

    #[test]
    fn test_history_spans_calls() {
        let fs = 10_000.0;
        let input: Vec<Complex<f32>> = (0..10)
            .map(|n| {
                let phi = 2.0 * PI * 500.0 * n as f64 / fs;
                Complex::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect();

        let mut whole = QuadDemod::new(1.0);
        let mut out_whole = vec![0.0f32; 10];
        whole.work(&input, &mut out_whole);

        let mut split = QuadDemod::new(1.0);
        let mut out_split = vec![0.0f32; 10];
        split.work(&input[..4], &mut out_split[..4]);
        split.work(&input[4..], &mut out_split[4..]);

        assert_eq!(out_whole, out_split);
    }

    #[test]
    fn test_negative_offset_gives_negative_output() {
        let input: Vec<Complex<f32>> = (0..50)
            .map(|n| {
                let phi = -2.0 * PI * 0.05 * n as f64;
                Complex::new(phi.cos() as f32, phi.sin() as f32)
            })
            .collect();
        let mut demod = QuadDemod::new(2.0);
        let mut out = vec![0.0f32; input.len()];
        demod.work(&input, &mut out);
        for &v in &out[1..] {
            assert!(v < 0.0);
        }
    }
}
