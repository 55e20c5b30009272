//! Complex NCO mixer.

use num_complex::Complex;

use super::Block;

const TAU: f64 = std::f64::consts::PI * 2.0;

/// Numerically controlled oscillator multiplying the input by
/// `exp(j*phase)`, `phase += 2*pi*f/Fs` per sample. Used to shift a selected
/// channel down to baseband; the frequency may be negative and fractional.
pub struct Nco {
    phase: f64,
    phase_increment: f64,
}

impl Nco {
    pub fn new(sample_rate: u32, frequency: f64) -> Self {
        Self {
            phase: 0.0,
            phase_increment: frequency * TAU / sample_rate as f64,
        }
    }

    fn increment_phase(&mut self) {
        self.phase += self.phase_increment;
        if self.phase > TAU {
            self.phase -= TAU;
        } else if self.phase < -TAU {
            self.phase += TAU;
        }
    }
}

impl Block<Complex<f32>, Complex<f32>> for Nco {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len
    }

    fn work(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) -> usize {
        for (i, sample) in input.iter().enumerate() {
            let (sin, cos) = self.phase.sin_cos();
            output[i] = Complex::new(cos as f32, sin as f32) * sample;
            self.increment_phase();
        }
        input.len()
    }
}
