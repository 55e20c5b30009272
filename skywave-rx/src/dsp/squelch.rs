//! Power squelch.

use num_complex::Complex;

use super::Block;

/// Gates the complex stream to zero while the smoothed input power sits below
/// a dB threshold. Applied ahead of FM demodulation so open-channel noise
/// never reaches the audio path.
pub struct Squelch {
    threshold_power: f64,
    alpha: f64,
    average: f64,
}

impl Squelch {
    pub fn new(threshold_db: f32, alpha: f64) -> Self {
        Self {
            threshold_power: 10f64.powf(threshold_db as f64 / 10.0),
            alpha,
            average: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.average >= self.threshold_power
    }
}

impl Block<Complex<f32>, Complex<f32>> for Squelch {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len
    }

    fn work(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) -> usize {
        for (i, &sample) in input.iter().enumerate() {
            let power = sample.norm_sqr() as f64;
            self.average = (1.0 - self.alpha) * self.average + self.alpha * power;
            output[i] = if self.average >= self.threshold_power {
                sample
            } else {
                Complex::default()
            };
        }
        input.len()
    }
}
