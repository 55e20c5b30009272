//! Root-mean-square automatic gain control.

use super::Block;

/// Normalizes the signal to a target level `k` using an exponentially
/// weighted RMS estimate: `avg = (1-alpha)*avg + alpha*x^2`.
pub struct RmsAgc {
    alpha: f64,
    beta: f64,
    gain: f64,
    average: f64,
}

impl RmsAgc {
    pub fn new(alpha: f64, k: f64) -> Self {
        Self {
            alpha,
            beta: 1.0 - alpha,
            gain: k,
            average: 1.0,
        }
    }
}

impl Block<f32, f32> for RmsAgc {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len
    }

    fn work(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        for (i, &x) in input.iter().enumerate() {
            let cur = x as f64;
            self.average = self.beta * self.average + self.alpha * cur * cur;
            output[i] = if self.average > 0.0 {
                (self.gain * cur / self.average.sqrt()) as f32
            } else {
                (self.gain * cur) as f32
            };
        }
        input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_to_target_level() {
        let mut agc = RmsAgc::new(0.01, 0.61);
        // Constant amplitude square-ish input settles to +-0.61
        let input = vec![5.0f32; 4000];
        let mut out = vec![0.0f32; input.len()];
        agc.work(&input, &mut out);
        let tail = out[3999];
        assert!((tail - 0.61).abs() < 0.01, "settled at {}", tail);
    }

    #[test]
    fn test_sign_preserved() {
        let mut agc = RmsAgc::new(0.01, 1.0);
        let input = [-3.0f32, 3.0, -3.0, 3.0];
        let mut out = [0.0f32; 4];
        agc.work(&input, &mut out);
        assert!(out[0] < 0.0 && out[1] > 0.0);
    }

    #[test]
    fn test_zero_input_stays_zero() {
        let mut agc = RmsAgc::new(0.01, 0.61);
        let input = [0.0f32; 16];
        let mut out = [1.0f32; 16];
        agc.work(&input, &mut out);
        assert!(out.iter().all(|&x| x == 0.0));
    }
}
