//! Window functions for FIR tap design.

use skywave_common::{Error, Result};

/// Window family used when designing FIR taps. The attenuation figure drives
/// the tap-count estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hamming,
    Hann,
    Blackman,
    /// Blackman-Harris with an explicit attenuation target. Only 61, 67, 74,
    /// and 92 dB coefficient sets exist; anything else is rejected at
    /// construction.
    BlackmanHarris(u32),
}

impl Window {
    /// Maximum stop-band attenuation in dB achievable with this window.
    pub fn max_attenuation_db(&self) -> Result<u32> {
        match self {
            Window::Hamming => Ok(53),
            Window::Hann => Ok(44),
            Window::Blackman => Ok(74),
            Window::BlackmanHarris(atten @ (61 | 67 | 74 | 92)) => Ok(*atten),
            Window::BlackmanHarris(other) => Err(Error::ConfigRejected(format!(
                "Blackman-Harris attenuation must be one of 61, 67, 74, 92 dB (got {})",
                other
            ))),
        }
    }

    /// Window coefficients for `ntaps` points.
    pub fn coefficients(&self, ntaps: usize) -> Result<Vec<f32>> {
        match self {
            Window::Hamming => Ok(cos_window_3(ntaps, 0.54, 0.46, 0.0)),
            Window::Hann => Ok(cos_window_3(ntaps, 0.5, 0.5, 0.0)),
            Window::Blackman => Ok(cos_window_3(ntaps, 0.42, 0.5, 0.08)),
            Window::BlackmanHarris(61) => Ok(cos_window_3(ntaps, 0.42323, 0.49755, 0.07922)),
            Window::BlackmanHarris(67) => Ok(cos_window_3(ntaps, 0.44959, 0.49364, 0.05677)),
            Window::BlackmanHarris(74) => {
                Ok(cos_window_4(ntaps, 0.40271, 0.49703, 0.09392, 0.00183))
            }
            Window::BlackmanHarris(92) => {
                Ok(cos_window_4(ntaps, 0.35875, 0.48829, 0.14128, 0.01168))
            }
            Window::BlackmanHarris(other) => Err(Error::ConfigRejected(format!(
                "Blackman-Harris attenuation must be one of 61, 67, 74, 92 dB (got {})",
                other
            ))),
        }
    }
}

fn cos_window_3(ntaps: usize, c0: f64, c1: f64, c2: f64) -> Vec<f32> {
    let m = (ntaps - 1) as f64;
    (0..ntaps)
        .map(|i| {
            let x = i as f64 / m;
            (c0 - c1 * (2.0 * std::f64::consts::PI * x).cos()
                + c2 * (4.0 * std::f64::consts::PI * x).cos()) as f32
        })
        .collect()
}

fn cos_window_4(ntaps: usize, c0: f64, c1: f64, c2: f64, c3: f64) -> Vec<f32> {
    let m = (ntaps - 1) as f64;
    (0..ntaps)
        .map(|i| {
            let x = i as f64 / m;
            (c0 - c1 * (2.0 * std::f64::consts::PI * x).cos()
                + c2 * (4.0 * std::f64::consts::PI * x).cos()
                - c3 * (6.0 * std::f64::consts::PI * x).cos()) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_endpoints() {
        let w = Window::Hamming.coefficients(11).unwrap();
        assert!((w[0] - 0.08).abs() < 1e-6);
        assert!((w[10] - 0.08).abs() < 1e-6);
        assert!((w[5] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hann_symmetry() {
        let w = Window::Hann.coefficients(32).unwrap();
        for i in 0..16 {
            assert!((w[i] - w[31 - i]).abs() < 1e-6, "asymmetric at {}", i);
        }
    }

    #[test]
    fn test_blackman_harris_accepts_known_sets() {
        for atten in [61, 67, 74, 92] {
            assert!(Window::BlackmanHarris(atten).coefficients(21).is_ok());
        }
    }

    #[test]
    fn test_blackman_harris_rejects_unknown_attenuation() {
        assert!(matches!(
            Window::BlackmanHarris(80).coefficients(21),
            Err(Error::ConfigRejected(_))
        ));
        assert!(Window::BlackmanHarris(80).max_attenuation_db().is_err());
    }
}
