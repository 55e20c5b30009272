//! Root-raised-cosine pulse-shaping taps.

use std::f64::consts::PI;

/// Root-raised-cosine taps for a matched symbol filter. `ntaps` is forced
/// odd; the sum of the taps is normalized to `gain`.
pub fn root_raised_cosine(
    gain: f64,
    sample_rate: f64,
    symbol_rate: f64,
    alpha: f64,
    ntaps: usize,
) -> Vec<f32> {
    let ntaps = ntaps | 1;
    let spb = sample_rate / symbol_rate; // samples per bit/symbol
    let mut taps = vec![0.0f64; ntaps];
    let mut scale = 0.0f64;

    for (i, tap) in taps.iter_mut().enumerate() {
        let xindx = i as f64 - (ntaps / 2) as f64;
        let x1 = PI * xindx / spb;
        let x2 = 4.0 * alpha * xindx / spb;
        let x3 = x2 * x2 - 1.0;

        let (num, den);
        if x3.abs() >= 1e-6 {
            num = if i != ntaps / 2 {
                ((1.0 + alpha) * x1).cos() + ((1.0 - alpha) * x1).sin() / (4.0 * alpha * xindx / spb)
            } else {
                ((1.0 + alpha) * x1).cos() + (1.0 - alpha) * PI / (4.0 * alpha)
            };
            den = x3 * PI;
        } else {
            // At the singular points the limit form applies
            if alpha == 1.0 {
                *tap = -1.0;
                scale += *tap;
                continue;
            }
            let x3 = (1.0 - alpha) * x1;
            let x2 = (1.0 + alpha) * x1;
            num = x2.sin() * (1.0 + alpha) * PI
                - x3.cos() * ((1.0 - alpha) * PI * spb) / (4.0 * alpha * xindx)
                + x3.sin() * spb * spb / (4.0 * alpha * xindx * xindx);
            den = -32.0 * PI * alpha * alpha * xindx / spb;
        }
        *tap = 4.0 * alpha * num / den;
        scale += *tap;
    }

    taps.iter().map(|&t| (t * gain / scale) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_and_normalized() {
        // Control-channel configuration: 5 samples/symbol, span 7 symbols
        let taps = root_raised_cosine(1.0, 18_000.0, 3_600.0, 0.35, 35);
        assert_eq!(taps.len(), 35);
        let sum: f64 = taps.iter().map(|&t| t as f64).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..17 {
            assert!((taps[i] - taps[34 - i]).abs() < 1e-6, "asymmetric at {}", i);
        }
    }

    #[test]
    fn test_peak_at_center() {
        let taps = root_raised_cosine(1.0, 18_000.0, 3_600.0, 0.35, 35);
        let center = taps[17];
        assert!(taps.iter().all(|&t| t <= center));
    }

    #[test]
    fn test_even_request_is_made_odd() {
        let taps = root_raised_cosine(1.0, 24_000.0, 4_800.0, 0.2, 34);
        assert_eq!(taps.len(), 35);
    }
}
