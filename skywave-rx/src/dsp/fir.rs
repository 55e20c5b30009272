//! Windowed-sinc FIR tap design.
//!
//! Tap counts follow the usual attenuation estimate
//! `N = odd(atten_dB * Fs / (22 * transition))`. Gain is normalized at DC for
//! low-pass, at Nyquist for high-pass, and at mid-band for band-pass taps.

use num_complex::Complex;
use std::f64::consts::PI;

use skywave_common::Result;

use super::window::Window;

/// Tap count for a target transition width under the given window, forced odd.
pub fn compute_ntaps(sample_rate: f64, transition_width: f64, window: Window) -> Result<usize> {
    let atten = window.max_attenuation_db()? as f64;
    let ntaps = (atten * sample_rate / (22.0 * transition_width)) as usize;
    Ok(ntaps | 1)
}

/// Low-pass taps with the response at DC normalized to `gain`.
pub fn low_pass(
    gain: f64,
    sample_rate: f64,
    cutoff: f64,
    transition_width: f64,
    window: Window,
) -> Result<Vec<f32>> {
    let ntaps = compute_ntaps(sample_rate, transition_width, window)?;
    let w = window.coefficients(ntaps)?;

    let m = (ntaps - 1) as i64 / 2;
    let fw_t0 = 2.0 * PI * cutoff / sample_rate;

    let mut taps = vec![0.0f32; ntaps];
    for i in -m..=m {
        let idx = (i + m) as usize;
        if i == 0 {
            taps[idx] = (fw_t0 / PI * w[idx] as f64) as f32;
        } else {
            let fi = i as f64;
            taps[idx] = ((fi * fw_t0).sin() / (fi * PI) * w[idx] as f64) as f32;
        }
    }

    // Response at DC
    let mut fmax = taps[m as usize] as f64;
    for i in 1..=m {
        fmax += 2.0 * taps[(i + m) as usize] as f64;
    }

    let scale = gain / fmax;
    for t in &mut taps {
        *t = (*t as f64 * scale) as f32;
    }
    Ok(taps)
}

/// High-pass taps with the response at Nyquist normalized to `gain`.
pub fn high_pass(
    gain: f64,
    sample_rate: f64,
    cutoff: f64,
    transition_width: f64,
    window: Window,
) -> Result<Vec<f32>> {
    let ntaps = compute_ntaps(sample_rate, transition_width, window)?;
    let w = window.coefficients(ntaps)?;

    let m = (ntaps - 1) as i64 / 2;
    let fw_t0 = 2.0 * PI * cutoff / sample_rate;

    let mut taps = vec![0.0f32; ntaps];
    for i in -m..=m {
        let idx = (i + m) as usize;
        if i == 0 {
            taps[idx] = ((1.0 - fw_t0 / PI) * w[idx] as f64) as f32;
        } else {
            let fi = i as f64;
            taps[idx] = (-(fi * fw_t0).sin() / (fi * PI) * w[idx] as f64) as f32;
        }
    }

    // Response at the folding frequency
    let mut fmax = taps[m as usize] as f64;
    for i in 1..=m {
        fmax += 2.0 * taps[(i + m) as usize] as f64 * (i as f64 * PI).cos();
    }

    let scale = gain / fmax;
    for t in &mut taps {
        *t = (*t as f64 * scale) as f32;
    }
    Ok(taps)
}

/// Band-pass taps (real) with the mid-band response normalized to `gain`.
pub fn band_pass(
    gain: f64,
    sample_rate: f64,
    low_cutoff: f64,
    high_cutoff: f64,
    transition_width: f64,
    window: Window,
) -> Result<Vec<f32>> {
    let ntaps = compute_ntaps(sample_rate, transition_width, window)?;
    let w = window.coefficients(ntaps)?;

    let m = (ntaps - 1) as i64 / 2;
    let fw_t0 = 2.0 * PI * low_cutoff / sample_rate;
    let fw_t1 = 2.0 * PI * high_cutoff / sample_rate;

    let mut taps = vec![0.0f32; ntaps];
    for i in -m..=m {
        let idx = (i + m) as usize;
        if i == 0 {
            taps[idx] = ((fw_t1 - fw_t0) / PI * w[idx] as f64) as f32;
        } else {
            let fi = i as f64;
            taps[idx] =
                (((fi * fw_t1).sin() - (fi * fw_t0).sin()) / (fi * PI) * w[idx] as f64) as f32;
        }
    }

    // Response at band center
    let mut fmax = taps[m as usize] as f64;
    for i in 1..=m {
        fmax += 2.0 * taps[(i + m) as usize] as f64 * (i as f64 * (fw_t0 + fw_t1) * 0.5).cos();
    }

    let scale = gain / fmax;
    for t in &mut taps {
        *t = (*t as f64 * scale) as f32;
    }
    Ok(taps)
}

/// Complex band-pass taps: a half-bandwidth low-pass modulated up to the band
/// center. The band may be asymmetric around DC (and usually is, since it
/// selects one narrowband channel out of the wideband input).
pub fn complex_band_pass(
    gain: f64,
    sample_rate: f64,
    low_cutoff: f64,
    high_cutoff: f64,
    transition_width: f64,
    window: Window,
) -> Result<Vec<Complex<f32>>> {
    let lp = low_pass(
        gain,
        sample_rate,
        (high_cutoff - low_cutoff) / 2.0,
        transition_width,
        window,
    )?;

    let freq = PI * (high_cutoff + low_cutoff) / sample_rate;
    let mut phase = if lp.len() & 1 != 0 {
        -freq * (lp.len() >> 1) as f64
    } else {
        -freq / 2.0 * ((2 * lp.len() + 1) >> 1) as f64
    };

    let mut taps = Vec::with_capacity(lp.len());
    for &t in &lp {
        taps.push(Complex::new(
            (t as f64 * phase.cos()) as f32,
            (t as f64 * phase.sin()) as f32,
        ));
        phase += freq;
    }
    Ok(taps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_at(taps: &[f32], freq: f64, sample_rate: f64) -> f64 {
        // Magnitude of the DTFT at freq
        let omega = 2.0 * PI * freq / sample_rate;
        let (mut re, mut im) = (0.0f64, 0.0f64);
        for (n, &t) in taps.iter().enumerate() {
            re += t as f64 * (omega * n as f64).cos();
            im -= t as f64 * (omega * n as f64).sin();
        }
        (re * re + im * im).sqrt()
    }

    #[test]
    fn test_ntaps_is_odd_and_scales() {
        let n = compute_ntaps(8_000_000.0, 200_000.0, Window::Hamming).unwrap();
        assert_eq!(n % 2, 1);
        assert_eq!(n, 97);
    }

    #[test]
    fn test_low_pass_unity_dc_gain() {
        let taps = low_pass(1.0, 18_000.0, 6_562.5, 625.0, Window::Hann).unwrap();
        let sum: f64 = taps.iter().map(|&t| t as f64).sum();
        assert!((sum - 1.0).abs() < 1e-5, "DC gain {}", sum);
    }

    #[test]
    fn test_low_pass_rejects_stop_band() {
        let taps = low_pass(1.0, 48_000.0, 4_000.0, 1_000.0, Window::Hamming).unwrap();
        assert!(response_at(&taps, 0.0, 48_000.0) > 0.99);
        assert!(response_at(&taps, 10_000.0, 48_000.0) < 0.01);
    }

    #[test]
    fn test_high_pass_kills_dc() {
        let taps = high_pass(1.0, 12_500.0, 200.0, 100.0, Window::Hamming).unwrap();
        let dc: f64 = taps.iter().map(|&t| t as f64).sum();
        assert!(dc.abs() < 2e-2, "DC leakage {}", dc);
        assert!(response_at(&taps, 6_250.0, 12_500.0) > 0.99);
    }

    #[test]
    fn test_band_pass_center_gain() {
        let taps = band_pass(1.15, 8_000.0, 300.0, 3_400.0, 100.0, Window::Hamming).unwrap();
        let center = response_at(&taps, (300.0 + 3_400.0) / 2.0, 8_000.0);
        assert!((center - 1.15).abs() < 0.02, "center gain {}", center);
        assert!(response_at(&taps, 3_900.0, 8_000.0) < 0.05);
    }

    #[test]
    fn test_complex_band_pass_selects_offset_band() {
        // Band centered at +100 kHz out of 1 MS/s
        let taps =
            complex_band_pass(1.0, 1_000_000.0, 75_000.0, 125_000.0, 25_000.0, Window::Hamming)
                .unwrap();
        let at = |freq: f64| {
            let omega = 2.0 * PI * freq / 1_000_000.0;
            let mut acc = Complex::new(0.0f64, 0.0);
            for (n, t) in taps.iter().enumerate() {
                let rot = Complex::from_polar(1.0, -omega * n as f64);
                acc += Complex::new(t.re as f64, t.im as f64) * rot;
            }
            acc.norm()
        };
        assert!(at(100_000.0) > 0.9, "passband {}", at(100_000.0));
        assert!(at(-100_000.0) < 0.05, "image {}", at(-100_000.0));
        assert!(at(300_000.0) < 0.05, "stopband {}", at(300_000.0));
    }
}
