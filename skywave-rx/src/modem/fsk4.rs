//! Continuous-phase 4-FSK symbol synchronizer.
//!
//! A per-sample tracking loop: the symbol clock advances by
//! `symbol_rate / sample_rate` per input sample and emits one interpolated
//! soft symbol each time it rolls over 1.0. Interpolation is MMSE-style, an
//! 8-tap fractional-delay filter bank over the most recent input history,
//! indexed by the clock's fractional position. The hard decision against the
//! nominal levels (+-0.5 and +-1.5 times the symbol spread) feeds back into
//! the clock, the spread estimate, and the fine/coarse frequency correction.
//!
//! In binary mode the decision collapses to two levels, which is what the
//! SmartNet control channel uses.

use crate::dsp::Block;

const NUM_TAPS: usize = 8;
const NUM_STEPS: usize = 128;

const DEFAULT_SYMBOL_SPREAD: f32 = 2.0;
const SYMBOL_SPREAD_MIN: f32 = 1.6;
const SYMBOL_SPREAD_MAX: f32 = 2.4;

// Loop gains, tuned for lock speed against stability.
const K_SYMBOL_SPREAD: f32 = 0.0100;
const K_SYMBOL_TIMING: f32 = 0.025;
const K_FINE_FREQUENCY: f32 = 0.00125;
const K_COARSE_FREQUENCY: f32 = 0.00125;

/// Fractional-delay interpolator bank: row `s` evaluates the input between
/// history positions 3 and 4 at fraction `s / NUM_STEPS`.
fn interpolation_taps() -> Vec<[f32; NUM_TAPS]> {
    let mut table = Vec::with_capacity(NUM_STEPS + 1);
    for step in 0..=NUM_STEPS {
        let mu = step as f64 / NUM_STEPS as f64;
        let delay = 3.0 + mu;
        let mut row = [0.0f32; NUM_TAPS];
        let mut sum = 0.0f64;
        for (i, tap) in row.iter_mut().enumerate() {
            let x = i as f64 - delay;
            let sinc = if x.abs() < 1e-9 {
                1.0
            } else {
                (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
            };
            // Hamming-windowed over the 8-tap span around the delay point
            let w = 0.54 + 0.46 * (std::f64::consts::PI * x / 4.0).cos();
            let v = sinc * w;
            *tap = v as f32;
            sum += v;
        }
        // Unity DC gain so the interpolator never rescales the levels
        for tap in row.iter_mut() {
            *tap = (*tap as f64 / sum) as f32;
        }
        table.push(row);
    }
    table
}

pub struct Fsk4Sync {
    sample_rate: u32,
    symbol_rate: u32,

    taps: Vec<[f32; NUM_TAPS]>,
    history: [f32; NUM_TAPS],
    history_last: usize,

    symbol_clock: f32,
    symbol_spread: f32,
    symbol_time: f32,

    fine_freq_correction: f32,
    coarse_freq_correction: f32,

    binary: bool,
}

impl Fsk4Sync {
    /// `binary` selects 2-level decisions instead of 4.
    pub fn new(sample_rate: u32, symbol_rate: u32, binary: bool) -> Self {
        Self {
            sample_rate,
            symbol_rate,
            taps: interpolation_taps(),
            history: [0.0; NUM_TAPS],
            history_last: 0,
            symbol_clock: 0.0,
            symbol_spread: DEFAULT_SYMBOL_SPREAD,
            symbol_time: symbol_rate as f32 / sample_rate as f32,
            fine_freq_correction: 0.0,
            coarse_freq_correction: 0.0,
            binary,
        }
    }

    pub fn reset(&mut self) {
        self.symbol_clock = 0.0;
        self.symbol_spread = DEFAULT_SYMBOL_SPREAD;
        self.fine_freq_correction = 0.0;
        self.coarse_freq_correction = 0.0;
    }

    /// Advance the loop by one input sample; returns the soft symbol if the
    /// clock rolled over.
    fn track(&mut self, input: f32) -> Option<f32> {
        self.symbol_clock += self.symbol_time;
        self.history[self.history_last] = input;
        self.history_last = (self.history_last + 1) % NUM_TAPS;

        if self.symbol_clock <= 1.0 {
            return None;
        }
        self.symbol_clock -= 1.0;

        let mut imu =
            (0.5 + NUM_STEPS as f32 * (self.symbol_clock / self.symbol_time)).floor() as usize;
        let mut imu_p1 = imu + 1;
        if imu >= NUM_STEPS {
            imu = NUM_STEPS - 1;
            imu_p1 = NUM_STEPS;
        }

        let mut j = self.history_last;
        let mut interp = 0.0f32;
        let mut interp_p1 = 0.0f32;
        for i in 0..NUM_TAPS {
            interp += self.taps[imu][i] * self.history[j];
            interp_p1 += self.taps[imu_p1][i] * self.history[j];
            j = (j + 1) % NUM_TAPS;
        }

        interp -= self.fine_freq_correction;
        interp_p1 -= self.fine_freq_correction;

        let output = 2.0 * interp / self.symbol_spread;

        // Hard decision: distance from the nominal level at +-0.5 (and in
        // 4-level mode +-1.5) times the symbol spread.
        let symbol_error;
        if self.binary {
            if interp < 0.0 {
                symbol_error = interp + 0.5 * self.symbol_spread;
                self.symbol_spread -= symbol_error * K_SYMBOL_SPREAD;
            } else {
                symbol_error = interp - 0.5 * self.symbol_spread;
                self.symbol_spread += symbol_error * K_SYMBOL_SPREAD;
            }
        } else if interp < -self.symbol_spread {
            symbol_error = interp + 1.5 * self.symbol_spread;
            self.symbol_spread -= symbol_error * 0.5 * K_SYMBOL_SPREAD;
        } else if interp < 0.0 {
            symbol_error = interp + 0.5 * self.symbol_spread;
            self.symbol_spread -= symbol_error * K_SYMBOL_SPREAD;
        } else if interp < self.symbol_spread {
            symbol_error = interp - 0.5 * self.symbol_spread;
            self.symbol_spread += symbol_error * K_SYMBOL_SPREAD;
        } else {
            symbol_error = interp - 1.5 * self.symbol_spread;
            self.symbol_spread += symbol_error * 0.5 * K_SYMBOL_SPREAD;
        }

        if interp_p1 < interp {
            self.symbol_clock += symbol_error * K_SYMBOL_TIMING;
        } else {
            self.symbol_clock -= symbol_error * K_SYMBOL_TIMING;
        }

        self.symbol_spread = self
            .symbol_spread
            .clamp(SYMBOL_SPREAD_MIN, SYMBOL_SPREAD_MAX);

        self.coarse_freq_correction +=
            (self.fine_freq_correction - self.coarse_freq_correction) * K_COARSE_FREQUENCY;
        self.fine_freq_correction += symbol_error * K_FINE_FREQUENCY;

        Some(output)
    }
}

impl Block<f32, f32> for Fsk4Sync {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len * self.symbol_rate as usize / self.sample_rate as usize + 4
    }

    fn work(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let mut produced = 0;
        for &sample in input {
            if let Some(symbol) = self.track(sample) {
                // An unlocked loop can momentarily emit faster than the
                // nominal symbol rate; excess symbols are garbage anyway.
                if produced == output.len() {
                    break;
                }
                output[produced] = symbol;
                produced += 1;
            }
        }
        produced
    }
}
