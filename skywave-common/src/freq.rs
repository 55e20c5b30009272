//! Frequency formatting and range helpers.

/// Render a frequency in Hz as a fixed-width MHz string for log fields.
pub fn mhz(freq: u64) -> String {
    format!("{:.4} MHz", freq as f64 / 1e6)
}

/// Render a signed frequency offset in Hz as MHz.
pub fn mhz_signed(freq: i64) -> String {
    format!("{:.4} MHz", freq as f64 / 1e6)
}

/// Lowest and highest of a set of frequencies.
pub fn frequency_range(freqs: &[u64]) -> Option<(u64, u64)> {
    let low = *freqs.iter().min()?;
    let high = *freqs.iter().max()?;
    Some((low, high))
}
