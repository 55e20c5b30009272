//! Binary slicer.

use crate::dsp::Block;

/// Maps each real sample to a 0/1 symbol byte by sign.
///
/// The invert flag flips the mapping; the upstream demodulator has had
/// historical sign inversions, so polarity stays configurable.
pub struct BinarySlicer {
    invert: bool,
}

impl BinarySlicer {
    pub fn new(invert: bool) -> Self {
        Self { invert }
    }
}

fn slice(value: f32, invert: bool) -> u8 {
    let bit = (value >= 0.0) as u8;
    if invert {
        bit ^ 1
    } else {
        bit
    }
}

impl Block<f32, u8> for BinarySlicer {
    fn predict_output_size(&self, input_len: usize) -> usize {
        input_len
    }

    fn work(&mut self, input: &[f32], output: &mut [u8]) -> usize {
        for (i, &x) in input.iter().enumerate() {
            output[i] = slice(x, self.invert);
        }
        input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_mapping() {
        let mut s = BinarySlicer::new(false);
        let mut out = [9u8; 4];
        s.work(&[1.5, -0.1, 0.0, -2.0], &mut out);
        assert_eq!(out, [1, 0, 1, 0]);
    }

    #[test]
    fn test_invert_flips_every_symbol() {
        let input = [0.7f32, -0.7, 0.0, 3.0, -0.001];
        let mut plain = [0u8; 5];
        let mut inverted = [0u8; 5];
        BinarySlicer::new(false).work(&input, &mut plain);
        BinarySlicer::new(true).work(&input, &mut inverted);
        for (p, i) in plain.iter().zip(&inverted) {
            assert_eq!(p ^ 1, *i);
        }
    }
}
