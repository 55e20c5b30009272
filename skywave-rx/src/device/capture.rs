//! Raw wideband capture.
//!
//! Appends every segment back out as interleaved signed 8-bit I/Q, the same
//! format the front end delivered, so a capture can be replayed through
//! [`super::file::FileSource`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use skywave_common::types::ComplexSegment;
use skywave_common::Result;

pub struct CaptureWriter {
    writer: BufWriter<File>,
}

impl CaptureWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_segment(&mut self, segment: &ComplexSegment) -> Result<()> {
        self.writer.write_all(&segment.to_cs8())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file::FileSource;
    use crate::device::SampleSource;
    use num_complex::Complex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_capture_replays_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.cs8");

        let original = ComplexSegment {
            segment_number: 1,
            sample_rate: 1_000_000,
            center_freq: 851_000_000,
            samples: vec![
                Complex::new(0.5, -0.5),
                Complex::new(-1.0, 1.0),
                Complex::new(0.0, 0.25),
            ],
        };

        let mut capture = CaptureWriter::create(&path).unwrap();
        capture.write_segment(&original).unwrap();
        capture.flush().unwrap();
        drop(capture);

        let source = FileSource::new(&path).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        source
            .run(CancellationToken::new(), 851_000_000, 1_000_000, tx)
            .unwrap();

        let replayed = rx.try_recv().unwrap();
        assert_eq!(replayed.samples.len(), original.samples.len());
        for (a, b) in replayed.samples.iter().zip(&original.samples) {
            assert!((a.re - b.re).abs() < 1.0 / 127.0);
            assert!((a.im - b.im).abs() < 1.0 / 127.0);
        }
    }
}
