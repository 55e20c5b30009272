//! File-backed sample source.
//!
//! Replays a raw capture (interleaved signed 8-bit I/Q) in fixed-size chunks,
//! pacing reads so the delivered rate matches the configured sample rate.
//! Replay is deterministic: same file, same segments.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use skywave_common::types::{ComplexSegment, RawSegment};
use skywave_common::{Error, Result};

use super::SampleSource;

/// Bytes per read: 128 Ki samples.
pub const CHUNK_BYTES: usize = 262_144;

pub struct FileSource {
    path: PathBuf,
    chunk_bytes: usize,
}

impl FileSource {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Device(format!(
                "playback file {} does not exist",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            chunk_bytes: CHUNK_BYTES,
        })
    }

    /// Smaller chunks for tests.
    #[cfg(test)]
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }
}

impl SampleSource for FileSource {
    fn max_sample_rate(&self) -> u32 {
        20_000_000
    }

    fn run(
        &self,
        token: CancellationToken,
        center_freq: u64,
        sample_rate: u32,
        output: mpsc::Sender<ComplexSegment>,
    ) -> Result<()> {
        let mut file = File::open(&self.path)?;
        // One chunk holds chunk_bytes/2 samples; sleeping this long between
        // reads reproduces the configured rate.
        let pacing = Duration::from_micros(
            (self.chunk_bytes as u64 / 2) * 1_000_000 / sample_rate as u64,
        );
        info!(
            path = %self.path.display(),
            chunk_bytes = self.chunk_bytes,
            pacing_us = pacing.as_micros() as u64,
            "file source started"
        );

        let mut chunk = vec![0u8; self.chunk_bytes];
        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let n = file.read(&mut chunk)?;
            if n == 0 {
                info!(path = %self.path.display(), "playback file exhausted");
                return Ok(());
            }

            let segment = RawSegment {
                sample_rate,
                center_freq,
                data: chunk[..n].to_vec(),
            }
            .to_complex();

            if output.blocking_send(segment).is_err() {
                // Receiver went away; shutdown is in progress.
                return Ok(());
            }

            std::thread::sleep(pacing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_capture(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_missing_file_is_device_error() {
        assert!(matches!(
            FileSource::new(Path::new("/nonexistent/capture.cs8")),
            Err(Error::Device(_))
        ));
    }

    #[test]
    fn test_replay_is_chunked_and_ordered() {
        // 6 samples split into 2-sample chunks
        let f = write_capture(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let source = FileSource::new(f.path()).unwrap().with_chunk_bytes(4);

        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        source.run(token, 851_000_000, 1_000_000, tx).unwrap();

        let mut segments = Vec::new();
        while let Ok(seg) = rx.try_recv() {
            segments.push(seg);
        }
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.samples.len() == 2));
        assert_eq!(segments[0].center_freq, 851_000_000);
        assert_eq!(segments[0].sample_rate, 1_000_000);
        // First sample of the second chunk is byte pair (5, 6)
        assert!((segments[1].samples[0].re - 5.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_cancellation_stops_replay() {
        let f = write_capture(&vec![0u8; 4096]);
        let source = FileSource::new(f.path()).unwrap().with_chunk_bytes(2);

        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();
        // Already-cancelled token returns immediately instead of replaying
        // 1024 paced chunks.
        source.run(token, 0, 1_000_000, tx).unwrap();
    }
}
