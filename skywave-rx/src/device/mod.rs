//! Sample sources.
//!
//! An SDR front end is represented as a [`SampleSource`]: something that
//! pushes numbered complex segments at a fixed rate and center frequency
//! until told to stop. Real hardware drivers are opened by the host and
//! handed in behind this trait; the file-backed source below replays raw
//! captures deterministically.

pub mod capture;
pub mod file;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skywave_common::types::ComplexSegment;
use skywave_common::Result;

/// A producer of wideband complex segments.
///
/// `run` blocks until cancellation or an unrecoverable device error and is
/// executed on a dedicated blocking thread. Samples must be delivered
/// contiguously and in order; the receiver assigns segment numbers on
/// arrival.
pub trait SampleSource: Send + Sync {
    /// The fastest rate this source can sustain; starting above it is
    /// refused.
    fn max_sample_rate(&self) -> u32;

    /// Produce segments into `output` until `token` is cancelled.
    fn run(
        &self,
        token: CancellationToken,
        center_freq: u64,
        sample_rate: u32,
        output: mpsc::Sender<ComplexSegment>,
    ) -> Result<()>;

    /// Release the underlying device. Called after `run` has returned.
    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
