//! Audio outputs.
//!
//! The supervisor offers tagged PCM to every sink with a non-blocking
//! try-send; a sink that cannot keep up loses frames, never stalls the DSP.

pub mod opus;
pub mod udp;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skywave_common::types::TaggedAudio;
use skywave_common::Result;

/// A consumer of tagged voice PCM.
pub trait AudioSink: Send + Sync {
    /// Channel the supervisor offers tagged audio into.
    fn sender(&self) -> mpsc::Sender<TaggedAudio>;

    /// Start the sink's worker tasks. The sink drains buffered audio before
    /// exiting on cancellation.
    fn start(&self, token: CancellationToken) -> JoinHandle<Result<()>>;
}
