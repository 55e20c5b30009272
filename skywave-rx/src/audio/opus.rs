//! Per-talk-group Opus framing.
//!
//! Each active (system, talk group) pair gets its own encoder task. PCM
//! accumulates until a full 40 ms frame is available; when a conversation
//! pauses, the tail is flushed as the largest fragment libopus accepts
//! (20, 10, 5, or 2.5 ms). Anything shorter than the smallest fragment is
//! discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use skywave_common::types::{TaggedAudio, TalkGroup};
use skywave_common::wire::{timestamp_now_us, OpusFrame};
use skywave_common::{Error, Result};

/// Target frame duration.
pub const US_PER_FRAME: u64 = 40_000;

/// Fragment durations accepted by the codec, ascending.
const VALID_FRAGMENT_US: [u64; 4] = [2_500, 5_000, 10_000, 20_000];

pub struct TalkgroupEncoder {
    sample_rate: u32,
    encoder: ::opus::Encoder,
    pcm: Vec<f32>,
    last_tg: Option<TalkGroup>,
    frequency: u64,
    packet_buf: Vec<u8>,
    output: mpsc::Sender<OpusFrame>,
}

impl TalkgroupEncoder {
    pub fn new(sample_rate: u32, output: mpsc::Sender<OpusFrame>) -> Result<Self> {
        let mut encoder = ::opus::Encoder::new(
            sample_rate,
            ::opus::Channels::Mono,
            ::opus::Application::Voip,
        )
        .map_err(|e| Error::Internal(format!("opus encoder: {}", e)))?;
        encoder
            .set_bitrate(::opus::Bitrate::Auto)
            .map_err(|e| Error::Internal(format!("opus bitrate: {}", e)))?;

        Ok(Self {
            sample_rate,
            encoder,
            pcm: Vec::new(),
            last_tg: None,
            frequency: 0,
            packet_buf: vec![0u8; 4096],
            output,
        })
    }

    fn samples_for(&self, duration_us: u64) -> usize {
        (self.sample_rate as u64 * duration_us / 1_000_000) as usize
    }

    fn push(&mut self, audio: TaggedAudio) {
        self.pcm.extend_from_slice(&audio.audio.samples);
        self.frequency = audio.frequency;
        self.last_tg = Some(audio.talk_group);
    }

    /// Encode and emit one frame if enough PCM is pending. With `force`, a
    /// shorter tail fragment is emitted instead (or discarded if even the
    /// smallest fragment does not fit).
    async fn maybe_flush(&mut self, force: bool) -> Result<()> {
        let mut frame_samples = self.samples_for(US_PER_FRAME);

        if self.pcm.len() <= frame_samples {
            if !force || self.pcm.is_empty() {
                return Ok(());
            }
            let Some(&fragment_us) = VALID_FRAGMENT_US
                .iter()
                .rev()
                .find(|&&us| self.samples_for(us) < self.pcm.len())
            else {
                // Too short for any fragment
                self.pcm.clear();
                return Ok(());
            };
            frame_samples = self.samples_for(fragment_us);
        }

        let Some(tg) = self.last_tg.clone() else {
            self.pcm.clear();
            return Ok(());
        };

        let encoded = self
            .encoder
            .encode_float(&self.pcm[..frame_samples], &mut self.packet_buf)
            .map_err(|e| Error::Internal(format!("opus encode: {}", e)))?;

        self.pcm.drain(..frame_samples);

        let frame = OpusFrame {
            payload: self.packet_buf[..encoded].to_vec(),
            system_id: tg.system_id,
            tgid: tg.id,
            source_id: tg.source_id,
            frequency: self.frequency,
            sample_length_us: (frame_samples as u64 * 1_000_000 / self.sample_rate as u64) as u32,
            timestamp_us: timestamp_now_us(),
        };

        if self.output.send(frame).await.is_err() {
            debug!("opus frame channel closed");
        }
        Ok(())
    }

    /// Run until cancelled or the input closes; tail fragments flush after
    /// one and a half frame periods of silence.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<TaggedAudio>,
        token: CancellationToken,
    ) -> Result<()> {
        let idle = Duration::from_micros(US_PER_FRAME * 3 / 2);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.maybe_flush(true).await?;
                    return Ok(());
                }
                _ = tokio::time::sleep(idle) => {
                    self.maybe_flush(true).await?;
                }
                audio = input.recv() => {
                    let Some(audio) = audio else {
                        self.maybe_flush(true).await?;
                        return Ok(());
                    };
                    self.push(audio);
                    self.maybe_flush(false).await?;
                }
            }
        }
    }
}
