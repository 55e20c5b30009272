//! Pipeline supervisor.
//!
//! Owns the whole receive path: the sample source, every control and voice
//! pipeline, the per-system protocol processors, the talk-group directory,
//! and the audio output pool. Each wideband segment fans out to all active
//! pipelines in parallel and the fan-out is joined before the next segment
//! is accepted, which back-pressures the source and bounds memory.
//!
//! Channel-assignment events feed back in: a grant spawns a voice pipeline
//! at the granted frequency (if the tuner window covers it), a control
//! broadcast spawns another control pipeline.

pub mod control;
pub mod voice;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skywave_common::config::{Config, Modulation, SystemConfig};
use skywave_common::freq::mhz;
use skywave_common::metrics::{MetricsSink, Point};
use skywave_common::types::{ComplexSegment, TaggedAudio};
use skywave_common::{Error, Result};

use crate::audio::AudioSink;
use crate::device::capture::CaptureWriter;
use crate::device::SampleSource;
use crate::talkgroups::SystemDirectory;
use crate::trunking::smartnet::SmartnetProcessor;
use crate::trunking::{ChannelUpdate, OswPacket};

use control::ControlPipeline;
use voice::{VoicePcm, VoicePipeline};

/// Scratch buffers are sized for this segment length class up front; larger
/// segments grow them once.
pub const EXPECTED_SEGMENT_SAMPLES: usize = 131_072;

/// Guard band kept clear at each edge of the tuner window.
const EDGE_GUARD_HZ: i64 = 25_000;

const PACKET_DEPTH: usize = 64;
const UPDATE_DEPTH: usize = 32;
const PCM_DEPTH: usize = 64;

struct SystemHandle {
    config: SystemConfig,
    packet_tx: mpsc::Sender<OswPacket>,
    packet_rx: StdMutex<Option<mpsc::Receiver<OswPacket>>>,
}

#[derive(Default)]
struct PipelineSet {
    control: Vec<Arc<ControlPipeline>>,
    voice: Vec<Arc<VoicePipeline>>,
    control_keys: HashSet<(u32, u64)>,
    voice_freqs: HashSet<u64>,
}

pub struct Receiver {
    config: Config,
    source: Arc<dyn SampleSource>,
    sinks: Vec<Arc<dyn AudioSink>>,
    metrics: Arc<dyn MetricsSink>,
    directory: Arc<SystemDirectory>,
    systems: HashMap<u32, SystemHandle>,
    pipelines: RwLock<PipelineSet>,
    token: CancellationToken,
    fatal: Arc<StdMutex<Option<Error>>>,
}

impl Receiver {
    pub fn new(
        config: Config,
        source: Arc<dyn SampleSource>,
        sinks: Vec<Arc<dyn AudioSink>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Arc<Self>> {
        let mut systems = HashMap::new();
        for sys in &config.systems {
            let (packet_tx, packet_rx) = mpsc::channel(PACKET_DEPTH);
            systems.insert(
                sys.id,
                SystemHandle {
                    config: sys.clone(),
                    packet_tx,
                    packet_rx: StdMutex::new(Some(packet_rx)),
                },
            );
        }

        Ok(Arc::new(Self {
            directory: Arc::new(SystemDirectory::new(config.frequency_timeout())),
            config,
            source,
            sinks,
            metrics,
            systems,
            pipelines: RwLock::new(PipelineSet::default()),
            token: CancellationToken::new(),
            fatal: Arc::new(StdMutex::new(None)),
        }))
    }

    /// Cancellation token governing every task the receiver spawns. Cancel
    /// it to begin a graceful shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn directory(&self) -> Arc<SystemDirectory> {
        Arc::clone(&self.directory)
    }

    fn record_fatal(&self, err: Error) {
        let mut slot = self.fatal.lock().expect("fatal slot poisoned");
        if slot.is_none() {
            *slot = Some(err);
        }
        self.token.cancel();
    }

    /// Wrap a component task: a clean exit is forgotten, an error cancels
    /// everything and is kept as the supervisor's return value.
    fn watch(&self, name: &'static str, handle: JoinHandle<Result<()>>) -> JoinHandle<()> {
        let token = self.token.clone();
        let fatal = Arc::clone(&self.fatal);
        tokio::spawn(async move {
            let failure = match handle.await {
                Ok(Ok(())) | Ok(Err(Error::Cancelled)) => None,
                Ok(Err(e)) => {
                    error!(task = name, error = %e, "component failed");
                    Some(e)
                }
                Err(e) => {
                    error!(task = name, error = %e, "component panicked");
                    Some(Error::Internal(format!("{} panicked: {}", name, e)))
                }
            };
            if let Some(err) = failure {
                let mut slot = fatal.lock().expect("fatal slot poisoned");
                if slot.is_none() {
                    *slot = Some(err);
                }
                drop(slot);
                token.cancel();
            }
        })
    }

    fn freq_within_bounds(&self, frequency: u64) -> bool {
        let half = self.config.sample_rate as i64 / 2 - EDGE_GUARD_HZ;
        let offset = frequency as i64 - self.config.center_freq as i64;
        offset.abs() <= half
    }

    fn add_control(&self, set: &mut PipelineSet, system: &SystemHandle, frequency: u64) -> Result<()> {
        let key = (system.config.id, frequency);
        if set.control_keys.contains(&key) {
            return Ok(());
        }
        let pipeline = ControlPipeline::new(
            &self.config,
            &system.config,
            frequency,
            system.packet_tx.clone(),
        )?;
        set.control.push(Arc::new(pipeline));
        set.control_keys.insert(key);
        Ok(())
    }

    async fn spawn_control(&self, system_id: u32, frequency: u64) -> Result<()> {
        if !self.freq_within_bounds(frequency) {
            debug!(frequency = %mhz(frequency), "control frequency out of band");
            self.metrics.record(
                Point::new("channel.rejected")
                    .tag("channel_type", "control")
                    .field("out_of_band", 1),
            );
            return Ok(());
        }
        let Some(system) = self.systems.get(&system_id) else {
            return Err(Error::Internal(format!("unknown system {}", system_id)));
        };
        let mut set = self.pipelines.write().await;
        if !set.control_keys.contains(&(system_id, frequency)) {
            debug!(frequency = %mhz(frequency), "new control frequency");
            self.add_control(&mut set, system, frequency)?;
        }
        Ok(())
    }

    async fn spawn_voice(&self, system_id: u32, frequency: u64) -> Result<()> {
        if !self.freq_within_bounds(frequency) {
            debug!(frequency = %mhz(frequency), "voice frequency out of band");
            self.metrics.record(
                Point::new("channel.rejected")
                    .tag("channel_type", "voice")
                    .field("out_of_band", 1),
            );
            return Ok(());
        }
        let Some(system) = self.systems.get(&system_id) else {
            return Err(Error::Internal(format!("unknown system {}", system_id)));
        };
        let mut set = self.pipelines.write().await;
        if !set.voice_freqs.contains(&frequency) {
            let pipeline = VoicePipeline::new(&self.config, &system.config, frequency)?;
            set.voice.push(Arc::new(pipeline));
            set.voice_freqs.insert(frequency);
        }
        Ok(())
    }

    /// Number of active (control, voice) pipelines; test and introspection
    /// hook.
    pub async fn pipeline_counts(&self) -> (usize, usize) {
        let set = self.pipelines.read().await;
        (set.control.len(), set.voice.len())
    }

    /// Apply channel-assignment events from the protocol processors.
    async fn update_loop(self: Arc<Self>, mut updates: mpsc::Receiver<ChannelUpdate>) -> Result<()> {
        loop {
            let update = tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                update = updates.recv() => update,
            };
            let Some(update) = update else { return Ok(()) };

            if update.is_voice_grant() {
                self.directory.table(update.system_id).update(
                    update.tgid,
                    update.source_id,
                    update.frequency,
                );
                self.spawn_voice(update.system_id, update.frequency).await?;
            } else {
                self.spawn_control(update.system_id, update.frequency).await?;
            }
        }
    }

    /// One worker of the audio output pool: tag PCM with its talk group and
    /// offer it to every sink without blocking.
    async fn output_loop(
        self: Arc<Self>,
        pcm: Arc<Mutex<mpsc::Receiver<VoicePcm>>>,
    ) -> Result<()> {
        loop {
            let item = {
                let mut rx = pcm.lock().await;
                // Biased toward the channel so PCM already queued still
                // reaches the sinks during shutdown.
                tokio::select! {
                    biased;
                    item = rx.recv() => item,
                    _ = self.token.cancelled() => return Ok(()),
                }
            };
            let Some(pcm) = item else { return Ok(()) };

            let table = self.directory.table(pcm.system_id);
            let Some(talk_group) = table.lookup_by_frequency(pcm.frequency) else {
                continue;
            };
            if talk_group.id == 0 {
                continue;
            }

            let samples = pcm.audio.samples.len();
            let tagged = TaggedAudio {
                talk_group,
                frequency: pcm.frequency,
                audio: Arc::new(pcm.audio),
            };

            let mut skipped = 0i64;
            for sink in &self.sinks {
                if sink.sender().try_send(tagged.clone()).is_err() {
                    skipped += 1;
                }
            }

            self.metrics.record(
                Point::new("voice.output")
                    .tag("frequency", mhz(tagged.frequency))
                    .field("samples_written", samples as i64)
                    .field("skipped_outputs", skipped),
            );
        }
    }

    /// The main dispatch loop: number each segment, mirror it to the capture
    /// file, fan it out to every snapshotted pipeline, and join the fan-out
    /// before accepting the next segment.
    async fn segment_loop(
        &self,
        mut raw: mpsc::Receiver<ComplexSegment>,
        pcm_tx: mpsc::Sender<VoicePcm>,
        mut capture: Option<CaptureWriter>,
    ) -> Result<()> {
        let mut segment_number = 0u64;

        loop {
            let mut segment = tokio::select! {
                _ = self.token.cancelled() => break,
                segment = raw.recv() => match segment {
                    Some(segment) => segment,
                    None => break,
                },
            };

            segment_number += 1;
            segment.segment_number = segment_number;

            if let Some(writer) = capture.as_mut() {
                writer.write_segment(&segment)?;
            }

            let segment = Arc::new(segment);
            let (controls, voices) = {
                let set = self.pipelines.read().await;
                (set.control.clone(), set.voice.clone())
            };

            let mut fan_out = JoinSet::new();

            for pipeline in controls {
                let segment = Arc::clone(&segment);
                let metrics = Arc::clone(&self.metrics);
                fan_out.spawn(async move {
                    tokio::task::spawn_blocking(move || pipeline.process(&segment, &*metrics))
                        .await
                        .map_err(|e| Error::Internal(format!("control pass: {}", e)))
                });
            }

            for pipeline in voices {
                let segment = Arc::clone(&segment);
                let metrics = Arc::clone(&self.metrics);
                let pcm_tx = pcm_tx.clone();
                let token = self.token.clone();
                fan_out.spawn(async move {
                    let audio =
                        tokio::task::spawn_blocking(move || pipeline.process(&segment, &*metrics))
                            .await
                            .map_err(|e| Error::Internal(format!("voice pass: {}", e)))?;
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = pcm_tx.send(audio) => {}
                    }
                    Ok(())
                });
            }

            while let Some(joined) = fan_out.join_next().await {
                joined.map_err(|e| Error::Internal(format!("fan-out: {}", e)))??;
            }
        }

        if let Some(mut writer) = capture {
            writer.flush()?;
        }
        Ok(())
    }

    /// Run the receiver until cancellation or a fatal error.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if self.config.sample_rate > self.source.max_sample_rate() {
            return Err(Error::ConfigRejected(format!(
                "sample rate {} exceeds device maximum {}",
                self.config.sample_rate,
                self.source.max_sample_rate()
            )));
        }

        let (raw_tx, raw_rx) = mpsc::channel::<ComplexSegment>(1);
        let (update_tx, update_rx) = mpsc::channel::<ChannelUpdate>(UPDATE_DEPTH);
        let (pcm_tx, pcm_rx) = mpsc::channel::<VoicePcm>(PCM_DEPTH);

        let mut watchers = Vec::new();

        // Protocol processors, one task per system
        for handle in self.systems.values() {
            let packet_rx = handle
                .packet_rx
                .lock()
                .expect("packet channel lock poisoned")
                .take()
                .ok_or_else(|| Error::Internal("receiver started twice".into()))?;
            let task = match handle.config.modulation {
                Modulation::Smartnet => {
                    let processor = SmartnetProcessor::new(
                        handle.config.id,
                        packet_rx,
                        update_tx.clone(),
                        Arc::clone(&self.metrics),
                    );
                    tokio::spawn(processor.run(self.token.clone()))
                }
            };
            watchers.push(self.watch("protocol_processor", task));
        }

        // Initial control pipelines from configuration
        {
            let mut set = self.pipelines.write().await;
            for handle in self.systems.values() {
                for &frequency in &handle.config.control_freqs {
                    self.add_control(&mut set, handle, frequency)?;
                }
            }
        }

        // Channel-assignment handling
        watchers.push(self.watch(
            "channel_updates",
            tokio::spawn(Arc::clone(&self).update_loop(update_rx)),
        ));

        // Audio output pool
        let shared_pcm = Arc::new(Mutex::new(pcm_rx));
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        for _ in 0..workers {
            watchers.push(self.watch(
                "audio_output",
                tokio::spawn(Arc::clone(&self).output_loop(Arc::clone(&shared_pcm))),
            ));
        }

        // Audio sinks
        for sink in &self.sinks {
            watchers.push(self.watch("audio_sink", sink.start(self.token.clone())));
        }

        // Sample source on its own blocking thread
        {
            let source = Arc::clone(&self.source);
            let token = self.token.clone();
            let center_freq = self.config.center_freq;
            let sample_rate = self.config.sample_rate;
            let task = tokio::spawn(async move {
                let run_source = Arc::clone(&source);
                tokio::task::spawn_blocking(move || {
                    run_source.run(token, center_freq, sample_rate, raw_tx)
                })
                .await
                .map_err(|e| Error::Internal(format!("sample source: {}", e)))??;
                source.stop()
            });
            watchers.push(self.watch("sample_source", task));
        }

        let capture = match &self.config.record_path {
            Some(path) => Some(CaptureWriter::create(path)?),
            None => None,
        };

        info!(
            center_freq = %mhz(self.config.center_freq),
            sample_rate = self.config.sample_rate,
            systems = self.systems.len(),
            "receiver starting"
        );

        let loop_result = self.segment_loop(raw_rx, pcm_tx, capture).await;
        self.token.cancel();
        if let Err(e) = loop_result {
            self.record_fatal(e);
        }

        for watcher in watchers {
            if let Err(e) = watcher.await {
                warn!(error = %e, "watcher join failed");
            }
        }

        match self.fatal.lock().expect("fatal slot poisoned").take() {
            Some(err) => Err(err),
            None => {
                info!("receiver stopped");
                Ok(())
            }
        }
    }
}
