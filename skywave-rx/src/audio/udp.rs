//! UDP stream output.
//!
//! Tagged PCM fans into one Opus encoder task per (system, talk group); the
//! encoded frames are length-prefixed and sent as datagrams to every
//! configured destination.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skywave_common::config::OutputDestination;
use skywave_common::metrics::{MetricsSink, Point};
use skywave_common::types::TaggedAudio;
use skywave_common::wire::OpusFrame;
use skywave_common::{Error, Result};

use super::opus::TalkgroupEncoder;
use super::AudioSink;

const INPUT_DEPTH: usize = 8;
const ENCODER_DEPTH: usize = 4;
const FRAME_DEPTH: usize = 64;

pub struct UdpOpusOutput {
    destinations: Vec<OutputDestination>,
    sample_rate: u32,
    metrics: Arc<dyn MetricsSink>,
    input_tx: mpsc::Sender<TaggedAudio>,
    input_rx: std::sync::Mutex<Option<mpsc::Receiver<TaggedAudio>>>,
}

impl UdpOpusOutput {
    pub fn new(
        destinations: Vec<OutputDestination>,
        sample_rate: u32,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_DEPTH);
        Self {
            destinations,
            sample_rate,
            metrics,
            input_tx,
            input_rx: std::sync::Mutex::new(Some(input_rx)),
        }
    }
}

impl AudioSink for UdpOpusOutput {
    fn sender(&self) -> mpsc::Sender<TaggedAudio> {
        self.input_tx.clone()
    }

    fn start(&self, token: CancellationToken) -> JoinHandle<Result<()>> {
        let input_rx = self
            .input_rx
            .lock()
            .expect("udp output lock poisoned")
            .take();
        let destinations = self.destinations.clone();
        let sample_rate = self.sample_rate;
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let Some(input_rx) = input_rx else {
                return Err(Error::Internal("udp output started twice".into()));
            };
            run_output(input_rx, destinations, sample_rate, metrics, token).await
        })
    }
}

async fn resolve_destinations(destinations: &[OutputDestination]) -> Result<Vec<SocketAddr>> {
    let mut addrs = Vec::with_capacity(destinations.len());
    for dest in destinations {
        let mut resolved = lookup_host((dest.host.as_str(), dest.port))
            .await
            .map_err(|e| Error::Device(format!("resolving {}: {}", dest.host, e)))?;
        let addr = resolved
            .next()
            .ok_or_else(|| Error::Device(format!("no addresses for {}", dest.host)))?;
        info!(dest = %addr, "stream output starting");
        addrs.push(addr);
    }
    Ok(addrs)
}

async fn run_output(
    mut input_rx: mpsc::Receiver<TaggedAudio>,
    destinations: Vec<OutputDestination>,
    sample_rate: u32,
    metrics: Arc<dyn MetricsSink>,
    token: CancellationToken,
) -> Result<()> {
    let addrs = resolve_destinations(&destinations).await?;
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::Device(format!("binding UDP socket: {}", e)))?;

    let (frame_tx, frame_rx) = mpsc::channel::<OpusFrame>(FRAME_DEPTH);

    let writer = tokio::spawn(write_frames(
        frame_rx,
        socket,
        addrs,
        Arc::clone(&metrics),
        token.clone(),
    ));

    // One encoder task per (system, talk group), created on first audio
    let mut encoders: HashMap<(u32, u16), mpsc::Sender<TaggedAudio>> = HashMap::new();
    let mut encoder_tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            audio = input_rx.recv() => {
                let Some(audio) = audio else { break };
                let key = (audio.talk_group.system_id, audio.talk_group.id);

                if !encoders.contains_key(&key) {
                    let (tx, rx) = mpsc::channel(ENCODER_DEPTH);
                    let encoder = TalkgroupEncoder::new(sample_rate, frame_tx.clone())?;
                    encoder_tasks.spawn(encoder.run(rx, token.clone()));
                    debug!(system_id = key.0, tgid = key.1, "new talk-group encoder");
                    encoders.insert(key, tx);
                }

                let tx = encoders.get(&key).expect("just ensured").clone();
                if tx.send(audio).await.is_err() {
                    warn!(system_id = key.0, tgid = key.1, "encoder task gone");
                    encoders.remove(&key);
                }
            }
        }
    }

    // Let encoders flush their tails, then the writer drain the channel.
    drop(encoders);
    while encoder_tasks.join_next().await.is_some() {}
    drop(frame_tx);
    writer.await.map_err(|e| Error::Internal(e.to_string()))??;
    Ok(())
}

async fn write_frames(
    mut frame_rx: mpsc::Receiver<OpusFrame>,
    socket: UdpSocket,
    addrs: Vec<SocketAddr>,
    metrics: Arc<dyn MetricsSink>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            frame = frame_rx.recv() => frame,
            _ = token.cancelled() => {
                // Emit whatever the encoders already produced before exiting
                match frame_rx.try_recv() {
                    Ok(frame) => Some(frame),
                    Err(_) => None,
                }
            }
        };
        let Some(frame) = frame else { return Ok(()) };

        let datagram = match frame.to_datagram() {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(error = %e, "frame serialization failed");
                continue;
            }
        };

        let mut sent = 0i64;
        for addr in &addrs {
            match socket.send_to(&datagram, addr).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(dest = %addr, error = %e, "datagram send failed"),
            }
        }

        metrics.record(
            Point::new("opus.sent_frame")
                .tag("channel_type", "voice")
                .tag("system_id", frame.system_id.to_string())
                .tag("tgid", frame.tgid.to_string())
                .field("frame_length", frame.payload.len() as i64)
                .field("encoded_length", datagram.len() as i64)
                .field("sent", sent)
                .field("dropped", (addrs.len() as i64) - sent),
        );
    }
}
