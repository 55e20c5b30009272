//! # Skywave Receiver (skywave-rx)
//!
//! SDR trunked-radio receiver daemon. Opens the configured sample source,
//! follows the configured trunked systems, and streams Opus-framed voice to
//! the configured UDP destinations until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skywave_common::config::Config;
use skywave_common::metrics::{InfluxSink, MetricsSink, NullSink};
use skywave_common::Error;
use skywave_rx::audio::udp::UdpOpusOutput;
use skywave_rx::audio::AudioSink;
use skywave_rx::device::file::FileSource;
use skywave_rx::device::SampleSource;
use skywave_rx::receiver::Receiver;

#[derive(Parser, Debug)]
#[command(name = "skywave-rx")]
#[command(about = "Skywave Receiver - SDR trunked-radio receiver")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "skywave.toml")]
    config: PathBuf,
}

fn open_source(config: &Config) -> Result<Arc<dyn SampleSource>> {
    // A configured playback path always wins; it is how captures are
    // replayed regardless of the device the capture came from.
    if let Some(playback) = &config.playback_path {
        info!(path = %playback.display(), "initializing file source");
        return Ok(Arc::new(FileSource::new(playback)?));
    }

    match config.device.kind.as_str() {
        "file" => Err(Error::ConfigRejected(
            "device.kind = \"file\" requires playback_path".into(),
        )
        .into()),
        other => Err(Error::ConfigRejected(format!(
            "unrecognized device kind {:?}; hardware sources are opened by the host",
            other
        ))
        .into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skywave_rx=info,skywave_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "starting skywave receiver");

    let config = Config::load(&args.config)?;

    let metrics: Arc<dyn MetricsSink> = match &config.metrics {
        Some(metrics_config) => {
            info!(host = %metrics_config.host, bucket = %metrics_config.bucket, "metrics enabled");
            InfluxSink::spawn(metrics_config)
        }
        None => Arc::new(NullSink),
    };

    let source = open_source(&config)?;

    let mut sinks: Vec<Arc<dyn AudioSink>> = Vec::new();
    if !config.output_destinations.is_empty() {
        sinks.push(Arc::new(UdpOpusOutput::new(
            config.output_destinations.clone(),
            config.voice_output_rate,
            Arc::clone(&metrics),
        )));
    }

    let receiver = Receiver::new(config, source, sinks, metrics)?;
    let token = receiver.token();

    // SIGINT/SIGTERM begin a graceful shutdown: the source stops first, each
    // pipeline drains its in-flight segment, sinks flush last.
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown requested");
        token.cancel();
    });

    match receiver.run().await {
        Ok(()) => {
            info!("exited cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "receiver failed");
            Err(e.into())
        }
    }
}
