//! Metrics reporting
//!
//! Components never block on metrics: `record` is try-send into a bounded
//! queue drained by a background task that batches points into InfluxDB line
//! protocol and POSTs them. With no metrics host configured, the no-op sink
//! swallows everything.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::MetricsConfig;

/// A single measurement: name, tags, integer fields.
#[derive(Debug, Clone)]
pub struct Point {
    pub name: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(String, i64)>,
}

impl Point {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: i64) {
        self.fields.push((key.into(), value));
    }

    pub fn increment(&mut self, key: &str) {
        if let Some(entry) = self.fields.iter_mut().find(|(k, _)| k == key) {
            entry.1 += 1;
        } else {
            self.fields.push((key.to_string(), 1));
        }
    }

    /// Render as one line of InfluxDB line protocol.
    fn to_line(&self, timestamp_ns: u128) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        let mut line = String::from(self.name);
        for (k, v) in &self.tags {
            let _ = write!(line, ",{}={}", k, v.replace(' ', "\\ "));
        }
        line.push(' ');
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let _ = write!(line, "{}={}i", k, v);
        }
        let _ = write!(line, " {}", timestamp_ns);
        Some(line)
    }
}

/// Non-blocking sink for measurement points.
pub trait MetricsSink: Send + Sync {
    fn record(&self, point: Point);
}

/// Sink used when no metrics host is configured, and in tests.
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _point: Point) {}
}

/// Buffered InfluxDB sink. Points are dropped, never waited on, when the
/// queue is full.
pub struct InfluxSink {
    tx: mpsc::Sender<Point>,
}

const QUEUE_DEPTH: usize = 4096;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_LIMIT: usize = 500;

impl InfluxSink {
    /// Create the sink and spawn its background writer. The writer exits when
    /// the sink (and every clone of its sender) is dropped.
    pub fn spawn(config: &MetricsConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            config.host.trim_end_matches('/'),
            config.organization,
            config.bucket
        );
        tokio::spawn(write_loop(rx, url));
        Arc::new(Self { tx })
    }
}

impl MetricsSink for InfluxSink {
    fn record(&self, point: Point) {
        // Full queue means the write loop is behind; freshness wins.
        let _ = self.tx.try_send(point);
    }
}

async fn write_loop(mut rx: mpsc::Receiver<Point>, url: String) {
    let client = reqwest::Client::new();
    let mut batch: Vec<String> = Vec::with_capacity(BATCH_LIMIT);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            maybe_point = rx.recv() => {
                match maybe_point {
                    Some(point) => {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_nanos();
                        if let Some(line) = point.to_line(now) {
                            batch.push(line);
                        }
                        if batch.len() >= BATCH_LIMIT {
                            flush(&client, &url, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&client, &url, &mut batch).await;
                        debug!("metrics writer shutting down");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&client, &url, &mut batch).await;
            }
        }
    }
}

async fn flush(client: &reqwest::Client, url: &str, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let body = batch.join("\n");
    batch.clear();
    if let Err(e) = client.post(url).body(body).send().await {
        warn!(error = %e, "metrics write failed");
    }
}
