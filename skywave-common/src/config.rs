//! Configuration loading
//!
//! The receiver is configured by a single TOML document naming the tuner
//! window, the device, the trunked systems to follow, and the output and
//! metrics destinations. Validation happens at load time; anything the
//! receiver cannot act on is rejected before a pipeline is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level receiver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tuner center frequency in Hz
    pub center_freq: u64,

    /// Wideband sample rate in samples/sec
    pub sample_rate: u32,

    /// PCM rate of decoded voice handed to audio outputs
    pub voice_output_rate: u32,

    /// Which sample source to open
    pub device: DeviceConfig,

    /// Trunked systems to follow
    pub systems: Vec<SystemConfig>,

    /// UDP destinations for encoded voice frames
    #[serde(default)]
    pub output_destinations: Vec<OutputDestination>,

    /// Spectrogram viewer; parsed and reserved for the external viewer
    pub viz_server: Option<VizServerConfig>,

    /// Metrics destination; metrics are dropped when absent
    pub metrics: Option<MetricsConfig>,

    /// Talk-group freshness window in seconds
    #[serde(default = "default_frequency_timeout_secs")]
    pub frequency_timeout_secs: u64,

    /// Raw wideband capture destination
    pub record_path: Option<PathBuf>,

    /// Raw wideband capture to replay instead of a live device
    pub playback_path: Option<PathBuf>,
}

fn default_frequency_timeout_secs() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device kind: "file" is built in; anything else must be registered by
    /// the host before start
    pub kind: String,

    /// Device index for multi-device hosts
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub id: u32,
    pub name: String,

    /// Initial control-channel frequencies in Hz
    pub control_freqs: Vec<u64>,

    /// Modulation family of the trunking control channel
    pub modulation: Modulation,

    /// Control-channel symbol rate in symbols/sec
    pub symbol_rate: u32,

    /// Voice channel bandwidth in Hz
    pub voice_bandwidth: u32,

    /// Squelch threshold in dB for voice channels
    pub squelch_db: f32,
}

/// Supported trunking families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    Smartnet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputDestination {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VizServerConfig {
    pub port: u16,
    #[serde(default = "default_viz_update_ms")]
    pub update_interval_ms: u64,
}

fn default_viz_update_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub organization: String,
    pub bucket: String,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigRejected(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse and validate a TOML configuration document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::ConfigRejected(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.center_freq == 0 || self.sample_rate == 0 || self.voice_output_rate == 0 {
            return Err(Error::ConfigRejected(
                "center_freq, sample_rate, and voice_output_rate must all be nonzero".into(),
            ));
        }
        if self.systems.is_empty() {
            return Err(Error::ConfigRejected("at least one system is required".into()));
        }
        for sys in &self.systems {
            if sys.id == 0 {
                return Err(Error::ConfigRejected(format!(
                    "system {:?} must have a nonzero id",
                    sys.name
                )));
            }
            if sys.control_freqs.is_empty() {
                return Err(Error::ConfigRejected(format!(
                    "system {:?} has no control frequencies",
                    sys.name
                )));
            }
            if sys.symbol_rate == 0 {
                return Err(Error::ConfigRejected(format!(
                    "system {:?} must have a nonzero symbol rate",
                    sys.name
                )));
            }
        }
        if self.device.kind.is_empty() {
            return Err(Error::ConfigRejected("device.kind must be set".into()));
        }
        Ok(())
    }

    /// Talk-group freshness window.
    pub fn frequency_timeout(&self) -> Duration {
        Duration::from_secs(self.frequency_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        center_freq = 852500000
        sample_rate = 8000000
        voice_output_rate = 8000

        [device]
        kind = "file"

        [[systems]]
        id = 1400
        name = "metro"
        control_freqs = [851012500, 851037500]
        modulation = "smartnet"
        symbol_rate = 3600
        voice_bandwidth = 12500
        squelch_db = -50.0

        [[output_destinations]]
        host = "127.0.0.1"
        port = 50100

        [metrics]
        host = "http://localhost:8086"
        organization = "skywave"
        bucket = "rx"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(EXAMPLE).unwrap();
        assert_eq!(config.center_freq, 852_500_000);
        assert_eq!(config.systems.len(), 1);
        assert_eq!(config.systems[0].modulation, Modulation::Smartnet);
        assert_eq!(config.systems[0].control_freqs.len(), 2);
        assert_eq!(config.output_destinations[0].port, 50100);
        assert_eq!(config.frequency_timeout(), Duration::from_secs(3));
        assert!(config.viz_server.is_none());
    }

    #[test]
    fn test_reject_missing_systems() {
        let doc = r#"
            center_freq = 852500000
            sample_rate = 8000000
            voice_output_rate = 8000
            systems = []

            [device]
            kind = "file"
        "#;
        let err = Config::parse(doc).unwrap_err();
        assert!(matches!(err, Error::ConfigRejected(_)));
    }

    #[test]
    fn test_reject_unknown_modulation() {
        let doc = EXAMPLE.replace("smartnet", "p25");
        assert!(matches!(
            Config::parse(&doc),
            Err(Error::ConfigRejected(_))
        ));
    }

    #[test]
    fn test_reject_zero_rate() {
        let doc = EXAMPLE.replace("sample_rate = 8000000", "sample_rate = 0");
        assert!(matches!(
            Config::parse(&doc),
            Err(Error::ConfigRejected(_))
        ));
    }
}
