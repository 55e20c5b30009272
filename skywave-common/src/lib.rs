//! Shared data model for the skywave trunked-radio receiver.
//!
//! Everything that crosses a component boundary lives here: sample segments,
//! talk-group records, tagged audio, the UDP wire frame, configuration, and
//! the common error type. The receiver binary (`skywave-rx`) depends on this
//! crate; external tooling that consumes the wire format can depend on it
//! without pulling in any DSP code.

pub mod config;
pub mod error;
pub mod freq;
pub mod metrics;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
