//! # Skywave Receiver (skywave-rx)
//!
//! Software-defined-radio trunked-radio receiver.
//!
//! **Purpose:** Consume a wideband I/Q stream from an SDR front end and
//! simultaneously decode trunking control channels and dynamically discovered
//! voice channels, emitting Opus-framed voice over UDP.
//!
//! **Architecture:** One DSP chain per narrowband channel, fanned out in
//! parallel per wideband segment; control symbols feed a SmartNet frame
//! assembler whose decoded words drive the discovery of new voice channels.

pub mod audio;
pub mod device;
pub mod dsp;
pub mod modem;
pub mod receiver;
pub mod talkgroups;
pub mod trunking;
