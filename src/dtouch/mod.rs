//! # dTouch Protocol Module
//!
//! Implementation of the dTouch kiln controller serial protocol.
//!
//! This module handles:
//! - Request framing and CRC-16/MODBUS checksums
//! - Streaming, resynchronizing response parsing
//! - Command round-robin and response correlation
//! - Payload decoding into temperature, MC, EMC and actuator readings

pub mod protocol;
pub mod crc;
pub mod encoder;
pub mod decoder;
pub mod receiver;
pub mod sequencer;
pub(crate) mod queue;
pub mod clock;
pub mod engine;

pub use engine::{DtouchEngine, EngineSettings, FrameOutcome};
