//! # dTouch Link Library
//!
//! Read kiln telemetry from a dTouch wood-drying controller over a serial link.
//!
//! This library provides the protocol engine (framing, streaming receive,
//! CRC-16/MODBUS, command sequencing and payload decoding) together with a
//! serial transport and telemetry sinks.

pub mod config;
pub mod error;
pub mod dtouch;
pub mod serial;
pub mod telemetry;
