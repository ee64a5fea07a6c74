//! # Telemetry Module
//!
//! Destinations for decoded kiln readings.
//!
//! This module handles:
//! - The [`TelemetrySink`] boundary the engine publishes through
//! - Logging readings through `tracing`
//! - Writing readings to rotating JSONL files

pub mod jsonl;

use crate::dtouch::protocol::Update;
use crate::error::Result;
use tracing::info;

pub use jsonl::JsonlSink;

/// Receives one decoded reading at a time
pub trait TelemetrySink {
    fn publish(&mut self, update: &Update) -> Result<()>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn publish(&mut self, update: &Update) -> Result<()> {
        (**self).publish(update)
    }
}

/// Sink that reports readings in the application log
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, update: &Update) -> Result<()> {
        info!("{} = {:.1}", update.channel, update.value);
        Ok(())
    }
}

/// Publishes to every contained sink in order
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Box<dyn TelemetrySink + Send>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TelemetrySink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl TelemetrySink for FanOutSink {
    /// Every sink sees the update; the first failure is returned afterwards
    fn publish(&mut self, update: &Update) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(update) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
