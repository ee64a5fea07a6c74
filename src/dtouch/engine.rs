//! # dTouch Engine
//!
//! Owns all per-device protocol state and drives one exchange step per tick.
//!
//! Each call to [`DtouchEngine::on_tick`]:
//! 1. parses whatever bytes have arrived (streaming revisions);
//! 2. sends the next command once the command interval has elapsed, reading
//!    its response immediately on synchronous revisions;
//! 3. hands at most one queued reading to the sink.

use std::io;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::clock::Clock;
use super::decoder::{decode_response, validate_response, Rejection};
use super::encoder::encode_request;
use super::protocol::*;
use super::queue::UpdateQueue;
use super::receiver::PacketReceiver;
use super::sequencer::{correlate, CommandSequencer};
use crate::error::{DtouchError, Result};
use crate::serial::Transport;
use crate::telemetry::TelemetrySink;

/// Static configuration of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub address: u8,
    pub update_interval_ms: u64,
    pub channels: ChannelSet,
    pub profile: ProtocolProfile,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            address: 1,
            update_interval_ms: 5_000,
            channels: ChannelSet::default(),
            profile: ProtocolProfile::multi_query(),
        }
    }
}

/// What happened to one received frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Decoded and queued `updates` readings
    Accepted { request: Request, updates: usize },

    /// Discarded without decoding
    Rejected(Rejection),
}

/// Protocol engine for one dTouch controller
pub struct DtouchEngine<T, C> {
    transport: T,
    clock: C,
    settings: EngineSettings,
    receiver: PacketReceiver,
    sequencer: CommandSequencer,
    pending: Option<PendingCommand>,
    queue: UpdateQueue,
    buffer: [u8; DTOUCH_MAX_RESPONSE_LENGTH],
    command_interval_ms: Option<u64>,
    last_send_ms: Option<u64>,
}

impl<T: Transport, C: Clock> DtouchEngine<T, C> {
    pub fn new(transport: T, clock: C, settings: EngineSettings) -> Self {
        let mut engine = Self {
            transport,
            clock,
            settings,
            receiver: PacketReceiver::new(&settings.profile, settings.address),
            sequencer: CommandSequencer::new(settings.profile.repertoire),
            pending: None,
            queue: UpdateQueue::new(),
            buffer: [0; DTOUCH_MAX_RESPONSE_LENGTH],
            command_interval_ms: None,
            last_send_ms: None,
        };
        engine.configure(settings);
        engine
    }

    /// Apply new settings, dropping all in-flight protocol state
    pub fn configure(&mut self, settings: EngineSettings) {
        self.settings = settings;
        self.receiver = PacketReceiver::new(&settings.profile, settings.address);
        self.sequencer = CommandSequencer::new(settings.profile.repertoire);
        self.pending = None;
        self.queue.clear();
        self.last_send_ms = None;
        self.command_interval_ms = self
            .sequencer
            .command_interval_ms(settings.update_interval_ms, &settings.channels);

        info!("dTouch engine ({} protocol):", settings.profile.name);
        info!("  Device address: {}", settings.address);
        match self.command_interval_ms {
            Some(interval) => info!(
                "  Sending {} command(s), one every {} ms",
                self.sequencer.active_count(&settings.channels),
                interval
            ),
            None => warn!("  No telemetry channels configured, no commands will be sent"),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn command_interval_ms(&self) -> Option<u64> {
        self.command_interval_ms
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Readings decoded but not yet published
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drive one scheduling step
    ///
    /// # Errors
    ///
    /// Returns transport errors from reading or sending. Rejected frames and
    /// synchronous read timeouts are logged, not returned. A reading queued
    /// before the error is still published.
    pub fn on_tick<S>(&mut self, sink: &mut S) -> Result<()>
    where
        S: TelemetrySink + ?Sized,
    {
        let result = self.exchange();
        self.publish_one(sink);
        result
    }

    fn exchange(&mut self) -> Result<()> {
        if self.settings.profile.receive_mode == ReceiveMode::Streaming {
            if let Some(outcome) = self.poll_frame()? {
                log_outcome(&outcome);
            }
        }

        let Some(request) = self.due_request() else {
            return Ok(());
        };

        match self.settings.profile.receive_mode {
            ReceiveMode::Streaming => self.send(request),
            ReceiveMode::Synchronous { .. } => match self.send_and_receive(request) {
                Ok(frame) => {
                    log_outcome(&self.process_response(request, &frame));
                    Ok(())
                }
                Err(DtouchError::Timeout { expected, elapsed_ms }) => {
                    warn!("No response to {} ({} bytes) within {}ms", request, expected, elapsed_ms);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Next request if the command interval has elapsed
    fn due_request(&mut self) -> Option<Request> {
        let interval = self.command_interval_ms?;
        let now = self.clock.now_ms();

        if let Some(last) = self.last_send_ms {
            if now.saturating_sub(last) < interval {
                return None;
            }
        }

        self.last_send_ms = Some(now);
        self.sequencer.next_request(&self.settings.channels)
    }

    fn publish_one<S>(&mut self, sink: &mut S)
    where
        S: TelemetrySink + ?Sized,
    {
        if let Some(update) = self.queue.pop() {
            if let Err(e) = sink.publish(&update) {
                warn!("Failed to publish {}: {}", update.channel, e);
            }
        }
    }

    /// Send a request and record it as pending
    ///
    /// Unread input is discarded first so a late reply to an earlier command
    /// cannot be taken for the reply to this one.
    ///
    /// # Errors
    ///
    /// Returns error if writing or flushing the transport fails. Nothing is
    /// retried; the next due tick sends again.
    pub fn send(&mut self, request: Request) -> Result<()> {
        self.write_request(request)?;
        self.pending = Some(PendingCommand {
            request,
            sent_at_ms: self.clock.now_ms(),
        });
        Ok(())
    }

    /// Send a request and block for its fixed-size response
    ///
    /// # Errors
    ///
    /// Returns [`DtouchError::Timeout`] if the full response does not arrive
    /// within the profile's timeout, or the transport error otherwise.
    pub fn send_and_receive(&mut self, request: Request) -> Result<Vec<u8>> {
        let ReceiveMode::Synchronous { response_len, timeout_ms } = self.settings.profile.receive_mode else {
            return Err(DtouchError::Protocol(format!(
                "{} protocol does not read responses synchronously",
                self.settings.profile.name
            )));
        };

        self.write_request(request)?;

        match self
            .transport
            .read_exact_timeout(response_len, Duration::from_millis(timeout_ms))
        {
            Ok(frame) => Ok(frame),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(DtouchError::Timeout {
                expected: response_len,
                elapsed_ms: timeout_ms,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write_request(&mut self, request: Request) -> Result<()> {
        let mut discarded = 0usize;
        while self.transport.available()? > 0 {
            self.transport.read_one()?;
            discarded += 1;
        }
        if discarded > 0 {
            trace!("Discarded {} stale bytes before sending", discarded);
        }
        if self.receiver.position() > 0 {
            trace!("Dropping partial frame at position {}", self.receiver.position());
        }
        self.receiver.reset();

        let frame = encode_request(&self.settings.profile, self.settings.address, request);
        self.transport.write_all(&frame)?;
        self.transport.flush()?;

        debug!("Sent {} ({} bytes)", request, frame.len());
        Ok(())
    }

    /// Parse available bytes and process at most one completed frame
    pub fn poll_frame(&mut self) -> Result<Option<FrameOutcome>> {
        let now = self.clock.now_ms();
        let len = self.receiver.poll(&mut self.transport, now, &mut self.buffer)?;
        if len == 0 {
            return Ok(None);
        }

        let frame = self.buffer[..len].to_vec();
        Ok(Some(self.process_frame(&frame)))
    }

    /// Correlate a streamed frame with the pending command, then decode it
    pub fn process_frame(&mut self, frame: &[u8]) -> FrameOutcome {
        match correlate(self.pending.as_ref(), self.clock.now_ms()) {
            Ok(request) => self.process_response(request, frame),
            Err(rejection) => FrameOutcome::Rejected(rejection),
        }
    }

    /// Validate a frame known to answer `request` and queue its readings
    pub fn process_response(&mut self, request: Request, frame: &[u8]) -> FrameOutcome {
        if let Err(rejection) = validate_response(&self.settings.profile, self.settings.address, frame) {
            return FrameOutcome::Rejected(rejection);
        }

        match decode_response(&self.settings.profile, request, frame, &self.settings.channels) {
            Ok(updates) => {
                let count = updates.len();
                self.queue.extend(updates);
                FrameOutcome::Accepted { request, updates: count }
            }
            Err(e) => FrameOutcome::Rejected(Rejection::Malformed(e.to_string())),
        }
    }
}

fn log_outcome(outcome: &FrameOutcome) {
    match outcome {
        FrameOutcome::Accepted { request, updates } => {
            debug!("Response to {}: {} reading(s) queued", request, updates)
        }
        FrameOutcome::Rejected(rejection) => warn!("Discarded dTouch packet: {}", rejection),
    }
}
