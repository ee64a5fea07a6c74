//! # dTouch Packet Receiver
//!
//! Byte-at-a-time frame assembly for streaming controllers.
//!
//! The receiver is keyed purely by its position within the current frame:
//! position 0 waits for the device address, the next positions must match the
//! response marker, and the big-endian length field fixes where the frame
//! ends. Any mismatch, an oversized length, a full buffer or a silent gap
//! longer than [`DTOUCH_IDLE_TIMEOUT_MS`] drops the partial frame and the
//! receiver starts scanning for the address again.

use std::io;

use tracing::{trace, warn};

use super::protocol::*;
use crate::serial::Transport;

/// Partial-frame state carried across ticks
#[derive(Debug, Clone)]
pub struct PacketReceiver {
    address: u8,
    response_marker: &'static [u8],
    length_offset: usize,
    length_bias: usize,
    position: usize,
    expected_len: usize,
    last_byte_ms: u64,
}

impl PacketReceiver {
    pub fn new(profile: &ProtocolProfile, address: u8) -> Self {
        Self {
            address,
            response_marker: profile.response_marker,
            length_offset: profile.length_offset,
            length_bias: profile.length_bias,
            position: 0,
            expected_len: 0,
            last_byte_ms: 0,
        }
    }

    /// Drop any partial frame and wait for the next address byte
    pub fn reset(&mut self) {
        self.position = 0;
        self.expected_len = 0;
    }

    /// Current position within the frame being assembled
    pub fn position(&self) -> usize {
        self.position
    }

    /// Drain available bytes until one frame completes
    ///
    /// Returns the length of the frame now held at the start of `buffer`, or 0
    /// if no frame completed. Bytes after a completed frame stay in the
    /// transport for the next call.
    pub fn poll<T>(&mut self, transport: &mut T, now_ms: u64, buffer: &mut [u8]) -> io::Result<usize>
    where
        T: Transport + ?Sized,
    {
        while transport.available()? > 0 {
            let byte = transport.read_one()?;
            if let Some(len) = self.push_byte(byte, now_ms, buffer) {
                return Ok(len);
            }
        }

        if self.position > 0 && self.is_idle(now_ms) {
            trace!("Abandoning partial frame at position {}", self.position);
            self.reset();
        }

        Ok(0)
    }

    /// Feed a single byte; returns the frame length when it completes a frame
    pub fn push_byte(&mut self, byte: u8, now_ms: u64, buffer: &mut [u8]) -> Option<usize> {
        if self.position > 0 && self.is_idle(now_ms) {
            trace!("Abandoning partial frame at position {}", self.position);
            self.reset();
        }
        self.last_byte_ms = now_ms;

        let position = self.position;

        if position == 0 {
            if byte != self.address {
                return None;
            }
            self.expected_len = 0;
        } else if position <= self.response_marker.len() && byte != self.response_marker[position - 1] {
            trace!("Unexpected marker byte 0x{:02X} at position {}", byte, position);
            self.reset();
            return None;
        }

        if position == self.length_offset {
            self.expected_len = usize::from(byte) << 8;
        } else if position == self.length_offset + 1 {
            self.expected_len += usize::from(byte) + self.length_bias;
            if self.expected_len > buffer.len() {
                warn!(
                    "Packet too long for buffer: {} > {} bytes",
                    self.expected_len,
                    buffer.len()
                );
                self.reset();
                return None;
            }
        }

        if position >= buffer.len() {
            trace!("Receive buffer full without a complete frame");
            self.reset();
            return None;
        }

        buffer[position] = byte;
        self.position += 1;

        if self.position == self.expected_len && self.expected_len > self.length_bias {
            let len = self.expected_len;
            self.reset();
            return Some(len);
        }

        None
    }

    fn is_idle(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_byte_ms) > DTOUCH_IDLE_TIMEOUT_MS
    }
}
