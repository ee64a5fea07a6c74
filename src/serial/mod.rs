//! # Serial Communication Module
//!
//! Handles the serial link to the dTouch controller.
//!
//! This module handles:
//! - Opening the serial port with dTouch line settings (8E1)
//! - Non-blocking byte reads for the streaming receiver
//! - Bounded blocking reads for synchronous protocol revisions
//! - Writing and flushing request frames

mod port_trait;

pub use port_trait::Transport;

#[cfg(test)]
pub use port_trait::{mocks, MockTransport};

use crate::config::SerialConfig;
use crate::error::{DtouchError, Result};
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio_serial::SerialPort;
use tracing::{debug, info, warn};

/// dTouch controllers talk at 57,600 baud
pub const DTOUCH_BAUD_RATE: u32 = 57_600;

/// Configured port name that scans [`DEFAULT_DEVICE_PATHS`]
pub const AUTO_PORT: &str = "auto";

/// Default device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-RS485 adapters
    "/dev/ttyAMA0", // Raspberry Pi UART
];

/// dTouch Serial Port Handler
pub struct DtouchSerial {
    /// Serial port handle
    port: Box<dyn SerialPort>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for DtouchSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtouchSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl DtouchSerial {
    /// Open the port named in the configuration
    ///
    /// A port of `"auto"` tries each of the default device paths in turn.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened or configured, or
    /// [`DtouchError::SerialPortNotFound`] if no default path could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dtouch_link::config::Config;
    /// use dtouch_link::serial::DtouchSerial;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// let serial = DtouchSerial::open(&config.serial)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config.port == AUTO_PORT {
            return Self::open_with_paths(DEFAULT_DEVICE_PATHS, config.baud_rate, config.timeout_ms);
        }

        let port = Self::open_port(&config.port, config.baud_rate, config.timeout_ms)?;
        info!("Opened dTouch serial port at {}", config.port);
        Ok(Self {
            port,
            device_path: config.port.clone(),
        })
    }

    /// Open the first of several candidate device paths that works
    fn open_with_paths(paths: &[&str], baud_rate: u32, timeout_ms: u64) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate, timeout_ms) {
                Ok(port) => {
                    info!("Successfully opened dTouch device at {}", path);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(DtouchError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32, timeout_ms: u64) -> Result<Box<dyn SerialPort>> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .map_err(|e| DtouchError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

fn to_io_error<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

impl Transport for DtouchSerial {
    fn available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(to_io_error)
    }

    fn read_one(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.port)
    }

    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let previous = self.port.timeout();
        self.port.set_timeout(timeout).map_err(to_io_error)?;

        let mut frame = vec![0u8; len];
        let result = self.port.read_exact(&mut frame);

        self.port.set_timeout(previous).map_err(to_io_error)?;
        result.map(|_| frame)
    }
}
