//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::dtouch::protocol::{ChannelSet, ControlChannels, ProbeGroup, ProtocolProfile, MAX_PROBES};
use crate::dtouch::EngineSettings;
use crate::error::{DtouchError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
///
/// `port = "auto"` scans the usual adapter device paths.
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Which controller revision is attached
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    MultiQuery,
    Summary,
}

impl ProtocolKind {
    pub fn profile(self) -> ProtocolProfile {
        match self {
            ProtocolKind::MultiQuery => ProtocolProfile::multi_query(),
            ProtocolKind::Summary => ProtocolProfile::summary(),
        }
    }
}

/// Controller addressing and polling
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_address")]
    pub address: u8,

    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    #[serde(default)]
    pub protocol: ProtocolKind,
}

/// A measurement category and how many of its probes to publish
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProbeGroupConfig {
    #[serde(default)]
    pub num_probes: usize,
}

/// Setpoint and actuator outputs
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ControlConfig {
    #[serde(default)]
    pub ideal_temperature: bool,
    #[serde(default)]
    pub final_temperature: bool,
    #[serde(default)]
    pub ideal_emc: bool,
    #[serde(default)]
    pub final_emc: bool,
    #[serde(default)]
    pub final_mc: bool,
    #[serde(default)]
    pub heating: bool,
    #[serde(default)]
    pub fans: bool,
    #[serde(default)]
    pub flaps: bool,
    #[serde(default)]
    pub sprayer: bool,
}

/// Telemetry channels to publish; absent sections are not queried
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsConfig {
    #[serde(default)]
    pub temperature: Option<ProbeGroupConfig>,

    #[serde(default)]
    pub moisture_content: Option<ProbeGroupConfig>,

    #[serde(default)]
    pub equilibrium_moisture_content: Option<ProbeGroupConfig>,

    #[serde(default)]
    pub control: ControlConfig,
}

/// Telemetry file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Application log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily-rotated log files here when set
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { crate::serial::DTOUCH_BAUD_RATE }
fn default_timeout_ms() -> u64 { 100 }

fn default_address() -> u8 { 1 }
fn default_update_interval_ms() -> u64 { 5000 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

fn config_error(message: impl std::fmt::Display) -> DtouchError {
    DtouchError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dtouch_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(config_error("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(config_error("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(config_error("timeout_ms must be between 1 and 10000"));
        }

        // 0 and 255 are reserved on the bus
        if self.device.address == 0 || self.device.address == 255 {
            return Err(config_error("address must be between 1 and 254"));
        }

        if self.device.update_interval_ms < 500 {
            return Err(config_error("update_interval_ms must be at least 500"));
        }

        for (name, group) in [
            ("temperature", &self.sensors.temperature),
            ("moisture_content", &self.sensors.moisture_content),
            ("equilibrium_moisture_content", &self.sensors.equilibrium_moisture_content),
        ] {
            if let Some(group) = group {
                if group.num_probes > MAX_PROBES {
                    return Err(config_error(format!(
                        "{}.num_probes must be at most {}",
                        name, MAX_PROBES
                    )));
                }
            }
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(config_error("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(config_error("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(config_error("max_files_to_keep must be greater than 0"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(config_error("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }

    /// Telemetry outputs bound by this configuration
    pub fn channel_set(&self) -> ChannelSet {
        let group = |config: &Option<ProbeGroupConfig>| {
            config.as_ref().map(|c| ProbeGroup { num_probes: c.num_probes })
        };
        let control = &self.sensors.control;

        ChannelSet {
            temperature: group(&self.sensors.temperature),
            moisture_content: group(&self.sensors.moisture_content),
            equilibrium_moisture_content: group(&self.sensors.equilibrium_moisture_content),
            control: ControlChannels {
                ideal_temperature: control.ideal_temperature,
                final_temperature: control.final_temperature,
                ideal_emc: control.ideal_emc,
                final_emc: control.final_emc,
                final_mc: control.final_mc,
                heating: control.heating,
                fans: control.fans,
                flaps: control.flaps,
                sprayer: control.sprayer,
            },
        }
    }

    /// Engine settings for the configured device
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            address: self.device.address,
            update_interval_ms: self.device.update_interval_ms,
            channels: self.channel_set(),
            profile: self.device.protocol.profile(),
        }
    }
}
