//! # dTouch Protocol Constants and Types
//!
//! Core protocol definitions for dTouch kiln controller communication.

use std::fmt;

/// Maximum response frame the engine will buffer
pub const DTOUCH_MAX_RESPONSE_LENGTH: usize = 128;

/// Request marker sent after the address byte
pub const DTOUCH_REQUEST_MARKER: [u8; 3] = [0x80, 0x00, 0x00];

/// Response marker expected right after the address byte
pub const DTOUCH_RESPONSE_MARKER: [u8; 1] = [0x80];

/// Offset of the big-endian length field in a response
pub const DTOUCH_LENGTH_OFFSET: usize = 4;

/// Response header length (address + marker + reserved + length)
pub const DTOUCH_HEADER_LENGTH: usize = 6;

/// Bytes not counted by the response length field (header + CRC)
pub const DTOUCH_LENGTH_BIAS: usize = 8;

/// Gap after which a partial frame is abandoned
pub const DTOUCH_IDLE_TIMEOUT_MS: u64 = 10;

/// Maximum age of a pending command for a response to be accepted
pub const DTOUCH_CORRELATION_WINDOW_MS: u64 = 500;

/// Floor on the interval between two commands
pub const DTOUCH_MIN_COMMAND_INTERVAL_MS: u64 = 500;

/// Read a category ("P" + selector)
pub const COMMAND_READ: u8 = b'P';

/// Read the full summary (single-query controllers)
pub const COMMAND_SUMMARY: u8 = b'S';

/// Sub-selector: aggregate moisture content + probes
pub const SELECTOR_MC: u8 = 0x00;

/// Sub-selector: aggregate EMC + probes
pub const SELECTOR_EMC: u8 = 0x02;

/// Sub-selector: aggregate temperature + probes
pub const SELECTOR_TEMPERATURE: u8 = 0x03;

/// Sub-selector: setpoints and actuator levels
pub const SELECTOR_CONTROL_VALUES: u8 = 0x10;

/// Total length of a summary response frame
pub const SUMMARY_RESPONSE_LENGTH: usize = 113;

/// Probe slots reserved per category in a summary response
pub const SUMMARY_PROBE_SLOTS: usize = 16;

/// Upper bound on configured probes per category
pub const MAX_PROBES: usize = 16;

/// Fixed-point scale of 16-bit readings
pub const FIXED_POINT_SCALE: f32 = 10.0;

/// Probe words carry flag bits in the top nibble
pub const PROBE_VALUE_MASK: u16 = 0x0FFF;

/// How responses are read off the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Parsed incrementally, one byte at a time, across ticks
    Streaming,

    /// Read in one blocking call of exactly `response_len` bytes
    Synchronous { response_len: usize, timeout_ms: u64 },
}

/// Which commands a controller revision understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repertoire {
    /// One "full summary" command
    Summary,

    /// Round-robin over per-category `P` queries
    Categories,
}

/// Wire-format parameters of one controller revision
///
/// Revisions differ in marker bytes, where the length field sits, how the
/// length is biased, whether responses are streamed or read synchronously,
/// and which commands are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolProfile {
    pub name: &'static str,
    pub request_marker: &'static [u8],
    pub response_marker: &'static [u8],
    pub length_offset: usize,
    pub length_bias: usize,
    pub header_len: usize,
    pub receive_mode: ReceiveMode,
    pub repertoire: Repertoire,
}

impl ProtocolProfile {
    /// Streaming controller queried one category at a time
    pub const fn multi_query() -> Self {
        Self {
            name: "multi_query",
            request_marker: &DTOUCH_REQUEST_MARKER,
            response_marker: &DTOUCH_RESPONSE_MARKER,
            length_offset: DTOUCH_LENGTH_OFFSET,
            length_bias: DTOUCH_LENGTH_BIAS,
            header_len: DTOUCH_HEADER_LENGTH,
            receive_mode: ReceiveMode::Streaming,
            repertoire: Repertoire::Categories,
        }
    }

    /// Controller answering a single summary command with a fixed-size frame
    pub const fn summary() -> Self {
        Self {
            name: "summary",
            request_marker: &DTOUCH_REQUEST_MARKER,
            response_marker: &DTOUCH_RESPONSE_MARKER,
            length_offset: DTOUCH_LENGTH_OFFSET,
            length_bias: DTOUCH_LENGTH_BIAS,
            header_len: DTOUCH_HEADER_LENGTH,
            receive_mode: ReceiveMode::Synchronous {
                response_len: SUMMARY_RESPONSE_LENGTH,
                timeout_ms: 250,
            },
            repertoire: Repertoire::Summary,
        }
    }

    /// Fixed response length, if this revision has one
    pub fn fixed_response_len(&self) -> Option<usize> {
        match self.receive_mode {
            ReceiveMode::Synchronous { response_len, .. } => Some(response_len),
            ReceiveMode::Streaming => None,
        }
    }
}

impl Default for ProtocolProfile {
    fn default() -> Self {
        Self::multi_query()
    }
}

/// A command opcode plus its optional sub-selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: u8,
    pub selector: Option<u8>,
}

impl Request {
    pub const fn new(command: u8, selector: Option<u8>) -> Self {
        Self { command, selector }
    }

    pub const fn read(selector: u8) -> Self {
        Self::new(COMMAND_READ, Some(selector))
    }

    pub const fn summary() -> Self {
        Self::new(COMMAND_SUMMARY, None)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            Some(selector) => write!(f, "'{}' 0x{:02X}", self.command as char, selector),
            None => write!(f, "'{}'", self.command as char),
        }
    }
}

/// The one outstanding request awaiting its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub request: Request,
    pub sent_at_ms: u64,
}

impl PendingCommand {
    /// Whether a response arriving at `now_ms` still belongs to this command
    pub fn accepts(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.sent_at_ms) <= DTOUCH_CORRELATION_WINDOW_MS
    }
}

/// A probe-bearing measurement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Temperature,
    MoistureContent,
    EquilibriumMoistureContent,
}

impl Category {
    fn slug(self) -> &'static str {
        match self {
            Category::Temperature => "temperature",
            Category::MoistureContent => "moisture_content",
            Category::EquilibriumMoistureContent => "equilibrium_moisture_content",
        }
    }
}

/// A telemetry output the decoders can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Whole-kiln reading of a category
    Aggregate(Category),

    /// One probe reading of a category (zero-based index)
    Probe(Category, u8),

    IdealTemperature,
    FinalTemperature,
    IdealEmc,
    FinalEmc,
    FinalMc,
    Heating,
    Fans,
    Flaps,
    Sprayer,
}

impl Channel {
    /// Stable name used by sinks
    pub fn name(&self) -> String {
        match self {
            Channel::Aggregate(category) => category.slug().to_string(),
            Channel::Probe(category, index) => format!("{}_probe_{}", category.slug(), index + 1),
            Channel::IdealTemperature => "ideal_temperature".to_string(),
            Channel::FinalTemperature => "final_temperature".to_string(),
            Channel::IdealEmc => "ideal_emc".to_string(),
            Channel::FinalEmc => "final_emc".to_string(),
            Channel::FinalMc => "final_mc".to_string(),
            Channel::Heating => "heating".to_string(),
            Channel::Fans => "fans".to_string(),
            Channel::Flaps => "flaps".to_string(),
            Channel::Sprayer => "sprayer".to_string(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A configured category with its probe channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeGroup {
    pub num_probes: usize,
}

/// Optional setpoint and actuator outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlChannels {
    pub ideal_temperature: bool,
    pub final_temperature: bool,
    pub ideal_emc: bool,
    pub final_emc: bool,
    pub final_mc: bool,
    pub heating: bool,
    pub fans: bool,
    pub flaps: bool,
    pub sprayer: bool,
}

impl ControlChannels {
    pub fn any(&self) -> bool {
        self.ideal_temperature
            || self.final_temperature
            || self.ideal_emc
            || self.final_emc
            || self.final_mc
            || self.heating
            || self.fans
            || self.flaps
            || self.sprayer
    }
}

/// The set of telemetry outputs bound at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSet {
    pub temperature: Option<ProbeGroup>,
    pub moisture_content: Option<ProbeGroup>,
    pub equilibrium_moisture_content: Option<ProbeGroup>,
    pub control: ControlChannels,
}

impl ChannelSet {
    pub fn group(&self, category: Category) -> Option<ProbeGroup> {
        match category {
            Category::Temperature => self.temperature,
            Category::MoistureContent => self.moisture_content,
            Category::EquilibriumMoistureContent => self.equilibrium_moisture_content,
        }
    }

    /// Number of probe channels configured for a category
    pub fn probe_count(&self, category: Category) -> usize {
        self.group(category).map_or(0, |group| group.num_probes)
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Aggregate(category) => self.group(category).is_some(),
            Channel::Probe(category, index) => (index as usize) < self.probe_count(category),
            Channel::IdealTemperature => self.control.ideal_temperature,
            Channel::FinalTemperature => self.control.final_temperature,
            Channel::IdealEmc => self.control.ideal_emc,
            Channel::FinalEmc => self.control.final_emc,
            Channel::FinalMc => self.control.final_mc,
            Channel::Heating => self.control.heating,
            Channel::Fans => self.control.fans,
            Channel::Flaps => self.control.flaps,
            Channel::Sprayer => self.control.sprayer,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.moisture_content.is_none()
            && self.equilibrium_moisture_content.is_none()
            && !self.control.any()
    }
}

/// One decoded telemetry value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Update {
    pub channel: Channel,
    pub value: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(DTOUCH_REQUEST_MARKER, [0x80, 0x00, 0x00]);
        assert_eq!(DTOUCH_RESPONSE_MARKER, [0x80]);
        assert_eq!(DTOUCH_HEADER_LENGTH, 6);
        assert_eq!(DTOUCH_LENGTH_BIAS, DTOUCH_HEADER_LENGTH + 2);
    }

    #[test]
    fn test_summary_layout_fits() {
        // header + 3 aggregates + 3 × (count + slots) + crc
        let expected = DTOUCH_HEADER_LENGTH + 3 * 2 + 3 * (1 + 2 * SUMMARY_PROBE_SLOTS) + 2;
        assert_eq!(expected, SUMMARY_RESPONSE_LENGTH);
        assert!(SUMMARY_RESPONSE_LENGTH <= DTOUCH_MAX_RESPONSE_LENGTH);
    }

    #[test]
    fn test_pending_command_window() {
        let pending = PendingCommand {
            request: Request::read(SELECTOR_MC),
            sent_at_ms: 1_000,
        };
        assert!(pending.accepts(1_000));
        assert!(pending.accepts(1_500));
        assert!(!pending.accepts(1_501));
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Aggregate(Category::Temperature).name(), "temperature");
        assert_eq!(
            Channel::Probe(Category::MoistureContent, 0).name(),
            "moisture_content_probe_1"
        );
        assert_eq!(Channel::Sprayer.to_string(), "sprayer");
    }

    #[test]
    fn test_channel_set_enabled() {
        let channels = ChannelSet {
            moisture_content: Some(ProbeGroup { num_probes: 2 }),
            control: ControlChannels { fans: true, ..Default::default() },
            ..Default::default()
        };

        assert!(channels.is_enabled(Channel::Aggregate(Category::MoistureContent)));
        assert!(channels.is_enabled(Channel::Probe(Category::MoistureContent, 1)));
        assert!(!channels.is_enabled(Channel::Probe(Category::MoistureContent, 2)));
        assert!(!channels.is_enabled(Channel::Aggregate(Category::Temperature)));
        assert!(channels.is_enabled(Channel::Fans));
        assert!(!channels.is_enabled(Channel::Heating));
        assert!(!channels.is_empty());
        assert!(ChannelSet::default().is_empty());
    }

    #[test]
    fn test_request_display() {
        assert_eq!(Request::read(SELECTOR_CONTROL_VALUES).to_string(), "'P' 0x10");
        assert_eq!(Request::summary().to_string(), "'S'");
    }
}
