//! # dTouch Packet Decoder
//!
//! Validates response frames and decodes their payloads into telemetry
//! updates. Readings are big-endian 16-bit fixed point with one decimal.

use std::fmt;

use bytes::Buf;

use super::crc::frame_checksums;
use super::protocol::*;
use crate::error::{DtouchError, Result};

/// Why a received frame was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing was sent that this frame could answer
    NoPendingCommand,

    /// Arrived after the correlation window closed
    Unsolicited { age_ms: u64 },

    /// Trailing CRC does not match the frame contents
    ChecksumMismatch { computed: u16, received: u16 },

    /// Revision with a fixed response size got a different size
    UnexpectedLength { expected: usize, actual: usize },

    /// Address or marker bytes are wrong
    BadHeader,

    /// Valid frame whose payload could not be decoded
    Malformed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoPendingCommand => write!(f, "no command pending"),
            Rejection::Unsolicited { age_ms } => {
                write!(f, "unsolicited packet ({}ms after last command)", age_ms)
            }
            Rejection::ChecksumMismatch { computed, received } => write!(
                f,
                "checksum doesn't match: 0x{:04X} != 0x{:04X}",
                received, computed
            ),
            Rejection::UnexpectedLength { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
            Rejection::BadHeader => write!(f, "bad address or marker"),
            Rejection::Malformed(reason) => write!(f, "malformed payload: {}", reason),
        }
    }
}

/// Check size, header and CRC of a complete response frame
pub fn validate_response(
    profile: &ProtocolProfile,
    address: u8,
    frame: &[u8],
) -> std::result::Result<(), Rejection> {
    if let Some(expected) = profile.fixed_response_len() {
        if frame.len() != expected {
            return Err(Rejection::UnexpectedLength {
                expected,
                actual: frame.len(),
            });
        }

        let field = u16::from_be_bytes([frame[profile.length_offset], frame[profile.length_offset + 1]]);
        let declared = usize::from(field) + profile.length_bias;
        if declared != expected {
            return Err(Rejection::UnexpectedLength {
                expected,
                actual: declared,
            });
        }
    }

    let header_end = 1 + profile.response_marker.len();
    if frame.len() < profile.length_bias || frame[0] != address || &frame[1..header_end] != profile.response_marker {
        return Err(Rejection::BadHeader);
    }

    match frame_checksums(frame) {
        Some((computed, received)) if computed == received => Ok(()),
        Some((computed, received)) => Err(Rejection::ChecksumMismatch { computed, received }),
        None => Err(Rejection::BadHeader),
    }
}

/// Decode a request frame back into its address and request
///
/// # Errors
///
/// Returns error if the frame is too short, the marker or length field is
/// wrong, or the CRC check fails.
pub fn decode_request(profile: &ProtocolProfile, frame: &[u8]) -> Result<(u8, Request)> {
    let header_len = 1 + profile.request_marker.len() + 2;
    if frame.len() < header_len + 1 + 2 {
        return Err(DtouchError::Protocol(format!("Request too short: {} bytes", frame.len())));
    }

    if &frame[1..1 + profile.request_marker.len()] != profile.request_marker {
        return Err(DtouchError::Protocol("Invalid request marker".to_string()));
    }

    if let Some((computed, received)) = frame_checksums(frame) {
        if computed != received {
            return Err(DtouchError::Protocol(format!(
                "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
                computed, received
            )));
        }
    }

    let length = usize::from(u16::from_be_bytes([frame[header_len - 2], frame[header_len - 1]]));
    let body = &frame[header_len..frame.len() - 2];
    if length != body.len() || !(1..=2).contains(&length) {
        return Err(DtouchError::Protocol(format!(
            "Length field {} does not match {} body bytes",
            length,
            body.len()
        )));
    }

    Ok((frame[0], Request::new(body[0], body.get(1).copied())))
}

/// Decode a validated response to `request` into updates
///
/// Updates are only returned when the whole payload decodes, so a truncated
/// frame never yields a partial set.
pub fn decode_response(
    profile: &ProtocolProfile,
    request: Request,
    frame: &[u8],
    channels: &ChannelSet,
) -> Result<Vec<Update>> {
    let mut reader = PayloadReader::new(payload(profile, frame)?);
    let mut updates = Vec::new();

    match (request.command, request.selector) {
        (COMMAND_READ, Some(SELECTOR_MC)) => {
            decode_category(&mut reader, Category::MoistureContent, channels, &mut updates)?
        }
        (COMMAND_READ, Some(SELECTOR_EMC)) => {
            decode_category(&mut reader, Category::EquilibriumMoistureContent, channels, &mut updates)?
        }
        (COMMAND_READ, Some(SELECTOR_TEMPERATURE)) => {
            decode_category(&mut reader, Category::Temperature, channels, &mut updates)?
        }
        (COMMAND_READ, Some(SELECTOR_CONTROL_VALUES)) => {
            decode_control_values(&mut reader, channels, &mut updates)?
        }
        (COMMAND_SUMMARY, None) => decode_summary(&mut reader, channels, &mut updates)?,
        _ => {
            return Err(DtouchError::Protocol(format!("No decoder for command {}", request)));
        }
    }

    Ok(updates)
}

/// Payload bytes between the header and the CRC
fn payload<'a>(profile: &ProtocolProfile, frame: &'a [u8]) -> Result<&'a [u8]> {
    if frame.len() < profile.header_len + 2 {
        return Err(DtouchError::Protocol(format!("Frame too short: {} bytes", frame.len())));
    }
    Ok(&frame[profile.header_len..frame.len() - 2])
}

/// Convert a raw fixed-point reading
pub fn fixed_point(raw: u16) -> f32 {
    raw as f32 / FIXED_POINT_SCALE
}

/// Convert a raw probe reading, dropping its flag nibble
pub fn probe_fixed_point(raw: u16) -> f32 {
    fixed_point(raw & PROBE_VALUE_MASK)
}

/// Aggregate reading, probe count, then one word per probe
fn decode_category(
    reader: &mut PayloadReader<'_>,
    category: Category,
    channels: &ChannelSet,
    updates: &mut Vec<Update>,
) -> Result<()> {
    let aggregate = reader.read_u16()?;
    emit(updates, channels, Channel::Aggregate(category), fixed_point(aggregate));
    decode_probes(reader, category, usize::from(u8::MAX), channels, updates)
}

/// Probe count byte then up to `slots` probe words
fn decode_probes(
    reader: &mut PayloadReader<'_>,
    category: Category,
    slots: usize,
    channels: &ChannelSet,
    updates: &mut Vec<Update>,
) -> Result<()> {
    let wire_count = usize::from(reader.read_u8()?);
    let count = wire_count.min(channels.probe_count(category)).min(slots);

    for index in 0..count {
        let raw = reader.read_u16()?;
        emit(updates, channels, Channel::Probe(category, index as u8), probe_fixed_point(raw));
    }

    Ok(())
}

/// Setpoints and actuator levels, each gated by its channel
fn decode_control_values(
    reader: &mut PayloadReader<'_>,
    channels: &ChannelSet,
    updates: &mut Vec<Update>,
) -> Result<()> {
    for channel in [
        Channel::IdealTemperature,
        Channel::FinalTemperature,
        Channel::IdealEmc,
        Channel::FinalEmc,
        Channel::FinalMc,
    ] {
        let raw = reader.read_u16()?;
        emit(updates, channels, channel, fixed_point(raw));
    }

    // reserved
    reader.skip(2)?;

    for channel in [Channel::Heating, Channel::Fans, Channel::Flaps, Channel::Sprayer] {
        let level = reader.read_u8()?;
        emit(updates, channels, channel, f32::from(level));
    }

    Ok(())
}

/// Three aggregates followed by three fixed-size probe sections
fn decode_summary(reader: &mut PayloadReader<'_>, channels: &ChannelSet, updates: &mut Vec<Update>) -> Result<()> {
    const ORDER: [Category; 3] = [
        Category::Temperature,
        Category::EquilibriumMoistureContent,
        Category::MoistureContent,
    ];

    for category in ORDER {
        let raw = reader.read_u16()?;
        emit(updates, channels, Channel::Aggregate(category), fixed_point(raw));
    }

    for category in ORDER {
        let section_start = reader.consumed();
        decode_probes(reader, category, SUMMARY_PROBE_SLOTS, channels, updates)?;
        let used = reader.consumed() - section_start;
        reader.skip((1 + 2 * SUMMARY_PROBE_SLOTS).saturating_sub(used))?;
    }

    Ok(())
}

fn emit(updates: &mut Vec<Update>, channels: &ChannelSet, channel: Channel, value: f32) {
    if channels.is_enabled(channel) {
        updates.push(Update { channel, value });
    }
}

/// Bounds-checked cursor over a payload
struct PayloadReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, len: buf.len() }
    }

    fn consumed(&self) -> usize {
        self.len - self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(DtouchError::Protocol(format!(
                "Payload truncated at byte {}: need {}, have {}",
                self.consumed(),
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtouch::encoder::{encode_request, encode_response};

    const ADDRESS: u8 = 0x01;

    fn profile() -> ProtocolProfile {
        ProtocolProfile::multi_query()
    }

    fn all_control() -> ControlChannels {
        ControlChannels {
            ideal_temperature: true,
            final_temperature: true,
            ideal_emc: true,
            final_emc: true,
            final_mc: true,
            heating: true,
            fans: true,
            flaps: true,
            sprayer: true,
        }
    }

    fn values(updates: &[Update]) -> Vec<(Channel, f32)> {
        updates.iter().map(|u| (u.channel, u.value)).collect()
    }

    #[test]
    fn test_fixed_point() {
        assert_eq!(fixed_point(0x00C8), 20.0);
        assert_eq!(probe_fixed_point(0xF0C8), 20.0);
        // Aggregates keep the top nibble
        assert_eq!(fixed_point(0x10C8), 429.6);
    }

    #[test]
    fn test_request_round_trip() {
        for request in [
            Request::read(SELECTOR_MC),
            Request::read(SELECTOR_CONTROL_VALUES),
            Request::summary(),
        ] {
            let frame = encode_request(&profile(), 0x2A, request);
            let (address, decoded) = decode_request(&profile(), &frame).unwrap();
            assert_eq!(address, 0x2A);
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_decode_request_crc_error() {
        let mut frame = encode_request(&profile(), ADDRESS, Request::read(SELECTOR_EMC));
        frame[7] ^= 0xFF;
        assert!(decode_request(&profile(), &frame).is_err());
    }

    #[test]
    fn test_decode_request_too_short() {
        assert!(decode_request(&profile(), &[ADDRESS, 0x80, 0x00]).is_err());
    }

    #[test]
    fn test_validate_response() {
        let frame = encode_response(&profile(), ADDRESS, &[0x00, 0xC8, 0x00]);
        assert_eq!(validate_response(&profile(), ADDRESS, &frame), Ok(()));
        assert_eq!(validate_response(&profile(), 0x02, &frame), Err(Rejection::BadHeader));
    }

    #[test]
    fn test_validate_response_checksum_mismatch() {
        let mut frame = encode_response(&profile(), ADDRESS, &[0x00, 0xC8, 0x00]);
        let last = frame.len() - 1;
        frame[last] ^= 0x10;

        match validate_response(&profile(), ADDRESS, &frame) {
            Err(Rejection::ChecksumMismatch { computed, received }) => assert_ne!(computed, received),
            other => panic!("Expected checksum mismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_validate_response_fixed_length() {
        let frame = encode_response(&ProtocolProfile::summary(), ADDRESS, &[0x00; 10]);
        assert_eq!(
            validate_response(&ProtocolProfile::summary(), ADDRESS, &frame),
            Err(Rejection::UnexpectedLength {
                expected: SUMMARY_RESPONSE_LENGTH,
                actual: 18
            })
        );
    }

    #[test]
    fn test_decode_mc_with_probes() {
        let channels = ChannelSet {
            moisture_content: Some(ProbeGroup { num_probes: 2 }),
            ..Default::default()
        };
        let frame = encode_response(&profile(), ADDRESS, &[0x00, 0xFA, 0x02, 0x30, 0x64, 0xF0, 0xC8]);

        let updates = decode_response(&profile(), Request::read(SELECTOR_MC), &frame, &channels).unwrap();

        assert_eq!(
            values(&updates),
            vec![
                (Channel::Aggregate(Category::MoistureContent), 25.0),
                (Channel::Probe(Category::MoistureContent, 0), 10.0),
                (Channel::Probe(Category::MoistureContent, 1), 20.0),
            ]
        );
    }

    #[test]
    fn test_probe_count_clamped_to_configured() {
        let channels = ChannelSet {
            temperature: Some(ProbeGroup { num_probes: 3 }),
            ..Default::default()
        };
        let mut payload = vec![0x01, 0x2C, 6];
        for i in 1..=6u16 {
            payload.extend_from_slice(&(i * 100).to_be_bytes());
        }
        let frame = encode_response(&profile(), ADDRESS, &payload);

        let updates =
            decode_response(&profile(), Request::read(SELECTOR_TEMPERATURE), &frame, &channels).unwrap();

        let probes: Vec<_> = updates
            .iter()
            .filter(|u| matches!(u.channel, Channel::Probe(..)))
            .map(|u| u.value)
            .collect();
        assert_eq!(probes, vec![10.0, 20.0, 30.0]);
        assert_eq!(updates[0].value, 30.0);
    }

    #[test]
    fn test_wire_count_below_configured() {
        let channels = ChannelSet {
            equilibrium_moisture_content: Some(ProbeGroup { num_probes: 4 }),
            ..Default::default()
        };
        let frame = encode_response(&profile(), ADDRESS, &[0x00, 0x80, 0x01, 0x00, 0x81]);

        let updates = decode_response(&profile(), Request::read(SELECTOR_EMC), &frame, &channels).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].value, 12.9);
    }

    #[test]
    fn test_truncated_probe_section_yields_nothing() {
        let channels = ChannelSet {
            moisture_content: Some(ProbeGroup { num_probes: 4 }),
            ..Default::default()
        };
        // Claims 3 probes but carries one
        let frame = encode_response(&profile(), ADDRESS, &[0x00, 0xFA, 0x03, 0x00, 0x64]);

        assert!(decode_response(&profile(), Request::read(SELECTOR_MC), &frame, &channels).is_err());
    }

    #[test]
    fn test_decode_control_values_all_enabled() {
        let channels = ChannelSet {
            control: all_control(),
            ..Default::default()
        };
        let payload = [
            0x02, 0x58, // ideal temperature 60.0
            0x02, 0x6C, // final temperature 62.0
            0x00, 0x78, // ideal emc 12.0
            0x00, 0x50, // final emc 8.0
            0x00, 0x46, // final mc 7.0
            0xFF, 0xFF, // reserved
            100, 50, 25, 0,
        ];
        let frame = encode_response(&profile(), ADDRESS, &payload);

        let updates =
            decode_response(&profile(), Request::read(SELECTOR_CONTROL_VALUES), &frame, &channels).unwrap();

        assert_eq!(
            values(&updates),
            vec![
                (Channel::IdealTemperature, 60.0),
                (Channel::FinalTemperature, 62.0),
                (Channel::IdealEmc, 12.0),
                (Channel::FinalEmc, 8.0),
                (Channel::FinalMc, 7.0),
                (Channel::Heating, 100.0),
                (Channel::Fans, 50.0),
                (Channel::Flaps, 25.0),
                (Channel::Sprayer, 0.0),
            ]
        );
    }

    #[test]
    fn test_decode_control_values_skips_unconfigured() {
        let channels = ChannelSet {
            control: ControlChannels {
                final_mc: true,
                flaps: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let payload = [
            0x02, 0x58, 0x02, 0x6C, 0x00, 0x78, 0x00, 0x50, 0x00, 0x46, 0x00, 0x00, 100, 50, 25, 0,
        ];
        let frame = encode_response(&profile(), ADDRESS, &payload);

        let updates =
            decode_response(&profile(), Request::read(SELECTOR_CONTROL_VALUES), &frame, &channels).unwrap();

        assert_eq!(values(&updates), vec![(Channel::FinalMc, 7.0), (Channel::Flaps, 25.0)]);
    }

    #[test]
    fn test_unknown_request_rejected() {
        let frame = encode_response(&profile(), ADDRESS, &[0x00, 0x00]);
        let result = decode_response(&profile(), Request::read(0x7F), &frame, &ChannelSet::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_summary() {
        let summary = ProtocolProfile::summary();
        let channels = ChannelSet {
            temperature: Some(ProbeGroup { num_probes: 2 }),
            moisture_content: Some(ProbeGroup { num_probes: 1 }),
            equilibrium_moisture_content: Some(ProbeGroup { num_probes: 0 }),
            ..Default::default()
        };

        let mut payload = vec![0x02, 0x58, 0x00, 0x78, 0x00, 0xFA];
        let mut section = |count: u8, first: u16| {
            payload.push(count);
            for slot in 0..SUMMARY_PROBE_SLOTS as u16 {
                payload.extend_from_slice(&(first + slot).to_be_bytes());
            }
        };
        section(3, 0xF258); // temperature probes, flag nibble set
        section(3, 0x0064);
        section(3, 0x00C8);
        let frame = encode_response(&summary, ADDRESS, &payload);
        assert_eq!(frame.len(), SUMMARY_RESPONSE_LENGTH);

        let updates = decode_response(&summary, Request::summary(), &frame, &channels).unwrap();

        assert_eq!(
            values(&updates),
            vec![
                (Channel::Aggregate(Category::Temperature), 60.0),
                (Channel::Aggregate(Category::EquilibriumMoistureContent), 12.0),
                (Channel::Aggregate(Category::MoistureContent), 25.0),
                (Channel::Probe(Category::Temperature, 0), 60.0),
                (Channel::Probe(Category::Temperature, 1), 60.1),
                (Channel::Probe(Category::MoistureContent, 0), 20.0),
            ]
        );
    }

    fn full_summary_payload(count: u8) -> Vec<u8> {
        let mut payload = vec![0x02, 0x58, 0x00, 0x7B, 0x00, 0xFA];
        for first in [0x0190u16, 0x007B, 0x00C8] {
            payload.push(count);
            for slot in 0..SUMMARY_PROBE_SLOTS as u16 {
                payload.extend_from_slice(&(first + slot).to_be_bytes());
            }
        }
        payload
    }

    #[test]
    fn test_summary_probes_stop_at_section_slots() {
        let summary = ProtocolProfile::summary();
        let channels = ChannelSet {
            temperature: Some(ProbeGroup { num_probes: 20 }),
            equilibrium_moisture_content: Some(ProbeGroup { num_probes: 1 }),
            ..Default::default()
        };
        let frame = encode_response(&summary, ADDRESS, &full_summary_payload(20));
        assert_eq!(frame.len(), SUMMARY_RESPONSE_LENGTH);

        let updates = decode_response(&summary, Request::summary(), &frame, &channels).unwrap();

        let temperature_probes = updates
            .iter()
            .filter(|u| matches!(u.channel, Channel::Probe(Category::Temperature, _)))
            .count();
        assert_eq!(temperature_probes, SUMMARY_PROBE_SLOTS);
        assert_eq!(updates[0], Update { channel: Channel::Aggregate(Category::Temperature), value: 60.0 });
        assert_eq!(
            updates.last().copied(),
            Some(Update {
                channel: Channel::Probe(Category::EquilibriumMoistureContent, 0),
                value: 12.3,
            })
        );
    }

    #[test]
    fn test_summary_length_field_must_match() {
        let summary = ProtocolProfile::summary();
        let mut frame = encode_response(&summary, ADDRESS, &full_summary_payload(0));
        assert_eq!(validate_response(&summary, ADDRESS, &frame), Ok(()));

        frame[DTOUCH_LENGTH_OFFSET + 1] -= 1;
        let end = frame.len() - 2;
        let crc = crate::dtouch::crc::crc16_modbus(&frame[..end]);
        frame[end..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(
            validate_response(&summary, ADDRESS, &frame),
            Err(Rejection::UnexpectedLength {
                expected: SUMMARY_RESPONSE_LENGTH,
                actual: SUMMARY_RESPONSE_LENGTH - 1,
            })
        );
    }
}
