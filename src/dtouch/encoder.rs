//! # dTouch Packet Encoder
//!
//! Serializes requests (and, for simulators and tests, responses) into
//! complete dTouch frames.

use bytes::{BufMut, BytesMut};

use super::crc::{crc16_modbus_update, CRC16_INIT};
use super::protocol::*;

/// Encode a request into a complete dTouch frame
///
/// Layout: `address | marker | length (BE) | command | selector? | crc (LE)`,
/// where length counts the command byte plus the selector.
///
/// # Examples
///
/// ```
/// use dtouch_link::dtouch::encoder::encode_request;
/// use dtouch_link::dtouch::protocol::{ProtocolProfile, Request, SELECTOR_TEMPERATURE};
///
/// let frame = encode_request(&ProtocolProfile::multi_query(), 0x01, Request::read(SELECTOR_TEMPERATURE));
/// assert_eq!(&frame[..8], &[0x01, 0x80, 0x00, 0x00, 0x00, 0x02, b'P', 0x03]);
/// assert_eq!(frame.len(), 10);
/// ```
pub fn encode_request(profile: &ProtocolProfile, address: u8, request: Request) -> Vec<u8> {
    let arg_len = usize::from(request.selector.is_some());
    let mut frame = BytesMut::with_capacity(1 + profile.request_marker.len() + 2 + 1 + arg_len + 2);

    frame.put_u8(address);
    frame.put_slice(profile.request_marker);
    let crc = crc16_modbus_update(&frame, CRC16_INIT);

    let body_start = frame.len();
    frame.put_u16((1 + arg_len) as u16);
    frame.put_u8(request.command);
    if let Some(selector) = request.selector {
        frame.put_u8(selector);
    }
    let crc = crc16_modbus_update(&frame[body_start..], crc);

    frame.put_u16_le(crc);
    frame.to_vec()
}

/// Encode a response frame as a controller would send it
///
/// Bytes between the marker and the length field are zero-filled.
pub fn encode_response(profile: &ProtocolProfile, address: u8, payload: &[u8]) -> Vec<u8> {
    let total = payload.len() + profile.length_bias;
    let mut frame = BytesMut::with_capacity(total);

    frame.put_u8(address);
    frame.put_slice(profile.response_marker);
    while frame.len() < profile.length_offset {
        frame.put_u8(0x00);
    }
    frame.put_u16(payload.len() as u16);
    while frame.len() < profile.header_len {
        frame.put_u8(0x00);
    }
    frame.put_slice(payload);

    let crc = crc16_modbus_update(&frame, CRC16_INIT);
    frame.put_u16_le(crc);
    frame.to_vec()
}
