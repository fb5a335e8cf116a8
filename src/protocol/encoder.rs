//! # SEM710 Request Encoder
//!
//! Serializes request frames into the bytes sent to the instrument.

use super::frame::*;
use crate::error::Result;

/// Encode a frame into its complete wire representation
///
/// The whole frame is returned as one buffer so the transport can flush it
/// in a single write.
///
/// # Arguments
///
/// * `frame` - Frame to serialize
///
/// # Returns
///
/// * `Vec<u8>` - Start marker, command, length, payload, CRC (LE) and end marker
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let (length, width) = frame.length_width().encode(frame.length());
    let crc = frame.crc().to_le_bytes();

    let mut bytes = Vec::with_capacity(frame.wire_len());
    bytes.push(FRAME_START);
    bytes.push(frame.command());
    bytes.extend_from_slice(&length[..width]);
    bytes.extend_from_slice(frame.payload());
    bytes.push(crc[0]); // CRC low byte
    bytes.push(crc[1]); // CRC high byte
    bytes.push(FRAME_END);

    bytes
}

/// Encode a request for `command` carrying `payload`
///
/// # Errors
///
/// Returns error if the payload does not fit in a frame
///
/// # Examples
///
/// ```
/// use tempmon::protocol::encoder::encode_request;
///
/// let bytes = encode_request(0x02, &[]).unwrap();
/// assert_eq!(bytes, vec![0x55, 0x02, 0x00, 0x00, 0xD0, 0x00, 0xAA]);
/// ```
pub fn encode_request(command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let frame = Frame::new(command, payload.to_vec())?;
    Ok(encode_frame(&frame))
}

/// Build the read-process request (empty payload)
pub fn read_process_request() -> Frame {
    Frame::from_wire(
        CMD_READ_PROCESS,
        LengthWidth::Two,
        bytes::Bytes::new(),
        checksum(CMD_READ_PROCESS, LengthWidth::Two, &[]),
    )
}
