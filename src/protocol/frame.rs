//! # SEM710 Frame Constants and Types
//!
//! Core protocol definitions shared by the encoder and the decoder.
//!
//! Wire layout:
//!
//! ```text
//! 0x55 | command | length (1 or 2 bytes, LE) | payload | crc lo | crc hi | 0xAA
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::crc::Crc16;
use crate::error::{Result, TempmonError};

/// Frame start marker (always 0x55)
pub const FRAME_START: u8 = 0x55;

/// Frame end marker (always 0xAA)
pub const FRAME_END: u8 = 0xAA;

/// Read process value command (cREAD_PROCESS)
pub const CMD_READ_PROCESS: u8 = 0x02;

/// Receive buffer size of the instrument driver
pub const RX_BUFFER_SIZE: usize = 280;

/// Bytes a frame carries besides its payload with a two-byte length:
/// start(1) + command(1) + length(2) + crc(2) + end(1)
pub const FRAME_OVERHEAD: usize = 7;

/// Maximum payload size accepted in either direction
pub const MAX_PAYLOAD_SIZE: usize = RX_BUFFER_SIZE - FRAME_OVERHEAD;

/// Width of the length field for a given command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWidth {
    One,
    Two,
}

impl LengthWidth {
    /// Number of bytes the field occupies on the wire
    pub fn bytes(self) -> usize {
        match self {
            LengthWidth::One => 1,
            LengthWidth::Two => 2,
        }
    }

    /// Largest payload length the field can express
    pub fn max_length(self) -> usize {
        match self {
            LengthWidth::One => u8::MAX as usize,
            LengthWidth::Two => u16::MAX as usize,
        }
    }

    /// Encode a length value, little-endian, truncated to the field width
    pub fn encode(self, length: u16) -> ([u8; 2], usize) {
        (length.to_le_bytes(), self.bytes())
    }
}

/// Framing schema for one command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSchema {
    /// Command byte sent in the request
    pub command: u8,

    /// Width of the length field used by request and reply
    pub length_width: LengthWidth,

    /// Command byte the instrument answers with
    pub reply_command: u8,

    /// Human readable name used in logs
    pub name: &'static str,
}

/// Commands whose framing is known from the instrument documentation
pub const KNOWN_COMMANDS: &[CommandSchema] = &[CommandSchema {
    command: CMD_READ_PROCESS,
    length_width: LengthWidth::Two,
    reply_command: CMD_READ_PROCESS,
    name: "read-process",
}];

/// Length width for commands not present in a table
pub const DEFAULT_LENGTH_WIDTH: LengthWidth = LengthWidth::Two;

/// Lookup table of command schemas keyed by command byte
///
/// Unknown commands fall back to a two-byte length field and are expected to
/// be echoed in the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    schemas: HashMap<u8, CommandSchema>,
}

impl CommandTable {
    /// Create an empty table where every command uses the defaults
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Register or replace a command schema
    pub fn insert(&mut self, schema: CommandSchema) -> Option<CommandSchema> {
        self.schemas.insert(schema.command, schema)
    }

    pub fn get(&self, command: u8) -> Option<&CommandSchema> {
        self.schemas.get(&command)
    }

    pub fn length_width(&self, command: u8) -> LengthWidth {
        self.get(command)
            .map(|schema| schema.length_width)
            .unwrap_or(DEFAULT_LENGTH_WIDTH)
    }

    /// Command byte expected in the reply to `command`
    pub fn reply_command(&self, command: u8) -> u8 {
        self.get(command)
            .map(|schema| schema.reply_command)
            .unwrap_or(command)
    }

    pub fn name(&self, command: u8) -> &'static str {
        self.get(command).map(|schema| schema.name).unwrap_or("unknown")
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for schema in KNOWN_COMMANDS {
            table.insert(*schema);
        }
        table
    }
}

/// Length width of a built-in command, without building a table
fn known_length_width(command: u8) -> LengthWidth {
    KNOWN_COMMANDS
        .iter()
        .find(|schema| schema.command == command)
        .map(|schema| schema.length_width)
        .unwrap_or(DEFAULT_LENGTH_WIDTH)
}

/// One SEM710 protocol frame
///
/// Immutable once built. Requests are created with [`Frame::new`], replies
/// only come out of the decoder after their end marker has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: u8,
    length_width: LengthWidth,
    payload: Bytes,
    crc: u16,
}

impl Frame {
    /// Create a new request frame using the built-in command schemas
    ///
    /// # Arguments
    ///
    /// * `command` - Command byte
    /// * `payload` - Payload data (max [`MAX_PAYLOAD_SIZE`] bytes)
    ///
    /// # Errors
    ///
    /// Returns error if the payload exceeds the receive buffer or the
    /// command's length field
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Result<Self> {
        Self::with_width(command, known_length_width(command), payload)
    }

    /// Create a new request frame with an explicit length field width
    pub fn with_width(
        command: u8,
        length_width: LengthWidth,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let payload = payload.into();
        let limit = MAX_PAYLOAD_SIZE.min(length_width.max_length());

        if payload.len() > limit {
            return Err(TempmonError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                limit
            )));
        }

        let crc = checksum(command, length_width, &payload);

        Ok(Self {
            command,
            length_width,
            payload,
            crc,
        })
    }

    /// Assemble a decoded frame, keeping the CRC that was on the wire
    pub(crate) fn from_wire(
        command: u8,
        length_width: LengthWidth,
        payload: Bytes,
        crc: u16,
    ) -> Self {
        Self {
            command,
            length_width,
            payload,
            crc,
        }
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn length_width(&self) -> LengthWidth {
        self.length_width
    }

    /// Payload length as carried in the length field
    pub fn length(&self) -> u16 {
        // Bounded by MAX_PAYLOAD_SIZE on construction
        self.payload.len() as u16
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// CRC carried by (or computed for) this frame
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Recompute the checksum and compare it with the stored one
    pub fn crc_is_valid(&self) -> bool {
        checksum(self.command, self.length_width, &self.payload) == self.crc
    }

    /// Total number of bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        1 + 1 + self.length_width.bytes() + self.payload.len() + 2 + 1
    }
}

/// CRC over command ‖ length ‖ payload
pub(crate) fn checksum(command: u8, length_width: LengthWidth, payload: &[u8]) -> u16 {
    let (length, width) = length_width.encode(payload.len() as u16);
    Crc16::new()
        .update(&[command])
        .update(&length[..width])
        .update(payload)
        .finish()
}
