//! # SEM710 Reply Decoder
//!
//! Byte-at-a-time receive state machine that rebuilds checksum-validated
//! frames from an arbitrarily chunked serial stream.
//!
//! After every terminal outcome (frame or error) the decoder returns to
//! [`ReceiveState::AwaitingStart`] and discards bytes until the next start
//! marker, so it resynchronises on its own after line noise.

use bytes::BytesMut;
use thiserror::Error;

use super::crc::Crc16;
use super::frame::*;

/// Reasons a frame is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Received CRC does not match the one computed over the frame
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    BadChecksum { expected: u16, received: u16 },

    /// Byte in the end marker position was not 0xAA
    #[error("Missing frame terminator: got 0x{0:02X}")]
    MissingTerminator(u8),

    /// Payload did not fit in the receive buffer
    #[error("Receive buffer overflow (capacity {capacity} bytes)")]
    Overflow { capacity: usize },
}

/// Current position of the decoder within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingStart,
    AwaitingCommand,
    /// Collecting the length field; `received` bytes of it so far
    AwaitingLength { received: usize },
    AwaitingData,
    AwaitingCrcLow,
    AwaitingCrcHigh,
    AwaitingEnd,
    Overflow,
}

/// Result of feeding one byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// More bytes are needed
    Incomplete,
    /// A complete, validated frame
    Frame(Frame),
    /// The frame in progress was rejected
    Error(DecodeError),
}

/// Receive state machine for SEM710 replies
#[derive(Debug)]
pub struct FrameDecoder {
    state: ReceiveState,
    table: CommandTable,
    buffer: BytesMut,
    capacity: usize,
    command: u8,
    length_width: LengthWidth,
    length: u16,
    crc_low: u8,
    received_crc: u16,
    expected_crc: u16,
}

impl FrameDecoder {
    /// Create a decoder with the built-in command table and the default
    /// receive buffer capacity ([`MAX_PAYLOAD_SIZE`])
    pub fn new() -> Self {
        Self::with_table(CommandTable::default())
    }

    pub fn with_table(table: CommandTable) -> Self {
        Self::with_buffer(table, BytesMut::with_capacity(MAX_PAYLOAD_SIZE), MAX_PAYLOAD_SIZE)
    }

    /// Create a decoder that accumulates payloads into `buffer`, holding at
    /// most `capacity` bytes
    pub fn with_buffer(table: CommandTable, mut buffer: BytesMut, capacity: usize) -> Self {
        buffer.clear();
        Self {
            state: ReceiveState::AwaitingStart,
            table,
            buffer,
            capacity,
            command: 0,
            length_width: DEFAULT_LENGTH_WIDTH,
            length: 0,
            crc_low: 0,
            received_crc: 0,
            expected_crc: 0,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// True when no frame is being accumulated
    pub fn is_idle(&self) -> bool {
        self.state == ReceiveState::AwaitingStart
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop any partial frame and wait for the next start marker
    pub fn reset(&mut self) {
        self.state = ReceiveState::AwaitingStart;
        self.buffer.clear();
        self.command = 0;
        self.length = 0;
        self.crc_low = 0;
        self.received_crc = 0;
        self.expected_crc = 0;
    }

    /// Feed one received byte into the state machine
    ///
    /// # Examples
    ///
    /// ```
    /// use tempmon::protocol::decoder::{DecodeOutcome, FrameDecoder};
    ///
    /// let mut decoder = FrameDecoder::new();
    /// let mut outcome = DecodeOutcome::Incomplete;
    /// for byte in [0x55, 0x02, 0x00, 0x00, 0xD0, 0x00, 0xAA] {
    ///     outcome = decoder.feed(byte);
    /// }
    /// assert!(matches!(outcome, DecodeOutcome::Frame(ref f) if f.command() == 0x02));
    /// ```
    pub fn feed(&mut self, byte: u8) -> DecodeOutcome {
        match self.state {
            ReceiveState::AwaitingStart => {
                if byte == FRAME_START {
                    self.reset();
                    self.state = ReceiveState::AwaitingCommand;
                }
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingCommand => {
                self.command = byte;
                self.length_width = self.table.length_width(byte);
                self.length = 0;
                self.state = ReceiveState::AwaitingLength { received: 0 };
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingLength { received } => {
                // Little-endian: first byte is the low byte
                self.length |= (byte as u16) << (8 * received);
                let received = received + 1;

                self.state = if received < self.length_width.bytes() {
                    ReceiveState::AwaitingLength { received }
                } else if self.length > 0 {
                    ReceiveState::AwaitingData
                } else {
                    ReceiveState::AwaitingCrcLow
                };
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingData => {
                if self.buffer.len() >= self.capacity {
                    self.state = ReceiveState::Overflow;
                    return self.feed(byte);
                }

                self.buffer.extend_from_slice(&[byte]);
                if self.buffer.len() == self.length as usize {
                    self.state = ReceiveState::AwaitingCrcLow;
                }
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingCrcLow => {
                self.crc_low = byte;
                self.state = ReceiveState::AwaitingCrcHigh;
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingCrcHigh => {
                self.received_crc = u16::from_le_bytes([self.crc_low, byte]);
                self.expected_crc = self.compute_expected_crc();
                self.state = ReceiveState::AwaitingEnd;
                DecodeOutcome::Incomplete
            }
            ReceiveState::AwaitingEnd => {
                let outcome = if byte != FRAME_END {
                    DecodeOutcome::Error(DecodeError::MissingTerminator(byte))
                } else if self.received_crc != self.expected_crc {
                    DecodeOutcome::Error(DecodeError::BadChecksum {
                        expected: self.expected_crc,
                        received: self.received_crc,
                    })
                } else {
                    let payload = self.buffer.split().freeze();
                    DecodeOutcome::Frame(Frame::from_wire(
                        self.command,
                        self.length_width,
                        payload,
                        self.received_crc,
                    ))
                };
                self.reset();
                outcome
            }
            ReceiveState::Overflow => {
                let capacity = self.capacity;
                self.reset();
                DecodeOutcome::Error(DecodeError::Overflow { capacity })
            }
        }
    }

    /// Feed a chunk of bytes, stopping at the first terminal outcome
    ///
    /// Returns the outcome and the number of bytes consumed. Bytes after a
    /// terminal outcome are left for the caller.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> (DecodeOutcome, usize) {
        for (index, &byte) in bytes.iter().enumerate() {
            match self.feed(byte) {
                DecodeOutcome::Incomplete => {}
                outcome => return (outcome, index + 1),
            }
        }
        (DecodeOutcome::Incomplete, bytes.len())
    }

    fn compute_expected_crc(&self) -> u16 {
        let (length, width) = self.length_width.encode(self.length);
        Crc16::new()
            .update(&[self.command])
            .update(&length[..width])
            .update(&self.buffer)
            .finish()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder::{encode_frame, encode_request};

    fn feed_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<DecodeOutcome> {
        bytes
            .iter()
            .map(|&b| decoder.feed(b))
            .filter(|outcome| *outcome != DecodeOutcome::Incomplete)
            .collect()
    }

    fn reply_payload() -> Vec<u8> {
        let mut payload = 21.5f32.to_le_bytes().to_vec();
        payload.push(0x00);
        payload
    }

    #[test]
    fn test_decode_read_process_request() {
        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &[0x55, 0x02, 0x00, 0x00, 0xD0, 0x00, 0xAA]);

        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            DecodeOutcome::Frame(frame) => {
                assert_eq!(frame.command(), CMD_READ_PROCESS);
                assert!(frame.payload().is_empty());
                assert_eq!(frame.crc(), 0x00D0);
            }
            other => panic!("Expected frame, got {:?}", other),
        }
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_round_trip_payloads() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![FRAME_START, FRAME_END, FRAME_START],
            reply_payload(),
            (0..=255u8).collect(),
            vec![0xA5; MAX_PAYLOAD_SIZE],
        ];

        let mut decoder = FrameDecoder::new();
        for (command, payload) in [0x02u8, 0x03, 0x55, 0xAA, 0x00, 0xFF].iter().zip(&payloads) {
            let bytes = encode_request(*command, payload).unwrap();
            let outcomes = feed_all(&mut decoder, &bytes);

            assert_eq!(outcomes.len(), 1, "command 0x{:02X}", command);
            match &outcomes[0] {
                DecodeOutcome::Frame(frame) => {
                    assert_eq!(frame.command(), *command);
                    assert_eq!(frame.payload(), payload);
                    assert!(frame.crc_is_valid());
                }
                other => panic!("Expected frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_one_byte_length_schema() {
        let mut table = CommandTable::default();
        table.insert(CommandSchema {
            command: 0x30,
            length_width: LengthWidth::One,
            reply_command: 0x30,
            name: "test",
        });

        let frame = Frame::with_width(0x30, LengthWidth::One, vec![0x01, 0x02, 0x03]).unwrap();
        let bytes = encode_frame(&frame);

        let mut decoder = FrameDecoder::with_table(table);
        let outcomes = feed_all(&mut decoder, &bytes);
        assert_eq!(outcomes, vec![DecodeOutcome::Frame(frame)]);
    }

    #[test]
    fn test_state_transitions() {
        let mut decoder = FrameDecoder::new();
        let payload = [0x11, 0x22];
        let bytes = encode_request(0x02, &payload).unwrap();

        let expected = [
            ReceiveState::AwaitingCommand,
            ReceiveState::AwaitingLength { received: 0 },
            ReceiveState::AwaitingLength { received: 1 },
            ReceiveState::AwaitingData,
            ReceiveState::AwaitingData,
            ReceiveState::AwaitingCrcLow,
            ReceiveState::AwaitingCrcHigh,
            ReceiveState::AwaitingEnd,
        ];

        assert_eq!(decoder.state(), ReceiveState::AwaitingStart);
        for (i, &byte) in bytes.iter().enumerate().take(bytes.len() - 1) {
            decoder.feed(byte);
            assert_eq!(decoder.state(), expected[i], "after byte {}", i);
        }
        assert!(matches!(decoder.feed(FRAME_END), DecodeOutcome::Frame(_)));
        assert_eq!(decoder.state(), ReceiveState::AwaitingStart);
    }

    #[test]
    fn test_zero_length_skips_data_state() {
        let mut decoder = FrameDecoder::new();
        for byte in [0x55, 0x02, 0x00, 0x00] {
            decoder.feed(byte);
        }
        assert_eq!(decoder.state(), ReceiveState::AwaitingCrcLow);
    }

    #[test]
    fn test_noise_before_frame_resyncs() {
        let mut stream = vec![0x00, 0x13, 0xAA, 0xFF, 0x42, 0x99];
        stream.extend(encode_request(0x02, &reply_payload()).unwrap());

        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &stream);

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], DecodeOutcome::Frame(f) if f.payload() == &reply_payload()));
    }

    #[test]
    fn test_spurious_start_in_noise_resyncs() {
        // A stray start marker begins a bogus frame which fails, then the
        // real frame is still found
        let mut stream = vec![0x55, 0x02, 0x00, 0x00, 0x12, 0x34, 0x00];
        stream.extend(encode_request(0x02, &reply_payload()).unwrap());

        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &stream);

        let frames: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, DecodeOutcome::Frame(_)))
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(outcomes[0], DecodeOutcome::Error(DecodeError::MissingTerminator(0x00)));
    }

    #[test]
    fn test_noise_alone_never_yields_frame() {
        // Deterministic pseudo-random noise without start markers
        let mut seed: u32 = 0x1234_5678;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (seed >> 16) as u8
            })
            .collect();

        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &noise);
        assert!(outcomes.iter().all(|o| !matches!(o, DecodeOutcome::Frame(_))));

        let quiet: Vec<u8> = noise.into_iter().filter(|&b| b != FRAME_START).collect();
        let mut decoder = FrameDecoder::new();
        assert!(feed_all(&mut decoder, &quiet).is_empty());
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_bad_checksum() {
        let mut bytes = encode_request(0x02, &reply_payload()).unwrap();
        let crc_index = bytes.len() - 3;
        bytes[crc_index] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &bytes);
        assert!(matches!(outcomes[..], [DecodeOutcome::Error(DecodeError::BadChecksum { .. })]));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_single_bit_flips_are_detected() {
        let bytes = encode_request(0x02, &reply_payload()).unwrap();
        // Command, payload and CRC bytes. Flips in the length field or the
        // markers change the framing itself and are tested separately.
        let covered = (1..2).chain(4..bytes.len() - 1);

        for index in covered {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;

                let mut decoder = FrameDecoder::new();
                let outcomes = feed_all(&mut decoder, &corrupted);
                assert_eq!(outcomes.len(), 1, "byte {} bit {}", index, bit);
                assert!(
                    matches!(outcomes[0], DecodeOutcome::Error(DecodeError::BadChecksum { .. })),
                    "byte {} bit {}: {:?}",
                    index,
                    bit,
                    outcomes[0]
                );
            }
        }
    }

    #[test]
    fn test_length_bit_flip_never_yields_frame() {
        let bytes = encode_request(0x02, &reply_payload()).unwrap();

        for index in 2..4 {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;
                // Pad so a longer declared length can run to completion
                corrupted.extend(std::iter::repeat(0u8).take(MAX_PAYLOAD_SIZE + 8));

                let mut decoder = FrameDecoder::new();
                let outcomes = feed_all(&mut decoder, &corrupted);
                assert!(!outcomes.is_empty());
                assert!(outcomes.iter().all(|o| !matches!(o, DecodeOutcome::Frame(_))));
            }
        }
    }

    #[test]
    fn test_missing_terminator() {
        let mut bytes = encode_request(0x02, &[]).unwrap();
        let end = bytes.len() - 1;
        bytes[end] = 0x00;

        let mut decoder = FrameDecoder::new();
        let outcomes = feed_all(&mut decoder, &bytes);
        assert_eq!(outcomes, vec![DecodeOutcome::Error(DecodeError::MissingTerminator(0x00))]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_overflow_then_recovers() {
        let capacity = 16;
        let mut decoder =
            FrameDecoder::with_buffer(CommandTable::default(), BytesMut::new(), capacity);

        // Declares 32 payload bytes, more than the 16 byte buffer
        let mut stream = vec![0x55, 0x02, 0x20, 0x00];
        stream.extend(std::iter::repeat(0x00).take(capacity + 1));

        let outcomes = feed_all(&mut decoder, &stream);
        assert_eq!(outcomes, vec![DecodeOutcome::Error(DecodeError::Overflow { capacity })]);
        assert_eq!(decoder.state(), ReceiveState::AwaitingStart);

        let valid = encode_request(0x02, &[0x01, 0x02]).unwrap();
        let outcomes = feed_all(&mut decoder, &valid);
        assert!(matches!(&outcomes[..], [DecodeOutcome::Frame(f)] if f.payload() == &[0x01u8, 0x02][..]));
    }

    #[test]
    fn test_overflow_with_default_capacity() {
        let mut decoder = FrameDecoder::new();
        let mut stream = vec![0x55, 0x02, 0xFF, 0xFF];
        stream.extend(std::iter::repeat(0x00).take(MAX_PAYLOAD_SIZE + 1));

        let outcomes = feed_all(&mut decoder, &stream);
        assert_eq!(
            outcomes,
            vec![DecodeOutcome::Error(DecodeError::Overflow { capacity: MAX_PAYLOAD_SIZE })]
        );
    }

    #[test]
    fn test_feed_slice_stops_at_frame() {
        let mut stream = encode_request(0x02, &[0x01]).unwrap();
        let first_len = stream.len();
        stream.extend(encode_request(0x02, &[0x02]).unwrap());

        let mut decoder = FrameDecoder::new();
        let (outcome, consumed) = decoder.feed_slice(&stream);
        assert!(matches!(outcome, DecodeOutcome::Frame(ref f) if f.payload() == &[0x01u8][..]));
        assert_eq!(consumed, first_len);

        let (outcome, consumed) = decoder.feed_slice(&stream[first_len..]);
        assert!(matches!(outcome, DecodeOutcome::Frame(ref f) if f.payload() == &[0x02u8][..]));
        assert_eq!(consumed, stream.len() - first_len);
    }

    #[test]
    fn test_chunked_input() {
        let bytes = encode_request(0x02, &reply_payload()).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut frames = 0;
        for chunk in bytes.chunks(3) {
            let (outcome, _) = decoder.feed_slice(chunk);
            if let DecodeOutcome::Frame(_) = outcome {
                frames += 1;
            }
        }
        assert_eq!(frames, 1);
    }
}
