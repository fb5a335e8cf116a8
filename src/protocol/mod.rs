//! # SEM710 Protocol Module
//!
//! Implementation of the framed request/response protocol spoken by the
//! SEM710 temperature transmitter over its USB serial interface.
//!
//! This module handles:
//! - CRC-16 (reflected, polynomial 0xA001) checksum calculation
//! - Request frame encoding
//! - Byte-at-a-time reply decoding with resynchronisation
//! - Per-command framing schemas

pub mod crc;
pub mod frame;
pub mod encoder;
pub mod decoder;
