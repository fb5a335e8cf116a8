//! # Tempmon Library
//!
//! Read a SEM710 temperature transmitter over its serial protocol and
//! report the readings to a monitoring server.
//!
//! This library provides the framed request/reply protocol engine (CRC,
//! encoder, decoder, transaction manager) plus the collaborators one
//! polling cycle needs: serial link, server client and reading store.

pub mod config;
pub mod cycle;
pub mod error;
pub mod protocol;
pub mod reading;
pub mod serial;
pub mod server;
pub mod store;
pub mod transaction;
