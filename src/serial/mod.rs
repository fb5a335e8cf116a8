//! # Serial Communication Module
//!
//! Handles the serial link to the SEM710 behind its FTDI USB bridge.
//!
//! This module handles:
//! - Opening the serial port at the instrument baud rate (8N1, no flow control)
//! - Falling back to common USB serial device paths
//! - Exposing the port as a [`DeviceLink`] for the transaction manager

pub mod port_trait;

pub use port_trait::{DeviceLink, TokioSerialPort};

use crate::config::SerialConfig;
use crate::error::{Result, TempmonError};
use tracing::{debug, info, warn};

/// SEM710 baud rate
pub const SEM710_BAUD_RATE: u32 = 19_200;

/// Device paths tried after the configured one (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // FTDI USB-to-serial bridges
    "/dev/ttyACM0", // USB CDC devices
];

/// SEM710 Serial Port Handler
///
/// Manages the connection to the instrument via USB serial.
pub struct InstrumentSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for InstrumentSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl InstrumentSerial {
    /// Open the instrument described by the `[serial]` configuration
    ///
    /// Tries the configured port first, then the default device paths.
    ///
    /// # Errors
    ///
    /// Returns error if no device could be opened
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut paths: Vec<&str> = vec![config.port.as_str()];
        paths.extend(
            DEFAULT_DEVICE_PATHS
                .iter()
                .copied()
                .filter(|path| *path != config.port),
        );

        Self::open_with_paths(&paths, config.baud_rate)
    }

    /// Open the instrument trying each of `paths` in turn
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened SEM710 at {} ({} baud)", path, baud_rate);
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

        Err(TempmonError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with SEM710 line settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TempmonError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the port over as a transaction link
    pub fn into_link(self) -> TokioSerialPort {
        TokioSerialPort::new(self.port)
    }
}
