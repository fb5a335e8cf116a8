//! Trait abstraction for the instrument's byte channel to enable testing

use async_trait::async_trait;
use std::io;

/// Duplex byte channel to the instrument
///
/// The link is owned by one transaction at a time; nothing else reads or
/// writes it while an exchange is running.
#[async_trait]
pub trait DeviceLink: Send {
    /// Write all data to the link
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Number of received bytes that can be read without blocking
    async fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` already received bytes
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard anything sitting in the input buffer
    async fn clear_input(&mut self) -> io::Result<()>;
}

/// Wrapper around tokio_serial::SerialStream that implements DeviceLink
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl DeviceLink for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn bytes_available(&mut self) -> io::Result<usize> {
        use tokio_serial::SerialPort;
        let available = self.port.bytes_to_read().map_err(io::Error::from)?;
        Ok(available as usize)
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }

    async fn clear_input(&mut self) -> io::Result<()> {
        use tokio_serial::{ClearBuffer, SerialPort};
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}
