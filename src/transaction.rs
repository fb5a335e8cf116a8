//! # Transaction Manager
//!
//! Runs one request/reply exchange with the instrument: write the request,
//! poll the link until the decoder produces a frame or the response timeout
//! expires, and retry the whole exchange a bounded number of times.
//!
//! All waiting goes through `tokio::time`, so tests drive the loop on paused
//! virtual time instead of sleeping.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::TransactionSettings;
use crate::protocol::decoder::{DecodeError, DecodeOutcome, FrameDecoder};
use crate::protocol::encoder::encode_frame;
use crate::protocol::frame::{CommandTable, Frame, MAX_PAYLOAD_SIZE, RX_BUFFER_SIZE};
use crate::serial::DeviceLink;

/// Default number of attempts per exchange
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default wait for a reply after each request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default delay between polls of an empty input buffer
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default pause before a retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Default extra time allowed to finish a frame already being received
pub const DEFAULT_FRAME_GRACE: Duration = Duration::from_millis(500);

/// Errors that escape an exchange
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Every attempt timed out or was rejected
    #[error("No reply from instrument after {attempts} attempts")]
    NoReply { attempts: u32 },

    /// The final attempt was answered with a frame for another command
    #[error("Reply command mismatch: expected 0x{expected:02X}, got 0x{received:02X}")]
    Mismatch { expected: u8, received: u8 },

    /// The link itself failed
    #[error("Link error: {0}")]
    Link(#[from] io::Error),
}

/// Timing and retry parameters of an exchange
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub poll_interval: Duration,
    pub response_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub frame_grace: Duration,
    pub table: CommandTable,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            frame_grace: DEFAULT_FRAME_GRACE,
            table: CommandTable::default(),
        }
    }
}

impl From<&TransactionSettings> for TransactionConfig {
    fn from(settings: &TransactionSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
            max_attempts: settings.max_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            frame_grace: Duration::from_millis(settings.frame_grace_ms),
            table: CommandTable::default(),
        }
    }
}

/// Why a single attempt did not produce a usable reply
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    TimedOut,
    Corrupt(DecodeError),
    Mismatch { expected: u8, received: u8 },
}

/// State of one exchange, discarded once it succeeds or runs out of attempts
struct Transaction<'a> {
    request: &'a Frame,
    encoded: Vec<u8>,
    expected_reply: u8,
    attempts_remaining: u32,
    config: &'a TransactionConfig,
}

impl<'a> Transaction<'a> {
    fn new(request: &'a Frame, config: &'a TransactionConfig) -> Self {
        Self {
            request,
            encoded: encode_frame(request),
            expected_reply: config.table.reply_command(request.command()),
            attempts_remaining: config.max_attempts,
            config,
        }
    }

    async fn run<L: DeviceLink + ?Sized>(
        mut self,
        link: &mut L,
    ) -> Result<Frame, TransactionError> {
        let mut last_failure = AttemptFailure::TimedOut;
        let mut attempt = 0;

        while self.attempts_remaining > 0 {
            if attempt > 0 {
                sleep(self.config.retry_delay).await;
            }
            self.attempts_remaining -= 1;
            attempt += 1;

            match self.attempt(link).await? {
                Ok(frame) => {
                    debug!(
                        "{} reply on attempt {}: {} payload bytes",
                        self.config.table.name(self.request.command()),
                        attempt,
                        frame.payload().len()
                    );
                    return Ok(frame);
                }
                Err(failure) => {
                    warn!(
                        "Attempt {}/{} failed: {:?} ({} left)",
                        attempt, self.config.max_attempts, failure, self.attempts_remaining
                    );
                    last_failure = failure;
                }
            }
        }

        Err(match last_failure {
            AttemptFailure::Mismatch { expected, received } => {
                TransactionError::Mismatch { expected, received }
            }
            _ => TransactionError::NoReply { attempts: attempt },
        })
    }

    /// Send the request once and wait for a terminal outcome
    ///
    /// The outer `Result` carries link failures, the inner one the attempt
    /// outcome.
    async fn attempt<L: DeviceLink + ?Sized>(
        &self,
        link: &mut L,
    ) -> Result<Result<Frame, AttemptFailure>, TransactionError> {
        link.clear_input().await?;
        link.write_all(&self.encoded).await?;
        link.flush().await?;
        debug!("Sent request: {:02X?}", self.encoded);

        // Start counting only once the request is out
        let deadline = Instant::now() + self.config.response_timeout;
        let hard_deadline = deadline + self.config.frame_grace;

        let mut decoder = FrameDecoder::with_table(self.config.table.clone());
        let mut buf = [0u8; RX_BUFFER_SIZE];

        loop {
            let now = Instant::now();
            // A frame that has started is given until the hard deadline
            if now >= deadline && (decoder.is_idle() || now >= hard_deadline) {
                return Ok(Err(AttemptFailure::TimedOut));
            }

            let available = link.bytes_available().await?;
            if available == 0 {
                sleep(self.config.poll_interval).await;
                continue;
            }

            let n = link
                .read_available(&mut buf[..available.min(RX_BUFFER_SIZE)])
                .await?;
            debug!("Received {} bytes: {:02X?}", n, &buf[..n]);

            let (outcome, _) = decoder.feed_slice(&buf[..n]);
            match outcome {
                DecodeOutcome::Incomplete => {}
                DecodeOutcome::Frame(frame) if frame.command() == self.expected_reply => {
                    return Ok(Ok(frame));
                }
                DecodeOutcome::Frame(frame) => {
                    return Ok(Err(AttemptFailure::Mismatch {
                        expected: self.expected_reply,
                        received: frame.command(),
                    }));
                }
                DecodeOutcome::Error(e) => return Ok(Err(AttemptFailure::Corrupt(e))),
            }
        }
    }
}

/// Execute one request/reply exchange
///
/// # Arguments
///
/// * `link` - Link to the instrument, owned for the whole exchange
/// * `request` - Request frame
/// * `config` - Timing and retry parameters
///
/// # Returns
///
/// * `Result<Frame, TransactionError>` - The validated reply
///
/// # Errors
///
/// - [`TransactionError::NoReply`] when every attempt timed out or was corrupt
/// - [`TransactionError::Mismatch`] when the last attempt was answered for
///   another command
/// - [`TransactionError::Link`] as soon as the link reports an I/O error
pub async fn execute<L: DeviceLink + ?Sized>(
    link: &mut L,
    request: &Frame,
    config: &TransactionConfig,
) -> Result<Frame, TransactionError> {
    debug_assert!(request.payload().len() <= MAX_PAYLOAD_SIZE);
    Transaction::new(request, config).run(link).await
}
