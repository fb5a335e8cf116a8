//! # Reading Extractor & Change Filter
//!
//! Turns a validated reply frame into a [`Reading`] and decides whether
//! it is worth uploading.
//!
//! Read-process reply payload:
//! ```text
//! [TEMP_B0][TEMP_B1][TEMP_B2][TEMP_B3][STATUS?]
//! ```
//! - `TEMP`: process temperature in °C, IEEE-754 `f32` little-endian
//! - `STATUS`: optional instrument status byte, non-zero means a sensor fault

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::frame::{Frame, CMD_READ_PROCESS};
use crate::store::ReportRecord;

/// Previous status assumed when no earlier reading was stored
pub const FIRST_RUN_STATUS: &str = "FIRST_WRITE_OK";

/// Bytes of the temperature field at the start of the payload
const TEMPERATURE_LEN: usize = 4;

/// Offset of the optional status byte
const STATUS_OFFSET: usize = 4;

/// Errors raised while interpreting a reply payload
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractError {
    #[error("No reading schema for command 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },

    #[error("Temperature is not a finite number")]
    InvalidTemperature,
}

/// Classification of a temperature against the server's limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    Ok,
    High,
    Low,
    SensorFault,
}

impl ReadingStatus {
    /// Wire tag, as stored and uploaded
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingStatus::Ok => "OK",
            ReadingStatus::High => "HIGH",
            ReadingStatus::Low => "LOW",
            ReadingStatus::SensorFault => "SENSOR_FAULT",
        }
    }
}

impl std::fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptable temperature band supplied by the server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureLimits {
    /// Target temperature in °C
    pub expected: f32,
    /// Allowed deviation either side of `expected`
    pub range: f32,
}

impl TemperatureLimits {
    pub fn new(expected: f32, range: f32) -> Self {
        Self { expected, range }
    }

    /// Classify a temperature against this band
    pub fn classify(&self, temperature: f32) -> ReadingStatus {
        if temperature > self.expected + self.range {
            ReadingStatus::High
        } else if temperature < self.expected - self.range {
            ReadingStatus::Low
        } else {
            ReadingStatus::Ok
        }
    }
}

/// One interpreted instrument reading
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub status: ReadingStatus,
    pub raw_payload: Vec<u8>,
}

/// Interpret a reply frame
///
/// # Errors
///
/// - [`ExtractError::UnknownCommand`] if the frame's command has no schema
/// - [`ExtractError::PayloadTooShort`] if the temperature field is truncated
/// - [`ExtractError::InvalidTemperature`] for NaN or infinite values
pub fn extract(frame: &Frame, limits: &TemperatureLimits) -> Result<Reading, ExtractError> {
    if frame.command() != CMD_READ_PROCESS {
        return Err(ExtractError::UnknownCommand(frame.command()));
    }

    let payload = frame.payload();
    let Some(temp_bytes) = payload.get(..TEMPERATURE_LEN) else {
        return Err(ExtractError::PayloadTooShort {
            expected: TEMPERATURE_LEN,
            actual: payload.len(),
        });
    };

    let mut raw = [0u8; TEMPERATURE_LEN];
    raw.copy_from_slice(temp_bytes);
    let temperature = f32::from_le_bytes(raw);
    if !temperature.is_finite() {
        return Err(ExtractError::InvalidTemperature);
    }

    let status = match payload.get(STATUS_OFFSET) {
        Some(&code) if code != 0 => ReadingStatus::SensorFault,
        _ => limits.classify(temperature),
    };

    debug!("Extracted reading: {:.2} °C ({})", temperature, status);

    Ok(Reading {
        temperature,
        status,
        raw_payload: payload.to_vec(),
    })
}

/// Decide whether a reading should be uploaded
///
/// True when the status changed since the last stored reading, or the
/// server's update interval has run out.
pub fn should_report(current: &Reading, previous_status: &str, min_interval_elapsed: bool) -> bool {
    current.status.as_str() != previous_status || min_interval_elapsed
}

/// Whether `next_update_in` seconds have passed since the previous record
pub fn interval_elapsed(
    previous: Option<&ReportRecord>,
    next_update_in: i64,
    now: DateTime<Utc>,
) -> bool {
    if next_update_in <= 0 {
        return true;
    }

    match previous {
        None => true,
        Some(record) => (now - record.timestamp).num_seconds() >= next_update_in,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn limits() -> TemperatureLimits {
        TemperatureLimits::new(20.0, 2.0)
    }

    fn reply(temperature: f32, status: Option<u8>) -> Frame {
        let mut payload = temperature.to_le_bytes().to_vec();
        payload.extend(status);
        Frame::new(CMD_READ_PROCESS, payload).unwrap()
    }

    fn reading(status: ReadingStatus) -> Reading {
        Reading {
            temperature: 20.0,
            status,
            raw_payload: Vec::new(),
        }
    }

    fn record_at(timestamp: DateTime<Utc>) -> ReportRecord {
        ReportRecord {
            container: "12".to_string(),
            temperature: 20.0,
            status: "OK".to_string(),
            timestamp,
            raw_payload: Vec::new(),
        }
    }

    #[test]
    fn test_extract_within_range() {
        let reading = extract(&reply(21.5, Some(0)), &limits()).unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert_eq!(reading.raw_payload, vec![0x00, 0x00, 0xAC, 0x41, 0x00]);
    }

    #[test]
    fn test_extract_without_status_byte() {
        let reading = extract(&reply(19.0, None), &limits()).unwrap();
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert_eq!(reading.raw_payload.len(), 4);
    }

    #[test]
    fn test_extract_high_and_low() {
        assert_eq!(extract(&reply(22.5, None), &limits()).unwrap().status, ReadingStatus::High);
        assert_eq!(extract(&reply(17.5, None), &limits()).unwrap().status, ReadingStatus::Low);
    }

    #[test]
    fn test_band_edges_are_ok() {
        assert_eq!(limits().classify(22.0), ReadingStatus::Ok);
        assert_eq!(limits().classify(18.0), ReadingStatus::Ok);
    }

    #[test]
    fn test_sensor_fault_overrides_band() {
        let reading = extract(&reply(20.0, Some(0x03)), &limits()).unwrap();
        assert_eq!(reading.status, ReadingStatus::SensorFault);
    }

    #[test]
    fn test_extract_unknown_command() {
        let frame = Frame::new(0x7E, vec![0u8; 5]).unwrap();
        assert_eq!(
            extract(&frame, &limits()),
            Err(ExtractError::UnknownCommand(0x7E))
        );
    }

    #[test]
    fn test_extract_short_payload() {
        let frame = Frame::new(CMD_READ_PROCESS, vec![0x00, 0x00, 0xAC]).unwrap();
        assert_eq!(
            extract(&frame, &limits()),
            Err(ExtractError::PayloadTooShort { expected: 4, actual: 3 })
        );
    }

    #[test]
    fn test_extract_empty_payload() {
        let frame = Frame::new(CMD_READ_PROCESS, Vec::new()).unwrap();
        assert!(matches!(
            extract(&frame, &limits()),
            Err(ExtractError::PayloadTooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn test_extract_rejects_non_finite() {
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert_eq!(
                extract(&reply(value, Some(0)), &limits()),
                Err(ExtractError::InvalidTemperature)
            );
        }
    }

    #[test]
    fn test_status_tags() {
        assert_eq!(ReadingStatus::Ok.as_str(), "OK");
        assert_eq!(ReadingStatus::SensorFault.to_string(), "SENSOR_FAULT");
        assert_eq!(
            serde_json::to_string(&ReadingStatus::High).unwrap(),
            "\"HIGH\""
        );
        let parsed: ReadingStatus = serde_json::from_str("\"SENSOR_FAULT\"").unwrap();
        assert_eq!(parsed, ReadingStatus::SensorFault);
    }

    #[test]
    fn test_should_report_same_status_interval_pending() {
        assert!(!should_report(&reading(ReadingStatus::Ok), "OK", false));
    }

    #[test]
    fn test_should_report_status_changed() {
        assert!(should_report(&reading(ReadingStatus::High), "OK", false));
        assert!(should_report(&reading(ReadingStatus::High), "OK", true));
    }

    #[test]
    fn test_should_report_interval_elapsed() {
        assert!(should_report(&reading(ReadingStatus::Ok), "OK", true));
    }

    #[test]
    fn test_first_run_always_reports() {
        for status in [
            ReadingStatus::Ok,
            ReadingStatus::High,
            ReadingStatus::Low,
            ReadingStatus::SensorFault,
        ] {
            assert!(should_report(&reading(status), FIRST_RUN_STATUS, false));
        }
    }

    #[test]
    fn test_interval_elapsed() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let previous = record_at(now - Duration::seconds(600));

        assert!(interval_elapsed(Some(&previous), 600, now));
        assert!(interval_elapsed(Some(&previous), 300, now));
        assert!(!interval_elapsed(Some(&previous), 601, now));
    }

    #[test]
    fn test_interval_elapsed_without_previous() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(interval_elapsed(None, 3600, now));
    }

    #[test]
    fn test_interval_elapsed_non_positive_interval() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let previous = record_at(now);
        assert!(interval_elapsed(Some(&previous), 0, now));
        assert!(interval_elapsed(Some(&previous), -5, now));
    }
}
