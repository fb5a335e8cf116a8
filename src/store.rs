//! # Reading Store
//!
//! Keeps the last uploaded reading between invocations so the next cycle
//! can tell whether anything changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::reading::Reading;

/// Reading as uploaded to the server and kept on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub container: String,
    pub temperature: f32,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: Vec<u8>,
}

impl ReportRecord {
    pub fn new(container: impl Into<String>, reading: &Reading, timestamp: DateTime<Utc>) -> Self {
        Self {
            container: container.into(),
            temperature: reading.temperature,
            status: reading.status.as_str().to_string(),
            timestamp,
            raw_payload: reading.raw_payload.clone(),
        }
    }
}

/// Get/put access to the previous cycle's record
#[cfg_attr(test, mockall::automock)]
pub trait ReadingStore {
    /// Last stored record, if there is a usable one
    fn load(&self) -> Option<ReportRecord>;

    /// Replace the stored record
    fn save(&self, record: &ReportRecord) -> Result<()>;
}

/// [`ReadingStore`] backed by a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadingStore for JsonFileStore {
    fn load(&self) -> Option<ReportRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No previous reading at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, record: &ReportRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, json)?;
        debug!("Saved reading to {}", self.path.display());
        Ok(())
    }
}
