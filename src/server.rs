//! # Monitoring Server Client
//!
//! Fetches the runtime specifications for this container and uploads
//! readings back to the server.
//!
//! Specifications document:
//! ```json
//! {
//!   "specifications": {
//!     "nextUpdateIn": "600",
//!     "uploadURL": "12/readings/",
//!     "monitor": { "productID": "24577", "vendorID": "1027" },
//!     "expectedTemperature": "20.0",
//!     "temperatureRange": "2.5"
//!   }
//! }
//! ```
//!
//! Every value may also arrive as a plain JSON number.

use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{Result, TempmonError};
use crate::reading::TemperatureLimits;
use crate::store::ReportRecord;

const USER_AGENT: &str = concat!("tempmon/", env!("CARGO_PKG_VERSION"));

/// USB identifiers the server expects the instrument to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MonitorIds {
    #[serde(rename = "productID", deserialize_with = "number_or_string")]
    pub product_id: u32,

    #[serde(rename = "vendorID", deserialize_with = "number_or_string")]
    pub vendor_id: u32,
}

/// Per-container parameters published by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeSpecifications {
    /// Seconds after which an unchanged reading is uploaded anyway
    #[serde(rename = "nextUpdateIn", deserialize_with = "number_or_string")]
    pub next_update_in: i64,

    /// Upload path relative to the server root
    #[serde(rename = "uploadURL")]
    pub upload_url: String,

    pub monitor: MonitorIds,

    #[serde(rename = "expectedTemperature", deserialize_with = "number_or_string")]
    pub expected_temperature: f32,

    #[serde(rename = "temperatureRange", deserialize_with = "number_or_string")]
    pub temperature_range: f32,
}

#[derive(Deserialize)]
struct SpecificationsEnvelope {
    specifications: RuntimeSpecifications,
}

impl RuntimeSpecifications {
    /// Parse the server's specifications document
    ///
    /// # Errors
    ///
    /// Returns [`TempmonError::Server`] if the document is malformed or a
    /// parameter is missing.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str::<SpecificationsEnvelope>(body)
            .map(|envelope| envelope.specifications)
            .map_err(|e| TempmonError::Server(format!("Invalid specifications: {}", e)))
    }

    pub fn limits(&self) -> TemperatureLimits {
        TemperatureLimits::new(self.expected_temperature, self.temperature_range)
    }
}

/// Accept `600` as well as `"600"`
fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Integer(i64),
        Float(f64),
        Text(String),
    }

    let text = match Raw::deserialize(deserializer)? {
        Raw::Integer(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Text(s) => s,
    };

    text.trim().parse().map_err(de::Error::custom)
}

/// Sink for readings that passed the change filter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingUploader: Send + Sync {
    async fn upload(&self, record: &ReportRecord) -> Result<()>;
}

/// HTTP client for the monitoring server
#[derive(Debug, Clone)]
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
    specifications_url: String,
    credentials: Option<(String, String)>,
}

impl ServerClient {
    /// Build a client from the `[server]` configuration
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        let credentials = if config.username.is_empty() {
            None
        } else {
            Some((config.username.clone(), config.password.clone()))
        };

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            specifications_url: format!(
                "{}{}{}",
                config.base_url, config.container, config.spec_uri
            ),
            credentials,
        })
    }

    pub fn specifications_url(&self) -> &str {
        &self.specifications_url
    }

    /// Full upload URL for the given specifications
    pub fn upload_url(&self, specs: &RuntimeSpecifications) -> String {
        format!("{}{}", self.base_url, specs.upload_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    /// GET the runtime specifications for this container
    pub async fn fetch_specifications(&self) -> Result<RuntimeSpecifications> {
        debug!("Fetching specifications from {}", self.specifications_url);

        let response = self
            .authorize(self.client.get(&self.specifications_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TempmonError::Server(format!(
                "Specifications request failed: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let specs = RuntimeSpecifications::from_json(&body)?;

        info!(
            "Specifications: expected {:.1} ± {:.1} °C, update every {} s",
            specs.expected_temperature, specs.temperature_range, specs.next_update_in
        );
        Ok(specs)
    }

    /// Uploader bound to the upload URL from `specs`
    pub fn uploader(&self, specs: &RuntimeSpecifications) -> ServerUploader {
        ServerUploader {
            server: self.clone(),
            url: self.upload_url(specs),
        }
    }
}

/// PUTs records to the container's upload URL
#[derive(Debug, Clone)]
pub struct ServerUploader {
    server: ServerClient,
    url: String,
}

impl ServerUploader {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReadingUploader for ServerUploader {
    async fn upload(&self, record: &ReportRecord) -> Result<()> {
        debug!("Uploading reading to {}", self.url);

        let response = self
            .server
            .authorize(self.server.client.put(&self.url))
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TempmonError::Server(format!(
                "Upload failed: {}",
                response.status()
            )));
        }

        info!("Uploaded {} reading ({:.2} °C)", record.status, record.temperature);
        Ok(())
    }
}
