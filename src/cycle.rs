//! # Polling Cycle
//!
//! One read of the instrument: query it, classify the temperature, and
//! upload and store the result when it is worth reporting.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::encoder::read_process_request;
use crate::reading::{self, Reading, TemperatureLimits, FIRST_RUN_STATUS};
use crate::serial::DeviceLink;
use crate::server::{ReadingUploader, RuntimeSpecifications};
use crate::store::{ReadingStore, ReportRecord};
use crate::transaction::{self, TransactionConfig};

/// Everything a cycle needs besides its collaborators
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub container: String,
    pub limits: TemperatureLimits,
    /// Seconds after which an unchanged reading is reported anyway
    pub next_update_in: i64,
    pub transaction: TransactionConfig,
    pub now: DateTime<Utc>,
}

impl CycleContext {
    /// Context for a cycle starting now
    pub fn new(
        container: impl Into<String>,
        specs: &RuntimeSpecifications,
        transaction: TransactionConfig,
    ) -> Self {
        Self {
            container: container.into(),
            limits: specs.limits(),
            next_update_in: specs.next_update_in,
            transaction,
            now: Utc::now(),
        }
    }
}

/// What a completed cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The reading was uploaded and stored
    Reported(ReportRecord),
    /// Same status as last time and the update interval has not run out
    Unchanged(Reading),
}

/// Run one polling cycle
///
/// The record is only stored after the upload succeeded, so a failed
/// upload is retried by the next cycle.
///
/// # Errors
///
/// - Transaction or extraction failures, before anything is uploaded
/// - Upload failures, in which case nothing is stored
/// - Store write failures
pub async fn run_cycle<L, S, U>(
    link: &mut L,
    store: &S,
    uploader: &U,
    context: &CycleContext,
) -> Result<CycleOutcome>
where
    L: DeviceLink + ?Sized,
    S: ReadingStore + ?Sized,
    U: ReadingUploader + ?Sized,
{
    let previous = store.load();
    let previous_status = previous
        .as_ref()
        .map_or(FIRST_RUN_STATUS, |record| record.status.as_str());

    let reply = transaction::execute(link, &read_process_request(), &context.transaction).await?;
    let reading = reading::extract(&reply, &context.limits)?;

    let elapsed = reading::interval_elapsed(previous.as_ref(), context.next_update_in, context.now);
    if !reading::should_report(&reading, previous_status, elapsed) {
        debug!(
            "Status {} unchanged and update not due, skipping upload",
            reading.status
        );
        return Ok(CycleOutcome::Unchanged(reading));
    }

    info!(
        "Reporting {:.2} °C ({}, previously {})",
        reading.temperature, reading.status, previous_status
    );

    let record = ReportRecord::new(context.container.clone(), &reading, context.now);
    uploader.upload(&record).await?;
    store.save(&record)?;

    Ok(CycleOutcome::Reported(record))
}
