//! Performance Recorder.
//!
//! Writes one record per successful cycle. A record is keyed by the compound
//! transaction, so recording the same transaction twice is acknowledged as
//! [`RecordAck::AlreadyRecorded`] instead of producing a second row. Record
//! timestamps per vault must strictly increase.

use tracing::{debug, info, warn};
use vaultkeep_db::queries::performance::StoreOutcome;
use vaultkeep_types::{PerformanceRecord, Timestamp};

use crate::store::{Store, StoreError};

/// Successful outcome of [`Recorder::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAck {
    /// New row id.
    Recorded(i64),
    AlreadyRecorded,
}

/// Recorder errors.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("non-monotonic timestamp: {new} <= {last}")]
    NonMonotonicTimestamp { new: Timestamp, last: Timestamp },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Recorder {
    store: Store,
}

impl Recorder {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Persist `record`, written at `now`.
    pub async fn record(
        &self,
        record: &PerformanceRecord,
        now: Timestamp,
    ) -> Result<RecordAck, RecordError> {
        if self.store.performance_exists(&record.tx_ref).await? {
            debug!(digest = %record.tx_ref, "performance already recorded");
            return Ok(RecordAck::AlreadyRecorded);
        }

        if let Some(last) = self.store.latest_vault_performance(record.vault_id).await? {
            if record.timestamp <= last.timestamp {
                return Err(RecordError::NonMonotonicTimestamp {
                    new: record.timestamp,
                    last: last.timestamp,
                });
            }
        }

        let ack = match self.store.store_vault_performance(record, now).await? {
            StoreOutcome::Inserted(id) => RecordAck::Recorded(id),
            StoreOutcome::Duplicate => RecordAck::AlreadyRecorded,
        };

        let missing = record.missing_feeds();
        info!(
            vault_id = record.vault_id,
            digest = %record.tx_ref,
            tvl = ?record.metrics.tvl,
            earned = ?record.metrics.earned,
            missing_feeds = missing.len(),
            "performance recorded"
        );

        // Price history is secondary; a failure here never fails the record.
        for sample in record.prices.values().flatten() {
            if let Err(error) = self.store.store_price_sample(sample, now).await {
                warn!(feed = %sample.feed_id, %error, "could not store price sample");
            }
        }

        Ok(ack)
    }
}
