//! In-memory port implementations for development/testing. Each one records
//! the calls it receives and can be switched into a failing mode.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::app::ports::{
    Alert, DurableSink, LoadSink, Notifier, QuarantinePayload, QuarantineReceipt, RawPayload,
    RawSource, RegionSource, Severity,
};
use crate::domain::{EnrichedDataset, EnrichedRecord};
use crate::error::{AlertError, FetchError, LoadError, QuarantineError, RegionError};
use crate::infra::quarantine_store::encode_dataset_csv;
use crate::pipeline::processing::regions::RegionSet;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking test thread must not hide what was recorded
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves a fixed byte payload.
pub struct InMemoryRawSource {
    bytes: Option<Vec<u8>>,
    fetches: Mutex<usize>,
}

impl InMemoryRawSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
            fetches: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: None,
            fetches: Mutex::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        *lock(&self.fetches)
    }
}

#[async_trait]
impl RawSource for InMemoryRawSource {
    async fn fetch(&self) -> Result<RawPayload, FetchError> {
        *lock(&self.fetches) += 1;
        match &self.bytes {
            Some(bytes) => Ok(RawPayload {
                source_ref: "memory://export".to_string(),
                bytes: bytes.clone(),
            }),
            None => Err(FetchError::NoExportEntry("memory://masterfilelist".to_string())),
        }
    }
}

pub struct InMemoryRegionSource {
    regions: Option<RegionSet>,
}

impl InMemoryRegionSource {
    pub fn new(regions: RegionSet) -> Self {
        Self {
            regions: Some(regions),
        }
    }

    pub fn unavailable() -> Self {
        Self { regions: None }
    }
}

#[async_trait]
impl RegionSource for InMemoryRegionSource {
    async fn load_regions(&self) -> Result<RegionSet, RegionError> {
        self.regions
            .clone()
            .ok_or_else(|| RegionError::ReferenceDataUnavailable {
                source_ref: "memory://regions".to_string(),
                reason: "no regions configured".to_string(),
            })
    }
}

/// What a quarantine store received for one run.
#[derive(Debug)]
pub struct StoredQuarantine {
    pub run_id: Uuid,
    pub payload: QuarantinePayload,
}

#[derive(Default)]
pub struct InMemoryQuarantineStore {
    stored: Mutex<Vec<StoredQuarantine>>,
    attempts: Mutex<usize>,
    fail: bool,
}

impl InMemoryQuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }

    pub fn stored_count(&self) -> usize {
        lock(&self.stored).len()
    }

    /// Run id and record count of every stored payload.
    pub fn stored_summaries(&self) -> Vec<(Uuid, usize)> {
        lock(&self.stored)
            .iter()
            .map(|s| (s.run_id, s.payload.dataset.len()))
            .collect()
    }

    pub fn take_stored(&self) -> Vec<StoredQuarantine> {
        std::mem::take(&mut *lock(&self.stored))
    }
}

#[async_trait]
impl DurableSink for InMemoryQuarantineStore {
    async fn put(
        &self,
        run_id: Uuid,
        payload: QuarantinePayload,
    ) -> Result<QuarantineReceipt, QuarantineError> {
        *lock(&self.attempts) += 1;
        if self.fail {
            return Err(QuarantineError::Write("in-memory store configured to fail".to_string()));
        }
        let csv = encode_dataset_csv(&payload.dataset)
            .map_err(|e| QuarantineError::Write(e.to_string()))?;
        let receipt = QuarantineReceipt {
            location: format!("memory://quarantine/{}", run_id),
            records: payload.dataset.len(),
            sha256: hex::encode(Sha256::digest(&csv)),
        };
        debug!(%run_id, records = receipt.records, "Stored quarantine payload in memory");
        lock(&self.stored).push(StoredQuarantine { run_id, payload });
        Ok(receipt)
    }
}

/// Records every alert it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(Alert, Severity)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Alerts received, including ones this notifier failed to "deliver".
    pub fn alerts(&self) -> Vec<(Alert, Severity)> {
        lock(&self.alerts).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert, severity: Severity) -> Result<(), AlertError> {
        lock(&self.alerts).push((alert.clone(), severity));
        if self.fail {
            return Err(AlertError::Delivery("in-memory notifier configured to fail".to_string()));
        }
        Ok(())
    }
}

/// Collects loaded records per table.
#[derive(Default)]
pub struct InMemoryLoadSink {
    rows: Mutex<Vec<(String, Uuid, EnrichedRecord)>>,
    calls: Mutex<usize>,
    fail: bool,
}

impl InMemoryLoadSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn load_calls(&self) -> usize {
        *lock(&self.calls)
    }

    pub fn loaded_count(&self, table: &str) -> usize {
        lock(&self.rows).iter().filter(|(t, _, _)| t == table).count()
    }

    pub fn loaded_records(&self, table: &str) -> Vec<EnrichedRecord> {
        lock(&self.rows)
            .iter()
            .filter(|(t, _, _)| t == table)
            .map(|(_, _, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl LoadSink for InMemoryLoadSink {
    async fn load(
        &self,
        run_id: Uuid,
        dataset: EnrichedDataset,
        target_table: &str,
    ) -> Result<usize, LoadError> {
        *lock(&self.calls) += 1;
        if self.fail {
            return Err(LoadError::Database("in-memory sink configured to fail".to_string()));
        }
        let records = dataset.into_records();
        let count = records.len();
        let mut rows = lock(&self.rows);
        rows.extend(
            records
                .into_iter()
                .map(|r| (target_table.to_string(), run_id, r)),
        );
        Ok(count)
    }
}
