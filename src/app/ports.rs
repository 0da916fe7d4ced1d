use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::EnrichedDataset;
use crate::error::{AlertError, FetchError, LoadError, QuarantineError, RegionError};
use crate::pipeline::processing::quality_gate::{QualityReport, Verdict};
use crate::pipeline::processing::regions::RegionSet;

/// Raw export bytes plus where they came from.
#[derive(Clone, Debug)]
pub struct RawPayload {
    pub source_ref: String,
    pub bytes: Vec<u8>,
}

// Source-side ports
#[async_trait]
pub trait RawSource: Send + Sync {
    async fn fetch(&self) -> Result<RawPayload, FetchError>;
}

#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn load_regions(&self) -> Result<RegionSet, RegionError>;
}

/// Everything persisted for a failed dataset. Owns the dataset so nothing
/// can be loaded from it afterwards.
#[derive(Debug)]
pub struct QuarantinePayload {
    pub dataset: EnrichedDataset,
    pub report: QualityReport,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuarantineReceipt {
    pub location: String,
    pub records: usize,
    /// Hex SHA-256 of the persisted dataset file
    pub sha256: String,
}

#[async_trait]
pub trait DurableSink: Send + Sync {
    async fn put(
        &self,
        run_id: Uuid,
        payload: QuarantinePayload,
    ) -> Result<QuarantineReceipt, QuarantineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailingCheck {
    pub check_name: String,
    pub failing_record_count: usize,
    pub detail: String,
}

/// Operator notification for a dataset that failed the quality gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub run_id: Uuid,
    pub verdict: Verdict,
    pub failing_checks: Vec<FailingCheck>,
    /// `None` when the dataset could not be persisted
    pub quarantine_location: Option<String>,
    pub summary: String,
}

impl Alert {
    pub fn from_report(run_id: Uuid, report: &QualityReport, quarantine_location: Option<String>) -> Self {
        let failing_checks = report
            .failing_checks()
            .map(|c| FailingCheck {
                check_name: c.check_name.clone(),
                failing_record_count: c.failing_record_count,
                detail: c.detail.clone(),
            })
            .collect();
        let summary = match &quarantine_location {
            Some(location) => format!(
                "Run {} quarantined at {}. {}",
                run_id,
                location,
                report.summary()
            ),
            None => format!(
                "Run {} failed the quality gate and the dataset could NOT be persisted. {}",
                run_id,
                report.summary()
            ),
        };
        Self {
            run_id,
            verdict: report.verdict,
            failing_checks,
            quarantine_location,
            summary,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert, severity: Severity) -> Result<(), AlertError>;
}

#[async_trait]
pub trait LoadSink: Send + Sync {
    /// Write the whole dataset to `target_table` and return the number of
    /// rows written. All or nothing.
    async fn load(
        &self,
        run_id: Uuid,
        dataset: EnrichedDataset,
        target_table: &str,
    ) -> Result<usize, LoadError>;
}
