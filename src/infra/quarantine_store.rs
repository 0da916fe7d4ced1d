use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::ports::{DurableSink, QuarantinePayload, QuarantineReceipt};
use crate::domain::EnrichedDataset;
use crate::error::QuarantineError;
use crate::pipeline::processing::quality_gate::Verdict;

pub const DATASET_FILE: &str = "dataset.csv";
pub const REPORT_FILE: &str = "report.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const CSV_HEADER: [&str; 18] = [
    "event_id",
    "event_date",
    "event_code",
    "event_base_code",
    "event_root_code",
    "event_label",
    "event_base_label",
    "event_root_label",
    "action_geo_full_name",
    "action_geo_country_code",
    "country_iso2",
    "action_geo_lat",
    "action_geo_long",
    "date_added",
    "source_url",
    "region_id",
    "region_name",
    "enrichment_status",
];

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Serialize an enriched dataset as CSV with a header row. Nulls are empty
/// cells.
pub fn encode_dataset_csv(dataset: &EnrichedDataset) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for record in dataset.records() {
        let raw = &record.raw;
        writer.write_record([
            opt(&raw.event_id),
            raw.event_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            opt(&raw.event_code),
            opt(&raw.event_base_code),
            opt(&raw.event_root_code),
            record.labels.event.clone(),
            record.labels.event_base.clone(),
            record.labels.event_root.clone(),
            opt(&raw.action_geo_full_name),
            opt(&raw.action_geo_country_code),
            record.labels.country_iso2.clone(),
            opt(&raw.action_geo_lat),
            opt(&raw.action_geo_long),
            raw.date_added
                .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_default(),
            opt(&raw.source_url),
            record.region_id().unwrap_or_default().to_string(),
            record.region_name().unwrap_or_default().to_string(),
            record.status().as_str().to_string(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    run_id: Uuid,
    created_at: String,
    records: usize,
    source_rows: usize,
    dropped_rows: usize,
    verdict: Verdict,
    failing_checks: Vec<&'a str>,
    rule_version: &'a str,
    dataset_file: &'a str,
    dataset_sha256: &'a str,
    report_file: &'a str,
}

/// Writes failed datasets under `<root>/<YYYY-MM-DD>/<run_id>/`.
pub struct FileQuarantineStore {
    root: PathBuf,
}

impl FileQuarantineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_blocking(
        root: &Path,
        run_id: Uuid,
        payload: &QuarantinePayload,
    ) -> anyhow::Result<QuarantineReceipt> {
        let now = Utc::now();
        let dir = root
            .join(now.format("%Y-%m-%d").to_string())
            .join(run_id.to_string());
        fs::create_dir_all(&dir)?;

        let csv = encode_dataset_csv(&payload.dataset)?;
        let sha256 = hex::encode(Sha256::digest(&csv));
        fs::write(dir.join(DATASET_FILE), &csv)?;
        debug!(bytes = csv.len(), "Wrote quarantined dataset");

        let report_json = serde_json::to_vec_pretty(&payload.report)?;
        fs::write(dir.join(REPORT_FILE), report_json)?;

        let manifest = Manifest {
            run_id,
            created_at: now.to_rfc3339(),
            records: payload.dataset.len(),
            source_rows: payload.dataset.source_rows(),
            dropped_rows: payload.dataset.dropped_rows(),
            verdict: payload.report.verdict,
            failing_checks: payload.report.failing_check_names(),
            rule_version: &payload.report.rule_version,
            dataset_file: DATASET_FILE,
            dataset_sha256: &sha256,
            report_file: REPORT_FILE,
        };
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;

        Ok(QuarantineReceipt {
            location: dir.display().to_string(),
            records: payload.dataset.len(),
            sha256,
        })
    }
}

#[async_trait]
impl DurableSink for FileQuarantineStore {
    async fn put(
        &self,
        run_id: Uuid,
        payload: QuarantinePayload,
    ) -> Result<QuarantineReceipt, QuarantineError> {
        let root = self.root.clone();
        let receipt = tokio::task::spawn_blocking(move || Self::write_blocking(&root, run_id, &payload))
            .await
            .map_err(|e| QuarantineError::Write(format!("quarantine task failed: {}", e)))?
            .map_err(|e| QuarantineError::Write(format!("{:#}", e)))?;
        info!(location = %receipt.location, records = receipt.records, "Quarantine payload persisted");
        Ok(receipt)
    }
}
