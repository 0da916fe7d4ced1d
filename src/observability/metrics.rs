//! Metrics for the ETL run
//!
//! Recording functions are grouped by pipeline stage and use the standard
//! Prometheus naming conventions. When a push gateway is configured the
//! rendered registry is pushed once at the end of a run.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Enum representing all metric names used in the system
/// This eliminates magic strings and provides compile-time safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Source metrics
    SourceFetchSuccess,
    SourceFetchError,
    SourceFetchDuration,
    SourcePayloadBytes,

    // Parser metrics
    ParserParseSuccess,
    ParserParseError,
    ParserDuration,
    ParserRecordsExtracted,
    ParserRowsDropped,
    ParserBytesProcessed,

    // Enrich metrics
    EnrichRecordsResolved,
    EnrichRecordsUnresolved,
    EnrichDuration,

    // Quality Gate metrics
    QualityGateDatasetsPassed,
    QualityGateDatasetsFailed,
    QualityGateCheckFailures,
    QualityGateRecordsAssessed,

    // Quarantine metrics
    QuarantineWritesSuccess,
    QuarantineWritesError,
    QuarantineAlertsSent,
    QuarantineAlertsError,

    // Load metrics
    LoadRowsLoaded,
    LoadSuccess,
    LoadError,
    LoadDuration,

    // Run metrics
    RunOutcome,
    RunDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourceFetchSuccess => "gdelt_etl_source_fetch_success_total",
            MetricName::SourceFetchError => "gdelt_etl_source_fetch_error_total",
            MetricName::SourceFetchDuration => "gdelt_etl_source_fetch_duration_seconds",
            MetricName::SourcePayloadBytes => "gdelt_etl_source_payload_bytes",

            MetricName::ParserParseSuccess => "gdelt_etl_parser_parse_success_total",
            MetricName::ParserParseError => "gdelt_etl_parser_parse_error_total",
            MetricName::ParserDuration => "gdelt_etl_parser_duration_seconds",
            MetricName::ParserRecordsExtracted => "gdelt_etl_parser_records_extracted_total",
            MetricName::ParserRowsDropped => "gdelt_etl_parser_rows_dropped_total",
            MetricName::ParserBytesProcessed => "gdelt_etl_parser_bytes_processed",

            MetricName::EnrichRecordsResolved => "gdelt_etl_enrich_records_resolved_total",
            MetricName::EnrichRecordsUnresolved => "gdelt_etl_enrich_records_unresolved_total",
            MetricName::EnrichDuration => "gdelt_etl_enrich_duration_seconds",

            MetricName::QualityGateDatasetsPassed => "gdelt_etl_quality_gate_datasets_passed_total",
            MetricName::QualityGateDatasetsFailed => "gdelt_etl_quality_gate_datasets_failed_total",
            MetricName::QualityGateCheckFailures => "gdelt_etl_quality_gate_check_failures_total",
            MetricName::QualityGateRecordsAssessed => "gdelt_etl_quality_gate_records_assessed_total",

            MetricName::QuarantineWritesSuccess => "gdelt_etl_quarantine_writes_success_total",
            MetricName::QuarantineWritesError => "gdelt_etl_quarantine_writes_error_total",
            MetricName::QuarantineAlertsSent => "gdelt_etl_quarantine_alerts_sent_total",
            MetricName::QuarantineAlertsError => "gdelt_etl_quarantine_alerts_error_total",

            MetricName::LoadRowsLoaded => "gdelt_etl_load_rows_loaded_total",
            MetricName::LoadSuccess => "gdelt_etl_load_success_total",
            MetricName::LoadError => "gdelt_etl_load_error_total",
            MetricName::LoadDuration => "gdelt_etl_load_duration_seconds",

            MetricName::RunOutcome => "gdelt_etl_run_outcome_total",
            MetricName::RunDuration => "gdelt_etl_run_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            SourceFetchSuccess,
            SourceFetchError,
            SourceFetchDuration,
            SourcePayloadBytes,
            ParserParseSuccess,
            ParserParseError,
            ParserDuration,
            ParserRecordsExtracted,
            ParserRowsDropped,
            ParserBytesProcessed,
            EnrichRecordsResolved,
            EnrichRecordsUnresolved,
            EnrichDuration,
            QualityGateDatasetsPassed,
            QualityGateDatasetsFailed,
            QualityGateCheckFailures,
            QualityGateRecordsAssessed,
            QuarantineWritesSuccess,
            QuarantineWritesError,
            QuarantineAlertsSent,
            QuarantineAlertsError,
            LoadRowsLoaded,
            LoadSuccess,
            LoadError,
            LoadDuration,
            RunOutcome,
            RunDuration,
        ]
        .into_iter()
    }
}

struct MetricsState {
    handle: metrics_exporter_prometheus::PrometheusHandle,
    pushgateway_url: Option<String>,
    job: String,
    instance: String,
}

static METRICS_STATE: OnceLock<Arc<MetricsState>> = OnceLock::new();

/// Install the Prometheus recorder. Push gateway support is enabled when
/// `pushgateway_url` is set.
pub fn init(pushgateway_url: Option<String>, instance: &str) -> anyhow::Result<()> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    let push_enabled = pushgateway_url.is_some();
    METRICS_STATE
        .set(Arc::new(MetricsState {
            handle,
            pushgateway_url,
            job: "gdelt_etl".to_string(),
            instance: instance.to_string(),
        }))
        .ok();

    if push_enabled {
        info!("Metrics system initialized with push gateway support");
    } else {
        info!("Metrics system initialized (no push gateway)");
    }
    Ok(())
}

/// Push everything recorded so far to the push gateway. A no-op when no
/// gateway is configured.
pub async fn push_all_metrics() -> anyhow::Result<()> {
    let Some(state) = METRICS_STATE.get() else {
        return Ok(());
    };
    let Some(url) = state.pushgateway_url.as_deref() else {
        return Ok(());
    };

    let push_url = format!(
        "{}/metrics/job/{}/instance/{}",
        url.trim_end_matches('/'),
        state.job,
        state.instance
    );
    let body = state.handle.render();
    let response = reqwest::Client::new()
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        warn!(%status, "Pushgateway rejected metrics");
        anyhow::bail!("Pushgateway returned status {}: {}", status, text);
    }
    info!(instance = %state.instance, "Pushed metrics to Pushgateway");
    Ok(())
}

// ============================================================================
// Source Metrics
// ============================================================================

pub mod source {
    use super::MetricName;

    pub fn fetch_success(bytes: usize, secs: f64) {
        ::metrics::counter!(MetricName::SourceFetchSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::SourcePayloadBytes.as_str()).record(bytes as f64);
        ::metrics::histogram!(MetricName::SourceFetchDuration.as_str()).record(secs);
    }

    pub fn fetch_error() {
        ::metrics::counter!(MetricName::SourceFetchError.as_str()).increment(1);
    }
}

// ============================================================================
// Parser Metrics
// ============================================================================

pub mod parser {
    use super::MetricName;

    pub fn parse_success() {
        ::metrics::counter!(MetricName::ParserParseSuccess.as_str()).increment(1);
    }

    pub fn parse_error() {
        ::metrics::counter!(MetricName::ParserParseError.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ParserDuration.as_str()).record(secs);
    }

    pub fn records_extracted(count: u64) {
        ::metrics::counter!(MetricName::ParserRecordsExtracted.as_str()).increment(count);
    }

    pub fn rows_dropped(count: u64) {
        ::metrics::counter!(MetricName::ParserRowsDropped.as_str()).increment(count);
    }

    pub fn bytes_processed(bytes: usize) {
        ::metrics::histogram!(MetricName::ParserBytesProcessed.as_str()).record(bytes as f64);
    }
}

// ============================================================================
// Enrich Metrics
// ============================================================================

pub mod enrich {
    use super::MetricName;

    pub fn records_resolved(count: u64) {
        ::metrics::counter!(MetricName::EnrichRecordsResolved.as_str()).increment(count);
    }

    pub fn records_unresolved(count: u64) {
        ::metrics::counter!(MetricName::EnrichRecordsUnresolved.as_str()).increment(count);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::EnrichDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;
    use crate::pipeline::processing::quality_gate::QualityReport;

    /// Record the verdict and every failing check of a report.
    pub fn report_evaluated(report: &QualityReport) {
        ::metrics::counter!(MetricName::QualityGateRecordsAssessed.as_str())
            .increment(report.total_records as u64);
        if report.is_pass() {
            ::metrics::counter!(MetricName::QualityGateDatasetsPassed.as_str()).increment(1);
        } else {
            ::metrics::counter!(MetricName::QualityGateDatasetsFailed.as_str()).increment(1);
        }
        for check in report.failing_checks() {
            ::metrics::counter!(
                MetricName::QualityGateCheckFailures.as_str(),
                "check" => check.check_name.clone()
            )
            .increment(1);
        }
    }
}

// ============================================================================
// Quarantine Metrics
// ============================================================================

pub mod quarantine {
    use super::MetricName;

    pub fn write_success() {
        ::metrics::counter!(MetricName::QuarantineWritesSuccess.as_str()).increment(1);
    }

    pub fn write_error() {
        ::metrics::counter!(MetricName::QuarantineWritesError.as_str()).increment(1);
    }

    pub fn alert_sent() {
        ::metrics::counter!(MetricName::QuarantineAlertsSent.as_str()).increment(1);
    }

    pub fn alert_error() {
        ::metrics::counter!(MetricName::QuarantineAlertsError.as_str()).increment(1);
    }
}

// ============================================================================
// Load Metrics
// ============================================================================

pub mod load {
    use super::MetricName;

    pub fn success(rows: usize, secs: f64) {
        ::metrics::counter!(MetricName::LoadSuccess.as_str()).increment(1);
        ::metrics::counter!(MetricName::LoadRowsLoaded.as_str()).increment(rows as u64);
        ::metrics::histogram!(MetricName::LoadDuration.as_str()).record(secs);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::LoadError.as_str()).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    /// `outcome` is loaded, quarantined or dry_run on success, otherwise
    /// quarantine_failed, load_failed or aborted.
    pub fn finished(outcome: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::RunOutcome.as_str(), "outcome" => outcome).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.iter().all(|n| n.starts_with("gdelt_etl_")));
    }

    #[test]
    fn recording_without_a_recorder_is_harmless() {
        parser::records_extracted(3);
        enrich::records_unresolved(1);
        load::error();
        run::finished("aborted", 0.5);
    }
}
