use thiserror::Error;

use crate::pipeline::processing::quality_gate::QualityReport;

/// Start-up errors raised before a pipeline run begins.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;

/// Failures fetching the raw export.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no export entry found in master list {0}")]
    NoExportEntry(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract archive: {0}")]
    Archive(String),
}

/// Parser failures. Per-row coercion failures never show up here; they are
/// counted on the dataset instead.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("schema mismatch: expected {expected} columns, found {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("failed to read delimited input: {0}")]
    Read(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("reference data unavailable from {source_ref}: {reason}")]
    ReferenceDataUnavailable { source_ref: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QuarantineError {
    #[error("quarantine write failed: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("duplicate event id {event_id} rejected by {table}")]
    DuplicateKey { table: String, event_id: i64 },

    #[error("record without event id cannot be loaded into {0}")]
    MissingKey(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Stage a fatal condition originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Enrich,
    QualityGate,
    Quarantine,
    Alert,
    Load,
    Orchestrator,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Enrich => "enrich",
            Stage::QualityGate => "quality_gate",
            Stage::Quarantine => "quarantine",
            Stage::Alert => "alert",
            Stage::Load => "load",
            Stage::Orchestrator => "orchestrator",
        };
        write!(f, "{}", name)
    }
}

/// Fatal outcome of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Infrastructure or structural failure upstream of the quality gate.
    #[error("pipeline aborted at {stage} stage: {source}")]
    Aborted {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("quality gate failed ({}) and quarantine could not be written: {source}", failing_checks(.report))]
    QuarantineWriteFailure {
        report: Box<QualityReport>,
        #[source]
        source: QuarantineError,
    },

    #[error("quality gate failed ({}), dataset quarantined at {location} but alert was not delivered: {source}", failing_checks(.report))]
    AlertDeliveryFailure {
        report: Box<QualityReport>,
        location: String,
        #[source]
        source: AlertError,
    },

    #[error("load into {table} failed: {source}")]
    LoadFailure {
        table: String,
        #[source]
        source: LoadError,
    },

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

fn failing_checks(report: &QualityReport) -> String {
    report.failing_check_names().join(", ")
}

impl PipelineError {
    pub fn aborted(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::Aborted {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Aborted { stage, .. } => *stage,
            PipelineError::QuarantineWriteFailure { .. } => Stage::Quarantine,
            PipelineError::AlertDeliveryFailure { .. } => Stage::Alert,
            PipelineError::LoadFailure { .. } => Stage::Load,
            PipelineError::InvalidTransition { .. } => Stage::Orchestrator,
        }
    }

    /// The quality report of a failed dataset, when the failure happened on
    /// the quarantine path.
    pub fn quality_report(&self) -> Option<&QualityReport> {
        match self {
            PipelineError::QuarantineWriteFailure { report, .. }
            | PipelineError::AlertDeliveryFailure { report, .. } => Some(report),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::QuarantineWriteFailure { .. }
            | PipelineError::AlertDeliveryFailure { .. } => crate::constants::EXIT_QUALITY_FAILURE,
            PipelineError::Aborted { .. }
            | PipelineError::LoadFailure { .. }
            | PipelineError::InvalidTransition { .. } => crate::constants::EXIT_ABORTED,
        }
    }

    /// Run outcome label for the run metric.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            PipelineError::QuarantineWriteFailure { .. }
            | PipelineError::AlertDeliveryFailure { .. } => "quarantine_failed",
            PipelineError::LoadFailure { .. } => "load_failed",
            PipelineError::Aborted { .. } | PipelineError::InvalidTransition { .. } => "aborted",
        }
    }
}
