use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{DurableSink, LoadSink, Notifier, QuarantineReceipt, RawSource, RegionSource};
use crate::app::quarantine_use_case::QuarantineUseCase;
use crate::constants;
use crate::domain::EnrichedDataset;
use crate::error::{PipelineError, Stage};
use crate::observability::metrics;
use crate::pipeline::processing::enrich::{Enricher, SpatialJoinEnricher};
use crate::pipeline::processing::parser::{MetricsParser, Parser, SchemaDescriptor, TsvExportParser};
use crate::pipeline::processing::quality_gate::{DefaultQualityGate, QualityConfig, QualityGate, QualityReport};

/// Lifecycle of a single run. The quality verdict is the only branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    Parsed,
    Enriched,
    QualityEvaluated,
    QuarantinedTerminated,
    Loaded,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Parsed)
                | (Parsed, Enriched)
                | (Enriched, QualityEvaluated)
                | (QualityEvaluated, QuarantinedTerminated)
                | (QualityEvaluated, Loaded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::QuarantinedTerminated | RunState::Loaded)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Parsed => "PARSED",
            RunState::Enriched => "ENRICHED",
            RunState::QualityEvaluated => "QUALITY_EVALUATED",
            RunState::QuarantinedTerminated => "QUARANTINED_TERMINATED",
            RunState::Loaded => "LOADED",
        };
        write!(f, "{}", name)
    }
}

/// Per-run state. Created fresh for every run so nothing leaks between
/// runs of the same orchestrator.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Date the quality gate treats as "today"
    pub as_of: NaiveDate,
    state: RunState,
}

impl RunContext {
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            as_of: started_at.date_naive(),
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(run_id = %self.run_id, from = %self.state, to = %next, "Run state advanced");
        self.state = next;
        Ok(())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run that did not error ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Loaded {
        table: String,
        rows: usize,
        report: QualityReport,
    },
    Quarantined {
        report: QualityReport,
        receipt: QuarantineReceipt,
    },
    /// Stopped after quality evaluation; nothing persisted or loaded.
    DryRun { report: QualityReport },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Loaded { .. } => constants::EXIT_LOADED,
            RunOutcome::Quarantined { .. } => constants::EXIT_QUALITY_FAILURE,
            RunOutcome::DryRun { report } if report.is_pass() => constants::EXIT_LOADED,
            RunOutcome::DryRun { .. } => constants::EXIT_QUALITY_FAILURE,
        }
    }

    pub fn report(&self) -> &QualityReport {
        match self {
            RunOutcome::Loaded { report, .. }
            | RunOutcome::Quarantined { report, .. }
            | RunOutcome::DryRun { report } => report,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RunOutcome::Loaded { .. } => "loaded",
            RunOutcome::Quarantined { .. } => "quarantined",
            RunOutcome::DryRun { .. } => "dry_run",
        }
    }
}

/// Collaborators a run talks to.
#[derive(Clone)]
pub struct PipelinePorts {
    pub source: Arc<dyn RawSource>,
    pub regions: Arc<dyn RegionSource>,
    pub quarantine: Arc<dyn DurableSink>,
    pub notifier: Arc<dyn Notifier>,
    pub load_sink: Arc<dyn LoadSink>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub schema: SchemaDescriptor,
    pub quality: QualityConfig,
    pub target_table: String,
    pub dry_run: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            schema: SchemaDescriptor::default(),
            quality: QualityConfig::default(),
            target_table: constants::DEFAULT_TARGET_TABLE.to_string(),
            dry_run: false,
        }
    }
}

/// Drives one dataset through parse, enrich, quality gate, then either the
/// quarantine path or the load sink.
pub struct Orchestrator {
    ports: PipelinePorts,
    parser: Box<dyn Parser + Send + Sync>,
    enricher: Box<dyn Enricher + Send + Sync>,
    quarantine: QuarantineUseCase,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(ports: PipelinePorts, mut settings: OrchestratorSettings) -> Self {
        // fields the schema marks required are always null-checked
        for field in settings.schema.required_fields() {
            if !settings.quality.required_fields.contains(&field) {
                settings.quality.required_fields.push(field);
            }
        }
        let parser = MetricsParser::new(TsvExportParser::new(settings.schema.clone()));
        let quarantine = QuarantineUseCase::new(ports.quarantine.clone(), ports.notifier.clone());
        Self {
            ports,
            parser: Box::new(parser),
            enricher: Box::new(SpatialJoinEnricher::new()),
            quarantine,
            settings,
        }
    }

    /// Run once with a fresh context.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let mut ctx = RunContext::new();
        self.run_with_context(&mut ctx).await
    }

    /// Run once with a caller-supplied context, e.g. to pin the run id or
    /// the `as_of` date.
    pub async fn run_with_context(&self, ctx: &mut RunContext) -> Result<RunOutcome, PipelineError> {
        let start = Instant::now();
        info!(run_id = %ctx.run_id, as_of = %ctx.as_of, dry_run = self.settings.dry_run, "Starting ETL run");

        let result = self.execute(ctx).await;
        let secs = start.elapsed().as_secs_f64();

        match &result {
            Ok(outcome) => {
                metrics::run::finished(outcome.label(), secs);
                info!(
                    run_id = %ctx.run_id,
                    outcome = outcome.label(),
                    state = %ctx.state(),
                    summary = %outcome.report().summary(),
                    "Run finished"
                );
            }
            Err(e) => {
                metrics::run::finished(e.outcome_label(), secs);
                let failing_checks = e
                    .quality_report()
                    .map(|r| r.failing_check_names().join(","))
                    .unwrap_or_default();
                error!(
                    run_id = %ctx.run_id,
                    stage = %e.stage(),
                    state = %ctx.state(),
                    failing_checks = %failing_checks,
                    error = %e,
                    "Run terminated with error"
                );
            }
        }
        result
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    async fn execute(&self, ctx: &mut RunContext) -> Result<RunOutcome, PipelineError> {
        let fetch_start = Instant::now();
        let payload = match self.ports.source.fetch().await {
            Ok(payload) => {
                metrics::source::fetch_success(payload.bytes.len(), fetch_start.elapsed().as_secs_f64());
                payload
            }
            Err(e) => {
                metrics::source::fetch_error();
                return Err(PipelineError::aborted(Stage::Fetch, e));
            }
        };
        info!(source = %payload.source_ref, bytes = payload.bytes.len(), "Fetched raw export");

        let parsed = self
            .parser
            .parse(&payload.bytes)
            .map_err(|e| PipelineError::aborted(Stage::Parse, e))?;
        drop(payload);
        ctx.advance(RunState::Parsed)?;

        let regions = self
            .ports
            .regions
            .load_regions()
            .await
            .map_err(|e| PipelineError::aborted(Stage::Enrich, e))?;
        info!(regions = regions.len(), "Reference geography loaded");

        let enriched = self.enricher.enrich(parsed.dataset, &regions);
        ctx.advance(RunState::Enriched)?;

        let report = self.assess(ctx, &enriched);
        ctx.advance(RunState::QualityEvaluated)?;

        if self.settings.dry_run {
            info!(verdict = ?report.verdict, "Dry run: skipping quarantine and load");
            return Ok(RunOutcome::DryRun { report });
        }

        if !report.is_pass() {
            warn!(failing_checks = ?report.failing_check_names(), "Quality gate failed, quarantining dataset");
            let (report, receipt) = self.quarantine.quarantine(ctx.run_id, enriched, report).await?;
            ctx.advance(RunState::QuarantinedTerminated)?;
            return Ok(RunOutcome::Quarantined { report, receipt });
        }

        let rows = self.load(ctx, enriched).await?;
        ctx.advance(RunState::Loaded)?;
        Ok(RunOutcome::Loaded {
            table: self.settings.target_table.clone(),
            rows,
            report,
        })
    }

    fn assess(&self, ctx: &RunContext, dataset: &EnrichedDataset) -> QualityReport {
        let gate = DefaultQualityGate::from_config(&self.settings.quality, ctx.as_of);
        let report = gate.assess(dataset);
        metrics::quality_gate::report_evaluated(&report);
        for check in &report.checks {
            if check.passed {
                info!(check = %check.check_name, detail = %check.detail, "Quality check passed");
            } else {
                warn!(
                    check = %check.check_name,
                    failing_records = check.failing_record_count,
                    detail = %check.detail,
                    "Quality check failed"
                );
            }
        }
        report
    }

    #[instrument(skip_all, fields(table = %self.settings.target_table, records = dataset.len()))]
    async fn load(&self, ctx: &RunContext, dataset: EnrichedDataset) -> Result<usize, PipelineError> {
        let start = Instant::now();
        let table = &self.settings.target_table;
        match self.ports.load_sink.load(ctx.run_id, dataset, table).await {
            Ok(rows) => {
                metrics::load::success(rows, start.elapsed().as_secs_f64());
                info!(rows, "Dataset loaded");
                Ok(rows)
            }
            Err(e) => {
                metrics::load::error();
                Err(PipelineError::LoadFailure {
                    table: table.clone(),
                    source: e,
                })
            }
        }
    }
}
