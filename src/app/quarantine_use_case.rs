use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{Alert, DurableSink, Notifier, QuarantinePayload, QuarantineReceipt, Severity};
use crate::domain::EnrichedDataset;
use crate::error::PipelineError;
use crate::observability::metrics;
use crate::pipeline::processing::quality_gate::QualityReport;

/// Use case for a dataset that failed the Quality Gate: persist it, tell an
/// operator, and hand back what the run should terminate with.
pub struct QuarantineUseCase {
    sink: Arc<dyn DurableSink>,
    notifier: Arc<dyn Notifier>,
}

impl QuarantineUseCase {
    pub fn new(sink: Arc<dyn DurableSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self { sink, notifier }
    }

    /// Persist then alert. Consumes the dataset; it cannot reach a load sink
    /// afterwards.
    #[instrument(skip_all, fields(run_id = %run_id, records = dataset.len()))]
    pub async fn quarantine(
        &self,
        run_id: Uuid,
        dataset: EnrichedDataset,
        report: QualityReport,
    ) -> Result<(QualityReport, QuarantineReceipt), PipelineError> {
        let payload = QuarantinePayload {
            dataset,
            report: report.clone(),
        };

        let receipt = match self.sink.put(run_id, payload).await {
            Ok(receipt) => {
                metrics::quarantine::write_success();
                info!(location = %receipt.location, sha256 = %receipt.sha256, "Dataset quarantined");
                receipt
            }
            Err(e) => {
                metrics::quarantine::write_error();
                error!(error = %e, "Quarantine write failed");
                let alert = Alert::from_report(run_id, &report, None);
                match self.notifier.notify(&alert, Severity::Critical).await {
                    Ok(()) => metrics::quarantine::alert_sent(),
                    Err(alert_err) => {
                        metrics::quarantine::alert_error();
                        error!(error = %alert_err, "Critical alert for failed quarantine was not delivered");
                    }
                }
                return Err(PipelineError::QuarantineWriteFailure {
                    report: Box::new(report),
                    source: e,
                });
            }
        };

        let alert = Alert::from_report(run_id, &report, Some(receipt.location.clone()));
        if let Err(e) = self.notifier.notify(&alert, Severity::Error).await {
            metrics::quarantine::alert_error();
            warn!(error = %e, location = %receipt.location, "Alert delivery failed after quarantine");
            return Err(PipelineError::AlertDeliveryFailure {
                report: Box::new(report),
                location: receipt.location,
                source: e,
            });
        }
        metrics::quarantine::alert_sent();

        Ok((report, receipt))
    }
}
