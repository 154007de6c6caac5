use log::info;
use rust_decimal::Decimal;

use crate::config::{RulesConfig, SettingsConfig};
use crate::error::{PipelineError, Result};
use crate::schema::ClassifiedInvoice;

/// Post-classification consistency assertions. Any failure here is a logic
/// defect or corrupt input that slipped past normalization, so it aborts the
/// run rather than degrading the outputs.
pub fn run_quality_checks(
    records: &[ClassifiedInvoice],
    settings: &SettingsConfig,
    rules: &RulesConfig,
) -> Result<()> {
    info!("Running quality checks on {} records", records.len());
    if records.is_empty() {
        return Err(PipelineError::QualityCheck(
            "dataset is empty after classification".to_string(),
        ));
    }

    let report_date = settings.report_date();
    for classified in records {
        let record = &classified.record;
        let id = &record.invoice_id;

        if record.invoiced_amount < Decimal::ZERO || record.paid_amount < Decimal::ZERO {
            return Err(PipelineError::QualityCheck(format!(
                "negative amount on invoice {id}"
            )));
        }
        if record.invoice_date > report_date {
            return Err(PipelineError::QualityCheck(format!(
                "invoice {id} is dated {} which is after the report date {report_date}",
                record.invoice_date
            )));
        }
        if record.payment_date > report_date {
            return Err(PipelineError::QualityCheck(format!(
                "invoice {id} has payment date {} after the report date {report_date}",
                record.payment_date
            )));
        }
        if classified.is_shortage {
            if !rules.eligible_statuses.contains(&record.status) {
                return Err(PipelineError::QualityCheck(format!(
                    "invoice {id} flagged as shortage with ineligible status '{}'",
                    record.status
                )));
            }
            if classified.shortage_amount <= Decimal::ZERO {
                return Err(PipelineError::QualityCheck(format!(
                    "invoice {id} flagged as shortage with non-positive amount"
                )));
            }
        } else if classified.shortage_amount != Decimal::ZERO {
            return Err(PipelineError::QualityCheck(format!(
                "invoice {id} is unflagged but carries shortage amount {}",
                classified.shortage_amount
            )));
        }
    }

    info!("Quality checks passed");
    Ok(())
}
