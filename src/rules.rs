use log::info;
use rust_decimal::Decimal;

use crate::config::{RulesConfig, SettingsConfig};
use crate::schema::{ClassifiedInvoice, InvoiceRecord};

/// Shortage classification for a single invoice record.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_shortage: bool,
    pub shortage_amount: Decimal,
}

impl Classification {
    fn none() -> Self {
        Classification {
            is_shortage: false,
            shortage_amount: Decimal::ZERO,
        }
    }
}

/// Evaluate one record against the configured rules.
///
/// A record is eligible when its status is in the eligible set and every
/// required flag is present and true; a missing or unparseable flag value
/// fails the gate. Ineligible records are never surfaced as shortages, no
/// matter how large the gap between invoiced and paid amounts. Overpayments
/// yield a zero shortage, and deltas at or below the configured tolerance
/// are left unflagged.
pub fn evaluate_record(
    record: &InvoiceRecord,
    rules: &RulesConfig,
    tolerance: Decimal,
) -> Classification {
    let status_eligible = rules
        .eligible_statuses
        .iter()
        .any(|status| status == &record.status);
    let flags_satisfied = rules
        .required_flags
        .iter()
        .all(|flag| matches!(record.flags.get(flag), Some(Some(true))));

    if !status_eligible || !flags_satisfied {
        return Classification::none();
    }

    let delta = (record.invoiced_amount - record.paid_amount).max(Decimal::ZERO);
    if delta > tolerance {
        Classification {
            is_shortage: true,
            shortage_amount: delta,
        }
    } else {
        Classification::none()
    }
}

/// Classify a whole normalized batch. Purely per-record; ordering of the
/// input never affects the outcome.
pub fn classify_records(
    records: Vec<InvoiceRecord>,
    rules: &RulesConfig,
    settings: &SettingsConfig,
) -> Vec<ClassifiedInvoice> {
    let classified: Vec<ClassifiedInvoice> = records
        .into_iter()
        .map(|record| {
            let classification = evaluate_record(&record, rules, settings.tolerance);
            ClassifiedInvoice {
                record,
                is_shortage: classification.is_shortage,
                shortage_amount: classification.shortage_amount,
            }
        })
        .collect();

    let flagged = classified.iter().filter(|c| c.is_shortage).count();
    info!(
        "Shortage rules flagged {} of {} records",
        flagged,
        classified.len()
    );
    classified
}
