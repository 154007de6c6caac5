use std::collections::BTreeMap;

use log::info;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::SettingsConfig;
use crate::error::{PipelineError, Result};
use crate::schema::ClassifiedInvoice;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalShortage {
    pub shortage_count: usize,
    pub total_shortage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnualShortage {
    pub payment_year: i32,
    pub shortage_count: usize,
    pub total_shortage: Decimal,
    pub mean_shortage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgedShortageRow {
    pub payment_year: i32,
    pub age_bucket: String,
    pub shortage_count: usize,
    pub total_shortage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgedInvoiceRow {
    pub payment_year: i32,
    pub age_bucket: String,
    pub invoice_count: usize,
    pub shortage_count: usize,
    pub total_invoiced: Decimal,
    pub total_shortage: Decimal,
}

/// The four KPI tables derived from a classified batch.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiSummary {
    pub total: TotalShortage,
    pub annual: Vec<AnnualShortage>,
    pub aged_shortages: Vec<AgedShortageRow>,
    pub aged_invoices: Vec<AgedInvoiceRow>,
}

/// Label for the aging bucket a given age (in days) falls into.
///
/// Bounds are upper bounds: `[30, 60, 90]` yields `0-30`, `31-60`, `61-90`
/// and `90+`. Ages below zero clamp into the first bucket.
pub fn bucket_label(age_days: i64, bounds: &[i64]) -> String {
    let mut lower = 0i64;
    for &bound in bounds {
        if age_days <= bound {
            return format!("{lower}-{bound}");
        }
        lower = bound + 1;
    }
    format!("{}+", bounds.last().copied().unwrap_or(0))
}

fn bucket_index(age_days: i64, bounds: &[i64]) -> usize {
    bounds
        .iter()
        .position(|&bound| age_days <= bound)
        .unwrap_or(bounds.len())
}

/// Compute the KPI tables and verify their internal consistency.
///
/// The totals check is an invariant of the aggregation, not a best-effort
/// reconciliation: a mismatch means a logic defect and fails the run.
pub fn compute_kpis(records: &[ClassifiedInvoice], settings: &SettingsConfig) -> Result<KpiSummary> {
    info!("Computing analytics tables over {} records", records.len());
    let report_date = settings.report_date();
    let bounds = &settings.aging_bucket_days;

    let mut total_shortage = Decimal::ZERO;
    let mut total_count = 0usize;

    #[derive(Default)]
    struct YearAccumulator {
        shortage_count: usize,
        total_shortage: Decimal,
    }
    #[derive(Default)]
    struct BucketAccumulator {
        invoice_count: usize,
        shortage_count: usize,
        total_invoiced: Decimal,
        total_shortage: Decimal,
    }

    let mut by_year: BTreeMap<i32, YearAccumulator> = BTreeMap::new();
    let mut by_year_bucket: BTreeMap<(i32, usize), BucketAccumulator> = BTreeMap::new();

    for classified in records {
        let record = &classified.record;
        let age_days = (report_date - record.invoice_date).num_days();
        let bucket = bucket_index(age_days, bounds);

        total_shortage += classified.shortage_amount;
        if classified.is_shortage {
            total_count += 1;
        }

        let year = by_year.entry(record.payment_year).or_default();
        year.total_shortage += classified.shortage_amount;
        if classified.is_shortage {
            year.shortage_count += 1;
        }

        let cell = by_year_bucket
            .entry((record.payment_year, bucket))
            .or_default();
        cell.invoice_count += 1;
        cell.total_invoiced += record.invoiced_amount;
        cell.total_shortage += classified.shortage_amount;
        if classified.is_shortage {
            cell.shortage_count += 1;
        }
    }

    let annual: Vec<AnnualShortage> = by_year
        .iter()
        .map(|(&payment_year, acc)| {
            let mean = if acc.shortage_count == 0 {
                Decimal::ZERO
            } else {
                settings.round_amount(acc.total_shortage / Decimal::from(acc.shortage_count as u64))
            };
            AnnualShortage {
                payment_year,
                shortage_count: acc.shortage_count,
                total_shortage: acc.total_shortage,
                mean_shortage: mean,
            }
        })
        .collect();

    let aged_shortages: Vec<AgedShortageRow> = by_year_bucket
        .iter()
        .filter(|(_, acc)| acc.shortage_count > 0)
        .map(|(&(payment_year, bucket), acc)| AgedShortageRow {
            payment_year,
            age_bucket: bucket_label_for_index(bucket, bounds),
            shortage_count: acc.shortage_count,
            total_shortage: acc.total_shortage,
        })
        .collect();

    let aged_invoices: Vec<AgedInvoiceRow> = by_year_bucket
        .iter()
        .map(|(&(payment_year, bucket), acc)| AgedInvoiceRow {
            payment_year,
            age_bucket: bucket_label_for_index(bucket, bounds),
            invoice_count: acc.invoice_count,
            shortage_count: acc.shortage_count,
            total_invoiced: acc.total_invoiced,
            total_shortage: acc.total_shortage,
        })
        .collect();

    let summary = KpiSummary {
        total: TotalShortage {
            shortage_count: total_count,
            total_shortage,
        },
        annual,
        aged_shortages,
        aged_invoices,
    };
    verify_totals(&summary)?;
    info!(
        "Computed 4 KPI tables ({} shortages, {} total)",
        summary.total.shortage_count, summary.total.total_shortage
    );
    Ok(summary)
}

fn bucket_label_for_index(index: usize, bounds: &[i64]) -> String {
    if index == 0 {
        bucket_label(0, bounds)
    } else if index < bounds.len() {
        bucket_label(bounds[index - 1] + 1, bounds)
    } else {
        format!("{}+", bounds.last().copied().unwrap_or(0))
    }
}

fn verify_totals(summary: &KpiSummary) -> Result<()> {
    let annual_sum: Decimal = summary.annual.iter().map(|row| row.total_shortage).sum();
    if annual_sum != summary.total.total_shortage {
        return Err(PipelineError::TotalsMismatch(format!(
            "annual shortages sum to {} but total shortage is {}",
            annual_sum, summary.total.total_shortage
        )));
    }

    let mut bucket_sums: BTreeMap<i32, Decimal> = BTreeMap::new();
    for row in &summary.aged_shortages {
        *bucket_sums.entry(row.payment_year).or_default() += row.total_shortage;
    }
    for row in &summary.annual {
        let bucket_sum = bucket_sums
            .get(&row.payment_year)
            .copied()
            .unwrap_or_default();
        if bucket_sum != row.total_shortage {
            return Err(PipelineError::TotalsMismatch(format!(
                "aged buckets for {} sum to {} but annual shortage is {}",
                row.payment_year, bucket_sum, row.total_shortage
            )));
        }
    }
    Ok(())
}
