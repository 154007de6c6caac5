use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use rust_decimal::Decimal;

use crate::config::{FlagParse, SettingsConfig};
use crate::error::{PipelineError, Result};
use crate::schema::{InvoiceRecord, RawTable, RejectReason, RowRejection};

const TRUE_VALUES: [&str; 6] = ["true", "t", "yes", "y", "1", "on"];
const FALSE_VALUES: [&str; 6] = ["false", "f", "no", "n", "0", "off"];

/// Output of the normalization stage: canonical records plus the rows that
/// were dropped, so the run report can account for every input row.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<InvoiceRecord>,
    pub rejections: Vec<RowRejection>,
    pub rows_read: usize,
}

/// Resolved header positions for one table. Building this up front makes a
/// missing mapped column a table-level (fatal) error rather than a per-row one.
struct ColumnIndexes {
    invoice_id: usize,
    account_ref: usize,
    invoiced_amount: usize,
    paid_amount: usize,
    invoice_date: usize,
    payment_date: usize,
    status: usize,
    flags: BTreeMap<String, (usize, FlagParse)>,
    currency: Option<(usize, usize)>,
}

/// Normalize all raw tables into canonical invoice records.
///
/// Row-level failures (bad dates, bad amounts, missing values, currency
/// mismatches) drop the row and record a rejection. A table whose header
/// lacks a mapped column is a fatal error for the run.
pub fn normalize_tables(tables: &[RawTable], settings: &SettingsConfig) -> Result<NormalizedBatch> {
    let mut batch = NormalizedBatch::default();

    for table in tables {
        let before_rejected = batch.rejections.len();
        let before_accepted = batch.records.len();
        normalize_table(table, settings, &mut batch)?;
        info!(
            "Normalized {}: {} rows accepted, {} rejected",
            table.source_file,
            batch.records.len() - before_accepted,
            batch.rejections.len() - before_rejected
        );
    }

    let currency_rejects = batch
        .rejections
        .iter()
        .filter(|r| r.reason == RejectReason::CurrencyMismatch)
        .count();
    if currency_rejects > 0 {
        warn!(
            "Skipped {} rows due to non-{} currency values",
            currency_rejects,
            settings.expected_currency.as_deref().unwrap_or("expected")
        );
    }

    Ok(batch)
}

fn normalize_table(
    table: &RawTable,
    settings: &SettingsConfig,
    batch: &mut NormalizedBatch,
) -> Result<()> {
    let indexes = resolve_columns(table, settings)?;

    for (offset, row) in table.rows.iter().enumerate() {
        batch.rows_read += 1;
        let row_number = offset + 1;
        match normalize_row(row, &indexes, settings, &table.source_file) {
            Ok(record) => batch.records.push(record),
            Err(reason) => batch.rejections.push(RowRejection {
                source_file: table.source_file.clone(),
                row_number,
                reason,
            }),
        }
    }

    Ok(())
}

fn resolve_columns(table: &RawTable, settings: &SettingsConfig) -> Result<ColumnIndexes> {
    let require = |name: &str| -> Result<usize> {
        table
            .column_index(name)
            .ok_or_else(|| PipelineError::MissingColumn {
                file: table.source_file.clone(),
                column: name.to_string(),
            })
    };

    let columns = &settings.columns;
    let mut flags = BTreeMap::new();
    for (flag_name, flag_column) in &settings.flag_columns {
        flags.insert(
            flag_name.clone(),
            (require(flag_column.column())?, flag_column.parse()),
        );
    }

    let currency = match (&settings.expected_currency, &settings.currency_columns) {
        (Some(_), Some(cols)) => Some((require(&cols.paid)?, require(&cols.invoiced)?)),
        _ => None,
    };

    Ok(ColumnIndexes {
        invoice_id: require(&columns.invoice_id)?,
        account_ref: require(&columns.account_ref)?,
        invoiced_amount: require(&columns.invoiced_amount)?,
        paid_amount: require(&columns.paid_amount)?,
        invoice_date: require(&columns.invoice_date)?,
        payment_date: require(&columns.payment_date)?,
        status: require(&columns.status)?,
        flags,
        currency,
    })
}

fn normalize_row(
    row: &[String],
    indexes: &ColumnIndexes,
    settings: &SettingsConfig,
    source_file: &str,
) -> std::result::Result<InvoiceRecord, RejectReason> {
    let cell = |idx: usize| row.get(idx).map(|v| v.trim()).unwrap_or("");

    let columns = &settings.columns;
    let invoice_id = required_value(cell(indexes.invoice_id), &columns.invoice_id)?;
    let account_ref = required_value(cell(indexes.account_ref), &columns.account_ref)?;
    let status = required_value(cell(indexes.status), &columns.status)?.to_uppercase();

    let invoiced_amount = parse_amount(
        cell(indexes.invoiced_amount),
        &columns.invoiced_amount,
        settings,
    )?;
    let paid_amount = parse_amount(cell(indexes.paid_amount), &columns.paid_amount, settings)?;

    let invoice_date = parse_date(cell(indexes.invoice_date), &columns.invoice_date, settings)?;
    let payment_date = parse_date(cell(indexes.payment_date), &columns.payment_date, settings)?;

    let currency = match indexes.currency {
        Some((paid_idx, invoiced_idx)) => {
            let expected = settings
                .expected_currency
                .as_deref()
                .unwrap_or_default()
                .to_uppercase();
            let paid_currency = cell(paid_idx).to_uppercase();
            let invoiced_currency = cell(invoiced_idx).to_uppercase();
            if paid_currency != expected || invoiced_currency != expected {
                return Err(RejectReason::CurrencyMismatch);
            }
            Some(expected)
        }
        None => None,
    };

    let mut flags = BTreeMap::new();
    for (flag_name, &(idx, parse)) in &indexes.flags {
        let value = match parse {
            FlagParse::Boolean => parse_bool(cell(idx)),
            // Presence flags are about whether the cell holds anything at
            // all, so they always resolve to a definite boolean.
            FlagParse::Presence => Some(!cell(idx).is_empty()),
        };
        flags.insert(flag_name.clone(), value);
    }

    Ok(InvoiceRecord {
        invoice_id,
        account_ref,
        invoiced_amount,
        paid_amount,
        invoice_date,
        payment_date,
        payment_year: payment_date.year(),
        status,
        flags,
        currency,
        source_file: source_file.to_string(),
    })
}

fn required_value(value: &str, field: &str) -> std::result::Result<String, RejectReason> {
    if value.is_empty() {
        return Err(RejectReason::MissingField(field.to_string()));
    }
    Ok(value.to_string())
}

fn parse_amount(
    value: &str,
    field: &str,
    settings: &SettingsConfig,
) -> std::result::Result<Decimal, RejectReason> {
    if value.is_empty() {
        return Err(RejectReason::MissingField(field.to_string()));
    }
    let parsed: Decimal = value
        .parse()
        .map_err(|_| RejectReason::NonNumericAmount(field.to_string()))?;
    if parsed < Decimal::ZERO {
        return Err(RejectReason::NegativeAmount(field.to_string()));
    }
    Ok(settings.round_amount(parsed))
}

fn parse_date(
    value: &str,
    field: &str,
    settings: &SettingsConfig,
) -> std::result::Result<NaiveDate, RejectReason> {
    if value.is_empty() {
        return Err(RejectReason::MissingField(field.to_string()));
    }
    NaiveDate::parse_from_str(value, &settings.date_format)
        .map_err(|_| RejectReason::UnparseableDate(field.to_string()))
}

/// Lenient boolean parse; anything unrecognized maps to `None` so the rule
/// evaluator can fail closed instead of guessing.
fn parse_bool(value: &str) -> Option<bool> {
    let normalized = value.to_lowercase();
    if TRUE_VALUES.contains(&normalized.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&normalized.as_str()) {
        Some(false)
    } else {
        None
    }
}
