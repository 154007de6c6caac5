use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// One raw tabular input, as delivered by an [`crate::io::InvoiceSource`].
/// Rows are positionally aligned with `headers`; the normalizer resolves
/// configured column names against the header once per table.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Canonical invoice record, the output of schema normalization. Amounts are
/// non-negative and rounded; both dates parsed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub invoice_id: String,
    pub account_ref: String,
    pub invoiced_amount: Decimal,
    pub paid_amount: Decimal,
    pub invoice_date: NaiveDate,
    pub payment_date: NaiveDate,
    pub payment_year: i32,
    /// Uppercased, trimmed status value.
    pub status: String,
    /// Flag name -> parsed value; `None` when a boolean-parsed cell was
    /// empty or unrecognizable. Presence-parsed flags always hold `Some`.
    /// Rules treat `None` as not satisfied.
    pub flags: BTreeMap<String, Option<bool>>,
    pub currency: Option<String>,
    pub source_file: String,
}

/// An invoice record together with its shortage classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedInvoice {
    pub record: InvoiceRecord,
    pub is_shortage: bool,
    pub shortage_amount: Decimal,
}

/// Why a row was excluded during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    UnparseableDate(String),
    NonNumericAmount(String),
    NegativeAmount(String),
    MissingField(String),
    CurrencyMismatch,
}

impl RejectReason {
    /// Coarse label used for per-reason counts in the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::UnparseableDate(_) => "unparseable_date",
            RejectReason::NonNumericAmount(_) => "non_numeric_amount",
            RejectReason::NegativeAmount(_) => "negative_amount",
            RejectReason::MissingField(_) => "missing_field",
            RejectReason::CurrencyMismatch => "currency_mismatch",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnparseableDate(field) => write!(f, "unparseable date in '{field}'"),
            RejectReason::NonNumericAmount(field) => write!(f, "non-numeric amount in '{field}'"),
            RejectReason::NegativeAmount(field) => write!(f, "negative amount in '{field}'"),
            RejectReason::MissingField(field) => write!(f, "missing value for '{field}'"),
            RejectReason::CurrencyMismatch => write!(f, "currency mismatch"),
        }
    }
}

/// A dropped row: which file, which row (1-based, excluding the header), why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    pub source_file: String,
    pub row_number: usize,
    pub reason: RejectReason,
}
