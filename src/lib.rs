//! # Shortage Pipeline
//!
//! A batch pipeline for detecting supplier invoice shortages (underpayments
//! relative to invoiced amounts) and computing payment KPIs.
//!
//! ## Core Concepts
//!
//! - **Normalization**: heterogeneous raw CSV columns are mapped onto one
//!   canonical invoice record shape; bad rows are dropped and counted
//! - **Shortage rules**: a record is a shortage only when its status is in
//!   the configured eligible set, every required flag is satisfied, and the
//!   paid amount falls short of the invoiced amount
//! - **KPIs**: total shortage, per-year shortages, and aging-bucket
//!   breakdowns, with an internal totals check between the three
//! - **One run, one batch**: every table is recomputed fresh per invocation;
//!   configuration is loaded once and threaded through immutably
//!
//! ## Example
//!
//! ```rust,ignore
//! use shortage_pipeline::*;
//! use std::path::Path;
//!
//! let settings = load_settings(Path::new("config/settings.yaml"))?;
//! let rules = load_rules(Path::new("config/rules.yaml"))?;
//!
//! let report = run_pipeline(
//!     &settings,
//!     &rules,
//!     &CsvDirectoryReader,
//!     &mut CsvReportSink,
//! )?;
//! println!("{} shortages totalling {}", report.shortage_count, report.total_shortage);
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod io;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod rules;
pub mod schema;

pub use analytics::{
    bucket_label, compute_kpis, AgedInvoiceRow, AgedShortageRow, AnnualShortage, KpiSummary,
    TotalShortage,
};
pub use config::{
    load_rules, load_settings, ColumnMap, CurrencyColumns, FlagColumn, FlagParse, FlagSpec,
    RoundingMode, RulesConfig, SettingsConfig,
};
pub use error::{PipelineError, Result};
pub use io::{CsvDirectoryReader, CsvReportSink, InvoiceSource, ReportSink};
pub use normalize::{normalize_tables, NormalizedBatch};
pub use pipeline::{run_pipeline, RunReport};
pub use quality::run_quality_checks;
pub use rules::{classify_records, evaluate_record, Classification};
pub use schema::{ClassifiedInvoice, InvoiceRecord, RawTable, RejectReason, RowRejection};

use std::path::Path;

/// Load `settings.yaml` and `rules.yaml` from a config directory and run the
/// pipeline with the default CSV reader and writer. This is the entry point
/// the scheduler-facing binary uses.
pub fn run_from_config_dir(config_dir: &Path) -> Result<RunReport> {
    let settings = load_settings(&config_dir.join("settings.yaml"))?;
    let rules = load_rules(&config_dir.join("rules.yaml"))?;

    run_pipeline(&settings, &rules, &CsvDirectoryReader, &mut CsvReportSink)
}
