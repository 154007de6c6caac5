use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::analytics::KpiSummary;
use crate::config::SettingsConfig;
use crate::error::{PipelineError, Result};
use crate::schema::{ClassifiedInvoice, InvoiceRecord, RawTable};

/// Supplies raw tabular records, one table per input file.
pub trait InvoiceSource {
    fn read_tables(&self, settings: &SettingsConfig) -> Result<Vec<RawTable>>;
}

/// Receives the cleaned/classified datasets and the KPI tables. Writes must
/// be atomic: consumers never observe a partially written file.
pub trait ReportSink {
    fn write_clean(
        &mut self,
        records: &[InvoiceRecord],
        settings: &SettingsConfig,
    ) -> Result<Vec<PathBuf>>;

    fn write_flagged(
        &mut self,
        records: &[ClassifiedInvoice],
        settings: &SettingsConfig,
    ) -> Result<PathBuf>;

    fn write_shortages_only(
        &mut self,
        records: &[ClassifiedInvoice],
        settings: &SettingsConfig,
    ) -> Result<PathBuf>;

    fn write_kpis(&mut self, kpis: &KpiSummary, settings: &SettingsConfig)
        -> Result<Vec<PathBuf>>;
}

/// Reads every `*.csv` file from the configured raw directory, in sorted
/// order. A missing directory, an empty directory or a malformed file is a
/// fatal error for the run.
#[derive(Debug, Default)]
pub struct CsvDirectoryReader;

impl InvoiceSource for CsvDirectoryReader {
    fn read_tables(&self, settings: &SettingsConfig) -> Result<Vec<RawTable>> {
        let dir = &settings.input_raw_dir;
        if !dir.is_dir() {
            return Err(PipelineError::InputDirNotFound(dir.clone()));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PipelineError::NoInputFiles(dir.clone()));
        }
        info!("Found {} raw CSV files in {}", paths.len(), dir.display());

        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            tables.push(read_csv_table(&path)?);
        }
        Ok(tables)
    }
}

fn read_csv_table(path: &Path) -> Result<RawTable> {
    info!("Reading CSV file {}", path.display());
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let source_file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(RawTable {
        source_file,
        headers,
        rows,
    })
}

/// CSV writer for all pipeline outputs. Each file is written to a temporary
/// sibling and renamed into place once complete.
#[derive(Debug, Default)]
pub struct CsvReportSink;

impl ReportSink for CsvReportSink {
    fn write_clean(
        &mut self,
        records: &[InvoiceRecord],
        settings: &SettingsConfig,
    ) -> Result<Vec<PathBuf>> {
        if settings.partition_by_year {
            write_clean_partitioned(records, settings)
        } else {
            let path = settings.output_processed_dir.join("invoices_clean.csv");
            write_dataset(&path, settings, records.iter().map(|r| (r, None)), false)?;
            Ok(vec![path])
        }
    }

    fn write_flagged(
        &mut self,
        records: &[ClassifiedInvoice],
        settings: &SettingsConfig,
    ) -> Result<PathBuf> {
        let path = settings.output_processed_dir.join("shortages_flagged.csv");
        write_dataset(
            &path,
            settings,
            records.iter().map(|c| (&c.record, Some(c))),
            true,
        )?;
        Ok(path)
    }

    fn write_shortages_only(
        &mut self,
        records: &[ClassifiedInvoice],
        settings: &SettingsConfig,
    ) -> Result<PathBuf> {
        let path = settings.output_processed_dir.join("shortages_only.csv");
        write_dataset(
            &path,
            settings,
            records
                .iter()
                .filter(|c| c.is_shortage)
                .map(|c| (&c.record, Some(c))),
            true,
        )?;
        Ok(path)
    }

    fn write_kpis(
        &mut self,
        kpis: &KpiSummary,
        settings: &SettingsConfig,
    ) -> Result<Vec<PathBuf>> {
        let dir = &settings.output_processed_dir;
        let mut paths = Vec::with_capacity(4);
        paths.push(write_rows(
            &dir.join("total_shortage.csv"),
            &["shortage_count", "total_shortage"],
            std::slice::from_ref(&kpis.total),
        )?);
        paths.push(write_rows(
            &dir.join("annual_shortages.csv"),
            &["payment_year", "shortage_count", "total_shortage", "mean_shortage"],
            &kpis.annual,
        )?);
        paths.push(write_rows(
            &dir.join("aged_shortages_by_year.csv"),
            &["payment_year", "age_bucket", "shortage_count", "total_shortage"],
            &kpis.aged_shortages,
        )?);
        paths.push(write_rows(
            &dir.join("aged_invoices_by_year.csv"),
            &[
                "payment_year",
                "age_bucket",
                "invoice_count",
                "shortage_count",
                "total_invoiced",
                "total_shortage",
            ],
            &kpis.aged_invoices,
        )?);
        Ok(paths)
    }
}

fn write_clean_partitioned(
    records: &[InvoiceRecord],
    settings: &SettingsConfig,
) -> Result<Vec<PathBuf>> {
    let base = settings.output_processed_dir.join("invoices_clean");
    let mut years: Vec<i32> = records.iter().map(|r| r.payment_year).collect();
    years.sort_unstable();
    years.dedup();

    let mut paths = Vec::with_capacity(years.len());
    for year in years {
        let path = base.join(format!("payment_year={year}")).join("part.csv");
        write_dataset(
            &path,
            settings,
            records
                .iter()
                .filter(|r| r.payment_year == year)
                .map(|r| (r, None)),
            false,
        )?;
        paths.push(path);
    }
    Ok(paths)
}

/// Writes invoice rows, optionally with their classification columns. Flag
/// columns come from the configuration so every row has the same shape.
fn write_dataset<'a, I>(
    path: &Path,
    settings: &SettingsConfig,
    rows: I,
    with_classification: bool,
) -> Result<()>
where
    I: Iterator<Item = (&'a InvoiceRecord, Option<&'a ClassifiedInvoice>)>,
{
    let flag_names: Vec<&String> = settings.flag_columns.keys().collect();

    write_atomic(path, |writer| {
        let mut header: Vec<String> = vec![
            "invoice_id".to_string(),
            "account_ref".to_string(),
            "invoiced_amount".to_string(),
            "paid_amount".to_string(),
            "invoice_date".to_string(),
            "payment_date".to_string(),
            "payment_year".to_string(),
            "status".to_string(),
        ];
        header.extend(flag_names.iter().map(|name| name.to_string()));
        header.push("currency".to_string());
        header.push("source_file".to_string());
        if with_classification {
            header.push("is_shortage".to_string());
            header.push("shortage_amount".to_string());
        }
        writer.write_record(&header)?;

        for (record, classified) in rows {
            let mut row: Vec<String> = vec![
                record.invoice_id.clone(),
                record.account_ref.clone(),
                record.invoiced_amount.to_string(),
                record.paid_amount.to_string(),
                record.invoice_date.format("%Y-%m-%d").to_string(),
                record.payment_date.format("%Y-%m-%d").to_string(),
                record.payment_year.to_string(),
                record.status.clone(),
            ];
            for name in &flag_names {
                let cell = match record.flags.get(*name) {
                    Some(Some(value)) => value.to_string(),
                    _ => String::new(),
                };
                row.push(cell);
            }
            row.push(record.currency.clone().unwrap_or_default());
            row.push(record.source_file.clone());
            if let Some(classified) = classified {
                row.push(classified.is_shortage.to_string());
                row.push(classified.shortage_amount.to_string());
            }
            writer.write_record(&row)?;
        }
        Ok(())
    })
}

/// Writes one KPI table. The header is written explicitly so a table with no
/// rows still comes out as a header-only CSV rather than an empty file.
fn write_rows<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<PathBuf> {
    write_atomic(path, |writer| {
        writer.write_record(headers)?;
        for row in rows {
            writer.serialize(row)?;
        }
        Ok(())
    })?;
    Ok(path.to_path_buf())
}

/// Temp-then-rename so a crashed run never leaves a half-written output
/// where a consumer would pick it up.
fn write_atomic<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");

    let result = (|| {
        // Headers are written explicitly by every caller; auto-headers would
        // double them up on the first serialized row.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(File::create(&tmp)?);
        write_fn(&mut writer)?;
        writer.flush()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            info!("Wrote {}", path.display());
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}
