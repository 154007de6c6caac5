use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{info, warn};
use rust_decimal::Decimal;

use crate::analytics::compute_kpis;
use crate::config::{RulesConfig, SettingsConfig};
use crate::error::{PipelineError, Result};
use crate::io::{InvoiceSource, ReportSink};
use crate::normalize::normalize_tables;
use crate::quality::run_quality_checks;
use crate::rules::classify_records;

/// What a completed run produced: every input row accounted for, plus the
/// headline shortage figures and the files written.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub rejections_by_reason: BTreeMap<&'static str, usize>,
    pub shortage_count: usize,
    pub total_shortage: Decimal,
    pub outputs: Vec<PathBuf>,
}

fn stage<T>(name: &'static str, rows: usize, result: Result<T>) -> Result<T> {
    result.map_err(|source| match source {
        // Already carries stage context from a nested call.
        err @ PipelineError::Stage { .. } => err,
        source => PipelineError::Stage {
            stage: name,
            rows,
            source: Box::new(source),
        },
    })
}

/// Execute the full shortage detection workflow: normalize the raw tables,
/// evaluate the shortage rules, gate on quality, aggregate the KPIs and hand
/// the results to the sink. Fails fast; any stage error aborts the run with
/// the stage name and the number of rows processed up to that point.
pub fn run_pipeline(
    settings: &SettingsConfig,
    rules: &RulesConfig,
    source: &dyn InvoiceSource,
    sink: &mut dyn ReportSink,
) -> Result<RunReport> {
    info!("Pipeline started");
    stage("config", 0, settings.validate())?;
    stage("config", 0, rules.validate_against(settings))?;

    let tables = stage("ingest", 0, source.read_tables(settings))?;

    let batch = stage("normalize", 0, normalize_tables(&tables, settings))?;
    let rows_read = batch.rows_read;
    let rows_accepted = batch.records.len();
    let rows_rejected = batch.rejections.len();
    if rows_accepted == 0 {
        return stage(
            "normalize",
            rows_read,
            Err(PipelineError::EmptyDataset {
                rejected: rows_rejected,
            }),
        );
    }
    let mut rejections_by_reason: BTreeMap<&'static str, usize> = BTreeMap::new();
    for rejection in &batch.rejections {
        *rejections_by_reason.entry(rejection.reason.kind()).or_default() += 1;
        warn!(
            "Rejected row {} of {}: {}",
            rejection.row_number, rejection.source_file, rejection.reason
        );
    }

    let classified = classify_records(batch.records, rules, settings);

    stage(
        "quality",
        rows_accepted,
        run_quality_checks(&classified, settings, rules),
    )?;

    let kpis = stage("aggregate", rows_accepted, compute_kpis(&classified, settings))?;

    let mut outputs = Vec::new();
    let clean: Vec<_> = classified.iter().map(|c| c.record.clone()).collect();
    outputs.extend(stage(
        "export",
        rows_accepted,
        sink.write_clean(&clean, settings),
    )?);
    outputs.push(stage(
        "export",
        rows_accepted,
        sink.write_flagged(&classified, settings),
    )?);
    outputs.push(stage(
        "export",
        rows_accepted,
        sink.write_shortages_only(&classified, settings),
    )?);
    outputs.extend(stage(
        "export",
        rows_accepted,
        sink.write_kpis(&kpis, settings),
    )?);

    let report = RunReport {
        rows_read,
        rows_accepted,
        rows_rejected,
        rejections_by_reason,
        shortage_count: kpis.total.shortage_count,
        total_shortage: kpis.total.total_shortage,
        outputs,
    };
    info!(
        "Pipeline completed: {} rows read, {} accepted, {} rejected, {} shortages totalling {}",
        report.rows_read,
        report.rows_accepted,
        report.rows_rejected,
        report.shortage_count,
        report.total_shortage
    );
    Ok(report)
}
