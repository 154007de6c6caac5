use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rust_decimal::Decimal;
use shortage_pipeline::{run_from_config_dir, PipelineError};

fn write_config(dir: &Path, raw_dir: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let settings = format!(
        r#"input_raw_dir: {raw}
output_processed_dir: {out}
date_format: "%d/%m/%Y"
round_decimals: 2
rounding_mode: half_up
aging_bucket_days: [30, 60, 90]
report_date: 2023-12-31
partition_by_year: true
tolerance: "0.01"
expected_currency: USD
columns:
  invoice_id: "Randomized Invoice"
  account_ref: "Payee"
  invoiced_amount: "Invoice Amount"
  paid_amount: "Actual Paid Amount"
  invoice_date: "Invoice Date"
  payment_date: "Payment Due Date"
  status: "Invoice Status"
flag_columns:
  deductions: "Any Deductions"
currency_columns:
  paid: "Paid Amount Currency"
  invoiced: "Invoice Currency"
"#,
        raw = raw_dir.display(),
        out = out_dir.display()
    );
    fs::write(dir.join("settings.yaml"), settings)?;
    fs::write(
        dir.join("rules.yaml"),
        "eligible_statuses:\n  - paid\n  - paid_price_discrepancy\nrequired_flags:\n  - deductions\n",
    )?;
    Ok(())
}

fn write_fixture(raw_dir: &Path) -> Result<()> {
    fs::create_dir_all(raw_dir)?;
    let header = "Randomized Invoice,Payee,Invoice Amount,Actual Paid Amount,Invoice Date,Payment Due Date,Invoice Status,Any Deductions,Paid Amount Currency,Invoice Currency";
    let rows = [
        // Eligible shortage of 20.00, 15 days old at the report date.
        "INV-1,ACME,100.00,80.00,16/12/2023,20/12/2023,PAID,yes,USD,USD",
        // Eligible shortage of 5.50 in an older year, 90+ days old.
        "INV-2,ACME,55.50,50.00,01/06/2022,15/06/2022,PAID,yes,USD,USD",
        // Ineligible status, large gap: must never be flagged.
        "INV-3,ACME,200.00,10.00,16/12/2023,20/12/2023,OPEN,yes,USD,USD",
        // Overpayment: eligible but not a shortage.
        "INV-4,ACME,50.00,60.00,16/12/2023,20/12/2023,PAID,yes,USD,USD",
        // Delta within tolerance: not flagged.
        "INV-5,ACME,100.00,99.99,16/12/2023,20/12/2023,PAID,yes,USD,USD",
        // Unparseable date: rejected, counted.
        "INV-6,ACME,10.00,5.00,2023-12-16,20/12/2023,PAID,yes,USD,USD",
        // Wrong currency: rejected, counted.
        "INV-7,ACME,10.00,5.00,16/12/2023,20/12/2023,PAID,yes,EUR,EUR",
    ];
    fs::write(
        raw_dir.join("invoices.csv"),
        format!("{header}\n{}\n", rows.join("\n")),
    )?;
    Ok(())
}

fn read_outputs(out_dir: &Path) -> Result<BTreeMap<PathBuf, String>> {
    let mut outputs = BTreeMap::new();
    let mut stack = vec![out_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path.strip_prefix(out_dir)?.to_path_buf();
                outputs.insert(relative, fs::read_to_string(&path)?);
            }
        }
    }
    Ok(outputs)
}

#[test]
fn test_full_run_produces_expected_outputs() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    write_fixture(&raw_dir)?;
    write_config(&config_dir, &raw_dir, &out_dir)?;

    let report = run_from_config_dir(&config_dir)?;

    assert_eq!(report.rows_read, 7);
    assert_eq!(report.rows_accepted, 5);
    assert_eq!(report.rows_rejected, 2);
    assert_eq!(report.rejections_by_reason.get("unparseable_date"), Some(&1));
    assert_eq!(report.rejections_by_reason.get("currency_mismatch"), Some(&1));
    assert_eq!(report.shortage_count, 2);
    assert_eq!(report.total_shortage, "25.50".parse::<Decimal>()?);

    let outputs = read_outputs(&out_dir)?;
    assert!(outputs.contains_key(Path::new("invoices_clean/payment_year=2022/part.csv")));
    assert!(outputs.contains_key(Path::new("invoices_clean/payment_year=2023/part.csv")));
    assert!(outputs.contains_key(Path::new("shortages_flagged.csv")));
    assert!(outputs.contains_key(Path::new("shortages_only.csv")));

    let shortages_only = &outputs[Path::new("shortages_only.csv")];
    assert!(shortages_only.contains("INV-1"));
    assert!(shortages_only.contains("INV-2"));
    assert!(!shortages_only.contains("INV-3"));
    assert!(!shortages_only.contains("INV-4"));
    assert!(!shortages_only.contains("INV-5"));

    // Aging at report_date 2023-12-31: INV-1 is 15 days old, INV-2 is 90+.
    let aged = &outputs[Path::new("aged_shortages_by_year.csv")];
    assert!(aged.contains("2023,0-30,1,20.00"));
    assert!(aged.contains("2022,90+,1,5.50"));

    Ok(())
}

#[test]
fn test_annual_shortages_sum_to_total() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    write_fixture(&raw_dir)?;
    write_config(&config_dir, &raw_dir, &out_dir)?;

    run_from_config_dir(&config_dir)?;

    let outputs = read_outputs(&out_dir)?;
    let total_table = &outputs[Path::new("total_shortage.csv")];
    let total: Decimal = total_table
        .lines()
        .nth(1)
        .and_then(|line| line.split(',').nth(1))
        .unwrap()
        .parse()?;

    let annual_sum: Decimal = outputs[Path::new("annual_shortages.csv")]
        .lines()
        .skip(1)
        .map(|line| line.split(',').nth(2).unwrap().parse::<Decimal>().unwrap())
        .sum();

    assert_eq!(annual_sum, total);
    Ok(())
}

#[test]
fn test_shortage_free_run_keeps_kpi_headers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&raw_dir)?;
    let header = "Randomized Invoice,Payee,Invoice Amount,Actual Paid Amount,Invoice Date,Payment Due Date,Invoice Status,Any Deductions,Paid Amount Currency,Invoice Currency";
    fs::write(
        raw_dir.join("invoices.csv"),
        format!("{header}\nINV-1,ACME,100.00,100.00,16/12/2023,20/12/2023,PAID,yes,USD,USD\n"),
    )?;
    write_config(&config_dir, &raw_dir, &out_dir)?;

    let report = run_from_config_dir(&config_dir)?;
    assert_eq!(report.shortage_count, 0);

    let outputs = read_outputs(&out_dir)?;
    // No shortages means no aged shortage rows, but the table must still
    // come out as a parseable CSV with its header.
    assert_eq!(
        outputs[Path::new("aged_shortages_by_year.csv")].trim_end(),
        "payment_year,age_bucket,shortage_count,total_shortage"
    );
    let annual = &outputs[Path::new("annual_shortages.csv")];
    assert!(annual.starts_with("payment_year,shortage_count,total_shortage,mean_shortage"));
    assert!(annual.lines().nth(1).is_some_and(|line| line.starts_with("2023,0,")));
    let total = &outputs[Path::new("total_shortage.csv")];
    assert!(total.starts_with("shortage_count,total_shortage"));

    Ok(())
}

#[test]
fn test_runs_are_idempotent() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    write_fixture(&raw_dir)?;
    write_config(&config_dir, &raw_dir, &out_dir)?;

    run_from_config_dir(&config_dir)?;
    let first = read_outputs(&out_dir)?;

    run_from_config_dir(&config_dir)?;
    let second = read_outputs(&out_dir)?;

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_missing_input_dir_is_fatal_and_writes_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    write_config(&config_dir, &tmp.path().join("missing"), &out_dir)?;

    let err = run_from_config_dir(&config_dir).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Stage { stage: "ingest", .. }
    ));
    assert!(!out_dir.exists());
    Ok(())
}

#[test]
fn test_unknown_config_key_is_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let config_dir = tmp.path().join("config");
    write_fixture(&raw_dir)?;
    write_config(&config_dir, &raw_dir, &tmp.path().join("processed"))?;

    let settings_path = config_dir.join("settings.yaml");
    let mut contents = fs::read_to_string(&settings_path)?;
    contents.push_str("mystery_setting: 42\n");
    fs::write(&settings_path, contents)?;

    let err = run_from_config_dir(&config_dir).unwrap_err();
    assert!(matches!(err, PipelineError::Yaml(_)));
    Ok(())
}

#[test]
fn test_malformed_csv_file_is_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let raw_dir = tmp.path().join("raw");
    let out_dir = tmp.path().join("processed");
    let config_dir = tmp.path().join("config");
    write_fixture(&raw_dir)?;
    // A file whose rows do not match its header is a broken input, not a
    // row-level skip.
    fs::write(raw_dir.join("broken.csv"), "A,B,C\n1,2\n1,2,3,4\n")?;
    write_config(&config_dir, &raw_dir, &out_dir)?;

    let err = run_from_config_dir(&config_dir).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Stage { stage: "ingest", .. }
    ));
    Ok(())
}
