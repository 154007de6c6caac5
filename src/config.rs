use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use log::debug;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Rounding applied to every monetary field after parsing. `HalfUp` matches
/// the behaviour most invoicing systems expect; `HalfEven` is available for
/// ledgers that require banker's rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfEven,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// Mapping from canonical invoice fields to raw source column names.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMap {
    pub invoice_id: String,
    pub account_ref: String,
    pub invoiced_amount: String,
    pub paid_amount: String,
    pub invoice_date: String,
    pub payment_date: String,
    pub status: String,
}

impl ColumnMap {
    /// All mapped raw column names, used for header validation.
    pub fn raw_columns(&self) -> Vec<&str> {
        vec![
            &self.invoice_id,
            &self.account_ref,
            &self.invoiced_amount,
            &self.paid_amount,
            &self.invoice_date,
            &self.payment_date,
            &self.status,
        ]
    }
}

/// How a raw flag cell becomes a boolean. `Boolean` parses a yes/no style
/// vocabulary; `Presence` treats any non-empty cell as true, for columns
/// where the signal is that a value exists at all (e.g. a child invoice
/// reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagParse {
    #[default]
    Boolean,
    Presence,
}

/// Full form of a flag column mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagSpec {
    pub column: String,
    #[serde(default)]
    pub parse: FlagParse,
}

/// One entry under `flag_columns`: either just the raw column name (parsed
/// as a boolean) or a spec with an explicit parse mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlagColumn {
    Column(String),
    Spec(FlagSpec),
}

impl FlagColumn {
    pub fn column(&self) -> &str {
        match self {
            FlagColumn::Column(column) => column,
            FlagColumn::Spec(spec) => &spec.column,
        }
    }

    pub fn parse(&self) -> FlagParse {
        match self {
            FlagColumn::Column(_) => FlagParse::Boolean,
            FlagColumn::Spec(spec) => spec.parse,
        }
    }
}

/// Raw column names holding the currency of the paid and invoiced amounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurrencyColumns {
    pub paid: String,
    pub invoiced: String,
}

/// Typed representation of `settings.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    pub input_raw_dir: PathBuf,
    pub output_processed_dir: PathBuf,
    /// strftime pattern used to parse both date columns, e.g. `%d/%m/%Y`.
    pub date_format: String,
    pub round_decimals: u32,
    #[serde(default)]
    pub rounding_mode: RoundingMode,
    /// Upper bounds (in days) of the aging buckets; `[30, 60, 90]` yields
    /// buckets 0-30, 31-60, 61-90 and 90+.
    #[serde(default = "default_aging_buckets")]
    pub aging_bucket_days: Vec<i64>,
    /// Reference date for aging; defaults to today when omitted.
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    #[serde(default)]
    pub partition_by_year: bool,
    /// Deltas at or below this amount are not surfaced as shortages.
    #[serde(default)]
    pub tolerance: Decimal,
    /// When set, rows whose currency columns differ from this value are
    /// rejected rather than mispriced into the aggregates.
    #[serde(default)]
    pub expected_currency: Option<String>,
    pub columns: ColumnMap,
    /// Flag name -> raw column mapping. Rules reference flags by name.
    #[serde(default)]
    pub flag_columns: BTreeMap<String, FlagColumn>,
    #[serde(default)]
    pub currency_columns: Option<CurrencyColumns>,
}

fn default_aging_buckets() -> Vec<i64> {
    vec![30, 60, 90]
}

impl SettingsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.date_format.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "date_format must not be empty".to_string(),
            ));
        }
        if self.round_decimals > 28 {
            return Err(PipelineError::InvalidConfig(format!(
                "round_decimals {} exceeds supported precision (28)",
                self.round_decimals
            )));
        }
        if self.aging_bucket_days.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "aging_bucket_days must not be empty".to_string(),
            ));
        }
        let mut prev = 0i64;
        for &bound in &self.aging_bucket_days {
            if bound <= prev {
                return Err(PipelineError::InvalidConfig(format!(
                    "aging_bucket_days must be positive and strictly increasing, got {:?}",
                    self.aging_bucket_days
                )));
            }
            prev = bound;
        }
        if self.tolerance < Decimal::ZERO {
            return Err(PipelineError::InvalidConfig(
                "tolerance must not be negative".to_string(),
            ));
        }
        if self.expected_currency.is_some() && self.currency_columns.is_none() {
            return Err(PipelineError::InvalidConfig(
                "expected_currency requires currency_columns to be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Reference date used for aging and future-date checks.
    pub fn report_date(&self) -> NaiveDate {
        self.report_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    /// Round a monetary value to the configured precision and mode.
    pub fn round_amount(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.round_decimals, self.rounding_mode.strategy())
    }
}

/// Typed representation of `rules.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    pub eligible_statuses: Vec<String>,
    #[serde(default)]
    pub required_flags: Vec<String>,
}

impl RulesConfig {
    /// Cross-checks the rules against the settings they will run with.
    pub fn validate_against(&self, settings: &SettingsConfig) -> Result<()> {
        if self.eligible_statuses.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "eligible_statuses must not be empty".to_string(),
            ));
        }
        for flag in &self.required_flags {
            if !settings.flag_columns.contains_key(flag) {
                return Err(PipelineError::InvalidConfig(format!(
                    "required flag '{flag}' has no entry in flag_columns"
                )));
            }
        }
        Ok(())
    }
}

pub fn load_settings(path: &Path) -> Result<SettingsConfig> {
    let settings: SettingsConfig = load_yaml(path)?;
    settings.validate()?;
    debug!("Parsed settings from {}: {:?}", path.display(), settings);
    Ok(settings)
}

pub fn load_rules(path: &Path) -> Result<RulesConfig> {
    let mut rules: RulesConfig = load_yaml(path)?;
    for status in &mut rules.eligible_statuses {
        *status = status.trim().to_uppercase();
    }
    debug!("Parsed rules from {}: {:?}", path.display(), rules);
    Ok(rules)
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PipelineError::ConfigNotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}
