use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Raw input directory not found: {0}")]
    InputDirNotFound(PathBuf),

    #[error("No CSV files found in {0}")]
    NoInputFiles(PathBuf),

    #[error("Column '{column}' missing from header of {file}")]
    MissingColumn { file: String, column: String },

    #[error("No invoice records available after normalization ({rejected} rows rejected)")]
    EmptyDataset { rejected: usize },

    #[error("Quality check failed: {0}")]
    QualityCheck(String),

    #[error("Totals check failed: {0}")]
    TotalsMismatch(String),

    #[error("Stage '{stage}' failed after {rows} rows: {source}")]
    Stage {
        stage: &'static str,
        rows: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
