// 🚨 Error taxonomy for the expense pipeline
//
// Row- and period-scoped variants are absorbed where they happen (logged and
// skipped). Only AggregationEmpty and sink failures reach the caller of a run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A collaborator could not produce data for one period
    #[error("fetch failed for {locator}: {message}")]
    TransientFetch { locator: String, message: String },

    /// The extract has no usable table shape
    #[error("no usable table shape: {0}")]
    SchemaInference(String),

    /// A single malformed row
    #[error("row {line}: {message}")]
    RowParse { line: usize, message: String },

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("no expense records survived across all periods")]
    AggregationEmpty,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn fetch(locator: &str, message: impl Into<String>) -> Self {
        PipelineError::TransientFetch {
            locator: locator.to_string(),
            message: message.into(),
        }
    }

    /// True for failures that only cost one period, not the whole run
    pub fn is_period_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFetch { .. }
                | PipelineError::SchemaInference(_)
                | PipelineError::Io(_)
                | PipelineError::Csv(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
