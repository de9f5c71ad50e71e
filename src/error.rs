use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that end a pipeline run. Everything else degrades into warnings.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Transformation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidInput,
    UpstreamUnavailable,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::UpstreamUnavailable => "upstream-unavailable",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            PipelineError::InvalidInput(d) | PipelineError::UpstreamUnavailable(d) => d.clone(),
            PipelineError::Cancelled => "the model request was cancelled".to_string(),
        }
    }
}

/// Shape violations of the tabular model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("Dataset has no headers")]
    NoHeaders,

    #[error("Empty header name at position {0}")]
    EmptyHeader(usize),

    #[error("Duplicate header: {0}")]
    DuplicateHeader(String),

    #[error("Row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported dataset shape: {0}")]
    UnsupportedShape(String),
}

/// Failure of a single plan step. The executor records these as warnings and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Column not found: {column}{}", suggestion_hint(.suggestion))]
    MissingColumn {
        column: String,
        suggestion: Option<String>,
    },

    #[error("Unsupported step: {0}")]
    Unsupported(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("No numeric values to aggregate in column {0}")]
    NoNumericValues(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

/// Transport-level failures talking to the model service.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API call failed: {0}")]
    Transport(String),

    #[error("LLM API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed LLM response: {0}")]
    Malformed(String),

    #[error("LLM response was filtered by content policy")]
    ContentFiltered,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Failures loading a dataset from an ingestion source.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
pub type StepResult<T> = std::result::Result<T, StepError>;
