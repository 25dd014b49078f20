use crate::schema::SchemaViolation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Retrieval,
    Ranking,
    Assessment,
    Aggregation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Retrieval => "retrieval",
            Stage::Ranking => "ranking",
            Stage::Assessment => "assessment",
            Stage::Aggregation => "aggregation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single external call or of validating its output.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("{service} timed out after {after:?}")]
    UpstreamTimeout { service: String, after: Duration },

    #[error("{service} unavailable: {details}")]
    UpstreamUnavailable { service: String, details: String },

    /// The service refused the request itself; re-sending it cannot help.
    #[error("{service} rejected the request: {details}")]
    Rejected { service: String, details: String },

    #[error("call cancelled")]
    Cancelled,
}

impl StageError {
    pub fn unavailable(service: impl Into<String>, details: impl fmt::Display) -> Self {
        StageError::UpstreamUnavailable {
            service: service.into(),
            details: details.to_string(),
        }
    }

    pub fn rejected(service: impl Into<String>, details: impl fmt::Display) -> Self {
        StageError::Rejected {
            service: service.into(),
            details: details.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::Schema(_)
                | StageError::UpstreamTimeout { .. }
                | StageError::UpstreamUnavailable { .. }
        )
    }
}

impl From<SchemaViolation> for StageError {
    fn from(value: SchemaViolation) -> Self {
        StageError::Schema(value.to_string())
    }
}

impl From<serde_json::Error> for StageError {
    fn from(value: serde_json::Error) -> Self {
        StageError::Schema(value.to_string())
    }
}

impl From<url::ParseError> for StageError {
    fn from(value: url::ParseError) -> Self {
        StageError::unavailable("url", value)
    }
}

impl From<reqwest::Error> for StageError {
    fn from(value: reqwest::Error) -> Self {
        let service = value
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        if value.is_timeout() {
            StageError::UpstreamTimeout {
                service,
                after: Duration::ZERO,
            }
        } else if value.is_decode() {
            StageError::Schema(value.to_string())
        } else {
            StageError::UpstreamUnavailable {
                service,
                details: value.to_string(),
            }
        }
    }
}

/// A cited excerpt that could not be found in the paper it was attributed to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("excerpt cited for {paper_id} not found in source: {excerpt:?}")]
pub struct GroundingViolation {
    pub paper_id: String,
    pub excerpt: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed after {attempts} attempt(s): {source}")]
    Stage {
        stage: Stage,
        attempts: u32,
        #[source]
        source: StageError,
    },

    #[error("evaluation cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("invalid idea: {0}")]
    InvalidIdea(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Cancelled { stage } => Some(*stage),
            PipelineError::InvalidIdea(_) | PipelineError::InvalidConfig(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("document had no readable text: {0}")]
    Empty(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("evidence store error: {0}")]
    Store(#[from] StageError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
