use thiserror::Error;

/// Failures that abort the current render. Empty selections and unmatched
/// join keys are data, not errors, and never travel through this type.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Remote path unreachable, unauthorized or malformed.
    #[error("failed to retrieve {path}: {reason}")]
    Retrieval { path: String, reason: String },

    /// Fetched content is not the expected tabular format or schema.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

impl PipelineError {
    pub fn retrieval(path: &str, reason: impl ToString) -> Self {
        PipelineError::Retrieval {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(path: &str, reason: impl ToString) -> Self {
        PipelineError::Parse {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Retrieval { .. } => "RetrievalError",
            PipelineError::Parse { .. } => "ParseError",
        }
    }
}
