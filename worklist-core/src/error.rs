use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorklistError {
    #[error("FHIRPath parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("FHIRPath evaluation error: {0}")]
    Eval(String),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Invalid date filter: {0}")]
    InvalidDateFilter(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl WorklistError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WorklistError>;
