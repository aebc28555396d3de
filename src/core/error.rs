use thiserror::Error;

use super::types::Sequence;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Malformed script: {0}")]
    MalformedScript(String),

    #[error("Chunk record {0} not found")]
    NotFound(Sequence),

    #[error("Statement rejected: {message} (statement: {statement})")]
    StatementExecution { statement: String, message: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Invalid cursor: transaction {transaction} of {total}")]
    InvalidCursor { transaction: u64, total: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedScript(message.into())
    }

    pub fn statement(statement: &str, message: impl Into<String>) -> Self {
        Self::StatementExecution {
            statement: abbreviate(statement),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;

/// Dump statements can be megabytes long; keep error messages readable.
fn abbreviate(statement: &str) -> String {
    const LIMIT: usize = 120;
    let trimmed = statement.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
