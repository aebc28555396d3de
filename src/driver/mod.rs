// ============================================================================
// Database Drivers
// ============================================================================
//
// The replay engine only needs four round-trips from the target database:
// begin, execute (optionally inside a transaction), commit and rollback.
// Statements executed without a transaction id are their own unit of work.
//
// ============================================================================

pub mod data_api;
pub mod memory;

pub use data_api::{DataApiDriver, DataApiSettings};
pub use memory::{JournalEntry, MemoryDriver};

use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle of an open transaction, as issued by the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn begin(&self) -> Result<TransactionId>;

    /// Runs one statement. A statement the database refuses is reported as
    /// [`crate::ReplayError::StatementExecution`]; transport problems as
    /// [`crate::ReplayError::Driver`].
    async fn execute(&self, sql: &str, transaction: Option<&TransactionId>) -> Result<()>;

    /// Returns the status string reported by the database.
    async fn commit(&self, transaction: &TransactionId) -> Result<String>;

    async fn rollback(&self, transaction: &TransactionId) -> Result<String>;
}
