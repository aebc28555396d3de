// ============================================================================
// In-Memory Driver
// ============================================================================
//
// A small stand-in for the target database. Statements are parsed with
// sqlparser (MySQL dialect); CREATE TABLE, INSERT ... VALUES and DROP TABLE
// change an in-memory table map, every other statement that parses is
// accepted without effect, and statements that do not parse are rejected.
//
// Transactions work on a private copy of the tables that replaces the shared
// one on commit. Only one writer is expected at a time, so there is no
// conflict detection.
//
// ============================================================================

use super::{DatabaseDriver, TransactionId};
use crate::core::{ReplayError, Result};
use async_trait::async_trait;
use sqlparser::ast::{ObjectName, ObjectType, SetExpr, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table name to rendered rows, in insertion order.
pub type Tables = BTreeMap<String, Vec<String>>;

/// One call received by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Begin(TransactionId),
    Execute {
        sql: String,
        transaction: Option<TransactionId>,
    },
    Commit(TransactionId),
    Rollback(TransactionId),
}

#[derive(Default)]
struct State {
    tables: Tables,
    open: HashMap<TransactionId, Tables>,
    next_id: u64,
    journal: Vec<JournalEntry>,
    rejected_patterns: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<State>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every statement containing `pattern` fail as if the database
    /// had rejected it.
    pub async fn reject_containing(&self, pattern: &str) {
        self.state
            .lock()
            .await
            .rejected_patterns
            .push(pattern.to_string());
    }

    pub async fn clear_rejections(&self) {
        self.state.lock().await.rejected_patterns.clear();
    }

    /// Committed tables.
    pub async fn tables(&self) -> Tables {
        self.state.lock().await.tables.clone()
    }

    pub async fn rows(&self, table: &str) -> Option<Vec<String>> {
        self.state.lock().await.tables.get(table).cloned()
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    pub async fn open_transactions(&self) -> usize {
        self.state.lock().await.open.len()
    }
}

fn table_name(name: &ObjectName) -> std::result::Result<String, String> {
    name.0
        .last()
        .map(|part| unquote(&part.to_string()))
        .ok_or_else(|| "Invalid table name".to_string())
}

fn unquote(raw: &str) -> String {
    let last = raw.rsplit('.').next().unwrap_or(raw);
    last.trim_matches(|c| c == '`' || c == '"').to_string()
}

fn apply(tables: &mut Tables, sql: &str) -> std::result::Result<(), String> {
    let statements = Parser::parse_sql(&MySqlDialect {}, sql).map_err(|e| e.to_string())?;

    for statement in statements {
        match statement {
            Statement::CreateTable(create) => {
                let name = table_name(&create.name)?;
                if tables.contains_key(&name) {
                    if !create.if_not_exists {
                        return Err(format!("Table '{}' already exists", name));
                    }
                } else {
                    tables.insert(name, Vec::new());
                }
            }
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                if_exists,
                ..
            } => {
                for name in &names {
                    let name = table_name(name)?;
                    if tables.remove(&name).is_none() && !if_exists {
                        return Err(format!("Unknown table '{}'", name));
                    }
                }
            }
            Statement::Insert(insert) => {
                let name = unquote(&insert.table.to_string());
                let rows = tables
                    .get_mut(&name)
                    .ok_or_else(|| format!("Table '{}' doesn't exist", name))?;
                let Some(source) = insert.source else {
                    return Err("INSERT without VALUES is not supported".to_string());
                };
                let SetExpr::Values(values) = *source.body else {
                    return Err("Only INSERT ... VALUES is supported".to_string());
                };
                for row in values.rows {
                    let rendered: Vec<String> = row.iter().map(|expr| expr.to_string()).collect();
                    rows.push(rendered.join(", "));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    async fn begin(&self) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = TransactionId::new(format!("mem-tx-{}", state.next_id));
        let snapshot = state.tables.clone();
        state.open.insert(id.clone(), snapshot);
        state.journal.push(JournalEntry::Begin(id.clone()));
        Ok(id)
    }

    async fn execute(&self, sql: &str, transaction: Option<&TransactionId>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.journal.push(JournalEntry::Execute {
            sql: sql.to_string(),
            transaction: transaction.cloned(),
        });

        if let Some(pattern) = state
            .rejected_patterns
            .iter()
            .find(|pattern| sql.contains(pattern.as_str()))
        {
            return Err(ReplayError::statement(
                sql,
                format!("rejected (matches '{}')", pattern),
            ));
        }

        let State { tables, open, .. } = &mut *state;
        let target = match transaction {
            Some(id) => open
                .get_mut(id)
                .ok_or_else(|| ReplayError::driver(format!("Transaction {} is not open", id)))?,
            None => tables,
        };

        // A failing statement must leave no trace of itself.
        let mut scratch = target.clone();
        apply(&mut scratch, sql).map_err(|message| ReplayError::statement(sql, message))?;
        *target = scratch;
        Ok(())
    }

    async fn commit(&self, transaction: &TransactionId) -> Result<String> {
        let mut state = self.state.lock().await;
        let staged = state
            .open
            .remove(transaction)
            .ok_or_else(|| ReplayError::driver(format!("Transaction {} is not open", transaction)))?;
        state.tables = staged;
        state.journal.push(JournalEntry::Commit(transaction.clone()));
        Ok("Transaction Committed".to_string())
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<String> {
        let mut state = self.state.lock().await;
        state
            .open
            .remove(transaction)
            .ok_or_else(|| ReplayError::driver(format!("Transaction {} is not open", transaction)))?;
        state.journal.push(JournalEntry::Rollback(transaction.clone()));
        Ok("Rollback Complete".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_autocommit_statements_apply_immediately() {
        let driver = MemoryDriver::new();
        driver.execute("CREATE TABLE t (id INT);", None).await.unwrap();
        driver.execute("INSERT INTO t VALUES (1), (2);", None).await.unwrap();

        assert_eq!(driver.rows("t").await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_transaction_is_invisible_until_commit() {
        let driver = MemoryDriver::new();
        driver.execute("CREATE TABLE t (id INT);", None).await.unwrap();

        let tx = driver.begin().await.unwrap();
        driver.execute("INSERT INTO t VALUES (1);", Some(&tx)).await.unwrap();
        assert!(driver.rows("t").await.unwrap().is_empty());

        let status = driver.commit(&tx).await.unwrap();
        assert_eq!(status, "Transaction Committed");
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1"]);
        assert_eq!(driver.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let driver = MemoryDriver::new();
        let tx = driver.begin().await.unwrap();
        driver.execute("CREATE TABLE t (id INT);", Some(&tx)).await.unwrap();
        driver.rollback(&tx).await.unwrap();

        assert!(driver.tables().await.is_empty());
        assert!(driver.commit(&tx).await.is_err());
    }

    #[tokio::test]
    async fn test_backticked_names_and_drop() {
        let driver = MemoryDriver::new();
        driver
            .execute("CREATE TABLE `abilities` (`id` INT);", None)
            .await
            .unwrap();
        driver
            .execute("INSERT INTO `abilities` VALUES (7);", None)
            .await
            .unwrap();
        assert_eq!(driver.rows("abilities").await.unwrap(), vec!["7"]);

        driver
            .execute("DROP TABLE IF EXISTS `abilities`;", None)
            .await
            .unwrap();
        driver
            .execute("DROP TABLE IF EXISTS `abilities`;", None)
            .await
            .unwrap();
        assert!(driver.rows("abilities").await.is_none());
        assert!(driver.execute("DROP TABLE `abilities`;", None).await.is_err());
    }

    #[tokio::test]
    async fn test_unparsable_statement_is_rejected() {
        let driver = MemoryDriver::new();
        let err = driver.execute("INSERT INTO (;", None).await.unwrap_err();
        assert!(matches!(err, ReplayError::StatementExecution { .. }));
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_is_rejected() {
        let driver = MemoryDriver::new();
        let err = driver
            .execute("INSERT INTO nowhere VALUES (1);", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_rejection_hook() {
        let driver = MemoryDriver::new();
        driver.execute("CREATE TABLE t (id INT);", None).await.unwrap();
        driver.reject_containing("(13)").await;

        assert!(driver.execute("INSERT INTO t VALUES (13);", None).await.is_err());
        driver.clear_rejections().await;
        assert!(driver.execute("INSERT INTO t VALUES (13);", None).await.is_ok());
        assert_eq!(driver.journal().await.len(), 3);
    }

    #[tokio::test]
    async fn test_set_statements_are_accepted() {
        let driver = MemoryDriver::new();
        driver
            .execute("SET FOREIGN_KEY_CHECKS = 0;", None)
            .await
            .unwrap();
    }
}
