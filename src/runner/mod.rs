// ============================================================================
// Transaction Runner
// ============================================================================
//
// Replays SQL text against a DatabaseDriver in one of two modes:
//
// - Atomic: the whole text is one transaction. Statements are split up front,
//   executed in order under one transaction id and committed once. Any
//   failure rolls the transaction back and nothing is committed.
//
// - Bulk: every complete statement outside a marker pair is executed on its
//   own, and a marker pair wraps its statements in begin/commit. A rejected
//   statement only loses itself unless the failure policy is `Halt`.
//
// ============================================================================

pub mod statements;

pub use statements::{STATEMENT_DELIMITER, StatementBoundary, StatementSplitter, split_statements};

use crate::core::{ReplayError, Result};
use crate::driver::{DatabaseDriver, TransactionId};
use crate::splitter::Markers;
use crate::splitter::tokenizer::{Action, TokenizerState, transition};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    #[default]
    Atomic,
    Bulk,
}

impl FromStr for ReplayMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self::Atomic),
            "bulk" => Ok(Self::Bulk),
            other => Err(format!("unknown replay mode '{}' (expected atomic or bulk)", other)),
        }
    }
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayMode::Atomic => write!(f, "atomic"),
            ReplayMode::Bulk => write!(f, "bulk"),
        }
    }
}

/// What bulk mode does when the database rejects a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkFailurePolicy {
    /// Record the failure and carry on with the next statement.
    #[default]
    Continue,
    /// Stop at the first rejected statement.
    Halt,
}

impl FromStr for BulkFailurePolicy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "halt" => Ok(Self::Halt),
            other => Err(format!(
                "unknown bulk failure policy '{}' (expected continue or halt)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    pub mode: ReplayMode,
    pub boundary: StatementBoundary,
    pub bulk_failure: BulkFailurePolicy,
    pub markers: Markers,
}

impl RunnerOptions {
    pub fn new(mode: ReplayMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn boundary(mut self, boundary: StatementBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn bulk_failure(mut self, policy: BulkFailurePolicy) -> Self {
        self.bulk_failure = policy;
        self
    }

    pub fn markers(mut self, markers: Markers) -> Self {
        self.markers = markers;
        self
    }
}

/// A statement bulk mode let through after the database rejected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// 1-based position among the statements of the run.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub statements: usize,
    pub transactions: usize,
    pub commit_statuses: Vec<String>,
    pub failures: Vec<StatementFailure>,
}

#[derive(Clone)]
pub struct TransactionRunner {
    driver: Arc<dyn DatabaseDriver>,
    options: RunnerOptions,
}

impl TransactionRunner {
    pub fn new(driver: Arc<dyn DatabaseDriver>, options: RunnerOptions) -> Self {
        Self { driver, options }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub async fn run(&self, sql_text: &str) -> Result<RunReport> {
        match self.options.mode {
            ReplayMode::Atomic => self.run_atomic(sql_text).await,
            ReplayMode::Bulk => self.run_bulk(sql_text).await,
        }
    }

    /// Best effort: the original failure is what gets reported.
    async fn abandon(&self, transaction: &TransactionId) {
        if let Err(err) = self.driver.rollback(transaction).await {
            warn!(transaction = %transaction, error = %err, "rollback failed");
        }
    }

    /// A transaction whose commit failed is rolled back before the error is
    /// returned.
    async fn commit(&self, transaction: &TransactionId) -> Result<String> {
        match self.driver.commit(transaction).await {
            Ok(status) => Ok(status),
            Err(err) => {
                warn!(transaction = %transaction, error = %err, "commit failed");
                self.abandon(transaction).await;
                Err(err)
            }
        }
    }

    async fn run_atomic(&self, sql_text: &str) -> Result<RunReport> {
        let statements = split_statements(sql_text, self.options.boundary)?;

        let transaction = self.driver.begin().await?;
        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = self.driver.execute(statement, Some(&transaction)).await {
                warn!(
                    transaction = %transaction,
                    statement = index + 1,
                    error = %err,
                    "statement failed, aborting segment"
                );
                self.abandon(&transaction).await;
                return Err(err);
            }
        }

        let status = self.commit(&transaction).await?;
        info!(
            transaction = %transaction,
            statements = statements.len(),
            status = %status,
            "commit a transaction"
        );

        Ok(RunReport {
            statements: statements.len(),
            transactions: 1,
            commit_statuses: vec![status],
            failures: Vec::new(),
        })
    }

    async fn run_bulk(&self, script: &str) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut splitter = StatementSplitter::new(self.options.boundary);
        let mut state = TokenizerState::OutsideTransaction;
        let mut open: Option<TransactionId> = None;

        for (line_no, line) in script.split_inclusive('\n').enumerate() {
            let (next, action) = transition(state, self.options.markers.classify(line));
            state = next;

            match action {
                Action::Open => {
                    let transaction = self.driver.begin().await?;
                    debug!(transaction = %transaction, line = line_no + 1, "transaction opened");
                    open = Some(transaction);
                    report.transactions += 1;
                }
                Action::Emit => {
                    if let Some(transaction) = open.take() {
                        let status = self.commit(&transaction).await?;
                        info!(transaction = %transaction, status = %status, "commit a transaction");
                        report.commit_statuses.push(status);
                    }
                }
                Action::Reopen | Action::Reject => {
                    if let Some(transaction) = open.take() {
                        self.abandon(&transaction).await;
                    }
                    return Err(ReplayError::malformed(format!(
                        "unexpected transaction marker at line {}",
                        line_no + 1
                    )));
                }
                Action::Append | Action::Skip => {
                    let Some(statement) = splitter.push_line(line) else {
                        continue;
                    };
                    report.statements += 1;
                    match self.driver.execute(&statement, open.as_ref()).await {
                        Ok(()) => {}
                        Err(ReplayError::StatementExecution { statement, message })
                            if self.options.bulk_failure == BulkFailurePolicy::Continue =>
                        {
                            warn!(
                                index = report.statements,
                                statement = %statement,
                                error = %message,
                                "statement rejected, continuing"
                            );
                            report.failures.push(StatementFailure {
                                index: report.statements,
                                message,
                            });
                        }
                        Err(err) => {
                            if let Some(transaction) = open.take() {
                                self.abandon(&transaction).await;
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }

        if let Some(transaction) = open.take() {
            self.abandon(&transaction).await;
            return Err(ReplayError::malformed("unterminated transaction at end of script"));
        }
        if let Some(fragment) = splitter.finish() {
            warn!(bytes = fragment.len(), "trailing text without delimiter was not executed");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{JournalEntry, MemoryDriver};
    use crate::splitter::{COMMIT_MARKER, START_MARKER};
    use async_trait::async_trait;

    /// Accepts everything but refuses to commit.
    struct CommitRefusingDriver(MemoryDriver);

    #[async_trait]
    impl DatabaseDriver for CommitRefusingDriver {
        async fn begin(&self) -> Result<TransactionId> {
            self.0.begin().await
        }

        async fn execute(&self, sql: &str, transaction: Option<&TransactionId>) -> Result<()> {
            self.0.execute(sql, transaction).await
        }

        async fn commit(&self, _transaction: &TransactionId) -> Result<String> {
            Err(ReplayError::driver("connection reset during commit"))
        }

        async fn rollback(&self, transaction: &TransactionId) -> Result<String> {
            self.0.rollback(transaction).await
        }
    }

    fn runner(driver: &MemoryDriver, options: RunnerOptions) -> TransactionRunner {
        TransactionRunner::new(Arc::new(driver.clone()), options)
    }

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.execute("CREATE TABLE t (id INT);", None).await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_atomic_commits_once() {
        let driver = seeded().await;
        let report = runner(&driver, RunnerOptions::new(ReplayMode::Atomic))
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n")
            .await
            .unwrap();

        assert_eq!(report.statements, 2);
        assert_eq!(report.commit_statuses, vec!["Transaction Committed"]);
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1", "2"]);

        let journal = driver.journal().await;
        let commits = journal
            .iter()
            .filter(|e| matches!(e, JournalEntry::Commit(_)))
            .count();
        assert_eq!(commits, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_is_rolled_back() {
        let driver = seeded().await;
        let atomic = TransactionRunner::new(
            Arc::new(CommitRefusingDriver(driver.clone())),
            RunnerOptions::new(ReplayMode::Atomic),
        );

        let err = atomic.run("INSERT INTO t VALUES (1);\n").await.unwrap_err();

        assert!(matches!(err, ReplayError::Driver(_)));
        assert_eq!(driver.open_transactions().await, 0);
        assert!(matches!(driver.journal().await.last(), Some(JournalEntry::Rollback(_))));
        assert!(driver.rows("t").await.unwrap().is_empty());

        let bulk = TransactionRunner::new(
            Arc::new(CommitRefusingDriver(driver.clone())),
            RunnerOptions::new(ReplayMode::Bulk),
        );
        let script = format!("{START_MARKER}INSERT INTO t VALUES (2);\n{COMMIT_MARKER}");
        assert!(bulk.run(&script).await.is_err());
        assert_eq!(driver.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_atomic_failure_commits_nothing() {
        let driver = seeded().await;
        driver.reject_containing("(2)").await;

        let err = runner(&driver, RunnerOptions::new(ReplayMode::Atomic))
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nINSERT INTO t VALUES (3);\n")
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::StatementExecution { .. }));
        assert!(driver.rows("t").await.unwrap().is_empty());
        assert_eq!(driver.open_transactions().await, 0);
        let journal = driver.journal().await;
        assert!(matches!(journal.last(), Some(JournalEntry::Rollback(_))));
        assert!(!journal.iter().any(|e| matches!(e, JournalEntry::Execute { sql, .. } if sql.contains("(3)"))));
    }

    #[tokio::test]
    async fn test_atomic_rejects_fragment_before_begin() {
        let driver = seeded().await;
        let err = runner(&driver, RunnerOptions::new(ReplayMode::Atomic))
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)")
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::MalformedScript(_)));
        assert!(!driver
            .journal()
            .await
            .iter()
            .any(|e| matches!(e, JournalEntry::Begin(_))));
    }

    #[tokio::test]
    async fn test_bulk_mixes_autocommit_and_marker_pairs() {
        let driver = MemoryDriver::new();
        let script = format!(
            "CREATE TABLE t (id INT);\n{START_MARKER}INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n{COMMIT_MARKER}INSERT INTO t VALUES (3);\n"
        );

        let report = runner(&driver, RunnerOptions::new(ReplayMode::Bulk))
            .run(&script)
            .await
            .unwrap();

        assert_eq!(report.statements, 4);
        assert_eq!(report.transactions, 1);
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1", "2", "3"]);

        let journal = driver.journal().await;
        let outside: Vec<_> = journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Execute { sql, transaction: None } => Some(sql.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outside, vec!["CREATE TABLE t (id INT);\n", "INSERT INTO t VALUES (3);\n"]);
    }

    #[tokio::test]
    async fn test_bulk_continues_past_rejected_statement() {
        let driver = seeded().await;
        driver.reject_containing("(2)").await;

        let report = runner(&driver, RunnerOptions::new(ReplayMode::Bulk))
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nINSERT INTO t VALUES (3);\n")
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 2);
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_bulk_halt_policy_stops() {
        let driver = seeded().await;
        driver.reject_containing("(2)").await;

        let options = RunnerOptions::new(ReplayMode::Bulk).bulk_failure(BulkFailurePolicy::Halt);
        let err = runner(&driver, options)
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nINSERT INTO t VALUES (3);\n")
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::StatementExecution { .. }));
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_bulk_unterminated_marker_rolls_back() {
        let driver = seeded().await;
        let script = format!("{START_MARKER}INSERT INTO t VALUES (1);\n");

        let err = runner(&driver, RunnerOptions::new(ReplayMode::Bulk))
            .run(&script)
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::MalformedScript(_)));
        assert!(driver.rows("t").await.unwrap().is_empty());
        assert_eq!(driver.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_bulk_skips_trailing_fragment() {
        let driver = seeded().await;
        let report = runner(&driver, RunnerOptions::new(ReplayMode::Bulk))
            .run("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)")
            .await
            .unwrap();

        assert_eq!(report.statements, 1);
        assert_eq!(driver.rows("t").await.unwrap(), vec!["1"]);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("BULK".parse::<ReplayMode>().unwrap(), ReplayMode::Bulk);
        assert!("fast".parse::<ReplayMode>().is_err());
        assert_eq!("halt".parse::<BulkFailurePolicy>().unwrap(), BulkFailurePolicy::Halt);
    }
}
