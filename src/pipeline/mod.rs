// ============================================================================
// Restore Pipeline
// ============================================================================
//
// Whole-run operations built on the splitter, the store, the runner and the
// chain: locating scripts in a dump directory, clearing the target schema,
// and replaying a dump either directly (bulk) or segment by segment
// (chunked).
//
// ============================================================================

use crate::chain::{ChainScheduler, ChainSummary, ChainWorker, channel};
use crate::core::{KickoffPayload, ReplayError, Result, Sequence};
use crate::driver::DatabaseDriver;
use crate::runner::{ReplayMode, RunReport, RunnerOptions, TransactionRunner};
use crate::splitter::{SplitOutcome, Splitter};
use crate::store::SegmentStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Tables cleared before a restore unless configured otherwise.
pub const DEFAULT_DROP_TABLES: &[&str] = &[
    "content_model_reference",
    "job_zone_reference",
    "occupation_data",
    "scales_reference",
    "ete_categories",
    "level_scale_anchors",
    "occupation_level_metadata",
    "survey_booklet_locations",
    "task_categories",
    "work_context_categories",
    "abilities",
    "education_training_experience",
    "interests",
    "job_zones",
    "knowledge",
    "skills",
    "task_statements",
    "task_ratings",
    "work_activities",
    "work_context",
    "work_styles",
    "work_values",
    "green_occupations",
    "green_task_statements",
    "iwa_reference",
    "dwa_reference",
    "tasks_to_dwas",
    "green_dwa_reference",
    "tasks_to_green_dwas",
    "emerging_tasks",
    "career_changers_matrix",
    "career_starters_matrix",
    "unspsc_reference",
    "tools_and_technology",
    "alternate_titles",
    "sample_of_reported_titles",
    "technology_skills",
    "tools_used",
];

pub fn default_drop_tables() -> Vec<String> {
    DEFAULT_DROP_TABLES.iter().map(|t| t.to_string()).collect()
}

/// Finds the scripts of a dump, in replay order.
///
/// Keeps `.sql` files whose name does not start with a dot. Files of a
/// directory come before its subdirectories; both are taken in name order.
pub fn discover_scripts<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    collect_scripts(dir.as_ref(), &mut scripts)?;
    Ok(scripts)
}

fn collect_scripts(dir: &Path, scripts: &mut Vec<PathBuf>) -> Result<()> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            dirs.push(path);
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".sql") && !name.starts_with('.') {
            files.push(path);
        }
    }

    files.sort();
    dirs.sort();
    scripts.extend(files);
    for sub in dirs {
        collect_scripts(&sub, scripts)?;
    }
    Ok(())
}

/// Drops `tables` in one transaction with foreign key checks disabled.
pub async fn drop_all_tables(driver: &dyn DatabaseDriver, tables: &[String]) -> Result<String> {
    let transaction = driver.begin().await?;

    let mut statements = Vec::with_capacity(tables.len() + 2);
    statements.push("SET FOREIGN_KEY_CHECKS = 0;".to_string());
    statements.extend(
        tables
            .iter()
            .map(|table| format!("DROP TABLE IF EXISTS `{}`;", table)),
    );
    statements.push("SET FOREIGN_KEY_CHECKS = 1;".to_string());

    for sql in &statements {
        if let Err(err) = driver.execute(sql, Some(&transaction)).await {
            if let Err(rollback) = driver.rollback(&transaction).await {
                warn!(error = %rollback, "rollback after failed drop did not complete");
            }
            return Err(err);
        }
    }

    let status = driver.commit(&transaction).await?;
    info!(tables = tables.len(), status = %status, "tables dropped");
    Ok(status)
}

/// Totals of a bulk restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub scripts: usize,
    pub statements: usize,
    pub transactions: usize,
    pub rejected_statements: usize,
}

/// Totals of a chunked restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub split: SplitOutcome,
    pub chain: ChainSummary,
}

/// Records left in the store, i.e. where a stalled chain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub remaining: Vec<Sequence>,
}

impl StoreStatus {
    /// The segment the chain must resume from, if any.
    pub fn resume_from(&self) -> Option<Sequence> {
        self.remaining.first().copied()
    }
}

/// Entry point for whole-run operations against one database and one store.
#[derive(Clone)]
pub struct Replayer {
    driver: Arc<dyn DatabaseDriver>,
    store: Arc<dyn SegmentStore>,
    options: RunnerOptions,
    drop_tables: Vec<String>,
}

impl Replayer {
    pub fn new(driver: Arc<dyn DatabaseDriver>, store: Arc<dyn SegmentStore>) -> Self {
        Self {
            driver,
            store,
            options: RunnerOptions::default(),
            drop_tables: default_drop_tables(),
        }
    }

    pub fn options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn drop_tables(mut self, tables: Vec<String>) -> Self {
        self.drop_tables = tables;
        self
    }

    pub fn store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub fn runner(&self) -> TransactionRunner {
        TransactionRunner::new(self.driver.clone(), self.options.clone())
    }

    pub async fn drop_all_tables(&self) -> Result<String> {
        drop_all_tables(self.driver.as_ref(), &self.drop_tables).await
    }

    /// Deletes every chunk record still stored and returns how many there
    /// were. A full restart after a stalled or failed chain begins here.
    pub async fn purge(&self) -> Result<usize> {
        let leftover = self.store.list().await?;
        for sequence in &leftover {
            self.store.delete(*sequence).await?;
        }
        if !leftover.is_empty() {
            warn!(records = leftover.len(), "discarded chunk records of an earlier run");
        }
        Ok(leftover.len())
    }

    /// Splits every script of `dir` into the store.
    ///
    /// Refuses to run while records of an earlier run are still stored:
    /// their numbering would collide with the new one. See [`Replayer::purge`].
    pub async fn split<P: AsRef<Path>>(&self, dir: P) -> Result<SplitOutcome> {
        let leftover = self.store.list().await?;
        if let Some(first) = leftover.first() {
            return Err(ReplayError::storage(format!(
                "{} chunk records of an earlier run are still stored (first: {})",
                leftover.len(),
                first.key()
            )));
        }

        let scripts = discover_scripts(dir)?;
        let splitter = Splitter::with_markers(self.store.as_ref(), self.options.markers.clone())
            .boundary(self.options.boundary);
        match splitter.split_files(&scripts).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Records of the files before the malformed one are useless alone.
                self.purge().await?;
                Err(e)
            }
        }
    }

    /// Discards any earlier run, splits the dump, drops the tables and
    /// drives the chain to the end in this process. A malformed dump fails
    /// before anything is dropped.
    pub async fn restore<P: AsRef<Path>>(&self, dir: P) -> Result<RestoreSummary> {
        self.purge().await?;
        let split = self.split(dir).await?;
        self.drop_all_tables().await?;

        let (dispatcher, receiver) = channel();
        let scheduler = ChainScheduler::new(
            self.store.clone(),
            self.runner(),
            Arc::new(dispatcher),
        );

        let chain = match scheduler.kickoff(KickoffPayload { total: split.total }).await? {
            Some(_) => ChainWorker::new(receiver).run(&scheduler).await?,
            None => ChainSummary::default(),
        };

        info!(total = split.total, statements = chain.statements, "restore complete");
        Ok(RestoreSummary { split, chain })
    }

    /// Drops the tables and runs every script straight through the runner
    /// in bulk mode.
    pub async fn restore_bulk<P: AsRef<Path>>(&self, dir: P) -> Result<BulkSummary> {
        self.drop_all_tables().await?;

        let runner = TransactionRunner::new(
            self.driver.clone(),
            RunnerOptions {
                mode: ReplayMode::Bulk,
                ..self.options.clone()
            },
        );

        let mut summary = BulkSummary::default();
        for path in discover_scripts(dir)? {
            info!(file = %path.display(), "processing script");
            let sql_text = tokio::fs::read_to_string(&path).await?;
            let report: RunReport = runner.run(&sql_text).await.map_err(|e| match e {
                ReplayError::MalformedScript(message) => {
                    ReplayError::malformed(format!("{}: {}", path.display(), message))
                }
                other => other,
            })?;
            summary.scripts += 1;
            summary.statements += report.statements;
            summary.transactions += report.transactions;
            summary.rejected_statements += report.failures.len();
            info!(file = %path.display(), statements = report.statements, "processed");
        }
        Ok(summary)
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            remaining: self.store.list().await?,
        })
    }
}
