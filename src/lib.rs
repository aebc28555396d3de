// ============================================================================
// dumpreplay Library
// ============================================================================
//
// Replays transactional SQL dumps against a database one source transaction
// at a time. A dump is split into numbered chunk records, and a chain of
// short invocations replays them strictly in order, each invocation handing
// the next cursor to the following one.
//
// ============================================================================

pub mod chain;
pub mod config;
pub mod core;
pub mod driver;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod splitter;
pub mod store;

pub use chain::{
    ChainScheduler, ChainState, ChainSummary, ChainWorker, ChannelDispatcher, Dispatcher,
    HttpDispatcher, RecordingDispatcher, StepOutcome,
};
pub use config::ReplayConfig;
pub use crate::core::{ChainPayload, Cursor, KickoffPayload, ReplayError, Result, Segment, Sequence};
pub use driver::{DataApiDriver, DataApiSettings, DatabaseDriver, MemoryDriver, TransactionId};
pub use pipeline::{
    BulkSummary, Replayer, RestoreSummary, StoreStatus, discover_scripts, drop_all_tables,
};
pub use runner::{
    BulkFailurePolicy, ReplayMode, RunReport, RunnerOptions, StatementBoundary, TransactionRunner,
};
pub use splitter::{Markers, SplitOutcome, Splitter};
pub use store::{FsSegmentStore, MemorySegmentStore, SegmentStore};

use std::sync::Arc;

/// Splits `script` into an in-memory store and replays it against `driver`
/// through an in-process chain.
///
/// A convenience for small dumps and dry runs; larger runs go through
/// [`Replayer`] with a [`FsSegmentStore`].
///
/// # Examples
///
/// ```
/// use dumpreplay::{MemoryDriver, replay_script};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> dumpreplay::Result<()> {
/// let driver = MemoryDriver::new();
/// let script = "SET NAMES utf8mb4;\n\
///               /*! START TRANSACTION */;\n\
///               CREATE TABLE t (id INT);\n\
///               INSERT INTO t VALUES (1);\n\
///               /*! COMMIT */;\n";
///
/// // The SET line sits outside any transaction and is not replayed.
/// let summary = replay_script(Arc::new(driver.clone()), script).await?;
/// assert_eq!(summary.segments, 1);
/// assert_eq!(summary.statements, 2);
/// assert_eq!(driver.rows("t").await, Some(vec!["1".to_string()]));
/// # Ok(())
/// # }
/// ```
pub async fn replay_script(
    driver: Arc<dyn DatabaseDriver>,
    script: &str,
) -> Result<ChainSummary> {
    let store = Arc::new(MemorySegmentStore::new());
    let (total, _) = Splitter::new(store.as_ref())
        .split_script("script", script.as_bytes(), 0)
        .await?;

    let (dispatcher, receiver) = chain::channel();
    let runner = TransactionRunner::new(driver, RunnerOptions::default());
    let scheduler = ChainScheduler::new(store, runner, Arc::new(dispatcher));

    match scheduler.kickoff(KickoffPayload { total }).await? {
        Some(_) => ChainWorker::new(receiver).run(&scheduler).await,
        None => Ok(ChainSummary::default()),
    }
}
