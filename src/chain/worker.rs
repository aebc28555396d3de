use super::scheduler::ChainScheduler;
use super::state::ChainState;
use crate::core::{ChainPayload, ReplayError, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::info;

/// Totals of a chain driven to completion in this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainSummary {
    pub segments: u64,
    pub statements: usize,
    pub rejected_statements: usize,
}

/// Drains a channel dispatcher, one scheduler invocation per payload.
///
/// Every invocation still goes through the payload: the worker keeps no
/// cursor of its own, it only counts.
pub struct ChainWorker {
    receiver: UnboundedReceiver<ChainPayload>,
}

impl ChainWorker {
    pub fn new(receiver: UnboundedReceiver<ChainPayload>) -> Self {
        Self { receiver }
    }

    /// Runs the chain until it terminates or a step fails.
    ///
    /// The first payload must already have been dispatched (see
    /// [`ChainScheduler::kickoff`]).
    pub async fn run(mut self, scheduler: &ChainScheduler) -> Result<ChainSummary> {
        let mut summary = ChainSummary::default();

        loop {
            // Every step dispatches its follow-up before returning, so an
            // empty channel here means the chain lost its continuation.
            let payload = match self.receiver.try_recv() {
                Ok(payload) => payload,
                Err(TryRecvError::Empty) => {
                    return Err(ReplayError::dispatch("no invocation pending for the chain"));
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(ReplayError::dispatch("chain dispatcher closed"));
                }
            };

            let outcome = scheduler.invoke(payload).await?;
            summary.segments += 1;
            summary.statements += outcome.report.statements;
            summary.rejected_statements += outcome.report.failures.len();

            if let ChainState::Terminated { total } = outcome.state {
                info!(total, statements = summary.statements, "chain complete");
                return Ok(summary);
            }
        }
    }
}
