use super::dispatch::Dispatcher;
use super::state::{ChainEvent, ChainState};
use crate::core::{ChainPayload, Cursor, KickoffPayload, Result};
use crate::runner::{RunReport, TransactionRunner};
use crate::store::SegmentStore;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: ChainState,
    pub report: RunReport,
}

/// Runs exactly one segment per invocation and hands the rest of the chain
/// to the injected dispatcher.
///
/// Holds no state between invocations: everything needed to continue is in
/// the payload.
#[derive(Clone)]
pub struct ChainScheduler {
    store: Arc<dyn SegmentStore>,
    runner: TransactionRunner,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ChainScheduler {
    pub fn new(
        store: Arc<dyn SegmentStore>,
        runner: TransactionRunner,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            runner,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    /// Starts a chain at transaction 1. Returns the dispatched payload, or
    /// `None` for an empty run.
    pub async fn kickoff(&self, payload: KickoffPayload) -> Result<Option<ChainPayload>> {
        let Some(first) = payload.chain_payload() else {
            info!("nothing to replay, chain not started");
            return Ok(None);
        };
        self.dispatcher.dispatch(first).await?;
        info!(total = payload.total, "chain started");
        Ok(Some(first))
    }

    /// Handles one invocation of the chain.
    pub async fn invoke(&self, payload: ChainPayload) -> Result<StepOutcome> {
        let cursor = payload.cursor()?;
        let span = info_span!(
            "chain_step",
            invocation = %Uuid::new_v4(),
            transaction = cursor.current().get(),
            total = cursor.total()
        );
        self.step(cursor).instrument(span).await
    }

    async fn step(&self, cursor: Cursor) -> Result<StepOutcome> {
        let state = ChainState::Pending(cursor);
        let sequence = cursor.current();

        let segment = match self.store.load_segment(sequence).await {
            Ok(segment) => segment,
            Err(err) => {
                error!(
                    state = %state.on(ChainEvent::Failed),
                    error = %err,
                    "chunk record unavailable, chain cannot proceed"
                );
                return Err(err);
            }
        };
        let state = state.on(ChainEvent::Fetched);

        let report = match self.runner.run(&segment.sql_text).await {
            Ok(report) => report,
            Err(err) => {
                error!(
                    state = %state.on(ChainEvent::Failed),
                    error = %err,
                    "segment failed, chain halted"
                );
                return Err(err);
            }
        };
        let state = state.on(ChainEvent::Replayed);
        if !report.failures.is_empty() {
            warn!(failures = report.failures.len(), "segment committed with rejected statements");
        }

        if let Err(err) = self.store.delete(sequence).await {
            error!(
                state = %state.on(ChainEvent::Failed),
                error = %err,
                "segment committed but its chunk record could not be deleted"
            );
            return Err(err);
        }

        let state = state.on(ChainEvent::Advanced);
        match state.follow_up() {
            Some(next) => {
                if let Err(err) = self.dispatcher.dispatch(ChainPayload::from(next)).await {
                    error!(
                        next = %next,
                        error = %err,
                        "follow-up not accepted, retry with the same cursor"
                    );
                    return Err(err);
                }
                info!(
                    next = %next,
                    statements = report.statements,
                    "segment replayed, follow-up dispatched"
                );
            }
            None => {
                info!(statements = report.statements, "segment replayed, chain terminated");
            }
        }

        Ok(StepOutcome { state, report })
    }
}
