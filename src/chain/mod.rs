// ============================================================================
// Chain Scheduler
// ============================================================================
//
// Continuation-passing across invocations: each invocation replays the one
// segment named by its cursor and dispatches exactly one follow-up for the
// next, so at most one segment is ever running.
//
// ============================================================================

pub mod dispatch;
pub mod scheduler;
pub mod state;
pub mod worker;

pub use dispatch::{ChannelDispatcher, Dispatcher, HttpDispatcher, RecordingDispatcher, channel};
pub use scheduler::{ChainScheduler, StepOutcome};
pub use state::{ChainEvent, ChainState};
pub use worker::{ChainSummary, ChainWorker};
