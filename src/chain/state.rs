// ============================================================================
// Chain State
// ============================================================================
//
// Lifecycle of one invocation, as seen from the chain:
//
// ```text
// Pending(n) ──fetched──> Running(n) ──replayed──> Committed(n) ──advanced──> Pending(n+1)
//     │                      │                         │                 └──> Terminated (n == total)
//     └────────failed────────┴─────────failed──────────┴──> Errored(n)
// ```
//
// Terminated and Errored are absorbing.
//
// ============================================================================

use crate::core::Cursor;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending(Cursor),
    Running(Cursor),
    Committed(Cursor),
    Terminated { total: u64 },
    Errored(Cursor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    Fetched,
    Replayed,
    Advanced,
    Failed,
}

impl ChainState {
    /// Applies `event`. Events that do not apply to the current state leave
    /// it unchanged.
    pub fn on(self, event: ChainEvent) -> ChainState {
        use ChainEvent::*;
        use ChainState::*;

        match (self, event) {
            (Pending(cursor), Fetched) => Running(cursor),
            (Running(cursor), Replayed) => Committed(cursor),
            (Committed(cursor), Advanced) => match cursor.advance() {
                Some(next) => Pending(next),
                None => Terminated {
                    total: cursor.total(),
                },
            },
            (Pending(cursor) | Running(cursor) | Committed(cursor), Failed) => Errored(cursor),
            (state, _) => state,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ChainState::Terminated { .. } | ChainState::Errored(_))
    }

    /// The cursor the next invocation must carry, if any.
    pub fn follow_up(&self) -> Option<Cursor> {
        match self {
            ChainState::Pending(cursor) => Some(*cursor),
            _ => None,
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Pending(c) => write!(f, "PENDING({})", c),
            ChainState::Running(c) => write!(f, "RUNNING({})", c),
            ChainState::Committed(c) => write!(f, "COMMITTED({})", c),
            ChainState::Terminated { total } => write!(f, "TERMINATED({})", total),
            ChainState::Errored(c) => write!(f, "ERRORED({})", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(current: u64, total: u64) -> Cursor {
        Cursor::new(current, total).unwrap()
    }

    #[test]
    fn test_happy_path_advances() {
        let state = ChainState::Pending(cursor(1, 2))
            .on(ChainEvent::Fetched)
            .on(ChainEvent::Replayed)
            .on(ChainEvent::Advanced);

        assert_eq!(state, ChainState::Pending(cursor(2, 2)));
        assert_eq!(state.follow_up(), Some(cursor(2, 2)));
    }

    #[test]
    fn test_last_segment_terminates() {
        let state = ChainState::Pending(cursor(2, 2))
            .on(ChainEvent::Fetched)
            .on(ChainEvent::Replayed)
            .on(ChainEvent::Advanced);

        assert_eq!(state, ChainState::Terminated { total: 2 });
        assert!(state.is_final());
        assert!(state.follow_up().is_none());
    }

    #[test]
    fn test_errored_is_absorbing() {
        let state = ChainState::Running(cursor(1, 3)).on(ChainEvent::Failed);
        assert_eq!(state, ChainState::Errored(cursor(1, 3)));

        for event in [ChainEvent::Fetched, ChainEvent::Replayed, ChainEvent::Advanced] {
            assert_eq!(state.on(event), state);
        }
    }

    #[test]
    fn test_out_of_order_event_is_ignored() {
        let pending = ChainState::Pending(cursor(1, 1));
        assert_eq!(pending.on(ChainEvent::Advanced), pending);
        assert_eq!(pending.on(ChainEvent::Replayed), pending);
    }
}
