use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ReplayError, Result};

/// Extension of every chunk object in the segment store.
pub const CHUNK_SUFFIX: &str = ".sql";

/// 1-based position of a segment within one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sequence(u64);

impl Sequence {
    pub const FIRST: Sequence = Sequence(1);

    /// Returns `None` for zero, which is never a valid sequence.
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Object key in the segment store: `"<sequence>.sql"`.
    pub fn key(&self) -> String {
        format!("{}{}", self.0, CHUNK_SUFFIX)
    }

    /// Inverse of [`Sequence::key`]. Anything else in a store is ignored.
    pub fn from_key(key: &str) -> Option<Self> {
        let digits = key.strip_suffix(CHUNK_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().and_then(Self::new)
    }
}

impl From<Sequence> for u64 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One source-declared transaction, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence: Sequence,
    pub sql_text: String,
}

impl Segment {
    pub fn new(sequence: Sequence, sql_text: impl Into<String>) -> Self {
        Self {
            sequence,
            sql_text: sql_text.into(),
        }
    }
}

/// Chain progress carried by each invocation.
///
/// Invariant: `1 <= current <= total`. A run with zero segments has no cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    current: Sequence,
    total: u64,
}

impl Cursor {
    pub fn new(current: u64, total: u64) -> Result<Self> {
        match Sequence::new(current) {
            Some(sequence) if current <= total => Ok(Self {
                current: sequence,
                total,
            }),
            _ => Err(ReplayError::InvalidCursor {
                transaction: current,
                total,
            }),
        }
    }

    /// Starting cursor of a run, or `None` when there is nothing to replay.
    pub fn start(total: u64) -> Option<Self> {
        Self::new(1, total).ok()
    }

    pub fn current(&self) -> Sequence {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_last(&self) -> bool {
        self.current.get() == self.total
    }

    /// The cursor for the follow-up invocation, `None` after the last segment.
    pub fn advance(&self) -> Option<Self> {
        if self.is_last() {
            None
        } else {
            Some(Self {
                current: self.current.next(),
                total: self.total,
            })
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

fn first_transaction() -> u64 {
    1
}

/// Wire form of a chain invocation: `{ "transaction": <int>, "total": <int> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPayload {
    #[serde(default = "first_transaction")]
    pub transaction: u64,
    pub total: u64,
}

impl ChainPayload {
    pub fn cursor(&self) -> Result<Cursor> {
        Cursor::new(self.transaction, self.total)
    }
}

impl From<Cursor> for ChainPayload {
    fn from(cursor: Cursor) -> Self {
        Self {
            transaction: cursor.current.get(),
            total: cursor.total,
        }
    }
}

/// Emitted once after splitting: `{ "total": <int> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickoffPayload {
    pub total: u64,
}

impl KickoffPayload {
    pub fn chain_payload(&self) -> Option<ChainPayload> {
        Cursor::start(self.total).map(ChainPayload::from)
    }
}
