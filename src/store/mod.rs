// ============================================================================
// Segment Store
// ============================================================================
//
// Durable key/value storage for chunk records, addressed by sequence number
// under the object key `"<sequence>.sql"`. It is the only channel between the
// split phase and the replay phase: a record exists exactly as long as its
// segment has not been replayed.
//
// ============================================================================

pub mod fs;
pub mod memory;

pub use fs::FsSegmentStore;
pub use memory::MemorySegmentStore;

use crate::core::{ReplayError, Result, Segment, Sequence};
use async_trait::async_trait;

#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Stores `bytes` under `sequence`. The record must be retrievable by any
    /// later `get` once this returns.
    async fn put(&self, sequence: Sequence, bytes: &[u8]) -> Result<()>;

    /// Fails with [`ReplayError::NotFound`] when the record is absent.
    async fn get(&self, sequence: Sequence) -> Result<Vec<u8>>;

    /// Removing an absent record is not an error.
    async fn delete(&self, sequence: Sequence) -> Result<()>;

    /// Sequences still present, ascending.
    async fn list(&self) -> Result<Vec<Sequence>>;

    async fn put_segment(&self, segment: &Segment) -> Result<()> {
        self.put(segment.sequence, segment.sql_text.as_bytes()).await
    }

    async fn load_segment(&self, sequence: Sequence) -> Result<Segment> {
        let bytes = self.get(sequence).await?;
        let sql_text = String::from_utf8(bytes).map_err(|e| {
            ReplayError::storage(format!("chunk {} is not valid UTF-8: {}", sequence.key(), e))
        })?;
        Ok(Segment::new(sequence, sql_text))
    }
}
