//! Directory-backed segment store: one `<sequence>.sql` object per record.

use super::SegmentStore;
use crate::core::{ReplayError, Result, Sequence};
use async_trait::async_trait;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct FsSegmentStore {
    root: PathBuf,
}

impl FsSegmentStore {
    /// Opens (and creates if needed) the store directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            ReplayError::storage(format!(
                "Failed to create segment store directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, sequence: Sequence) -> PathBuf {
        self.root.join(sequence.key())
    }
}

/// Flushes directory entries so a completed rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Writes through a temp file in the same directory, syncs it, then renames
/// it over the final name so readers never observe a partial chunk. The
/// directory is synced last.
fn write_atomically(root: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(root)
        .map_err(|e| ReplayError::storage(format!("Failed to create temp file: {}", e)))?;
    temp.write_all(bytes)
        .map_err(|e| ReplayError::storage(format!("Failed to write chunk: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ReplayError::storage(format!("Failed to sync chunk: {}", e)))?;
    temp.persist(target).map_err(|e| {
        ReplayError::storage(format!("Failed to rename chunk into place: {}", e.error))
    })?;
    sync_dir(root).map_err(|e| {
        ReplayError::storage(format!(
            "Failed to sync segment store directory '{}': {}",
            root.display(),
            e
        ))
    })
}

#[async_trait]
impl SegmentStore for FsSegmentStore {
    async fn put(&self, sequence: Sequence, bytes: &[u8]) -> Result<()> {
        let root = self.root.clone();
        let target = self.path_of(sequence);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomically(&root, &target, &bytes))
            .await
            .map_err(|e| ReplayError::storage(format!("chunk writer task failed: {}", e)))?
    }

    async fn get(&self, sequence: Sequence) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_of(sequence)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ReplayError::NotFound(sequence)),
            Err(e) => Err(ReplayError::storage(format!(
                "Failed to read chunk {}: {}",
                sequence.key(),
                e
            ))),
        }
    }

    async fn delete(&self, sequence: Sequence) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(sequence)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReplayError::storage(format!(
                "Failed to delete chunk {}: {}",
                sequence.key(),
                e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<Sequence>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            ReplayError::storage(format!(
                "Failed to list '{}': {}",
                self.root.display(),
                e
            ))
        })?;

        let mut sequences = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(sequence) = entry.file_name().to_str().and_then(Sequence::from_key) {
                sequences.push(sequence);
            }
        }
        sequences.sort();
        Ok(sequences)
    }
}
