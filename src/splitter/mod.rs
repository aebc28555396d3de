// ============================================================================
// Splitter
// ============================================================================
//
// Turns an ordered list of scripts into chunk records. The sequence counter is
// threaded through every call as a plain value: callers pass the last
// sequence assigned so far and receive the new one back.
//
// ============================================================================

pub mod tokenizer;

pub use tokenizer::{
    COMMIT_MARKER, LineKind, MarkerTokenizer, Markers, START_MARKER, TokenizerState,
    TokenizerSummary,
};

use crate::core::{ReplayError, Result, Segment, Sequence};
use crate::runner::statements::{StatementBoundary, split_statements};
use crate::store::SegmentStore;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of splitting a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Number of chunk records written, which is also the chain length.
    pub total: u64,
    pub scripts: usize,
    pub skipped_lines: usize,
}

/// Tokenizes one script into segments numbered after `last`.
///
/// Nothing is written anywhere: a malformed script yields an error and no
/// segments at all. Every segment body must consist of complete statements
/// under `boundary`.
pub fn tokenize<R: BufRead>(
    mut reader: R,
    markers: &Markers,
    boundary: StatementBoundary,
    last: u64,
) -> Result<(Vec<Segment>, TokenizerSummary)> {
    let mut tokenizer = MarkerTokenizer::new(markers);
    let mut segments = Vec::new();
    let mut next = last;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if let Some(sql_text) = tokenizer.feed(&line)? {
            split_statements(&sql_text, boundary).map_err(|e| match e {
                ReplayError::MalformedScript(message) => ReplayError::malformed(format!(
                    "transaction {} of this script: {}",
                    segments.len() + 1,
                    message
                )),
                other => other,
            })?;
            next += 1;
            let sequence = Sequence::new(next)
                .ok_or_else(|| ReplayError::malformed("sequence counter overflow"))?;
            segments.push(Segment::new(sequence, sql_text));
        }
    }

    let summary = tokenizer.finish()?;
    Ok((segments, summary))
}

pub struct Splitter<'a> {
    store: &'a dyn SegmentStore,
    markers: Markers,
    boundary: StatementBoundary,
}

impl<'a> Splitter<'a> {
    pub fn new(store: &'a dyn SegmentStore) -> Self {
        Self::with_markers(store, Markers::default())
    }

    pub fn with_markers(store: &'a dyn SegmentStore, markers: Markers) -> Self {
        Self {
            store,
            markers,
            boundary: StatementBoundary::default(),
        }
    }

    /// Statement boundary the segment bodies are checked against.
    pub fn boundary(mut self, boundary: StatementBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Splits one script and persists its segments in order.
    ///
    /// Returns the last sequence assigned (equal to `last` when the script
    /// declares no transaction).
    pub async fn split_script<R: BufRead>(
        &self,
        name: &str,
        reader: R,
        last: u64,
    ) -> Result<(u64, TokenizerSummary)> {
        let (segments, summary) =
            tokenize(reader, &self.markers, self.boundary, last).map_err(|e| match e {
                ReplayError::MalformedScript(message) => {
                    ReplayError::malformed(format!("{}: {}", name, message))
                }
                other => other,
            })?;

        if summary.skipped_lines > 0 {
            warn!(
                script = name,
                lines = summary.skipped_lines,
                "lines outside any transaction were not replayed"
            );
        }
        if summary.reopened > 0 {
            warn!(
                script = name,
                count = summary.reopened,
                "start marker inside an open transaction discarded collected text"
            );
        }

        let mut current = last;
        for segment in &segments {
            self.store.put_segment(segment).await?;
            current = segment.sequence.get();
            debug!(
                script = name,
                sequence = current,
                bytes = segment.sql_text.len(),
                "chunk stored"
            );
        }

        info!(script = name, segments = segments.len(), last_sequence = current, "script split");
        Ok((current, summary))
    }

    /// Splits the scripts in the given order, numbering segments from 1.
    pub async fn split_files<P: AsRef<Path>>(&self, scripts: &[P]) -> Result<SplitOutcome> {
        let mut outcome = SplitOutcome::default();

        for path in scripts {
            let path = path.as_ref();
            let file = File::open(path)?;
            let name = path.display().to_string();
            let (last, summary) = self
                .split_script(&name, BufReader::new(file), outcome.total)
                .await?;
            outcome.total = last;
            outcome.scripts += 1;
            outcome.skipped_lines += summary.skipped_lines;
        }

        info!(total = outcome.total, scripts = outcome.scripts, "split complete");
        Ok(outcome)
    }
}
