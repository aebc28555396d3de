// ============================================================================
// Transaction Marker Tokenizer
// ============================================================================
//
// Two-state machine over script lines:
//
// ```text
//            start                     commit
//  Outside ─────────> Inside ──────────────────> Outside   (emit segment)
//     │                 │  ▲
//     │ text: skip      │  │ start: reset accumulator
//     │ commit: error   └──┘ text: append
// ```
//
// Statement boundaries are not tracked here; the runner re-discovers them.
//
// ============================================================================

use crate::core::{ReplayError, Result};

/// Start-of-transaction sentinel emitted by MySQL dump tools.
pub const START_MARKER: &str = "/*! START TRANSACTION */;\n";

/// Commit sentinel emitted by MySQL dump tools.
pub const COMMIT_MARKER: &str = "/*! COMMIT */;\n";

/// The pair of sentinel lines delimiting one transaction.
///
/// Lines are compared byte for byte, line terminator included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub start: String,
    pub commit: String,
}

impl Markers {
    pub fn new(start: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            commit: commit.into(),
        }
    }

    pub fn classify(&self, line: &str) -> LineKind {
        if line == self.start {
            LineKind::Start
        } else if line == self.commit {
            LineKind::Commit
        } else {
            LineKind::Text
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(START_MARKER, COMMIT_MARKER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Start,
    Commit,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerState {
    OutsideTransaction,
    InsideTransaction,
}

/// What the tokenizer does with the current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Begin collecting a new segment.
    Open,
    /// A start marker inside an open transaction; whatever was collected is dropped.
    Reopen,
    /// Close the current segment and hand it out.
    Emit,
    Append,
    /// Text outside any transaction is not part of a segment.
    Skip,
    /// Commit marker with no open transaction.
    Reject,
}

/// The full transition table of the marker grammar.
pub fn transition(state: TokenizerState, kind: LineKind) -> (TokenizerState, Action) {
    use Action::*;
    use LineKind::*;
    use TokenizerState::*;

    match (state, kind) {
        (OutsideTransaction, Start) => (InsideTransaction, Open),
        (OutsideTransaction, Commit) => (OutsideTransaction, Reject),
        (OutsideTransaction, Text) => (OutsideTransaction, Skip),
        (InsideTransaction, Start) => (InsideTransaction, Reopen),
        (InsideTransaction, Commit) => (OutsideTransaction, Emit),
        (InsideTransaction, Text) => (InsideTransaction, Append),
    }
}

/// Per-script counters reported once tokenizing finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenizerSummary {
    pub lines: usize,
    pub segments: usize,
    pub skipped_lines: usize,
    pub reopened: usize,
}

pub struct MarkerTokenizer<'m> {
    markers: &'m Markers,
    state: TokenizerState,
    accumulator: String,
    opened_at: usize,
    summary: TokenizerSummary,
}

impl<'m> MarkerTokenizer<'m> {
    pub fn new(markers: &'m Markers) -> Self {
        Self {
            markers,
            state: TokenizerState::OutsideTransaction,
            accumulator: String::new(),
            opened_at: 0,
            summary: TokenizerSummary::default(),
        }
    }

    pub fn state(&self) -> TokenizerState {
        self.state
    }

    /// Feeds one line (terminator included). Returns the text of a segment
    /// when the line closes one.
    pub fn feed(&mut self, line: &str) -> Result<Option<String>> {
        self.summary.lines += 1;
        let (next, action) = transition(self.state, self.markers.classify(line));
        self.state = next;

        match action {
            Action::Open => {
                self.accumulator.clear();
                self.opened_at = self.summary.lines;
                Ok(None)
            }
            Action::Reopen => {
                self.summary.reopened += 1;
                self.accumulator.clear();
                self.opened_at = self.summary.lines;
                Ok(None)
            }
            Action::Emit => {
                self.summary.segments += 1;
                Ok(Some(std::mem::take(&mut self.accumulator)))
            }
            Action::Append => {
                self.accumulator.push_str(line);
                Ok(None)
            }
            Action::Skip => {
                self.summary.skipped_lines += 1;
                Ok(None)
            }
            Action::Reject => Err(ReplayError::malformed(format!(
                "commit marker without a matching start marker at line {}",
                self.summary.lines
            ))),
        }
    }

    /// Ends the input. An open transaction that collected text is unterminated.
    pub fn finish(self) -> Result<TokenizerSummary> {
        if self.state == TokenizerState::InsideTransaction && !self.accumulator.is_empty() {
            return Err(ReplayError::malformed(format!(
                "unterminated transaction opened at line {}",
                self.opened_at
            )));
        }
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> Result<(Vec<String>, TokenizerSummary)> {
        let markers = Markers::default();
        let mut tokenizer = MarkerTokenizer::new(&markers);
        let mut segments = Vec::new();
        for line in lines {
            if let Some(text) = tokenizer.feed(line)? {
                segments.push(text);
            }
        }
        Ok((segments, tokenizer.finish()?))
    }

    #[test]
    fn test_markers_must_match_exactly() {
        let markers = Markers::default();
        assert_eq!(markers.classify("/*! START TRANSACTION */;\n"), LineKind::Start);
        assert_eq!(markers.classify("/*! START TRANSACTION */;"), LineKind::Text);
        assert_eq!(markers.classify("/*! START TRANSACTION */;\r\n"), LineKind::Text);
        assert_eq!(markers.classify(" /*! COMMIT */;\n"), LineKind::Text);
        assert_eq!(markers.classify("/*! COMMIT */;\n"), LineKind::Commit);
    }

    #[test]
    fn test_single_transaction() {
        let (segments, summary) = run(&[
            START_MARKER,
            "INSERT INTO t VALUES (1);\n",
            "INSERT INTO t VALUES (2);\n",
            COMMIT_MARKER,
        ])
        .unwrap();

        assert_eq!(
            segments,
            vec!["INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n".to_string()]
        );
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.lines, 4);
    }

    #[test]
    fn test_text_outside_transactions_is_skipped() {
        let (segments, summary) = run(&[
            "CREATE TABLE t (id INT);\n",
            START_MARKER,
            "INSERT INTO t VALUES (1);\n",
            COMMIT_MARKER,
            "-- trailer\n",
        ])
        .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(summary.skipped_lines, 2);
    }

    #[test]
    fn test_nested_start_resets_accumulator() {
        let (segments, summary) = run(&[
            START_MARKER,
            "INSERT INTO t VALUES (1);\n",
            START_MARKER,
            "INSERT INTO t VALUES (2);\n",
            COMMIT_MARKER,
        ])
        .unwrap();

        assert_eq!(segments, vec!["INSERT INTO t VALUES (2);\n".to_string()]);
        assert_eq!(summary.reopened, 1);
    }

    #[test]
    fn test_unterminated_transaction_is_malformed() {
        let err = run(&[START_MARKER, "INSERT INTO t VALUES (1);\n"]).unwrap_err();
        assert!(matches!(err, ReplayError::MalformedScript(_)));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_empty_open_transaction_at_end_is_accepted() {
        let (segments, _) = run(&[START_MARKER]).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_stray_commit_is_malformed() {
        let err = run(&["SELECT 1;\n", COMMIT_MARKER]).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_empty_transaction_still_emits_a_segment() {
        let (segments, _) = run(&[START_MARKER, COMMIT_MARKER]).unwrap();
        assert_eq!(segments, vec![String::new()]);
    }
}
