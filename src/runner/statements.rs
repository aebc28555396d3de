//! Statement boundary detection inside a segment or script.

use crate::core::{ReplayError, Result};
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::fmt;
use std::str::FromStr;

/// Line terminator that, preceded by `;`, closes a statement.
pub const STATEMENT_DELIMITER: &str = ";\n";

/// How the end of a statement is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementBoundary {
    /// A line ending in `;\n` ends the statement, whatever it contains.
    /// A `;` at the end of a line inside a string literal splits the
    /// statement in two.
    #[default]
    LineSuffix,
    /// A `;\n` line end only counts when the pending text tokenizes
    /// completely and its last significant token is `;`.
    Lexical,
}

impl FromStr for StatementBoundary {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "line-suffix" | "line_suffix" | "textual" => Ok(Self::LineSuffix),
            "lexical" => Ok(Self::Lexical),
            other => Err(format!(
                "unknown statement boundary '{}' (expected line-suffix or lexical)",
                other
            )),
        }
    }
}

impl fmt::Display for StatementBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementBoundary::LineSuffix => write!(f, "line-suffix"),
            StatementBoundary::Lexical => write!(f, "lexical"),
        }
    }
}

fn closes_statement_lexically(text: &str) -> bool {
    let dialect = MySqlDialect {};
    match Tokenizer::new(&dialect, text).tokenize() {
        Ok(tokens) => tokens
            .iter()
            .rev()
            .find(|token| !matches!(token, Token::Whitespace(_)))
            .is_some_and(|token| *token == Token::SemiColon),
        // Unterminated string literal or block comment.
        Err(_) => false,
    }
}

/// Accumulates lines into complete statements.
#[derive(Debug, Default)]
pub struct StatementSplitter {
    boundary: StatementBoundary,
    pending: String,
}

impl StatementSplitter {
    pub fn new(boundary: StatementBoundary) -> Self {
        Self {
            boundary,
            pending: String::new(),
        }
    }

    /// Adds one line (terminator included) and returns the statement it
    /// completes, if any.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        self.pending.push_str(line);
        if !line.ends_with(STATEMENT_DELIMITER) {
            return None;
        }
        let complete = match self.boundary {
            StatementBoundary::LineSuffix => true,
            StatementBoundary::Lexical => closes_statement_lexically(&self.pending),
        };
        complete.then(|| std::mem::take(&mut self.pending))
    }

    /// Text left without a delimiter, if it is not blank.
    pub fn finish(self) -> Option<String> {
        (!self.pending.trim().is_empty()).then_some(self.pending)
    }
}

/// Splits `text` into complete statements. Non-blank text after the last
/// delimiter is a malformed segment.
pub fn split_statements(text: &str, boundary: StatementBoundary) -> Result<Vec<String>> {
    let mut splitter = StatementSplitter::new(boundary);
    let statements: Vec<String> = text
        .split_inclusive('\n')
        .filter_map(|line| splitter.push_line(line))
        .collect();

    match splitter.finish() {
        Some(fragment) => Err(ReplayError::malformed(format!(
            "statement without terminating delimiter: {}",
            fragment.trim()
        ))),
        None => Ok(statements),
    }
}
