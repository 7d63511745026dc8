//! Line reassembly for growing-prefix container logs.
//!
//! The provider returns the whole log accumulated so far on every fetch. The
//! [`LogReassembler`] turns those snapshots into discrete lines, emitting
//! each completed line once and holding back the trailing partial line until
//! its newline arrives or the stream ends.

use thiserror::Error;

/// Errors raised while reassembling a log stream.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LogStreamError {
    /// The provider returned less content than had already been consumed.
    #[error("log output shrank: {consumed} characters consumed but only {observed} returned")]
    ShrinkingOutput {
        /// Characters consumed before this snapshot.
        consumed: usize,
        /// Length of the offending snapshot.
        observed: usize,
    },
}

/// Reading position within one instance's log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogCursor {
    /// Characters up to and including the last consumed newline.
    pub consumed_length: usize,
    /// Text after the last newline, not yet emitted.
    pub pending_partial_line: String,
}

/// Converts full-content log snapshots into newline-delimited lines.
///
/// Carriage returns are discarded. A reassembler belongs to one mesh
/// instance; a new instance starts with a new reassembler.
#[derive(Clone, Debug, Default)]
pub struct LogReassembler {
    cursor: LogCursor,
    observed_length: usize,
}

impl LogReassembler {
    /// Creates a reassembler positioned at the start of the log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current cursor.
    #[must_use]
    pub const fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Consumes the next snapshot and returns the lines it completed.
    ///
    /// The returned batch is empty when the snapshot added no newline.
    ///
    /// # Errors
    ///
    /// Returns [`LogStreamError::ShrinkingOutput`] when the snapshot is
    /// shorter than the content already consumed. The cursor is left
    /// untouched in that case.
    pub fn push(&mut self, snapshot: &str) -> Result<Vec<String>, LogStreamError> {
        let observed = snapshot.chars().count();
        if self.cursor.consumed_length > observed {
            return Err(LogStreamError::ShrinkingOutput {
                consumed: self.cursor.consumed_length,
                observed,
            });
        }

        let mut lines = Vec::new();
        let mut current = String::new();
        let mut consumed = self.cursor.consumed_length;

        for (offset, ch) in snapshot.chars().skip(consumed).enumerate() {
            match ch {
                '\r' => {}
                '\n' => {
                    lines.push(std::mem::take(&mut current));
                    consumed = self.cursor.consumed_length + offset + 1;
                }
                other => current.push(other),
            }
        }

        self.cursor.consumed_length = consumed;
        self.cursor.pending_partial_line = current;
        self.observed_length = observed;
        Ok(lines)
    }

    /// Ends the stream, returning the trailing partial line when non-empty.
    ///
    /// The remainder is handed out at most once.
    pub fn finish(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.cursor.pending_partial_line);
        if remainder.is_empty() {
            None
        } else {
            self.cursor.consumed_length = self.observed_length;
            Some(remainder)
        }
    }
}
