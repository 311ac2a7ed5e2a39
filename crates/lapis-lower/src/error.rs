//! Static lowering errors.
//!
//! All of these are language-level syntax errors: a jump keyword used
//! somewhere it cannot be lowered. Any one of them aborts lowering of the
//! whole top-level unit. The runtime behavior of lowered programs (raises,
//! local jump errors) is not represented here; that is emitted IR.

use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Human-readable notes per error code, used by diagnostics.
static CODE_NOTES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        (
            "E1001",
            "break exits a loop or a block; there is neither here",
        ),
        ("E1002", "next advances a loop or returns from a block"),
        ("E1003", "redo restarts the current loop iteration or block call"),
        ("E1004", "retry re-runs the body of the enclosing rescue"),
        (
            "E1005",
            "eval code cannot jump into the scope that invoked it",
        ),
    ])
});

/// A static error found while lowering a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("Invalid break")]
    InvalidBreak { file: String, line: u32 },

    #[error("Invalid next")]
    InvalidNext { file: String, line: u32 },

    #[error("Invalid redo")]
    InvalidRedo { file: String, line: u32 },

    #[error("Invalid retry")]
    InvalidRetry { file: String, line: u32 },

    #[error("Can't escape from eval with {keyword}")]
    EscapeFromEval {
        keyword: &'static str,
        file: String,
        line: u32,
    },
}

impl LowerError {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            LowerError::InvalidBreak { .. } => "E1001",
            LowerError::InvalidNext { .. } => "E1002",
            LowerError::InvalidRedo { .. } => "E1003",
            LowerError::InvalidRetry { .. } => "E1004",
            LowerError::EscapeFromEval { .. } => "E1005",
        }
    }

    /// The note text associated with this error's code, if any.
    pub fn note(&self) -> Option<&'static str> {
        CODE_NOTES.get(self.code()).copied()
    }

    pub fn file(&self) -> &str {
        match self {
            LowerError::InvalidBreak { file, .. }
            | LowerError::InvalidNext { file, .. }
            | LowerError::InvalidRedo { file, .. }
            | LowerError::InvalidRetry { file, .. }
            | LowerError::EscapeFromEval { file, .. } => file,
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            LowerError::InvalidBreak { line, .. }
            | LowerError::InvalidNext { line, .. }
            | LowerError::InvalidRedo { line, .. }
            | LowerError::InvalidRetry { line, .. }
            | LowerError::EscapeFromEval { line, .. } => *line,
        }
    }
}

/// Result alias for lowering operations.
pub type LowerResult<T> = Result<T, LowerError>;
