// error.rs - Error types for pattern compilation and engine contract violations.
//
// Matching itself never fails with an error: exhausting a resource limit is
// reported as "no match". Errors are reserved for malformed patterns, malformed
// graphs and out-of-contract arguments.

use std::fmt;

/// What went wrong while reading a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    UnexpectedEnd,
    UnbalancedParenthesis,
    UnterminatedCharClass,
    BadEscape,
    BadRange,
    BadQuantifier,
    NothingToRepeat,
    BadFlag,
    BadGroupName,
    BadFuzzyConstraint,
    UnknownProperty,
    BadCondition,
}

/// A pattern syntax error with the offset (in bytes) where it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, message: impl Into<String>, offset: usize) -> Self {
        SyntaxError {
            kind,
            message: message.into(),
            offset,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.offset)
    }
}

/// Error type for compilation and engine entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexError {
    /// Syntax error in the pattern text.
    Syntax(SyntaxError),
    /// A group name or number that the pattern never defines.
    UnknownGroup(String),
    /// The same group number or name defined twice outside a branch reset.
    DuplicateGroup(String),
    /// A pattern graph that breaks its structural invariants.
    InvalidGraph { message: String },
    /// An argument outside the engine contract (positions, ranges).
    InvalidArgument { message: String },
}

impl RegexError {
    pub(crate) fn invalid_graph(message: impl Into<String>) -> Self {
        RegexError::InvalidGraph {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        RegexError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the pattern text itself.
    pub fn is_pattern_error(&self) -> bool {
        matches!(
            self,
            RegexError::Syntax(_)
                | RegexError::UnknownGroup(_)
                | RegexError::DuplicateGroup(_)
        )
    }
}

impl fmt::Display for RegexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegexError::Syntax(e) => write!(f, "syntax error: {}", e),
            RegexError::UnknownGroup(name) => write!(f, "unknown group: {}", name),
            RegexError::DuplicateGroup(name) => write!(f, "duplicate group: {}", name),
            RegexError::InvalidGraph { message } => write!(f, "invalid pattern graph: {}", message),
            RegexError::InvalidArgument { message } => write!(f, "invalid argument: {}", message),
        }
    }
}

impl std::error::Error for RegexError {}

impl From<SyntaxError> for RegexError {
    fn from(e: SyntaxError) -> Self {
        RegexError::Syntax(e)
    }
}
