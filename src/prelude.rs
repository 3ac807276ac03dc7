// prelude.rs - Convenient re-exports for the idiomatic API.
//
//! # Prelude
//!
//! ```
//! use fuzzex::prelude::*;
//!
//! let re = Regex::new(r"\d+").unwrap();
//! let m = re.find("answer: 42").unwrap();
//! assert_eq!(m.as_str(), "42");
//! ```

pub use crate::api::{Captures, CapturesIter, CapturesMatches, FindIter, Match, Regex, RegexBuilder};
pub use crate::error::{RegexError, SyntaxError, SyntaxErrorKind};
pub use crate::exec::SearchMode;
pub use crate::fuzzy::{FuzzyCounts, FuzzyLimits};
pub use crate::options::{FuzzyPolicy, MatchLimits, RegexFlags};
pub use crate::region::{Region, Span};
