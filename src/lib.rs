//! # fuzzex
//!
//! Pure-Rust backtracking regex engine with lookaround, backreferences,
//! atomic and possessive constructs, recursion, branch reset, reverse
//! search and fuzzy (approximate) matching.
//!
//! ## Quick Start
//!
//! ```rust
//! use fuzzex::prelude::*;
//!
//! let re = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
//! let m = re.find("Date: 2026-02-12").unwrap();
//! assert_eq!(m.as_str(), "2026-02-12");
//! assert_eq!(m.start(), 6);
//! ```
//!
//! Fuzzy matching allows a bounded number of edits:
//!
//! ```rust
//! use fuzzex::prelude::*;
//!
//! let re = Regex::new(r"(?b)(foobar){e}").unwrap();
//! let caps = re.captures("xirefoabralfobarxie").unwrap();
//! assert_eq!(caps.get(0).unwrap().as_str(), "fobar");
//! assert_eq!(caps.cost(), 1);
//! ```
//!
//! ## Graph API
//!
//! The engine does not depend on the pattern syntax. A pattern graph can be
//! built directly and compiled:
//!
//! ```rust
//! use fuzzex::graph::{GraphBuilder, RepeatKind};
//! use fuzzex::api::Regex;
//!
//! let mut b = GraphBuilder::new();
//! let a = b.literal("ab");
//! let root = b.repeat(a, 1, None, RepeatKind::Greedy);
//! let re = Regex::from_graph(&b.finish(root).unwrap()).unwrap();
//! assert_eq!(re.find("xababy").unwrap().range(), 1..5);
//! ```
//!
//! ## Module Structure
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`syntax`] | Pattern text to pattern graph |
//! | [`graph`] | Pattern graph arena and builder |
//! | [`compile`] | Graph to instruction program |
//! | [`exec`] | Backtracking interpreter and search driver |
//! | [`region`] | Match result |
//! | [`fuzzy`] | Fuzzy constraints and edit counts |
//! | [`unicode`] | Character properties and case folding |
//! | [`api`] | `Regex`, iteration, split and substitution |

pub mod api;
pub mod compile;
pub mod error;
pub mod exec;
pub mod fuzzy;
pub mod graph;
pub mod options;
pub mod prelude;
pub mod program;
pub mod region;
pub mod syntax;
pub mod unicode;

pub use api::{Captures, Match, Regex, RegexBuilder};
pub use error::RegexError;
pub use options::{MatchLimits, RegexFlags};
