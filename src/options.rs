// options.rs - Public flags, search direction, fuzzy policy and match limits.
//
// Flags are resolved into node-local settings when a pattern graph is built;
// nothing here is consulted as mutable global state while matching, except
// the process-wide default limits below.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Compile flags. Each has an inline letter in the pattern syntax.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RegexFlags: u32 {
        /// `i`: case-insensitive matching.
        const IGNORECASE   = 1 << 0;
        /// `m`: `^` and `$` match at line boundaries.
        const MULTILINE    = 1 << 1;
        /// `s`: `.` matches `\n`.
        const DOTALL       = 1 << 2;
        /// `x`: whitespace and `#` comments in the pattern are ignored.
        const VERBOSE      = 1 << 3;
        /// `a`: ASCII-only semantics for `\w`, `\d`, `\s`, `\b` and case folding.
        const ASCII        = 1 << 4;
        /// `u`: Unicode semantics (the default for `str` patterns).
        const UNICODE      = 1 << 5;
        /// `w`: Unicode default word boundaries.
        const WORD         = 1 << 6;
        /// `f`: full case folding (multi-codepoint folds such as `ß` ~ `ss`).
        const FULLCASE     = 1 << 7;
        /// `r`: search right-to-left.
        const REVERSE      = 1 << 8;
        /// `b`: fuzzy matching reports the lowest-cost match anywhere.
        const BESTMATCH    = 1 << 9;
        /// `e`: fuzzy matching improves the fit at the leftmost start.
        const ENHANCEMATCH = 1 << 10;
        /// `V1`: nested set operations and positional inline flags.
        const VERSION1     = 1 << 11;
    }
}

impl RegexFlags {
    /// Flags that only make sense for the whole pattern.
    pub const GLOBAL_ONLY: RegexFlags = RegexFlags::REVERSE
        .union(RegexFlags::BESTMATCH)
        .union(RegexFlags::ENHANCEMATCH)
        .union(RegexFlags::VERSION1);

    /// Map an inline flag letter to its flag.
    pub fn from_letter(c: char) -> Option<RegexFlags> {
        let flag = match c {
            'i' => RegexFlags::IGNORECASE,
            'm' => RegexFlags::MULTILINE,
            's' => RegexFlags::DOTALL,
            'x' => RegexFlags::VERBOSE,
            'a' => RegexFlags::ASCII,
            'u' => RegexFlags::UNICODE,
            'w' => RegexFlags::WORD,
            'f' => RegexFlags::FULLCASE,
            'r' => RegexFlags::REVERSE,
            'b' => RegexFlags::BESTMATCH,
            'e' => RegexFlags::ENHANCEMATCH,
            _ => return None,
        };
        Some(flag)
    }

    /// The fuzzy selection policy implied by these flags.
    pub fn fuzzy_policy(self) -> FuzzyPolicy {
        if self.contains(RegexFlags::BESTMATCH) {
            FuzzyPolicy::Best
        } else if self.contains(RegexFlags::ENHANCEMATCH) {
            FuzzyPolicy::Enhance
        } else {
            FuzzyPolicy::FirstSuccess
        }
    }

    /// The scan direction implied by these flags.
    pub fn direction(self) -> Direction {
        if self.contains(RegexFlags::REVERSE) {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

/// Direction in which the subject is traversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    #[inline]
    pub fn is_reverse(self) -> bool {
        self == Direction::Reverse
    }
}

/// How a pattern containing fuzzy groups picks among matches within budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FuzzyPolicy {
    /// First match within the cost envelope in backtracking order.
    #[default]
    FirstSuccess,
    /// Lowest total cost among matches at the leftmost matching start.
    Enhance,
    /// Lowest total cost over every start; ties go to the earliest start in
    /// scan order.
    Best,
}

// === Limits ===

pub const DEFAULT_MATCH_STACK_LIMIT: u32 = 10_000_000;
pub const DEFAULT_RECURSION_LIMIT: u32 = 5_000;
pub const DEFAULT_RETRY_LIMIT: u64 = 10_000_000;
pub const DEFAULT_SEARCH_RETRY_LIMIT: u64 = 0;
pub const INIT_MATCH_STACK_SIZE: usize = 160;

static MATCH_STACK_LIMIT: AtomicU32 = AtomicU32::new(DEFAULT_MATCH_STACK_LIMIT);
static RECURSION_LIMIT: AtomicU32 = AtomicU32::new(DEFAULT_RECURSION_LIMIT);
static RETRY_LIMIT: AtomicU64 = AtomicU64::new(DEFAULT_RETRY_LIMIT);
static SEARCH_RETRY_LIMIT: AtomicU64 = AtomicU64::new(DEFAULT_SEARCH_RETRY_LIMIT);

pub fn set_default_match_stack_limit(n: u32) { MATCH_STACK_LIMIT.store(n, Ordering::Relaxed); }
pub fn default_match_stack_limit() -> u32 { MATCH_STACK_LIMIT.load(Ordering::Relaxed) }
pub fn set_default_recursion_limit(n: u32) { RECURSION_LIMIT.store(n, Ordering::Relaxed); }
pub fn default_recursion_limit() -> u32 { RECURSION_LIMIT.load(Ordering::Relaxed) }
pub fn set_default_retry_limit(n: u64) { RETRY_LIMIT.store(n, Ordering::Relaxed); }
pub fn default_retry_limit() -> u64 { RETRY_LIMIT.load(Ordering::Relaxed) }
pub fn set_default_search_retry_limit(n: u64) { SEARCH_RETRY_LIMIT.store(n, Ordering::Relaxed); }
pub fn default_search_retry_limit() -> u64 { SEARCH_RETRY_LIMIT.load(Ordering::Relaxed) }

/// Resource bounds for one search. A bound of 0 disables that check.
///
/// A call nested past `recursion_limit` simply fails; exceeding the stack or
/// either retry bound ends the whole search as "no match".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchLimits {
    /// Maximum number of entries on the backtrack stack.
    pub stack_limit: u32,
    /// Maximum nesting of recursive calls (`(?R)`, `(?1)`, ...).
    pub recursion_limit: u32,
    /// Maximum number of backtracks per attempt at one start position.
    pub retry_limit: u64,
    /// Maximum number of backtracks summed over every start position of one
    /// search. Unlimited by default.
    pub search_retry_limit: u64,
}

impl MatchLimits {
    /// Limits with every check disabled.
    pub const UNLIMITED: MatchLimits = MatchLimits {
        stack_limit: 0,
        recursion_limit: 0,
        retry_limit: 0,
        search_retry_limit: 0,
    };
}

impl Default for MatchLimits {
    /// Snapshot of the process-wide defaults.
    fn default() -> Self {
        MatchLimits {
            stack_limit: default_match_stack_limit(),
            recursion_limit: default_recursion_limit(),
            retry_limit: default_retry_limit(),
            search_retry_limit: default_search_retry_limit(),
        }
    }
}
