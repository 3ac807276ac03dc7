// program.rs - Lowered instruction set executed by the interpreter.
//
// A `Program` is a flat `Vec<Op>` plus the tables the ops index into
// (repeat counters, fuzzy groups, capture names). Consuming ops carry a
// `reverse` flag: reverse ops read the character before the current position
// and move left.

use std::fmt;
use std::sync::Arc;

use crate::fuzzy::FuzzyLimits;
use crate::graph::{AnchorKind, Case, CharSet, WordMode};
use crate::options::{Direction, FuzzyPolicy};
use crate::unicode::UnicodeProvider;

pub type Label = usize;
pub type FuzzyId = usize;

/// Precomputed character class.
#[derive(Clone, Debug)]
pub struct ClassMatcher {
    pub set: CharSet,
    pub negate: bool,
    pub case: Case,
    /// Membership of the 128 ASCII characters, answers already negated.
    pub ascii: [u64; 2],
}

impl ClassMatcher {
    pub fn new(set: CharSet, negate: bool, case: Case, uni: &dyn UnicodeProvider) -> Self {
        let mut ascii = [0u64; 2];
        for b in 0u8..128 {
            if set.matches(b as char, case, uni) != negate {
                ascii[(b >> 6) as usize] |= 1 << (b & 63);
            }
        }
        ClassMatcher {
            set,
            negate,
            case,
            ascii,
        }
    }

    #[inline]
    pub fn matches(&self, c: char, uni: &dyn UnicodeProvider) -> bool {
        if c.is_ascii() {
            let b = c as u32;
            self.ascii[(b >> 6) as usize] & (1 << (b & 63)) != 0
        } else {
            self.set.matches(c, self.case, uni) != self.negate
        }
    }
}

/// Test applied to one subject character.
#[derive(Clone, Debug)]
pub enum Matcher {
    Char(char),
    /// Compare simple folds; `folded` is already folded.
    CharFold { folded: char, ascii: bool },
    Any { dotall: bool },
    Class(Box<ClassMatcher>),
}

impl Matcher {
    #[inline]
    pub fn matches(&self, c: char, uni: &dyn UnicodeProvider) -> bool {
        match self {
            Matcher::Char(x) => *x == c,
            Matcher::CharFold { folded, ascii } => uni.fold(c, *ascii) == *folded,
            Matcher::Any { dotall } => *dotall || c != '\n',
            Matcher::Class(cls) => cls.matches(c, uni),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Op {
    /// Successful end of the main program.
    End,
    Fail,
    Jump(Label),
    /// Choice point: try the next op, on failure resume at the label.
    Push(Label),

    // === Characters ===
    /// Exact characters.
    Str { text: Box<[char]>, reverse: bool },
    /// Characters compared by simple fold; `folded` is pre-folded.
    StrFold { folded: Box<[char]>, ascii: bool, reverse: bool },
    /// Characters compared by full fold; subject characters are expanded.
    StrFull { folded: Box<[char]>, reverse: bool },
    /// One character, optionally inside a fuzzy group.
    Unit { m: Matcher, reverse: bool, fuzzy: Option<FuzzyId> },
    /// A single-character matcher repeated `min..=max` times.
    UnitRepeat { m: Matcher, min: u32, max: Option<u32>, greedy: bool, reverse: bool },

    // === Assertions ===
    Anchor { kind: AnchorKind, word: WordMode },
    /// Move left `n` characters (fixed-width lookbehind).
    StepBack { n: usize },

    // === Captures ===
    MemOpen { group: usize },
    MemClose { group: usize },
    BackRef { group: usize, case: Case, reverse: bool },
    /// Start a unit-by-unit backreference inside a fuzzy group.
    BackRefStart { group: usize, reverse: bool },
    BackRefUnit { group: usize, case: Case, reverse: bool, fuzzy: FuzzyId },
    /// Continue with the next op if `group` is set, else jump.
    CondGroup { group: usize, no: Label },

    // === Repeats ===
    RepeatInit { id: usize, min: u32, max: Option<u32>, greedy: bool, exit: Label },
    /// End of a repeat body that starts at `body`.
    RepeatNext { id: usize, min: u32, max: Option<u32>, greedy: bool, body: Label },

    // === Atomic groups and lookaround ===
    AtomicStart { mark: usize },
    /// Drop every choice point made since the matching `AtomicStart`.
    AtomicEnd { mark: usize },
    LookStart { mark: usize },
    /// Succeed and rewind to where the lookaround started.
    LookEnd { mark: usize },
    /// Negative lookaround: resume at `next` if the body fails.
    NegLookStart { mark: usize, next: Label },
    /// The body matched, so the negative lookaround fails.
    NegLookFail { mark: usize },

    // === Subroutines ===
    Call { target: Label, group: usize },
    Return,

    // === Fuzzy groups ===
    FuzzyStart { id: FuzzyId },
    FuzzyEnd { id: FuzzyId, reverse: bool },
}

impl Op {
    /// Does this op consume subject characters?
    pub fn consumes(&self) -> bool {
        matches!(
            self,
            Op::Str { .. }
                | Op::StrFold { .. }
                | Op::StrFull { .. }
                | Op::Unit { .. }
                | Op::UnitRepeat { .. }
                | Op::BackRef { .. }
                | Op::BackRefUnit { .. }
        )
    }
}

/// A compiled pattern, ready for `exec::search`.
#[derive(Clone)]
pub struct Program {
    pub(crate) ops: Vec<Op>,
    pub(crate) entry: Label,
    pub(crate) group_count: usize,
    pub(crate) names: Vec<(String, usize)>,
    pub(crate) repeat_count: usize,
    pub(crate) fuzzy: Vec<FuzzyLimits>,
    pub(crate) direction: Direction,
    pub(crate) policy: FuzzyPolicy,
    /// Every forward match must begin with this ASCII byte.
    pub(crate) first_byte: Option<u8>,
    /// Forward matches can only begin at the subject start.
    pub(crate) anchored_start: bool,
    pub(crate) unicode: Arc<dyn UnicodeProvider>,
}

impl Program {
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, i)| i)
    }

    pub fn group_names(&self) -> impl Iterator<Item = (&str, usize)> {
        self.names.iter().map(|(n, i)| (n.as_str(), *i))
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn fuzzy_policy(&self) -> FuzzyPolicy {
        self.policy
    }

    pub fn is_fuzzy(&self) -> bool {
        !self.fuzzy.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn unicode(&self) -> &dyn UnicodeProvider {
        self.unicode.as_ref()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Program {{ groups: {}, repeats: {}, fuzzy: {}, direction: {:?}, entry: {} }}",
            self.group_count,
            self.repeat_count,
            self.fuzzy.len(),
            self.direction,
            self.entry
        )?;
        for (pc, op) in self.ops.iter().enumerate() {
            writeln!(f, "{:4}: {:?}", pc, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unicode::StdUnicode;

    #[test]
    fn class_matcher_ascii_cache() {
        let u = StdUnicode;
        let cls = ClassMatcher::new(CharSet::Range('a', 'c'), false, Case::Simple, &u);
        assert!(cls.matches('B', &u));
        assert!(!cls.matches('d', &u));
        let neg = ClassMatcher::new(CharSet::Range('a', 'c'), true, Case::Sensitive, &u);
        assert!(neg.matches('d', &u));
        assert!(neg.matches('é', &u));
        assert!(!neg.matches('a', &u));
    }

    #[test]
    fn matcher_variants() {
        let u = StdUnicode;
        assert!(Matcher::Any { dotall: false }.matches('x', &u));
        assert!(!Matcher::Any { dotall: false }.matches('\n', &u));
        assert!(Matcher::Any { dotall: true }.matches('\n', &u));
        assert!(Matcher::CharFold { folded: 'k', ascii: false }.matches('\u{212A}', &u));
        assert!(!Matcher::CharFold { folded: 'k', ascii: true }.matches('\u{212A}', &u));
    }
}
