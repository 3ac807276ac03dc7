// graph.rs - Pattern Graph: an immutable arena of typed nodes.
//
// Nodes refer to each other by `NodeId` (an index into the arena), so a
// recursive call is just an index lookup and the graph has no cyclic
// ownership. Flags are already resolved into node-local settings (case mode,
// dotall, anchor kind, word semantics) by whoever builds the graph.

use std::collections::BTreeSet;

use smallvec::{smallvec, SmallVec};

use crate::error::RegexError;
use crate::fuzzy::FuzzyLimits;
use crate::options::RegexFlags;
use crate::unicode::{Property, UnicodeProvider};

pub type NodeId = usize;

/// How a node compares characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Case {
    #[default]
    Sensitive,
    /// Case-insensitive for ASCII letters only.
    Ascii,
    /// Case-insensitive with one-to-one folds.
    Simple,
    /// Case-insensitive with full folds (`ß` matches `ss`).
    Full,
}

impl Case {
    pub fn from_flags(flags: RegexFlags) -> Case {
        if !flags.contains(RegexFlags::IGNORECASE) {
            Case::Sensitive
        } else if flags.contains(RegexFlags::ASCII) {
            Case::Ascii
        } else if flags.contains(RegexFlags::FULLCASE) {
            Case::Full
        } else {
            Case::Simple
        }
    }

    #[inline]
    pub fn is_insensitive(self) -> bool {
        self != Case::Sensitive
    }

    #[inline]
    pub fn is_ascii(self) -> bool {
        self == Case::Ascii
    }
}

/// `\d`, `\w` and `\s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PerlClass {
    Digit,
    Word,
    Space,
}

/// Set expression of a character class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CharSet {
    Char(char),
    Range(char, char),
    Property(Property),
    Perl { class: PerlClass, ascii: bool },
    Union(Vec<CharSet>),
    Intersection(Vec<CharSet>),
    /// The first operand minus every following one.
    Difference(Vec<CharSet>),
    SymmetricDifference(Vec<CharSet>),
    Negated(Box<CharSet>),
}

impl CharSet {
    /// Is `c` a member, comparing under `case`?
    pub fn matches(&self, c: char, case: Case, uni: &dyn UnicodeProvider) -> bool {
        match self {
            CharSet::Char(x) => {
                *x == c
                    || (case.is_insensitive()
                        && uni.chars_eq_ignore_case(*x, c, case.is_ascii()))
            }
            CharSet::Range(lo, hi) => {
                if (*lo..=*hi).contains(&c) {
                    return true;
                }
                if !case.is_insensitive() {
                    return false;
                }
                if case.is_ascii() {
                    let (l, u) = (c.to_ascii_lowercase(), c.to_ascii_uppercase());
                    (*lo..=*hi).contains(&l) || (*lo..=*hi).contains(&u)
                } else {
                    uni.case_variants(c)
                        .iter()
                        .any(|v| (*lo..=*hi).contains(v))
                }
            }
            CharSet::Property(p) => {
                if case.is_insensitive() && p.is_case_sensitive() {
                    uni.has_property(c, Property::Cased)
                } else {
                    uni.has_property(c, *p)
                }
            }
            CharSet::Perl { class, ascii } => match class {
                PerlClass::Digit => uni.is_digit(c, *ascii),
                PerlClass::Word => uni.is_word(c, *ascii),
                PerlClass::Space => uni.is_space(c, *ascii),
            },
            CharSet::Union(items) => items.iter().any(|s| s.matches(c, case, uni)),
            CharSet::Intersection(items) => {
                !items.is_empty() && items.iter().all(|s| s.matches(c, case, uni))
            }
            CharSet::Difference(items) => match items.split_first() {
                Some((first, rest)) => {
                    first.matches(c, case, uni) && !rest.iter().any(|s| s.matches(c, case, uni))
                }
                None => false,
            },
            CharSet::SymmetricDifference(items) => {
                items.iter().filter(|s| s.matches(c, case, uni)).count() % 2 == 1
            }
            CharSet::Negated(inner) => !inner.matches(c, case, uni),
        }
    }

    /// The single character this set stands for, if it is that simple.
    pub fn as_single_char(&self) -> Option<char> {
        match self {
            CharSet::Char(c) => Some(*c),
            CharSet::Union(items) if items.len() == 1 => items[0].as_single_char(),
            _ => None,
        }
    }

    fn check_ranges(&self) -> Result<(), RegexError> {
        match self {
            CharSet::Range(lo, hi) if lo > hi => Err(RegexError::invalid_graph(format!(
                "reversed range {:?}-{:?}",
                lo, hi
            ))),
            CharSet::Union(items)
            | CharSet::Intersection(items)
            | CharSet::Difference(items)
            | CharSet::SymmetricDifference(items) => {
                items.iter().try_for_each(CharSet::check_ranges)
            }
            CharSet::Negated(inner) => inner.check_ranges(),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepeatKind {
    Greedy,
    Lazy,
    Possessive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookKind {
    Ahead,
    NotAhead,
    Behind,
    NotBehind,
}

impl LookKind {
    pub fn is_behind(self) -> bool {
        matches!(self, LookKind::Behind | LookKind::NotBehind)
    }

    pub fn is_negative(self) -> bool {
        matches!(self, LookKind::NotAhead | LookKind::NotBehind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorKind {
    /// `^` with MULTILINE: subject start or after `\n`.
    StartLine,
    /// `$` with MULTILINE: subject end or before `\n`.
    EndLine,
    /// `\A`, `^`.
    StartText,
    /// `\Z`: subject end only.
    EndText,
    /// `$`: subject end, or before a final `\n`.
    EndTextOptionalNewline,
    WordBoundary,
    NotWordBoundary,
    /// `\m`
    WordStart,
    /// `\M`
    WordEnd,
    /// `\G`: where the search began.
    SearchStart,
}

/// Which notion of "word character" word anchors use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WordMode {
    Ascii,
    #[default]
    Unicode,
    /// Unicode default word boundaries: apostrophes and periods between
    /// letters or digits do not break a word.
    Default,
}

impl WordMode {
    pub fn from_flags(flags: RegexFlags) -> WordMode {
        if flags.contains(RegexFlags::ASCII) {
            WordMode::Ascii
        } else if flags.contains(RegexFlags::WORD) {
            WordMode::Default
        } else {
            WordMode::Unicode
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Empty,
    Literal { text: Vec<char>, case: Case },
    AnyChar { dotall: bool },
    CharClass { set: CharSet, negate: bool, case: Case },
    Sequence(Vec<NodeId>),
    /// Branches are tried strictly in order.
    Alternation(Vec<NodeId>),
    Repeat { child: NodeId, min: u32, max: Option<u32>, kind: RepeatKind },
    /// `index` is `Some` for capturing groups.
    Group { index: Option<usize>, child: NodeId, atomic: bool },
    /// Alternatives that share capture numbers.
    BranchReset(Vec<NodeId>),
    Backreference { group: usize, case: Case },
    Assertion { kind: LookKind, child: NodeId },
    Conditional { group: usize, yes: NodeId, no: Option<NodeId> },
    /// `None` (or group 0) re-enters the whole pattern.
    RecursiveCall { group: Option<usize> },
    Fuzzy { child: NodeId, limits: FuzzyLimits },
    Anchor { kind: AnchorKind, word: WordMode },
}

impl Node {
    pub fn children(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Node::Sequence(v) | Node::Alternation(v) | Node::BranchReset(v) => {
                v.iter().copied().collect()
            }
            Node::Repeat { child, .. }
            | Node::Group { child, .. }
            | Node::Assertion { child, .. }
            | Node::Fuzzy { child, .. } => smallvec![*child],
            Node::Conditional { yes, no, .. } => {
                let mut v: SmallVec<[NodeId; 4]> = smallvec![*yes];
                v.extend(*no);
                v
            }
            _ => SmallVec::new(),
        }
    }
}

/// Width of what a node can consume, in characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Width {
    pub min: usize,
    pub max: Option<usize>,
}

impl Width {
    pub const ZERO: Width = Width { min: 0, max: Some(0) };
    pub const UNBOUNDED: Width = Width { min: 0, max: None };

    pub fn exact(n: usize) -> Width {
        Width { min: n, max: Some(n) }
    }

    pub fn fixed(&self) -> Option<usize> {
        match self.max {
            Some(m) if m == self.min => Some(m),
            _ => None,
        }
    }

    fn then(self, other: Width) -> Width {
        Width {
            min: self.min.saturating_add(other.min),
            max: self.max.zip(other.max).map(|(a, b)| a.saturating_add(b)),
        }
    }

    fn or(self, other: Width) -> Width {
        Width {
            min: self.min.min(other.min),
            max: self.max.zip(other.max).map(|(a, b)| a.max(b)),
        }
    }
}

/// A validated pattern graph.
#[derive(Clone, Debug)]
pub struct PatternGraph {
    nodes: Vec<Node>,
    root: NodeId,
    group_count: usize,
    names: Vec<(String, usize)>,
    group_nodes: Vec<NodeId>,
    flags: RegexFlags,
}

impl PatternGraph {
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of capture groups (group 0 excluded).
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    /// Whole-pattern flags (direction, fuzzy policy, ...).
    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, i)| i)
    }

    /// `(name, index)` pairs in definition order.
    pub fn group_names(&self) -> impl Iterator<Item = (&str, usize)> {
        self.names.iter().map(|(n, i)| (n.as_str(), *i))
    }

    /// The node that defines capture group `index`; the first one in pattern
    /// order when a branch reset defines it more than once.
    pub fn group_node(&self, index: usize) -> Option<NodeId> {
        index
            .checked_sub(1)
            .and_then(|i| self.group_nodes.get(i))
            .copied()
    }

    pub fn width(&self, id: NodeId) -> Width {
        match &self.nodes[id] {
            Node::Empty | Node::Anchor { .. } | Node::Assertion { .. } => Width::ZERO,
            Node::Literal { text, case } => match case {
                Case::Full => Width {
                    min: text.len().div_ceil(3),
                    max: Some(text.len() * 3),
                },
                _ => Width::exact(text.len()),
            },
            Node::AnyChar { .. } | Node::CharClass { .. } => Width::exact(1),
            Node::Sequence(children) => children
                .iter()
                .fold(Width::ZERO, |w, &c| w.then(self.width(c))),
            Node::Alternation(branches) | Node::BranchReset(branches) => branches
                .iter()
                .map(|&b| self.width(b))
                .reduce(Width::or)
                .unwrap_or(Width::ZERO),
            Node::Repeat { child, min, max, .. } => {
                let w = self.width(*child);
                let min_w = w.min.saturating_mul(*min as usize);
                let max_w = match (w.max, max) {
                    (Some(0), _) => Some(0),
                    (Some(m), Some(n)) => Some(m.saturating_mul(*n as usize)),
                    _ => None,
                };
                Width { min: min_w, max: max_w }
            }
            Node::Group { child, .. } => self.width(*child),
            Node::Conditional { yes, no, .. } => {
                let no_w = no.map_or(Width::ZERO, |n| self.width(n));
                self.width(*yes).or(no_w)
            }
            Node::Backreference { .. } | Node::RecursiveCall { .. } | Node::Fuzzy { .. } => {
                Width::UNBOUNDED
            }
        }
    }
}

/// Builds a `PatternGraph` bottom-up: children must be added before the
/// node that refers to them.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    names: Vec<(String, usize)>,
    flags: RegexFlags,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    pub fn with_flags(flags: RegexFlags) -> Self {
        GraphBuilder {
            flags,
            ..GraphBuilder::default()
        }
    }

    pub fn set_flags(&mut self, flags: RegexFlags) {
        self.flags = flags;
    }

    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Attach `name` to group `index`. Naming two different groups the same
    /// is an error; repeating an existing pair is not.
    pub fn name_group(&mut self, name: &str, index: usize) -> Result<(), RegexError> {
        match self.names.iter().find(|(n, _)| n == name) {
            Some(&(_, i)) if i == index => Ok(()),
            Some(_) => Err(RegexError::DuplicateGroup(name.to_string())),
            None => {
                self.names.push((name.to_string(), index));
                Ok(())
            }
        }
    }

    pub fn named_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, i)| i)
    }

    // === Shorthands ===

    pub fn literal(&mut self, text: &str) -> NodeId {
        self.add(Node::Literal {
            text: text.chars().collect(),
            case: Case::Sensitive,
        })
    }

    pub fn sequence(&mut self, children: Vec<NodeId>) -> NodeId {
        self.add(Node::Sequence(children))
    }

    pub fn alternation(&mut self, branches: Vec<NodeId>) -> NodeId {
        self.add(Node::Alternation(branches))
    }

    pub fn repeat(&mut self, child: NodeId, min: u32, max: Option<u32>, kind: RepeatKind) -> NodeId {
        self.add(Node::Repeat { child, min, max, kind })
    }

    pub fn capture(&mut self, index: usize, child: NodeId) -> NodeId {
        self.add(Node::Group {
            index: Some(index),
            child,
            atomic: false,
        })
    }

    pub fn atomic(&mut self, child: NodeId) -> NodeId {
        self.add(Node::Group {
            index: None,
            child,
            atomic: true,
        })
    }

    pub fn class(&mut self, set: CharSet) -> NodeId {
        self.add(Node::CharClass {
            set,
            negate: false,
            case: Case::Sensitive,
        })
    }

    /// Validate and freeze the graph rooted at `root`.
    pub fn finish(self, root: NodeId) -> Result<PatternGraph, RegexError> {
        let len = self.nodes.len();
        if root >= len {
            return Err(RegexError::invalid_graph(format!(
                "root {} is not a node",
                root
            )));
        }

        let mut parents = vec![0u32; len];
        for (id, node) in self.nodes.iter().enumerate() {
            for child in node.children() {
                if child >= id {
                    return Err(RegexError::invalid_graph(format!(
                        "node {} refers to node {}, which was not added before it",
                        id, child
                    )));
                }
                parents[child] += 1;
                if parents[child] > 1 {
                    return Err(RegexError::invalid_graph(format!(
                        "node {} has more than one parent",
                        child
                    )));
                }
            }
            match node {
                Node::Literal { text, .. } if text.is_empty() => {
                    return Err(RegexError::invalid_graph(format!("node {} is an empty literal", id)));
                }
                Node::Alternation(b) | Node::BranchReset(b) if b.is_empty() => {
                    return Err(RegexError::invalid_graph(format!("node {} has no branches", id)));
                }
                Node::Repeat { min, max: Some(max), .. } if max < min => {
                    return Err(RegexError::invalid_graph(format!(
                        "node {} repeats at most {} but at least {} times",
                        id, max, min
                    )));
                }
                Node::Group { index: Some(0), .. } => {
                    return Err(RegexError::invalid_graph("group 0 is the whole match"));
                }
                Node::CharClass { set, .. } => set.check_ranges()?,
                _ => {}
            }
        }

        let mut defined = BTreeSet::new();
        let mut group_nodes: Vec<Option<NodeId>> = Vec::new();
        self.collect_groups(root, &mut defined, &mut group_nodes)?;
        let group_count = defined.iter().next_back().copied().unwrap_or(0);
        for i in 1..=group_count {
            if !defined.contains(&i) {
                return Err(RegexError::invalid_graph(format!(
                    "group {} is never defined",
                    i
                )));
            }
        }
        let group_nodes: Vec<NodeId> = group_nodes.into_iter().flatten().collect();

        for node in &self.nodes {
            let referenced = match node {
                Node::Backreference { group, .. } | Node::Conditional { group, .. } => Some(*group),
                Node::RecursiveCall { group } => *group,
                _ => None,
            };
            if let Some(g) = referenced {
                let is_backref = matches!(node, Node::Backreference { .. } | Node::Conditional { .. });
                if g > group_count || (g == 0 && is_backref) {
                    return Err(RegexError::UnknownGroup(g.to_string()));
                }
            }
        }
        for (name, index) in &self.names {
            if *index == 0 || *index > group_count {
                return Err(RegexError::UnknownGroup(name.clone()));
            }
        }

        Ok(PatternGraph {
            nodes: self.nodes,
            root,
            group_count,
            names: self.names,
            group_nodes,
            flags: self.flags,
        })
    }

    /// Collect the capture indices defined under `id`. Outside a branch
    /// reset an index may be defined only once.
    fn collect_groups(
        &self,
        id: NodeId,
        out: &mut BTreeSet<usize>,
        group_nodes: &mut Vec<Option<NodeId>>,
    ) -> Result<(), RegexError> {
        let node = &self.nodes[id];
        match node {
            Node::BranchReset(branches) => {
                let mut all = BTreeSet::new();
                for &b in branches {
                    let mut here = BTreeSet::new();
                    self.collect_groups(b, &mut here, group_nodes)?;
                    all.extend(here);
                }
                merge_disjoint(out, all)
            }
            _ => {
                if let Node::Group { index: Some(i), .. } = node {
                    if !out.insert(*i) {
                        return Err(RegexError::DuplicateGroup(i.to_string()));
                    }
                    if group_nodes.len() < *i {
                        group_nodes.resize(*i, None);
                    }
                    group_nodes[*i - 1].get_or_insert(id);
                }
                for child in node.children() {
                    let mut here = BTreeSet::new();
                    self.collect_groups(child, &mut here, group_nodes)?;
                    merge_disjoint(out, here)?;
                }
                Ok(())
            }
        }
    }
}

fn merge_disjoint(out: &mut BTreeSet<usize>, more: BTreeSet<usize>) -> Result<(), RegexError> {
    for i in more {
        if !out.insert(i) {
            return Err(RegexError::DuplicateGroup(i.to_string()));
        }
    }
    Ok(())
}
