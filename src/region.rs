// region.rs - Match Result: overall span, group spans and capture history.

use smallvec::SmallVec;

use crate::fuzzy::FuzzyCounts;

/// Byte range `(start, end)` into the subject.
pub type Span = (usize, usize);

/// Snapshot of a successful attempt. Group 0 is the whole match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    groups: Vec<Option<Span>>,
    captures: Vec<SmallVec<[Span; 2]>>,
    last_group: Option<usize>,
    fuzzy_counts: FuzzyCounts,
    cost: u64,
}

impl Region {
    pub(crate) fn new(
        span: Span,
        captures: Vec<SmallVec<[Span; 2]>>,
        last_group: Option<usize>,
        fuzzy_counts: FuzzyCounts,
        cost: u64,
    ) -> Self {
        let mut groups = Vec::with_capacity(captures.len());
        groups.push(Some(span));
        groups.extend(captures.iter().skip(1).map(|h| h.last().copied()));
        let mut captures = captures;
        if let Some(first) = captures.first_mut() {
            first.clear();
            first.push(span);
        }
        Region {
            groups,
            captures,
            last_group,
            fuzzy_counts,
            cost,
        }
    }

    pub fn span(&self) -> Span {
        self.groups[0].unwrap_or((0, 0))
    }

    pub fn start(&self) -> usize {
        self.span().0
    }

    pub fn end(&self) -> usize {
        self.span().1
    }

    /// Number of groups including group 0.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Span of group `index`, `None` when the group did not take part.
    pub fn group(&self, index: usize) -> Option<Span> {
        self.groups.get(index).copied().flatten()
    }

    /// Every span group `index` captured, oldest first. A repeated group
    /// appends one span per iteration; the last one is its `group` value.
    pub fn captures(&self, index: usize) -> &[Span] {
        self.captures
            .get(index)
            .map(|h| h.as_slice())
            .unwrap_or(&[])
    }

    /// The group that closed last, if any.
    pub fn last_group(&self) -> Option<usize> {
        self.last_group
    }

    pub fn fuzzy_counts(&self) -> FuzzyCounts {
        self.fuzzy_counts
    }

    /// Total edit cost of the match (0 for an exact match).
    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Span>> + '_ {
        self.groups.iter().copied()
    }
}
