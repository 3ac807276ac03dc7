// fuzzy.rs - Edit limits for approximate matching.
//
// A fuzzy group carries `FuzzyLimits`; the interpreter counts the edits it
// makes inside each group in a `FuzzyCounts` and asks `admits` before every
// edit, so a branch is pruned the moment it leaves the envelope.

use std::fmt;

/// One elementary edit relative to an exact match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edit {
    /// A subject unit stands in for a different pattern unit.
    Substitute,
    /// A subject unit with no counterpart in the pattern.
    Insert,
    /// A pattern unit with no counterpart in the subject.
    Delete,
}

impl Edit {
    /// Edits in the order they are explored after an exact match fails.
    pub const ORDER: [Edit; 3] = [Edit::Substitute, Edit::Delete, Edit::Insert];

    pub fn letter(self) -> char {
        match self {
            Edit::Substitute => 's',
            Edit::Insert => 'i',
            Edit::Delete => 'd',
        }
    }
}

/// Edit counters, per group or summed over a whole match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FuzzyCounts {
    pub substitutions: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl FuzzyCounts {
    pub fn total(&self) -> u32 {
        self.substitutions + self.insertions + self.deletions
    }

    pub fn is_exact(&self) -> bool {
        self.total() == 0
    }

    pub fn add(&mut self, edit: Edit) {
        match edit {
            Edit::Substitute => self.substitutions += 1,
            Edit::Insert => self.insertions += 1,
            Edit::Delete => self.deletions += 1,
        }
    }

    pub fn remove(&mut self, edit: Edit) {
        match edit {
            Edit::Substitute => self.substitutions -= 1,
            Edit::Insert => self.insertions -= 1,
            Edit::Delete => self.deletions -= 1,
        }
    }

    pub fn with(mut self, edit: Edit) -> FuzzyCounts {
        self.add(edit);
        self
    }

    /// `(substitutions, insertions, deletions)`.
    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.substitutions, self.insertions, self.deletions)
    }
}

/// Linear cost inequality `ins*i + del*d + sub*s <= max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CostEquation {
    pub insert: u32,
    pub delete: u32,
    pub substitute: u32,
    pub max: u32,
}

impl CostEquation {
    pub fn weight(&self, edit: Edit) -> u32 {
        match edit {
            Edit::Substitute => self.substitute,
            Edit::Insert => self.insert,
            Edit::Delete => self.delete,
        }
    }

    pub fn cost(&self, counts: &FuzzyCounts) -> u64 {
        self.insert as u64 * counts.insertions as u64
            + self.delete as u64 * counts.deletions as u64
            + self.substitute as u64 * counts.substitutions as u64
    }
}

/// Bounds of one fuzzy group. `None` is unlimited, `Some(0)` forbids the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuzzyLimits {
    pub max_substitutions: Option<u32>,
    pub max_insertions: Option<u32>,
    pub max_deletions: Option<u32>,
    pub max_errors: Option<u32>,
    pub cost: Option<CostEquation>,
}

impl Default for FuzzyLimits {
    /// `{e}`: any number of edits of any kind.
    fn default() -> Self {
        FuzzyLimits::unlimited()
    }
}

fn within(n: u32, max: Option<u32>) -> bool {
    max.map_or(true, |m| n <= m)
}

impl FuzzyLimits {
    pub const fn unlimited() -> Self {
        FuzzyLimits {
            max_substitutions: None,
            max_insertions: None,
            max_deletions: None,
            max_errors: None,
            cost: None,
        }
    }

    /// At most `n` edits of any kind (`{e<=n}`).
    pub const fn errors(n: u32) -> Self {
        FuzzyLimits {
            max_errors: Some(n),
            ..FuzzyLimits::unlimited()
        }
    }

    pub fn with_max(mut self, edit: Edit, n: u32) -> Self {
        match edit {
            Edit::Substitute => self.max_substitutions = Some(n),
            Edit::Insert => self.max_insertions = Some(n),
            Edit::Delete => self.max_deletions = Some(n),
        }
        self
    }

    pub fn with_cost(mut self, cost: CostEquation) -> Self {
        self.cost = Some(cost);
        self
    }

    fn max_for(&self, edit: Edit) -> Option<u32> {
        match edit {
            Edit::Substitute => self.max_substitutions,
            Edit::Insert => self.max_insertions,
            Edit::Delete => self.max_deletions,
        }
    }

    /// Is `edit` possible at all under these limits?
    pub fn permits(&self, edit: Edit) -> bool {
        self.max_for(edit) != Some(0)
            && self.max_errors != Some(0)
            && self.cost.map_or(true, |c| c.weight(edit) <= c.max)
    }

    /// Do `counts` lie inside the envelope?
    pub fn admits(&self, counts: &FuzzyCounts) -> bool {
        within(counts.substitutions, self.max_substitutions)
            && within(counts.insertions, self.max_insertions)
            && within(counts.deletions, self.max_deletions)
            && within(counts.total(), self.max_errors)
            && self.cost.map_or(true, |c| c.cost(counts) <= c.max as u64)
    }

    /// What one `edit` adds to a match's cost: its weight in the cost
    /// equation, or 1 when there is none.
    pub fn edit_cost(&self, edit: Edit) -> u32 {
        self.cost.map_or(1, |c| c.weight(edit))
    }

    /// Parse the body of a constraint block such as `i<=1,d<=2,2d+1s<4`.
    pub fn parse(body: &str) -> Result<FuzzyLimits, String> {
        let mut limits = FuzzyLimits::unlimited();
        let mut mentioned = [false; 3]; // s, i, d
        let mut seen_kind = [false; 3];
        let mut seen_e = false;
        let mut seen_cost = false;

        let items: Vec<&str> = body.split(',').map(str::trim).collect();
        if items.iter().all(|s| s.is_empty()) {
            return Err("empty fuzzy constraint".to_string());
        }

        for item in items {
            let item: String = item.chars().filter(|c| !c.is_whitespace()).collect();
            if item.is_empty() {
                return Err("empty fuzzy constraint item".to_string());
            }
            let (lhs, bound) = split_bound(&item)?;

            if matches!(lhs, "e" | "s" | "i" | "d") {
                if lhs == "e" {
                    if seen_e {
                        return Err("duplicate 'e' constraint".to_string());
                    }
                    seen_e = true;
                    limits.max_errors = bound;
                } else {
                    let (idx, edit) = kind_index(lhs)?;
                    if seen_kind[idx] {
                        return Err(format!("duplicate '{}' constraint", lhs));
                    }
                    seen_kind[idx] = true;
                    mentioned[idx] = true;
                    if let Some(n) = bound {
                        limits = limits.with_max(edit, n);
                    }
                }
                continue;
            }

            // Cost equation.
            let max = bound.ok_or_else(|| "cost equation needs a bound".to_string())?;
            if seen_cost {
                return Err("duplicate cost equation".to_string());
            }
            seen_cost = true;
            let mut eq = CostEquation {
                insert: 0,
                delete: 0,
                substitute: 0,
                max,
            };
            for term in lhs.split('+') {
                let digits = term.len()
                    - term
                        .trim_start_matches(|c: char| c.is_ascii_digit())
                        .len();
                let (coef, kind) = term.split_at(digits);
                let coef = if coef.is_empty() {
                    1
                } else {
                    coef.parse::<u32>()
                        .map_err(|_| format!("bad cost coefficient '{}'", coef))?
                };
                let (idx, edit) = kind_index(kind)?;
                mentioned[idx] = true;
                match edit {
                    Edit::Substitute => eq.substitute += coef,
                    Edit::Insert => eq.insert += coef,
                    Edit::Delete => eq.delete += coef,
                }
            }
            limits.cost = Some(eq);
        }

        // Only `e` given: every kind is allowed. Otherwise unmentioned kinds
        // are forbidden.
        if mentioned.iter().any(|&m| m) {
            let kinds = [Edit::Substitute, Edit::Insert, Edit::Delete];
            for (idx, edit) in kinds.into_iter().enumerate() {
                if !mentioned[idx] {
                    limits = limits.with_max(edit, 0);
                }
            }
        }
        Ok(limits)
    }

    /// Would `body` be read as a constraint block rather than a quantifier?
    pub fn looks_like_constraint(body: &str) -> bool {
        !body.is_empty()
            && body.chars().any(|c| matches!(c, 'e' | 'i' | 'd' | 's'))
            && body.chars().all(|c| {
                matches!(c, 'e' | 'i' | 'd' | 's' | '<' | '=' | '+' | ',' | ' ')
                    || c.is_ascii_digit()
            })
    }
}

fn kind_index(kind: &str) -> Result<(usize, Edit), String> {
    match kind {
        "s" => Ok((0, Edit::Substitute)),
        "i" => Ok((1, Edit::Insert)),
        "d" => Ok((2, Edit::Delete)),
        _ => Err(format!("unknown edit kind '{}'", kind)),
    }
}

/// Split `lhs<=n` / `lhs<n` / bare `lhs`. A strict bound is turned into an
/// inclusive one.
fn split_bound(item: &str) -> Result<(&str, Option<u32>), String> {
    let Some(lt) = item.find('<') else {
        return Ok((item, None));
    };
    let lhs = &item[..lt];
    let rest = &item[lt + 1..];
    let (inclusive, num) = match rest.strip_prefix('=') {
        Some(num) => (true, num),
        None => (false, rest),
    };
    if lhs.is_empty() || num.contains('<') {
        return Err(format!("unsupported fuzzy constraint '{}'", item));
    }
    let n: u32 = num
        .parse()
        .map_err(|_| format!("bad fuzzy limit '{}'", num))?;
    let n = if inclusive { n } else { n.saturating_sub(1) };
    Ok((lhs, Some(n)))
}

impl fmt::Display for FuzzyLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (edit, max) in [
            (Edit::Insert, self.max_insertions),
            (Edit::Delete, self.max_deletions),
            (Edit::Substitute, self.max_substitutions),
        ] {
            if let Some(n) = max {
                parts.push(format!("{}<={}", edit.letter(), n));
            }
        }
        match self.max_errors {
            Some(n) => parts.push(format!("e<={}", n)),
            None if parts.is_empty() && self.cost.is_none() => parts.push("e".to_string()),
            None => {}
        }
        if let Some(c) = self.cost {
            parts.push(format!("{}i+{}d+{}s<={}", c.insert, c.delete, c.substitute, c.max));
        }
        write!(f, "{{{}}}", parts.join(","))
    }
}
