// api.rs - Idiomatic Rust API for fuzzex.
//
// Wraps the front end, compiler and interpreter with Rust-native types:
// Regex, RegexBuilder, Match, Captures and the iteration/substitution layer
// (find_iter, split, replace) that drives repeated searches.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::compile::compile_with;
use crate::error::{RegexError, SyntaxError, SyntaxErrorKind};
use crate::exec::{exec, SearchMode};
use crate::fuzzy::FuzzyCounts;
use crate::graph::PatternGraph;
use crate::options::{FuzzyPolicy, MatchLimits, RegexFlags};
use crate::program::Program;
use crate::region::Region;
use crate::syntax::parse_with;
use crate::unicode::{StdUnicode, UnicodeProvider};

/// A compiled regular expression.
///
/// # Examples
///
/// ```
/// use fuzzex::api::Regex;
///
/// let re = Regex::new(r"\d+").unwrap();
/// assert!(re.is_match("hello 42"));
///
/// let m = re.find("hello 42").unwrap();
/// assert_eq!(m.as_str(), "42");
/// assert_eq!(m.start(), 6);
/// assert_eq!(m.end(), 8);
/// ```
#[derive(Clone)]
pub struct Regex {
    pattern: String,
    flags: RegexFlags,
    program: Program,
    limits: MatchLimits,
}

impl Regex {
    /// Compile a pattern with no flags.
    pub fn new(pattern: &str) -> Result<Regex, RegexError> {
        RegexBuilder::new(pattern).build()
    }

    /// Compile a pattern with the given flags.
    pub fn with_flags(pattern: &str, flags: RegexFlags) -> Result<Regex, RegexError> {
        RegexBuilder::new(pattern).flags(flags).build()
    }

    /// Create a [`RegexBuilder`] for fine-grained control over compilation.
    pub fn builder(pattern: &str) -> RegexBuilder {
        RegexBuilder::new(pattern)
    }

    /// Compile a graph built directly with `GraphBuilder`.
    pub fn from_graph(graph: &PatternGraph) -> Result<Regex, RegexError> {
        Ok(Regex {
            pattern: String::new(),
            flags: graph.flags(),
            program: compile_with(graph, Arc::new(StdUnicode))?,
            limits: MatchLimits::default(),
        })
    }

    /// The pattern text (empty for a regex built from a graph).
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Flags in effect, including the ones turned on inline.
    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn limits(&self) -> MatchLimits {
        self.limits
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Return the number of capture groups in the pattern (excluding group 0).
    pub fn captures_len(&self) -> usize {
        self.program.group_count()
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.program.group_index(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = (&str, usize)> {
        self.program.group_names()
    }

    pub fn is_reverse(&self) -> bool {
        self.program.direction().is_reverse()
    }

    pub fn fuzzy_policy(&self) -> FuzzyPolicy {
        self.program.fuzzy_policy()
    }

    // === Single searches ===

    /// Run one search over `text[start..end]`.
    ///
    /// Returns `RegexError::InvalidArgument` when the window is out of range
    /// or does not fall on character boundaries.
    pub fn search_in<'t>(
        &'t self,
        text: &'t str,
        start: usize,
        end: usize,
        mode: SearchMode,
    ) -> Result<Option<Captures<'t>>, RegexError> {
        let region = exec(&self.program, text, start, end, mode, &self.limits)?;
        Ok(region.map(|region| Captures {
            text,
            region,
            regex: self,
        }))
    }

    fn run<'t>(&'t self, text: &'t str, mode: SearchMode) -> Option<Captures<'t>> {
        // The whole subject is always a valid window.
        self.search_in(text, 0, text.len(), mode).ok().flatten()
    }

    /// Check whether `text` matches the pattern anywhere.
    pub fn is_match(&self, text: &str) -> bool {
        self.run(text, SearchMode::Search).is_some()
    }

    /// Return the first match in `text`, or `None` if no match.
    pub fn find<'t>(&'t self, text: &'t str) -> Option<Match<'t>> {
        self.run(text, SearchMode::Search).map(|c| c.whole())
    }

    /// Return the first match with all capture groups, or `None`.
    pub fn captures<'t>(&'t self, text: &'t str) -> Option<Captures<'t>> {
        self.run(text, SearchMode::Search)
    }

    /// Match anchored at the scan start: the beginning of `text`, or its end
    /// for a reverse pattern.
    pub fn match_prefix<'t>(&'t self, text: &'t str) -> Option<Captures<'t>> {
        self.run(text, SearchMode::Match)
    }

    /// Match covering the whole of `text`.
    pub fn fullmatch<'t>(&'t self, text: &'t str) -> Option<Captures<'t>> {
        self.run(text, SearchMode::FullMatch)
    }

    // === Iteration ===

    fn searcher<'r, 't>(&'r self, text: &'t str, overlapped: bool) -> Searcher<'r, 't> {
        Searcher {
            regex: self,
            text,
            pos: if self.is_reverse() { text.len() } else { 0 },
            overlapped,
            done: false,
        }
    }

    /// Iterate over all non-overlapping matches in scan order. A reverse
    /// pattern yields its matches from the end of `text` backwards.
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> FindIter<'r, 't> {
        FindIter(self.searcher(text, false))
    }

    /// Like `find_iter`, but each search restarts one character after the
    /// previous match's start, so matches may share characters.
    pub fn find_iter_overlapped<'r, 't>(&'r self, text: &'t str) -> FindIter<'r, 't> {
        FindIter(self.searcher(text, true))
    }

    /// Iterate over the captures of all non-overlapping matches.
    pub fn captures_iter<'r, 't>(&'r self, text: &'t str) -> CapturesMatches<'r, 't> {
        CapturesMatches(self.searcher(text, false))
    }

    // === Split ===

    /// Split `text` at each match. Zero-width matches never split.
    ///
    /// ```
    /// use fuzzex::api::Regex;
    ///
    /// let re = Regex::new(r"x*").unwrap();
    /// assert_eq!(re.split("xaxbxc"), vec!["", "a", "b", "c"]);
    /// ```
    pub fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.split_pieces(text, usize::MAX)
    }

    /// Split into at most `limit` pieces; the last piece holds the rest.
    pub fn splitn<'t>(&self, text: &'t str, limit: usize) -> Vec<&'t str> {
        if limit == 0 {
            return Vec::new();
        }
        self.split_pieces(text, limit)
    }

    fn split_pieces<'t>(&self, text: &'t str, limit: usize) -> Vec<&'t str> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for m in self.find_iter(text) {
            if spans.len() + 1 >= limit {
                break;
            }
            if !m.is_empty() {
                spans.push((m.start(), m.end()));
            }
        }
        if self.is_reverse() {
            spans.reverse();
        }
        let mut pieces = Vec::with_capacity(spans.len() + 1);
        let mut last = 0;
        for (s, e) in spans {
            pieces.push(&text[last..s]);
            last = e;
        }
        pieces.push(&text[last..]);
        pieces
    }

    // === Substitution ===

    /// Replace the first match with the expanded `template`.
    pub fn replace(&self, text: &str, template: &str) -> Result<String, RegexError> {
        self.replacen(text, 1, template)
    }

    /// Replace every match with the expanded `template`.
    ///
    /// ```
    /// use fuzzex::api::Regex;
    ///
    /// let re = Regex::new(r"(x)?(y)?").unwrap();
    /// assert_eq!(re.replace_all("x", r"\2-\1").unwrap(), "-x-");
    /// ```
    pub fn replace_all(&self, text: &str, template: &str) -> Result<String, RegexError> {
        self.replacen(text, 0, template)
    }

    /// Replace the first `limit` matches (all of them when `limit` is 0).
    pub fn replacen(&self, text: &str, limit: usize, template: &str) -> Result<String, RegexError> {
        let mut err = None;
        let out = self.replace_with(text, limit, |caps| match caps.expand(template) {
            Ok(s) => s,
            Err(e) => {
                err.get_or_insert(e);
                String::new()
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// Replace the first `limit` matches (all when 0) with what `f` returns.
    pub fn replace_with<F>(&self, text: &str, limit: usize, mut f: F) -> String
    where
        F: FnMut(&Captures<'_>) -> String,
    {
        let mut pieces: Vec<(usize, usize, String)> = Vec::new();
        for caps in self.captures_iter(text) {
            if limit != 0 && pieces.len() >= limit {
                break;
            }
            let (s, e) = caps.region.span();
            pieces.push((s, e, f(&caps)));
        }
        if self.is_reverse() {
            pieces.reverse();
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (s, e, rep) in pieces {
            out.push_str(&text[last..s]);
            out.push_str(&rep);
            last = e;
        }
        out.push_str(&text[last..]);
        out
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regex")
            .field("pattern", &self.pattern)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl std::str::FromStr for Regex {
    type Err = RegexError;

    fn from_str(s: &str) -> Result<Regex, RegexError> {
        Regex::new(s)
    }
}

// === RegexBuilder ===

/// Builder for compiling a [`Regex`] with custom options.
///
/// # Examples
///
/// ```
/// use fuzzex::api::Regex;
///
/// let re = Regex::builder(r"hello world")
///     .case_insensitive(true)
///     .build()
///     .unwrap();
/// assert!(re.is_match("Hello World"));
/// ```
pub struct RegexBuilder {
    pattern: String,
    flags: RegexFlags,
    limits: MatchLimits,
    unicode: Arc<dyn UnicodeProvider>,
}

impl RegexBuilder {
    /// Create a new builder for the given pattern.
    pub fn new(pattern: &str) -> Self {
        RegexBuilder {
            pattern: pattern.to_string(),
            flags: RegexFlags::empty(),
            limits: MatchLimits::default(),
            unicode: Arc::new(StdUnicode),
        }
    }

    fn set(mut self, flag: RegexFlags, yes: bool) -> Self {
        self.flags.set(flag, yes);
        self
    }

    /// Replace all flags.
    pub fn flags(mut self, flags: RegexFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Enable or disable case-insensitive matching.
    pub fn case_insensitive(self, yes: bool) -> Self {
        self.set(RegexFlags::IGNORECASE, yes)
    }

    /// Enable or disable `^`/`$` matching at every line boundary.
    pub fn multi_line(self, yes: bool) -> Self {
        self.set(RegexFlags::MULTILINE, yes)
    }

    /// Enable or disable `.` matching `\n`.
    pub fn dot_matches_newline(self, yes: bool) -> Self {
        self.set(RegexFlags::DOTALL, yes)
    }

    /// Enable or disable verbose mode (whitespace and `#` comments ignored).
    pub fn verbose(self, yes: bool) -> Self {
        self.set(RegexFlags::VERBOSE, yes)
    }

    pub fn ascii(self, yes: bool) -> Self {
        self.set(RegexFlags::ASCII, yes)
    }

    pub fn full_case(self, yes: bool) -> Self {
        self.set(RegexFlags::FULLCASE, yes)
    }

    /// Search right to left.
    pub fn reverse(self, yes: bool) -> Self {
        self.set(RegexFlags::REVERSE, yes)
    }

    pub fn fuzzy_policy(self, policy: FuzzyPolicy) -> Self {
        let flags = self.flags - (RegexFlags::BESTMATCH | RegexFlags::ENHANCEMATCH);
        self.flags(match policy {
            FuzzyPolicy::FirstSuccess => flags,
            FuzzyPolicy::Enhance => flags | RegexFlags::ENHANCEMATCH,
            FuzzyPolicy::Best => flags | RegexFlags::BESTMATCH,
        })
    }

    /// Version 1 syntax: nested set operations and positional inline flags.
    pub fn version1(self, yes: bool) -> Self {
        self.set(RegexFlags::VERSION1, yes)
    }

    /// Override the process-wide default match limits for this regex.
    pub fn limits(mut self, limits: MatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Use another source of character properties and case folds.
    pub fn unicode(mut self, provider: Arc<dyn UnicodeProvider>) -> Self {
        self.unicode = provider;
        self
    }

    /// Compile the pattern into a [`Regex`].
    pub fn build(self) -> Result<Regex, RegexError> {
        let graph = parse_with(&self.pattern, self.flags, self.unicode.as_ref())?;
        let program = compile_with(&graph, self.unicode)?;
        Ok(Regex {
            pattern: self.pattern,
            flags: graph.flags(),
            program,
            limits: self.limits,
        })
    }
}

// === Match ===

/// A single match result borrowing the subject text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'t> {
    text: &'t str,
    start: usize,
    end: usize,
}

impl<'t> Match<'t> {
    /// Byte offset of the start of the match.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset of the end of the match (exclusive).
    pub fn end(&self) -> usize {
        self.end
    }

    /// Byte range of the match.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The matched text.
    pub fn as_str(&self) -> &'t str {
        &self.text[self.start..self.end]
    }

    /// Returns the length of the match in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the match is empty (zero-length).
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// === Captures ===

/// All capture groups from a single match.
///
/// Group 0 is the entire match. Groups 1..N correspond to `(...)` in the pattern.
pub struct Captures<'t> {
    text: &'t str,
    region: Region,
    regex: &'t Regex,
}

impl<'t> Captures<'t> {
    fn at(&self, span: (usize, usize)) -> Match<'t> {
        Match {
            text: self.text,
            start: span.0,
            end: span.1,
        }
    }

    fn whole(&self) -> Match<'t> {
        self.at(self.region.span())
    }

    /// Get capture group `i`, or `None` if the group did not participate.
    pub fn get(&self, i: usize) -> Option<Match<'t>> {
        self.region.group(i).map(|span| self.at(span))
    }

    /// Get the capture group with the given name, or `None`.
    pub fn name(&self, name: &str) -> Option<Match<'t>> {
        self.get(self.regex.group_index(name)?)
    }

    /// Every capture of group `i`, oldest first. A group inside a repeat
    /// records one capture per iteration.
    pub fn captures(&self, i: usize) -> Vec<Match<'t>> {
        self.region.captures(i).iter().map(|&span| self.at(span)).collect()
    }

    pub fn captures_name(&self, name: &str) -> Vec<Match<'t>> {
        self.regex
            .group_index(name)
            .map_or_else(Vec::new, |i| self.captures(i))
    }

    /// Number of capture groups (including group 0).
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Returns `true` if there are no capture groups (never the case for a match).
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Index of the group that closed last.
    pub fn last_group(&self) -> Option<usize> {
        self.region.last_group()
    }

    /// Name of the group that closed last, if it has one.
    pub fn last_group_name(&self) -> Option<&'t str> {
        let last = self.region.last_group()?;
        self.regex
            .group_names()
            .find(|&(_, i)| i == last)
            .map(|(n, _)| n)
    }

    /// Substitutions, insertions and deletions of a fuzzy match.
    pub fn fuzzy_counts(&self) -> FuzzyCounts {
        self.region.fuzzy_counts()
    }

    pub fn cost(&self) -> u64 {
        self.region.cost()
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Iterate over all capture groups.
    pub fn iter(&self) -> CapturesIter<'_, 't> {
        CapturesIter {
            captures: self,
            index: 0,
        }
    }

    /// Expand a replacement template against this match.
    ///
    /// `\1`..`\99` and `\g<n>` insert a group by number, `\g<name>` by name;
    /// a group that did not take part expands to nothing. `\n`, `\t`, `\r`,
    /// `\f`, `\v`, `\a`, `\0` and `\\` are character escapes; a backslash
    /// before any other punctuation is kept as written.
    pub fn expand(&self, template: &str) -> Result<String, RegexError> {
        let bad = |offset: usize, message: String| -> RegexError {
            SyntaxError::new(SyntaxErrorKind::BadEscape, message, offset).into()
        };
        let group_count = self.regex.captures_len();
        let mut out = String::with_capacity(template.len());
        let mut chars = template.char_indices().peekable();
        while let Some((at, c)) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some((_, e)) = chars.next() else {
                return Err(bad(at, "template ends with a backslash".to_string()));
            };
            let group = match e {
                'n' => {
                    out.push('\n');
                    continue;
                }
                't' => {
                    out.push('\t');
                    continue;
                }
                'r' => {
                    out.push('\r');
                    continue;
                }
                'f' => {
                    out.push('\x0c');
                    continue;
                }
                'v' => {
                    out.push('\x0b');
                    continue;
                }
                'a' => {
                    out.push('\x07');
                    continue;
                }
                '0' => {
                    out.push('\0');
                    continue;
                }
                '\\' => {
                    out.push('\\');
                    continue;
                }
                '1'..='9' => {
                    let mut n = e as usize - '0' as usize;
                    if let Some(d) = chars.peek().and_then(|&(_, d)| d.to_digit(10)) {
                        if n * 10 + d as usize <= group_count {
                            chars.next();
                            n = n * 10 + d as usize;
                        }
                    }
                    n
                }
                'g' => {
                    if chars.next().map(|(_, c)| c) != Some('<') {
                        return Err(bad(at, "missing < after \\g".to_string()));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '>')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(bad(at, "missing > in group reference".to_string())),
                        }
                    }
                    match name.parse::<usize>() {
                        Ok(n) => n,
                        Err(_) => self
                            .regex
                            .group_index(&name)
                            .ok_or(RegexError::UnknownGroup(name))?,
                    }
                }
                c if c.is_ascii_alphanumeric() => {
                    return Err(bad(at, format!("bad escape \\{} in template", c)));
                }
                c => {
                    out.push('\\');
                    out.push(c);
                    continue;
                }
            };
            if group > group_count {
                return Err(RegexError::UnknownGroup(group.to_string()));
            }
            if let Some(m) = self.get(group) {
                out.push_str(m.as_str());
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for Captures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for i in 0..self.len() {
            list.entry(&self.get(i).map(|m| m.as_str()));
        }
        list.finish()
    }
}

// === CapturesIter ===

/// Iterator over capture groups in a [`Captures`].
pub struct CapturesIter<'c, 't> {
    captures: &'c Captures<'t>,
    index: usize,
}

impl<'c, 't> Iterator for CapturesIter<'c, 't> {
    type Item = Option<Match<'t>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.captures.len() {
            return None;
        }
        let m = self.captures.get(self.index);
        self.index += 1;
        Some(m)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.captures.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CapturesIter<'_, '_> {}

// === Searcher ===

/// Drives repeated searches over one subject.
///
/// After a match the next search starts at its end (forward) or start
/// (reverse). A zero-width match moves the next start one more character on,
/// so iteration always terminates. Overlapped iteration restarts one
/// character past the previous match's scan start instead.
struct Searcher<'r, 't> {
    regex: &'r Regex,
    text: &'t str,
    pos: usize,
    overlapped: bool,
    done: bool,
}

impl<'r, 't> Searcher<'r, 't> {
    fn next_region(&mut self) -> Option<Region> {
        if self.done {
            return None;
        }
        let reverse = self.regex.is_reverse();
        let (start, end) = if reverse {
            (0, self.pos)
        } else {
            (self.pos, self.text.len())
        };
        let regex = self.regex;
        let region = match exec(&regex.program, self.text, start, end, SearchMode::Search, &regex.limits) {
            Ok(Some(region)) => region,
            _ => {
                self.done = true;
                return None;
            }
        };
        let (s, e) = region.span();
        let next = match (reverse, self.overlapped) {
            (false, true) => next_boundary(self.text, s),
            (false, false) if s == e => next_boundary(self.text, e),
            (false, false) => Some(e),
            (true, true) => prev_boundary(self.text, e),
            (true, false) if s == e => prev_boundary(self.text, s),
            (true, false) => Some(s),
        };
        match next {
            Some(p) => self.pos = p,
            None => self.done = true,
        }
        Some(region)
    }
}

fn next_boundary(text: &str, pos: usize) -> Option<usize> {
    text[pos..].chars().next().map(|c| pos + c.len_utf8())
}

fn prev_boundary(text: &str, pos: usize) -> Option<usize> {
    text[..pos].chars().next_back().map(|c| pos - c.len_utf8())
}

// === FindIter ===

/// Iterator over successive matches in a text.
pub struct FindIter<'r, 't>(Searcher<'r, 't>);

impl<'r, 't> Iterator for FindIter<'r, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        let (start, end) = self.0.next_region()?.span();
        Some(Match {
            text: self.0.text,
            start,
            end,
        })
    }
}

/// Iterator over the captures of successive matches.
pub struct CapturesMatches<'r, 't>(Searcher<'r, 't>);

impl<'r: 't, 't> Iterator for CapturesMatches<'r, 't> {
    type Item = Captures<'t>;

    fn next(&mut self) -> Option<Captures<'t>> {
        let region = self.0.next_region()?;
        Some(Captures {
            text: self.0.text,
            region,
            regex: self.0.regex,
        })
    }
}
