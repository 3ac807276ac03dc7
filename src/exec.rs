// exec.rs - Backtracking interpreter and search driver.
//
// Structure: stack types -> state save/restore -> helpers -> `Vm::run`
// (op dispatch) -> `Vm::scan` (start positions) -> `exec` (fuzzy refinement).
//
// The backtrack stack holds choice points and undo records in one sequence.
// Popping a choice point resumes there; popping an undo record restores the
// state it saved. Atomic groups and lookarounds cut choice points but keep
// undo records, so later failures still restore captures correctly.

use std::mem;

use log::{debug, trace};
use memchr::memchr;
use smallvec::SmallVec;

use crate::error::RegexError;
use crate::fuzzy::{Edit, FuzzyCounts};
use crate::graph::{AnchorKind, Case, WordMode};
use crate::options::{FuzzyPolicy, MatchLimits, INIT_MATCH_STACK_SIZE};
use crate::program::{FuzzyId, Label, Op, Program};
use crate::region::{Region, Span};
use crate::unicode::UnicodeProvider;

/// How a search is anchored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Try every start position in the window.
    #[default]
    Search,
    /// Only at the window's initial position (start, or end when reversed).
    Match,
    /// Like `Match`, and the match must cover the whole window.
    FullMatch,
}

// ============================================================================
// Stack Types
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
struct RepeatState {
    count: u32,
    /// Position at the start of the current iteration.
    start: usize,
}

/// Caller state saved by `Call` and put back by `Return`.
#[derive(Debug)]
struct Frame {
    ret: Label,
    caps_len: Vec<usize>,
    open: Vec<Option<usize>>,
    repeats: Vec<RepeatState>,
    last_group: Option<usize>,
}

/// What a `Return` changed, so backtracking into the callee can reinstate it.
#[derive(Debug)]
struct ReturnUndo {
    frame: Frame,
    removed: Vec<(usize, SmallVec<[Span; 2]>)>,
    open: Vec<Option<usize>>,
    repeats: Vec<RepeatState>,
    last_group: Option<usize>,
}

#[derive(Debug)]
enum Entry {
    // --- choice points ---
    Alt { pc: Label, s: usize },
    /// Edits not yet tried at a fuzzy op, starting at `Edit::ORDER[next]`.
    FuzzyAlt { pc: Label, s: usize, next: u8 },
    /// A single-character repeat that can give back (greedy) or take one
    /// more (lazy) character. `count` characters are matched at `s`.
    RepeatAlt { pc: Label, s: usize, count: u32 },

    /// Start of an atomic group or lookaround.
    Mark { id: usize, s: usize },

    // --- undo records ---
    CapPush { group: usize },
    CapOpen { group: usize, prev: Option<usize> },
    LastGroup { prev: Option<usize> },
    Repeat { id: usize, prev: RepeatState },
    Edit { fuzzy: FuzzyId, edit: Edit, cost: u32 },
    FuzzyReset { id: FuzzyId, prev: FuzzyCounts },
    Bref { prev: usize },
    /// A lookaround was entered (`true`) or left (`false`).
    Look { entered: bool },
    Called,
    Returned(Box<ReturnUndo>),
}

impl Entry {
    #[inline]
    fn is_undo(&self) -> bool {
        !matches!(
            self,
            Entry::Alt { .. } | Entry::FuzzyAlt { .. } | Entry::RepeatAlt { .. } | Entry::Mark { .. }
        )
    }
}

/// A resource limit ran out; the search ends without a match.
#[derive(Debug, Clone, Copy)]
struct Exhausted;

// ============================================================================
// Interpreter
// ============================================================================

struct Vm<'p, 't> {
    prog: &'p Program,
    uni: &'p dyn UnicodeProvider,
    text: &'t str,
    /// Leftward reads of the main body stop here.
    lower: usize,
    /// Lookarounds currently entered. Leftward reads inside one may reach
    /// the start of the subject.
    look_depth: u32,
    /// Position `\G` matches.
    search_start: usize,
    mode: SearchMode,
    /// Where a FullMatch must end.
    full_end: usize,
    limits: MatchLimits,
    /// Backtracks in the current attempt.
    retries: u64,
    /// Backtracks over every attempt of the current scan.
    search_retries: u64,
    /// Largest total fuzzy cost a match may have.
    bound: Option<u64>,

    stack: Vec<Entry>,
    caps: Vec<SmallVec<[Span; 2]>>,
    open: Vec<Option<usize>>,
    last_group: Option<usize>,
    repeats: Vec<RepeatState>,
    group_edits: Vec<FuzzyCounts>,
    edits: FuzzyCounts,
    cost: u64,
    /// Cursor inside the captured text of a fuzzy backreference.
    bref: usize,
    frames: Vec<Frame>,
}

impl<'p, 't> Vm<'p, 't> {
    fn new(prog: &'p Program, text: &'t str, mode: SearchMode, limits: MatchLimits) -> Self {
        let groups = prog.group_count + 1;
        Vm {
            prog,
            uni: prog.unicode.as_ref(),
            text,
            lower: 0,
            look_depth: 0,
            search_start: 0,
            mode,
            full_end: text.len(),
            limits,
            retries: 0,
            search_retries: 0,
            bound: None,
            stack: Vec::with_capacity(INIT_MATCH_STACK_SIZE),
            caps: vec![SmallVec::new(); groups],
            open: vec![None; groups],
            last_group: None,
            repeats: vec![RepeatState::default(); prog.repeat_count],
            group_edits: vec![FuzzyCounts::default(); prog.fuzzy.len()],
            edits: FuzzyCounts::default(),
            cost: 0,
            bref: 0,
            frames: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.caps.iter_mut().for_each(|h| h.clear());
        self.open.iter_mut().for_each(|o| *o = None);
        self.last_group = None;
        self.repeats.iter_mut().for_each(|r| *r = RepeatState::default());
        self.group_edits.iter_mut().for_each(|c| *c = FuzzyCounts::default());
        self.edits = FuzzyCounts::default();
        self.cost = 0;
        self.bref = 0;
        self.look_depth = 0;
        self.frames.clear();
    }

    // ------------------------------------------------------------------------
    // Stack operations
    // ------------------------------------------------------------------------

    fn undo(&mut self, entry: Entry) {
        match entry {
            Entry::CapPush { group } => {
                self.caps[group].pop();
            }
            Entry::CapOpen { group, prev } => self.open[group] = prev,
            Entry::LastGroup { prev } => self.last_group = prev,
            Entry::Repeat { id, prev } => self.repeats[id] = prev,
            Entry::Edit { fuzzy, edit, cost } => {
                self.group_edits[fuzzy].remove(edit);
                self.edits.remove(edit);
                self.cost -= cost as u64;
            }
            Entry::FuzzyReset { id, prev } => self.group_edits[id] = prev,
            Entry::Bref { prev } => self.bref = prev,
            Entry::Look { entered: true } => self.look_depth -= 1,
            Entry::Look { entered: false } => self.look_depth += 1,
            Entry::Called => {
                self.frames.pop();
            }
            Entry::Returned(undo) => {
                let ReturnUndo {
                    mut frame,
                    removed,
                    open,
                    repeats,
                    last_group,
                } = *undo;
                for (group, spans) in removed {
                    self.caps[group].extend(spans);
                }
                frame.open = mem::replace(&mut self.open, open);
                frame.repeats = mem::replace(&mut self.repeats, repeats);
                frame.last_group = mem::replace(&mut self.last_group, last_group);
                self.frames.push(frame);
            }
            Entry::Alt { .. } | Entry::FuzzyAlt { .. } | Entry::RepeatAlt { .. } | Entry::Mark { .. } => {}
        }
    }

    fn retry(&mut self) -> Result<(), Exhausted> {
        self.retries += 1;
        self.search_retries += 1;
        if self.limits.retry_limit != 0 && self.retries > self.limits.retry_limit {
            debug!("retry limit {} exceeded in one attempt", self.limits.retry_limit);
            return Err(Exhausted);
        }
        if self.limits.search_retry_limit != 0 && self.search_retries > self.limits.search_retry_limit {
            debug!("retry limit {} exceeded in search", self.limits.search_retry_limit);
            return Err(Exhausted);
        }
        Ok(())
    }

    /// Pop to the newest choice point that can still resume.
    fn backtrack(&mut self) -> Result<Option<(Label, usize)>, Exhausted> {
        while let Some(entry) = self.stack.pop() {
            match entry {
                Entry::Alt { pc, s } => {
                    self.retry()?;
                    return Ok(Some((pc, s)));
                }
                Entry::FuzzyAlt { pc, s, next } => {
                    self.retry()?;
                    if let Some(to) = self.try_edits(pc, s, next as usize) {
                        return Ok(Some(to));
                    }
                }
                Entry::RepeatAlt { pc, s, count } => {
                    self.retry()?;
                    if let Some(to) = self.resume_repeat(pc, s, count) {
                        return Ok(Some(to));
                    }
                }
                Entry::Mark { .. } => {}
                undo => self.undo(undo),
            }
        }
        Ok(None)
    }

    /// Drop every choice point above the newest mark `id`, the mark included.
    /// Undo records stay. Returns the mark's position.
    fn cut_to_mark(&mut self, id: usize) -> Option<usize> {
        let at = self
            .stack
            .iter()
            .rposition(|e| matches!(e, Entry::Mark { id: m, .. } if *m == id))?;
        let s = match self.stack[at] {
            Entry::Mark { s, .. } => s,
            _ => return None,
        };
        let tail = self.stack.split_off(at);
        self.stack.extend(tail.into_iter().filter(Entry::is_undo));
        Some(s)
    }

    fn enter_look(&mut self) {
        self.look_depth += 1;
        self.stack.push(Entry::Look { entered: true });
    }

    fn leave_look(&mut self) {
        self.look_depth -= 1;
        self.stack.push(Entry::Look { entered: false });
    }

    /// Undo everything above the newest mark `id` and remove it.
    fn unwind_to_mark(&mut self, id: usize) {
        while let Some(entry) = self.stack.pop() {
            match entry {
                Entry::Mark { id: m, .. } if m == id => return,
                undo => self.undo(undo),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Subject access
    // ------------------------------------------------------------------------

    #[inline]
    fn floor(&self) -> usize {
        if self.look_depth > 0 {
            0
        } else {
            self.lower
        }
    }

    /// Character at `s` in the given direction, and the position after it.
    #[inline]
    fn read(&self, s: usize, reverse: bool) -> Option<(char, usize)> {
        if reverse {
            let floor = self.floor();
            if s <= floor {
                return None;
            }
            let c = self.text[floor..s].chars().next_back()?;
            Some((c, s - c.len_utf8()))
        } else {
            let c = self.text[s..].chars().next()?;
            Some((c, s + c.len_utf8()))
        }
    }

    #[inline]
    fn prev_char(&self, s: usize) -> Option<char> {
        self.text[..s].chars().next_back()
    }

    #[inline]
    fn next_char(&self, s: usize) -> Option<char> {
        self.text[s..].chars().next()
    }

    fn chars_match(&self, pattern: char, subject: char, case: Case) -> bool {
        match case {
            Case::Sensitive => pattern == subject,
            Case::Ascii | Case::Simple => self.uni.chars_eq_ignore_case(pattern, subject, case.is_ascii()),
            Case::Full => pattern == subject || self.uni.full_fold(pattern) == self.uni.full_fold(subject),
        }
    }

    /// Match `expected` one subject character at a time.
    fn match_chars(
        &self,
        expected: impl Iterator<Item = char>,
        mut s: usize,
        reverse: bool,
        eq: impl Fn(char, char) -> bool,
    ) -> Option<usize> {
        for want in expected {
            let (c, next) = self.read(s, reverse)?;
            if !eq(want, c) {
                return None;
            }
            s = next;
        }
        Some(s)
    }

    /// Match a full-folded sequence against full-folded subject characters.
    /// A subject character's fold must fit entirely inside the sequence.
    fn match_full_fold(&self, folded: &[char], mut s: usize, reverse: bool) -> Option<usize> {
        let n = folded.len();
        let mut done = 0;
        while done < n {
            let (c, next) = self.read(s, reverse)?;
            let f = self.uni.full_fold(c);
            if done + f.len() > n {
                return None;
            }
            let want = if reverse {
                &folded[n - done - f.len()..n - done]
            } else {
                &folded[done..done + f.len()]
            };
            if want != f.as_slice() {
                return None;
            }
            done += f.len();
            s = next;
        }
        Some(s)
    }

    fn match_backref(&self, span: Span, case: Case, s: usize, reverse: bool) -> Option<usize> {
        let captured = &self.text[span.0..span.1];
        match case {
            Case::Sensitive => {
                if reverse {
                    let floor = self.floor();
                    (s >= floor + captured.len() && self.text[floor..s].ends_with(captured))
                        .then(|| s - captured.len())
                } else {
                    self.text[s..].starts_with(captured).then(|| s + captured.len())
                }
            }
            Case::Ascii | Case::Simple => {
                let ascii = case.is_ascii();
                let eq = |a: char, b: char| self.uni.chars_eq_ignore_case(a, b, ascii);
                if reverse {
                    self.match_chars(captured.chars().rev(), s, true, eq)
                } else {
                    self.match_chars(captured.chars(), s, false, eq)
                }
            }
            Case::Full => {
                let folded: Vec<char> = captured.chars().flat_map(|c| self.uni.full_fold(c)).collect();
                self.match_full_fold(&folded, s, reverse)
            }
        }
    }

    /// Next character of the captured text under the backreference cursor.
    fn bref_unit(&self, span: Span, reverse: bool) -> Option<(char, usize)> {
        if reverse {
            if self.bref <= span.0 {
                return None;
            }
            let c = self.text[span.0..self.bref].chars().next_back()?;
            Some((c, self.bref - c.len_utf8()))
        } else {
            if self.bref >= span.1 {
                return None;
            }
            let c = self.text[self.bref..span.1].chars().next()?;
            Some((c, self.bref + c.len_utf8()))
        }
    }

    // ------------------------------------------------------------------------
    // Anchors
    // ------------------------------------------------------------------------

    fn is_word(&self, c: Option<char>, word: WordMode) -> bool {
        c.map_or(false, |c| self.uni.is_word(c, word == WordMode::Ascii))
    }

    /// Is the character before / after `s` part of a word?
    fn word_sides(&self, s: usize, word: WordMode) -> (bool, bool) {
        let prev = self.prev_char(s);
        let next = self.next_char(s);
        let mut before = self.is_word(prev, word);
        let mut after = self.is_word(next, word);
        if word == WordMode::Default {
            // Mid-word punctuation between word characters joins them.
            if before && !after && next.map_or(false, is_mid_word) {
                let beyond = next.and_then(|c| self.next_char(s + c.len_utf8()));
                after = self.is_word(beyond, word);
            } else if after && !before && prev.map_or(false, is_mid_word) {
                let beyond = prev.and_then(|c| self.prev_char(s - c.len_utf8()));
                before = self.is_word(beyond, word);
            }
        }
        (before, after)
    }

    fn anchor(&self, kind: AnchorKind, word: WordMode, s: usize) -> bool {
        let len = self.text.len();
        match kind {
            AnchorKind::StartText => s == 0,
            AnchorKind::StartLine => s == 0 || self.prev_char(s) == Some('\n'),
            AnchorKind::EndText => s == len,
            AnchorKind::EndTextOptionalNewline => {
                s == len || (s + 1 == len && self.text.as_bytes()[s] == b'\n')
            }
            AnchorKind::EndLine => s == len || self.next_char(s) == Some('\n'),
            AnchorKind::WordBoundary => {
                let (b, a) = self.word_sides(s, word);
                b != a
            }
            AnchorKind::NotWordBoundary => {
                let (b, a) = self.word_sides(s, word);
                b == a
            }
            AnchorKind::WordStart => self.word_sides(s, word) == (false, true),
            AnchorKind::WordEnd => self.word_sides(s, word) == (true, false),
            AnchorKind::SearchStart => s == self.search_start,
        }
    }

    // ------------------------------------------------------------------------
    // Fuzzy edits
    // ------------------------------------------------------------------------

    fn edit_allowed(&self, fuzzy: FuzzyId, edit: Edit) -> bool {
        let limits = &self.prog.fuzzy[fuzzy];
        limits.permits(edit)
            && limits.admits(&self.group_edits[fuzzy].with(edit))
            && self
                .bound
                .map_or(true, |b| self.cost + limits.edit_cost(edit) as u64 <= b)
    }

    fn apply_edit(&mut self, fuzzy: FuzzyId, edit: Edit) {
        let cost = self.prog.fuzzy[fuzzy].edit_cost(edit);
        self.stack.push(Entry::Edit { fuzzy, edit, cost });
        self.group_edits[fuzzy].add(edit);
        self.edits.add(edit);
        self.cost += cost as u64;
    }

    /// Try the edits at a fuzzy op starting with `Edit::ORDER[from]`.
    /// On success the remaining edits are left on the stack.
    fn try_edits(&mut self, pc: Label, s: usize, from: usize) -> Option<(Label, usize)> {
        let prog = self.prog;
        let op = &prog.ops[pc];
        let (fuzzy, reverse) = match op {
            Op::Unit {
                fuzzy: Some(f),
                reverse,
                ..
            } => (*f, *reverse),
            Op::BackRefUnit { fuzzy, reverse, .. } => (*fuzzy, *reverse),
            Op::FuzzyEnd { id, reverse } => (*id, *reverse),
            _ => return None,
        };

        for (idx, &edit) in Edit::ORDER.iter().enumerate().skip(from) {
            if !self.edit_allowed(fuzzy, edit) {
                continue;
            }
            // (next pc, next position, new backreference cursor)
            let step: Option<(Label, usize, Option<usize>)> = match op {
                Op::Unit { .. } => match edit {
                    Edit::Substitute => self.read(s, reverse).map(|(_, t)| (pc + 1, t, None)),
                    Edit::Delete => Some((pc + 1, s, None)),
                    Edit::Insert => self.read(s, reverse).map(|(_, t)| (pc, t, None)),
                },
                Op::BackRefUnit { group, .. } => {
                    let unit = self.caps[*group]
                        .last()
                        .and_then(|&span| self.bref_unit(span, reverse));
                    match (edit, unit) {
                        (_, None) => None,
                        (Edit::Substitute, Some((_, nb))) => {
                            self.read(s, reverse).map(|(_, t)| (pc, t, Some(nb)))
                        }
                        (Edit::Delete, Some((_, nb))) => Some((pc, s, Some(nb))),
                        (Edit::Insert, Some(_)) => self.read(s, reverse).map(|(_, t)| (pc, t, None)),
                    }
                }
                _ => match edit {
                    Edit::Insert => self.read(s, reverse).map(|(_, t)| (pc, t, None)),
                    _ => None,
                },
            };
            let Some((to, t, bref)) = step else {
                continue;
            };
            if idx + 1 < Edit::ORDER.len() {
                self.stack.push(Entry::FuzzyAlt {
                    pc,
                    s,
                    next: (idx + 1) as u8,
                });
            }
            self.apply_edit(fuzzy, edit);
            if let Some(nb) = bref {
                self.stack.push(Entry::Bref { prev: self.bref });
                self.bref = nb;
            }
            trace!("fuzzy {:?} at op {} pos {} (cost {})", edit, pc, s, self.cost);
            return Some((to, t));
        }
        None
    }

    // ------------------------------------------------------------------------
    // Single-character repeats
    // ------------------------------------------------------------------------

    fn resume_repeat(&mut self, pc: Label, s: usize, count: u32) -> Option<(Label, usize)> {
        let prog = self.prog;
        let Op::UnitRepeat {
            m,
            min,
            max,
            greedy,
            reverse,
        } = &prog.ops[pc]
        else {
            return None;
        };
        if *greedy {
            // Give back one character.
            let (_, t) = self.read(s, !*reverse)?;
            let count = count - 1;
            if count > *min {
                self.stack.push(Entry::RepeatAlt { pc, s: t, count });
            }
            Some((pc + 1, t))
        } else {
            // Take one more.
            let (c, t) = self.read(s, *reverse)?;
            if !m.matches(c, self.uni) {
                return None;
            }
            let count = count + 1;
            if max.map_or(true, |mx| count < mx) {
                self.stack.push(Entry::RepeatAlt { pc, s: t, count });
            }
            Some((pc + 1, t))
        }
    }

    // ------------------------------------------------------------------------
    // Main dispatch loop
    // ------------------------------------------------------------------------

    /// Run the program from `origin`. `Ok(None)` means no match there.
    fn run(&mut self, origin: usize) -> Result<Option<Region>, Exhausted> {
        let prog = self.prog;
        let reverse_prog = prog.direction.is_reverse();
        let stack_limit = self.limits.stack_limit as usize;
        let mut pc = prog.entry;
        let mut s = origin;

        self.reset();
        self.retries = 0;

        loop {
            if stack_limit != 0 && self.stack.len() > stack_limit {
                debug!("match stack limit {} exceeded", stack_limit);
                return Err(Exhausted);
            }

            let mut goto_fail = false;

            match &prog.ops[pc] {
                // ================================================================
                // Control flow
                // ================================================================
                Op::End => {
                    if self.mode == SearchMode::FullMatch && s != self.full_end {
                        goto_fail = true;
                    } else {
                        let span = if reverse_prog { (s, origin) } else { (origin, s) };
                        return Ok(Some(Region::new(
                            span,
                            self.caps.clone(),
                            self.last_group,
                            self.edits,
                            self.cost,
                        )));
                    }
                }

                Op::Fail => goto_fail = true,

                Op::Jump(to) => pc = *to,

                Op::Push(alt) => {
                    self.stack.push(Entry::Alt { pc: *alt, s });
                    pc += 1;
                }

                // ================================================================
                // Characters
                // ================================================================
                Op::Str { text, reverse } => {
                    let eq = |a: char, b: char| a == b;
                    let hit = if *reverse {
                        self.match_chars(text.iter().rev().copied(), s, true, eq)
                    } else {
                        self.match_chars(text.iter().copied(), s, false, eq)
                    };
                    match hit {
                        Some(t) => {
                            s = t;
                            pc += 1;
                        }
                        None => goto_fail = true,
                    }
                }

                Op::StrFold {
                    folded,
                    ascii,
                    reverse,
                } => {
                    let eq = |want: char, c: char| self.uni.fold(c, *ascii) == want;
                    let hit = if *reverse {
                        self.match_chars(folded.iter().rev().copied(), s, true, eq)
                    } else {
                        self.match_chars(folded.iter().copied(), s, false, eq)
                    };
                    match hit {
                        Some(t) => {
                            s = t;
                            pc += 1;
                        }
                        None => goto_fail = true,
                    }
                }

                Op::StrFull { folded, reverse } => match self.match_full_fold(folded, s, *reverse) {
                    Some(t) => {
                        s = t;
                        pc += 1;
                    }
                    None => goto_fail = true,
                },

                Op::Unit { m, reverse, fuzzy } => match self.read(s, *reverse) {
                    Some((c, t)) if m.matches(c, self.uni) => {
                        if fuzzy.is_some() {
                            // Exact first; deletion and insertion stay available.
                            self.stack.push(Entry::FuzzyAlt { pc, s, next: 1 });
                        }
                        s = t;
                        pc += 1;
                    }
                    _ => match fuzzy.and_then(|_| self.try_edits(pc, s, 0)) {
                        Some((p, t)) => {
                            pc = p;
                            s = t;
                        }
                        None => goto_fail = true,
                    },
                },

                Op::UnitRepeat {
                    m,
                    min,
                    max,
                    greedy,
                    reverse,
                } => {
                    let mut count = 0u32;
                    let mut t = s;
                    let limit = if *greedy { *max } else { Some(*min) };
                    while limit.map_or(true, |l| count < l) {
                        match self.read(t, *reverse) {
                            Some((c, next)) if m.matches(c, self.uni) => {
                                t = next;
                                count += 1;
                            }
                            _ => break,
                        }
                    }
                    if count < *min {
                        goto_fail = true;
                    } else {
                        let more = if *greedy {
                            count > *min
                        } else {
                            max.map_or(true, |mx| count < mx)
                        };
                        if more {
                            self.stack.push(Entry::RepeatAlt { pc, s: t, count });
                        }
                        s = t;
                        pc += 1;
                    }
                }

                // ================================================================
                // Assertions
                // ================================================================
                Op::Anchor { kind, word } => {
                    if self.anchor(*kind, *word, s) {
                        pc += 1;
                    } else {
                        goto_fail = true;
                    }
                }

                Op::StepBack { n } => {
                    let mut t = s;
                    for _ in 0..*n {
                        match self.read(t, true) {
                            Some((_, prev)) => t = prev,
                            None => {
                                goto_fail = true;
                                break;
                            }
                        }
                    }
                    if !goto_fail {
                        s = t;
                        pc += 1;
                    }
                }

                // ================================================================
                // Captures
                // ================================================================
                Op::MemOpen { group } => {
                    self.stack.push(Entry::CapOpen {
                        group: *group,
                        prev: self.open[*group],
                    });
                    self.open[*group] = Some(s);
                    pc += 1;
                }

                Op::MemClose { group } => {
                    let from = self.open[*group].unwrap_or(s);
                    self.stack.push(Entry::CapPush { group: *group });
                    self.caps[*group].push((from.min(s), from.max(s)));
                    self.stack.push(Entry::LastGroup {
                        prev: self.last_group,
                    });
                    self.last_group = Some(*group);
                    pc += 1;
                }

                Op::BackRef {
                    group,
                    case,
                    reverse,
                } => match self.caps[*group].last().copied() {
                    // An unset group matches the empty string.
                    None => pc += 1,
                    Some(span) => match self.match_backref(span, *case, s, *reverse) {
                        Some(t) => {
                            s = t;
                            pc += 1;
                        }
                        None => goto_fail = true,
                    },
                },

                Op::BackRefStart { group, reverse } => {
                    let cursor = match self.caps[*group].last() {
                        Some(&(a, b)) => {
                            if *reverse {
                                b
                            } else {
                                a
                            }
                        }
                        None => 0,
                    };
                    self.stack.push(Entry::Bref { prev: self.bref });
                    self.bref = cursor;
                    pc += 1;
                }

                Op::BackRefUnit {
                    group,
                    case,
                    reverse,
                    ..
                } => {
                    let unit = self.caps[*group]
                        .last()
                        .and_then(|&span| self.bref_unit(span, *reverse));
                    match unit {
                        None => pc += 1,
                        Some((want, nb)) => match self.read(s, *reverse) {
                            Some((c, t)) if self.chars_match(want, c, *case) => {
                                self.stack.push(Entry::FuzzyAlt { pc, s, next: 1 });
                                self.stack.push(Entry::Bref { prev: self.bref });
                                self.bref = nb;
                                s = t;
                            }
                            _ => match self.try_edits(pc, s, 0) {
                                Some((p, t)) => {
                                    pc = p;
                                    s = t;
                                }
                                None => goto_fail = true,
                            },
                        },
                    }
                }

                Op::CondGroup { group, no } => {
                    if self.caps[*group].is_empty() {
                        pc = *no;
                    } else {
                        pc += 1;
                    }
                }

                // ================================================================
                // Counted repeats
                // ================================================================
                Op::RepeatInit {
                    id,
                    min,
                    greedy,
                    exit,
                    ..
                } => {
                    self.stack.push(Entry::Repeat {
                        id: *id,
                        prev: self.repeats[*id],
                    });
                    self.repeats[*id] = RepeatState { count: 0, start: s };
                    if *min > 0 {
                        pc += 1;
                    } else if *greedy {
                        self.stack.push(Entry::Alt { pc: *exit, s });
                        pc += 1;
                    } else {
                        self.stack.push(Entry::Alt { pc: pc + 1, s });
                        pc = *exit;
                    }
                }

                Op::RepeatNext {
                    id,
                    min,
                    max,
                    greedy,
                    body,
                } => {
                    let state = self.repeats[*id];
                    let count = state.count + 1;
                    self.stack.push(Entry::Repeat {
                        id: *id,
                        prev: state,
                    });
                    self.repeats[*id] = RepeatState { count, start: s };
                    if count < *min {
                        pc = *body;
                    } else if s == state.start || max.map_or(false, |mx| count >= mx) {
                        // An empty iteration or the last allowed one.
                        pc += 1;
                    } else if *greedy {
                        self.stack.push(Entry::Alt { pc: pc + 1, s });
                        pc = *body;
                    } else {
                        self.stack.push(Entry::Alt { pc: *body, s });
                        pc += 1;
                    }
                }

                // ================================================================
                // Atomic groups and lookaround
                // ================================================================
                Op::AtomicStart { mark } => {
                    self.stack.push(Entry::Mark { id: *mark, s });
                    pc += 1;
                }

                Op::LookStart { mark } => {
                    self.stack.push(Entry::Mark { id: *mark, s });
                    self.enter_look();
                    pc += 1;
                }

                Op::AtomicEnd { mark } => {
                    self.cut_to_mark(*mark);
                    pc += 1;
                }

                Op::LookEnd { mark } => {
                    match self.cut_to_mark(*mark) {
                        Some(at) => {
                            s = at;
                            self.leave_look();
                        }
                        None => goto_fail = true,
                    }
                    pc += 1;
                }

                Op::NegLookStart { mark, next } => {
                    self.stack.push(Entry::Alt { pc: *next, s });
                    self.stack.push(Entry::Mark { id: *mark, s });
                    self.enter_look();
                    pc += 1;
                }

                Op::NegLookFail { mark } => {
                    self.unwind_to_mark(*mark);
                    // The choice point that would have skipped the body.
                    self.stack.pop();
                    goto_fail = true;
                }

                // ================================================================
                // Subroutine calls
                // ================================================================
                Op::Call { target, .. } => {
                    let depth_limit = self.limits.recursion_limit as usize;
                    if depth_limit != 0 && self.frames.len() >= depth_limit {
                        debug!("recursion limit {} reached at pos {}", depth_limit, s);
                        goto_fail = true;
                    } else {
                        self.frames.push(Frame {
                            ret: pc + 1,
                            caps_len: self.caps.iter().map(|h| h.len()).collect(),
                            open: self.open.clone(),
                            repeats: self.repeats.clone(),
                            last_group: self.last_group,
                        });
                        self.stack.push(Entry::Called);
                        pc = *target;
                    }
                }

                Op::Return => match self.frames.pop() {
                    None => goto_fail = true,
                    Some(mut frame) => {
                        // Captures made inside the call are not visible outside.
                        let mut removed = Vec::new();
                        for (group, &keep) in frame.caps_len.iter().enumerate() {
                            if self.caps[group].len() > keep {
                                removed.push((group, self.caps[group].drain(keep..).collect()));
                            }
                        }
                        let open = mem::replace(&mut self.open, mem::take(&mut frame.open));
                        let repeats = mem::replace(&mut self.repeats, mem::take(&mut frame.repeats));
                        let last_group = mem::replace(&mut self.last_group, frame.last_group);
                        pc = frame.ret;
                        self.stack.push(Entry::Returned(Box::new(ReturnUndo {
                            frame,
                            removed,
                            open,
                            repeats,
                            last_group,
                        })));
                    }
                },

                // ================================================================
                // Fuzzy groups
                // ================================================================
                Op::FuzzyStart { id } => {
                    self.stack.push(Entry::FuzzyReset {
                        id: *id,
                        prev: self.group_edits[*id],
                    });
                    self.group_edits[*id] = FuzzyCounts::default();
                    pc += 1;
                }

                Op::FuzzyEnd { id, reverse } => {
                    // Trailing insertions are tried only if what follows fails.
                    if self.read(s, *reverse).is_some() && self.edit_allowed(*id, Edit::Insert) {
                        self.stack.push(Entry::FuzzyAlt { pc, s, next: 2 });
                    }
                    pc += 1;
                }
            }

            if goto_fail {
                match self.backtrack()? {
                    Some((p, t)) => {
                        pc = p;
                        s = t;
                    }
                    None => return Ok(None),
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Start positions
    // ------------------------------------------------------------------------

    /// Leftmost (or rightmost, when reversed) match in `[lo, hi]`.
    fn scan(&mut self, lo: usize, hi: usize, bound: Option<u64>) -> Option<Region> {
        let prog = self.prog;
        let reverse = prog.direction.is_reverse();
        self.bound = bound;
        self.search_retries = 0;
        self.lower = if reverse { lo } else { 0 };
        self.search_start = if reverse { hi } else { lo };
        self.full_end = if reverse { lo } else { hi };
        let searching = self.mode == SearchMode::Search;

        let mut pos = self.search_start;
        loop {
            if !reverse {
                if prog.anchored_start && pos != 0 {
                    return None;
                }
                if let (Some(b), true) = (prog.first_byte, searching) {
                    pos += memchr(b, &self.text.as_bytes()[pos..hi])?;
                }
            }

            match self.run(pos) {
                Ok(Some(region)) => return Some(region),
                Ok(None) => {}
                Err(Exhausted) => return None,
            }

            if !searching {
                return None;
            }
            if reverse {
                if pos <= lo {
                    return None;
                }
                pos -= self.prev_char(pos).map_or(1, char::len_utf8);
            } else {
                if pos >= hi {
                    return None;
                }
                pos += self.next_char(pos).map_or(1, char::len_utf8);
            }
        }
    }
}

fn is_mid_word(c: char) -> bool {
    matches!(c, '\'' | '.' | ':' | '\u{2019}' | '\u{00B7}')
}

// ============================================================================
// Entry points
// ============================================================================

fn check_window(text: &str, start: usize, end: usize) -> Result<(), RegexError> {
    if start > end || end > text.len() {
        return Err(RegexError::invalid_argument(format!(
            "search window {}..{} is outside a subject of {} bytes",
            start,
            end,
            text.len()
        )));
    }
    if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
        return Err(RegexError::invalid_argument(format!(
            "search window {}..{} does not fall on character boundaries",
            start, end
        )));
    }
    Ok(())
}

/// Search `text[start..end]` for the first match in scan order.
pub fn search(
    prog: &Program,
    text: &str,
    start: usize,
    end: usize,
    limits: &MatchLimits,
) -> Result<Option<Region>, RegexError> {
    exec(prog, text, start, end, SearchMode::Search, limits)
}

/// Run `prog` over the window `[start, end]` of `text`.
///
/// Text after `end` is invisible to the match; text before `start` is visible
/// to lookbehind in either direction. With a fuzzy policy other than
/// first-success, the first match is refined by searching again with a lower
/// cost bound until no cheaper match exists.
pub fn exec(
    prog: &Program,
    text: &str,
    start: usize,
    end: usize,
    mode: SearchMode,
    limits: &MatchLimits,
) -> Result<Option<Region>, RegexError> {
    check_window(text, start, end)?;

    let mut vm = Vm::new(prog, &text[..end], mode, *limits);
    let Some(mut best) = vm.scan(start, end, None) else {
        return Ok(None);
    };

    if prog.is_fuzzy() && prog.policy != FuzzyPolicy::FirstSuccess {
        while best.cost() > 0 {
            let (lo, hi) = match prog.policy {
                FuzzyPolicy::Enhance => best.span(),
                _ => (start, end),
            };
            trace!(
                "refining fuzzy match {:?} (cost {}) within {}..{}",
                best.span(),
                best.cost(),
                lo,
                hi
            );
            vm.text = &text[..hi];
            match vm.scan(lo, hi, Some(best.cost() - 1)) {
                Some(better) => best = better,
                None => break,
            }
        }
    }
    Ok(Some(best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::fuzzy::FuzzyLimits;
    use crate::graph::{CharSet, GraphBuilder, LookKind, Node, PatternGraph, PerlClass, RepeatKind};
    use crate::options::RegexFlags;

    fn find(graph: &PatternGraph, text: &str) -> Option<Span> {
        let prog = compile(graph).unwrap();
        search(&prog, text, 0, text.len(), &MatchLimits::default())
            .unwrap()
            .map(|r| r.span())
    }

    #[test]
    fn literal_search() {
        let mut b = GraphBuilder::new();
        let root = b.literal("abc");
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "xxabcabc"), Some((2, 5)));
        assert_eq!(find(&g, "ab"), None);
        assert_eq!(find(&g, "ééabc"), Some((4, 7)));
    }

    #[test]
    fn alternation_is_ordered() {
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let ab = b.literal("ab");
        let root = b.alternation(vec![a, ab]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "ab"), Some((0, 1)));
    }

    #[test]
    fn greedy_and_lazy() {
        let mut b = GraphBuilder::new();
        let a = b.class(CharSet::Perl {
            class: PerlClass::Word,
            ascii: false,
        });
        let star = b.repeat(a, 0, None, RepeatKind::Lazy);
        let x = b.literal("x");
        let root = b.sequence(vec![star, x]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "abxcx"), Some((0, 3)));

        let mut b = GraphBuilder::new();
        let a = b.class(CharSet::Perl {
            class: PerlClass::Word,
            ascii: false,
        });
        let star = b.repeat(a, 0, None, RepeatKind::Greedy);
        let x = b.literal("x");
        let root = b.sequence(vec![star, x]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "abxcx"), Some((0, 5)));
    }

    #[test]
    fn possessive_does_not_give_back() {
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let star = b.repeat(a, 0, None, RepeatKind::Possessive);
        let a2 = b.literal("a");
        let root = b.sequence(vec![star, a2]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "aaa"), None);
    }

    #[test]
    fn counted_group_repeat_with_captures() {
        let mut b = GraphBuilder::new();
        let ab = b.literal("ab");
        let cap = b.capture(1, ab);
        let root = b.repeat(cap, 2, Some(3), RepeatKind::Greedy);
        let g = b.finish(root).unwrap();
        let prog = compile(&g).unwrap();
        let r = search(&prog, "xabababab", 0, 9, &MatchLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(r.span(), (1, 7));
        assert_eq!(r.group(1), Some((5, 7)));
        assert_eq!(r.captures(1), &[(1, 3), (3, 5), (5, 7)]);
    }

    #[test]
    fn negative_lookahead_restores_captures() {
        // (?!(a)b)(a)
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let c1 = b.capture(1, a);
        let bb = b.literal("b");
        let body = b.sequence(vec![c1, bb]);
        let look = b.add(Node::Assertion {
            kind: LookKind::NotAhead,
            child: body,
        });
        let a2 = b.literal("a");
        let c2 = b.capture(2, a2);
        let root = b.sequence(vec![look, c2]);
        let g = b.finish(root).unwrap();
        let prog = compile(&g).unwrap();
        let r = search(&prog, "abac", 0, 4, &MatchLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(r.span(), (2, 3));
        assert_eq!(r.group(1), None);
        assert_eq!(r.group(2), Some((2, 3)));
    }

    #[test]
    fn variable_lookbehind() {
        // (?<=a+)b
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let plus = b.repeat(a, 1, None, RepeatKind::Greedy);
        let look = b.add(Node::Assertion {
            kind: LookKind::Behind,
            child: plus,
        });
        let bb = b.literal("b");
        let root = b.sequence(vec![look, bb]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "cbaab"), Some((4, 5)));
    }

    #[test]
    fn backreference_to_unset_group_is_empty() {
        // (x)?\1y
        let mut b = GraphBuilder::new();
        let x = b.literal("x");
        let cap = b.capture(1, x);
        let opt = b.repeat(cap, 0, Some(1), RepeatKind::Greedy);
        let br = b.add(Node::Backreference {
            group: 1,
            case: Case::Sensitive,
        });
        let y = b.literal("y");
        let root = b.sequence(vec![opt, br, y]);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "y"), Some((0, 1)));
        assert_eq!(find(&g, "xxy"), Some((0, 3)));
    }

    #[test]
    fn reverse_program_scans_from_the_end() {
        let mut b = GraphBuilder::with_flags(RegexFlags::REVERSE);
        let root = b.literal("ab");
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "abxab"), Some((3, 5)));
    }

    #[test]
    fn fuzzy_first_success_and_best() {
        let mut b = GraphBuilder::new();
        let lit = b.literal("foobar");
        let fz = b.add(Node::Fuzzy {
            child: lit,
            limits: FuzzyLimits::unlimited(),
        });
        let root = b.capture(1, fz);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "xirefoabralfobarxie"), Some((0, 6)));

        let mut b = GraphBuilder::with_flags(RegexFlags::BESTMATCH);
        let lit = b.literal("foobar");
        let fz = b.add(Node::Fuzzy {
            child: lit,
            limits: FuzzyLimits::unlimited(),
        });
        let root = b.capture(1, fz);
        let g = b.finish(root).unwrap();
        assert_eq!(find(&g, "xirefoabralfobarxie"), Some((11, 16)));
    }

    #[test]
    fn retry_limit_ends_in_no_match() {
        // (a*)*b against many a's
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let star = b.repeat(a, 0, None, RepeatKind::Greedy);
        let cap = b.capture(1, star);
        let outer = b.repeat(cap, 0, None, RepeatKind::Greedy);
        let bb = b.literal("b");
        let root = b.sequence(vec![outer, bb]);
        let g = b.finish(root).unwrap();
        let prog = compile(&g).unwrap();
        let limits = MatchLimits {
            retry_limit: 1_000,
            ..MatchLimits::default()
        };
        let text = "a".repeat(40);
        assert_eq!(search(&prog, &text, 0, text.len(), &limits).unwrap(), None);
    }

    #[test]
    fn retry_limit_counts_each_start_separately() {
        // a+c: every failing start gives back its run of a's one at a time.
        let mut b = GraphBuilder::new();
        let a = b.literal("a");
        let plus = b.repeat(a, 1, None, RepeatKind::Greedy);
        let c = b.literal("c");
        let root = b.sequence(vec![plus, c]);
        let prog = compile(&b.finish(root).unwrap()).unwrap();
        let text = format!("{}b ac", "a".repeat(200));

        let per_attempt = MatchLimits {
            retry_limit: 1_000,
            ..MatchLimits::default()
        };
        let found = search(&prog, &text, 0, text.len(), &per_attempt).unwrap();
        assert_eq!(found.map(|r| r.span()), Some((202, 204)));

        let per_search = MatchLimits {
            search_retry_limit: 1_000,
            ..MatchLimits::default()
        };
        assert_eq!(search(&prog, &text, 0, text.len(), &per_search).unwrap(), None);
    }

    #[test]
    fn reverse_lookbehind_reads_before_the_window() {
        let mut b = GraphBuilder::with_flags(RegexFlags::REVERSE);
        let a = b.literal("a");
        let behind = b.add(Node::Assertion {
            kind: LookKind::Behind,
            child: a,
        });
        let bb = b.literal("b");
        let root = b.sequence(vec![behind, bb]);
        let prog = compile(&b.finish(root).unwrap()).unwrap();
        let limits = MatchLimits::default();
        let found = search(&prog, "ab", 1, 2, &limits).unwrap();
        assert_eq!(found.map(|r| r.span()), Some((1, 2)));
        let found = search(&prog, "aab", 2, 3, &limits).unwrap();
        assert_eq!(found.map(|r| r.span()), Some((2, 3)));

        // The body itself still stops at the window's start.
        let mut b = GraphBuilder::with_flags(RegexFlags::REVERSE);
        let root = b.literal("ab");
        let prog = compile(&b.finish(root).unwrap()).unwrap();
        assert_eq!(search(&prog, "ab", 1, 2, &limits).unwrap(), None);
    }

    #[test]
    fn window_is_validated() {
        let mut b = GraphBuilder::new();
        let root = b.literal("a");
        let prog = compile(&b.finish(root).unwrap()).unwrap();
        let limits = MatchLimits::default();
        assert!(search(&prog, "abc", 2, 1, &limits).is_err());
        assert!(search(&prog, "abc", 0, 9, &limits).is_err());
        assert!(search(&prog, "é", 1, 2, &limits).is_err());
        assert_eq!(
            search(&prog, "bca", 0, 2, &limits).unwrap().map(|r| r.span()),
            None
        );
    }

    #[test]
    fn mid_word_punctuation_joins_words() {
        let mut b = GraphBuilder::new();
        let root = b.add(Node::Anchor {
            kind: AnchorKind::WordBoundary,
            word: WordMode::Default,
        });
        let g = b.finish(root).unwrap();
        let prog = compile(&g).unwrap();
        let limits = MatchLimits::default();
        let hits: Vec<usize> = (0..="can't".len())
            .filter(|&i| {
                exec(&prog, "can't", i, 5, SearchMode::Match, &limits)
                    .unwrap()
                    .is_some()
            })
            .collect();
        assert_eq!(hits, vec![0, 5]);
    }
}
