// syntax.rs - Pattern text front end: parse a pattern into a PatternGraph.
//
// Parsing runs in two steps. The text is first read into a small syntax tree,
// because group names may be referenced before they are defined; the tree is
// then lowered into a `GraphBuilder`. In version 0 an inline `(?i)` anywhere
// in the pattern turns the flag on for the whole pattern, so a pass that meets
// one is followed by a second pass with the flag set from the start.

use std::collections::BTreeSet;
use std::mem;

use log::trace;

use crate::error::{RegexError, SyntaxError, SyntaxErrorKind};
use crate::fuzzy::FuzzyLimits;
use crate::graph::{
    AnchorKind, Case, CharSet, GraphBuilder, LookKind, Node, NodeId, PatternGraph, PerlClass,
    RepeatKind, WordMode,
};
use crate::options::RegexFlags;
use crate::unicode::{Property, StdUnicode, UnicodeProvider};

const MAX_PASSES: usize = 3;

/// Parse `pattern` with the default Unicode provider.
pub fn parse(pattern: &str, flags: RegexFlags) -> Result<PatternGraph, RegexError> {
    parse_with(pattern, flags, &StdUnicode)
}

/// Parse `pattern`, resolving `\p{..}` and POSIX class names with `uni`.
pub fn parse_with(
    pattern: &str,
    flags: RegexFlags,
    uni: &dyn UnicodeProvider,
) -> Result<PatternGraph, RegexError> {
    let mut flags = flags;
    let mut passes = 0;
    loop {
        let mut parser = Parser::new(pattern, flags, uni);
        let ast = parser.parse()?;
        passes += 1;
        let wanted = (flags | parser.global_on) & !parser.global_off;
        if wanted == flags || passes >= MAX_PASSES {
            return parser.lower(ast, flags);
        }
        trace!("reparsing {:?} with global flags {:?}", pattern, wanted);
        flags = wanted;
    }
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum GroupRef {
    Number(usize),
    Name(String),
}

#[derive(Debug)]
enum Ast {
    Empty,
    Char { c: char, case: Case },
    Any { dotall: bool },
    Class { set: CharSet, negate: bool, case: Case },
    Concat(Vec<Ast>),
    Alt(Vec<Ast>),
    Repeat { child: Box<Ast>, min: u32, max: Option<u32>, kind: RepeatKind },
    Group { index: Option<usize>, child: Box<Ast>, atomic: bool },
    BranchReset(Vec<Ast>),
    Backref { group: GroupRef, case: Case },
    Look { kind: LookKind, child: Box<Ast> },
    Cond { group: GroupRef, yes: Box<Ast>, no: Option<Box<Ast>> },
    /// Number 0 is the whole pattern.
    Call(GroupRef),
    Fuzzy { child: Box<Ast>, limits: FuzzyLimits },
    Anchor { kind: AnchorKind, word: WordMode },
}

/// Result of a backslash escape.
enum Escape {
    Char(char),
    Set(CharSet),
    Anchor(AnchorKind),
    Backref(GroupRef),
}

/// What a `{...}` after an item turned out to be.
enum Brace {
    Repeat { min: u32, max: Option<u32>, end: usize },
    Fuzzy { limits: FuzzyLimits, end: usize },
    Literal,
}

/// Group numbering inside a `(?|...)`.
struct ResetScope {
    base: usize,
    /// Numbers used by the current branch.
    used: BTreeSet<usize>,
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    pattern: &'a str,
    pos: usize,
    flags: RegexFlags,
    global_on: RegexFlags,
    global_off: RegexFlags,
    uni: &'a dyn UnicodeProvider,
    group_count: usize,
    names: Vec<(String, usize)>,
    resets: Vec<ResetScope>,
}

impl<'a> Parser<'a> {
    fn new(pattern: &'a str, flags: RegexFlags, uni: &'a dyn UnicodeProvider) -> Self {
        Parser {
            pattern,
            pos: 0,
            flags,
            global_on: RegexFlags::empty(),
            global_off: RegexFlags::empty(),
            uni,
            group_count: 0,
            names: Vec::new(),
            resets: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------------

    fn rest(&self) -> &'a str {
        &self.pattern[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn error_at(&self, offset: usize, kind: SyntaxErrorKind, message: impl Into<String>) -> RegexError {
        SyntaxError::new(kind, message, offset).into()
    }

    fn error(&self, kind: SyntaxErrorKind, message: impl Into<String>) -> RegexError {
        self.error_at(self.pos, kind, message)
    }

    /// Skip whitespace and `#` comments in verbose mode.
    fn skip_ignored(&mut self) {
        if !self.flags.contains(RegexFlags::VERBOSE) {
            return;
        }
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Flag-derived settings
    // ------------------------------------------------------------------------

    fn case(&self) -> Case {
        Case::from_flags(self.flags)
    }

    fn ascii(&self) -> bool {
        self.flags.contains(RegexFlags::ASCII)
    }

    fn word_mode(&self) -> WordMode {
        WordMode::from_flags(self.flags)
    }

    fn is_v1(&self) -> bool {
        self.flags.contains(RegexFlags::VERSION1)
    }

    // ------------------------------------------------------------------------
    // Alternation and sequences
    // ------------------------------------------------------------------------

    fn parse(&mut self) -> Result<Ast, RegexError> {
        let ast = self.parse_alternation()?;
        if self.pos < self.pattern.len() {
            return Err(self.error(SyntaxErrorKind::UnbalancedParenthesis, "unbalanced parenthesis"));
        }
        Ok(ast)
    }

    fn parse_alternation(&mut self) -> Result<Ast, RegexError> {
        let mut branches = self.parse_branches(false)?;
        Ok(if branches.len() == 1 {
            branches.pop().unwrap_or(Ast::Empty)
        } else {
            Ast::Alt(branches)
        })
    }

    /// Branches up to the closing `)` or the end. In a branch reset every
    /// branch starts numbering afresh.
    fn parse_branches(&mut self, reset: bool) -> Result<Vec<Ast>, RegexError> {
        let mut branches = vec![self.parse_sequence()?];
        while self.eat('|') {
            if reset {
                if let Some(scope) = self.resets.last_mut() {
                    scope.used.clear();
                }
            }
            branches.push(self.parse_sequence()?);
        }
        Ok(branches)
    }

    fn parse_sequence(&mut self) -> Result<Ast, RegexError> {
        let mut items = Vec::new();
        loop {
            self.skip_ignored();
            if matches!(self.peek(), None | Some('|') | Some(')')) {
                break;
            }
            let Some(atom) = self.parse_atom()? else {
                continue;
            };
            items.push(self.parse_quantifiers(atom)?);
        }
        Ok(match items.len() {
            0 => Ast::Empty,
            1 => items.pop().unwrap_or(Ast::Empty),
            _ => Ast::Concat(items),
        })
    }

    fn parse_atom(&mut self) -> Result<Option<Ast>, RegexError> {
        let at = self.pos;
        let Some(c) = self.bump() else {
            return Ok(None);
        };
        let ast = match c {
            '(' => return self.parse_group(at),
            '[' => self.parse_class(at)?,
            '.' => Ast::Any {
                dotall: self.flags.contains(RegexFlags::DOTALL),
            },
            '^' => self.anchor(if self.flags.contains(RegexFlags::MULTILINE) {
                AnchorKind::StartLine
            } else {
                AnchorKind::StartText
            }),
            '$' => self.anchor(if self.flags.contains(RegexFlags::MULTILINE) {
                AnchorKind::EndLine
            } else {
                AnchorKind::EndTextOptionalNewline
            }),
            '\\' => match self.parse_escape(at, false)? {
                Escape::Char(c) => self.char_ast(c),
                Escape::Set(set) => Ast::Class {
                    set,
                    negate: false,
                    case: self.case(),
                },
                Escape::Anchor(kind) => self.anchor(kind),
                Escape::Backref(group) => Ast::Backref {
                    group,
                    case: self.case(),
                },
            },
            '*' | '+' | '?' => {
                return Err(self.error_at(at, SyntaxErrorKind::NothingToRepeat, "nothing to repeat"));
            }
            '{' => {
                self.pos = at;
                if !matches!(self.scan_brace()?, Brace::Literal) {
                    return Err(self.error_at(at, SyntaxErrorKind::NothingToRepeat, "nothing to repeat"));
                }
                self.pos = at + 1;
                self.char_ast('{')
            }
            c => self.char_ast(c),
        };
        Ok(Some(ast))
    }

    fn char_ast(&self, c: char) -> Ast {
        Ast::Char { c, case: self.case() }
    }

    fn anchor(&self, kind: AnchorKind) -> Ast {
        Ast::Anchor {
            kind,
            word: self.word_mode(),
        }
    }

    // ------------------------------------------------------------------------
    // Quantifiers and fuzzy constraints
    // ------------------------------------------------------------------------

    fn parse_quantifiers(&mut self, atom: Ast) -> Result<Ast, RegexError> {
        let mut node = atom;
        let mut repeated = false;
        loop {
            self.skip_ignored();
            let at = self.pos;
            let (min, max) = match self.peek() {
                Some('*') => (0, None),
                Some('+') => (1, None),
                Some('?') => (0, Some(1)),
                Some('{') => match self.scan_brace()? {
                    Brace::Fuzzy { limits, end } => {
                        self.pos = end;
                        node = Ast::Fuzzy {
                            child: Box::new(node),
                            limits,
                        };
                        continue;
                    }
                    Brace::Repeat { min, max, end } => {
                        self.pos = end - 1;
                        (min, max)
                    }
                    Brace::Literal => break,
                },
                _ => break,
            };
            self.bump();
            if repeated {
                return Err(self.error_at(at, SyntaxErrorKind::BadQuantifier, "multiple repeat"));
            }
            repeated = true;
            let kind = if self.eat('?') {
                RepeatKind::Lazy
            } else if self.eat('+') {
                RepeatKind::Possessive
            } else {
                RepeatKind::Greedy
            };
            node = Ast::Repeat {
                child: Box::new(node),
                min,
                max,
                kind,
            };
        }
        Ok(node)
    }

    /// Classify the `{...}` at the cursor without consuming it.
    fn scan_brace(&self) -> Result<Brace, RegexError> {
        let open = self.pos;
        let rest = &self.pattern[open + 1..];
        let Some(close) = rest.find('}') else {
            return Ok(Brace::Literal);
        };
        let body = &rest[..close];
        let end = open + 1 + close + 1;

        if FuzzyLimits::looks_like_constraint(body) {
            return match FuzzyLimits::parse(body) {
                Ok(limits) => Ok(Brace::Fuzzy { limits, end }),
                Err(message) => Err(self.error_at(open, SyntaxErrorKind::BadFuzzyConstraint, message)),
            };
        }

        let (lo, hi) = match body.split_once(',') {
            Some((lo, hi)) => (lo, Some(hi)),
            None => (body, None),
        };
        let is_num = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !is_num(lo) || !hi.map_or(true, is_num) || (lo.is_empty() && hi.map_or(true, str::is_empty)) {
            return Ok(Brace::Literal);
        }
        let number = |s: &str| -> Result<u32, RegexError> {
            s.parse::<u32>()
                .map_err(|_| self.error_at(open, SyntaxErrorKind::BadQuantifier, "repeat count too large"))
        };
        let min = if lo.is_empty() { 0 } else { number(lo)? };
        let max = match hi {
            None => Some(min),
            Some("") => None,
            Some(hi) => Some(number(hi)?),
        };
        if let Some(max) = max {
            if max < min {
                return Err(self.error_at(
                    open,
                    SyntaxErrorKind::BadQuantifier,
                    "min repeat greater than max repeat",
                ));
            }
        }
        Ok(Brace::Repeat { min, max, end })
    }

    // ------------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------------

    /// Parse a group body up to `)` and restore the flags in force before it.
    fn parse_group_body(&mut self, open: usize, saved: RegexFlags) -> Result<Ast, RegexError> {
        let body = self.parse_alternation()?;
        if !self.eat(')') {
            return Err(self.error_at(open, SyntaxErrorKind::UnbalancedParenthesis, "missing )"));
        }
        self.flags = saved;
        Ok(body)
    }

    fn parse_group(&mut self, open: usize) -> Result<Option<Ast>, RegexError> {
        let saved = self.flags;
        if !self.eat('?') {
            let index = self.allocate_group(None)?;
            let child = self.parse_group_body(open, saved)?;
            return Ok(Some(Ast::Group {
                index: Some(index),
                child: Box::new(child),
                atomic: false,
            }));
        }

        let ast = match self.peek() {
            Some('#') => {
                while let Some(c) = self.bump() {
                    if c == ')' {
                        return Ok(None);
                    }
                }
                return Err(self.error_at(open, SyntaxErrorKind::UnbalancedParenthesis, "missing )"));
            }
            Some(':') => {
                self.bump();
                self.parse_group_body(open, saved)?
            }
            Some('>') => {
                self.bump();
                Ast::Group {
                    index: None,
                    child: Box::new(self.parse_group_body(open, saved)?),
                    atomic: true,
                }
            }
            Some('=') => {
                self.bump();
                self.look(open, saved, LookKind::Ahead)?
            }
            Some('!') => {
                self.bump();
                self.look(open, saved, LookKind::NotAhead)?
            }
            Some('|') => {
                self.bump();
                self.resets.push(ResetScope {
                    base: self.group_count,
                    used: BTreeSet::new(),
                });
                let branches = self.parse_branches(true)?;
                self.resets.pop();
                if !self.eat(')') {
                    return Err(self.error_at(open, SyntaxErrorKind::UnbalancedParenthesis, "missing )"));
                }
                self.flags = saved;
                Ast::BranchReset(branches)
            }
            Some('<') => {
                self.bump();
                if self.eat('=') {
                    self.look(open, saved, LookKind::Behind)?
                } else if self.eat('!') {
                    self.look(open, saved, LookKind::NotBehind)?
                } else {
                    self.named_group(open, saved, '>')?
                }
            }
            Some('P') => {
                self.bump();
                match self.bump() {
                    Some('<') => self.named_group(open, saved, '>')?,
                    Some('=') => Ast::Backref {
                        group: self.group_ref_until(')')?,
                        case: self.case(),
                    },
                    Some('>') => Ast::Call(self.group_ref_until(')')?),
                    _ => {
                        return Err(self.error_at(open, SyntaxErrorKind::BadGroupName, "unknown extension ?P"));
                    }
                }
            }
            Some('&') => {
                self.bump();
                Ast::Call(self.group_ref_until(')')?)
            }
            Some('R') => {
                self.bump();
                if !self.eat(')') {
                    return Err(self.error_at(open, SyntaxErrorKind::UnbalancedParenthesis, "missing )"));
                }
                Ast::Call(GroupRef::Number(0))
            }
            Some(c) if c.is_ascii_digit() => Ast::Call(self.group_ref_until(')')?),
            Some('(') => {
                self.bump();
                self.conditional(open, saved)?
            }
            _ => return self.flag_group(open, saved),
        };
        Ok(Some(ast))
    }

    fn look(&mut self, open: usize, saved: RegexFlags, kind: LookKind) -> Result<Ast, RegexError> {
        Ok(Ast::Look {
            kind,
            child: Box::new(self.parse_group_body(open, saved)?),
        })
    }

    fn named_group(&mut self, open: usize, saved: RegexFlags, close: char) -> Result<Ast, RegexError> {
        let at = self.pos;
        let name = self.read_until(close, open)?;
        if !is_group_name(name) {
            return Err(self.error_at(at, SyntaxErrorKind::BadGroupName, format!("bad group name {:?}", name)));
        }
        let index = self.allocate_group(Some(name))?;
        let child = self.parse_group_body(open, saved)?;
        Ok(Ast::Group {
            index: Some(index),
            child: Box::new(child),
            atomic: false,
        })
    }

    /// `(?(cond)yes|no)`; the cursor is just after `(?(`.
    fn conditional(&mut self, open: usize, saved: RegexFlags) -> Result<Ast, RegexError> {
        let group = self.group_ref_until(')')?;
        let at = self.pos;
        let mut branches = self.parse_branches(false)?;
        if !self.eat(')') {
            return Err(self.error_at(open, SyntaxErrorKind::UnbalancedParenthesis, "missing )"));
        }
        self.flags = saved;
        if branches.len() > 2 {
            return Err(self.error_at(
                at,
                SyntaxErrorKind::BadCondition,
                "conditional group has more than two branches",
            ));
        }
        let no = if branches.len() == 2 { branches.pop().map(Box::new) } else { None };
        let yes = branches.pop().unwrap_or(Ast::Empty);
        Ok(Ast::Cond {
            group,
            yes: Box::new(yes),
            no,
        })
    }

    /// Inline flags: `(?flags)`, `(?flags-flags)`, `(?flags:...)`.
    fn flag_group(&mut self, open: usize, saved: RegexFlags) -> Result<Option<Ast>, RegexError> {
        let mut on = RegexFlags::empty();
        let mut off = RegexFlags::empty();
        let mut version = None;
        let mut negate = false;
        let mut any = false;
        let scoped = loop {
            let at = self.pos;
            match self.bump() {
                Some(':') if any || negate => break true,
                Some(')') if any => break false,
                Some('-') if !negate => negate = true,
                Some('V') => match self.bump() {
                    Some('0') => version = Some(false),
                    Some('1') => version = Some(true),
                    _ => return Err(self.error_at(at, SyntaxErrorKind::BadFlag, "unknown version flag")),
                },
                Some(c) => match RegexFlags::from_letter(c) {
                    Some(f) if negate => off |= f,
                    Some(f) => on |= f,
                    None => {
                        return Err(self.error_at(at, SyntaxErrorKind::BadFlag, format!("unknown flag {:?}", c)));
                    }
                },
                None => {
                    return Err(self.error_at(open, SyntaxErrorKind::UnexpectedEnd, "missing flag"));
                }
            }
            any = true;
        };

        match version {
            Some(true) => {
                self.global_on |= RegexFlags::VERSION1;
                self.global_off.remove(RegexFlags::VERSION1);
                self.flags |= RegexFlags::VERSION1;
            }
            Some(false) => {
                self.global_off |= RegexFlags::VERSION1;
                self.global_on.remove(RegexFlags::VERSION1);
                self.flags.remove(RegexFlags::VERSION1);
            }
            None => {}
        }

        // Direction and fuzzy policy always apply to the whole pattern.
        let global_on = on & RegexFlags::GLOBAL_ONLY;
        let global_off = off & RegexFlags::GLOBAL_ONLY;
        self.global_on |= global_on;
        self.global_off |= global_off;
        self.flags = (self.flags | global_on) & !global_off;
        let on = on - RegexFlags::GLOBAL_ONLY;
        let off = off - RegexFlags::GLOBAL_ONLY;

        if scoped {
            self.flags = (self.flags | on) & !off;
            let body = self.parse_group_body(open, saved)?;
            // The scope ends, but a version switch inside the group stays.
            self.flags = (saved & !RegexFlags::VERSION1) | (self.flags_version());
            return Ok(Some(body));
        }

        if self.is_v1() {
            self.flags = (self.flags | on) & !off;
        } else {
            if !off.is_empty() {
                return Err(self.error_at(open, SyntaxErrorKind::BadFlag, "can't turn off a global flag"));
            }
            self.global_on |= on;
            self.flags |= on;
        }
        Ok(None)
    }

    fn flags_version(&self) -> RegexFlags {
        if self.global_on.contains(RegexFlags::VERSION1) {
            RegexFlags::VERSION1
        } else if self.global_off.contains(RegexFlags::VERSION1) {
            RegexFlags::empty()
        } else {
            self.flags & RegexFlags::VERSION1
        }
    }

    fn read_until(&mut self, close: char, open: usize) -> Result<&'a str, RegexError> {
        let start = self.pos;
        match self.rest().find(close) {
            Some(n) => {
                self.pos += n + close.len_utf8();
                Ok(&self.pattern[start..start + n])
            }
            None => Err(self.error_at(open, SyntaxErrorKind::UnexpectedEnd, format!("missing {}", close))),
        }
    }

    /// A group number or name terminated by `close`.
    fn group_ref_until(&mut self, close: char) -> Result<GroupRef, RegexError> {
        let at = self.pos;
        let text = self.read_until(close, at)?;
        self.group_ref(text, at)
    }

    fn group_ref(&self, text: &str, at: usize) -> Result<GroupRef, RegexError> {
        if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
            return text
                .parse()
                .map(GroupRef::Number)
                .map_err(|_| self.error_at(at, SyntaxErrorKind::BadGroupName, "group number too large"));
        }
        if is_group_name(text) {
            Ok(GroupRef::Name(text.to_string()))
        } else {
            Err(self.error_at(at, SyntaxErrorKind::BadGroupName, format!("bad group reference {:?}", text)))
        }
    }

    /// Number a new capture group. A known name keeps its number; in a
    /// branch reset an unnamed group takes the lowest number above the reset
    /// base that the current branch has not used.
    fn allocate_group(&mut self, name: Option<&str>) -> Result<usize, RegexError> {
        let known = name.and_then(|n| self.names.iter().find(|(m, _)| m == n).map(|&(_, i)| i));
        let index = match (known, self.resets.last()) {
            (Some(i), Some(_)) => i,
            (Some(_), None) => {
                return Err(RegexError::DuplicateGroup(name.unwrap_or_default().to_string()));
            }
            (None, Some(scope)) if name.is_none() => (scope.base + 1..)
                .find(|i| !scope.used.contains(i))
                .unwrap_or(self.group_count + 1),
            (None, _) => self.group_count + 1,
        };
        if let Some((inner, outer)) = self.resets.split_last_mut() {
            if !inner.used.insert(index) {
                let label = name.map_or_else(|| index.to_string(), str::to_string);
                return Err(RegexError::DuplicateGroup(label));
            }
            for scope in outer {
                scope.used.insert(index);
            }
        }
        self.group_count = self.group_count.max(index);
        if let (Some(n), None) = (name, known) {
            self.names.push((n.to_string(), index));
        }
        Ok(index)
    }

    // ------------------------------------------------------------------------
    // Escapes
    // ------------------------------------------------------------------------

    fn parse_escape(&mut self, at: usize, in_class: bool) -> Result<Escape, RegexError> {
        let Some(c) = self.bump() else {
            return Err(self.error_at(at, SyntaxErrorKind::UnexpectedEnd, "pattern ends with a backslash"));
        };
        let perl = |class, negated: bool, ascii| {
            let set = CharSet::Perl { class, ascii };
            Escape::Set(if negated { CharSet::Negated(Box::new(set)) } else { set })
        };
        let esc = match c {
            'n' => Escape::Char('\n'),
            't' => Escape::Char('\t'),
            'r' => Escape::Char('\r'),
            'f' => Escape::Char('\x0c'),
            'v' => Escape::Char('\x0b'),
            'a' => Escape::Char('\x07'),
            'e' => Escape::Char('\x1b'),
            'x' => {
                if self.eat('{') {
                    let digits = self.read_until('}', at)?;
                    if digits.is_empty() || digits.len() > 8 {
                        return Err(self.error_at(at, SyntaxErrorKind::BadEscape, "bad \\x{...} escape"));
                    }
                    Escape::Char(self.code_point(digits, 16, at)?)
                } else {
                    Escape::Char(self.fixed_hex(2, at)?)
                }
            }
            'u' => Escape::Char(self.fixed_hex(4, at)?),
            'U' => Escape::Char(self.fixed_hex(8, at)?),
            '0' => Escape::Char(self.octal(c, at)?),
            '1'..='9' => {
                let three_octal = c <= '7'
                    && matches!(self.peek(), Some('0'..='7'))
                    && matches!(self.peek_at(1), Some('0'..='7'));
                if three_octal || in_class {
                    if c > '7' {
                        return Err(self.error_at(at, SyntaxErrorKind::BadEscape, "bad escape in set"));
                    }
                    Escape::Char(self.octal(c, at)?)
                } else {
                    let mut n = c as usize - '0' as usize;
                    if let Some(d) = self.peek().and_then(|d| d.to_digit(10)) {
                        self.bump();
                        n = n * 10 + d as usize;
                    }
                    Escape::Backref(GroupRef::Number(n))
                }
            }
            'd' => perl(PerlClass::Digit, false, self.ascii()),
            'D' => perl(PerlClass::Digit, true, self.ascii()),
            'w' => perl(PerlClass::Word, false, self.ascii()),
            'W' => perl(PerlClass::Word, true, self.ascii()),
            's' => perl(PerlClass::Space, false, self.ascii()),
            'S' => perl(PerlClass::Space, true, self.ascii()),
            'p' | 'P' => Escape::Set(self.property(c == 'P', at)?),
            'b' if in_class => Escape::Char('\x08'),
            'A' | 'Z' | 'b' | 'B' | 'm' | 'M' | 'G' if !in_class => Escape::Anchor(match c {
                'A' => AnchorKind::StartText,
                'Z' => AnchorKind::EndText,
                'b' => AnchorKind::WordBoundary,
                'B' => AnchorKind::NotWordBoundary,
                'm' => AnchorKind::WordStart,
                'M' => AnchorKind::WordEnd,
                _ => AnchorKind::SearchStart,
            }),
            'g' if !in_class => {
                if !self.eat('<') {
                    return Err(self.error_at(at, SyntaxErrorKind::BadEscape, "missing < after \\g"));
                }
                let ref_at = self.pos;
                let text = self.read_until('>', at)?;
                Escape::Backref(self.group_ref(text, ref_at)?)
            }
            c if c.is_ascii_alphanumeric() => {
                return Err(self.error_at(at, SyntaxErrorKind::BadEscape, format!("bad escape \\{}", c)));
            }
            c => Escape::Char(c),
        };
        Ok(esc)
    }

    fn code_point(&self, digits: &str, radix: u32, at: usize) -> Result<char, RegexError> {
        u32::from_str_radix(digits, radix)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error_at(at, SyntaxErrorKind::BadEscape, format!("bad character code {:?}", digits)))
    }

    fn fixed_hex(&mut self, n: usize, at: usize) -> Result<char, RegexError> {
        let start = self.pos;
        for _ in 0..n {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    self.bump();
                }
                _ => {
                    return Err(self.error_at(at, SyntaxErrorKind::BadEscape, format!("expected {} hex digits", n)));
                }
            }
        }
        self.code_point(&self.pattern[start..self.pos], 16, at)
    }

    /// Octal escape whose first digit `first` is already consumed.
    fn octal(&mut self, first: char, at: usize) -> Result<char, RegexError> {
        let mut value = first as u32 - '0' as u32;
        for _ in 0..2 {
            match self.peek().and_then(|c| c.to_digit(8)) {
                Some(d) => {
                    self.bump();
                    value = value * 8 + d;
                }
                None => break,
            }
        }
        if value > 0o377 {
            return Err(self.error_at(at, SyntaxErrorKind::BadEscape, "octal escape out of range"));
        }
        char::from_u32(value).ok_or_else(|| self.error_at(at, SyntaxErrorKind::BadEscape, "bad octal escape"))
    }

    /// `\p{Name}`, `\p{^Name}`, `\pL`; `negated` for `\P`.
    fn property(&mut self, negated: bool, at: usize) -> Result<CharSet, RegexError> {
        let name = if self.eat('{') {
            self.read_until('}', at)?
        } else {
            let start = self.pos;
            match self.bump() {
                Some(c) if c.is_ascii_alphabetic() => &self.pattern[start..self.pos],
                _ => return Err(self.error_at(at, SyntaxErrorKind::UnknownProperty, "missing property name")),
            }
        };
        let (caret, name) = match name.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let prop = self.uni.lookup_property(name).ok_or_else(|| {
            self.error_at(at, SyntaxErrorKind::UnknownProperty, format!("unknown property {:?}", name))
        })?;
        let set = CharSet::Property(prop);
        Ok(if negated != caret { CharSet::Negated(Box::new(set)) } else { set })
    }

    // ------------------------------------------------------------------------
    // Character classes
    // ------------------------------------------------------------------------

    fn parse_class(&mut self, open: usize) -> Result<Ast, RegexError> {
        let negate = self.eat('^');
        let body = self.pos;
        let set = if self.is_v1() {
            self.parse_set_expr(open, body, 0)?
        } else {
            self.parse_set_items(open, body, false)?
        };
        if !self.eat(']') {
            return Err(self.error_at(open, SyntaxErrorKind::UnterminatedCharClass, "unterminated character set"));
        }
        Ok(Ast::Class {
            set,
            negate,
            case: self.case(),
        })
    }

    /// Set operators by increasing precedence; juxtaposition binds tightest.
    const SET_OPS: [&'static str; 4] = ["||", "~~", "&&", "--"];

    fn at_set_operator(&self) -> bool {
        Self::SET_OPS.iter().any(|op| self.rest().starts_with(op))
    }

    fn parse_set_expr(&mut self, open: usize, body: usize, level: usize) -> Result<CharSet, RegexError> {
        if level == Self::SET_OPS.len() {
            return self.parse_set_items(open, body, true);
        }
        let mut operands = vec![self.parse_set_expr(open, body, level + 1)?];
        while self.rest().starts_with(Self::SET_OPS[level]) {
            self.pos += 2;
            operands.push(self.parse_set_expr(open, body, level + 1)?);
        }
        if operands.len() == 1 {
            return Ok(operands.pop().unwrap_or(CharSet::Union(Vec::new())));
        }
        Ok(match level {
            0 => CharSet::Union(operands),
            1 => CharSet::SymmetricDifference(operands),
            2 => CharSet::Intersection(operands),
            _ => CharSet::Difference(operands),
        })
    }

    /// Juxtaposed items up to `]` (or a set operator in version 1). A `]`
    /// right after the opening bracket is literal.
    fn parse_set_items(&mut self, open: usize, body: usize, v1: bool) -> Result<CharSet, RegexError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error_at(
                        open,
                        SyntaxErrorKind::UnterminatedCharClass,
                        "unterminated character set",
                    ));
                }
                Some(']') if self.pos != body => break,
                _ if v1 && self.at_set_operator() => break,
                _ => {}
            }
            match self.parse_set_item(open, v1)? {
                SetItem::Char(lo) if self.is_range_dash(v1) => {
                    self.bump();
                    let at = self.pos;
                    match self.parse_set_item(open, v1)? {
                        SetItem::Char(hi) if hi >= lo => items.push(CharSet::Range(lo, hi)),
                        _ => return Err(self.error_at(at, SyntaxErrorKind::BadRange, "bad character range")),
                    }
                }
                SetItem::Char(c) => items.push(CharSet::Char(c)),
                SetItem::Set(set) => items.push(set),
            }
        }
        Ok(if items.len() == 1 {
            items.pop().unwrap_or(CharSet::Union(Vec::new()))
        } else {
            CharSet::Union(items)
        })
    }

    fn is_range_dash(&self, v1: bool) -> bool {
        self.peek() == Some('-')
            && !matches!(self.peek_at(1), None | Some(']'))
            && !(v1 && self.peek_at(1) == Some('-'))
    }

    fn parse_set_item(&mut self, open: usize, v1: bool) -> Result<SetItem, RegexError> {
        let at = self.pos;
        let Some(c) = self.bump() else {
            return Err(self.error_at(open, SyntaxErrorKind::UnterminatedCharClass, "unterminated character set"));
        };
        match c {
            '[' if self.peek() == Some(':') && self.rest().contains(":]") => self.posix_class(at),
            '[' if v1 => {
                let negate = self.eat('^');
                let body = self.pos;
                let set = self.parse_set_expr(at, body, 0)?;
                if !self.eat(']') {
                    return Err(self.error_at(at, SyntaxErrorKind::UnterminatedCharClass, "unterminated character set"));
                }
                Ok(SetItem::Set(if negate { CharSet::Negated(Box::new(set)) } else { set }))
            }
            '\\' => match self.parse_escape(at, true)? {
                Escape::Char(c) => Ok(SetItem::Char(c)),
                Escape::Set(set) => Ok(SetItem::Set(set)),
                Escape::Anchor(_) | Escape::Backref(_) => {
                    Err(self.error_at(at, SyntaxErrorKind::BadEscape, "bad escape in set"))
                }
            },
            c => Ok(SetItem::Char(c)),
        }
    }

    /// `[:name:]` or `[:^name:]`; the cursor is just after the `[`.
    fn posix_class(&mut self, at: usize) -> Result<SetItem, RegexError> {
        self.bump();
        let name = self.read_until(':', at)?;
        if !self.eat(']') {
            return Err(self.error_at(at, SyntaxErrorKind::UnknownProperty, "bad POSIX class"));
        }
        let (negated, name) = match name.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let prop = self.uni.lookup_property(name).ok_or_else(|| {
            self.error_at(at, SyntaxErrorKind::UnknownProperty, format!("unknown POSIX class {:?}", name))
        })?;
        let mut set = CharSet::Property(prop);
        if self.ascii() {
            set = CharSet::Intersection(vec![set, CharSet::Property(Property::Ascii)]);
        }
        Ok(SetItem::Set(if negated { CharSet::Negated(Box::new(set)) } else { set }))
    }

    // ------------------------------------------------------------------------
    // Lowering
    // ------------------------------------------------------------------------

    fn lower(self, ast: Ast, flags: RegexFlags) -> Result<PatternGraph, RegexError> {
        let mut builder = GraphBuilder::with_flags(flags);
        let root = self.lower_node(&mut builder, ast)?;
        for (name, index) in &self.names {
            builder.name_group(name, *index)?;
        }
        builder.finish(root)
    }

    fn resolve(&self, group: &GroupRef) -> Result<usize, RegexError> {
        match group {
            GroupRef::Number(n) => Ok(*n),
            GroupRef::Name(name) => self
                .names
                .iter()
                .find(|(n, _)| n == name)
                .map(|&(_, i)| i)
                .ok_or_else(|| RegexError::UnknownGroup(name.clone())),
        }
    }

    fn lower_all(&self, b: &mut GraphBuilder, items: Vec<Ast>) -> Result<Vec<NodeId>, RegexError> {
        items.into_iter().map(|a| self.lower_node(b, a)).collect()
    }

    fn lower_node(&self, b: &mut GraphBuilder, ast: Ast) -> Result<NodeId, RegexError> {
        let node = match ast {
            Ast::Empty => Node::Empty,
            Ast::Char { c, case } => Node::Literal { text: vec![c], case },
            Ast::Any { dotall } => Node::AnyChar { dotall },
            Ast::Class { set, negate, case } => Node::CharClass { set, negate, case },
            Ast::Concat(items) => {
                let mut children = Vec::with_capacity(items.len());
                let mut run: Vec<char> = Vec::new();
                let mut run_case = Case::Sensitive;
                for item in items {
                    if let Ast::Char { c, case } = item {
                        if !run.is_empty() && case != run_case {
                            children.push(b.add(Node::Literal { text: mem::take(&mut run), case: run_case }));
                        }
                        run_case = case;
                        run.push(c);
                        continue;
                    }
                    if !run.is_empty() {
                        children.push(b.add(Node::Literal { text: mem::take(&mut run), case: run_case }));
                    }
                    children.push(self.lower_node(b, item)?);
                }
                if !run.is_empty() {
                    children.push(b.add(Node::Literal { text: run, case: run_case }));
                }
                if children.len() == 1 {
                    return Ok(children[0]);
                }
                Node::Sequence(children)
            }
            Ast::Alt(branches) => Node::Alternation(self.lower_all(b, branches)?),
            Ast::Repeat { child, min, max, kind } => Node::Repeat {
                child: self.lower_node(b, *child)?,
                min,
                max,
                kind,
            },
            Ast::Group { index, child, atomic } => Node::Group {
                index,
                child: self.lower_node(b, *child)?,
                atomic,
            },
            Ast::BranchReset(branches) => Node::BranchReset(self.lower_all(b, branches)?),
            Ast::Backref { group, case } => Node::Backreference {
                group: self.resolve(&group)?,
                case,
            },
            Ast::Look { kind, child } => Node::Assertion {
                kind,
                child: self.lower_node(b, *child)?,
            },
            Ast::Cond { group, yes, no } => {
                let group = self.resolve(&group)?;
                let yes = self.lower_node(b, *yes)?;
                let no = match no {
                    Some(no) => Some(self.lower_node(b, *no)?),
                    None => None,
                };
                Node::Conditional { group, yes, no }
            }
            Ast::Call(GroupRef::Number(0)) => Node::RecursiveCall { group: None },
            Ast::Call(group) => Node::RecursiveCall {
                group: Some(self.resolve(&group)?),
            },
            Ast::Fuzzy { child, limits } => Node::Fuzzy {
                child: self.lower_node(b, *child)?,
                limits,
            },
            Ast::Anchor { kind, word } => Node::Anchor { kind, word },
        };
        Ok(b.add(node))
    }
}

enum SetItem {
    Char(char),
    Set(CharSet),
}

fn is_group_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(pattern: &str, flags: RegexFlags) -> Option<(SyntaxErrorKind, usize)> {
        match parse(pattern, flags) {
            Err(RegexError::Syntax(e)) => Some((e.kind, e.offset)),
            _ => None,
        }
    }

    fn root(g: &PatternGraph) -> &Node {
        g.node(g.root())
    }

    #[test]
    fn syntax_errors_carry_kind_and_offset() {
        let none = RegexFlags::empty();
        assert_eq!(kind_of("(ab", none), Some((SyntaxErrorKind::UnbalancedParenthesis, 0)));
        assert_eq!(kind_of("a)", none), Some((SyntaxErrorKind::UnbalancedParenthesis, 1)));
        assert_eq!(kind_of("x[ab", none), Some((SyntaxErrorKind::UnterminatedCharClass, 1)));
        assert_eq!(kind_of("*a", none), Some((SyntaxErrorKind::NothingToRepeat, 0)));
        assert_eq!(kind_of("a**", none), Some((SyntaxErrorKind::BadQuantifier, 2)));
        assert_eq!(kind_of(r"\q", none), Some((SyntaxErrorKind::BadEscape, 0)));
        assert_eq!(kind_of(r"\p{Foo}", none), Some((SyntaxErrorKind::UnknownProperty, 0)));
        assert_eq!(kind_of("(?z)", none), Some((SyntaxErrorKind::BadFlag, 2)));
        assert_eq!(kind_of("a{3,2}", none), Some((SyntaxErrorKind::BadQuantifier, 1)));
        assert_eq!(kind_of("(?P<1a>x)", none), Some((SyntaxErrorKind::BadGroupName, 4)));
        assert_eq!(kind_of("(a){e<=1,e<=2}", none).map(|k| k.0), Some(SyntaxErrorKind::BadFuzzyConstraint));
        assert_eq!(kind_of("(a)(?(1)a|b|c)", none).map(|k| k.0), Some(SyntaxErrorKind::BadCondition));
        assert_eq!(kind_of("[z-a]", none).map(|k| k.0), Some(SyntaxErrorKind::BadRange));
        assert_eq!(kind_of("a\\", none).map(|k| k.0), Some(SyntaxErrorKind::UnexpectedEnd));
    }

    #[test]
    fn unknown_and_duplicate_groups() {
        let none = RegexFlags::empty();
        assert!(matches!(parse(r"\1", none), Err(RegexError::UnknownGroup(_))));
        assert!(matches!(parse("(?P=nope)", none), Err(RegexError::UnknownGroup(n)) if n == "nope"));
        assert!(matches!(parse("(?P<a>x)(?P<a>y)", none), Err(RegexError::DuplicateGroup(n)) if n == "a"));
    }

    #[test]
    fn brace_that_is_not_a_quantifier_is_literal() {
        let g = parse("a{,}b{x}", RegexFlags::empty()).unwrap();
        match root(&g) {
            Node::Literal { text, .. } => assert_eq!(text.iter().collect::<String>(), "a{,}b{x}"),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn adjacent_characters_merge_into_literals() {
        let g = parse("ab(?i:cd)e", RegexFlags::VERSION1).unwrap();
        let Node::Sequence(children) = root(&g) else {
            panic!("expected a sequence");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(g.node(children[0]), Node::Literal { text, case: Case::Sensitive } if text.len() == 2));
    }

    #[test]
    fn branch_reset_numbering() {
        let g = parse("(?|(?<a>a)(?<b>b)|(?<b>c)(d))(e)", RegexFlags::empty()).unwrap();
        assert_eq!(g.group_count(), 3);
        assert_eq!(g.group_index("a"), Some(1));
        assert_eq!(g.group_index("b"), Some(2));

        let g = parse("(?|(?<a>a)|(?<b>b))(c)", RegexFlags::empty()).unwrap();
        assert_eq!(g.group_index("a"), Some(1));
        assert_eq!(g.group_index("b"), Some(2));
        assert_eq!(g.group_count(), 3);

        assert!(matches!(
            parse("(?|(?<a>a)(?<b>b)|(c)(?<a>d))(e)", RegexFlags::empty()),
            Err(RegexError::DuplicateGroup(_))
        ));
    }

    #[test]
    fn version0_inline_flags_are_global() {
        let g = parse("A(?i)b", RegexFlags::empty()).unwrap();
        assert!(g.flags().contains(RegexFlags::IGNORECASE));
        assert!(matches!(root(&g), Node::Literal { case: Case::Simple, .. }));

        assert_eq!(
            kind_of("(?V0-i)Ab", RegexFlags::IGNORECASE).map(|k| k.0),
            Some(SyntaxErrorKind::BadFlag)
        );
    }

    #[test]
    fn version1_inline_flags_are_positional() {
        let g = parse("A(?iV1)b", RegexFlags::empty()).unwrap();
        assert!(!g.flags().contains(RegexFlags::IGNORECASE));
        assert!(g.flags().contains(RegexFlags::VERSION1));
        let Node::Sequence(children) = root(&g) else {
            panic!("expected a sequence");
        };
        assert!(matches!(g.node(children[0]), Node::Literal { case: Case::Sensitive, .. }));
        assert!(matches!(g.node(children[1]), Node::Literal { case: Case::Simple, .. }));
    }

    #[test]
    fn global_only_flags_reach_the_graph() {
        let g = parse("(?r)abc", RegexFlags::empty()).unwrap();
        assert!(g.flags().contains(RegexFlags::REVERSE));
        let g = parse("(?b)(a){e}", RegexFlags::empty()).unwrap();
        assert!(g.flags().contains(RegexFlags::BESTMATCH));
    }

    #[test]
    fn version1_set_operators() {
        let g = parse("[[a-z]--[aei]]", RegexFlags::VERSION1).unwrap();
        let Node::CharClass { set, negate: false, .. } = root(&g) else {
            panic!("expected a class");
        };
        let u = StdUnicode;
        assert!(set.matches('b', Case::Sensitive, &u));
        assert!(!set.matches('e', Case::Sensitive, &u));

        let g = parse("[\\w&&[^\\d]||x]", RegexFlags::VERSION1).unwrap();
        let Node::CharClass { set, .. } = root(&g) else {
            panic!("expected a class");
        };
        assert!(set.matches('q', Case::Sensitive, &u));
        assert!(!set.matches('7', Case::Sensitive, &u));
    }

    #[test]
    fn version0_set_literals() {
        let u = StdUnicode;
        let g = parse("[]a[-]", RegexFlags::empty()).unwrap();
        let Node::CharClass { set, .. } = root(&g) else {
            panic!("expected a class");
        };
        for c in [']', 'a', '[', '-'] {
            assert!(set.matches(c, Case::Sensitive, &u), "{:?}", c);
        }
        let g = parse(r"[^\d-h]", RegexFlags::empty()).unwrap();
        let Node::CharClass { set, negate: true, .. } = root(&g) else {
            panic!("expected a negated class");
        };
        assert!(set.matches('-', Case::Sensitive, &u));
        assert!(!set.matches('c', Case::Sensitive, &u));
    }

    #[test]
    fn escapes() {
        let g = parse(r"\x41é\101\x{1F600}", RegexFlags::empty()).unwrap();
        match root(&g) {
            Node::Literal { text, .. } => assert_eq!(text.iter().collect::<String>(), "AéA😀"),
            other => panic!("unexpected root {:?}", other),
        }
        let g = parse(r"(a)\g<1>(?P<n>b)\g<n>", RegexFlags::empty()).unwrap();
        assert_eq!(g.group_count(), 2);
    }

    #[test]
    fn verbose_mode_skips_whitespace_and_comments() {
        let g = parse("a b # comment\n c", RegexFlags::VERBOSE).unwrap();
        match root(&g) {
            Node::Literal { text, .. } => assert_eq!(text.iter().collect::<String>(), "abc"),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn fuzzy_constraint_wraps_the_item() {
        let g = parse("(foobar){i<=1,d<=2,s<=3,2d+1s<4}", RegexFlags::empty()).unwrap();
        assert!(matches!(root(&g), Node::Fuzzy { .. }));
    }
}
