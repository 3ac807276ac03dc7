// compile.rs - Lower a PatternGraph into a Program.
//
// Code is emitted per direction: a reverse program reads the subject
// right-to-left, so sequences are emitted back to front and consuming ops
// get `reverse: true`. Lookahead bodies are always forward; lookbehind bodies
// step back and run forward when their width is fixed, otherwise they run in
// reverse from the current position. Subroutine bodies for `(?R)` / `(?n)`
// are compiled once per (group, direction, fuzzy group) after the main code.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use crate::error::RegexError;
use crate::graph::{AnchorKind, Case, LookKind, Node, NodeId, PatternGraph, RepeatKind};
use crate::program::{ClassMatcher, FuzzyId, Label, Matcher, Op, Program};
use crate::unicode::{StdUnicode, UnicodeProvider};

type SubroutineKey = (usize, bool, Option<FuzzyId>);

struct Compiler<'g> {
    graph: &'g PatternGraph,
    uni: Arc<dyn UnicodeProvider>,
    ops: Vec<Op>,
    repeat_count: usize,
    mark_count: usize,
    fuzzy: Vec<crate::fuzzy::FuzzyLimits>,
    subroutines: HashMap<SubroutineKey, Label>,
    calls: Vec<(usize, SubroutineKey)>,
}

/// Compile with the default Unicode provider.
pub fn compile(graph: &PatternGraph) -> Result<Program, RegexError> {
    compile_with(graph, Arc::new(StdUnicode))
}

pub fn compile_with(
    graph: &PatternGraph,
    unicode: Arc<dyn UnicodeProvider>,
) -> Result<Program, RegexError> {
    let flags = graph.flags();
    let reverse = flags.direction().is_reverse();
    let mut c = Compiler {
        graph,
        uni: unicode,
        ops: Vec::new(),
        repeat_count: 0,
        mark_count: 0,
        fuzzy: Vec::new(),
        subroutines: HashMap::new(),
        calls: Vec::new(),
    };

    c.node(graph.root(), reverse, None)?;
    c.emit(Op::End);
    c.subroutine_bodies()?;

    let first_byte = if reverse { None } else { c.first_byte() };
    let anchored_start = !reverse && c.anchored_start();

    trace!(
        "compiled pattern: {} ops, {} groups, {} repeats, {} fuzzy groups, {} subroutines",
        c.ops.len(),
        graph.group_count(),
        c.repeat_count,
        c.fuzzy.len(),
        c.subroutines.len()
    );

    Ok(Program {
        ops: c.ops,
        entry: 0,
        group_count: graph.group_count(),
        names: graph
            .group_names()
            .map(|(n, i)| (n.to_string(), i))
            .collect(),
        repeat_count: c.repeat_count,
        fuzzy: c.fuzzy,
        direction: flags.direction(),
        policy: flags.fuzzy_policy(),
        first_byte,
        anchored_start,
        unicode: c.uni,
    })
}

impl<'g> Compiler<'g> {
    fn emit(&mut self, op: Op) -> Label {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn here(&self) -> Label {
        self.ops.len()
    }

    fn patch(&mut self, at: Label, to: Label) {
        match &mut self.ops[at] {
            Op::Jump(l) | Op::Push(l) => *l = to,
            Op::RepeatInit { exit, .. } => *exit = to,
            Op::NegLookStart { next, .. } => *next = to,
            Op::CondGroup { no, .. } => *no = to,
            Op::Call { target, .. } => *target = to,
            _ => {}
        }
    }

    fn new_mark(&mut self) -> usize {
        self.mark_count += 1;
        self.mark_count - 1
    }

    fn node(&mut self, id: NodeId, reverse: bool, fuzzy: Option<FuzzyId>) -> Result<(), RegexError> {
        let graph = self.graph;
        match graph.node(id) {
            Node::Empty => {}

            Node::Literal { text, case } => self.literal(text, *case, reverse, fuzzy),

            Node::AnyChar { dotall } => {
                self.emit(Op::Unit {
                    m: Matcher::Any { dotall: *dotall },
                    reverse,
                    fuzzy,
                });
            }

            Node::CharClass { .. } => {
                let m = self.unit_matcher(id).ok_or_else(|| {
                    RegexError::invalid_graph(format!("node {} is not a single character", id))
                })?;
                self.emit(Op::Unit { m, reverse, fuzzy });
            }

            Node::Sequence(children) => {
                if reverse {
                    for &child in children.iter().rev() {
                        self.node(child, reverse, fuzzy)?;
                    }
                } else {
                    for &child in children {
                        self.node(child, reverse, fuzzy)?;
                    }
                }
            }

            Node::Alternation(branches) | Node::BranchReset(branches) => {
                self.alternation(branches, reverse, fuzzy)?;
            }

            Node::Repeat {
                child,
                min,
                max,
                kind,
            } => self.repeat(*child, *min, *max, *kind, reverse, fuzzy)?,

            Node::Group {
                index,
                child,
                atomic,
            } => {
                if let Some(g) = index {
                    self.emit(Op::MemOpen { group: *g });
                }
                if *atomic {
                    let mark = self.new_mark();
                    self.emit(Op::AtomicStart { mark });
                    self.node(*child, reverse, fuzzy)?;
                    self.emit(Op::AtomicEnd { mark });
                } else {
                    self.node(*child, reverse, fuzzy)?;
                }
                if let Some(g) = index {
                    self.emit(Op::MemClose { group: *g });
                }
            }

            Node::Backreference { group, case } => match fuzzy {
                Some(f) => {
                    self.emit(Op::BackRefStart {
                        group: *group,
                        reverse,
                    });
                    self.emit(Op::BackRefUnit {
                        group: *group,
                        case: *case,
                        reverse,
                        fuzzy: f,
                    });
                }
                None => {
                    self.emit(Op::BackRef {
                        group: *group,
                        case: *case,
                        reverse,
                    });
                }
            },

            Node::Assertion { kind, child } => self.lookaround(*kind, *child, fuzzy)?,

            Node::Conditional { group, yes, no } => {
                let cond = self.emit(Op::CondGroup {
                    group: *group,
                    no: 0,
                });
                self.node(*yes, reverse, fuzzy)?;
                let jump = self.emit(Op::Jump(0));
                let no_label = self.here();
                self.patch(cond, no_label);
                if let Some(no) = no {
                    self.node(*no, reverse, fuzzy)?;
                }
                let end = self.here();
                self.patch(jump, end);
            }

            Node::RecursiveCall { group } => {
                let group = group.unwrap_or(0);
                let at = self.emit(Op::Call { target: 0, group });
                self.calls.push((at, (group, reverse, fuzzy)));
            }

            Node::Fuzzy { child, limits } => {
                let f = self.fuzzy.len();
                self.fuzzy.push(*limits);
                self.emit(Op::FuzzyStart { id: f });
                self.node(*child, reverse, Some(f))?;
                self.emit(Op::FuzzyEnd { id: f, reverse });
            }

            Node::Anchor { kind, word } => {
                self.emit(Op::Anchor {
                    kind: *kind,
                    word: *word,
                });
            }
        }
        Ok(())
    }

    fn literal(&mut self, text: &[char], case: Case, reverse: bool, fuzzy: Option<FuzzyId>) {
        let uni = Arc::clone(&self.uni);
        if fuzzy.is_some() {
            // Every character is its own edit point.
            let mut units: Vec<Matcher> = text
                .iter()
                .map(|&c| match case {
                    Case::Sensitive => Matcher::Char(c),
                    _ => Matcher::CharFold {
                        folded: uni.fold(c, case.is_ascii()),
                        ascii: case.is_ascii(),
                    },
                })
                .collect();
            if reverse {
                units.reverse();
            }
            for m in units {
                self.emit(Op::Unit { m, reverse, fuzzy });
            }
            return;
        }
        match case {
            Case::Sensitive => {
                self.emit(Op::Str {
                    text: text.into(),
                    reverse,
                });
            }
            Case::Ascii | Case::Simple => {
                let ascii = case.is_ascii();
                let folded: Box<[char]> = text.iter().map(|&c| uni.fold(c, ascii)).collect();
                self.emit(Op::StrFold {
                    folded,
                    ascii,
                    reverse,
                });
            }
            Case::Full => {
                let folded: Box<[char]> = text.iter().flat_map(|&c| uni.full_fold(c)).collect();
                self.emit(Op::StrFull { folded, reverse });
            }
        }
    }

    /// Matcher for a node that always consumes exactly one character.
    fn unit_matcher(&self, id: NodeId) -> Option<Matcher> {
        match self.graph.node(id) {
            Node::AnyChar { dotall } => Some(Matcher::Any { dotall: *dotall }),
            Node::Literal { text, case } if text.len() == 1 && *case != Case::Full => {
                let c = text[0];
                Some(match case {
                    Case::Sensitive => Matcher::Char(c),
                    _ => Matcher::CharFold {
                        folded: self.uni.fold(c, case.is_ascii()),
                        ascii: case.is_ascii(),
                    },
                })
            }
            Node::CharClass { set, negate, case } => {
                if let (Some(c), false) = (set.as_single_char(), *negate) {
                    return Some(match case {
                        Case::Sensitive => Matcher::Char(c),
                        _ => Matcher::CharFold {
                            folded: self.uni.fold(c, case.is_ascii()),
                            ascii: case.is_ascii(),
                        },
                    });
                }
                Some(Matcher::Class(Box::new(ClassMatcher::new(
                    set.clone(),
                    *negate,
                    *case,
                    self.uni.as_ref(),
                ))))
            }
            Node::Group {
                index: None,
                child,
                atomic: false,
            } => self.unit_matcher(*child),
            _ => None,
        }
    }

    fn alternation(
        &mut self,
        branches: &[NodeId],
        reverse: bool,
        fuzzy: Option<FuzzyId>,
    ) -> Result<(), RegexError> {
        let mut jumps = Vec::with_capacity(branches.len());
        for (i, &branch) in branches.iter().enumerate() {
            let last = i + 1 == branches.len();
            let push = if last { None } else { Some(self.emit(Op::Push(0))) };
            self.node(branch, reverse, fuzzy)?;
            if !last {
                jumps.push(self.emit(Op::Jump(0)));
            }
            if let Some(push) = push {
                let next = self.here();
                self.patch(push, next);
            }
        }
        let end = self.here();
        for j in jumps {
            self.patch(j, end);
        }
        Ok(())
    }

    fn repeat(
        &mut self,
        child: NodeId,
        min: u32,
        max: Option<u32>,
        kind: RepeatKind,
        reverse: bool,
        fuzzy: Option<FuzzyId>,
    ) -> Result<(), RegexError> {
        if max == Some(0) {
            return Ok(());
        }
        let possessive = kind == RepeatKind::Possessive;
        let greedy = kind != RepeatKind::Lazy;
        let mark = if possessive {
            let mark = self.new_mark();
            self.emit(Op::AtomicStart { mark });
            Some(mark)
        } else {
            None
        };

        if min == 1 && max == Some(1) {
            self.node(child, reverse, fuzzy)?;
        } else if let (Some(m), None) = (self.unit_matcher(child), fuzzy) {
            self.emit(Op::UnitRepeat {
                m,
                min,
                max,
                greedy,
                reverse,
            });
        } else if min == 0 && max == Some(1) {
            if greedy {
                let push = self.emit(Op::Push(0));
                self.node(child, reverse, fuzzy)?;
                let end = self.here();
                self.patch(push, end);
            } else {
                let push = self.emit(Op::Push(0));
                let jump = self.emit(Op::Jump(0));
                let body = self.here();
                self.patch(push, body);
                self.node(child, reverse, fuzzy)?;
                let end = self.here();
                self.patch(jump, end);
            }
        } else {
            let id = self.repeat_count;
            self.repeat_count += 1;
            let init = self.emit(Op::RepeatInit {
                id,
                min,
                max,
                greedy,
                exit: 0,
            });
            let body = self.here();
            self.node(child, reverse, fuzzy)?;
            self.emit(Op::RepeatNext {
                id,
                min,
                max,
                greedy,
                body,
            });
            let exit = self.here();
            self.patch(init, exit);
        }

        if let Some(mark) = mark {
            self.emit(Op::AtomicEnd { mark });
        }
        Ok(())
    }

    fn lookaround(
        &mut self,
        kind: LookKind,
        child: NodeId,
        fuzzy: Option<FuzzyId>,
    ) -> Result<(), RegexError> {
        let mark = self.new_mark();
        let neg = if kind.is_negative() {
            Some(self.emit(Op::NegLookStart { mark, next: 0 }))
        } else {
            self.emit(Op::LookStart { mark });
            None
        };

        if kind.is_behind() {
            match self.graph.width(child).fixed() {
                Some(n) if !self.has_dynamic_width(child) => {
                    self.emit(Op::StepBack { n });
                    self.node(child, false, fuzzy)?;
                }
                _ => self.node(child, true, fuzzy)?,
            }
        } else {
            self.node(child, false, fuzzy)?;
        }

        match neg {
            Some(start) => {
                self.emit(Op::NegLookFail { mark });
                let next = self.here();
                self.patch(start, next);
            }
            None => {
                self.emit(Op::LookEnd { mark });
            }
        }
        Ok(())
    }

    /// Nodes whose width depends on the subject or on recursion.
    fn has_dynamic_width(&self, id: NodeId) -> bool {
        match self.graph.node(id) {
            Node::Backreference { .. } | Node::RecursiveCall { .. } | Node::Fuzzy { .. } => true,
            node => node
                .children()
                .into_iter()
                .any(|c| self.has_dynamic_width(c)),
        }
    }

    fn subroutine_bodies(&mut self) -> Result<(), RegexError> {
        let mut done = 0;
        while done < self.calls.len() {
            let (_, key) = self.calls[done];
            done += 1;
            if self.subroutines.contains_key(&key) {
                continue;
            }
            let (group, reverse, fuzzy) = key;
            let entry = self.here();
            self.subroutines.insert(key, entry);
            let body = if group == 0 {
                self.graph.root()
            } else {
                self.graph
                    .group_node(group)
                    .ok_or_else(|| RegexError::UnknownGroup(group.to_string()))?
            };
            self.node(body, reverse, fuzzy)?;
            self.emit(Op::Return);
        }
        let calls = std::mem::take(&mut self.calls);
        for (at, key) in calls {
            if let Some(&target) = self.subroutines.get(&key) {
                self.patch(at, target);
            }
        }
        Ok(())
    }

    fn leading_op(&self) -> Option<&Op> {
        self.ops
            .iter()
            .find(|op| !matches!(op, Op::MemOpen { .. } | Op::FuzzyStart { .. }))
    }

    fn first_byte(&self) -> Option<u8> {
        if !self.fuzzy.is_empty() {
            return None;
        }
        let c = match self.leading_op()? {
            Op::Str {
                text,
                reverse: false,
            } => *text.first()?,
            Op::Unit {
                m: Matcher::Char(c),
                reverse: false,
                fuzzy: None,
            } => *c,
            Op::UnitRepeat {
                m: Matcher::Char(c),
                min,
                reverse: false,
                ..
            } if *min > 0 => *c,
            _ => return None,
        };
        c.is_ascii().then_some(c as u8)
    }

    fn anchored_start(&self) -> bool {
        matches!(
            self.leading_op(),
            Some(Op::Anchor {
                kind: AnchorKind::StartText,
                ..
            })
        )
    }
}
