// unicode/mod.rs - Character properties and case folding.
// The engine asks a `UnicodeProvider` for category/script/block membership and
// for simple and full case folds; `StdUnicode` answers from std's char methods
// plus the range tables in `tables`.

mod tables;

use std::fmt;

use smallvec::{smallvec, SmallVec};

use tables::{in_table, RangeTable};

/// Expansion of a full case fold (at most three code points).
pub type Folded = SmallVec<[char; 3]>;

/// Scripts known to the default provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Greek,
    Cyrillic,
    Armenian,
    Hebrew,
    Arabic,
    Devanagari,
    Thai,
    Hangul,
    Hiragana,
    Katakana,
    Han,
    Common,
}

/// Blocks known to the default provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Block {
    BasicLatin,
    Latin1Supplement,
    GreekAndCoptic,
    Cyrillic,
    Hiragana,
    Katakana,
    CjkUnifiedIdeographs,
}

/// A resolved character property, as stored in compiled character sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Any,
    Ascii,
    Alphabetic,
    Letter,
    Uppercase,
    Lowercase,
    Cased,
    Numeric,
    DecimalDigit,
    HexDigit,
    Alnum,
    Word,
    WhiteSpace,
    Separator,
    Blank,
    Control,
    Punctuation,
    Mark,
    Graph,
    Print,
    Script(Script),
    Block(Block),
}

impl Property {
    /// Properties that match the other case too under case-insensitive matching.
    pub fn is_case_sensitive(self) -> bool {
        matches!(self, Property::Uppercase | Property::Lowercase)
    }
}

/// Source of character classification and case folding data.
///
/// Implementations must be pure: the same query always gives the same answer.
pub trait UnicodeProvider: Send + Sync + fmt::Debug {
    /// Resolve a property name as written in `\p{...}` or `[:name:]`.
    fn lookup_property(&self, name: &str) -> Option<Property>;

    /// Does `c` have property `prop`?
    fn has_property(&self, c: char, prop: Property) -> bool;

    /// Simple (one-to-one) case fold.
    fn simple_fold(&self, c: char) -> char;

    /// Full case fold; multi-codepoint folds such as `ß` -> `ss` expand.
    fn full_fold(&self, c: char) -> Folded;

    /// Every character whose simple fold equals the fold of `c`, `c` included.
    fn case_variants(&self, c: char) -> SmallVec<[char; 4]>;

    fn fold(&self, c: char, ascii: bool) -> char {
        if ascii {
            c.to_ascii_lowercase()
        } else {
            self.simple_fold(c)
        }
    }

    fn chars_eq_ignore_case(&self, a: char, b: char, ascii: bool) -> bool {
        a == b || self.fold(a, ascii) == self.fold(b, ascii)
    }

    fn is_word(&self, c: char, ascii: bool) -> bool {
        if ascii {
            c.is_ascii_alphanumeric() || c == '_'
        } else {
            self.has_property(c, Property::Word)
        }
    }

    fn is_digit(&self, c: char, ascii: bool) -> bool {
        if ascii {
            c.is_ascii_digit()
        } else {
            self.has_property(c, Property::DecimalDigit)
        }
    }

    fn is_space(&self, c: char, ascii: bool) -> bool {
        if ascii {
            matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
        } else {
            self.has_property(c, Property::WhiteSpace)
        }
    }
}

/// Default provider backed by `char` methods and a compact set of range tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdUnicode;

const KELVIN: char = '\u{212A}';
const ANGSTROM: char = '\u{212B}';
const OHM: char = '\u{2126}';
const CAPITAL_SHARP_S: char = '\u{1E9E}';

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn general_category(name: &str) -> Option<Property> {
    let p = match name {
        "l" | "letter" | "l&" | "lc" | "casedletter" => Property::Letter,
        "lu" | "uppercaseletter" => Property::Uppercase,
        "ll" | "lowercaseletter" => Property::Lowercase,
        "n" | "number" => Property::Numeric,
        "nd" | "decimalnumber" => Property::DecimalDigit,
        "p" | "punctuation" => Property::Punctuation,
        "z" | "separator" | "zs" | "spaceseparator" => Property::Separator,
        "cc" | "control" => Property::Control,
        "m" | "mark" | "mn" | "nonspacingmark" | "combiningmark" => Property::Mark,
        _ => return None,
    };
    Some(p)
}

fn binary_property(name: &str) -> Option<Property> {
    let p = match name {
        "any" => Property::Any,
        "ascii" => Property::Ascii,
        "alpha" | "alphabetic" => Property::Alphabetic,
        "upper" | "uppercase" => Property::Uppercase,
        "lower" | "lowercase" => Property::Lowercase,
        "cased" => Property::Cased,
        "digit" => Property::DecimalDigit,
        "xdigit" | "hexdigit" | "asciihexdigit" => Property::HexDigit,
        "alnum" => Property::Alnum,
        "word" | "w" => Property::Word,
        "space" | "whitespace" | "wspace" => Property::WhiteSpace,
        "blank" => Property::Blank,
        "cntrl" => Property::Control,
        "punct" => Property::Punctuation,
        "graph" => Property::Graph,
        "print" => Property::Print,
        _ => return None,
    };
    Some(p)
}

fn script(name: &str) -> Option<Script> {
    let s = match name {
        "latin" | "latn" => Script::Latin,
        "greek" | "grek" => Script::Greek,
        "cyrillic" | "cyrl" => Script::Cyrillic,
        "armenian" | "armn" => Script::Armenian,
        "hebrew" | "hebr" => Script::Hebrew,
        "arabic" | "arab" => Script::Arabic,
        "devanagari" | "deva" => Script::Devanagari,
        "thai" => Script::Thai,
        "hangul" | "hang" => Script::Hangul,
        "hiragana" | "hira" => Script::Hiragana,
        "katakana" | "kana" => Script::Katakana,
        "han" | "hani" => Script::Han,
        "common" | "zyyy" => Script::Common,
        _ => return None,
    };
    Some(s)
}

fn block(name: &str) -> Option<Block> {
    let b = match name {
        "basiclatin" => Block::BasicLatin,
        "latin1supplement" | "latin1" => Block::Latin1Supplement,
        "greekandcoptic" | "greek" => Block::GreekAndCoptic,
        "cyrillic" => Block::Cyrillic,
        "hiragana" => Block::Hiragana,
        "katakana" => Block::Katakana,
        "cjkunifiedideographs" => Block::CjkUnifiedIdeographs,
        _ => return None,
    };
    Some(b)
}

fn script_table(s: Script) -> Option<RangeTable> {
    let t = match s {
        Script::Latin => tables::LATIN,
        Script::Greek => tables::GREEK,
        Script::Cyrillic => tables::CYRILLIC,
        Script::Armenian => tables::ARMENIAN,
        Script::Hebrew => tables::HEBREW,
        Script::Arabic => tables::ARABIC,
        Script::Devanagari => tables::DEVANAGARI,
        Script::Thai => tables::THAI,
        Script::Hangul => tables::HANGUL,
        Script::Hiragana => tables::HIRAGANA,
        Script::Katakana => tables::KATAKANA,
        Script::Han => tables::HAN,
        Script::Common => return None,
    };
    Some(t)
}

fn block_table(b: Block) -> RangeTable {
    match b {
        Block::BasicLatin => tables::BASIC_LATIN,
        Block::Latin1Supplement => tables::LATIN_1_SUPPLEMENT,
        Block::GreekAndCoptic => tables::GREEK_AND_COPTIC,
        Block::Cyrillic => tables::CYRILLIC_BLOCK,
        Block::Hiragana => tables::HIRAGANA_BLOCK,
        Block::Katakana => tables::KATAKANA_BLOCK,
        Block::CjkUnifiedIdeographs => tables::CJK_UNIFIED_IDEOGRAPHS,
    }
}

const NAMED_SCRIPTS: [Script; 12] = [
    Script::Latin,
    Script::Greek,
    Script::Cyrillic,
    Script::Armenian,
    Script::Hebrew,
    Script::Arabic,
    Script::Devanagari,
    Script::Thai,
    Script::Hangul,
    Script::Hiragana,
    Script::Katakana,
    Script::Han,
];

impl UnicodeProvider for StdUnicode {
    fn lookup_property(&self, name: &str) -> Option<Property> {
        let name = normalize_name(name);
        if let Some((key, value)) = name.split_once(['=', ':']) {
            return match key {
                "gc" | "generalcategory" | "category" => general_category(value),
                "sc" | "script" | "scx" | "scriptextensions" => {
                    script(value).map(Property::Script)
                }
                "blk" | "block" => block(value).map(Property::Block),
                _ => None,
            };
        }
        if let Some(p) = binary_property(&name).or_else(|| general_category(&name)) {
            return Some(p);
        }
        if let Some(s) = script(&name) {
            return Some(Property::Script(s));
        }
        if let Some(rest) = name.strip_prefix("in") {
            if let Some(b) = block(rest) {
                return Some(Property::Block(b));
            }
        }
        if let Some(rest) = name.strip_prefix("is") {
            if let Some(p) = binary_property(rest).or_else(|| general_category(rest)) {
                return Some(p);
            }
            if let Some(s) = script(rest) {
                return Some(Property::Script(s));
            }
        }
        block(&name).map(Property::Block)
    }

    fn has_property(&self, c: char, prop: Property) -> bool {
        match prop {
            Property::Any => true,
            Property::Ascii => c.is_ascii(),
            Property::Alphabetic => c.is_alphabetic(),
            Property::Letter => c.is_alphabetic() && !c.is_numeric(),
            Property::Uppercase => c.is_uppercase(),
            Property::Lowercase => c.is_lowercase(),
            Property::Cased => c.is_uppercase() || c.is_lowercase(),
            Property::Numeric => c.is_numeric(),
            Property::DecimalDigit => in_table(tables::DECIMAL_DIGIT, c),
            Property::HexDigit => c.is_ascii_hexdigit(),
            Property::Alnum => c.is_alphanumeric(),
            Property::Word => {
                c.is_alphanumeric() || c == '_' || in_table(tables::COMBINING_MARK, c)
            }
            Property::WhiteSpace => c.is_whitespace(),
            Property::Separator => c.is_whitespace() && !c.is_control(),
            Property::Blank => {
                c == '\t'
                    || (c.is_whitespace()
                        && !c.is_control()
                        && !matches!(c, '\u{2028}' | '\u{2029}'))
            }
            Property::Control => c.is_control(),
            Property::Punctuation => in_table(tables::PUNCTUATION, c),
            Property::Mark => in_table(tables::COMBINING_MARK, c),
            Property::Graph => !c.is_whitespace() && !c.is_control(),
            Property::Print => !c.is_control() && (c == ' ' || !c.is_whitespace()),
            Property::Script(Script::Common) => {
                !c.is_alphabetic()
                    && !NAMED_SCRIPTS
                        .iter()
                        .any(|&s| self.has_property(c, Property::Script(s)))
            }
            Property::Script(s) => script_table(s).is_some_and(|t| in_table(t, c)),
            Property::Block(b) => in_table(block_table(b), c),
        }
    }

    fn simple_fold(&self, c: char) -> char {
        if c.is_ascii() {
            return c.to_ascii_lowercase();
        }
        if let Some(&(_, to)) = tables::EXTRA_SIMPLE_FOLDS.iter().find(|&&(from, _)| from == c) {
            return to;
        }
        let mut lower = c.to_lowercase();
        match (lower.next(), lower.next()) {
            (Some(l), None) => l,
            _ => c,
        }
    }

    fn full_fold(&self, c: char) -> Folded {
        if let Some(&(_, to)) = tables::FULL_FOLDS.iter().find(|&&(from, _)| from == c) {
            return to.chars().collect();
        }
        smallvec![self.simple_fold(c)]
    }

    fn case_variants(&self, c: char) -> SmallVec<[char; 4]> {
        let folded = self.simple_fold(c);
        let mut out: SmallVec<[char; 4]> = smallvec![c];
        let mut push = |x: char| {
            if !out.contains(&x) {
                out.push(x);
            }
        };
        push(folded);
        let mut upper = folded.to_uppercase();
        if let (Some(u), None) = (upper.next(), upper.next()) {
            push(u);
        }
        for &(from, to) in tables::EXTRA_SIMPLE_FOLDS {
            if to == folded {
                push(from);
            }
        }
        for special in [KELVIN, ANGSTROM, OHM, CAPITAL_SHARP_S] {
            if self.simple_fold(special) == folded {
                push(special);
            }
        }
        out
    }
}
