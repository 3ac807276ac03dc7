// compat_regex.rs - Integration tests ported from the reference regex test suite.
//
// Uses the same helper shapes as the other compat suites:
//   x2(pattern, string, from, to)       -> search, expect match at from..to
//   x3(pattern, string, from, to, mem)   -> search, expect capture group mem at from..to
//   n(pattern, string)                    -> search, expect no match
//
// Offsets are byte offsets into the subject.

use fuzzex::prelude::*;

fn compile(pattern: &str, flags: RegexFlags) -> Regex {
    Regex::with_flags(pattern, flags)
        .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", pattern, e))
}

fn x2f(pattern: &str, flags: RegexFlags, input: &str, from: usize, to: usize) {
    let re = compile(pattern, flags);
    let m = re
        .find(input)
        .unwrap_or_else(|| panic!("x2: expected match for {:?} against {:?}", pattern, input));
    assert_eq!(
        (m.start(), m.end()),
        (from, to),
        "x2: wrong span for {:?} against {:?}",
        pattern,
        input
    );
}

fn x2(pattern: &str, input: &str, from: usize, to: usize) {
    x2f(pattern, RegexFlags::empty(), input, from, to);
}

fn x3(pattern: &str, input: &str, from: usize, to: usize, mem: usize) {
    let re = compile(pattern, RegexFlags::empty());
    let caps = re
        .captures(input)
        .unwrap_or_else(|| panic!("x3: expected match for {:?} against {:?}", pattern, input));
    let g = caps
        .get(mem)
        .unwrap_or_else(|| panic!("x3: group {} unset for {:?} against {:?}", mem, pattern, input));
    assert_eq!(
        (g.start(), g.end()),
        (from, to),
        "x3: wrong span of group {} for {:?} against {:?}",
        mem,
        pattern,
        input
    );
}

fn nf(pattern: &str, flags: RegexFlags, input: &str) {
    let re = compile(pattern, flags);
    if let Some(m) = re.find(input) {
        panic!(
            "n: expected no match for {:?} against {:?}, got {}..{}",
            pattern,
            input,
            m.start(),
            m.end()
        );
    }
}

fn n(pattern: &str, input: &str) {
    nf(pattern, RegexFlags::empty(), input);
}

fn groups(pattern: &str, input: &str) -> Vec<Option<String>> {
    let re = compile(pattern, RegexFlags::empty());
    let caps = re
        .captures(input)
        .unwrap_or_else(|| panic!("expected match for {:?} against {:?}", pattern, input));
    caps.iter().skip(1).map(|g| g.map(|m| m.as_str().to_string())).collect()
}

fn history(pattern: &str, input: &str, group: usize) -> Vec<String> {
    let re = compile(pattern, RegexFlags::empty());
    let caps = re
        .captures(input)
        .unwrap_or_else(|| panic!("expected match for {:?} against {:?}", pattern, input));
    caps.captures(group).iter().map(|m| m.as_str().to_string()).collect()
}

fn s(text: &str) -> Option<String> {
    Some(text.to_string())
}

// ============================================================================
// Ordering, greediness and atomicity
// ============================================================================

#[test]
fn alternation_prefers_first_branch() {
    x2("ab|a", "ab", 0, 2);
    x2("ab|a", "a", 0, 1);
    x2("a|ab", "ab", 0, 1);
    x3("(a|ab)(c|bcd)(d*)", "abcd", 1, 4, 2);
}

#[test]
fn greedy_and_lazy() {
    x2("a*", "aaa", 0, 3);
    x2("a*?", "aaa", 0, 0);
    x2("a{2,3}", "aaaa", 0, 3);
    x2("a{2,3}?", "aaaa", 0, 2);
    x2("a{,2}", "aaa", 0, 2);
    x3("(a+)+b", "aaab", 0, 3, 1);
}

#[test]
fn atomic_and_possessive() {
    n("(?>a*)a", "aa");
    n("a*+a", "aaa");
    x2("a++b", "aaab", 0, 4);
    x2("(?>a|ab)c", "xac", 1, 3);
    n("(?>a|ab)c", "abc");
}

// ============================================================================
// Assertions
// ============================================================================

#[test]
fn anchors() {
    n("^b", "a\nb");
    x2("(?m)^b", "a\nb", 2, 3);
    x2("a$", "a\n", 0, 1);
    n(r"a\Z", "a\n");
    x2(r"\Aa", "aa", 0, 1);
    x2(r"\G\w", "ab", 0, 1);
    x2("(?s).", "\n", 0, 1);
    n(".", "\n");
}

#[test]
fn word_boundaries() {
    x2(r"\bfoo\b", "a foo b", 2, 5);
    x2(r"\Bfoo", "afoo", 1, 4);
    x2(r"\ma", "ba a", 3, 4);
    x2(r"a\M", "ab a", 3, 4);
}

#[test]
fn lookahead_and_lookbehind() {
    x2("(?<=ab)c", "abc", 2, 3);
    n("(?<!ab)c", "abc");
    x2("(?<=a|bc)d", "bcd", 2, 3);
    x2(r"(?<=\w+)x", "abcx", 3, 4);
    x2("a(?=b)", "acab", 2, 3);
    x2("a(?!b)", "abac", 2, 3);
    x3(r"(?=(\w+))\w", "ab", 0, 2, 1);
}

// ============================================================================
// Groups, backreferences, conditionals
// ============================================================================

#[test]
fn backreferences() {
    x2("(?P<n>a)(?P=n)", "xaa", 1, 3);
    x2(r"(a)\1", "xaa", 1, 3);
    x2(r"(?i)(a)\1", "aA", 0, 2);
    x2(r"(a)\g<1>", "aa", 0, 2);
    n(r"(a)\1", "ab");
}

#[test]
fn conditionals() {
    x2("(a)?(?(1)b|c)", "c", 0, 1);
    x2("(a)?(?(1)b|c)", "ab", 0, 2);
    x2("(?P<q>a)?(?(q)b)", "ab", 0, 2);
}

#[test]
fn unset_groups() {
    assert_eq!(groups("(a)|b", "b"), vec![None]);
    assert_eq!(groups("(?:(a)|b)*", "ab"), vec![s("a")]);
}

#[test]
fn branch_reset() {
    assert_eq!(groups("(?|(?<a>a)(?<b>b)|(?<b>c)(d))(e)", "cde"), vec![s("d"), s("c"), s("e")]);
    assert_eq!(groups("(?|(?<a>a)|(?<b>b))(c)", "ac"), vec![s("a"), None, s("c")]);
    assert_eq!(groups("(?|(a)|(b))", "b"), vec![s("b")]);
    assert!(matches!(
        Regex::new("(?|(?<a>a)(?<b>b)|(c)(?<a>d))(e)"),
        Err(RegexError::DuplicateGroup(_))
    ));
}

#[test]
fn capture_history() {
    assert_eq!(history(r".*?(?=(.)+)b", "ab", 1), vec!["b"]);
    assert_eq!(history(r".*?(?>(.){0,2})d", "abcd", 1), vec!["b", "c"]);
    assert_eq!(history(r"(\w{3})+", "abcdef", 1), vec!["abc", "def"]);
}

// ============================================================================
// Recursion and subroutines
// ============================================================================

#[test]
fn recursion_balanced_parentheses() {
    let re = Regex::new(r"\(([^()]+|(?R))*\)").unwrap();
    assert!(re.fullmatch("(a(b(c)d)e)").is_some());
    assert!(re.fullmatch("(a(b)").is_none());
    x2(r"\(([^()]+|(?R))*\)", "(a(b(c)d)e)", 0, 11);
    x3(r"\(([^()]+|(?R))*\)", "(a(b(c)d)e)", 9, 10, 1);
}

#[test]
fn recursion_restores_captures() {
    assert_eq!(groups(r"(\w)(?:(?R)|(\w?))\1", "abba"), vec![s("a"), None]);
    assert_eq!(groups(r"(\w)(?:(?R)|(\w?))\1", "paper"), vec![s("p"), s("a")]);
    assert_eq!(
        history(r"\(((?>[^()]+)|(?R))*\)", "(ab(cd)ef)", 1),
        vec!["ab", "(cd)", "ef"]
    );
}

#[test]
fn subroutine_calls() {
    x2("(a)(?1)", "aa", 0, 2);
    x3("(?P<x>a|b)(?&x)", "ba", 0, 1, 1);
    x2("(?P<x>a|b)(?P>x)", "ab", 0, 2);
}

// ============================================================================
// Characters and classes
// ============================================================================

#[test]
fn escapes() {
    x2(r"\x41B\101", "ABA", 0, 3);
    x2(r"é", "é", 0, 2);
    x2(r"\t\n", "a\t\n", 1, 3);
    x2(r"\.", "a.", 1, 2);
}

#[test]
fn unicode_classes() {
    x2(r"\d+", "abc١٢٣", 3, 9);
    x2(r"(?a)\d+", "abc١٢٣4", 9, 10);
    x2(r"\p{Greek}+", "abcαβγ", 3, 9);
    x2(r"\P{Greek}+", "αβxy", 4, 6);
    x2("[[:alpha:]]+", "12ab", 2, 4);
}

#[test]
fn version0_sets() {
    x2(r"[\d-z]+", "1-z", 0, 3);
    x2(r"[^\d-h]+", "a^b12c-h", 0, 3);
    x2("[]a]+", "x]a", 1, 3);
    x2("(?i)[a-c]+", "xABCd", 1, 4);
}

#[test]
fn version1_set_operations() {
    x2(r"(?V1)[\w--\d]+", "12ab3", 2, 4);
    x2("(?V1)[[a-z]&&[^aeiou]]+", "aebcd", 2, 5);
    x2("(?V1)[[a-z]--[aei]]+", "abc", 1, 3);
    x2("(?V1)[[a-c]~~[b-d]]+", "bcad", 2, 4);
}

#[test]
fn case_insensitive_unicode() {
    n("(?i)straße", "STRASSE");
    x2("(?fi)straße", "STRASSE", 0, 7);
    x2("(?i)Σ", "ς", 0, 2);
    x2("(?i)Σ", "σ", 0, 2);
}

#[test]
fn verbose_mode() {
    x2("(?x) a b  c # comment", "xabc", 1, 4);
    x2("(?x) a\\ b", "a b", 0, 3);
}

// ============================================================================
// Inline flags
// ============================================================================

#[test]
fn version0_flags_are_global() {
    x2("a(?i)", "A", 0, 1);
    x2("A(?i)b", "ab", 0, 2);
    assert!(Regex::with_flags("(?V0-i)Ab", RegexFlags::IGNORECASE).is_err());
}

#[test]
fn version1_flags_are_positional() {
    x2("(?iV1)a", "A", 0, 1);
    n("a(?iV1)", "A");
    n("A(?iV1)b", "ab");
    nf("(?V1-i)Ab", RegexFlags::IGNORECASE, "ab");
    x2f("A(?V1-i)b", RegexFlags::IGNORECASE, "ab", 0, 2);
}

#[test]
fn scoped_flags() {
    x2("(?i:a)b", "Ab", 0, 2);
    n("(?i:a)b", "AB");
    nf("(?-i:A)b", RegexFlags::IGNORECASE, "ab");
}

// ============================================================================
// Reverse search
// ============================================================================

#[test]
fn reverse_search() {
    x2("(?r)abc", "abcabc", 3, 6);
    x2(r"(?r)\w+", "ab cd", 3, 5);
    x2("(?r)(?<=a)b", "abab", 3, 4);
    x2("(?r)a(?=b)", "abab", 2, 3);
}

#[test]
fn direction_symmetry() {
    let fwd: Vec<_> = Regex::new("..").unwrap().find_iter("abcde").map(|m| m.as_str()).collect();
    let rev: Vec<_> = Regex::new("(?r)..").unwrap().find_iter("abcde").map(|m| m.as_str()).collect();
    assert_eq!(fwd, vec!["ab", "cd"]);
    assert_eq!(rev, vec!["de", "bc"]);
}

// ============================================================================
// Fuzzy matching
// ============================================================================

const ANACONDA: &str = "anaconda foo bar baz smith anderson";
const FOOBAR: &str = "xirefoabralfobarxie";
const NOISE: &str = "3oifaowefbaoraofuiebofasebfaobfaorfeoaro";

#[test]
fn fuzzy_bounds() {
    x2("(foobar){e<=2}", "xirefoabrzlfd", 4, 9);
    n("(foobar){e<=2}", "xirefoabzlfd");
    x2("(fuu){i<=3,d<=3,e<=5}", ANACONDA, 0, 0);
    x2("(fuu){i<=2,d<=2,e<=5}", ANACONDA, 7, 10);
    x2("(foobar){e}", FOOBAR, 0, 6);
    x2("(foobar){i<=1,d<=2,s<=3,2d+1s<4}", NOISE, 6, 13);
    x2(
        "(znacnda){s<=1,e<=3,1i+1d<2}",
        "molasses anaconda foo bar baz smith anderson ",
        9,
        17,
    );
    x2("(foobar){i<=2,s<=2,e<=2}", "oobargoobaploowap", 5, 11);
}

#[test]
fn fuzzy_policies() {
    x2("(?b)(fuu){i<=3,d<=3,e<=5}", ANACONDA, 9, 10);
    x2("(?e)(fuu){i<=2,d<=2,e<=5}", ANACONDA, 9, 10);
    x2("(?e)(foobar){e}", FOOBAR, 0, 3);
    x2("(?b)(foobar){e}", FOOBAR, 11, 16);
    x2("(?b)(foobar){i<=1,d<=2,s<=3,2d+1s<4}", NOISE, 26, 33);
    x2("(?:cats|cat){e<=1}", "cat", 0, 3);
    x2("(?e)(?:cats|cat){e<=1}", "cat", 0, 3);
}

#[test]
fn fuzzy_with_context() {
    x2("foo(bar){e<=1}zap", "foobrzap", 0, 8);
    x3("foo(bar){e<=1}zap", "foobrzap", 3, 5, 1);
    x2(r"\b(foobar){e}\b", "boing zfoobarz goobar woop", 0, 6);
    x2(r"(?b)\b(foobar){e}\b", "boing zfoobarz goobar woop", 15, 21);
}

#[test]
fn fuzzy_anchored_whole_subject() {
    x2("^(foobar){e<=1}$", "fobar", 0, 5);
    x2("^(foobar){e<=1}$", "foobarr", 0, 7);
    x2("^(foobar){e<=1}$", "fuobar", 0, 6);
    x2("^(foobar){e<=1}$", "xfoobar", 0, 7);
    n("^(foobar){e<=1}$", "fobr");
    n("^(foobar){s<=1}$", "fobar");
    x2("^(foobar){i<=1}$", "foobarr", 0, 7);
    x2("^(foobar){d<=1}$", "fobar", 0, 5);
}

#[test]
fn fuzzy_backreference_in_reverse() {
    assert_eq!(groups(r"(?r)(\2{e<=1}) (\w+)", "foo fou"), vec![s("foo"), s("fou")]);
}

// ============================================================================
// Long subjects
// ============================================================================

#[test]
fn repeated_group_over_long_subject() {
    let xs = "x".repeat(50_000);
    x3("(x)*", &xs, 49_999, 50_000, 1);
    let xy = format!("{}y", xs);
    x3("(x)*y", &xy, 49_999, 50_000, 1);
    x3("(x)*?y", &xy, 49_999, 50_000, 1);
}

#[test]
fn lazy_repeat_over_long_subject() {
    x2(".*?c", &format!("{}cd", "ab".repeat(10_000)), 0, 20_001);
    let s = format!("{}c{}cde", "ab".repeat(5_000), "ab".repeat(5_000));
    x2(".*?cd", &s, 0, 20_003);
    x2(".*?cd", &format!("{}de", "abc".repeat(20_000)), 0, 60_001);
    x2("(a|b)*?c", &format!("{}cd", "ab".repeat(10_000)), 0, 20_001);
}

#[test]
fn backtracking_at_every_start_under_default_limits() {
    // Each failing start gives back a long run; the match lies at the far end.
    let text = format!("{} b1", "a".repeat(5_000));
    x2(r"\w+\d", &text, 5_001, 5_003);
    x2(r"(?r)\d\w+", &format!("1b {}", "a".repeat(5_000)), 0, 2);
}

// ============================================================================
// Iteration and substitution
// ============================================================================

#[test]
fn zero_width_split_terminates() {
    assert_eq!(Regex::new("").unwrap().split("xaxbxc"), vec!["xaxbxc"]);
    assert_eq!(Regex::new("x*").unwrap().split("xaxbxc"), vec!["", "a", "b", "c"]);
}

#[test]
fn substitution_with_unset_group() {
    let re = Regex::new(r"(x)?(y)?").unwrap();
    assert_eq!(re.replace_all("x", r"\2-\1").unwrap(), "-x-");
}

#[test]
fn resource_limits_end_in_no_match() {
    let re = Regex::builder(r"(a*)*b")
        .limits(MatchLimits {
            retry_limit: 1000,
            ..MatchLimits::default()
        })
        .build()
        .unwrap();
    assert!(re.find(&"a".repeat(30)).is_none());
}
