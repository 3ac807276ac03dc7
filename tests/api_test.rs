// api_test.rs - Integration tests for the idiomatic Rust API.

use std::sync::Arc;

use fuzzex::api::{Regex, RegexBuilder};
use fuzzex::error::RegexError;
use fuzzex::prelude::*;
use fuzzex::unicode::StdUnicode;

// === Regex::new ===

#[test]
fn simple_pattern() {
    let re = Regex::new(r"\d+").unwrap();
    let m = re.find("abc 123 def").unwrap();
    assert_eq!(m.as_str(), "123");
}

#[test]
fn unicode_pattern() {
    let re = Regex::new(r"\p{Hiragana}+").unwrap();
    let m = re.find("hello せかい world").unwrap();
    assert_eq!(m.as_str(), "せかい");
}

#[test]
fn no_match_returns_none() {
    let re = Regex::new(r"xyz").unwrap();
    assert!(re.find("abc").is_none());
}

#[test]
fn empty_pattern() {
    let re = Regex::new(r"").unwrap();
    let m = re.find("hello").unwrap();
    assert_eq!(m.start(), 0);
    assert_eq!(m.end(), 0);
    assert!(m.is_empty());
}

#[test]
fn invalid_pattern_syntax_error() {
    let err = Regex::new(r"(unclosed").unwrap_err();
    match err {
        RegexError::Syntax(e) => {
            assert_eq!(e.kind, SyntaxErrorKind::UnbalancedParenthesis);
            assert_eq!(e.offset, 0);
        }
        other => panic!("expected Syntax error, got {:?}", other),
    }
}

#[test]
fn invalid_pattern_empty_char_class() {
    let err = Regex::new(r"[]").unwrap_err();
    assert!(matches!(err, RegexError::Syntax(_)));
    assert!(err.is_pattern_error());
}

#[test]
fn unknown_group_reference() {
    assert_eq!(
        Regex::new(r"(a)\2").unwrap_err(),
        RegexError::UnknownGroup("2".to_string())
    );
    assert_eq!(
        Regex::new(r"(?P=missing)").unwrap_err(),
        RegexError::UnknownGroup("missing".to_string())
    );
}

#[test]
fn parse_from_str() {
    let re: Regex = "b+".parse().unwrap();
    assert_eq!(re.find("abbc").unwrap().range(), 1..3);
    assert_eq!(re.as_str(), "b+");
}

// === Regex::is_match ===

#[test]
fn is_match_true() {
    let re = Regex::new(r"world").unwrap();
    assert!(re.is_match("hello world"));
}

#[test]
fn is_match_false() {
    let re = Regex::new(r"^world").unwrap();
    assert!(!re.is_match("hello world"));
}

// === Match modes ===

#[test]
fn match_prefix_is_anchored() {
    let re = Regex::new(r"\d+").unwrap();
    assert!(re.match_prefix("x12").is_none());
    assert_eq!(re.match_prefix("12x").unwrap().get(0).unwrap().as_str(), "12");
}

#[test]
fn fullmatch_needs_whole_subject() {
    let re = Regex::new(r"a|ab").unwrap();
    let caps = re.fullmatch("ab").unwrap();
    assert_eq!(caps.get(0).unwrap().range(), 0..2);
    assert!(re.fullmatch("abc").is_none());
}

#[test]
fn search_in_window() {
    let re = Regex::new(r"\w+").unwrap();
    let caps = re.search_in("abc def", 1, 6, SearchMode::Search).unwrap().unwrap();
    assert_eq!(caps.get(0).unwrap().as_str(), "bc");

    let re = Regex::new(r"\bde").unwrap();
    // Text before the window is still visible to assertions.
    assert!(re.search_in("abcde", 3, 5, SearchMode::Search).unwrap().is_none());

    let re = Regex::new(r"\Gd").unwrap();
    let caps = re.search_in("abcd", 3, 4, SearchMode::Search).unwrap().unwrap();
    assert_eq!(caps.get(0).unwrap().start(), 3);
}

#[test]
fn lookbehind_reads_before_the_window_in_both_directions() {
    let span = |pattern: &str, text: &str, start: usize, end: usize| {
        Regex::new(pattern)
            .unwrap()
            .search_in(text, start, end, SearchMode::Search)
            .unwrap()
            .map(|c| c.get(0).unwrap().range())
    };
    assert_eq!(span("(?<=a)b", "ab", 1, 2), Some(1..2));
    assert_eq!(span("(?r)(?<=a)b", "ab", 1, 2), Some(1..2));
    assert_eq!(span("(?r)(?<=ab+)c", "abbc", 3, 4), Some(3..4));
    assert_eq!(span("(?r)(?<!a)b", "ab", 1, 2), None);
    // The match itself still stays inside the window.
    assert_eq!(span(r"(?r)\w+", "abcd", 2, 4), Some(2..4));
    assert_eq!(span(r"(?r)(?<=\w)\w+", "abcd", 2, 4), Some(2..4));
}

#[test]
fn window_contract_violations() {
    let re = Regex::new("a").unwrap();
    for (start, end) in [(3, 1), (0, 10)] {
        let err = re.search_in("abc", start, end, SearchMode::Search).unwrap_err();
        assert!(matches!(err, RegexError::InvalidArgument { .. }));
        assert!(!err.is_pattern_error());
    }
}

// === Captures ===

#[test]
fn captures_groups() {
    let re = Regex::new(r"(\w+)@(\w+)\.com").unwrap();
    let caps = re.captures("mail: user@example.com").unwrap();
    assert_eq!(caps.get(0).unwrap().as_str(), "user@example.com");
    assert_eq!(caps.get(1).unwrap().as_str(), "user");
    assert_eq!(caps.get(2).unwrap().as_str(), "example");
    assert_eq!(caps.len(), 3);
    assert_eq!(re.captures_len(), 2);
}

#[test]
fn captures_optional_group() {
    let re = Regex::new(r"(a)(b)?").unwrap();
    let caps = re.captures("a").unwrap();
    let items: Vec<_> = caps.iter().collect();
    assert_eq!(items.len(), 3);
    assert!(items[0].is_some());
    assert!(items[1].is_some());
    assert!(items[2].is_none());
    assert_eq!(caps.iter().len(), 3);
}

#[test]
fn captures_named() {
    let re = Regex::new(r"(?P<first>\w+)\s(?<last>\w+)").unwrap();
    let caps = re.captures("John Smith").unwrap();
    assert_eq!(caps.name("first").unwrap().as_str(), "John");
    assert_eq!(caps.name("last").unwrap().as_str(), "Smith");
    assert_eq!(re.group_index("last"), Some(2));
    let names: Vec<_> = re.group_names().collect();
    assert_eq!(names, vec![("first", 1), ("last", 2)]);
}

#[test]
fn capture_history_of_repeated_group() {
    let re = Regex::new(r"(?:(\d)[,;]?)+").unwrap();
    let caps = re.captures("1,2;3").unwrap();
    let all: Vec<_> = caps.captures(1).iter().map(|m| m.as_str()).collect();
    assert_eq!(all, vec!["1", "2", "3"]);
    assert_eq!(caps.get(1).unwrap().as_str(), "3");
    assert_eq!(caps.captures(0).len(), 1);
    assert!(caps.captures(7).is_empty());
}

#[test]
fn last_group() {
    let re = Regex::new(r"(a)(?P<tail>b)?").unwrap();
    let caps = re.captures("ab").unwrap();
    assert_eq!(caps.last_group(), Some(2));
    assert_eq!(caps.last_group_name(), Some("tail"));
    let caps = re.captures("a").unwrap();
    assert_eq!(caps.last_group(), Some(1));
    assert_eq!(caps.last_group_name(), None);
}

#[test]
fn captures_debug() {
    let re = Regex::new(r"(a)(x)?").unwrap();
    let caps = re.captures("a").unwrap();
    assert_eq!(format!("{:?}", caps), r#"[Some("a"), Some("a"), None]"#);
}

// === Iteration ===

#[test]
fn find_iter_basic() {
    let re = Regex::new(r"\d+").unwrap();
    let nums: Vec<&str> = re.find_iter("a1b22c333").map(|m| m.as_str()).collect();
    assert_eq!(nums, vec!["1", "22", "333"]);
}

#[test]
fn find_iter_zero_width() {
    let re = Regex::new(r"x*").unwrap();
    let spans: Vec<_> = re.find_iter("axb").map(|m| m.range()).collect();
    assert_eq!(spans, vec![0..0, 1..2, 2..2, 3..3]);
}

#[test]
fn find_iter_multibyte_zero_width() {
    let re = Regex::new(r"").unwrap();
    let starts: Vec<_> = re.find_iter("éa").map(|m| m.start()).collect();
    assert_eq!(starts, vec![0, 2, 3]);
}

#[test]
fn captures_iter_yields_groups() {
    let re = Regex::new(r"(\w)=(\d)").unwrap();
    let pairs: Vec<(String, String)> = re
        .captures_iter("a=1 b=2")
        .map(|c| (c.get(1).unwrap().as_str().to_string(), c.get(2).unwrap().as_str().to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
    );
}

#[test]
fn overlapped_iteration() {
    let re = Regex::new(r"aa").unwrap();
    assert_eq!(re.find_iter("aaaa").count(), 2);
    assert_eq!(re.find_iter_overlapped("aaaa").count(), 3);
}

// === Split / replace ===

#[test]
fn split_and_splitn() {
    let re = Regex::new(r"\s*,\s*").unwrap();
    assert_eq!(re.split("a , b,c"), vec!["a", "b", "c"]);
    assert_eq!(re.splitn("a , b,c", 2), vec!["a", "b,c"]);
    assert!(re.splitn("a,b", 0).is_empty());
    assert_eq!(re.split(""), vec![""]);
}

#[test]
fn reverse_split_keeps_text_order() {
    let re = Regex::new(r"(?r),").unwrap();
    assert_eq!(re.split("a,b,c"), vec!["a", "b", "c"]);
    assert_eq!(re.replace("a,b,c", ";").unwrap(), "a,b;c");
}

#[test]
fn replace_templates() {
    let re = Regex::new(r"(?P<k>\w+)=(\w+)").unwrap();
    assert_eq!(re.replace_all("a=1 b=2", r"\2:\g<k>").unwrap(), "1:a 2:b");
    assert_eq!(re.replace_all("a=1", r"\g<0>\t\\").unwrap(), "a=1\t\\");
    assert_eq!(re.replace_all("a=1", r"[\-]").unwrap(), r"[\-]");
    assert!(matches!(
        re.replace_all("a=1", r"\g<nope>"),
        Err(RegexError::UnknownGroup(_))
    ));
}

#[test]
fn replace_with_closure() {
    let re = Regex::new(r"\d+").unwrap();
    let out = re.replace_with("a1b22", 0, |caps| {
        let n: usize = caps.get(0).unwrap().as_str().parse().unwrap();
        (n * 2).to_string()
    });
    assert_eq!(out, "a2b44");
}

#[test]
fn expand_unset_group_is_empty() {
    let re = Regex::new(r"(a)|(b)").unwrap();
    let caps = re.captures("b").unwrap();
    assert_eq!(caps.expand(r"[\1][\2]").unwrap(), "[][b]");
}

// === RegexBuilder ===

#[test]
fn builder_flags() {
    let re = RegexBuilder::new(r"^hello.world$")
        .case_insensitive(true)
        .dot_matches_newline(true)
        .multi_line(true)
        .build()
        .unwrap();
    assert!(re.is_match("x\nHELLO\nWORLD\ny"));
    assert!(re.flags().contains(RegexFlags::IGNORECASE));
}

#[test]
fn builder_verbose_and_ascii() {
    let re = Regex::builder(r" \w+  # word").verbose(true).ascii(true).build().unwrap();
    assert_eq!(re.find("é abc").unwrap().as_str(), "abc");
}

#[test]
fn builder_reverse_and_policy() {
    let re = Regex::builder(r"\d").reverse(true).build().unwrap();
    assert!(re.is_reverse());
    assert_eq!(re.find("1a2").unwrap().start(), 2);

    let re = Regex::builder(r"(foobar){e}")
        .fuzzy_policy(FuzzyPolicy::Best)
        .build()
        .unwrap();
    assert_eq!(re.fuzzy_policy(), FuzzyPolicy::Best);
    assert_eq!(re.find("xirefoabralfobarxie").unwrap().range(), 11..16);
}

#[test]
fn builder_full_case_and_version1() {
    let re = Regex::builder("straße").case_insensitive(true).full_case(true).build().unwrap();
    assert!(re.is_match("STRASSE"));
    let re = Regex::builder(r"[\w--\d]+").version1(true).build().unwrap();
    assert_eq!(re.find("12ab3").unwrap().as_str(), "ab");
}

#[test]
fn builder_custom_limits_and_provider() {
    let limits = MatchLimits {
        retry_limit: 50,
        ..MatchLimits::UNLIMITED
    };
    let re = Regex::builder(r"(a|aa)*c")
        .limits(limits)
        .unicode(Arc::new(StdUnicode))
        .build()
        .unwrap();
    assert_eq!(re.limits().retry_limit, 50);
    assert!(re.find(&"a".repeat(40)).is_none());
}

#[test]
fn regex_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Regex>();

    let re = Arc::new(Regex::new(r"\w+").unwrap());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let re = Arc::clone(&re);
            std::thread::spawn(move || re.find(&format!("-- word{} --", i)).map(|m| m.range()))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Some(3..8));
    }
}

#[test]
fn debug_output() {
    let re = Regex::new(r"a+").unwrap();
    let dbg = format!("{:?}", re);
    assert!(dbg.starts_with("Regex"));
    assert!(dbg.contains("a+"));
}
