//! Structured-output recovery for model text.
//!
//! Passes run in order and the first success wins:
//! 1. `as_is`           parse the trimmed text
//! 2. `quote_repair`    single-quoted keys/strings -> double quotes, parse
//! 3. `fenced`          content of the first ``` fence, passes 1-2
//! 4. `outer_array`     greedy `[...]` span, passes 1-2
//! 5. `truncated_array` close an unterminated array at the rightmost `},{` boundary
//! 6. `outer_object`    greedy `{...}` span, passes 1-2
//!
//! Every pass is a pure `&str -> Option<Value>`; nothing here panics or errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

type Pass = fn(&str) -> Option<Value>;

/// Ordered pass table.
pub const PASSES: &[(&str, Pass)] = &[
    ("as_is", parse_as_is),
    ("quote_repair", parse_quote_repaired),
    ("fenced", from_fence),
    ("outer_array", from_outer_array),
    ("truncated_array", close_truncated_array),
    ("outer_object", from_outer_object),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub value: Value,
    /// Name of the pass that succeeded.
    pub pass: &'static str,
}

/// Try every pass in order; `None` when nothing parses.
pub fn recover(text: &str) -> Option<Recovered> {
    PASSES
        .iter()
        .find_map(|(name, pass)| pass(text).map(|value| Recovered { value, pass: *name }))
}

/// Convenience: just the value.
pub fn recover_value(text: &str) -> Option<Value> {
    recover(text).map(|r| r.value)
}

static RE_SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<pre>[\{\[,:]\s*)'(?P<body>[^'"\\]*)'"#).expect("single-quote regex")
});

static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(?P<body>.*?)(?:```|\z)").expect("fence regex")
});

static RE_OUTER_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("array regex"));

static RE_OUTER_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));

static RE_ELEMENT_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\}\s*,\s*\{").expect("boundary regex"));

fn parse_as_is(text: &str) -> Option<Value> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    serde_json::from_str(t).ok()
}

/// `{'a': 'b'}` -> `{"a": "b"}` at structural positions only.
pub fn repair_single_quotes(text: &str) -> String {
    RE_SINGLE_QUOTED
        .replace_all(text, "${pre}\"${body}\"")
        .into_owned()
}

fn parse_quote_repaired(text: &str) -> Option<Value> {
    if !text.contains('\'') {
        return None;
    }
    parse_as_is(&repair_single_quotes(text))
}

fn parse_basic(text: &str) -> Option<Value> {
    parse_as_is(text).or_else(|| parse_quote_repaired(text))
}

fn fenced_body(text: &str) -> Option<&str> {
    RE_FENCE
        .captures(text)
        .and_then(|c| c.name("body"))
        .map(|m| m.as_str())
}

fn from_fence(text: &str) -> Option<Value> {
    fenced_body(text).and_then(parse_basic)
}

fn from_outer_array(text: &str) -> Option<Value> {
    RE_OUTER_ARRAY
        .find(text)
        .and_then(|m| parse_basic(m.as_str()))
}

fn from_outer_object(text: &str) -> Option<Value> {
    RE_OUTER_OBJECT
        .find(text)
        .and_then(|m| parse_basic(m.as_str()))
}

/// `[{..},{..},{"trunc` -> `[{..},{..}]`, trying cut points right to left.
fn close_truncated_array(text: &str) -> Option<Value> {
    let body = fenced_body(text).unwrap_or(text);
    let start = body.find('[')?;
    let tail = &body[start..];

    let cuts: Vec<usize> = RE_ELEMENT_BOUNDARY
        .find_iter(tail)
        .map(|m| m.start())
        .collect();

    cuts.iter().rev().find_map(|&cut| {
        // Keep the closing brace of the last complete element.
        let candidate = format!("{}]", &tail[..=cut]);
        parse_basic(&candidate)
    })
}
