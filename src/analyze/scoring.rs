//! Heuristic scoring: engagement base × detector multipliers.
//!
//! base  = max(min(primary, cap) * w_primary + secondary * w_secondary, BASE_FLOOR)
//! score = max(round2(base * Π matched weights), SCORE_FLOOR)
//!
//! Pure and deterministic; identical input always yields identical output.

use serde::{Deserialize, Serialize};

use super::detectors::DETECTORS;
use crate::ingest::types::{Signal, SourceKind};

/// Keeps zero-engagement items from being driven to zero.
pub const BASE_FLOOR: f64 = 1.0;
/// Lowest score a scored signal can carry.
pub const SCORE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseRule {
    pub cap: u64,
    pub primary_weight: f64,
    pub secondary_weight: f64,
}

/// Per-source base-score parameters.
pub fn base_rule(kind: SourceKind) -> BaseRule {
    match kind {
        // upvotes, comments
        SourceKind::Reddit => BaseRule {
            cap: 1_000,
            primary_weight: 1.0,
            secondary_weight: 2.0,
        },
        // points, comments
        SourceKind::HackerNews => BaseRule {
            cap: 1_000,
            primary_weight: 1.0,
            secondary_weight: 1.5,
        },
        // reactions, comments
        SourceKind::GitHub => BaseRule {
            cap: 500,
            primary_weight: 2.0,
            secondary_weight: 1.0,
        },
        // views, answers
        SourceKind::StackExchange => BaseRule {
            cap: 10_000,
            primary_weight: 0.01,
            secondary_weight: 3.0,
        },
        SourceKind::Feed | SourceKind::News => BaseRule {
            cap: 100,
            primary_weight: 1.0,
            secondary_weight: 1.0,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub base_score: f64,
    pub multiplier: f64,
    pub flags: Vec<String>,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn base_score(signal: &Signal) -> f64 {
    let rule = base_rule(signal.source_kind);
    let e = signal.engagement;
    let raw = e.primary.min(rule.cap) as f64 * rule.primary_weight
        + e.secondary as f64 * rule.secondary_weight;
    raw.max(BASE_FLOOR)
}

pub fn score(signal: &Signal) -> ScoreBreakdown {
    let base = base_score(signal);
    let text = signal.text();

    let mut multiplier = 1.0_f64;
    let mut flags = Vec::new();
    for d in DETECTORS.iter() {
        if d.matches(&text) {
            multiplier *= d.weight;
            flags.push(d.label.to_string());
        }
    }

    ScoreBreakdown {
        score: round2(base * multiplier).max(SCORE_FLOOR),
        base_score: round2(base),
        multiplier,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(kind: SourceKind, title: &str, primary: u64, secondary: u64) -> Signal {
        Signal::new(kind, "t:1", title).with_engagement(primary, secondary)
    }

    #[test]
    fn base_caps_primary_metric() {
        let a = sig(SourceKind::Reddit, "x", 5_000, 0);
        let b = sig(SourceKind::Reddit, "x", 1_000, 0);
        assert_eq!(base_score(&a), base_score(&b));
    }

    #[test]
    fn neutral_text_keeps_multiplier_one() {
        let s = sig(SourceKind::HackerNews, "Show HN: a compiler", 10, 2);
        let b = score(&s);
        assert_eq!(b.multiplier, 1.0);
        assert!(b.flags.is_empty());
        assert_eq!(b.score, 13.0);
    }

    #[test]
    fn stack_exchange_views_are_downweighted() {
        let s = sig(SourceKind::StackExchange, "How to parse dates", 2_000, 1);
        assert_eq!(base_score(&s), 23.0);
    }

    #[test]
    fn round2_rounds_half_away() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(0.05), 0.05);
    }
}
