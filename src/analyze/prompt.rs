// src/analyze/prompt.rs
//! Request text for the extraction backend.
//!
//! The prompt lists the top-ranked signals (title, flags, score, trimmed body,
//! a few replies) and asks for a JSON array of findings. Signal bodies are
//! already normalized, so only length is bounded here.

use std::fmt::Write as _;

use crate::ingest::types::Signal;
use crate::ingest::ScoredBatch;

/// Per-signal body budget inside the prompt.
pub const PROMPT_BODY_CHARS: usize = 600;
/// Per-reply budget inside the prompt.
pub const PROMPT_REPLY_CHARS: usize = 200;
pub const PROMPT_REPLIES_PER_SIGNAL: usize = 3;

/// What the request is about; changes the framing line only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptFocus {
    MarketSnapshot,
    NewsBatch,
    DeepSearch { keyword: String },
}

impl PromptFocus {
    fn framing(&self) -> String {
        match self {
            PromptFocus::MarketSnapshot => {
                "Below are recent posts where people describe problems with software, tools or workflows.".to_string()
            }
            PromptFocus::NewsBatch => {
                "Below are recent news items. Look for problems that businesses or individuals now have because of these events.".to_string()
            }
            PromptFocus::DeepSearch { keyword } => format!(
                "Below are posts that mention \"{keyword}\". Focus on problems people have around this topic."
            ),
        }
    }
}

const SHAPE: &str = r#"Return ONLY a JSON array (no prose, no markdown) of at most 10 objects:
[{"problem": string, "audience": string, "evidence_ids": [string], "willingness_to_pay": "low"|"medium"|"high", "product_idea": string}]
Use the bracketed ids from the list as evidence_ids. If nothing qualifies, return []."#;

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

fn push_signal(out: &mut String, n: usize, s: &Signal, replies: &[String]) {
    let _ = write!(out, "{n}. [{}] ({}", s.key(), s.source_kind);
    if let Some(score) = s.score {
        let _ = write!(out, ", score {score:.2}");
    }
    if !s.pain_flags.is_empty() {
        let _ = write!(out, ", flags: {}", s.pain_flags.join("|"));
    }
    let _ = writeln!(out, ") {}", s.title.trim());
    if let Some(body) = &s.body {
        let _ = writeln!(out, "   {}", clip(body, PROMPT_BODY_CHARS));
    }
    for r in replies.iter().take(PROMPT_REPLIES_PER_SIGNAL) {
        let _ = writeln!(out, "   > {}", clip(r, PROMPT_REPLY_CHARS));
    }
}

/// Prompt over the first `top_k` signals of `batch`.
pub fn build_prompt(focus: &PromptFocus, batch: &ScoredBatch, top_k: usize) -> String {
    let top = batch.top(top_k);
    let mut out = String::with_capacity(256 + top.len() * 400);
    let _ = writeln!(out, "{}", focus.framing());
    let _ = writeln!(
        out,
        "Identify concrete, recurring problems that a small team could solve with a paid product.\n"
    );
    if top.is_empty() {
        let _ = writeln!(out, "(no items)");
    }
    for (i, s) in top.iter().enumerate() {
        push_signal(&mut out, i + 1, s, batch.replies_for(s));
    }
    let _ = writeln!(out);
    out.push_str(SHAPE);
    out
}
