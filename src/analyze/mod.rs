// src/analyze/mod.rs
//! Pure analysis over signals: detector table, scoring, prompt assembly.

pub mod detectors;
pub mod prompt;
pub mod scoring;

pub use detectors::{demand_matches, matching_labels};
pub use prompt::{build_prompt, PromptFocus};
pub use scoring::{score, ScoreBreakdown};
