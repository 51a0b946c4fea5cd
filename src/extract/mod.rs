//! Extraction: backend abstraction, retry policy, recovery and degraded fallback.

pub mod recover;
pub mod stream;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::ai::ExtractionConfig;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Generative backend: prompt in, final text out. Hard failures only;
/// retries are the caller's business.
pub trait ExtractionBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        max_output_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
    /// Provider name for provenance/logs.
    fn name(&self) -> &'static str;
    fn model(&self) -> &str;
}

pub type DynBackend = Arc<dyn ExtractionBackend>;

/// Structured payload, or a short excerpt when nothing could be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Findings {
    Structured {
        data: serde_json::Value,
        recovered_by: String,
    },
    Degraded {
        excerpt: String,
    },
}

impl Findings {
    pub fn is_structured(&self) -> bool {
        matches!(self, Findings::Structured { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub backend: String,
    pub model: String,
    /// SHA-256 prefix of the prompt; prompts themselves are never stored.
    pub prompt_hash: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub findings: Findings,
    pub provenance: Provenance,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub max_output_tokens: u32,
    pub max_attempts: u32,
    /// First retry waits this long; doubles per attempt.
    pub backoff: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 4_096,
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Longest single wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// `base << (attempt - 1)`, saturating and capped at `MAX_BACKOFF`.
pub fn backoff_for(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Run the backend (with retries on hard failure), then recover structure.
/// A recovery miss is not an error: it yields `Findings::Degraded`.
pub async fn extract_findings(
    backend: &dyn ExtractionBackend,
    prompt: &str,
    opts: ExtractOptions,
) -> Result<ExtractionResult> {
    let prompt_hash = prompt_hash(prompt);
    let max_attempts = opts.max_attempts.max(1);

    let mut attempt: u32 = 0;
    let text = loop {
        attempt += 1;
        counter!("extract_requests_total", "backend" => backend.name()).increment(1);
        match backend.complete(prompt, opts.max_output_tokens).await {
            Ok(text) => break text,
            Err(e) => {
                counter!("extract_failures_total", "backend" => backend.name()).increment(1);
                tracing::warn!(
                    target: "extract",
                    error = %format!("{e:#}"),
                    attempt,
                    max_attempts,
                    %prompt_hash,
                    "extraction call failed"
                );
                if attempt >= max_attempts {
                    return Err(e.context(format!("extraction failed after {attempt} attempt(s)")));
                }
                tokio::time::sleep(backoff_for(opts.backoff, attempt)).await;
            }
        }
    };

    let findings = match recover::recover(&text) {
        Some(r) => Findings::Structured {
            data: r.value,
            recovered_by: r.pass.to_string(),
        },
        None => {
            counter!("extract_recovery_miss_total").increment(1);
            tracing::warn!(target: "extract", %prompt_hash, len = text.len(), "no structure recovered; degrading");
            Findings::Degraded {
                excerpt: sanitize_excerpt(&text, 500),
            }
        }
    };

    tracing::info!(
        target: "extract",
        backend = backend.name(),
        model = backend.model(),
        %prompt_hash,
        attempts = attempt,
        structured = findings.is_structured(),
        "extraction finished"
    );

    Ok(ExtractionResult {
        findings,
        provenance: Provenance {
            backend: backend.name().to_string(),
            model: backend.model().to_string(),
            prompt_hash,
            attempts: attempt,
        },
        produced_at: Utc::now(),
    })
}

pub fn prompt_hash(prompt: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(prompt.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// ASCII-only, single line, at most `max` chars. Collapses whitespace.
pub fn sanitize_excerpt(input: &str, max: usize) -> String {
    let mut out = String::with_capacity(max.min(input.len()));
    let mut prev_space = false;
    for ch in input.chars() {
        let c = match ch {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => ' ',
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= max {
            break;
        }
    }
    out.trim().to_string()
}

// ------------------------------------------------------------
// Non-network backends
// ------------------------------------------------------------

/// Always fails; used when extraction is disabled in config.
pub struct DisabledBackend;

impl ExtractionBackend for DisabledBackend {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
        _max_output_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async { Err(anyhow!("extraction backend is disabled")) })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn model(&self) -> &str {
        "none"
    }
}

/// Returns a fixed text; for tests and local runs.
#[derive(Clone)]
pub struct MockBackend {
    pub fixed: String,
}

impl MockBackend {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

impl ExtractionBackend for MockBackend {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
        _max_output_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
    fn model(&self) -> &str {
        "mock"
    }
}

/// Factory: build a backend according to config and environment.
///
/// * `AI_TEST_MODE=mock` -> deterministic mock
/// * `enabled == false`  -> disabled backend (tasks end in `error`)
/// * otherwise           -> streaming client
pub fn build_backend(cfg: &ExtractionConfig) -> Result<DynBackend> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockBackend::new(
            r#"[{"problem":"mock finding","audience":"tests","evidence":[]}]"#,
        )));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledBackend));
    }
    let client = stream::StreamingClient::new(
        cfg.endpoint.clone(),
        cfg.api_key.clone(),
        cfg.model.clone(),
        Duration::from_secs(cfg.connect_timeout_secs),
        Duration::from_secs(cfg.timeout_secs),
    )?;
    Ok(Arc::new(client))
}
