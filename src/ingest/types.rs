// src/ingest/types.rs
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Default per-call time bound for adapters.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Reddit,
    HackerNews,
    GitHub,
    StackExchange,
    Feed,
    News,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Reddit => "reddit",
            SourceKind::HackerNews => "hacker_news",
            SourceKind::GitHub => "github",
            SourceKind::StackExchange => "stack_exchange",
            SourceKind::Feed => "feed",
            SourceKind::News => "news",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw engagement numbers. Meaning depends on the source:
/// upvotes/comments, points/comments, reactions/comments, views/answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub primary: u64,
    pub secondary: u64,
}

impl Engagement {
    pub fn new(primary: u64, secondary: u64) -> Self {
        Self { primary, secondary }
    }
}

/// Source-specific fields that do not fit the common shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalExtra {
    #[default]
    None,
    Reddit { subreddit: String },
    GitHub { repository: Option<String>, labels: Vec<String> },
    StackExchange { tags: Vec<String>, is_answered: bool },
    Feed { channel: Option<String> },
    Opaque { payload: serde_json::Value },
}

/// One normalized item from an external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Source-prefixed id (`hn:123`); empty when the source gave none.
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub url: Option<String>,
    pub source_kind: SourceKind,
    pub engagement: Engagement,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pain_flags: Vec<String>,
    /// `None` until the scoring engine ran.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub extra: SignalExtra,
}

impl Signal {
    pub fn new(source_kind: SourceKind, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: None,
            url: None,
            source_kind,
            engagement: Engagement::default(),
            created_at: Utc::now(),
            pain_flags: Vec::new(),
            score: None,
            extra: SignalExtra::None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let b = crate::ingest::normalize_text(&body.into(), crate::ingest::MAX_BODY_CHARS);
        self.body = if b.is_empty() { None } else { Some(b) };
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_engagement(mut self, primary: u64, secondary: u64) -> Self {
        self.engagement = Engagement::new(primary, secondary);
        self
    }

    pub fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = ts;
        self
    }

    pub fn with_extra(mut self, extra: SignalExtra) -> Self {
        self.extra = extra;
        self
    }

    /// Identity used for dedup: `id`, or `title` when the id is missing.
    pub fn key(&self) -> &str {
        if self.id.trim().is_empty() {
            &self.title
        } else {
            &self.id
        }
    }

    /// Title and body joined; the text every detector runs against.
    pub fn text(&self) -> String {
        match &self.body {
            Some(b) => format!("{}\n{}", self.title, b),
            None => self.title.clone(),
        }
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }

    /// Consume an unscored signal and return the scored one.
    pub fn scored(mut self, breakdown: &crate::analyze::scoring::ScoreBreakdown) -> Self {
        self.score = Some(breakdown.score);
        self.pain_flags = breakdown.flags.clone();
        self
    }
}

/// What to fetch. `query` narrows the fetch for keyword searches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub limit: usize,
    pub query: Option<String>,
}

impl FetchRequest {
    pub fn latest(limit: usize) -> Self {
        Self { limit, query: None }
    }

    pub fn search(limit: usize, query: impl Into<String>) -> Self {
        Self {
            limit,
            query: Some(query.into()),
        }
    }
}

/// Replies fetched for one signal, keyed by `Signal::key`.
pub type Replies = (String, Vec<String>);

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &'static str;

    fn timeout(&self) -> Duration {
        DEFAULT_PROVIDER_TIMEOUT
    }

    /// Adapter-specific fetch + parse. May fail; callers use `fetch`.
    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>>;

    /// Secondary hop (discussion replies). Default: nothing to enrich.
    async fn fetch_replies(&self, _signals: &[Signal], _max_per_item: usize) -> Vec<Replies> {
        Vec::new()
    }

    /// Isolated fetch: never fails, a dead feed yields an empty vec.
    /// Errors, timeouts and panics inside `try_fetch` all end up empty.
    async fn fetch(&self, req: &FetchRequest) -> Vec<Signal> {
        let t0 = Instant::now();
        let guarded = AssertUnwindSafe(self.try_fetch(req)).catch_unwind();
        let out = match tokio::time::timeout(self.timeout(), guarded).await {
            Ok(Ok(Ok(mut v))) => {
                v.truncate(req.limit);
                v
            }
            Ok(Err(panic)) => {
                tracing::warn!(
                    target: "ingest",
                    provider = self.name(),
                    panic = panic_message(&*panic),
                    "provider panicked"
                );
                counter!("ingest_provider_errors_total", "provider" => self.name()).increment(1);
                Vec::new()
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(target: "ingest", error = ?e, provider = self.name(), "provider error");
                counter!("ingest_provider_errors_total", "provider" => self.name()).increment(1);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    target: "ingest",
                    provider = self.name(),
                    timeout_ms = self.timeout().as_millis() as u64,
                    "provider timed out"
                );
                counter!("ingest_provider_errors_total", "provider" => self.name()).increment(1);
                Vec::new()
            }
        };
        histogram!("ingest_fetch_ms", "provider" => self.name())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }
}
