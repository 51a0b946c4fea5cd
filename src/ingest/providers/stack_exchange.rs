use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::providers::{http_client, matches_query, unix_to_utc};
use crate::ingest::types::{FetchRequest, Signal, SignalExtra, SourceKind, SourceProvider};

const ID_PREFIX: &str = "se:";
pub const DEFAULT_BASE_URL: &str = "https://api.stackexchange.com/2.3";

#[derive(Debug, Deserialize)]
struct Wrapper {
    #[serde(default)]
    items: Vec<Question>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Question {
    question_id: Option<u64>,
    #[serde(default)]
    title: String,
    body: Option<String>,
    link: Option<String>,
    #[serde(default)]
    view_count: u64,
    #[serde(default)]
    answer_count: u64,
    #[serde(default)]
    creation_date: i64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    is_answered: bool,
}

/// Newest questions from one Stack Exchange site.
pub struct StackExchangeProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base: String,
        site: String,
        client: reqwest::Client,
    },
}

impl StackExchangeProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(base: impl Into<String>, site: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                base: base.into(),
                site: site.into(),
                client: http_client(timeout),
            },
        }
    }

    fn parse_items_from_str(s: &str, req: &FetchRequest) -> Result<Vec<Signal>> {
        let w: Wrapper = serde_json::from_str(s).context("parsing stack exchange json")?;
        if let Some(msg) = w.error_message {
            anyhow::bail!("stack exchange api error: {msg}");
        }
        let mut out = Vec::with_capacity(w.items.len());
        for q in w.items {
            let body = q.body.unwrap_or_default();
            // Titles arrive HTML-escaped.
            let title = crate::ingest::normalize_text(&q.title, 300);
            if title.is_empty() || !matches_query(req, &title, &body) {
                continue;
            }
            let id = q
                .question_id
                .map(|i| format!("{ID_PREFIX}{i}"))
                .unwrap_or_default();
            let mut sig = Signal::new(SourceKind::StackExchange, id, title)
                .with_body(body)
                .with_engagement(q.view_count, q.answer_count)
                .with_created_at(unix_to_utc(q.creation_date))
                .with_extra(SignalExtra::StackExchange {
                    tags: q.tags,
                    is_answered: q.is_answered,
                });
            if let Some(link) = q.link {
                sig = sig.with_url(link);
            }
            out.push(sig);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for StackExchangeProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::StackExchange
    }

    fn name(&self) -> &'static str {
        "stack_exchange"
    }

    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http { base, site, client } => {
                let pagesize = req.limit.min(100).to_string();
                let mut params = vec![
                    ("order", "desc"),
                    ("sort", "creation"),
                    ("site", site.as_str()),
                    ("pagesize", pagesize.as_str()),
                    ("filter", "withbody"),
                ];
                let path = match req.query.as_deref() {
                    Some(q) => {
                        params.push(("q", q));
                        "search/advanced"
                    }
                    None => "questions",
                };
                let body = client
                    .get(format!("{base}/{path}"))
                    .query(&params)
                    .send()
                    .await
                    .context("stack exchange http get()")?
                    .error_for_status()
                    .context("stack exchange http status")?
                    .text()
                    .await
                    .context("stack exchange http .text()")?;
                Self::parse_items_from_str(&body, req)
            }
        }
    }
}
