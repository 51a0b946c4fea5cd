use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::providers::{
    clean_replies, http_client, matches_query, raw_id, unix_to_utc, DEFAULT_ENRICH_DELAY,
};
use crate::ingest::types::{FetchRequest, Replies, Signal, SourceKind, SourceProvider};

const ID_PREFIX: &str = "hn:";
pub const DEFAULT_BASE_URL: &str = "https://hn.algolia.com/api/v1";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: Option<String>,
    title: Option<String>,
    story_text: Option<String>,
    url: Option<String>,
    points: Option<i64>,
    num_comments: Option<i64>,
    #[serde(default)]
    created_at_i: i64,
}

#[derive(Debug, Deserialize)]
struct ItemResp {
    #[serde(default)]
    children: Vec<ItemChild>,
}

#[derive(Debug, Deserialize)]
struct ItemChild {
    text: Option<String>,
}

/// Hacker News stories and Ask HN posts via the Algolia search API.
pub struct HackerNewsProvider {
    mode: Mode,
    enrich_delay: Duration,
}

enum Mode {
    Fixture(String),
    Http { base: String, client: reqwest::Client },
}

impl HackerNewsProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            enrich_delay: Duration::ZERO,
        }
    }

    pub fn from_url(base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                base: base.into(),
                client: http_client(timeout),
            },
            enrich_delay: DEFAULT_ENRICH_DELAY,
        }
    }

    pub fn with_enrich_delay(mut self, delay: Duration) -> Self {
        self.enrich_delay = delay;
        self
    }

    fn parse_items_from_str(s: &str, req: &FetchRequest) -> Result<Vec<Signal>> {
        let resp: SearchResp = serde_json::from_str(s).context("parsing hn search json")?;
        let mut out = Vec::with_capacity(resp.hits.len());
        for h in resp.hits {
            let title = h.title.unwrap_or_default();
            let text = h.story_text.unwrap_or_default();
            if title.trim().is_empty() || !matches_query(req, &title, &text) {
                continue;
            }
            let id = h
                .object_id
                .map(|i| format!("{ID_PREFIX}{i}"))
                .unwrap_or_default();
            let mut sig = Signal::new(SourceKind::HackerNews, id.clone(), title.trim())
                .with_body(text)
                .with_engagement(
                    h.points.unwrap_or(0).max(0) as u64,
                    h.num_comments.unwrap_or(0).max(0) as u64,
                )
                .with_created_at(unix_to_utc(h.created_at_i));
            // Ask HN posts have no external url; link the discussion instead.
            let link = h.url.filter(|u| !u.is_empty()).or_else(|| {
                (!id.is_empty()).then(|| {
                    format!(
                        "https://news.ycombinator.com/item?id={}",
                        raw_id(&id, ID_PREFIX)
                    )
                })
            });
            if let Some(link) = link {
                sig = sig.with_url(link);
            }
            out.push(sig);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for HackerNewsProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::HackerNews
    }

    fn name(&self) -> &'static str {
        "hacker_news"
    }

    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http { base, client } => {
                let limit = req.limit.to_string();
                let query = req.query.clone().unwrap_or_default();
                let body = client
                    .get(format!("{base}/search_by_date"))
                    .query(&[
                        ("tags", "(story,ask_hn)"),
                        ("hitsPerPage", limit.as_str()),
                        ("query", query.as_str()),
                    ])
                    .send()
                    .await
                    .context("hn http get()")?
                    .error_for_status()
                    .context("hn http status")?
                    .text()
                    .await
                    .context("hn http .text()")?;
                Self::parse_items_from_str(&body, req)
            }
        }
    }

    async fn fetch_replies(&self, signals: &[Signal], max_per_item: usize) -> Vec<Replies> {
        let Mode::Http { base, client } = &self.mode else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (i, s) in signals.iter().filter(|s| !s.id.is_empty()).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.enrich_delay).await;
            }
            let url = format!("{base}/items/{}", raw_id(&s.id, ID_PREFIX));
            let res: Result<ItemResp> = async move {
                client
                    .get(url)
                    .send()
                    .await
                    .context("hn item get()")?
                    .error_for_status()
                    .context("hn item status")?
                    .json()
                    .await
                    .context("parsing hn item json")
            }
            .await;
            match res {
                Ok(item) => {
                    let replies = clean_replies(
                        item.children.into_iter().filter_map(|c| c.text),
                        max_per_item,
                    );
                    out.push((s.key().to_string(), replies));
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, id = %s.id, "hn replies skipped");
                }
            }
        }
        out
    }
}
