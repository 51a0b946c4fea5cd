use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::providers::{
    clean_replies, http_client, matches_query, raw_id, unix_to_utc, DEFAULT_ENRICH_DELAY,
};
use crate::ingest::types::{
    FetchRequest, Replies, Signal, SignalExtra, SourceKind, SourceProvider,
};

const ID_PREFIX: &str = "reddit:";
pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}
#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}
#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}
#[derive(Debug, Deserialize)]
struct Post {
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: Option<String>,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    created_utc: f64,
}

#[derive(Debug, Deserialize)]
struct CommentListing {
    data: CommentListingData,
}
#[derive(Debug, Deserialize)]
struct CommentListingData {
    #[serde(default)]
    children: Vec<CommentChild>,
}
#[derive(Debug, Deserialize)]
struct CommentChild {
    data: Comment,
}
#[derive(Debug, Deserialize)]
struct Comment {
    body: Option<String>,
}

/// Newest posts from a set of subreddits (`/r/a+b/new.json`).
pub struct RedditProvider {
    mode: Mode,
    subreddits: Vec<String>,
    enrich_delay: Duration,
}

enum Mode {
    Fixture(String),
    Http { base: String, client: reqwest::Client },
}

impl RedditProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            subreddits: Vec::new(),
            enrich_delay: Duration::ZERO,
        }
    }

    pub fn from_url(base: impl Into<String>, subreddits: Vec<String>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                base: base.into(),
                client: http_client(timeout),
            },
            subreddits,
            enrich_delay: DEFAULT_ENRICH_DELAY,
        }
    }

    pub fn with_enrich_delay(mut self, delay: Duration) -> Self {
        self.enrich_delay = delay;
        self
    }

    fn parse_items_from_str(s: &str, req: &FetchRequest) -> Result<Vec<Signal>> {
        let listing: Listing = serde_json::from_str(s).context("parsing reddit listing json")?;
        let mut out = Vec::with_capacity(listing.data.children.len());
        for Child { data: p } in listing.data.children {
            if p.title.trim().is_empty() || !matches_query(req, &p.title, &p.selftext) {
                continue;
            }
            let id = p
                .id
                .filter(|i| !i.is_empty())
                .map(|i| format!("{ID_PREFIX}{i}"))
                .unwrap_or_default();
            let mut sig = Signal::new(SourceKind::Reddit, id, p.title.trim())
                .with_body(p.selftext)
                .with_engagement(p.ups.max(0) as u64, p.num_comments.max(0) as u64)
                .with_created_at(unix_to_utc(p.created_utc as i64))
                .with_extra(SignalExtra::Reddit {
                    subreddit: p.subreddit,
                });
            if let Some(link) = p.permalink {
                sig = sig.with_url(format!("{DEFAULT_BASE_URL}{link}"));
            }
            out.push(sig);
        }
        Ok(out)
    }

    async fn replies_for(
        client: &reqwest::Client,
        base: &str,
        signal: &Signal,
        max: usize,
    ) -> Result<Vec<String>> {
        let url = format!("{base}/comments/{}.json", raw_id(&signal.id, ID_PREFIX));
        let listings: Vec<CommentListing> = client
            .get(url)
            .query(&[("limit", max.to_string()), ("depth", "1".to_string())])
            .send()
            .await
            .context("reddit comments get()")?
            .error_for_status()
            .context("reddit comments status")?
            .json()
            .await
            .context("parsing reddit comments json")?;
        // [0] is the post itself, [1] the top-level comments.
        let comments = listings
            .into_iter()
            .nth(1)
            .map(|l| l.data.children)
            .unwrap_or_default();
        Ok(clean_replies(
            comments.into_iter().filter_map(|c| c.data.body),
            max,
        ))
    }
}

#[async_trait]
impl SourceProvider for RedditProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }

    fn name(&self) -> &'static str {
        "reddit"
    }

    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http { base, client } => {
                let subs = if self.subreddits.is_empty() {
                    "all".to_string()
                } else {
                    self.subreddits.join("+")
                };
                let limit = req.limit.to_string();
                let builder = match req.query.as_deref() {
                    Some(q) => client.get(format!("{base}/r/{subs}/search.json")).query(&[
                        ("q", q),
                        ("restrict_sr", "1"),
                        ("sort", "new"),
                        ("limit", limit.as_str()),
                    ]),
                    None => client
                        .get(format!("{base}/r/{subs}/new.json"))
                        .query(&[("limit", limit.as_str())]),
                };
                let body = builder
                    .send()
                    .await
                    .context("reddit http get()")?
                    .error_for_status()
                    .context("reddit http status")?
                    .text()
                    .await
                    .context("reddit http .text()")?;
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
            match Self::replies_for(client, base, s, max_per_item).await {
                Ok(replies) => out.push((s.key().to_string(), replies)),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, id = %s.id, "reddit replies skipped");
                }
            }
        }
        out
    }
}
