use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ingest::providers::{http_client, matches_query};
use crate::ingest::types::{FetchRequest, Signal, SignalExtra, SourceKind, SourceProvider};

const ID_PREFIX: &str = "gh:";
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
/// Base filter; a deep-search keyword is prepended to it.
pub const DEFAULT_QUERY: &str = "is:issue is:open label:\"feature request\"";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    body: Option<String>,
    html_url: Option<String>,
    repository_url: Option<String>,
    #[serde(default)]
    comments: u64,
    reactions: Option<Reactions>,
    created_at: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Reactions {
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: Option<String>,
}

/// Open issues from the GitHub search API.
pub struct GitHubIssuesProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base: String,
        query: String,
        token: Option<String>,
        client: reqwest::Client,
    },
}

impl GitHubIssuesProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(
        base: impl Into<String>,
        query: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            mode: Mode::Http {
                base: base.into(),
                query: query.into(),
                token: token.filter(|t| !t.trim().is_empty()),
                client: http_client(timeout),
            },
        }
    }

    fn parse_items_from_str(s: &str, req: &FetchRequest) -> Result<Vec<Signal>> {
        let resp: SearchResp = serde_json::from_str(s).context("parsing github search json")?;
        let mut out = Vec::with_capacity(resp.items.len());
        for it in resp.items {
            let body = it.body.unwrap_or_default();
            if it.title.trim().is_empty() || !matches_query(req, &it.title, &body) {
                continue;
            }
            let id = it.id.map(|i| format!("{ID_PREFIX}{i}")).unwrap_or_default();
            let repository = it
                .repository_url
                .as_deref()
                .and_then(|u| u.split("/repos/").nth(1))
                .map(str::to_string);
            let labels = it.labels.into_iter().filter_map(|l| l.name).collect();
            let mut sig = Signal::new(SourceKind::GitHub, id, it.title.trim())
                .with_body(body)
                .with_engagement(it.reactions.map(|r| r.total_count).unwrap_or(0), it.comments)
                .with_extra(SignalExtra::GitHub { repository, labels });
            if let Some(ts) = it
                .created_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            {
                sig = sig.with_created_at(ts.with_timezone(&Utc));
            }
            if let Some(url) = it.html_url {
                sig = sig.with_url(url);
            }
            out.push(sig);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for GitHubIssuesProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::GitHub
    }

    fn name(&self) -> &'static str {
        "github"
    }

    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http {
                base,
                query,
                token,
                client,
            } => {
                let q = match req.query.as_deref() {
                    Some(k) => format!("{k} {query}"),
                    None => query.clone(),
                };
                let per_page = req.limit.min(100).to_string();
                let mut builder = client
                    .get(format!("{base}/search/issues"))
                    .header("Accept", "application/vnd.github+json")
                    .query(&[
                        ("q", q.as_str()),
                        ("sort", "created"),
                        ("order", "desc"),
                        ("per_page", per_page.as_str()),
                    ]);
                if let Some(t) = token {
                    builder = builder.bearer_auth(t);
                }
                let body = builder
                    .send()
                    .await
                    .context("github http get()")?
                    .error_for_status()
                    .context("github http status")?
                    .text()
                    .await
                    .context("github http .text()")?;
                Self::parse_items_from_str(&body, req)
            }
        }
    }
}
