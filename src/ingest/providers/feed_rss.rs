use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::providers::{http_client, matches_query};
use crate::ingest::types::{FetchRequest, Signal, SignalExtra, SourceKind, SourceProvider};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// RSS 2.0 news feed. Feeds carry no engagement numbers, so every item sits
/// on the base floor and ranks purely on its text.
pub struct FeedRssProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl FeedRssProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                url: url.into(),
                client: http_client(timeout),
            },
        }
    }

    fn parse_items_from_str(s: &str, req: &FetchRequest) -> Result<Vec<Signal>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
        let channel = rss.channel.title.clone();

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = crate::ingest::normalize_text(it.title.as_deref().unwrap_or_default(), 300);
            if title.is_empty() {
                continue;
            }
            let description = it.description.unwrap_or_default();
            if !matches_query(req, &title, &description) {
                continue;
            }

            let id = it
                .guid
                .or_else(|| it.link.clone())
                .map(|g| format!("feed:{g}"))
                .unwrap_or_default();
            let mut sig = Signal::new(SourceKind::Feed, id, title)
                .with_body(description)
                .with_extra(SignalExtra::Feed {
                    channel: channel.clone(),
                });
            if let Some(ts) = it.pub_date.as_deref().and_then(parse_rfc2822) {
                sig = sig.with_created_at(ts);
            }
            if let Some(link) = it.link {
                sig = sig.with_url(link);
            }
            out.push(sig);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for FeedRssProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn name(&self) -> &'static str {
        "feed"
    }

    async fn try_fetch(&self, req: &FetchRequest) -> Result<Vec<Signal>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url.as_str())
                    .send()
                    .await
                    .context("feed http get()")?
                    .error_for_status()
                    .context("feed http status")?;
                let body = resp.text().await.context("feed http .text()")?;
                Self::parse_items_from_str(&body, req)
            }
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
