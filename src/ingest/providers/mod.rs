// src/ingest/providers/mod.rs
pub mod feed_rss;
pub mod github;
pub mod hacker_news;
pub mod reddit;
pub mod stack_exchange;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ingest::types::FetchRequest;

pub const USER_AGENT: &str = "demand-radar/0.1 (+https://github.com/demand-radar/demand-radar)";

/// Default pause between consecutive secondary-hop calls to one service.
pub const DEFAULT_ENRICH_DELAY: Duration = Duration::from_millis(1_000);

/// Shared client shape for all feed adapters.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "ingest", error = ?e, "falling back to default http client");
            reqwest::Client::new()
        })
}

/// Offline filter used by fixture mode for keyword requests.
pub(crate) fn matches_query(req: &FetchRequest, title: &str, body: &str) -> bool {
    match req.query.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(q) => {
            let q = q.to_lowercase();
            title.to_lowercase().contains(&q) || body.to_lowercase().contains(&q)
        }
    }
}

pub(crate) fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Strip our source prefix (`hn:123` -> `123`) before calling upstream.
pub(crate) fn raw_id<'a>(id: &'a str, prefix: &str) -> &'a str {
    id.strip_prefix(prefix).unwrap_or(id)
}

/// Cap a reply list and normalize each entry; empty entries are dropped.
pub(crate) fn clean_replies<I: IntoIterator<Item = String>>(items: I, max: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|t| crate::ingest::normalize_text(&t, 500))
        .filter(|t| !t.is_empty())
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filter_is_case_insensitive() {
        let req = FetchRequest::search(5, "Invoice");
        assert!(matches_query(&req, "invoice tool?", ""));
        assert!(matches_query(&req, "", "my INVOICES are a mess"));
        assert!(!matches_query(&req, "hello", "world"));
        assert!(matches_query(&FetchRequest::latest(5), "anything", ""));
    }

    #[test]
    fn raw_id_strips_only_known_prefix() {
        assert_eq!(raw_id("hn:42", "hn:"), "42");
        assert_eq!(raw_id("42", "hn:"), "42");
    }
}
