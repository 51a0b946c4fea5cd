// src/config/sources.rs
//! Source + pipeline settings (`config/sources.toml`).
//!
//! Every section is optional; a missing file yields the defaults below.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ingest::providers::{
    feed_rss::FeedRssProvider, github, github::GitHubIssuesProvider, hacker_news,
    hacker_news::HackerNewsProvider, reddit, reddit::RedditProvider, stack_exchange,
    stack_exchange::StackExchangeProvider,
};
use crate::ingest::types::SourceProvider;
use crate::ingest::AggregatorCfg;

pub const DEFAULT_SOURCES_CONFIG_PATH: &str = "config/sources.toml";
pub const ENV_SOURCES_CONFIG_PATH: &str = "SOURCES_CONFIG_PATH";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub pipeline: PipelineSection,
    pub reddit: RedditSection,
    pub hacker_news: HackerNewsSection,
    pub github: GitHubSection,
    pub stack_exchange: StackExchangeSection,
    pub feeds: FeedsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub limit_per_source: usize,
    /// Signals handed to the extraction prompt.
    pub top_k: usize,
    pub enrich_top_n: usize,
    pub replies_per_item: usize,
    pub timeout_secs: u64,
    /// Bounded list used for raw signal archival.
    pub archive_cap: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            limit_per_source: 50,
            top_k: 25,
            enrich_top_n: 3,
            replies_per_item: 5,
            timeout_secs: 10,
            archive_cap: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditSection {
    pub enabled: bool,
    pub base_url: String,
    pub subreddits: Vec<String>,
    pub enrich_delay_ms: u64,
}

impl Default for RedditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: reddit::DEFAULT_BASE_URL.to_string(),
            subreddits: vec![
                "smallbusiness".into(),
                "SaaS".into(),
                "Entrepreneur".into(),
            ],
            enrich_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HackerNewsSection {
    pub enabled: bool,
    pub base_url: String,
    pub enrich_delay_ms: u64,
}

impl Default for HackerNewsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: hacker_news::DEFAULT_BASE_URL.to_string(),
            enrich_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub enabled: bool,
    pub base_url: String,
    pub query: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: github::DEFAULT_BASE_URL.to_string(),
            query: github::DEFAULT_QUERY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StackExchangeSection {
    pub enabled: bool,
    pub base_url: String,
    pub site: String,
}

impl Default for StackExchangeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: stack_exchange::DEFAULT_BASE_URL.to_string(),
            site: "superuser".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedsSection {
    pub urls: Vec<String>,
}

impl SourcesConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading sources config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing sources config {}", path.display()))
    }

    /// Load using env var + fallback:
    /// 1) $SOURCES_CONFIG_PATH (must exist)
    /// 2) config/sources.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            anyhow::ensure!(
                pb.exists(),
                "{ENV_SOURCES_CONFIG_PATH} points to non-existent path"
            );
            return Self::load_from_file(&pb);
        }
        let default = PathBuf::from(DEFAULT_SOURCES_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        Ok(Self::default())
    }

    pub fn aggregator_cfg(&self) -> AggregatorCfg {
        AggregatorCfg {
            enrich_top_n: self.pipeline.enrich_top_n,
            replies_per_item: self.pipeline.replies_per_item,
        }
    }

    /// Live HTTP providers for every enabled section.
    pub fn build_providers(&self) -> Vec<Arc<dyn SourceProvider>> {
        let timeout = Duration::from_secs(self.pipeline.timeout_secs.max(1));
        let mut out: Vec<Arc<dyn SourceProvider>> = Vec::new();

        if self.reddit.enabled {
            out.push(Arc::new(
                RedditProvider::from_url(
                    self.reddit.base_url.clone(),
                    self.reddit.subreddits.clone(),
                    timeout,
                )
                .with_enrich_delay(Duration::from_millis(self.reddit.enrich_delay_ms)),
            ));
        }
        if self.hacker_news.enabled {
            out.push(Arc::new(
                HackerNewsProvider::from_url(self.hacker_news.base_url.clone(), timeout)
                    .with_enrich_delay(Duration::from_millis(self.hacker_news.enrich_delay_ms)),
            ));
        }
        if self.github.enabled {
            out.push(Arc::new(GitHubIssuesProvider::from_url(
                self.github.base_url.clone(),
                self.github.query.clone(),
                std::env::var(ENV_GITHUB_TOKEN).ok(),
                timeout,
            )));
        }
        if self.stack_exchange.enabled {
            out.push(Arc::new(StackExchangeProvider::from_url(
                self.stack_exchange.base_url.clone(),
                self.stack_exchange.site.clone(),
                timeout,
            )));
        }
        for url in &self.feeds.urls {
            out.push(Arc::new(FeedRssProvider::from_url(url.clone(), timeout)));
        }
        out
    }
}
