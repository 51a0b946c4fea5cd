// src/tasks/pipeline.rs
//! Kind-specific pipelines: collect -> archive -> prompt -> extract -> assemble.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;

use crate::analyze::prompt::{build_prompt, PromptFocus};
use crate::extract::{extract_findings, DynBackend, ExtractOptions};
use crate::ingest::types::{FetchRequest, SourceKind};
use crate::ingest::{Aggregator, ScoredBatch};
use crate::tasks::model::{NewsItem, SignalSummary, TaskInput, TaskResult};
use crate::tasks::store::RecordStore;

/// List key for raw signal archival.
pub const SIGNAL_ARCHIVE_KEY: &str = "signals:archive";

#[derive(Debug, Clone, Copy)]
pub struct PipelineCfg {
    pub limit_per_source: usize,
    pub top_k: usize,
    pub extract: ExtractOptions,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            limit_per_source: 50,
            top_k: 25,
            extract: ExtractOptions::default(),
        }
    }
}

pub struct Pipeline {
    aggregator: Aggregator,
    backend: DynBackend,
    store: Arc<dyn RecordStore>,
    cfg: PipelineCfg,
}

impl Pipeline {
    pub fn new(
        aggregator: Aggregator,
        backend: DynBackend,
        store: Arc<dyn RecordStore>,
        cfg: PipelineCfg,
    ) -> Self {
        Self {
            aggregator,
            backend,
            store,
            cfg,
        }
    }

    pub fn cfg(&self) -> &PipelineCfg {
        &self.cfg
    }

    /// Any `Err` here ends the task in `error`; nothing partial is kept.
    pub async fn run(&self, input: &TaskInput) -> Result<TaskResult> {
        match input {
            TaskInput::MarketSnapshot {
                limit_per_source,
                top_k,
            } => {
                let limit = limit_per_source.unwrap_or(self.cfg.limit_per_source);
                let batch = self.aggregator.collect(&FetchRequest::latest(limit)).await;
                self.archive(&batch, "market_snapshot").await;
                self.extract(
                    PromptFocus::MarketSnapshot,
                    batch,
                    top_k.unwrap_or(self.cfg.top_k),
                )
                .await
            }
            TaskInput::NewsBatch { items } => {
                let batch = if items.is_empty() {
                    self.aggregator
                        .only(&[SourceKind::Feed])
                        .collect(&FetchRequest::latest(self.cfg.limit_per_source))
                        .await
                } else {
                    Aggregator::rank(items.iter().cloned().map(NewsItem::into_signal).collect())
                };
                self.archive(&batch, "news_batch").await;
                self.extract(PromptFocus::NewsBatch, batch, self.cfg.top_k)
                    .await
            }
            TaskInput::DeepSearch { keyword } => {
                let keyword = keyword.trim();
                if keyword.is_empty() {
                    bail!("deep_search needs a non-empty keyword");
                }
                let req = FetchRequest::search(self.cfg.limit_per_source, keyword);
                let mut batch = self.aggregator.collect(&req).await;
                let needle = keyword.to_lowercase();
                batch
                    .signals
                    .retain(|s| s.text().to_lowercase().contains(&needle));
                self.archive(&batch, "deep_search").await;
                self.extract(
                    PromptFocus::DeepSearch {
                        keyword: keyword.to_string(),
                    },
                    batch,
                    self.cfg.top_k,
                )
                .await
            }
            TaskInput::Opaque { kind, .. } => bail!("unsupported task kind: {kind}"),
        }
    }

    async fn extract(
        &self,
        focus: PromptFocus,
        batch: ScoredBatch,
        top_k: usize,
    ) -> Result<TaskResult> {
        let prompt = build_prompt(&focus, &batch, top_k);
        let extraction = extract_findings(&*self.backend, &prompt, self.cfg.extract).await?;
        Ok(TaskResult {
            extraction,
            signals_considered: batch.len(),
            top_signals: batch.top(top_k).iter().map(SignalSummary::from).collect(),
        })
    }

    /// Best effort: a failed archive write never fails the task.
    async fn archive(&self, batch: &ScoredBatch, origin: &str) {
        for s in &batch.signals {
            let entry = json!({ "origin": origin, "signal": s });
            if let Err(e) = self.store.append_to_list(SIGNAL_ARCHIVE_KEY, entry).await {
                tracing::warn!(target: "tasks", error = %format!("{e:#}"), origin, "signal archive write failed");
                return;
            }
        }
    }
}
