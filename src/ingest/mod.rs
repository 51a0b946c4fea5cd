// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::analyze::{detectors, scoring};
use crate::ingest::types::{panic_message, FetchRequest, Signal, SourceKind, SourceProvider};

/// Body length cap after normalization.
pub const MAX_BODY_CHARS: usize = 1500;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_signals_total", "Signals returned by providers.");
        describe_counter!("ingest_dedup_total", "Signals removed by deduplication.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors and timeouts."
        );
        describe_histogram!("ingest_fetch_ms", "Per-provider fetch time in milliseconds.");
        describe_histogram!("ingest_collect_ms", "Full fan-out time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when collection last ran.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

/// Keep the first signal per `Signal::key`. Returns (kept, removed).
pub fn dedup_signals(signals: Vec<Signal>) -> (Vec<Signal>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(signals.len());
    let mut removed = 0usize;
    for s in signals {
        if !seen.insert(s.key().to_string()) {
            removed += 1;
            continue;
        }
        keep.push(s);
    }
    (keep, removed)
}

/// Score every signal, then order by demand matches desc, score desc.
/// Stable: equal keys keep merge order.
pub fn rank_signals(signals: Vec<Signal>) -> Vec<Signal> {
    let mut ranked: Vec<(usize, Signal)> = signals
        .into_iter()
        .map(|s| {
            let demand = detectors::demand_matches(&s.text());
            let breakdown = scoring::score(&s);
            (demand, s.scored(&breakdown))
        })
        .collect();

    ranked.sort_by(|(da, a), (db, b)| {
        db.cmp(da).then_with(|| {
            b.score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0))
        })
    });
    ranked.into_iter().map(|(_, s)| s).collect()
}

/// Ranked output of one aggregation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoredBatch {
    pub signals: Vec<Signal>,
    /// Discussion replies keyed by `Signal::key`; never affects rank.
    pub replies: HashMap<String, Vec<String>>,
    pub deduplicated: usize,
}

impl ScoredBatch {
    pub fn top(&self, k: usize) -> &[Signal] {
        &self.signals[..k.min(self.signals.len())]
    }

    pub fn replies_for(&self, signal: &Signal) -> &[String] {
        self.replies
            .get(signal.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorCfg {
    /// How many top-ranked signals per source kind get replies attached.
    pub enrich_top_n: usize,
    pub replies_per_item: usize,
}

impl Default for AggregatorCfg {
    fn default() -> Self {
        Self {
            enrich_top_n: 0,
            replies_per_item: 5,
        }
    }
}

/// Fans out to all providers, merges, dedups, scores, ranks.
#[derive(Clone)]
pub struct Aggregator {
    providers: Vec<Arc<dyn SourceProvider>>,
    cfg: AggregatorCfg,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn SourceProvider>>, cfg: AggregatorCfg) -> Self {
        Self { providers, cfg }
    }

    pub fn providers(&self) -> &[Arc<dyn SourceProvider>] {
        &self.providers
    }

    /// Aggregator over a subset of providers (e.g. feeds only).
    pub fn only(&self, kinds: &[SourceKind]) -> Self {
        Self {
            providers: self
                .providers
                .iter()
                .filter(|p| kinds.contains(&p.kind()))
                .cloned()
                .collect(),
            cfg: self.cfg,
        }
    }

    /// Concurrent fetch from every provider; waits for all to settle.
    pub async fn collect(&self, req: &FetchRequest) -> ScoredBatch {
        ensure_metrics_described();
        let t0 = Instant::now();

        let fetches = self.providers.iter().map(|p| p.fetch(req));
        let results: Vec<Vec<Signal>> = join_all(fetches).await;

        let merged: Vec<Signal> = results.into_iter().flatten().collect();
        counter!("ingest_signals_total").increment(merged.len() as u64);

        let mut batch = Self::rank(merged);
        if self.cfg.enrich_top_n > 0 {
            batch.replies = self.enrich(&batch.signals).await;
        }

        let now = chrono::Utc::now().timestamp().max(0);
        histogram!("ingest_collect_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("ingest_last_run_ts").set(now as f64);

        tracing::info!(
            target: "ingest",
            providers = self.providers.len(),
            kept = batch.len(),
            dedup = batch.deduplicated,
            enriched = batch.replies.len(),
            query = ?req.query,
            "collect finished"
        );
        batch
    }

    /// Dedup + score + rank caller-supplied signals.
    pub fn rank(signals: Vec<Signal>) -> ScoredBatch {
        let (unique, removed) = dedup_signals(signals);
        counter!("ingest_dedup_total").increment(removed as u64);
        ScoredBatch {
            signals: rank_signals(unique),
            replies: HashMap::new(),
            deduplicated: removed,
        }
    }

    /// Attach replies for the top-N of each provider's kind. Providers run
    /// concurrently; each provider paces its own calls.
    async fn enrich(&self, ranked: &[Signal]) -> HashMap<String, Vec<String>> {
        let n = self.cfg.enrich_top_n;
        let per_item = self.cfg.replies_per_item;
        let jobs = self.providers.iter().map(|p| {
            let top: Vec<Signal> = ranked
                .iter()
                .filter(|s| s.source_kind == p.kind())
                .take(n)
                .cloned()
                .collect();
            let p = Arc::clone(p);
            async move {
                if top.is_empty() {
                    return Vec::new();
                }
                match AssertUnwindSafe(p.fetch_replies(&top, per_item)).catch_unwind().await {
                    Ok(replies) => replies,
                    Err(panic) => {
                        tracing::warn!(
                            target: "ingest",
                            provider = p.name(),
                            panic = panic_message(&*panic),
                            "reply enrichment panicked"
                        );
                        counter!("ingest_provider_errors_total", "provider" => p.name()).increment(1);
                        Vec::new()
                    }
                }
            }
        });

        join_all(jobs)
            .await
            .into_iter()
            .flatten()
            .filter(|(_, replies)| !replies.is_empty())
            .collect()
    }
}
