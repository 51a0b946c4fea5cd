// tests/aggregator.rs
//
// Fan-out isolation, dedup and ranking through the public Aggregator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use demand_radar::ingest::types::{FetchRequest, Replies, Signal, SourceKind, SourceProvider};
use demand_radar::ingest::{Aggregator, AggregatorCfg, ScoredBatch};

struct Static {
    kind: SourceKind,
    items: Vec<Signal>,
}

#[async_trait]
impl SourceProvider for Static {
    fn kind(&self) -> SourceKind {
        self.kind
    }
    fn name(&self) -> &'static str {
        "static"
    }
    async fn try_fetch(&self, _req: &FetchRequest) -> Result<Vec<Signal>> {
        Ok(self.items.clone())
    }
    async fn fetch_replies(&self, signals: &[Signal], max: usize) -> Vec<Replies> {
        signals
            .iter()
            .map(|s| (s.key().to_string(), vec![format!("reply to {}", s.title); max]))
            .collect()
    }
}

struct Broken;

#[async_trait]
impl SourceProvider for Broken {
    fn kind(&self) -> SourceKind {
        SourceKind::GitHub
    }
    fn name(&self) -> &'static str {
        "broken"
    }
    async fn try_fetch(&self, _req: &FetchRequest) -> Result<Vec<Signal>> {
        Err(anyhow!("HTTP 503"))
    }
}

struct Hanging;

#[async_trait]
impl SourceProvider for Hanging {
    fn kind(&self) -> SourceKind {
        SourceKind::StackExchange
    }
    fn name(&self) -> &'static str {
        "hanging"
    }
    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }
    async fn try_fetch(&self, _req: &FetchRequest) -> Result<Vec<Signal>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![Signal::new(SourceKind::StackExchange, "se:late", "never seen")])
    }
}

fn reddit() -> Arc<dyn SourceProvider> {
    Arc::new(Static {
        kind: SourceKind::Reddit,
        items: vec![
            Signal::new(SourceKind::Reddit, "reddit:1", "Huge thread about nothing").with_engagement(900, 400),
            Signal::new(SourceKind::Reddit, "reddit:2", "Would pay for a better scheduling tool").with_engagement(3, 1),
            Signal::new(SourceKind::Reddit, "reddit:1", "duplicate id, different title"),
        ],
    })
}

fn hn() -> Arc<dyn SourceProvider> {
    Arc::new(Static {
        kind: SourceKind::HackerNews,
        items: vec![
            Signal::new(SourceKind::HackerNews, "", "Same title twice").with_engagement(10, 0),
            Signal::new(SourceKind::HackerNews, "", "Same title twice").with_engagement(99, 0),
            Signal::new(SourceKind::HackerNews, "hn:7", "Sick of spreadsheets, would pay for anything better")
                .with_engagement(1, 0),
        ],
    })
}

/// Identity + score; timestamps differ between provider instances.
fn shape(batch: &ScoredBatch) -> Vec<(String, Option<f64>)> {
    batch
        .signals
        .iter()
        .map(|s| (s.key().to_string(), s.score))
        .collect()
}

#[tokio::test]
async fn failing_and_slow_providers_do_not_change_output() {
    let req = FetchRequest::latest(10);
    let healthy = Aggregator::new(vec![reddit(), hn()], AggregatorCfg::default());
    let broken: Arc<dyn SourceProvider> = Arc::new(Broken);
    let hanging: Arc<dyn SourceProvider> = Arc::new(Hanging);
    let with_broken = Aggregator::new(
        vec![reddit(), broken, hn(), hanging],
        AggregatorCfg::default(),
    );

    let a = healthy.collect(&req).await;
    let b = with_broken.collect(&req).await;
    assert_eq!(shape(&a), shape(&b));
    assert!(!b.is_empty());
}

#[tokio::test]
async fn dedup_by_id_and_by_title_keeps_first() {
    let agg = Aggregator::new(vec![reddit(), hn()], AggregatorCfg::default());
    let batch = agg.collect(&FetchRequest::latest(10)).await;

    assert_eq!(batch.len(), 4);
    assert_eq!(batch.deduplicated, 2);

    let r1 = batch.signals.iter().find(|s| s.id == "reddit:1").unwrap();
    assert_eq!(r1.title, "Huge thread about nothing");
    let same = batch
        .signals
        .iter()
        .find(|s| s.title == "Same title twice")
        .unwrap();
    assert_eq!(same.engagement.primary, 10);
}

#[tokio::test]
async fn demand_language_outranks_raw_engagement() {
    let agg = Aggregator::new(vec![reddit(), hn()], AggregatorCfg::default());
    let batch = agg.collect(&FetchRequest::latest(10)).await;
    let order: Vec<String> = shape(&batch).into_iter().map(|(k, _)| k).collect();

    // two demand matches, then one, then none (by score)
    assert_eq!(order[0], "hn:7");
    assert_eq!(order[1], "reddit:2");
    assert_eq!(order[2], "reddit:1");
    assert_eq!(order[3], "Same title twice");
    assert!(batch.signals.iter().all(|s| s.is_scored()));
}

#[tokio::test]
async fn enrichment_attaches_replies_without_reordering() {
    let plain = Aggregator::new(vec![reddit(), hn()], AggregatorCfg::default());
    let enriched = Aggregator::new(
        vec![reddit(), hn()],
        AggregatorCfg {
            enrich_top_n: 1,
            replies_per_item: 2,
        },
    );
    let req = FetchRequest::latest(10);
    let a = plain.collect(&req).await;
    let b = enriched.collect(&req).await;

    assert_eq!(shape(&a), shape(&b));
    assert!(a.replies.is_empty());
    // top-1 per provider kind
    assert_eq!(b.replies.len(), 2);
    let top = &b.signals[0];
    assert_eq!(b.replies_for(top).len(), 2);
}

#[tokio::test]
async fn fetch_truncates_to_limit() {
    let p = reddit();
    assert_eq!(p.fetch(&FetchRequest::latest(2)).await.len(), 2);
}
