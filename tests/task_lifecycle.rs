// tests/task_lifecycle.rs
//
// Orchestrator lifecycle against the in-memory store, fixture providers and
// scripted extraction backends.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use demand_radar::extract::{
    DisabledBackend, DynBackend, ExtractOptions, ExtractionBackend, Findings, MockBackend,
};
use demand_radar::ingest::providers::hacker_news::HackerNewsProvider;
use demand_radar::ingest::types::{FetchRequest, Signal, SourceKind, SourceProvider};
use demand_radar::ingest::{Aggregator, AggregatorCfg};
use demand_radar::tasks::model::NewsItem;
use demand_radar::tasks::pipeline::SIGNAL_ARCHIVE_KEY;
use demand_radar::tasks::{
    DriveOutcome, MemoryStore, Orchestrator, Pipeline, PipelineCfg, Record, RecordStore, TaskInput,
    TaskState,
};
use serde_json::{json, Value};

const HN_JSON: &str = r#"{"hits":[
    {"objectID":"1","title":"Ask HN: Tired of chasing invoices, would pay for automation?","points":80,"num_comments":40,"created_at_i":1700000000},
    {"objectID":"2","title":"Show HN: A tiny Lisp","points":300,"num_comments":90,"created_at_i":1700000100}
]}"#;

fn providers() -> Vec<Arc<dyn SourceProvider>> {
    vec![Arc::new(HackerNewsProvider::from_fixture(HN_JSON))]
}

fn fast_cfg() -> PipelineCfg {
    PipelineCfg {
        limit_per_source: 10,
        top_k: 5,
        extract: ExtractOptions {
            backoff: Duration::from_millis(1),
            ..Default::default()
        },
    }
}

fn orchestrator_with(backend: DynBackend, store: Arc<dyn RecordStore>) -> Orchestrator {
    let agg = Aggregator::new(providers(), AggregatorCfg::default());
    let pipeline = Pipeline::new(agg, backend, Arc::clone(&store), fast_cfg());
    Orchestrator::new(store, Arc::new(pipeline))
}

fn mock(text: &str) -> DynBackend {
    Arc::new(MockBackend::new(text))
}

/// Blocks in `complete` until released.
struct Gate {
    open: Arc<AtomicBool>,
}

impl ExtractionBackend for Gate {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
        _max: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let open = Arc::clone(&self.open);
        Box::pin(async move {
            while !open.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok("[{\"problem\":\"gated\"}]".to_string())
        })
    }
    fn name(&self) -> &'static str {
        "gate"
    }
    fn model(&self) -> &str {
        "gate"
    }
}

/// Fails every write that would make a task `done`.
struct NoDoneWrites(MemoryStore);

#[async_trait]
impl RecordStore for NoDoneWrites {
    async fn put(&self, record: Record) -> Result<()> {
        self.0.put(record).await
    }
    async fn put_if(&self, record: Record, field: &str, expected: &Value) -> Result<bool> {
        if record.body["state"] == "done" {
            return Err(anyhow!("disk full"));
        }
        self.0.put_if(record, field, expected).await
    }
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.0.get(collection, id).await
    }
    async fn append_to_list(&self, _key: &str, _value: Value) -> Result<()> {
        Err(anyhow!("archive unavailable"))
    }
    async fn query_recent(&self, c: &str, k: Option<&str>, l: usize) -> Result<Vec<Record>> {
        self.0.query_recent(c, k, l).await
    }
}

/// Refuses every terminal write without erroring, as if another writer
/// had already moved the task out of `running`.
struct StuckRunning(MemoryStore);

#[async_trait]
impl RecordStore for StuckRunning {
    async fn put(&self, record: Record) -> Result<()> {
        self.0.put(record).await
    }
    async fn put_if(&self, record: Record, field: &str, expected: &Value) -> Result<bool> {
        if *expected == "running" {
            return Ok(false);
        }
        self.0.put_if(record, field, expected).await
    }
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.0.get(collection, id).await
    }
    async fn append_to_list(&self, key: &str, value: Value) -> Result<()> {
        self.0.append_to_list(key, value).await
    }
    async fn query_recent(&self, c: &str, k: Option<&str>, l: usize) -> Result<Vec<Record>> {
        self.0.query_recent(c, k, l).await
    }
}

/// An adapter with a bug: indexes past the end of its own results.
struct PanickingProvider;

#[async_trait]
impl SourceProvider for PanickingProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }
    fn name(&self) -> &'static str {
        "panicking"
    }
    async fn try_fetch(&self, _req: &FetchRequest) -> Result<Vec<Signal>> {
        let parsed: Vec<Signal> = Vec::new();
        Ok(vec![parsed[0].clone()])
    }
}

struct PanickingBackend;

fn explode() -> Result<String> {
    panic!("backend exploded")
}

impl ExtractionBackend for PanickingBackend {
    fn complete<'a>(
        &'a self,
        _prompt: &'a str,
        _max: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move { explode() })
    }
    fn name(&self) -> &'static str {
        "panicking"
    }
    fn model(&self) -> &str {
        "panicking"
    }
}

async fn wait_terminal(orch: &Orchestrator, id: &str) -> TaskState {
    for _ in 0..200 {
        let state = orch.poll(id).await.unwrap().unwrap().state;
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never left running");
}

fn snapshot() -> TaskInput {
    TaskInput::MarketSnapshot {
        limit_per_source: None,
        top_k: None,
    }
}

#[tokio::test]
async fn submit_is_pending_and_drive_completes() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator_with(mock(r#"[{"problem":"invoice chasing"}]"#), store.clone());

    let ticket = orch.submit(snapshot()).await.unwrap();
    assert_eq!(ticket.state, TaskState::Pending);
    let before = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(before.state, TaskState::Pending);
    assert!(before.result.is_none());

    let outcome = orch.drive(&ticket.task_id).await.unwrap();
    assert_eq!(outcome, DriveOutcome::Finished(TaskState::Done));

    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(view.state, TaskState::Done);
    assert!(view.completed_at.is_some());
    let result = view.result.expect("done carries a result");
    assert_eq!(result.signals_considered, 2);
    assert_eq!(result.top_signals[0].id, "hn:1");
    assert_eq!(
        result.extraction.findings,
        Findings::Structured {
            data: json!([{"problem": "invoice chasing"}]),
            recovered_by: "as_is".into()
        }
    );

    // raw signals were archived
    assert_eq!(store.list(SIGNAL_ARCHIVE_KEY).unwrap().len(), 2);
}

#[tokio::test]
async fn terminal_polls_are_byte_identical() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(MemoryStore::new()));
    let ticket = orch.submit(snapshot()).await.unwrap();
    orch.drive(&ticket.task_id).await.unwrap();

    let a = serde_json::to_string(&orch.poll(&ticket.task_id).await.unwrap()).unwrap();
    let b = serde_json::to_string(&orch.poll(&ticket.task_id).await.unwrap()).unwrap();
    assert_eq!(a, b);
    assert!(a.contains("\"taskId\""));
}

#[tokio::test]
async fn backend_failure_ends_in_error_with_message() {
    let orch = orchestrator_with(Arc::new(DisabledBackend), Arc::new(MemoryStore::new()));
    let ticket = orch.submit(snapshot()).await.unwrap();

    assert_eq!(
        orch.drive(&ticket.task_id).await.unwrap(),
        DriveOutcome::Finished(TaskState::Error)
    );
    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(view.state, TaskState::Error);
    assert!(view.result.is_none());
    let msg = view.error.unwrap();
    assert!(msg.contains("disabled"), "{msg}");
}

#[tokio::test]
async fn recovery_miss_still_completes_as_degraded() {
    let orch = orchestrator_with(mock("nothing structured, sorry"), Arc::new(MemoryStore::new()));
    let ticket = orch.submit(snapshot()).await.unwrap();
    orch.drive(&ticket.task_id).await.unwrap();

    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(view.state, TaskState::Done);
    assert!(matches!(
        view.result.unwrap().extraction.findings,
        Findings::Degraded { .. }
    ));
}

#[tokio::test]
async fn second_drive_is_skipped() {
    let open = Arc::new(AtomicBool::new(false));
    let orch = orchestrator_with(
        Arc::new(Gate { open: open.clone() }),
        Arc::new(MemoryStore::new()),
    );
    let ticket = orch.submit(snapshot()).await.unwrap();

    let first = {
        let orch = orch.clone();
        let id = ticket.task_id.clone();
        tokio::spawn(async move { orch.drive(&id).await })
    };
    // wait until the first drive holds the task
    while orch.poll(&ticket.task_id).await.unwrap().unwrap().state != TaskState::Running {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(
        orch.drive(&ticket.task_id).await.unwrap(),
        DriveOutcome::Skipped
    );

    open.store(true, Ordering::SeqCst);
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome, DriveOutcome::Finished(TaskState::Done));

    // terminal tasks are never driven again
    assert_eq!(
        orch.drive(&ticket.task_id).await.unwrap(),
        DriveOutcome::Skipped
    );
}

#[tokio::test]
async fn cas_blocks_drivers_sharing_a_store() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let open = Arc::new(AtomicBool::new(true));
    let a = orchestrator_with(Arc::new(Gate { open: open.clone() }), Arc::clone(&store));
    let b = orchestrator_with(Arc::new(Gate { open }), Arc::clone(&store));
    let ticket = a.submit(snapshot()).await.unwrap();

    let (ra, rb) = tokio::join!(a.drive(&ticket.task_id), b.drive(&ticket.task_id));
    let outcomes = [ra.unwrap(), rb.unwrap()];
    let finished = outcomes
        .iter()
        .filter(|o| matches!(o, DriveOutcome::Finished(_)))
        .count();
    assert_eq!(finished, 1, "{outcomes:?}");
}

#[tokio::test]
async fn failed_final_write_turns_into_error() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(NoDoneWrites(MemoryStore::new())));
    let ticket = orch.submit(snapshot()).await.unwrap();

    // archive failures are swallowed; the done write failure is not
    assert_eq!(
        orch.drive(&ticket.task_id).await.unwrap(),
        DriveOutcome::Finished(TaskState::Error)
    );
    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(view.state, TaskState::Error);
    assert!(view.error.unwrap().contains("disk full"));
}

#[tokio::test]
async fn spawned_task_is_observed_monotonically() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(MemoryStore::new()));
    let ticket = orch.submit_and_spawn(snapshot()).await.unwrap();
    assert_eq!(ticket.state, TaskState::Pending);

    let rank = |s: TaskState| match s {
        TaskState::Pending => 0,
        TaskState::Running => 1,
        TaskState::Done | TaskState::Error => 2,
    };
    let mut last = 0;
    for _ in 0..500 {
        let state = orch.poll(&ticket.task_id).await.unwrap().unwrap().state;
        assert!(rank(state) >= last, "state went backwards to {state}");
        last = rank(state);
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, 2, "task never finished");
}

#[tokio::test]
async fn unknown_kind_fails_and_each_submit_gets_a_new_id() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(MemoryStore::new()));
    let input = TaskInput::from_parts("weekly_digest", json!({})).unwrap();
    let a = orch.submit(input.clone()).await.unwrap();
    let b = orch.submit(input).await.unwrap();
    assert_ne!(a.task_id, b.task_id);

    orch.drive(&a.task_id).await.unwrap();
    let view = orch.poll(&a.task_id).await.unwrap().unwrap();
    assert_eq!(view.kind, "weekly_digest");
    assert_eq!(view.state, TaskState::Error);
    assert!(view.error.unwrap().contains("unsupported task kind"));
}

#[tokio::test]
async fn news_batch_and_deep_search_run_their_pipelines() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(MemoryStore::new()));

    let news = orch
        .submit(TaskInput::NewsBatch {
            items: vec![NewsItem {
                id: Some("n1".into()),
                title: "Carriers raise small-business shipping rates".into(),
                body: None,
                url: None,
            }],
        })
        .await
        .unwrap();
    orch.drive(&news.task_id).await.unwrap();
    let view = orch.poll(&news.task_id).await.unwrap().unwrap();
    let result = view.result.unwrap();
    assert_eq!(result.signals_considered, 1);
    assert_eq!(result.top_signals[0].id, "news:n1");

    let search = orch
        .submit(TaskInput::DeepSearch {
            keyword: "INVOICES".into(),
        })
        .await
        .unwrap();
    orch.drive(&search.task_id).await.unwrap();
    let result = orch
        .poll(&search.task_id)
        .await
        .unwrap()
        .unwrap()
        .result
        .unwrap();
    assert_eq!(result.signals_considered, 1);
    assert_eq!(result.top_signals[0].id, "hn:1");
}

#[tokio::test]
async fn list_is_newest_first_without_payloads() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(MemoryStore::new()));
    let first = orch.submit(snapshot()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = orch
        .submit(TaskInput::DeepSearch {
            keyword: "crm".into(),
        })
        .await
        .unwrap();

    let all = orch.list(None, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].task_id, second.task_id);
    assert_eq!(all[1].task_id, first.task_id);

    let only = orch.list(Some("market_snapshot"), Some(0)).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].task_id, first.task_id);
    assert!(!serde_json::to_string(&only).unwrap().contains("result"));
}

#[tokio::test]
async fn panicking_adapter_is_contained_and_task_completes() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let mut sources = providers();
    sources.push(Arc::new(PanickingProvider));
    let agg = Aggregator::new(sources, AggregatorCfg::default());
    let pipeline = Pipeline::new(agg, mock("[1]"), Arc::clone(&store), fast_cfg());
    let orch = Orchestrator::new(store, Arc::new(pipeline));

    let ticket = orch.submit_and_spawn(snapshot()).await.unwrap();
    assert_eq!(wait_terminal(&orch, &ticket.task_id).await, TaskState::Done);
    let result = orch.poll(&ticket.task_id).await.unwrap().unwrap().result.unwrap();
    assert_eq!(result.signals_considered, 2);
}

#[tokio::test]
async fn panicking_backend_ends_in_error() {
    let orch = orchestrator_with(Arc::new(PanickingBackend), Arc::new(MemoryStore::new()));

    let ticket = orch.submit_and_spawn(snapshot()).await.unwrap();
    assert_eq!(wait_terminal(&orch, &ticket.task_id).await, TaskState::Error);
    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert!(view.error.unwrap().contains("backend exploded"));
    assert!(orch.in_flight().is_empty());
}

#[tokio::test]
async fn lost_terminal_write_reports_what_is_stored() {
    let orch = orchestrator_with(mock("[1]"), Arc::new(StuckRunning(MemoryStore::new())));
    let ticket = orch.submit(snapshot()).await.unwrap();

    assert_eq!(orch.drive(&ticket.task_id).await.unwrap(), DriveOutcome::Skipped);
    let view = orch.poll(&ticket.task_id).await.unwrap().unwrap();
    assert_eq!(view.state, TaskState::Running);
}
