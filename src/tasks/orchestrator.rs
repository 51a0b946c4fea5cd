// src/tasks/orchestrator.rs
//! Task lifecycle: submit (non-blocking), drive (once per id), poll, list.
//!
//! Exclusivity of `drive` has two layers:
//! - `InFlight`: an orchestrator-owned set of ids currently being driven
//! - the store's compare-and-set on `state` (pending -> running), which also
//!   holds across orchestrator instances sharing one store

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use crate::ingest::types::panic_message;
use crate::tasks::model::{Task, TaskInput, TaskState, TaskSummary, TaskTicket, TaskView};
use crate::tasks::pipeline::Pipeline;
use crate::tasks::store::{Record, RecordStore};

pub const TASKS_COLLECTION: &str = "tasks";
pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tasks_submitted_total", "Tasks accepted by submit.");
        describe_counter!("tasks_completed_total", "Tasks that reached a terminal state.");
        describe_counter!("tasks_drive_skipped_total", "Drive attempts that lost the claim.");
    });
}

/// Ids currently being driven by this orchestrator.
#[derive(Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Claim `id`; `None` if someone already holds it. Released on drop.
    pub fn try_claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.0.lock().unwrap_or_else(|p| p.into_inner());
        set.insert(id.to_string()).then(|| InFlightGuard {
            owner: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InFlightGuard {
    owner: InFlight,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.owner.0.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.id);
    }
}

/// How a `drive` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// This call ran the pipeline; the store now holds the given terminal state.
    Finished(TaskState),
    /// Another driver holds the task, or it already left `pending`.
    Skipped,
}

fn to_record(task: &Task) -> Result<Record> {
    Ok(Record {
        id: task.id.clone(),
        collection: TASKS_COLLECTION.to_string(),
        kind: task.input.label().to_string(),
        created_at: task.created_at,
        body: serde_json::to_value(task).context("serializing task")?,
    })
}

fn from_record(record: Record) -> Result<Task> {
    serde_json::from_value(record.body)
        .with_context(|| format!("decoding task record {}", record.id))
}

fn state_value(state: TaskState) -> Value {
    json!(state.as_str())
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    pipeline: Arc<Pipeline>,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, pipeline: Arc<Pipeline>) -> Self {
        ensure_metrics_described();
        Self {
            store,
            pipeline,
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Persist a new pending task and return its ticket. Never runs work.
    pub async fn submit(&self, input: TaskInput) -> Result<TaskTicket> {
        let task = Task::new(input);
        self.store
            .put(to_record(&task)?)
            .await
            .context("persisting new task")?;
        counter!("tasks_submitted_total", "kind" => task.kind.as_str()).increment(1);
        tracing::info!(target: "tasks", task_id = %task.id, kind = task.input.label(), "task submitted");
        Ok(TaskTicket {
            task_id: task.id,
            state: task.state,
        })
    }

    /// `submit`, then drive on the runtime without awaiting it.
    pub async fn submit_and_spawn(&self, input: TaskInput) -> Result<TaskTicket> {
        let ticket = self.submit(input).await?;
        let this = self.clone();
        let id = ticket.task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.drive(&id).await {
                tracing::error!(target: "tasks", task_id = %id, error = %format!("{e:#}"), "drive failed");
            }
        });
        Ok(ticket)
    }

    /// Run the pipeline for `id` at most once.
    ///
    /// `Err` only for store/decoding problems before the task could be
    /// claimed; pipeline failures end up in the task as `error`.
    pub async fn drive(&self, id: &str) -> Result<DriveOutcome> {
        let Some(_guard) = self.in_flight.try_claim(id) else {
            counter!("tasks_drive_skipped_total").increment(1);
            tracing::debug!(target: "tasks", task_id = %id, "already in flight");
            return Ok(DriveOutcome::Skipped);
        };

        let record = self
            .store
            .get(TASKS_COLLECTION, id)
            .await?
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        let task = from_record(record)?;
        if task.state != TaskState::Pending {
            return Ok(DriveOutcome::Skipped);
        }

        let running = task.start()?;
        let claimed = self
            .store
            .put_if(to_record(&running)?, "state", &state_value(TaskState::Pending))
            .await
            .context("claiming task")?;
        if !claimed {
            counter!("tasks_drive_skipped_total").increment(1);
            tracing::debug!(target: "tasks", task_id = %id, "lost pending->running claim");
            return Ok(DriveOutcome::Skipped);
        }
        tracing::info!(target: "tasks", task_id = %id, kind = running.input.label(), "task running");

        let run = AssertUnwindSafe(self.pipeline.run(&running.input)).catch_unwind();
        let terminal = match run.await {
            Ok(Ok(result)) => running.complete(result)?,
            Ok(Err(e)) => running.fail(format!("{e:#}"))?,
            Err(panic) => {
                let msg = panic_message(&*panic).to_string();
                tracing::error!(target: "tasks", task_id = %id, panic = %msg, "pipeline panicked");
                running.fail(format!("task panicked: {msg}"))?
            }
        };
        let outcome = self.persist_terminal(&running, terminal).await;
        if let DriveOutcome::Finished(state) = outcome {
            counter!("tasks_completed_total", "state" => state.as_str()).increment(1);
        }
        Ok(outcome)
    }

    /// Write the terminal record (CAS on `running`). A failed `done` write is
    /// retried once as `error` carrying the persistence message. Reports the
    /// state that is actually stored, or `Skipped` when that is unknown.
    async fn persist_terminal(&self, running: &Task, terminal: Task) -> DriveOutcome {
        let expected = state_value(TaskState::Running);
        let attempt = async {
            let wrote = self
                .store
                .put_if(to_record(&terminal)?, "state", &expected)
                .await?;
            anyhow::ensure!(wrote, "task left running state unexpectedly");
            Ok::<_, anyhow::Error>(())
        };

        match attempt.await {
            Ok(()) => {
                tracing::info!(
                    target: "tasks",
                    task_id = %terminal.id,
                    state = %terminal.state,
                    error = terminal.error.as_deref().unwrap_or(""),
                    "task finished"
                );
                DriveOutcome::Finished(terminal.state)
            }
            Err(e) => {
                tracing::warn!(target: "tasks", task_id = %terminal.id, error = %format!("{e:#}"), "terminal write failed");
                let fallback = match running.fail(format!("persisting task result failed: {e:#}")) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(target: "tasks", error = %format!("{e:#}"), "cannot build error state");
                        return self.stored_outcome(&running.id).await;
                    }
                };
                let wrote = match to_record(&fallback) {
                    Ok(r) => self.store.put_if(r, "state", &expected).await,
                    Err(e) => Err(e),
                };
                match wrote {
                    Ok(true) => DriveOutcome::Finished(TaskState::Error),
                    Ok(false) => {
                        tracing::warn!(target: "tasks", task_id = %fallback.id, "error state lost the running CAS");
                        self.stored_outcome(&running.id).await
                    }
                    Err(e) => {
                        tracing::error!(target: "tasks", task_id = %fallback.id, error = %format!("{e:#}"), "error state write failed");
                        self.stored_outcome(&running.id).await
                    }
                }
            }
        }
    }

    /// Terminal state currently in the store, if any.
    async fn stored_outcome(&self, id: &str) -> DriveOutcome {
        let stored = match self.store.get(TASKS_COLLECTION, id).await {
            Ok(Some(record)) => from_record(record).ok().map(|t| t.state),
            _ => None,
        };
        match stored {
            Some(state) if state.is_terminal() => DriveOutcome::Finished(state),
            _ => DriveOutcome::Skipped,
        }
    }

    /// Read-only view of one task.
    pub async fn poll(&self, id: &str) -> Result<Option<TaskView>> {
        match self.store.get(TASKS_COLLECTION, id).await? {
            Some(record) => Ok(Some(from_record(record)?.into())),
            None => Ok(None),
        }
    }

    /// Newest first. `limit` defaults to 20 and is capped at 100.
    pub async fn list(&self, kind: Option<&str>, limit: Option<usize>) -> Result<Vec<TaskSummary>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let kind = kind.map(str::trim).filter(|k| !k.is_empty());
        self.store
            .query_recent(TASKS_COLLECTION, kind, limit)
            .await?
            .into_iter()
            .map(|r| from_record(r).map(|t| TaskSummary::from(&t)))
            .collect()
    }
}
