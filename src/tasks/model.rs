// src/tasks/model.rs
//! Task records, their payloads and the views handed to callers.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::extract::ExtractionResult;
use crate::ingest::types::{Signal, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MarketSnapshot,
    NewsBatch,
    DeepSearch,
    #[serde(other)]
    Unknown,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MarketSnapshot => "market_snapshot",
            TaskKind::NewsBatch => "news_batch",
            TaskKind::DeepSearch => "deep_search",
            TaskKind::Unknown => "unknown",
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s.trim() {
            "market_snapshot" => TaskKind::MarketSnapshot,
            "news_batch" => TaskKind::NewsBatch,
            "deep_search" => TaskKind::DeepSearch,
            _ => TaskKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Error)
    }

    /// pending -> running -> {done | error}; nothing else.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Running, TaskState::Done)
                | (TaskState::Running, TaskState::Error)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied news item for `news_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl NewsItem {
    pub fn into_signal(self) -> Signal {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .map(|id| format!("news:{id}"))
            .unwrap_or_default();
        let mut s = Signal::new(SourceKind::News, id, self.title);
        if let Some(body) = self.body {
            s = s.with_body(body);
        }
        if let Some(url) = self.url {
            s = s.with_url(url);
        }
        s
    }
}

/// Typed task payload; unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskInput {
    MarketSnapshot {
        #[serde(default)]
        limit_per_source: Option<usize>,
        #[serde(default)]
        top_k: Option<usize>,
    },
    NewsBatch {
        #[serde(default)]
        items: Vec<NewsItem>,
    },
    DeepSearch {
        keyword: String,
    },
    Opaque {
        kind: String,
        payload: Value,
    },
}

impl TaskInput {
    /// Build from the wire shape `{kind, input}`. A malformed input for a
    /// known kind is an error; an unknown kind becomes `Opaque`.
    pub fn from_parts(kind: &str, input: Value) -> Result<Self> {
        let mut obj = match input {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => bail!("task input must be an object, got {other}"),
        };
        let known = TaskKind::from_label(kind);
        if known == TaskKind::Unknown {
            return Ok(TaskInput::Opaque {
                kind: kind.trim().to_string(),
                payload: Value::Object(obj),
            });
        }
        obj.insert("type".into(), Value::String(known.as_str().into()));
        let parsed: TaskInput = serde_json::from_value(Value::Object(obj))
            .with_context(|| format!("invalid input for task kind '{}'", known.as_str()))?;
        if let TaskInput::DeepSearch { keyword } = &parsed {
            if keyword.trim().is_empty() {
                bail!("deep_search needs a non-empty keyword");
            }
        }
        Ok(parsed)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskInput::MarketSnapshot { .. } => TaskKind::MarketSnapshot,
            TaskInput::NewsBatch { .. } => TaskKind::NewsBatch,
            TaskInput::DeepSearch { .. } => TaskKind::DeepSearch,
            TaskInput::Opaque { .. } => TaskKind::Unknown,
        }
    }

    /// Kind as the caller named it (opaque kinds keep their own label).
    pub fn label(&self) -> &str {
        match self {
            TaskInput::Opaque { kind, .. } => kind,
            other => other.kind().as_str(),
        }
    }
}

/// Compact signal echo kept with the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source_kind: SourceKind,
    pub score: f64,
    pub pain_flags: Vec<String>,
}

impl From<&Signal> for SignalSummary {
    fn from(s: &Signal) -> Self {
        Self {
            id: s.key().to_string(),
            title: s.title.clone(),
            url: s.url.clone(),
            source_kind: s.source_kind,
            score: s.score.unwrap_or(0.0),
            pain_flags: s.pain_flags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub extraction: ExtractionResult,
    pub signals_considered: usize,
    pub top_signals: Vec<SignalSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub input: TaskInput,
    pub state: TaskState,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(input: TaskInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: input.kind(),
            input,
            state: TaskState::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&self, next: TaskState) -> Result<Self> {
        if !self.state.can_transition_to(next) {
            bail!("illegal task transition {} -> {} for {}", self.state, next, self.id);
        }
        let mut t = self.clone();
        t.state = next;
        Ok(t)
    }

    pub fn start(&self) -> Result<Self> {
        let mut t = self.transition(TaskState::Running)?;
        t.started_at = Some(Utc::now());
        Ok(t)
    }

    pub fn complete(&self, result: TaskResult) -> Result<Self> {
        let mut t = self.transition(TaskState::Done)?;
        t.result = Some(result);
        t.completed_at = Some(Utc::now());
        Ok(t)
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<Self> {
        let mut t = self.transition(TaskState::Error)?;
        let msg = message.into();
        t.error = Some(if msg.trim().is_empty() {
            "task failed".to_string()
        } else {
            msg
        });
        t.completed_at = Some(Utc::now());
        Ok(t)
    }
}

/// Poll response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: String,
    pub kind: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskView {
    fn from(t: Task) -> Self {
        Self {
            task_id: t.id,
            kind: t.input.label().to_string(),
            state: t.state,
            result: t.result,
            error: t.error,
            created_at: t.created_at,
            completed_at: t.completed_at,
        }
    }
}

/// List entry; no result payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: String,
    pub kind: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskSummary {
    fn from(t: &Task) -> Self {
        Self {
            task_id: t.id.clone(),
            kind: t.input.label().to_string(),
            state: t.state,
            created_at: t.created_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
        }
    }
}

/// Submit response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTicket {
    pub task_id: String,
    pub state: TaskState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transitions_are_one_way() {
        use TaskState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Error));
        for s in [Pending, Running, Done, Error] {
            for t in [Pending, Running, Done, Error] {
                if s.is_terminal() {
                    assert!(!s.can_transition_to(t));
                }
            }
        }
        assert!(!Pending.can_transition_to(Done));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn illegal_transition_leaves_task_untouched() {
        let t = Task::new(TaskInput::DeepSearch {
            keyword: "crm".into(),
        });
        assert!(t.fail("boom").is_err());
        assert_eq!(t.state, TaskState::Pending);
        let failed = t.start().unwrap().fail("").unwrap();
        assert_eq!(failed.error.as_deref(), Some("task failed"));
        assert!(failed.start().is_err());
    }

    #[test]
    fn from_parts_types_known_kinds_and_keeps_unknown() {
        let ms = TaskInput::from_parts("market_snapshot", Value::Null).unwrap();
        assert_eq!(
            ms,
            TaskInput::MarketSnapshot {
                limit_per_source: None,
                top_k: None
            }
        );

        let ds = TaskInput::from_parts("deep_search", json!({"keyword": "invoicing"})).unwrap();
        assert_eq!(ds.kind(), TaskKind::DeepSearch);

        let nb = TaskInput::from_parts("news_batch", json!({"items": [{"title": "t"}]})).unwrap();
        assert!(matches!(nb, TaskInput::NewsBatch { ref items } if items.len() == 1));

        let op = TaskInput::from_parts("weekly_digest", json!({"a": 1})).unwrap();
        assert_eq!(op.kind(), TaskKind::Unknown);
        assert_eq!(op.label(), "weekly_digest");
    }

    #[test]
    fn from_parts_rejects_bad_input() {
        assert!(TaskInput::from_parts("deep_search", json!({})).is_err());
        assert!(TaskInput::from_parts("deep_search", json!({"keyword": "  "})).is_err());
        assert!(TaskInput::from_parts("market_snapshot", json!([1, 2])).is_err());
    }

    #[test]
    fn task_round_trips_through_json() {
        let t = Task::new(TaskInput::Opaque {
            kind: "x".into(),
            payload: json!({"k": [1]}),
        });
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["state"], "pending");
        assert_eq!(v["kind"], "unknown");
        let back: Task = serde_json::from_value(v).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn news_item_ids_are_prefixed() {
        let s = NewsItem {
            id: Some("42".into()),
            title: "Port strike".into(),
            body: None,
            url: None,
        }
        .into_signal();
        assert_eq!(s.id, "news:42");
        assert_eq!(s.source_kind, SourceKind::News);
    }
}
