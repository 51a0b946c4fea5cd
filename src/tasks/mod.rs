// src/tasks/mod.rs
//! Asynchronous task lifecycle around the collect/extract pipeline.

pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod store;

pub use model::{Task, TaskInput, TaskKind, TaskResult, TaskState, TaskSummary, TaskTicket, TaskView};
pub use orchestrator::{DriveOutcome, InFlight, Orchestrator};
pub use pipeline::{Pipeline, PipelineCfg};
pub use store::{MemoryStore, Record, RecordStore};
