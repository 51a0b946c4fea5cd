// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod metrics;
pub mod tasks;

pub use crate::api::{router, AppState};

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ExtractionConfig, SourcesConfig};
use crate::extract::ExtractOptions;
use crate::ingest::Aggregator;
use crate::tasks::{MemoryStore, Orchestrator, Pipeline, PipelineCfg, RecordStore};

/// Wire config into a ready orchestrator (providers, backend, store).
pub fn build_orchestrator(
    sources: &SourcesConfig,
    extraction: &ExtractionConfig,
) -> anyhow::Result<Orchestrator> {
    let providers = sources.build_providers();
    tracing::info!(
        providers = providers.len(),
        backend_enabled = extraction.enabled,
        model = %extraction.model,
        "building orchestrator"
    );
    let aggregator = Aggregator::new(providers, sources.aggregator_cfg());
    let backend = extract::build_backend(extraction)?;
    let store: Arc<dyn RecordStore> =
        Arc::new(MemoryStore::with_list_cap(sources.pipeline.archive_cap));
    let cfg = PipelineCfg {
        limit_per_source: sources.pipeline.limit_per_source,
        top_k: sources.pipeline.top_k,
        extract: ExtractOptions {
            max_output_tokens: extraction.max_output_tokens,
            max_attempts: extraction.max_attempts,
            backoff: Duration::from_millis(500),
        },
    };
    let pipeline = Pipeline::new(aggregator, backend, Arc::clone(&store), cfg);
    Ok(Orchestrator::new(store, Arc::new(pipeline)))
}
