pub mod ai;
pub mod sources;

pub use ai::ExtractionConfig;
pub use sources::SourcesConfig;
