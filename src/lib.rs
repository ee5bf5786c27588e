pub mod aggregate;
pub mod builtin;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error_context;
pub mod errors;
pub mod executor;
pub mod formatter;
pub mod logging;
pub mod models;
pub mod parser;
pub mod plugin;
pub mod retry;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use errors::{ChartguardError, PluginError, Result};
pub use diagnostics::{Severity, Violation};
pub use models::{CancellationFlag, ChartMetadata, ValidationContext, ValidationResult};
pub use plugin::{Plugin, PluginMetadata, PluginRegistry};
pub use engine::{EngineState, PolicyEngine};
pub use config::{ConfigSchema, EngineConfig, SchemaType};
pub use cache::{CacheOptions, CacheStats, EvictionStrategy, InvalidationCriteria};
pub use retry::RetryConfig;
pub use executor::ParallelOptions;
pub use logging::{DiagnosticSink, MemorySink, TracingSink};
pub use parser::{parse_manifests, read_manifests};
pub use aggregate::{aggregate_results, generate_result_summary, sort_violations_by_severity};
pub use error_context::{ErrorContext, ErrorContextGenerator};

pub use formatter::{
    CompactFormatter, GithubActionsFormatter, HumanReadableFormatter, JsonResultFormatter,
    OutputFormat, ResultFormatter, SarifFormatter,
};
