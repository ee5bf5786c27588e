//! Engine configuration and plugin configuration resolution.

pub mod loader;
pub mod schema;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::cache::CacheOptions;
use crate::executor::ParallelOptions;
use crate::formatter::{HumanReadableFormatter, ResultFormatter};
use crate::retry::RetryConfig;

pub use loader::{ConfigSource, ConfigurationEntry, ConfigurationLoader, LoadedConfiguration};
pub use schema::{validate_configuration, ConfigSchema, SchemaType};

/// Default per-plugin timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-plugin time budget for one attempt.
    pub timeout: Duration,
    /// Run plugins on the worker pool instead of one after another.
    pub parallel: bool,
    /// Stop scheduling plugins once one reports an error.
    pub fail_fast: bool,
    /// Turn plugin failures into error violations instead of aborting.
    pub graceful_degradation: bool,
    pub retry: RetryConfig,
    pub cache: CacheOptions,
    pub parallel_options: ParallelOptions,
    /// Target environment (e.g. `"production"`).
    pub environment: Option<String>,
    /// Target Kubernetes version passed to plugins.
    pub kubernetes_version: Option<String>,
    /// Inline configuration per plugin name; the highest-priority layer.
    pub plugin_config: HashMap<String, Map<String, Value>>,
    /// Directory holding per-plugin config files.
    pub config_dir: Option<PathBuf>,
    /// Check resolved plugin configuration against the plugin's schema.
    pub validate_config_schema: bool,
    /// Renders results in [`PolicyEngine::format_result`](crate::PolicyEngine::format_result).
    pub formatter: Arc<dyn ResultFormatter>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            parallel: false,
            fail_fast: false,
            graceful_degradation: true,
            retry: RetryConfig::default(),
            cache: CacheOptions::default(),
            parallel_options: ParallelOptions::default(),
            environment: None,
            kubernetes_version: None,
            plugin_config: HashMap::new(),
            config_dir: None,
            validate_config_schema: true,
            formatter: Arc::new(HumanReadableFormatter),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation = enabled;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_parallel_options(mut self, options: ParallelOptions) -> Self {
        self.parallel_options = options;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn with_plugin_config(mut self, plugin: impl Into<String>, config: Map<String, Value>) -> Self {
        self.plugin_config.insert(plugin.into(), config);
        self
    }

    #[must_use]
    pub fn with_formatter(mut self, formatter: Arc<dyn ResultFormatter>) -> Self {
        self.formatter = formatter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert!(!config.parallel);
        assert!(!config.fail_fast);
        assert!(config.graceful_degradation);
        assert!(config.validate_config_schema);
        assert_eq!(config.formatter.name(), "human");
    }

    #[test]
    fn builders_set_fields() {
        let config = EngineConfig::default()
            .with_timeout(Duration::from_millis(50))
            .with_parallel(true)
            .with_environment("production")
            .with_plugin_config("p", Map::new());
        assert_eq!(config.timeout, Duration::from_millis(50));
        assert!(config.parallel);
        assert_eq!(config.environment.as_deref(), Some("production"));
        assert!(config.plugin_config.contains_key("p"));
    }
}
