//! Plugins used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::schema::ConfigSchema;
use crate::diagnostics::Violation;
use crate::errors::PluginError;
use crate::models::ValidationContext;
use crate::plugin::Plugin;

/// Returns a fixed list of violations, optionally after a delay or with a
/// failure on every call.
pub struct StaticPlugin {
    name: String,
    version: String,
    violations: Vec<Violation>,
    schema: Option<ConfigSchema>,
    defaults: Map<String, Value>,
    delay: Option<Duration>,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StaticPlugin {
    pub fn new(name: &str, violations: Vec<Violation>) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            violations,
            schema: None,
            defaults: Map::new(),
            delay: None,
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A plugin emitting one error with `message`.
    pub fn erroring(name: &str, message: &str) -> Self {
        Self::new(name, vec![Violation::error(name, message)])
    }

    pub fn failing(name: &str, message: &str) -> Self {
        let mut plugin = Self::new(name, vec![]);
        plugin.fail_with = Some(message.to_string());
        plugin
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `validate` invocations.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        self.schema.clone()
    }

    fn default_config(&self) -> Map<String, Value> {
        self.defaults.clone()
    }

    async fn validate(
        &self,
        _manifests: &[Value],
        _context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(message) => Err(PluginError::new(message.clone())),
            None => Ok(self.violations.clone()),
        }
    }
}
