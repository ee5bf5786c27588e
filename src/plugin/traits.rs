//! The plugin capability interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::schema::ConfigSchema;
use crate::diagnostics::Violation;
use crate::errors::PluginError;
use crate::models::ValidationContext;

/// Optional descriptive metadata a plugin may publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An independently authored validation plugin.
///
/// Plugins are identified by [`name`](Plugin::name), which must be unique
/// within an engine. `validate` receives every manifest of the batch and its
/// own read-only [`ValidationContext`].
///
/// # Soundness caveat
///
/// The engine enforces timeouts by no longer waiting for a plugin; it cannot
/// stop one. A timed-out `validate` future keeps running on the runtime until
/// it completes and its result is discarded. Implementations must therefore be
/// free of externally visible side effects. Long-running plugins should poll
/// [`ValidationContext::is_cancelled`] and return early.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chartguard::{Plugin, PluginError, ValidationContext, Violation};
/// use serde_json::Value;
///
/// struct NoDefaultNamespace;
///
/// #[async_trait]
/// impl Plugin for NoDefaultNamespace {
///     fn name(&self) -> &str {
///         "no-default-namespace"
///     }
///
///     fn version(&self) -> &str {
///         "1.0.0"
///     }
///
///     async fn validate(
///         &self,
///         manifests: &[Value],
///         _context: &ValidationContext,
///     ) -> Result<Vec<Violation>, PluginError> {
///         Ok(manifests
///             .iter()
///             .filter(|m| m.pointer("/metadata/namespace") == Some(&Value::from("default")))
///             .map(|_| Violation::warning(self.name(), "resource targets the default namespace"))
///             .collect())
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin identifier.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Schema the resolved configuration must satisfy.
    fn config_schema(&self) -> Option<ConfigSchema> {
        None
    }

    /// Lowest-priority configuration layer.
    fn default_config(&self) -> Map<String, Value> {
        Map::new()
    }

    fn metadata(&self) -> Option<PluginMetadata> {
        None
    }

    /// Validate the manifest batch.
    async fn validate(
        &self,
        manifests: &[Value],
        context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError>;
}
