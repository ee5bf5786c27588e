use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while registering plugins or validating manifests.
#[derive(Error, Debug)]
pub enum ChartguardError {
    /// Plugin failed structural checks at registration time.
    #[error("plugin registration failed: {message}")]
    Registration { message: String },

    /// A plugin with the same name is already registered.
    #[error("plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    /// Plugin configuration is malformed or does not satisfy its schema.
    #[error("invalid configuration for plugin '{plugin}': {}", errors.join("; "))]
    Configuration { plugin: String, errors: Vec<String> },

    /// Plugin did not finish within its time budget.
    #[error("plugin '{plugin}' timed out after {}ms", timeout.as_millis())]
    Timeout { plugin: String, timeout: Duration },

    /// Plugin returned an error (or panicked) while validating.
    #[error("plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// All retry attempts failed; wraps the last underlying error.
    #[error("plugin '{plugin}' failed after {attempts} attempts: {source}")]
    RetryExhausted {
        plugin: String,
        attempts: u32,
        #[source]
        source: Box<ChartguardError>,
    },

    /// Unexpected failure inside the engine pipeline.
    #[error("orchestration error: {message}")]
    Orchestration { message: String },

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChartguardError {
    /// The error underneath any `RetryExhausted` wrapping.
    #[must_use]
    pub fn root(&self) -> &ChartguardError {
        match self {
            ChartguardError::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the root cause is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), ChartguardError::Timeout { .. })
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChartguardError::Registration { .. } => "registration",
            ChartguardError::DuplicatePlugin { .. } => "duplicate-plugin",
            ChartguardError::Configuration { .. } => "configuration",
            ChartguardError::Timeout { .. } => "timeout",
            ChartguardError::Plugin { .. } => "plugin",
            ChartguardError::RetryExhausted { .. } => "retry-exhausted",
            ChartguardError::Orchestration { .. } => "orchestration",
            ChartguardError::Io(_) => "io",
            ChartguardError::Yaml(_) => "yaml",
            ChartguardError::Json(_) => "json",
        }
    }
}

/// Error returned by a plugin's `validate` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Convenience alias for `Result<T, ChartguardError>`.
pub type Result<T> = std::result::Result<T, ChartguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_nested_retry_exhausted() {
        let err = ChartguardError::RetryExhausted {
            plugin: "a".into(),
            attempts: 3,
            source: Box::new(ChartguardError::Timeout {
                plugin: "a".into(),
                timeout: Duration::from_millis(50),
            }),
        };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "retry-exhausted");
        assert_eq!(err.root().kind(), "timeout");
    }

    #[test]
    fn timeout_display_includes_millis() {
        let err = ChartguardError::Timeout {
            plugin: "slow".into(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "plugin 'slow' timed out after 50ms");
    }

    #[test]
    fn configuration_display_joins_errors() {
        let err = ChartguardError::Configuration {
            plugin: "p".into(),
            errors: vec!["a: bad".into(), "b: missing".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for plugin 'p': a: bad; b: missing"
        );
    }

    #[test]
    fn retry_exhausted_display_wraps_source() {
        let err = ChartguardError::RetryExhausted {
            plugin: "p".into(),
            attempts: 2,
            source: Box::new(ChartguardError::Plugin {
                plugin: "p".into(),
                message: "boom".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "plugin 'p' failed after 2 attempts: plugin 'p' failed: boom"
        );
        assert!(!err.is_timeout());
    }
}
