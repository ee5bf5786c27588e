//! Violations reported by plugins.
//!
//! A [`Violation`] is a single finding carrying a [`Severity`], the plugin that
//! produced it, and optional location and remediation data.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a violation.
///
/// Variant order is the report order: errors first, then warnings, then info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A rule violation that makes the result invalid.
    Error,
    /// A potential issue that does not cause failure.
    Warning,
    /// An informational suggestion for improvement.
    Info,
}

impl Severity {
    /// All severities in report order.
    pub const ALL: [Severity; 3] = [Severity::Error, Severity::Warning, Severity::Info];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding produced by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Name of the plugin that reported this violation.
    pub plugin: String,
    /// Severity level.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Resource the violation refers to (e.g. `"Deployment/web"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
    /// Field within the resource (e.g. `"spec.template.spec.containers[0].image"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Suggested fix (actionable text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Free-form plugin-specific context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Violation {
    /// Create a new violation with the given plugin, severity, and message.
    #[must_use]
    pub fn new(plugin: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            severity,
            message: message.into(),
            resource_path: None,
            field: None,
            suggestion: None,
            context: None,
        }
    }

    /// Shorthand for an error-severity violation.
    #[must_use]
    pub fn error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Error, message)
    }

    /// Shorthand for a warning-severity violation.
    #[must_use]
    pub fn warning(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Warning, message)
    }

    /// Shorthand for an info-severity violation.
    #[must_use]
    pub fn info(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Info, message)
    }

    /// Set the resource this violation refers to.
    #[must_use]
    pub fn with_resource_path(mut self, path: impl Into<String>) -> Self {
        self.resource_path = Some(path.into());
        self
    }

    /// Set the field that caused this violation.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set a suggested fix for this violation.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach free-form context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns `true` if this violation is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Returns `true` if this violation belongs in the warnings list
    /// (severity warning or info).
    #[must_use]
    pub fn is_warning(&self) -> bool {
        !self.is_error()
    }
}

/// `[plugin] severity: message (at resource)`.
impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.severity, self.message)?;
        if let Some(path) = &self.resource_path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

/// Build a `Kind/name` resource path for a manifest, falling back to the
/// manifest index when kind or name is missing.
#[must_use]
pub fn resource_path_of(manifest: &Value, index: usize) -> String {
    let kind = manifest.get("kind").and_then(Value::as_str);
    let name = manifest.pointer("/metadata/name").and_then(Value::as_str);
    let namespace = manifest
        .pointer("/metadata/namespace")
        .and_then(Value::as_str);
    match (kind, name) {
        (Some(kind), Some(name)) => match namespace {
            Some(ns) => format!("{kind}/{ns}/{name}"),
            None => format!("{kind}/{name}"),
        },
        (Some(kind), None) => format!("{kind}[{index}]"),
        _ => format!("manifest[{index}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_orders_error_first() {
        let mut all = vec![Severity::Info, Severity::Error, Severity::Warning];
        all.sort();
        assert_eq!(all, Severity::ALL.to_vec());
    }

    #[test]
    fn display_includes_plugin_and_resource() {
        let v = Violation::error("labels", "missing label").with_resource_path("Deployment/web");
        assert_eq!(v.to_string(), "[labels] error: missing label (at Deployment/web)");
    }

    #[test]
    fn warning_and_info_are_warnings() {
        assert!(Violation::warning("p", "m").is_warning());
        assert!(Violation::info("p", "m").is_warning());
        assert!(!Violation::error("p", "m").is_warning());
    }

    #[test]
    fn builder_pattern_chains() {
        let v = Violation::error("images", "image uses latest tag")
            .with_field("image")
            .with_suggestion("Pin a version")
            .with_context(json!({"image": "nginx:latest"}));
        assert_eq!(v.field.as_deref(), Some("image"));
        assert_eq!(v.suggestion.as_deref(), Some("Pin a version"));
        assert_eq!(v.context.as_ref().unwrap()["image"], "nginx:latest");
    }

    #[test]
    fn serialize_json_omits_none_fields() {
        let v = Violation::error("p", "m");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["severity"], "error");
        assert!(json.get("resourcePath").is_none());
        assert!(json.get("suggestion").is_none());
    }

    #[test]
    fn serialize_json_uses_camel_case() {
        let v = Violation::warning("p", "m").with_resource_path("Service/api");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["resourcePath"], "Service/api");
    }

    #[test]
    fn resource_path_uses_kind_namespace_and_name() {
        let m = json!({"kind": "Deployment", "metadata": {"name": "web", "namespace": "prod"}});
        assert_eq!(resource_path_of(&m, 0), "Deployment/prod/web");
        let m = json!({"kind": "Service", "metadata": {"name": "api"}});
        assert_eq!(resource_path_of(&m, 0), "Service/api");
        let m = json!({"kind": "ConfigMap"});
        assert_eq!(resource_path_of(&m, 3), "ConfigMap[3]");
        assert_eq!(resource_path_of(&json!({}), 7), "manifest[7]");
    }
}
