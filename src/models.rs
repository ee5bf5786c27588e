use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::{Severity, Violation};
use crate::logging::{default_sink, SharedSink};

/// Descriptive metadata of the chart whose manifests are validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Any other descriptive fields, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChartMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }
}

/// Cooperative cancellation signal shared between the executor and a plugin.
///
/// Raised when the executor stops waiting for the plugin. Plugins that do
/// long-running work may poll it and return early; nothing forces them to.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only bundle handed to a plugin for one `validate` call.
#[derive(Clone)]
pub struct ValidationContext {
    /// Chart metadata supplied by the caller.
    pub chart: ChartMetadata,
    /// Target Kubernetes version, if known.
    pub kubernetes_version: Option<String>,
    /// Target environment name (e.g. `"production"`).
    pub environment: Option<String>,
    /// Resolved configuration for the plugin receiving this context.
    pub config: Map<String, Value>,
    sink: SharedSink,
    cancellation: CancellationFlag,
}

impl ValidationContext {
    #[must_use]
    pub fn new(chart: ChartMetadata) -> Self {
        Self {
            chart,
            kubernetes_version: None,
            environment: None,
            config: Map::new(),
            sink: default_sink(),
            cancellation: CancellationFlag::new(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_kubernetes_version(mut self, version: Option<String>) -> Self {
        self.kubernetes_version = version;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Derive the context for a single plugin attempt: its own config and a
    /// fresh cancellation flag.
    #[must_use]
    pub fn for_plugin(&self, config: Map<String, Value>) -> Self {
        Self {
            config,
            cancellation: CancellationFlag::new(),
            ..self.clone()
        }
    }

    /// Fresh cancellation flag, same everything else.
    #[must_use]
    pub(crate) fn for_attempt(&self) -> Self {
        Self {
            cancellation: CancellationFlag::new(),
            ..self.clone()
        }
    }

    /// Diagnostic sink for plugin output.
    #[must_use]
    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Returns `true` once the engine has stopped waiting for this plugin.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Typed lookup of a config key.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("chart", &self.chart)
            .field("kubernetes_version", &self.kubernetes_version)
            .field("environment", &self.environment)
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }
}

/// A group of violations sharing the same message prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCluster {
    pub message: String,
    pub count: usize,
}

/// Execution metadata of a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Wall-clock time of the run in milliseconds.
    pub execution_time_ms: u64,
    pub plugin_count: usize,
    pub manifest_count: usize,
    pub start_time: DateTime<Utc>,
    /// Execution time of each plugin that ran, in milliseconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_timings: BTreeMap<String, u64>,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self {
            execution_time_ms: 0,
            plugin_count: 0,
            manifest_count: 0,
            start_time: DateTime::<Utc>::default(),
            plugin_timings: BTreeMap::new(),
        }
    }
}

/// Summary statistics of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub violations_by_severity: SeverityCounts,
    pub violations_by_plugin: BTreeMap<String, usize>,
    pub top_violation_types: Vec<ViolationCluster>,
}

/// The verdict of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// `true` when no error-severity violation was reported.
    pub valid: bool,
    /// Error-severity violations.
    pub violations: Vec<Violation>,
    /// Warning- and info-severity violations.
    pub warnings: Vec<Violation>,
    pub metadata: ResultMetadata,
    pub summary: ResultSummary,
}

impl ValidationResult {
    /// A valid result with no findings and zeroed metadata.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
            warnings: Vec::new(),
            metadata: ResultMetadata::default(),
            summary: ResultSummary::default(),
        }
    }

    /// Total number of findings of any severity.
    #[must_use]
    pub fn finding_count(&self) -> usize {
        self.violations.len() + self.warnings.len()
    }

    /// Errors followed by warnings, in stored order.
    pub fn all_findings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().chain(self.warnings.iter())
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chart_metadata_flattens_extra_fields() {
        let meta: ChartMetadata = serde_json::from_value(json!({
            "name": "web",
            "version": "1.2.3",
            "appVersion": "2.0",
            "maintainer": "ops"
        }))
        .unwrap();
        assert_eq!(meta.app_version.as_deref(), Some("2.0"));
        assert_eq!(meta.extra["maintainer"], "ops");
        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["maintainer"], "ops");
        assert!(back.get("description").is_none());
    }

    #[test]
    fn for_plugin_replaces_config_and_cancellation() {
        let ctx = ValidationContext::new(ChartMetadata::new("c", "1"))
            .with_environment(Some("prod".into()));
        ctx.cancellation().cancel();
        let mut config = Map::new();
        config.insert("strict".into(), json!(true));
        let derived = ctx.for_plugin(config);
        assert!(ctx.is_cancelled());
        assert!(!derived.is_cancelled());
        assert_eq!(derived.environment.as_deref(), Some("prod"));
        assert_eq!(derived.config_value("strict"), Some(&json!(true)));
    }

    #[test]
    fn severity_counts_add_and_total() {
        let mut counts = SeverityCounts::default();
        counts.add(Severity::Error);
        counts.add(Severity::Info);
        counts.add(Severity::Info);
        assert_eq!(counts, SeverityCounts { error: 1, warning: 0, info: 2 });
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn empty_result_is_valid() {
        let r = ValidationResult::empty();
        assert!(r.valid);
        assert_eq!(r.finding_count(), 0);
        assert_eq!(r.metadata.start_time.timestamp(), 0);
    }

    #[test]
    fn result_serializes_camel_case() {
        let v = serde_json::to_value(ValidationResult::empty()).unwrap();
        assert!(v["metadata"].get("executionTimeMs").is_some());
        assert!(v["summary"].get("violationsBySeverity").is_some());
    }
}
