//! Debugging context for a single violation.
//!
//! Collects what a person needs to chase down one finding: where the engine
//! ran, what it was validating, which plugin produced the finding, keyword
//! based hints, and the most similar sibling findings.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diagnostics::Violation;
use crate::models::{ChartMetadata, ValidationContext, ValidationResult};

/// Maximum number of related violations attached to a context.
pub const MAX_RELATED: usize = 3;

/// Related violations must score strictly above this.
pub const RELATED_THRESHOLD: f64 = 0.3;

const WEIGHT_PLUGIN: f64 = 0.4;
const WEIGHT_SEVERITY: f64 = 0.2;
const WEIGHT_RESOURCE_PATH: f64 = 0.2;
const WEIGHT_FIELD: f64 = 0.1;
const WEIGHT_MESSAGE: f64 = 0.1;

/// Host the engine runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub engine_version: String,
}

impl EnvironmentInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// What the engine was validating when the finding was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub chart: Option<ChartMetadata>,
    pub environment: Option<String>,
    pub kubernetes_version: Option<String>,
    pub manifest_count: usize,
    pub plugin_count: usize,
}

/// Identity and timing of the plugin behind a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: Option<String>,
    pub execution_time_ms: Option<u64>,
}

/// A sibling finding and how similar it is to the subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedViolation {
    pub similarity: f64,
    pub violation: Violation,
}

/// Everything known about one violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub generated_at: DateTime<Utc>,
    pub environment: EnvironmentInfo,
    pub snapshot: ContextSnapshot,
    pub plugin: PluginInfo,
    pub violation: Violation,
    pub hints: Vec<String>,
    pub related: Vec<RelatedViolation>,
}

/// Information about the call that produced a violation.
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    pub snapshot: ContextSnapshot,
    pub plugin_version: Option<String>,
    pub execution_time: Option<Duration>,
}

impl CallInfo {
    /// Snapshot the parts of a validation context that matter for debugging.
    #[must_use]
    pub fn from_context(context: &ValidationContext) -> Self {
        Self {
            snapshot: ContextSnapshot {
                chart: Some(context.chart.clone()),
                environment: context.environment.clone(),
                kubernetes_version: context.kubernetes_version.clone(),
                ..ContextSnapshot::default()
            },
            ..Self::default()
        }
    }

    /// Take manifest and plugin counts from a finished result.
    #[must_use]
    pub fn with_result(mut self, result: &ValidationResult) -> Self {
        self.snapshot.manifest_count = result.metadata.manifest_count;
        self.snapshot.plugin_count = result.metadata.plugin_count;
        self
    }

    #[must_use]
    pub fn with_plugin_version(mut self, version: impl Into<String>) -> Self {
        self.plugin_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = Some(elapsed);
        self
    }
}

/// A keyword rule: if any needle occurs in the haystack, emit the hint.
struct HintRule {
    needles: &'static [&'static str],
    hint: &'static str,
}

const LOCATION_RULES: &[HintRule] = &[
    HintRule {
        needles: &["resources", "limits", "requests", "cpu", "memory"],
        hint: "Set resources.limits and resources.requests on every container of the workload",
    },
    HintRule {
        needles: &["label", "annotation", "metadata"],
        hint: "Check metadata.labels and metadata.annotations; keys are case-sensitive",
    },
    HintRule {
        needles: &["image", "tag", "digest"],
        hint: "Pin container images to an explicit tag or, better, a sha256 digest",
    },
    HintRule {
        needles: &["securitycontext", "security", "privileged", "capabilit"],
        hint: "Review pod and container securityContext settings",
    },
    HintRule {
        needles: &["probe", "liveness", "readiness"],
        hint: "Verify probe paths, ports and timings against the container's actual endpoints",
    },
    HintRule {
        needles: &["service", "ingress", "port"],
        hint: "Make sure port numbers and selectors line up between Services and the pods they target",
    },
    HintRule {
        needles: &["configmap", "secret", "env"],
        hint: "Confirm referenced ConfigMaps and Secrets are rendered by the same chart",
    },
];

const MESSAGE_RULES: &[HintRule] = &[
    HintRule {
        needles: &["timed out", "timeout"],
        hint: "The plugin exceeded its time budget; raise the engine timeout or enable retry on timeout",
    },
    HintRule {
        needles: &["failed after", "attempts"],
        hint: "The plugin kept failing across retries; run it alone with debug logging to see the underlying error",
    },
];

/// Builds [`ErrorContext`] values.
#[derive(Debug, Clone)]
pub struct ErrorContextGenerator {
    environment: EnvironmentInfo,
}

impl Default for ErrorContextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorContextGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            environment: EnvironmentInfo::current(),
        }
    }

    /// Build the context for `violation`. `siblings` are the other findings of
    /// the same run; the subject itself may be among them and is skipped.
    #[must_use]
    pub fn generate(
        &self,
        violation: &Violation,
        siblings: &[Violation],
        call: &CallInfo,
    ) -> ErrorContext {
        ErrorContext {
            generated_at: Utc::now(),
            environment: self.environment.clone(),
            snapshot: call.snapshot.clone(),
            plugin: PluginInfo {
                name: violation.plugin.clone(),
                version: call.plugin_version.clone(),
                execution_time_ms: call
                    .execution_time
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            },
            violation: violation.clone(),
            hints: debugging_hints(violation, call.snapshot.environment.as_deref()),
            related: related_violations(violation, siblings),
        }
    }

    /// Contexts for every finding of a result, each correlated with the rest.
    #[must_use]
    pub fn generate_for_result(&self, result: &ValidationResult, call: &CallInfo) -> Vec<ErrorContext> {
        let call = call.clone().with_result(result);
        let findings: Vec<Violation> = result.all_findings().cloned().collect();
        findings
            .iter()
            .map(|v| match result.metadata.plugin_timings.get(&v.plugin) {
                Some(&ms) if call.execution_time.is_none() => self.generate(
                    v,
                    &findings,
                    &call.clone().with_execution_time(Duration::from_millis(ms)),
                ),
                _ => self.generate(v, &findings, &call),
            })
            .collect()
    }
}

/// Keyword-matched hints for a violation, in rule order, without duplicates.
#[must_use]
pub fn debugging_hints(violation: &Violation, environment: Option<&str>) -> Vec<String> {
    let location = [
        violation.resource_path.as_deref().unwrap_or_default(),
        violation.field.as_deref().unwrap_or_default(),
        violation.plugin.as_str(),
    ]
    .join(" ")
    .to_lowercase();
    let message = violation.message.to_lowercase();

    let mut hints: Vec<String> = Vec::new();

    for rule in LOCATION_RULES {
        if rule.needles.iter().any(|n| location.contains(n)) {
            push_unique(&mut hints, rule.hint.to_string());
        }
    }
    for rule in MESSAGE_RULES {
        if rule.needles.iter().any(|n| message.contains(n)) {
            push_unique(&mut hints, rule.hint.to_string());
        }
    }

    if let Some(env) = environment {
        let hint = if env.to_lowercase().starts_with("prod") {
            format!(
                "Environment '{env}' may carry stricter overrides; check {}.{env}.yaml in the config directory",
                violation.plugin
            )
        } else {
            format!("Compare with a run against another environment to see whether '{env}' overrides cause this")
        };
        push_unique(&mut hints, hint);
    }

    if let Some(path) = violation.resource_path.as_deref() {
        push_unique(&mut hints, format!("Render the chart and inspect the manifest for {path}"));
    }
    if hints.is_empty() {
        hints.push(format!(
            "Run plugin '{}' with debug logging enabled to see the inputs it inspected",
            violation.plugin
        ));
    }
    hints
}

fn push_unique(hints: &mut Vec<String>, hint: String) {
    if !hints.contains(&hint) {
        hints.push(hint);
    }
}

/// Up to [`MAX_RELATED`] siblings scoring above [`RELATED_THRESHOLD`],
/// most similar first. Only the first sibling equal to `subject` is skipped,
/// so an identical finding from another manifest still counts.
#[must_use]
pub fn related_violations(subject: &Violation, siblings: &[Violation]) -> Vec<RelatedViolation> {
    let own = siblings.iter().position(|candidate| candidate == subject);
    let mut scored: Vec<RelatedViolation> = siblings
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != own)
        .map(|(_, candidate)| candidate)
        .map(|candidate| RelatedViolation {
            similarity: violation_similarity(subject, candidate),
            violation: candidate.clone(),
        })
        .filter(|r| r.similarity > RELATED_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(MAX_RELATED);
    scored
}

/// Weighted similarity of two violations in `[0, 1]`.
///
/// Missing resource paths and fields compare as empty strings.
#[must_use]
pub fn violation_similarity(a: &Violation, b: &Violation) -> f64 {
    let mut score = 0.0;
    if a.plugin == b.plugin {
        score += WEIGHT_PLUGIN;
    }
    if a.severity == b.severity {
        score += WEIGHT_SEVERITY;
    }
    score += WEIGHT_RESOURCE_PATH
        * string_similarity(
            a.resource_path.as_deref().unwrap_or_default(),
            b.resource_path.as_deref().unwrap_or_default(),
        );
    score += WEIGHT_FIELD
        * string_similarity(
            a.field.as_deref().unwrap_or_default(),
            b.field.as_deref().unwrap_or_default(),
        );
    score += WEIGHT_MESSAGE * string_similarity(&a.message, &b.message);
    score
}

/// `1 - levenshtein(a, b) / max(len(a), len(b))`; two empty strings score 1.
#[must_use]
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = levenshtein(a, b) as f64 / longest as f64;
    1.0 - ratio
}

/// Edit distance over chars, two-row.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

impl ErrorContext {
    /// Plain-text report with fixed sections.
    #[must_use]
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let v = &self.violation;

        let _ = writeln!(out, "Error Context Report");
        let _ = writeln!(out, "====================");
        let _ = writeln!(out, "Generated: {}", self.generated_at.to_rfc3339());

        let _ = writeln!(out, "\n[Violation]");
        let _ = writeln!(out, "  Plugin:     {}", v.plugin);
        let _ = writeln!(out, "  Severity:   {}", v.severity);
        let _ = writeln!(out, "  Message:    {}", v.message);
        let _ = writeln!(out, "  Resource:   {}", v.resource_path.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "  Field:      {}", v.field.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "  Suggestion: {}", v.suggestion.as_deref().unwrap_or("-"));

        let _ = writeln!(out, "\n[Plugin]");
        let _ = writeln!(out, "  Name:       {}", self.plugin.name);
        let _ = writeln!(out, "  Version:    {}", self.plugin.version.as_deref().unwrap_or("unknown"));
        let _ = match self.plugin.execution_time_ms {
            Some(ms) => writeln!(out, "  Time:       {ms}ms"),
            None => writeln!(out, "  Time:       unknown"),
        };

        let s = &self.snapshot;
        let _ = writeln!(out, "\n[Validation Context]");
        let _ = match &s.chart {
            Some(chart) => writeln!(out, "  Chart:      {}@{}", chart.name, chart.version),
            None => writeln!(out, "  Chart:      -"),
        };
        let _ = writeln!(out, "  Environment: {}", s.environment.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "  Kubernetes: {}", s.kubernetes_version.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "  Manifests:  {}", s.manifest_count);
        let _ = writeln!(out, "  Plugins:    {}", s.plugin_count);

        let e = &self.environment;
        let _ = writeln!(out, "\n[Environment]");
        let _ = writeln!(out, "  OS:         {} ({})", e.os, e.family);
        let _ = writeln!(out, "  Arch:       {}", e.arch);
        let _ = writeln!(out, "  Engine:     chartguard {}", e.engine_version);

        let _ = writeln!(out, "\n[Debugging Hints]");
        for hint in &self.hints {
            let _ = writeln!(out, "  - {hint}");
        }

        let _ = writeln!(out, "\n[Related Violations]");
        if self.related.is_empty() {
            let _ = writeln!(out, "  none");
        }
        for related in &self.related {
            let _ = writeln!(out, "  - ({:.2}) {}", related.similarity, related.violation);
        }
        out
    }
}
