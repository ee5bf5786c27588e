//! Rendering validation results as text.
//!
//! Five interchangeable formatters share the [`ResultFormatter`] trait. None
//! of them fail: a result that cannot be serialized renders as an error
//! object instead.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::aggregate::{sorted_by_severity, violation_type};
use crate::diagnostics::{Severity, Violation};
use crate::models::ValidationResult;

/// Name reported as the analysis tool.
pub const TOOL_NAME: &str = "chartguard";

const SARIF_SCHEMA: &str = "https://json.schemastore.org/sarif-2.1.0.json";
const SARIF_VERSION: &str = "2.1.0";

/// Number of violations inlined by the compact formatter.
const COMPACT_INLINE: usize = 3;

const REPORT_WIDTH: usize = 60;

/// Renders a [`ValidationResult`] to a string.
pub trait ResultFormatter: fmt::Debug + Send + Sync {
    /// Short identifier (e.g. `"json"`).
    fn name(&self) -> &'static str;

    fn format(&self, result: &ValidationResult) -> String;
}

/// Built-in output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
    Compact,
    Github,
    Sarif,
}

impl OutputFormat {
    /// The formatter for this format.
    #[must_use]
    pub fn formatter(self) -> Arc<dyn ResultFormatter> {
        match self {
            OutputFormat::Human => Arc::new(HumanReadableFormatter),
            OutputFormat::Json => Arc::new(JsonResultFormatter),
            OutputFormat::Compact => Arc::new(CompactFormatter),
            OutputFormat::Github => Arc::new(GithubActionsFormatter),
            OutputFormat::Sarif => Arc::new(SarifFormatter),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            "compact" | "ci" => Ok(OutputFormat::Compact),
            "github" | "github-actions" => Ok(OutputFormat::Github),
            "sarif" => Ok(OutputFormat::Sarif),
            other => Err(format!(
                "unknown output format '{other}' (expected human, json, compact, github, or sarif)"
            )),
        }
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// ── Human-readable ──────────────────────────────────────────────────────

/// Bordered multi-section report for terminals.
#[derive(Debug, Default, Clone, Copy)]
pub struct HumanReadableFormatter;

impl HumanReadableFormatter {
    fn write_violation(out: &mut String, marker: &str, v: &Violation) {
        let _ = writeln!(out, "  {marker} [{}] {}", v.plugin, v.message);
        match (&v.resource_path, &v.field) {
            (Some(path), Some(field)) => {
                let _ = writeln!(out, "      at {path} (field: {field})");
            }
            (Some(path), None) => {
                let _ = writeln!(out, "      at {path}");
            }
            (None, Some(field)) => {
                let _ = writeln!(out, "      field: {field}");
            }
            (None, None) => {}
        }
        if let Some(suggestion) = &v.suggestion {
            let _ = writeln!(out, "      suggestion: {suggestion}");
        }
    }
}

impl ResultFormatter for HumanReadableFormatter {
    fn name(&self) -> &'static str {
        "human"
    }

    fn format(&self, result: &ValidationResult) -> String {
        let border = "═".repeat(REPORT_WIDTH);
        let rule = "─".repeat(REPORT_WIDTH);
        let counts = &result.summary.violations_by_severity;
        let mut out = String::new();

        let _ = writeln!(out, "{border}");
        let _ = writeln!(out, " Validation Report");
        let _ = writeln!(out, "{border}");
        let _ = writeln!(
            out,
            " Status:    {}",
            if result.valid { "PASSED" } else { "FAILED" }
        );
        let _ = writeln!(out, " Plugins:   {}", result.metadata.plugin_count);
        let _ = writeln!(out, " Manifests: {}", result.metadata.manifest_count);
        let _ = writeln!(out, " Duration:  {}ms", result.metadata.execution_time_ms);
        let _ = writeln!(
            out,
            " Findings:  {}, {}, {} info",
            plural(counts.error, "error"),
            plural(counts.warning, "warning"),
            counts.info
        );

        if !result.violations.is_empty() {
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(out, " Errors");
            for v in sorted_by_severity(&result.violations) {
                Self::write_violation(&mut out, "✗", &v);
            }
        }

        if !result.warnings.is_empty() {
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(out, " Warnings");
            for v in sorted_by_severity(&result.warnings) {
                let marker = if v.severity == Severity::Info { "ℹ" } else { "⚠" };
                Self::write_violation(&mut out, marker, &v);
            }
        }

        if !result.summary.violations_by_plugin.is_empty() {
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(out, " By plugin");
            for (plugin, count) in &result.summary.violations_by_plugin {
                let _ = writeln!(out, "  {plugin}: {count}");
            }
        }

        let _ = write!(out, "{border}");
        out
    }
}

// ── JSON ────────────────────────────────────────────────────────────────

/// Pretty-printed JSON of the full result.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResultFormatter;

impl ResultFormatter for JsonResultFormatter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn format(&self, result: &ValidationResult) -> String {
        serde_json::to_string_pretty(result)
            .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string())
    }
}

// ── Compact ─────────────────────────────────────────────────────────────

/// One-line summary for CI logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactFormatter;

impl ResultFormatter for CompactFormatter {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn format(&self, result: &ValidationResult) -> String {
        let counts = &result.summary.violations_by_severity;
        let mut line = format!(
            "{} {}, {}, {} info ({} plugins, {} manifests, {}ms)",
            if result.valid { "PASS" } else { "FAIL" },
            plural(counts.error, "error"),
            plural(counts.warning, "warning"),
            counts.info,
            result.metadata.plugin_count,
            result.metadata.manifest_count,
            result.metadata.execution_time_ms,
        );
        let findings: Vec<Violation> = sorted_by_severity(&result.violations)
            .into_iter()
            .chain(sorted_by_severity(&result.warnings))
            .collect();
        if !findings.is_empty() {
            let inlined: Vec<String> = findings
                .iter()
                .take(COMPACT_INLINE)
                .map(|v| format!("[{}] {}", v.plugin, v.message))
                .collect();
            let _ = write!(line, ": {}", inlined.join("; "));
            if findings.len() > COMPACT_INLINE {
                let _ = write!(line, " (+{} more)", findings.len() - COMPACT_INLINE);
            }
        }
        line
    }
}

// ── GitHub Actions ──────────────────────────────────────────────────────

/// Workflow command annotations (`::error`, `::warning`, `::notice`).
#[derive(Debug, Default, Clone, Copy)]
pub struct GithubActionsFormatter;

fn escape_data(s: &str) -> String {
    s.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}

fn escape_property(s: &str) -> String {
    escape_data(s).replace(':', "%3A").replace(',', "%2C")
}

fn annotation_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "notice",
    }
}

impl ResultFormatter for GithubActionsFormatter {
    fn name(&self) -> &'static str {
        "github"
    }

    fn format(&self, result: &ValidationResult) -> String {
        let mut lines = Vec::new();
        let findings = sorted_by_severity(&result.violations)
            .into_iter()
            .chain(sorted_by_severity(&result.warnings));
        for v in findings {
            let title = escape_property(&format!("{TOOL_NAME}/{}", v.plugin));
            let message = match &v.resource_path {
                Some(path) => format!("{path}: {}", v.message),
                None => v.message.clone(),
            };
            lines.push(format!(
                "::{} title={title}::{}",
                annotation_level(v.severity),
                escape_data(&message)
            ));
        }
        if lines.is_empty() {
            lines.push(format!(
                "::notice title={TOOL_NAME}::validation passed ({} plugins, {} manifests)",
                result.metadata.plugin_count, result.metadata.manifest_count
            ));
        }
        lines.join("\n")
    }
}

// ── SARIF ───────────────────────────────────────────────────────────────

/// SARIF 2.1.0 log with one result per violation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SarifFormatter;

/// `"Missing label app. ..."` → `"missing-label-app"`.
#[must_use]
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for c in violation_type(message).chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "violation".to_string()
    } else {
        slug
    }
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

fn sarif_result(v: &Violation) -> Value {
    let mut entry = json!({
        "ruleId": slugify(&v.message),
        "level": sarif_level(v.severity),
        "message": { "text": v.message },
        "properties": { "plugin": v.plugin },
    });
    if let Some(path) = &v.resource_path {
        entry["locations"] = json!([{
            "physicalLocation": { "artifactLocation": { "uri": path } },
            "logicalLocations": [{ "fullyQualifiedName": match &v.field {
                Some(field) => format!("{path}/{field}"),
                None => path.clone(),
            } }],
        }]);
    }
    if let Some(suggestion) = &v.suggestion {
        entry["fixes"] = json!([{ "description": { "text": suggestion } }]);
    }
    entry
}

impl ResultFormatter for SarifFormatter {
    fn name(&self) -> &'static str {
        "sarif"
    }

    fn format(&self, result: &ValidationResult) -> String {
        let results: Vec<Value> = result.all_findings().map(sarif_result).collect();
        let log = json!({
            "$schema": SARIF_SCHEMA,
            "version": SARIF_VERSION,
            "runs": [{
                "tool": {
                    "driver": {
                        "name": TOOL_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                },
                "results": results,
                "invocations": [{
                    "executionSuccessful": true,
                    "properties": {
                        "valid": result.valid,
                        "pluginCount": result.metadata.plugin_count,
                        "manifestCount": result.metadata.manifest_count,
                    }
                }],
            }],
        });
        serde_json::to_string_pretty(&log)
            .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::generate_result_summary;
    use crate::models::ResultMetadata;

    fn sample() -> ValidationResult {
        let violations = vec![Violation::error("labels", "Missing label app. Add it.")
            .with_resource_path("Deployment/web")
            .with_field("metadata.labels")
            .with_suggestion("Add app label")];
        let warnings = vec![
            Violation::warning("limits", "no cpu limit"),
            Violation::info("images", "image not pinned by digest"),
        ];
        let names = vec!["images".into(), "labels".into(), "limits".into()];
        ValidationResult {
            valid: false,
            summary: generate_result_summary(&violations, &warnings, Some(&names)),
            violations,
            warnings,
            metadata: ResultMetadata {
                execution_time_ms: 12,
                plugin_count: 3,
                manifest_count: 2,
                ..ResultMetadata::default()
            },
        }
    }

    #[test]
    fn output_format_parses_aliases() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("github-actions".parse::<OutputFormat>(), Ok(OutputFormat::Github));
        assert_eq!("ci".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Sarif.formatter().name(), "sarif");
    }

    #[test]
    fn human_report_has_sections() {
        let text = HumanReadableFormatter.format(&sample());
        assert!(text.contains("Status:    FAILED"));
        assert!(text.contains("Findings:  1 error, 1 warning, 1 info"));
        assert!(text.contains("✗ [labels] Missing label app. Add it."));
        assert!(text.contains("at Deployment/web (field: metadata.labels)"));
        assert!(text.contains("suggestion: Add app label"));
        assert!(text.contains("⚠ [limits] no cpu limit"));
        assert!(text.contains("ℹ [images] image not pinned by digest"));
        assert!(text.contains("  limits: 1"));
    }

    #[test]
    fn human_report_for_clean_result() {
        let text = HumanReadableFormatter.format(&ValidationResult::empty());
        assert!(text.contains("PASSED"));
        assert!(!text.contains("Errors"));
    }

    #[test]
    fn json_round_trips() {
        let result = sample();
        let text = JsonResultFormatter.format(&result);
        let parsed: ValidationResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn compact_inlines_first_three() {
        let mut result = sample();
        result.warnings.push(Violation::warning("limits", "no memory limit"));
        let line = CompactFormatter.format(&result);
        assert!(line.starts_with("FAIL 1 error, 1 warning, 1 info (3 plugins, 2 manifests, 12ms): "));
        assert!(line.contains("[labels] Missing label app. Add it.; [limits] no cpu limit"));
        assert!(line.ends_with("(+1 more)"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn compact_clean_result() {
        let line = CompactFormatter.format(&ValidationResult::empty());
        assert_eq!(line, "PASS 0 errors, 0 warnings, 0 info (0 plugins, 0 manifests, 0ms)");
    }

    #[test]
    fn github_annotations_map_severity() {
        let text = GithubActionsFormatter.format(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "::error title=chartguard/labels::Deployment/web: Missing label app. Add it."
        );
        assert!(lines[1].starts_with("::warning title=chartguard/limits::"));
        assert!(lines[2].starts_with("::notice title=chartguard/images::"));
    }

    #[test]
    fn github_escapes_newlines() {
        let mut result = ValidationResult::empty();
        result.warnings.push(Violation::warning("p", "line1\nline2 100%"));
        let text = GithubActionsFormatter.format(&result);
        assert_eq!(text, "::warning title=chartguard/p::line1%0Aline2 100%25");
    }

    #[test]
    fn github_clean_result_emits_notice() {
        let text = GithubActionsFormatter.format(&ValidationResult::empty());
        assert!(text.starts_with("::notice title=chartguard::validation passed"));
    }

    #[test]
    fn sarif_has_one_result_per_violation() {
        let text = SarifFormatter.format(&sample());
        let log: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(log["version"], "2.1.0");
        let results = log["runs"][0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["ruleId"], "missing-label-app");
        assert_eq!(results[0]["level"], "error");
        assert_eq!(
            results[0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "Deployment/web"
        );
        assert_eq!(results[1]["level"], "warning");
        assert_eq!(results[2]["level"], "note");
        assert!(results[1].get("locations").is_none());
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Image uses ':latest' tag!"), "image-uses-latest-tag");
        assert_eq!(slugify("!!!"), "violation");
    }
}
