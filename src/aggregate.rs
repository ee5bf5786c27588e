//! Merging, summarizing and ordering validation results.

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::Violation;
use crate::models::{ResultMetadata, ResultSummary, SeverityCounts, ValidationResult, ViolationCluster};

/// Number of message clusters kept in a summary.
pub const TOP_VIOLATION_TYPES: usize = 5;

/// Longest message prefix used to group violations.
const VIOLATION_TYPE_MAX_CHARS: usize = 50;

/// Merge several results into one.
///
/// Execution time and plugin counts are summed, the manifest count is the
/// maximum, the start time is the earliest, findings are concatenated and
/// validity is recomputed from the remaining error violations.
#[must_use]
pub fn aggregate_results(results: &[ValidationResult]) -> ValidationResult {
    match results {
        [] => ValidationResult::empty(),
        [single] => single.clone(),
        _ => {
            let violations: Vec<Violation> = results
                .iter()
                .flat_map(|r| r.violations.iter().cloned())
                .collect();
            let warnings: Vec<Violation> = results
                .iter()
                .flat_map(|r| r.warnings.iter().cloned())
                .collect();
            let metadata = ResultMetadata {
                execution_time_ms: results.iter().map(|r| r.metadata.execution_time_ms).sum(),
                plugin_count: results.iter().map(|r| r.metadata.plugin_count).sum(),
                manifest_count: results
                    .iter()
                    .map(|r| r.metadata.manifest_count)
                    .max()
                    .unwrap_or(0),
                start_time: results
                    .iter()
                    .map(|r| r.metadata.start_time)
                    .min()
                    .unwrap_or_default(),
                plugin_timings: results.iter().flat_map(|r| &r.metadata.plugin_timings).fold(
                    BTreeMap::new(),
                    |mut timings, (plugin, ms)| {
                        *timings.entry(plugin.clone()).or_insert(0) += ms;
                        timings
                    },
                ),
            };
            let mut plugin_names: Vec<String> = results
                .iter()
                .flat_map(|r| r.summary.violations_by_plugin.keys().cloned())
                .collect();
            plugin_names.sort();
            plugin_names.dedup();
            let summary = generate_result_summary(&violations, &warnings, Some(&plugin_names));
            ValidationResult {
                valid: !violations.iter().any(Violation::is_error)
                    && !warnings.iter().any(Violation::is_error),
                violations,
                warnings,
                metadata,
                summary,
            }
        }
    }
}

/// Summarize findings by severity, by plugin and by message type.
///
/// Every name in `all_plugin_names` gets a zero entry so passing plugins show
/// up in `violations_by_plugin`.
#[must_use]
pub fn generate_result_summary(
    violations: &[Violation],
    warnings: &[Violation],
    all_plugin_names: Option<&[String]>,
) -> ResultSummary {
    let mut by_severity = SeverityCounts::default();
    let mut by_plugin: BTreeMap<String, usize> = all_plugin_names
        .unwrap_or_default()
        .iter()
        .map(|name| (name.clone(), 0))
        .collect();
    let mut types: HashMap<String, usize> = HashMap::new();

    for violation in violations.iter().chain(warnings) {
        by_severity.add(violation.severity);
        *by_plugin.entry(violation.plugin.clone()).or_insert(0) += 1;
        *types.entry(violation_type(&violation.message)).or_insert(0) += 1;
    }

    let mut clusters: Vec<ViolationCluster> = types
        .into_iter()
        .map(|(message, count)| ViolationCluster { message, count })
        .collect();
    clusters.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    clusters.truncate(TOP_VIOLATION_TYPES);

    ResultSummary {
        violations_by_severity: by_severity,
        violations_by_plugin: by_plugin,
        top_violation_types: clusters,
    }
}

/// Group key of a message: its first sentence, cut to 50 characters.
#[must_use]
pub fn violation_type(message: &str) -> String {
    let first_sentence = match message.find(". ") {
        Some(end) => &message[..end],
        None => message.strip_suffix('.').unwrap_or(message),
    };
    first_sentence
        .trim()
        .chars()
        .take(VIOLATION_TYPE_MAX_CHARS)
        .collect()
}

/// Sort by severity (error, warning, info), then plugin name, then message.
/// The sort is stable, so equal violations keep their relative order.
pub fn sort_violations_by_severity(violations: &mut [Violation]) {
    violations.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.plugin.cmp(&b.plugin))
            .then_with(|| a.message.cmp(&b.message))
    });
}

/// Sorted copy of `violations`.
#[must_use]
pub fn sorted_by_severity(violations: &[Violation]) -> Vec<Violation> {
    let mut sorted = violations.to_vec();
    sort_violations_by_severity(&mut sorted);
    sorted
}
