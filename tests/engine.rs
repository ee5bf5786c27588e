use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chartguard::builtin::builtin_plugins;
use chartguard::{
    aggregate_results, parse_manifests, sort_violations_by_severity, CacheOptions, ChartMetadata,
    ChartguardError, EngineConfig, JsonResultFormatter, OutputFormat, ParallelOptions, Plugin,
    PluginError, PolicyEngine, RetryConfig, Severity, ValidationContext, ValidationResult,
    Violation,
};
use serde_json::{json, Value};

/// Emits a fixed set of violations after an optional delay.
struct FixedPlugin {
    name: &'static str,
    violations: Vec<Violation>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FixedPlugin {
    fn new(name: &'static str, violations: Vec<Violation>) -> Self {
        Self {
            name,
            violations,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn sleeping(name: &'static str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(name, vec![])
        }
    }
}

#[async_trait]
impl Plugin for FixedPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn validate(
        &self,
        _manifests: &[Value],
        _context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.violations.clone())
    }
}

/// Fails on every call.
struct BrokenPlugin {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for BrokenPlugin {
    fn name(&self) -> &str {
        "broken"
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    async fn validate(
        &self,
        _manifests: &[Value],
        _context: &ValidationContext,
    ) -> Result<Vec<Violation>, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PluginError::new("connection refused"))
    }
}

fn chart() -> ChartMetadata {
    ChartMetadata::new("web", "1.0.0")
}

fn two_manifests() -> Vec<Value> {
    vec![
        json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}}),
        json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "web"}}),
    ]
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        ..RetryConfig::default()
    }
}

fn engine(config: EngineConfig) -> PolicyEngine {
    PolicyEngine::new(config).with_env_vars(HashMap::new())
}

fn a_and_b(engine: &PolicyEngine) -> Arc<AtomicUsize> {
    let a = FixedPlugin::new("A", vec![Violation::error("A", "missing label")]);
    let calls = Arc::clone(&a.calls);
    engine.use_plugin(Arc::new(a)).unwrap();
    engine.use_plugin(Arc::new(FixedPlugin::new("B", vec![]))).unwrap();
    calls
}

#[tokio::test]
async fn one_failing_and_one_passing_plugin() {
    let engine = engine(EngineConfig::default());
    a_and_b(&engine);

    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    assert!(!result.valid);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.warnings.len(), 0);
    let by_severity = result.summary.violations_by_severity;
    assert_eq!((by_severity.error, by_severity.warning, by_severity.info), (1, 0, 0));
    let by_plugin: Vec<(&str, usize)> = result
        .summary
        .violations_by_plugin
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();
    assert_eq!(by_plugin, vec![("A", 1), ("B", 0)]);
    assert_eq!(result.metadata.plugin_count, 2);
    assert_eq!(result.metadata.manifest_count, 2);
}

#[tokio::test]
async fn repeated_validation_is_served_from_cache() {
    let engine = engine(EngineConfig::default());
    let calls = a_and_b(&engine);

    let first = engine.validate(&two_manifests(), &chart()).await.unwrap();
    let second = engine.validate(&two_manifests(), &chart()).await.unwrap();

    assert_eq!(first.violations, second.violations);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn changed_manifest_misses_the_cache() {
    let engine = engine(EngineConfig::default());
    let calls = a_and_b(&engine);

    let mut manifests = two_manifests();
    engine.validate(&manifests, &chart()).await.unwrap();
    manifests[1]["metadata"]["name"] = json!("web-svc");
    engine.validate(&manifests, &chart()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.cache_stats().hits, 0);
    assert_eq!(engine.cache_stats().entries, 2);
}

#[tokio::test]
async fn always_failing_plugin_is_retried_then_degraded() {
    let engine = engine(EngineConfig::default().with_retry(fast_retry()));
    let calls = Arc::new(AtomicUsize::new(0));
    engine
        .use_plugin(Arc::new(BrokenPlugin {
            calls: Arc::clone(&calls),
        }))
        .unwrap();

    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.violations.len(), 1);
    let violation = &result.violations[0];
    assert_eq!(violation.plugin, "broken");
    assert_eq!(violation.severity, Severity::Error);
    assert!(violation.message.contains("connection refused"));
}

#[tokio::test]
async fn failure_aborts_validation_without_degradation() {
    let config = EngineConfig::default()
        .with_retry(fast_retry())
        .with_graceful_degradation(false);
    let engine = engine(config);
    let calls = Arc::new(AtomicUsize::new(0));
    engine
        .use_plugin(Arc::new(BrokenPlugin {
            calls: Arc::clone(&calls),
        }))
        .unwrap();

    let err = engine.validate(&two_manifests(), &chart()).await.unwrap_err();
    assert!(matches!(err, ChartguardError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(err.root().kind(), "plugin");
}

#[tokio::test]
async fn slow_plugin_times_out_quickly() {
    let config = EngineConfig::default()
        .with_timeout(Duration::from_millis(50))
        .with_retry(fast_retry());
    let engine = engine(config);
    engine
        .use_plugin(Arc::new(FixedPlugin::sleeping("slow", Duration::from_millis(200))))
        .unwrap();

    let started = Instant::now();
    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(180));
    assert_eq!(result.violations.len(), 1);
    assert!(result.violations[0].message.contains("timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_plugins_run_concurrently() {
    let config = EngineConfig::default()
        .with_parallel(true)
        .with_parallel_options(ParallelOptions {
            max_concurrency: 3,
            ..ParallelOptions::default()
        });
    let engine = engine(config);
    for name in ["one", "two", "three"] {
        engine
            .use_plugin(Arc::new(FixedPlugin::sleeping(name, Duration::from_millis(50))))
            .unwrap();
    }

    let started = Instant::now();
    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    let elapsed = started.elapsed();
    assert!(result.valid);
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(130), "took {elapsed:?}");
}

#[tokio::test]
async fn json_output_parses_back_to_the_same_result() {
    let engine = engine(EngineConfig::default().with_formatter(Arc::new(JsonResultFormatter)));
    engine
        .use_plugin(Arc::new(FixedPlugin::new(
            "mixed",
            vec![
                Violation::error("mixed", "Missing label app. Add it.")
                    .with_resource_path("Deployment/web")
                    .with_field("metadata.labels")
                    .with_context(json!({"expected": ["app"]})),
                Violation::warning("mixed", "no cpu limit"),
                Violation::info("mixed", "not pinned"),
            ],
        )))
        .unwrap();

    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    let rendered = engine.format_result(&result);
    let parsed: ValidationResult = serde_json::from_str(&rendered).unwrap();
    assert_eq!(parsed, result);
}

#[tokio::test]
async fn builtin_plugins_on_a_rendered_chart() {
    let rendered = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app.kubernetes.io/name: web
spec:
  template:
    spec:
      containers:
        - name: app
          image: web:latest
---
apiVersion: v1
kind: Service
metadata:
  name: web
";
    let manifests = parse_manifests(rendered).unwrap();
    let engine = engine(EngineConfig::default());
    for plugin in builtin_plugins() {
        assert!(engine.use_plugin(plugin).unwrap().is_empty());
    }

    let result = engine.validate(&manifests, &chart()).await.unwrap();
    let mut errors: Vec<(String, String)> = result
        .violations
        .iter()
        .map(|v| (v.plugin.clone(), v.resource_path.clone().unwrap_or_default()))
        .collect();
    errors.sort();
    assert_eq!(
        errors,
        vec![
            ("image-tag".to_string(), "Deployment/web".to_string()),
            ("required-labels".to_string(), "Service/web".to_string()),
        ]
    );
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].plugin, "resource-limits");

    let sarif: Value = serde_json::from_str(&OutputFormat::Sarif.formatter().format(&result)).unwrap();
    assert_eq!(sarif["runs"][0]["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn file_and_inline_configuration_layers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("resource-limits.yaml"), "strict: false\n").unwrap();
    std::fs::write(dir.path().join("resource-limits.production.yaml"), "strict: true\n").unwrap();

    let mut config = EngineConfig::default().with_environment("production");
    config.config_dir = Some(dir.path().to_path_buf());
    let engine = engine(config);
    for plugin in builtin_plugins() {
        engine.use_plugin(plugin).unwrap();
    }
    assert_eq!(engine.plugin_config("resource-limits").unwrap()["strict"], true);

    let manifests = vec![json!({
        "kind": "Pod",
        "metadata": {"name": "p", "labels": {"app.kubernetes.io/name": "p"}},
        "spec": {"containers": [{"name": "c", "image": "c:1.0"}]}
    })];
    let result = engine.validate(&manifests, &chart()).await.unwrap();
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].plugin, "resource-limits");
}

#[tokio::test]
async fn disabled_cache_always_reruns_plugins() {
    let engine = engine(EngineConfig::default().with_cache(CacheOptions::disabled()));
    let calls = a_and_b(&engine);
    engine.validate(&two_manifests(), &chart()).await.unwrap();
    engine.validate(&two_manifests(), &chart()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn aggregated_runs_and_sorted_findings() {
    let engine = engine(EngineConfig::default());
    a_and_b(&engine);
    let first = engine.validate(&two_manifests(), &chart()).await.unwrap();

    assert_eq!(aggregate_results(&[]), ValidationResult::empty());
    assert_eq!(aggregate_results(std::slice::from_ref(&first)), first);

    let mut findings: Vec<Violation> = first.all_findings().cloned().collect();
    findings.push(Violation::info("B", "fyi"));
    findings.push(Violation::warning("A", "meh"));
    sort_violations_by_severity(&mut findings);
    let once = findings.clone();
    sort_violations_by_severity(&mut findings);
    assert_eq!(once, findings);
    assert_eq!(
        findings.iter().map(|v| v.severity).collect::<Vec<_>>(),
        vec![Severity::Error, Severity::Warning, Severity::Info]
    );
}

#[tokio::test]
async fn error_context_reports_plugin_execution_time() {
    let engine = engine(EngineConfig::default());
    let slow = FixedPlugin {
        delay: Duration::from_millis(30),
        ..FixedPlugin::new("slow-labels", vec![Violation::error("slow-labels", "Missing label app")])
    };
    engine.use_plugin(Arc::new(slow)).unwrap();

    let result = engine.validate(&two_manifests(), &chart()).await.unwrap();
    let recorded = result.metadata.plugin_timings["slow-labels"];
    assert!(recorded >= 30, "recorded {recorded}ms");

    let context = engine.error_context(&result.violations[0], &result, &chart());
    assert_eq!(context.plugin.execution_time_ms, Some(recorded));
    assert!(context.render_report().contains(&format!("Time:       {recorded}ms")));
}
