//! The policy engine: plugin registration and cached, retried validation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::aggregate::generate_result_summary;
use crate::cache::{
    hash_manifests, hash_plugins, spawn_sweeper, CacheOptions, CacheStats, InvalidationCriteria,
    ValidationCache,
};
use crate::config::{ConfigurationLoader, EngineConfig};
use crate::diagnostics::Violation;
use crate::error_context::{CallInfo, ErrorContext, ErrorContextGenerator};
use crate::errors::{ChartguardError, Result};
use crate::executor::{PluginExecution, ParallelExecutor};
use crate::logging::{default_sink, SharedSink};
use crate::models::{ChartMetadata, ResultMetadata, ValidationContext, ValidationResult};
use crate::plugin::registry::validate_plugin_shape;
use crate::plugin::{Plugin, PluginRegistry, RegisteredPlugin};
use crate::retry::PluginInvoker;

const COMPONENT: &str = "engine";

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No plugins registered.
    Idle,
    /// At least one plugin registered, no validation running.
    Registered,
    /// A `validate` call is in progress.
    Validating,
}

/// Orchestrates plugins over a set of manifests.
///
/// The engine is `Send + Sync`; `validate` may run concurrently from several
/// tasks. Plugin configuration is resolved once, at registration, against the
/// environment configured at that moment.
pub struct PolicyEngine {
    registry: RwLock<PluginRegistry>,
    config: RwLock<EngineConfig>,
    cache: RwLock<Arc<ValidationCache>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    env_vars: Option<HashMap<String, String>>,
    in_flight: AtomicUsize,
    sink: SharedSink,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("plugins", &self.plugin_names())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PolicyEngine {
    /// Create an engine that logs through `tracing`.
    ///
    /// When called inside a tokio runtime, a background task sweeps expired
    /// cache entries every `cache.cleanup_interval`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sink(config, default_sink())
    }

    #[must_use]
    pub fn with_sink(config: EngineConfig, sink: SharedSink) -> Self {
        let cache = Arc::new(ValidationCache::with_sink(config.cache.clone(), Arc::clone(&sink)));
        let sweeper = spawn_sweeper(&cache);
        Self {
            registry: RwLock::new(PluginRegistry::new()),
            config: RwLock::new(config),
            cache: RwLock::new(cache),
            sweeper: Mutex::new(sweeper),
            env_vars: None,
            in_flight: AtomicUsize::new(0),
            sink,
        }
    }

    /// Resolve plugin configuration from this map instead of the process
    /// environment.
    #[must_use]
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            EngineState::Validating
        } else if self.registry.read().is_empty() {
            EngineState::Idle
        } else {
            EngineState::Registered
        }
    }

    /// Resolve the configuration of `plugin` and register it.
    ///
    /// Returns the schema problems found in the resolved configuration. They
    /// do not prevent registration.
    ///
    /// # Errors
    ///
    /// Returns [`ChartguardError::Registration`] for a malformed plugin,
    /// [`ChartguardError::DuplicatePlugin`] if the name is taken, and an I/O
    /// or parse error if a config file for the plugin cannot be read. In every
    /// error case the plugin is not registered.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<Vec<String>> {
        validate_plugin_shape(plugin.as_ref())?;
        let name = plugin.name().to_string();
        if self.registry.read().has(&name) {
            return Err(ChartguardError::DuplicatePlugin { name });
        }

        let (loader, environment, inline) = {
            let config = self.config.read();
            let mut loader = ConfigurationLoader::new()
                .with_config_dir(config.config_dir.clone())
                .with_schema_validation(config.validate_config_schema)
                .with_sink(Arc::clone(&self.sink));
            if let Some(vars) = &self.env_vars {
                loader = loader.with_env_vars(vars.clone());
            }
            (
                loader,
                config.environment.clone(),
                config.plugin_config.get(&name).cloned(),
            )
        };
        let loaded =
            loader.load_plugin_configuration(plugin.as_ref(), environment.as_deref(), inline.as_ref())?;

        self.registry.write().register(plugin, Some(loaded.config))?;
        self.sink.info(
            COMPONENT,
            &format!(
                "registered plugin '{name}' from {} config source(s)",
                loaded.entries.len()
            ),
        );
        Ok(loaded.validation_errors)
    }

    /// Remove a plugin. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.write().unregister(name);
        if removed {
            self.sink
                .info(COMPONENT, &format!("unregistered plugin '{name}'"));
        }
        removed
    }

    /// Remove every plugin.
    pub fn clear_plugins(&self) {
        self.registry.write().clear();
    }

    /// Registered plugin names in registration order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    /// Resolved configuration of a registered plugin.
    #[must_use]
    pub fn plugin_config(&self, name: &str) -> Option<serde_json::Map<String, Value>> {
        self.registry.read().get_config(name).cloned()
    }

    /// Snapshot of the engine configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Change the engine configuration in place.
    ///
    /// Changed cache options replace the cache, dropping stored results and
    /// statistics. Already registered plugins keep the configuration resolved
    /// when they were registered.
    pub fn configure(&self, update: impl FnOnce(&mut EngineConfig)) {
        let new_cache_options = {
            let mut config = self.config.write();
            update(&mut config);
            (config.cache != *self.current_cache().options()).then(|| config.cache.clone())
        };
        if let Some(options) = new_cache_options {
            self.replace_cache(options);
        }
    }

    fn replace_cache(&self, options: CacheOptions) {
        let cache = Arc::new(ValidationCache::with_sink(options, Arc::clone(&self.sink)));
        let sweeper = spawn_sweeper(&cache);
        *self.cache.write() = cache;
        if let Some(old) = std::mem::replace(&mut *self.sweeper.lock(), sweeper) {
            old.abort();
        }
        self.sink.debug(COMPONENT, "cache options changed; cache rebuilt");
    }

    fn current_cache(&self) -> Arc<ValidationCache> {
        Arc::clone(&*self.cache.read())
    }

    /// Validate `manifests` with every registered plugin.
    ///
    /// Results are cached by manifest content and by plugin set plus
    /// configuration; a repeated call with the same inputs returns the stored
    /// result without running any plugin.
    ///
    /// # Errors
    ///
    /// With graceful degradation disabled, returns the first plugin failure
    /// (after retries). With it enabled (the default) plugin failures become
    /// error violations and this never fails.
    pub async fn validate(
        &self,
        manifests: &[Value],
        metadata: &ChartMetadata,
    ) -> Result<ValidationResult> {
        let started = Instant::now();
        let start_time = Utc::now();
        let plugins = self.registry.read().get_all();

        if plugins.is_empty() {
            self.sink
                .debug(COMPONENT, "no plugins registered; returning empty result");
            let mut result = ValidationResult::empty();
            result.metadata.start_time = start_time;
            result.metadata.manifest_count = manifests.len();
            return Ok(result);
        }

        let _guard = InFlight::enter(&self.in_flight);
        let config = self.config();
        let cache = self.current_cache();

        let manifest_hash = hash_manifests(manifests);
        let plugin_hash = hash_plugins(&plugins);
        if let Some(hit) = cache.get(&manifest_hash, &plugin_hash) {
            self.sink.debug(
                COMPONENT,
                &format!("cache hit for {} manifest(s)", manifests.len()),
            );
            return Ok(hit);
        }

        self.sink.debug(
            COMPONENT,
            &format!(
                "validating {} manifest(s) with {} plugin(s) ({})",
                manifests.len(),
                plugins.len(),
                if config.parallel { "parallel" } else { "sequential" }
            ),
        );

        let shared: Arc<[Value]> = Arc::from(manifests.to_vec());
        let context = ValidationContext::new(metadata.clone())
            .with_environment(config.environment.clone())
            .with_kubernetes_version(config.kubernetes_version.clone())
            .with_sink(Arc::clone(&self.sink));
        let invoker = PluginInvoker::new(config.timeout, config.retry.clone(), Arc::clone(&self.sink));

        let executions = if config.parallel {
            let executor = ParallelExecutor::new(
                config.parallel_options.clone(),
                config.fail_fast,
                invoker,
                Arc::clone(&self.sink),
            );
            let report = executor.execute_plugins(&plugins, shared, &context).await;
            self.sink.debug(
                COMPONENT,
                &format!(
                    "parallel run: {}ms total, peak {} concurrent, utilization {:.2}",
                    report.stats.total_time.as_millis(),
                    report.stats.peak_concurrent_plugins,
                    report.stats.concurrency_utilization
                ),
            );
            report.executions
        } else {
            self.run_sequential(&plugins, shared, &context, &invoker, &config)
                .await?
        };

        let mut findings = Vec::new();
        let mut plugin_timings = BTreeMap::new();
        for execution in executions {
            plugin_timings.insert(
                execution.plugin.clone(),
                u64::try_from(execution.execution_time.as_millis()).unwrap_or(u64::MAX),
            );
            findings.extend(execution.violations);
            if let Some(error) = execution.error {
                if !config.graceful_degradation {
                    return Err(error);
                }
                self.sink.warn(
                    COMPONENT,
                    &format!("plugin '{}' failed, reporting as violation: {error}", execution.plugin),
                );
                findings.push(degraded_violation(&execution.plugin, &error));
            }
        }

        let (violations, warnings): (Vec<Violation>, Vec<Violation>) =
            findings.into_iter().partition(Violation::is_error);
        let plugin_names: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
        let summary = generate_result_summary(&violations, &warnings, Some(&plugin_names));
        let result = ValidationResult {
            valid: violations.is_empty(),
            violations,
            warnings,
            metadata: ResultMetadata {
                execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                plugin_count: plugins.len(),
                manifest_count: manifests.len(),
                start_time,
                plugin_timings,
            },
            summary,
        };

        cache.set(&manifest_hash, &plugin_hash, result.clone());
        Ok(result)
    }

    /// Run plugins one at a time in registration order.
    async fn run_sequential(
        &self,
        plugins: &[RegisteredPlugin],
        manifests: Arc<[Value]>,
        context: &ValidationContext,
        invoker: &PluginInvoker,
        config: &EngineConfig,
    ) -> Result<Vec<PluginExecution>> {
        let mut executions = Vec::with_capacity(plugins.len());
        for (position, entry) in plugins.iter().enumerate() {
            let plugin_context = context.for_plugin(entry.config.clone());
            let run = invoker
                .invoke(Arc::clone(&entry.plugin), Arc::clone(&manifests), &plugin_context)
                .await;
            let mut execution = PluginExecution::from(run);

            if !config.graceful_degradation {
                if let Some(error) = execution.error.take() {
                    return Err(error);
                }
            }

            let stop = config.fail_fast && execution.has_error();
            executions.push(execution);
            if stop {
                let skipped: Vec<&str> = plugins[position + 1..].iter().map(RegisteredPlugin::name).collect();
                if !skipped.is_empty() {
                    self.sink.info(
                        COMPONENT,
                        &format!(
                            "fail-fast skipped {} plugin(s): {}",
                            skipped.len(),
                            skipped.join(", ")
                        ),
                    );
                }
                break;
            }
        }
        Ok(executions)
    }

    /// Render `result` with the configured formatter.
    #[must_use]
    pub fn format_result(&self, result: &ValidationResult) -> String {
        let formatter = Arc::clone(&self.config.read().formatter);
        formatter.format(result)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.current_cache().stats()
    }

    pub fn clear_cache_stats(&self) {
        self.current_cache().clear_stats();
    }

    /// Drop cached results matching `criteria`. Returns how many were removed.
    pub fn invalidate_cache(&self, criteria: &InvalidationCriteria) -> usize {
        let removed = self.current_cache().invalidate(criteria);
        self.sink
            .debug(COMPONENT, &format!("invalidated {removed} cache entr(ies)"));
        removed
    }

    /// Debugging context for one finding of `result`, correlated with the
    /// result's other findings.
    #[must_use]
    pub fn error_context(
        &self,
        violation: &Violation,
        result: &ValidationResult,
        metadata: &ChartMetadata,
    ) -> ErrorContext {
        let config = self.config.read();
        let mut call = CallInfo::from_context(
            &ValidationContext::new(metadata.clone())
                .with_environment(config.environment.clone())
                .with_kubernetes_version(config.kubernetes_version.clone()),
        )
        .with_result(result);
        drop(config);
        if let Some(entry) = self.registry.read().get(&violation.plugin) {
            call = call.with_plugin_version(entry.plugin.version());
        }
        if let Some(&ms) = result.metadata.plugin_timings.get(&violation.plugin) {
            call = call.with_execution_time(Duration::from_millis(ms));
        }
        let siblings: Vec<Violation> = result.all_findings().cloned().collect();
        ErrorContextGenerator::new().generate(violation, &siblings, &call)
    }
}

impl Drop for PolicyEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Marks the engine as validating for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The error violation standing in for a failed plugin.
fn degraded_violation(plugin: &str, error: &ChartguardError) -> Violation {
    let root = error.root();
    let suggestion = match root {
        ChartguardError::Timeout { .. } => {
            "Increase the engine timeout or reduce the work the plugin does per run"
        }
        ChartguardError::Plugin { .. } => {
            "Check the plugin's input handling; it raised an error on these manifests"
        }
        ChartguardError::Configuration { .. } => "Fix the plugin configuration and re-run",
        _ => "Re-run with debug logging to see the underlying failure",
    };
    let mut context = json!({ "errorKind": root.kind() });
    if let ChartguardError::RetryExhausted { attempts, .. } = error {
        context["attempts"] = json!(attempts);
    }
    Violation::error(plugin, error.to_string())
        .with_suggestion(suggestion)
        .with_context(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::config::schema::{ConfigSchema, SchemaType};
    use crate::formatter::CompactFormatter;
    use crate::logging::{Level, MemorySink};
    use crate::retry::RetryConfig;
    use crate::test_support::StaticPlugin;
    use serde_json::Map;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn chart() -> ChartMetadata {
        ChartMetadata::new("web", "1.0.0")
    }

    fn manifests() -> Vec<Value> {
        vec![
            json!({"kind": "Deployment", "metadata": {"name": "web"}}),
            json!({"kind": "Service", "metadata": {"name": "web"}}),
        ]
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        }
    }

    fn engine(config: EngineConfig) -> PolicyEngine {
        PolicyEngine::new(config).with_env_vars(HashMap::new())
    }

    #[tokio::test]
    async fn state_follows_registration() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Idle);
        engine.use_plugin(Arc::new(StaticPlugin::new("a", vec![]))).unwrap();
        assert_eq!(engine.state(), EngineState::Registered);
        assert!(engine.unregister("a"));
        assert!(!engine.unregister("a"));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let engine = engine(EngineConfig::default());
        engine.use_plugin(Arc::new(StaticPlugin::new("a", vec![]))).unwrap();
        let err = engine
            .use_plugin(Arc::new(StaticPlugin::new("a", vec![])))
            .unwrap_err();
        assert!(matches!(err, ChartguardError::DuplicatePlugin { .. }));
        assert_eq!(engine.plugin_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn malformed_plugin_is_not_registered() {
        let engine = engine(EngineConfig::default());
        let err = engine
            .use_plugin(Arc::new(StaticPlugin::new("a", vec![]).with_version("")))
            .unwrap_err();
        assert!(matches!(err, ChartguardError::Registration { .. }));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn schema_problems_are_returned_but_plugin_registers() {
        let mut inline = Map::new();
        inline.insert("strict".into(), json!("yes"));
        let config = EngineConfig::default().with_plugin_config("a", inline);
        let engine = engine(config);
        let schema = ConfigSchema::of_type(SchemaType::Object)
            .with_property("strict", ConfigSchema::of_type(SchemaType::Boolean));
        let warnings = engine
            .use_plugin(Arc::new(StaticPlugin::new("a", vec![]).with_schema(schema)))
            .unwrap();
        assert_eq!(warnings, vec!["config.strict: expected boolean, found string"]);
        assert_eq!(engine.plugin_config("a").unwrap()["strict"], "yes");
    }

    #[tokio::test]
    async fn env_vars_reach_plugin_config() {
        let vars = HashMap::from([("CHARTGUARD_PLUGIN_A_LEVEL".to_string(), "3".to_string())]);
        let engine = PolicyEngine::new(EngineConfig::default()).with_env_vars(vars);
        engine.use_plugin(Arc::new(StaticPlugin::new("a", vec![]))).unwrap();
        assert_eq!(engine.plugin_config("a").unwrap()["level"], 3);
    }

    #[tokio::test]
    async fn zero_plugins_yield_valid_result_without_cache() {
        let engine = engine(EngineConfig::default());
        let result = engine.validate(&manifests(), &chart()).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.metadata.manifest_count, 2);
        assert!(result.metadata.start_time.timestamp() > 0);
        let stats = engine.cache_stats();
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[tokio::test]
    async fn findings_partition_by_severity() {
        let engine = engine(EngineConfig::default());
        engine
            .use_plugin(Arc::new(StaticPlugin::new(
                "mixed",
                vec![
                    Violation::error("mixed", "bad"),
                    Violation::warning("mixed", "meh"),
                    Violation::info("mixed", "fyi"),
                ],
            )))
            .unwrap();
        let result = engine.validate(&manifests(), &chart()).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.metadata.plugin_count, 1);
    }

    #[tokio::test]
    async fn failure_without_degradation_is_returned() {
        let config = EngineConfig::default()
            .with_graceful_degradation(false)
            .with_retry(RetryConfig::none());
        let engine = engine(config);
        engine.use_plugin(Arc::new(StaticPlugin::failing("boom", "kaput"))).unwrap();
        let err = engine.validate(&manifests(), &chart()).await.unwrap_err();
        assert!(matches!(err, ChartguardError::Plugin { .. }));
        assert_eq!(engine.cache_stats().entries, 0);
        assert_eq!(engine.state(), EngineState::Registered);
    }

    #[tokio::test]
    async fn degraded_failure_carries_suggestion_and_kind() {
        let engine = engine(EngineConfig::default().with_retry(quick_retry()));
        engine.use_plugin(Arc::new(StaticPlugin::failing("boom", "kaput"))).unwrap();
        let result = engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(result.violations.len(), 1);
        let v = &result.violations[0];
        assert_eq!(v.plugin, "boom");
        assert!(v.message.contains("kaput"));
        assert!(v.suggestion.is_some());
        let context = v.context.as_ref().unwrap();
        assert_eq!(context["errorKind"], "plugin");
        assert_eq!(context["attempts"], 3);
    }

    #[tokio::test]
    async fn sequential_fail_fast_skips_remaining_plugins() {
        let engine = engine(EngineConfig::default().with_fail_fast(true));
        let later = StaticPlugin::new("later", vec![]);
        let later_calls = later.calls();
        engine.use_plugin(Arc::new(StaticPlugin::erroring("first", "bad"))).unwrap();
        engine.use_plugin(Arc::new(later)).unwrap();
        let result = engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.summary.violations_by_plugin["later"], 0);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let engine = engine(EngineConfig::default());
        let plugin = StaticPlugin::erroring("a", "missing label");
        let calls = plugin.calls();
        engine.use_plugin(Arc::new(plugin)).unwrap();
        let first = engine.validate(&manifests(), &chart()).await.unwrap();
        let second = engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache_stats().hits, 1);

        engine.clear_cache_stats();
        assert_eq!(engine.cache_stats().hits, 0);
        assert_eq!(engine.invalidate_cache(&InvalidationCriteria::all()), 1);
        engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configure_with_new_cache_options_rebuilds_cache() {
        let engine = engine(EngineConfig::default());
        engine.use_plugin(Arc::new(StaticPlugin::new("a", vec![]))).unwrap();
        engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(engine.cache_stats().entries, 1);

        engine.configure(|config| config.timeout = Duration::from_secs(1));
        assert_eq!(engine.cache_stats().entries, 1);

        engine.configure(|config| config.cache = CacheOptions::disabled());
        assert!(!engine.current_cache().is_enabled());
        assert_eq!(engine.cache_stats().entries, 0);
        engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn format_result_uses_configured_formatter() {
        let engine = engine(EngineConfig::default().with_formatter(Arc::new(CompactFormatter)));
        let text = engine.format_result(&ValidationResult::empty());
        assert!(text.starts_with("PASS"));
    }

    #[tokio::test]
    async fn engine_diagnostics_go_to_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let engine = PolicyEngine::with_sink(EngineConfig::default(), sink.clone())
            .with_env_vars(HashMap::new());
        engine.use_plugin(Arc::new(StaticPlugin::new("a", vec![]))).unwrap();
        engine.validate(&manifests(), &chart()).await.unwrap();
        assert_eq!(sink.find(Level::Info, "registered plugin 'a'").len(), 1);
        assert_eq!(sink.find(Level::Debug, "validating 2 manifest(s)").len(), 1);
    }

    #[tokio::test]
    async fn error_context_includes_plugin_version_and_siblings() {
        let engine = engine(EngineConfig::default().with_environment("staging"));
        engine
            .use_plugin(Arc::new(
                StaticPlugin::new(
                    "labels",
                    vec![
                        Violation::error("labels", "Missing label app").with_resource_path("Deployment/web"),
                        Violation::error("labels", "Missing label app").with_resource_path("Deployment/api"),
                    ],
                )
                .with_version("2.1.0"),
            ))
            .unwrap();
        let result = engine.validate(&manifests(), &chart()).await.unwrap();
        let context = engine.error_context(&result.violations[0], &result, &chart());
        assert_eq!(context.plugin.version.as_deref(), Some("2.1.0"));
        assert_eq!(context.snapshot.environment.as_deref(), Some("staging"));
        assert_eq!(context.snapshot.manifest_count, 2);
        assert_eq!(context.related.len(), 1);
    }
}
