//! Bounded concurrent plugin execution.
//!
//! Plugins are split into high, normal and low priority batches. Batches run
//! one after another; inside a batch a fixed number of worker tasks pull
//! plugins from a shared queue. Results keep submission order regardless of
//! completion order.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::diagnostics::Violation;
use crate::errors::ChartguardError;
use crate::logging::SharedSink;
use crate::models::ValidationContext;
use crate::plugin::RegisteredPlugin;
use crate::retry::{PluginInvoker, PluginRun};

const COMPONENT: &str = "executor";

/// Default worker count: the CPU count clamped to `2..=8`.
#[must_use]
pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(2, 8)
}

/// Settings for the parallel path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelOptions {
    pub max_concurrency: usize,
    /// Plugins run in the first batch.
    pub high_priority: Vec<String>,
    /// Plugins run in the last batch.
    pub low_priority: Vec<String>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            high_priority: Vec::new(),
            low_priority: Vec::new(),
        }
    }
}

/// Priority batch of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl ParallelOptions {
    #[must_use]
    pub fn priority_of(&self, plugin: &str) -> Priority {
        if self.high_priority.iter().any(|name| name == plugin) {
            Priority::High
        } else if self.low_priority.iter().any(|name| name == plugin) {
            Priority::Low
        } else {
            Priority::Normal
        }
    }
}

/// What one plugin run cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub attempts: u32,
    pub timed_out: bool,
    pub violation_count: usize,
}

/// Outcome of one plugin on the parallel path.
#[derive(Debug)]
pub struct PluginExecution {
    pub plugin: String,
    pub violations: Vec<Violation>,
    pub execution_time: Duration,
    pub error: Option<ChartguardError>,
    pub resource_usage: ResourceUsage,
}

impl PluginExecution {
    /// The run failed or reported an error-severity violation.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.violations.iter().any(Violation::is_error)
    }
}

impl From<PluginRun> for PluginExecution {
    fn from(run: PluginRun) -> Self {
        let (violations, error) = match run.outcome {
            Ok(violations) => (violations, None),
            Err(error) => (Vec::new(), Some(error)),
        };
        Self {
            plugin: run.plugin,
            resource_usage: ResourceUsage {
                attempts: run.attempts,
                timed_out: run.timed_out,
                violation_count: violations.len(),
            },
            violations,
            execution_time: run.elapsed,
            error,
        }
    }
}

/// Aggregate timing of a parallel run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParallelExecutionStats {
    pub total_time: Duration,
    pub avg_plugin_time: Duration,
    pub max_plugin_time: Duration,
    /// `min(1, max_plugin_time / total_time)`.
    pub concurrency_utilization: f64,
    pub peak_concurrent_plugins: usize,
}

/// Everything a parallel run produced.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Executed plugins: high batch, then normal, then low; submission order
    /// inside each batch.
    pub executions: Vec<PluginExecution>,
    /// Plugins never started because fail-fast tripped.
    pub skipped: Vec<String>,
    pub stats: ParallelExecutionStats,
}

/// Runs plugins on a bounded pool of worker tasks.
pub struct ParallelExecutor {
    options: ParallelOptions,
    fail_fast: bool,
    invoker: PluginInvoker,
    sink: SharedSink,
}

impl ParallelExecutor {
    #[must_use]
    pub fn new(
        options: ParallelOptions,
        fail_fast: bool,
        invoker: PluginInvoker,
        sink: SharedSink,
    ) -> Self {
        Self {
            options,
            fail_fast,
            invoker,
            sink,
        }
    }

    /// Execute `plugins` against `manifests`. Each plugin receives
    /// `context` with its own resolved configuration.
    pub async fn execute_plugins(
        &self,
        plugins: &[RegisteredPlugin],
        manifests: Arc<[Value]>,
        context: &ValidationContext,
    ) -> ExecutionReport {
        let started = Instant::now();
        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut report = ExecutionReport::default();

        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            let batch: Vec<RegisteredPlugin> = plugins
                .iter()
                .filter(|entry| self.options.priority_of(entry.name()) == priority)
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }
            self.sink.debug(
                COMPONENT,
                &format!("running {:?} priority batch of {} plugin(s)", priority, batch.len()),
            );
            let names: Vec<String> = batch.iter().map(|e| e.name().to_string()).collect();
            let slots = self
                .run_batch(batch, &manifests, context, &stop, &active, &peak)
                .await;

            let mut executed = HashSet::new();
            for execution in slots.into_iter().flatten() {
                executed.insert(execution.plugin.clone());
                report.executions.push(execution);
            }
            report
                .skipped
                .extend(names.into_iter().filter(|name| !executed.contains(name)));
        }

        if !report.skipped.is_empty() {
            self.sink.info(
                COMPONENT,
                &format!(
                    "fail-fast skipped {} plugin(s): {}",
                    report.skipped.len(),
                    report.skipped.join(", ")
                ),
            );
        }

        report.stats = compute_stats(
            &report.executions,
            started.elapsed(),
            peak.load(Ordering::SeqCst),
        );
        report
    }

    async fn run_batch(
        &self,
        batch: Vec<RegisteredPlugin>,
        manifests: &Arc<[Value]>,
        context: &ValidationContext,
        stop: &Arc<AtomicBool>,
        active: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
    ) -> Vec<Option<PluginExecution>> {
        let len = batch.len();
        let queue: Arc<Mutex<VecDeque<(usize, RegisteredPlugin)>>> =
            Arc::new(Mutex::new(batch.into_iter().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<PluginExecution>>>> =
            Arc::new(Mutex::new((0..len).map(|_| None).collect()));
        let workers = self.options.max_concurrency.max(1).min(len);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let stop = Arc::clone(stop);
            let active = Arc::clone(active);
            let peak = Arc::clone(peak);
            let manifests = Arc::clone(manifests);
            let context = context.clone();
            let invoker = self.invoker.clone();
            let fail_fast = self.fail_fast;

            handles.push(tokio::spawn(async move {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some((index, entry)) = queue.lock().pop_front() else {
                        break;
                    };
                    let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(running, Ordering::SeqCst);

                    let plugin_context = context.for_plugin(entry.config.clone());
                    let run = invoker
                        .invoke(Arc::clone(&entry.plugin), Arc::clone(&manifests), &plugin_context)
                        .await;
                    active.fetch_sub(1, Ordering::SeqCst);

                    let execution = PluginExecution::from(run);
                    if fail_fast && execution.has_error() {
                        stop.store(true, Ordering::SeqCst);
                    }
                    slots.lock()[index] = Some(execution);
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                self.sink
                    .error(COMPONENT, &format!("worker task failed: {err}"));
            }
        }

        let mut slots = slots.lock();
        std::mem::take(&mut *slots)
    }
}

fn compute_stats(
    executions: &[PluginExecution],
    total_time: Duration,
    peak: usize,
) -> ParallelExecutionStats {
    let max_plugin_time = executions
        .iter()
        .map(|e| e.execution_time)
        .max()
        .unwrap_or_default();
    let avg_plugin_time = if executions.is_empty() {
        Duration::ZERO
    } else {
        let sum: Duration = executions.iter().map(|e| e.execution_time).sum();
        sum / u32::try_from(executions.len()).unwrap_or(u32::MAX)
    };
    let concurrency_utilization = if total_time.is_zero() {
        0.0
    } else {
        (max_plugin_time.as_secs_f64() / total_time.as_secs_f64()).min(1.0)
    };
    ParallelExecutionStats {
        total_time,
        avg_plugin_time,
        max_plugin_time,
        concurrency_utilization,
        peak_concurrent_plugins: peak,
    }
}
