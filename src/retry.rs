//! Per-plugin invocation with timeout and retry.
//!
//! Every plugin attempt runs as its own tokio task raced against a timer.
//! When the timer wins the task is detached, not aborted: it may keep running
//! and its result is dropped. The attempt's cancellation flag is raised so
//! cooperative plugins can stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::diagnostics::Violation;
use crate::errors::ChartguardError;
use crate::logging::SharedSink;
use crate::models::ValidationContext;
use crate::plugin::Plugin;

const COMPONENT: &str = "retry";

/// Retry policy for plugin execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub retry_on_timeout: bool,
    pub retry_on_plugin_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            retry_on_timeout: false,
            retry_on_plugin_error: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Delay before the retry that follows failed attempt number `attempt`
/// (1-based): `min(base × multiplier^(attempt-1), max_delay)`.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let cap = config.max_delay.as_secs_f64();
    if !secs.is_finite() || secs < 0.0 || secs >= cap {
        config.max_delay
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Whether `error` may be retried under `config`.
#[must_use]
pub fn is_retryable(error: &ChartguardError, config: &RetryConfig) -> bool {
    match error {
        ChartguardError::Timeout { .. } => config.retry_on_timeout,
        ChartguardError::Plugin { .. } => config.retry_on_plugin_error,
        _ => false,
    }
}

/// Outcome of running one plugin, including retries.
#[derive(Debug)]
pub struct PluginRun {
    pub plugin: String,
    pub outcome: Result<Vec<Violation>, ChartguardError>,
    pub attempts: u32,
    /// Wall time across all attempts and backoff delays.
    pub elapsed: Duration,
    /// The last attempt hit the timeout.
    pub timed_out: bool,
}

/// Runs plugins under a timeout and retry policy.
#[derive(Clone)]
pub struct PluginInvoker {
    timeout: Duration,
    retry: RetryConfig,
    sink: SharedSink,
}

impl PluginInvoker {
    #[must_use]
    pub fn new(timeout: Duration, retry: RetryConfig, sink: SharedSink) -> Self {
        Self {
            timeout,
            retry,
            sink,
        }
    }

    /// Run `plugin` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.
    ///
    /// A retryable failure on the last of several attempts is wrapped in
    /// [`ChartguardError::RetryExhausted`]; other failures are returned as is.
    pub async fn invoke(
        &self,
        plugin: Arc<dyn Plugin>,
        manifests: Arc<[Value]>,
        context: &ValidationContext,
    ) -> PluginRun {
        let name = plugin.name().to_string();
        let max_attempts = self.retry.attempts();
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .attempt(Arc::clone(&plugin), Arc::clone(&manifests), context)
                .await;
            let error = match result {
                Ok(violations) => {
                    return PluginRun {
                        plugin: name,
                        outcome: Ok(violations),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        timed_out: false,
                    };
                }
                Err(error) => error,
            };

            let timed_out = error.is_timeout();
            let retryable = is_retryable(&error, &self.retry);
            if !retryable || attempt >= max_attempts {
                let outcome = if retryable && max_attempts > 1 {
                    ChartguardError::RetryExhausted {
                        plugin: name.clone(),
                        attempts: attempt,
                        source: Box::new(error),
                    }
                } else {
                    error
                };
                return PluginRun {
                    plugin: name,
                    outcome: Err(outcome),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    timed_out,
                };
            }

            let delay = backoff_delay(attempt, &self.retry);
            self.sink.debug(
                COMPONENT,
                &format!(
                    "plugin '{name}' attempt {attempt}/{max_attempts} failed ({error}); retrying in {}ms",
                    delay.as_millis()
                ),
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        plugin: Arc<dyn Plugin>,
        manifests: Arc<[Value]>,
        context: &ValidationContext,
    ) -> Result<Vec<Violation>, ChartguardError> {
        let name = plugin.name().to_string();
        let attempt_context = context.for_attempt();
        let cancellation = attempt_context.cancellation().clone();

        let handle = tokio::spawn(async move { plugin.validate(&manifests, &attempt_context).await });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(violations))) => Ok(violations),
            Ok(Ok(Err(err))) => Err(ChartguardError::Plugin {
                plugin: name,
                message: err.message,
            }),
            Ok(Err(join_error)) => Err(ChartguardError::Plugin {
                plugin: name,
                message: if join_error.is_panic() {
                    "plugin panicked".to_string()
                } else {
                    format!("plugin task failed: {join_error}")
                },
            }),
            Err(_) => {
                cancellation.cancel();
                self.sink.warn(
                    COMPONENT,
                    &format!(
                        "plugin '{name}' exceeded its {}ms budget; no longer waiting for it",
                        self.timeout.as_millis()
                    ),
                );
                Err(ChartguardError::Timeout {
                    plugin: name,
                    timeout: self.timeout,
                })
            }
        }
    }
}
