//! The function dispatcher: validated, bounded execution of
//! AI-requested calls.
//!
//! The dispatcher itself is side-effect-free beyond logging and per-
//! function metrics; executors may mutate domain state through their
//! bound services. Every failure mode (unknown name, bad argument,
//! downstream error, timeout, cancellation) is captured into the
//! returned `FunctionExecutionResult` -- dispatch never throws.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn, Instrument};

use stride_observe::genai_attrs;
use stride_types::function::{ArgumentMap, FunctionErrorKind, FunctionExecutionResult};

use crate::request_context::RequestContext;

use super::registry::FunctionRegistry;

/// Rolling per-function counters, kept for operational visibility.
#[derive(Debug, Default, Clone)]
pub struct FunctionMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl FunctionMetrics {
    /// Error rate over all calls, 0.0 when the function was never called.
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }
}

/// Executes AI-requested function calls against the registry.
pub struct FunctionDispatcher {
    registry: FunctionRegistry,
    timeout: Duration,
    metrics: DashMap<String, FunctionMetrics>,
}

impl FunctionDispatcher {
    pub fn new(registry: FunctionRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            metrics: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Dispatch a call by name.
    ///
    /// Unknown names fail with `UnknownFunction`; executor argument
    /// errors surface as `InvalidArgument`; downstream errors and
    /// timeouts are captured as failed results. Cancellation through the
    /// request context abandons the execution cooperatively.
    pub async fn dispatch(
        &self,
        name: &str,
        args: ArgumentMap,
        ctx: &RequestContext,
    ) -> FunctionExecutionResult {
        let start = Instant::now();

        let Some(executor) = self.registry.get(name) else {
            warn!(function = name, "Dispatch requested for unknown function");
            return self.record(FunctionExecutionResult::failed(
                name,
                FunctionErrorKind::UnknownFunction {
                    name: name.to_string(),
                },
                start.elapsed().as_millis() as u64,
            ));
        };

        let span = tracing::info_span!(
            "dispatch_function",
            gen_ai.operation.name = genai_attrs::OP_DISPATCH_FUNCTION,
            function = name,
        );
        let outcome = async {
            tokio::select! {
                _ = ctx.cancellation.cancelled() => Err(FunctionErrorKind::ExecutionFailed {
                    reason: "cancelled by caller".to_string(),
                }),
                result = tokio::time::timeout(self.timeout, executor.execute(&args, ctx)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(FunctionErrorKind::ExecutionFailed {
                            reason: format!("timed out after {}ms", self.timeout.as_millis()),
                        }),
                    }
                }
            }
        }
        .instrument(span)
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(payload) => {
                info!(function = name, duration_ms, "Function executed");
                FunctionExecutionResult::ok(name, payload, duration_ms)
            }
            Err(error) => {
                warn!(function = name, duration_ms, error = %error, "Function failed");
                FunctionExecutionResult::failed(name, error, duration_ms)
            }
        };
        self.record(result)
    }

    /// Metrics snapshot for a function name.
    pub fn metrics_for(&self, name: &str) -> FunctionMetrics {
        self.metrics
            .get(name)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn record(&self, result: FunctionExecutionResult) -> FunctionExecutionResult {
        let mut entry = self
            .metrics
            .entry(result.function_name.clone())
            .or_default();
        entry.calls += 1;
        entry.total_duration_ms += result.duration_ms;
        if !result.success {
            entry.failures += 1;
        }
        drop(entry);
        result
    }
}
