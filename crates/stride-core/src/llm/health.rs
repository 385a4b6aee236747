//! Provider health tracking for the fallback chain.
//!
//! Each provider carries a circuit breaker plus a bounded window of its
//! most recent call outcomes. The breaker gates availability outright
//! after consecutive failures; the outcome window yields a recent error
//! rate the chain uses to order same-priority providers, so a flaky
//! provider drifts behind its healthy peers before its circuit ever
//! trips. Latency and rate-limit cooldowns are owned here too: the
//! chain reports outcomes, this type decides what they mean.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use stride_types::llm::{LlmError, ProviderStatusInfo};

/// Call outcomes remembered per provider for the recent error rate.
const OUTCOME_WINDOW: usize = 20;

/// Circuit breaker state for a provider.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Provider is disabled. Will probe after `wait_duration` elapses.
    Open {
        opened_at: Instant,
        wait_duration: Duration,
    },
    /// Probing: one request allowed to test if provider recovered.
    HalfOpen,
}

/// Breaker tunables, fixed per provider at construction.
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a probe.
    pub open_duration: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Health tracking for a single LLM provider.
#[derive(Debug)]
pub struct ProviderHealth {
    /// Provider name (matches `ProviderConfig.name`).
    pub name: String,
    /// Priority in fallback ordering (lower = higher priority).
    pub priority: u32,
    policy: BreakerPolicy,
    state: CircuitState,
    last_error: Option<String>,
    last_success: Option<Instant>,
    last_latency_ms: Option<u64>,
    total_calls: u64,
    total_failures: u64,
    /// When this provider first became available (for uptime tracking).
    uptime_since: Option<chrono::DateTime<chrono::Utc>>,
    /// If rate-limited, don't use until this instant.
    rate_limit_until: Option<Instant>,
    /// Sliding window of recent outcomes, oldest evicted first.
    recent_outcomes: VecDeque<bool>,
}

impl ProviderHealth {
    /// Create a new health tracker with the default breaker policy.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self::with_policy(name, priority, BreakerPolicy::default())
    }

    /// Create a new health tracker with an explicit breaker policy.
    pub fn with_policy(name: impl Into<String>, priority: u32, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            priority,
            policy,
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            last_error: None,
            last_success: None,
            last_latency_ms: None,
            total_calls: 0,
            total_failures: 0,
            uptime_since: Some(chrono::Utc::now()),
            rate_limit_until: None,
            recent_outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
        }
    }

    /// Check whether this provider is available for routing.
    ///
    /// Handles rate-limit cooldown and circuit state transitions
    /// (Open -> HalfOpen when the wait duration has elapsed).
    pub fn is_available(&mut self) -> bool {
        if let Some(until) = self.rate_limit_until {
            if Instant::now() < until {
                return false;
            }
            self.rate_limit_until = None;
        }

        match &self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open {
                opened_at,
                wait_duration,
            } => {
                if opened_at.elapsed() >= *wait_duration {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Failure share among the remembered recent outcomes.
    ///
    /// 0.0 with no history: a fresh provider is assumed healthy rather
    /// than penalized for being untried.
    pub fn recent_error_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.recent_outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.recent_outcomes.len() as f64
    }

    /// Latency of the last measured call in milliseconds.
    pub fn last_latency_ms(&self) -> Option<u64> {
        self.last_latency_ms
    }

    /// Total calls routed to this provider.
    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    /// Total failed calls.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// If rate-limited, the instant the cooldown ends.
    pub fn rate_limit_until(&self) -> Option<Instant> {
        self.rate_limit_until
    }

    /// Clear the rate-limit cooldown after queuing through it.
    pub fn clear_rate_limit(&mut self) {
        self.rate_limit_until = None;
    }

    fn push_outcome(&mut self, ok: bool) {
        if self.recent_outcomes.len() == OUTCOME_WINDOW {
            self.recent_outcomes.pop_front();
        }
        self.recent_outcomes.push_back(ok);
    }

    /// Record a successful call, with its latency when one was measured
    /// (stream recoveries report `None`).
    pub fn record_success(&mut self, latency_ms: Option<u64>) {
        self.total_calls += 1;
        self.last_success = Some(Instant::now());
        if latency_ms.is_some() {
            self.last_latency_ms = latency_ms;
        }
        self.push_outcome(true);

        match &self.state {
            CircuitState::Closed { .. } => {
                self.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            // Probe succeeded (or a stray call landed while open):
            // recovery confirmed, close the circuit
            CircuitState::HalfOpen | CircuitState::Open { .. } => {
                self.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
                self.uptime_since = Some(chrono::Utc::now());
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self, error: &LlmError, latency_ms: Option<u64>) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.last_error = Some(error.to_string());
        if latency_ms.is_some() {
            self.last_latency_ms = latency_ms;
        }
        self.push_outcome(false);

        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.policy.failure_threshold {
                    self.trip();
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            // Probe failed, reopen the circuit
            CircuitState::HalfOpen => self.trip(),
            CircuitState::Open { .. } => {}
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open {
            opened_at: Instant::now(),
            wait_duration: self.policy.open_duration,
        };
        self.uptime_since = None;
    }

    /// Mark this provider as rate-limited.
    ///
    /// Uses the provider's `retry_after_ms` hint if available, capped at `max_wait_ms`.
    pub fn set_rate_limited(&mut self, retry_after_ms: Option<u64>, max_wait_ms: u64) {
        let wait_ms = retry_after_ms.unwrap_or(max_wait_ms).min(max_wait_ms);
        self.rate_limit_until = Some(Instant::now() + Duration::from_millis(wait_ms));
    }

    /// Classify whether an error should trigger failover to the next provider.
    ///
    /// Failover errors (transient/provider-side):
    /// - Provider, Stream, RateLimited, Overloaded, Timeout
    ///
    /// Non-failover errors (request/auth issues -- trying another provider won't help):
    /// - AuthenticationFailed, InvalidRequest, ContextLengthExceeded, Deserialization
    pub fn is_failover_error(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::Provider { .. }
                | LlmError::Stream(..)
                | LlmError::RateLimited { .. }
                | LlmError::Overloaded(..)
                | LlmError::Timeout { .. }
        )
    }

    /// Convert to a `ProviderStatusInfo` for status reporting.
    pub fn to_status_info(&self) -> ProviderStatusInfo {
        let circuit_state = match &self.state {
            CircuitState::Closed { .. } => "closed".to_string(),
            CircuitState::Open { .. } => "open".to_string(),
            CircuitState::HalfOpen => "half_open".to_string(),
        };

        let last_success_ago = self.last_success.map(|s| {
            let elapsed = s.elapsed();
            if elapsed.as_secs() < 60 {
                format!("{}s ago", elapsed.as_secs())
            } else if elapsed.as_secs() < 3600 {
                format!("{}m ago", elapsed.as_secs() / 60)
            } else {
                format!("{}h ago", elapsed.as_secs() / 3600)
            }
        });

        ProviderStatusInfo {
            name: self.name.clone(),
            circuit_state,
            last_error: self.last_error.clone(),
            last_success_ago,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            recent_error_rate: self.recent_error_rate(),
            uptime_since: self.uptime_since.map(|t| t.to_rfc3339()),
        }
    }
}
