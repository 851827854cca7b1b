use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{ConfigError, ConfigResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// Trial calls are let through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long an open breaker waits before allowing a trial call
    pub reset_timeout_ms: u64,
    /// Reporting window, does not affect transitions
    pub monitoring_period_ms: u64,
    /// Consecutive half-open successes needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 10_000,
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls refused while open
    pub rejected_calls: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_failure_time: None,
            last_state_change: Utc::now(),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

struct BreakerState {
    stats: CircuitBreakerStats,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            stats: CircuitBreakerStats::new(),
            last_failure: None,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.stats.state;
        if from == to {
            return;
        }
        self.stats.state = to;
        self.stats.last_state_change = Utc::now();
        metrics::counter!("hotconf_circuit_breaker_transitions_total", "to" => to.to_string())
            .increment(1);
        match to {
            CircuitState::Open => warn!(from = %from, to = %to, "熔断器打开"),
            _ => info!(from = %from, to = %to, "熔断器状态切换"),
        }
    }
}

/// Three-state failure isolation around an async operation.
///
/// The open-to-half-open transition is evaluated lazily on the next call.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(BreakerState::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with circuit breaker protection
    ///
    /// Rejected calls fail with [`ConfigError::CircuitOpen`] and never invoke
    /// the operation.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ConfigResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConfigResult<T>>,
    {
        self.acquire().await?;

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure().await;
                Err(error)
            }
        }
    }

    async fn acquire(&self) -> ConfigResult<()> {
        let mut state = self.state.write().await;
        if state.stats.state != CircuitState::Open {
            return Ok(());
        }

        let reset_timeout = self.config.reset_timeout();
        let elapsed = state
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(reset_timeout);
        if elapsed >= reset_timeout {
            state.stats.consecutive_successes = 0;
            state.transition(CircuitState::HalfOpen);
            return Ok(());
        }

        state.stats.rejected_calls += 1;
        Err(ConfigError::CircuitOpen {
            retry_after: reset_timeout - elapsed,
        })
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        let stats = &mut state.stats;
        stats.total_calls += 1;
        stats.successful_calls += 1;
        stats.consecutive_failures = 0;

        if stats.state == CircuitState::HalfOpen {
            stats.consecutive_successes += 1;
            if stats.consecutive_successes >= self.config.success_threshold {
                stats.consecutive_successes = 0;
                state.transition(CircuitState::Closed);
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.last_failure = Some(Instant::now());
        let stats = &mut state.stats;
        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.consecutive_failures += 1;
        stats.consecutive_successes = 0;
        stats.last_failure_time = Some(Utc::now());

        let current = stats.state;
        let tripped = stats.consecutive_failures >= self.config.failure_threshold;
        match current {
            CircuitState::HalfOpen => state.transition(CircuitState::Open),
            CircuitState::Closed if tripped => state.transition(CircuitState::Open),
            _ => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.read().await.stats.state
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        self.state.read().await.stats.clone()
    }

    /// Forces `Closed` and zeroes every counter.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = BreakerState::new();
    }
}
