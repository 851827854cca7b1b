//! Retry, circuit breaking and graceful degradation for fallible async work,
//! plus their composition for configuration loads.

pub mod circuit_breaker;
pub mod degradation;
pub mod recovery;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use degradation::{Fallback, GracefulDegradation, HealthCheck};
pub use recovery::{ConfigRecoveryManager, LoadOutcome, RecoveryOptions, RecoveryStats};
pub use retry::{RetryManager, RetryOptions, RetryStats, ShouldRetry};
