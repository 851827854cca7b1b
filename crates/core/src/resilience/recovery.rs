use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use super::degradation::GracefulDegradation;
use super::retry::{RetryManager, RetryOptions, RetryStats};
use crate::errors::{ConfigError, ConfigResult, RecoveryContext};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryOptions {
    pub retry: RetryOptions,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Result of a recovered load.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub config: Value,
    /// Set when `config` is the last known good value rather than a fresh load
    pub recovered_from: Option<ConfigError>,
}

impl LoadOutcome {
    pub fn is_fallback(&self) -> bool {
        self.recovered_from.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStats {
    pub circuit_state: CircuitState,
    pub circuit_breaker: CircuitBreakerStats,
    pub retry: RetryStats,
    pub has_fallback_config: bool,
    pub fallback_keys: Vec<String>,
}

type KnownGood = Arc<RwLock<HashMap<String, Value>>>;

/// Retry, circuit breaking and last-known-good fallback for configuration loads.
///
/// Each load is identified by a key (normally the file path); the last
/// successful value per key is what the fallback returns.
#[derive(Clone)]
pub struct ConfigRecoveryManager {
    retry: RetryManager,
    breaker: CircuitBreaker,
    degradation: GracefulDegradation<LoadOutcome>,
    known_good: KnownGood,
}

impl Default for ConfigRecoveryManager {
    fn default() -> Self {
        Self::new(RecoveryOptions::default())
    }
}

impl ConfigRecoveryManager {
    pub fn new(options: RecoveryOptions) -> Self {
        // malformed files stay malformed, an open breaker stays open
        let retry = RetryManager::new(options.retry).with_should_retry(|error, _attempt| {
            !error.is_parse_error() && !error.is_circuit_open()
        });

        Self {
            retry,
            breaker: CircuitBreaker::with_config(options.circuit_breaker),
            degradation: GracefulDegradation::new(),
            known_good: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Health checks registered here under `config:<key>` gate the matching loads.
    pub fn degradation(&self) -> &GracefulDegradation<LoadOutcome> {
        &self.degradation
    }

    /// Loads through degradation, then the breaker, then retry.
    pub async fn load<F, Fut>(&self, key: &str, operation: F) -> ConfigResult<LoadOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConfigResult<Value>>,
    {
        let service = service_name(key);
        if !self.degradation.has_fallback(&service).await {
            self.register_known_good_fallback(key, &service).await;
        }

        let breaker = &self.breaker;
        let retry = &self.retry;
        let result = self
            .degradation
            .execute_with_fallback(&service, move || async move {
                let config = breaker.execute(move || retry.execute(operation)).await?;
                Ok(LoadOutcome {
                    config,
                    recovered_from: None,
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                if !outcome.is_fallback() {
                    self.known_good
                        .write()
                        .await
                        .insert(key.to_string(), outcome.config.clone());
                }
                Ok(outcome)
            }
            Err(error) => {
                let state = self.breaker.get_state().await;
                let context = RecoveryContext::new()
                    .with("operation", "config_load")
                    .with("key", key)
                    .with("circuit_state", state);
                Err(error.with_context(context))
            }
        }
    }

    async fn register_known_good_fallback(&self, key: &str, service: &str) {
        let known_good = Arc::clone(&self.known_good);
        let key = key.to_string();
        self.degradation
            .register_fallback(service, move |error: ConfigError| {
                let known_good = Arc::clone(&known_good);
                let key = key.clone();
                async move {
                    match known_good.read().await.get(&key).cloned() {
                        Some(config) => {
                            warn!(key = %key, error = %error, "加载失败，回退到最近一次成功的配置");
                            Ok(LoadOutcome {
                                config,
                                recovered_from: Some(error),
                            })
                        }
                        None => Err(error),
                    }
                }
            })
            .await;
    }

    pub async fn last_known_good(&self, key: &str) -> Option<Value> {
        self.known_good.read().await.get(key).cloned()
    }

    pub async fn stats(&self) -> RecoveryStats {
        let circuit_breaker = self.breaker.get_stats().await;
        let mut fallback_keys: Vec<String> = self.known_good.read().await.keys().cloned().collect();
        fallback_keys.sort();

        RecoveryStats {
            circuit_state: circuit_breaker.state,
            circuit_breaker,
            retry: self.retry.stats().await,
            has_fallback_config: !fallback_keys.is_empty(),
            fallback_keys,
        }
    }

    /// Closes the breaker and forgets every last known good value.
    pub async fn reset(&self) {
        self.breaker.reset().await;
        self.known_good.write().await.clear();
    }
}

fn service_name(key: &str) -> String {
    format!("config:{key}")
}
