use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{ConfigError, ConfigResult};

/// Produces a substitute result from the failure that triggered it.
pub type Fallback<T> = Arc<dyn Fn(ConfigError) -> BoxFuture<'static, ConfigResult<T>> + Send + Sync>;

/// Reports whether a service is currently usable.
pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

struct ServiceEntry<T> {
    fallback: Option<Fallback<T>>,
    health_check: Option<HealthCheck>,
}

impl<T> Default for ServiceEntry<T> {
    fn default() -> Self {
        Self {
            fallback: None,
            health_check: None,
        }
    }
}

/// Registry of per-service fallbacks and health checks.
pub struct GracefulDegradation<T> {
    services: Arc<RwLock<HashMap<String, ServiceEntry<T>>>>,
}

impl<T> Clone for GracefulDegradation<T> {
    fn clone(&self) -> Self {
        Self {
            services: Arc::clone(&self.services),
        }
    }
}

impl<T> Default for GracefulDegradation<T> {
    fn default() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Send + 'static> GracefulDegradation<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register_fallback`](Self::register_fallback).
    pub fn with_fallback<F, Fut>(mut self, service: impl Into<String>, fallback: F) -> Self
    where
        F: Fn(ConfigError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConfigResult<T>> + Send + 'static,
    {
        let fallback = boxed_fallback(fallback);
        self.modify_now(service.into(), "fallback", |entry| entry.fallback = Some(fallback));
        self
    }

    /// Builder form of [`register_health_check`](Self::register_health_check).
    pub fn with_health_check<F, Fut>(mut self, service: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let check = boxed_check(check);
        self.modify_now(service.into(), "health_check", |entry| entry.health_check = Some(check));
        self
    }

    // 构建阶段没有其他持有者时直接改表；已被克隆且锁被占用时放弃并告警
    fn modify_now(&mut self, service: String, what: &str, apply: impl FnOnce(&mut ServiceEntry<T>)) {
        if let Some(lock) = Arc::get_mut(&mut self.services) {
            apply(lock.get_mut().entry(service).or_default());
            return;
        }
        match self.services.try_write() {
            Ok(mut services) => apply(services.entry(service).or_default()),
            Err(_) => warn!(
                service = %service,
                registration = what,
                "服务表正被占用，注册被丢弃；运行中请改用异步注册方法"
            ),
        }
    }

    pub async fn register_fallback<F, Fut>(&self, service: impl Into<String>, fallback: F)
    where
        F: Fn(ConfigError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConfigResult<T>> + Send + 'static,
    {
        let mut services = self.services.write().await;
        services.entry(service.into()).or_default().fallback = Some(boxed_fallback(fallback));
    }

    pub async fn register_health_check<F, Fut>(&self, service: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut services = self.services.write().await;
        services.entry(service.into()).or_default().health_check = Some(boxed_check(check));
    }

    /// Drops both the fallback and the health check of a service.
    pub async fn unregister(&self, service: &str) -> bool {
        self.services.write().await.remove(service).is_some()
    }

    pub async fn has_fallback(&self, service: &str) -> bool {
        self.services
            .read()
            .await
            .get(service)
            .is_some_and(|entry| entry.fallback.is_some())
    }

    /// Runs `operation`, switching to the registered fallback when it fails or
    /// when the service's health check reports unhealthy.
    ///
    /// Without a fallback the original failure is returned unchanged.
    pub async fn execute_with_fallback<F, Fut>(&self, service: &str, operation: F) -> ConfigResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConfigResult<T>>,
    {
        let (fallback, health_check) = {
            let services = self.services.read().await;
            match services.get(service) {
                Some(entry) => (entry.fallback.clone(), entry.health_check.clone()),
                None => (None, None),
            }
        };

        let healthy = match &health_check {
            Some(check) => check().await,
            None => true,
        };

        let failure = if healthy {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            }
        } else {
            ConfigError::with_code("SERVICE_UNHEALTHY", format!("服务 {service} 健康检查未通过"))
        };

        match fallback {
            Some(fallback) => {
                warn!(service = %service, error = %failure, "使用降级方案");
                fallback(failure).await
            }
            None => Err(failure),
        }
    }
}

fn boxed_fallback<T, F, Fut>(fallback: F) -> Fallback<T>
where
    T: 'static,
    F: Fn(ConfigError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConfigResult<T>> + Send + 'static,
{
    Arc::new(move |error| -> BoxFuture<'static, ConfigResult<T>> {
        Box::pin(fallback(error))
    })
}

fn boxed_check<F, Fut>(check: F) -> HealthCheck
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, bool> { Box::pin(check()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fallback_used_on_failure() {
        let degradation = GracefulDegradation::new()
            .with_fallback("db", |_err| async { Ok::<_, ConfigError>("cached") });

        let result = degradation
            .execute_with_fallback("db", || async { Err(ConfigError::configuration("down")) })
            .await;
        assert_eq!(result.unwrap(), "cached");

        let result = degradation
            .execute_with_fallback("db", || async { Ok("live") })
            .await;
        assert_eq!(result.unwrap(), "live");
    }

    #[tokio::test]
    async fn test_unhealthy_service_skips_operation() {
        let healthy = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&healthy);
        let degradation = GracefulDegradation::new()
            .with_health_check("api", move || {
                let flag = Arc::clone(&flag);
                async move { flag.load(Ordering::SeqCst) }
            })
            .with_fallback("api", |_err| async { Ok::<_, ConfigError>(0) });

        let calls = AtomicU32::new(0);
        let result = degradation
            .execute_with_fallback("api", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        healthy.store(true, Ordering::SeqCst);
        let result = degradation.execute_with_fallback("api", || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_without_fallback_error_is_unchanged() {
        let degradation: GracefulDegradation<()> = GracefulDegradation::new();
        let err = degradation
            .execute_with_fallback("none", || async { Err(ConfigError::with_code("E42", "broken")) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("E42"));
    }

    #[tokio::test]
    async fn test_runtime_registration_and_unregister() {
        let degradation: GracefulDegradation<String> = GracefulDegradation::new();
        degradation
            .register_fallback("svc", |err: ConfigError| async move { Ok(format!("fallback after: {err}")) })
            .await;
        assert!(degradation.has_fallback("svc").await);

        let value = degradation
            .execute_with_fallback("svc", || async { Err(ConfigError::configuration("x")) })
            .await
            .unwrap();
        assert!(value.starts_with("fallback after"));

        assert!(degradation.unregister("svc").await);
        assert!(!degradation.has_fallback("svc").await);
        assert!(degradation
            .execute_with_fallback("svc", || async { Err(ConfigError::configuration("x")) })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_builder_registration_reaches_clones() {
        let original: GracefulDegradation<u8> = GracefulDegradation::new();
        let shared = original.clone();
        let original = original.with_fallback("svc", |_err| async { Ok(7) });
        assert!(shared.has_fallback("svc").await);
        assert!(original.has_fallback("svc").await);

        // 锁被占用时注册无法完成，调用方仍拿回原注册表
        let guard = Arc::clone(&shared.services);
        let held = guard.read().await;
        let shared = shared.with_fallback("late", |_err| async { Ok(1) });
        drop(held);
        assert!(!shared.has_fallback("late").await);
        assert!(shared.has_fallback("svc").await);
    }
}
