//! 配置管理器
//!
//! 持有合并后的当前配置，负责加载、热重载、运行时修改、快照回滚与变更通知。
//! 文件的发现、解析、监听和保存通过 [`crate::traits`] 中的接口注入。
//!
//! # 重载流程
//!
//! 发现文件 → 逐个加载（经过重试/熔断/降级）→ 按应用顺序深度合并 →
//! 环境变量替换 → 校验 → 计算差异 → 提交 → 清空读缓存 → 自动快照 → 发送事件。
//! 任一步失败都不会修改当前配置，只发送 [`ConfigEvent::Error`]。
//!
//! 同一时刻只允许一个重载在执行，重叠的调用直接返回 [`ReloadOutcome::Skipped`]。
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hotconf_core::manager::{ConfigManagerBuilder, ConfigManagerOptions};
//! # use hotconf_core::traits::{ConfigDiscovery, ConfigLoader};
//! # async fn demo(loader: Arc<dyn ConfigLoader>, discovery: Arc<dyn ConfigDiscovery>) -> hotconf_core::ConfigResult<()> {
//! let manager = ConfigManagerBuilder::new(ConfigManagerOptions {
//!     config_dir: "./config".into(),
//!     environment: Some("production".into()),
//!     ..Default::default()
//! })
//! .loader(loader)
//! .discovery(discovery)
//! .build()?;
//!
//! manager.load().await?;
//! let port: u16 = manager.get_typed("server.port").await?;
//! # let _ = port;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, EnhancedCache, EnhancedCacheOptions};
use crate::debounce::Debouncer;
use crate::diff::{ChangeDetector, ChangeRecord};
use crate::env_resolver::{EnvProvider, EnvResolver, EnvResolverOptions, ProcessEnv};
use crate::errors::{ConfigError, ConfigResult, LoadErrorKind, RecoveryContext};
use crate::events::{ConfigEvent, EventBus};
use crate::path::ConfigPath;
use crate::resilience::{ConfigRecoveryManager, RecoveryOptions, RecoveryStats};
use crate::safe_ops;
use crate::snapshot::{Snapshot, SnapshotComparison, SnapshotManager};
use crate::traits::{ConfigDiscovery, ConfigFileDescriptor, ConfigLoader, ConfigSaver, ConfigWatchSource};
use crate::validation::{ConfigValidator, ValidatorRegistry};

/// 运行时修改使用的变更来源
pub const RUNTIME_SOURCE: &str = "runtime";

/// 配置管理器选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigManagerOptions {
    /// 配置文件所在目录
    pub config_dir: PathBuf,
    /// 文件名主干，`config` 对应 `config.json` / `config.production.yaml`
    pub base_name: String,
    /// 当前环境，`None` 只加载基础文件
    pub environment: Option<String>,
    pub resolve_env_vars: bool,
    pub env_prefix: String,
    pub strict_env: bool,
    pub warn_on_missing_env: bool,
    pub max_snapshots: usize,
    /// 重载产生变更时自动创建快照
    pub auto_snapshot: bool,
    pub cache_max_size: usize,
    pub cache_ttl_ms: u64,
    pub cache_max_memory_bytes: usize,
    pub debounce_ms: u64,
    pub event_capacity: usize,
    pub recovery: RecoveryOptions,
}

impl Default for ConfigManagerOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            base_name: "config".to_string(),
            environment: None,
            resolve_env_vars: true,
            env_prefix: String::new(),
            strict_env: false,
            warn_on_missing_env: true,
            max_snapshots: 50,
            auto_snapshot: true,
            cache_max_size: 1000,
            cache_ttl_ms: 300_000,
            cache_max_memory_bytes: 50 * 1024 * 1024,
            debounce_ms: 300,
            event_capacity: 256,
            recovery: RecoveryOptions::default(),
        }
    }
}

/// 一次重载的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// 已有重载在执行，本次调用被忽略
    Skipped,
    /// 新配置已提交；没有差异时 `changes` 为空
    Applied { changes: Vec<ChangeRecord> },
}

impl ReloadOutcome {
    pub fn changes(&self) -> &[ChangeRecord] {
        match self {
            ReloadOutcome::Skipped => &[],
            ReloadOutcome::Applied { changes } => changes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub environment: Option<String>,
    pub loaded_files: usize,
    pub snapshots: usize,
    pub subscribers: usize,
    pub reloading: bool,
    pub watching: bool,
    pub cache: CacheStats,
    pub recovery: RecoveryStats,
}

#[derive(Debug, Default)]
struct ConfigState {
    config: Value,
    files: Vec<ConfigFileDescriptor>,
}

struct Inner {
    options: ConfigManagerOptions,
    loader: Arc<dyn ConfigLoader>,
    discovery: Arc<dyn ConfigDiscovery>,
    saver: Option<Arc<dyn ConfigSaver>>,
    state: RwLock<ConfigState>,
    cache: EnhancedCache<String, Value>,
    snapshots: RwLock<SnapshotManager>,
    recovery: ConfigRecoveryManager,
    env: EnvResolver,
    validators: ValidatorRegistry,
    events: EventBus<ConfigEvent>,
    reloading: AtomicBool,
    debouncer: Debouncer,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

/// 重载互斥标记，释放时复位
struct ReloadGuard<'a>(&'a AtomicBool);

impl<'a> ReloadGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReloadGuard(flag))
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 配置管理器，克隆后共享同一份状态
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<Inner>,
}

impl ConfigManager {
    pub fn builder(options: ConfigManagerOptions) -> ConfigManagerBuilder {
        ConfigManagerBuilder::new(options)
    }

    pub fn options(&self) -> &ConfigManagerOptions {
        &self.inner.options
    }

    /// 首次加载，语义与 [`reload`](Self::reload) 相同
    pub async fn load(&self) -> ConfigResult<ReloadOutcome> {
        self.reload().await
    }

    /// 重新发现并加载全部配置文件
    pub async fn reload(&self) -> ConfigResult<ReloadOutcome> {
        let Some(_guard) = ReloadGuard::acquire(&self.inner.reloading) else {
            debug!("已有重载在执行，忽略本次请求");
            metrics::counter!("hotconf_reload_total", "result" => "skipped").increment(1);
            return Ok(ReloadOutcome::Skipped);
        };

        match self.build_config().await {
            Ok((config, files)) => {
                let changes = self.commit_reload(config, files).await;
                metrics::counter!("hotconf_reload_total", "result" => "success").increment(1);
                Ok(ReloadOutcome::Applied { changes })
            }
            Err(err) => {
                metrics::counter!("hotconf_reload_total", "result" => "failure").increment(1);
                error!(error = %err, "配置重载失败，保留当前配置");
                self.publish_error("reload", err.clone());
                Err(err)
            }
        }
    }

    async fn build_config(&self) -> ConfigResult<(Value, Vec<ConfigFileDescriptor>)> {
        let options = &self.inner.options;
        let files = self
            .inner
            .discovery
            .discover(&options.config_dir, &options.base_name, options.environment.as_deref())
            .await?;

        if files.is_empty() {
            return Err(ConfigError::load(
                options.config_dir.display().to_string(),
                "*",
                LoadErrorKind::NotFound,
                format!("目录中没有名为 {} 的配置文件", options.base_name),
            ));
        }

        let mut layers = Vec::with_capacity(files.len());
        for file in &files {
            layers.push(self.load_file(file).await?);
        }

        let empty = Value::Object(Map::new());
        let layer_refs: Vec<&Value> = layers.iter().collect();
        let merged = safe_ops::merge_deep(&empty, &layer_refs);

        let resolved = if options.resolve_env_vars {
            self.inner.env.resolve(&merged)?
        } else {
            merged
        };

        self.inner.validators.validate(&resolved)?;
        Ok((resolved, files))
    }

    async fn load_file(&self, file: &ConfigFileDescriptor) -> ConfigResult<Value> {
        let key = file.path.display().to_string();
        let loader = Arc::clone(&self.inner.loader);
        let path = file.path.clone();

        let outcome = self
            .inner
            .recovery
            .load(&key, || {
                let loader = Arc::clone(&loader);
                let path = path.clone();
                async move { loader.load(&path).await }
            })
            .await?;

        // 回退值等于当前已提交配置的组成部分，重新提交没有意义
        match outcome.recovered_from {
            None => Ok(outcome.config),
            Some(cause) => Err(cause.with_context(
                RecoveryContext::new()
                    .with("file", &key)
                    .with("fallback", "last_known_good"),
            )),
        }
    }

    async fn commit_reload(&self, config: Value, files: Vec<ConfigFileDescriptor>) -> Vec<ChangeRecord> {
        let environment = self.inner.options.environment.clone();
        let source = files
            .last()
            .map(|f| f.path.display().to_string())
            .unwrap_or_default();
        let loaded: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

        let snapshot_source = self.inner.options.auto_snapshot.then(|| config.clone());
        let changes = {
            let mut state = self.inner.state.write().await;
            let changes =
                ChangeDetector.detect_changes(&state.config, &config, &source, environment.as_deref());
            state.config = config;
            state.files = files;
            self.inner.cache.clear().await;
            changes
        };

        info!(
            files = loaded.len(),
            changes = changes.len(),
            environment = ?environment,
            "配置已重新加载"
        );

        // 快照取刚提交的值，之后的运行时修改不应混进来
        if let Some(committed) = snapshot_source.filter(|_| !changes.is_empty()) {
            self.store_snapshot(None, &committed, Some("reload".to_string())).await;
        }

        self.inner.events.publish(ConfigEvent::Loaded {
            files: loaded,
            environment,
            at: Utc::now(),
        });
        self.publish_changes(&changes);
        changes
    }

    fn publish_changes(&self, changes: &[ChangeRecord]) {
        if changes.is_empty() {
            return;
        }
        metrics::counter!("hotconf_changes_total").increment(changes.len() as u64);
        self.inner.events.publish(ConfigEvent::Changed(changes.to_vec()));
    }

    fn publish_error(&self, operation: &str, error: ConfigError) {
        self.inner.events.publish(ConfigEvent::Error {
            operation: operation.to_string(),
            error,
            at: Utc::now(),
        });
    }

    fn cache_key(path: &ConfigPath) -> String {
        path.segments().join("\u{1f}")
    }

    /// 读取路径上的值，结果按路径缓存直到下一次变更
    pub async fn get(&self, path: impl Into<ConfigPath>) -> Option<Value> {
        let path = path.into();
        let key = Self::cache_key(&path);
        if let Some(hit) = self.inner.cache.get(&key).await {
            return Some(hit);
        }

        // 持有读锁回填缓存，写者在写锁内清空缓存，旧值不会在清空之后写回
        let state = self.inner.state.read().await;
        let found = safe_ops::get(&state.config, &path).cloned()?;
        self.inner.cache.set(key, found.clone()).await;
        Some(found)
    }

    pub async fn get_or(&self, path: impl Into<ConfigPath>, default: Value) -> Value {
        self.get(path).await.unwrap_or(default)
    }

    /// 读取并反序列化为 `T`
    pub async fn get_typed<T>(&self, path: impl Into<ConfigPath>) -> ConfigResult<T>
    where
        T: DeserializeOwned,
    {
        let path = path.into();
        let value = self
            .get(&path)
            .await
            .ok_or_else(|| ConfigError::validation(path.to_string(), "配置项不存在"))?;

        T::deserialize(&value).map_err(|e| ConfigError::Validation {
            path: path.to_string(),
            value: Some(value.clone()),
            message: format!("类型转换失败: {e}"),
        })
    }

    pub async fn has(&self, path: impl Into<ConfigPath>) -> bool {
        let state = self.inner.state.read().await;
        safe_ops::has(&state.config, path)
    }

    /// 当前完整配置的副本
    pub async fn config(&self) -> Value {
        self.inner.state.read().await.config.clone()
    }

    pub fn environment(&self) -> Option<&str> {
        self.inner.options.environment.as_deref()
    }

    pub async fn loaded_files(&self) -> Vec<ConfigFileDescriptor> {
        self.inner.state.read().await.files.clone()
    }

    fn check_writable(path: &ConfigPath) -> ConfigResult<()> {
        if path.is_root() {
            return Err(ConfigError::validation("", "不能替换根配置，请使用 merge"));
        }
        if safe_ops::contains_reserved(path) {
            return Err(ConfigError::validation(path.to_string(), "路径包含保留键"));
        }
        Ok(())
    }

    /// 运行时写入单个值
    pub async fn set(&self, path: impl Into<ConfigPath>, value: Value) -> ConfigResult<Vec<ChangeRecord>> {
        let path = path.into();
        Self::check_writable(&path)?;
        self.mutate("set", |current| safe_ops::set(current, &path, value))
            .await
    }

    pub async fn delete(&self, path: impl Into<ConfigPath>) -> ConfigResult<Vec<ChangeRecord>> {
        let path = path.into();
        Self::check_writable(&path)?;
        self.mutate("delete", |current| safe_ops::delete(current, &path))
            .await
    }

    /// 把映射深度合并到当前配置上
    pub async fn merge(&self, partial: &Value) -> ConfigResult<Vec<ChangeRecord>> {
        if !partial.is_object() {
            return Err(ConfigError::Validation {
                path: String::new(),
                value: Some(partial.clone()),
                message: "只能合并映射类型的配置".to_string(),
            });
        }
        if let Some(path) = find_reserved(partial, "") {
            return Err(ConfigError::validation(path, "配置包含保留键"));
        }
        self.mutate("merge", |current| safe_ops::merge_deep(current, &[partial]))
            .await
    }

    async fn mutate<F>(&self, operation: &str, apply: F) -> ConfigResult<Vec<ChangeRecord>>
    where
        F: FnOnce(&Value) -> Value,
    {
        let environment = self.inner.options.environment.as_deref();
        let changes = {
            let mut state = self.inner.state.write().await;
            let next = apply(&state.config);
            if let Err(err) = self.inner.validators.validate(&next) {
                drop(state);
                warn!(operation, error = %err, "运行时修改未通过校验");
                self.publish_error(operation, err.clone());
                return Err(err);
            }
            let changes = ChangeDetector.detect_changes(&state.config, &next, RUNTIME_SOURCE, environment);
            state.config = next;
            if !changes.is_empty() {
                self.inner.cache.clear().await;
            }
            changes
        };

        if !changes.is_empty() {
            debug!(operation, changes = changes.len(), "运行时修改已提交");
            self.publish_changes(&changes);
        }
        Ok(changes)
    }

    /// 为当前配置创建快照，未给出 id 时自动生成
    pub async fn create_snapshot(&self, id: Option<String>, description: Option<String>) -> Snapshot {
        let config = self.config().await;
        self.store_snapshot(id, &config, description).await
    }

    async fn store_snapshot(&self, id: Option<String>, config: &Value, description: Option<String>) -> Snapshot {
        let id = id.unwrap_or_else(|| format!("snapshot-{}", Uuid::new_v4()));
        let snapshot = self
            .inner
            .snapshots
            .write()
            .await
            .create(id.clone(), config, description);
        self.inner.events.publish(ConfigEvent::SnapshotCreated { id });
        snapshot
    }

    /// 恢复到指定快照；快照内容同样需要通过校验
    pub async fn rollback(&self, id: &str) -> ConfigResult<Vec<ChangeRecord>> {
        let target = match self.inner.snapshots.read().await.get(id) {
            Some(snapshot) => snapshot.config.clone(),
            None => {
                let err = ConfigError::validation(id, "快照不存在");
                self.publish_error("rollback", err.clone());
                return Err(err);
            }
        };

        if let Err(err) = self.inner.validators.validate(&target) {
            self.publish_error("rollback", err.clone());
            return Err(err);
        }

        let source = format!("snapshot:{id}");
        let changes = {
            let mut state = self.inner.state.write().await;
            let changes = ChangeDetector.detect_changes(
                &state.config,
                &target,
                &source,
                self.inner.options.environment.as_deref(),
            );
            state.config = target;
            self.inner.cache.clear().await;
            changes
        };

        info!(snapshot_id = %id, changes = changes.len(), "配置已回滚");
        self.inner.events.publish(ConfigEvent::RolledBack {
            id: id.to_string(),
            changes: changes.len(),
        });
        self.publish_changes(&changes);
        Ok(changes)
    }

    pub async fn list_snapshots(&self) -> Vec<String> {
        self.inner.snapshots.read().await.list()
    }

    pub async fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.inner.snapshots.read().await.get(id).cloned()
    }

    pub async fn compare_snapshots(&self, left: &str, right: &str) -> SnapshotComparison {
        self.inner.snapshots.read().await.compare(left, right)
    }

    pub async fn export_snapshots(&self) -> ConfigResult<String> {
        self.inner.snapshots.read().await.export()
    }

    pub async fn import_snapshots(&self, document: &str) -> ConfigResult<usize> {
        self.inner.snapshots.write().await.import(document)
    }

    /// 通过注入的保存器写出当前配置
    pub async fn save(&self, path: impl AsRef<Path>, format: &str) -> ConfigResult<()> {
        let path = path.as_ref();
        let saver = self
            .inner
            .saver
            .as_ref()
            .ok_or_else(|| ConfigError::with_code("NO_SAVER", "未配置保存器"))?;

        let config = self.config().await;
        if let Err(err) = saver.save(path, &config, format).await {
            self.publish_error("save", err.clone());
            return Err(err);
        }

        info!(path = %path.display(), format, "配置已保存");
        self.inner.events.publish(ConfigEvent::Saved {
            path: path.to_path_buf(),
            format: format.to_string(),
        });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.inner.events.subscribe()
    }

    /// 安排一次防抖重载，突发的多次调用只执行最后一次
    pub fn trigger_reload(&self) -> JoinHandle<bool> {
        let manager = self.clone();
        self.inner.debouncer.call(move || async move {
            if let Err(err) = manager.reload().await {
                debug!(error = %err, "防抖重载失败");
            }
        })
    }

    /// 监听已加载的文件，文件变化时触发防抖重载
    ///
    /// 再次调用会替换之前的监听。
    pub async fn watch(&self, source: Arc<dyn ConfigWatchSource>) -> ConfigResult<()> {
        let paths: Vec<PathBuf> = self.loaded_files().await.into_iter().map(|f| f.path).collect();
        if paths.is_empty() {
            return Err(ConfigError::with_code("NOT_LOADED", "尚未加载配置，无法开始监听"));
        }

        let mut subscription = source.watch(&paths).await?;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!(path = %event.path.display(), kind = ?event.kind, "配置文件变化");
                ConfigManager { inner }.trigger_reload();
            }
            debug!("配置监听结束");
        });

        if let Some(previous) = self.inner.watch_task.lock().await.replace(task) {
            previous.abort();
        }
        info!(files = paths.len(), "开始监听配置文件");
        Ok(())
    }

    /// 停止监听并丢弃尚未执行的防抖重载
    pub async fn unwatch(&self) {
        if let Some(task) = self.inner.watch_task.lock().await.take() {
            task.abort();
        }
        self.inner.debouncer.cancel();
    }

    pub async fn stats(&self) -> ManagerStats {
        let loaded_files = self.inner.state.read().await.files.len();
        let snapshots = self.inner.snapshots.read().await.len();
        let watching = self
            .inner
            .watch_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished());

        ManagerStats {
            environment: self.inner.options.environment.clone(),
            loaded_files,
            snapshots,
            subscribers: self.inner.events.subscriber_count(),
            reloading: self.inner.reloading.load(Ordering::Acquire),
            watching,
            cache: self.inner.cache.stats().await,
            recovery: self.inner.recovery.stats().await,
        }
    }
}

fn find_reserved(value: &Value, parent: &str) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            let path = crate::path::join_key(parent, key);
            if safe_ops::is_reserved_key(key) {
                Some(path)
            } else {
                find_reserved(child, &path)
            }
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(index, child)| find_reserved(child, &crate::path::join_index(parent, index))),
        _ => None,
    }
}

/// 配置管理器构建器
pub struct ConfigManagerBuilder {
    options: ConfigManagerOptions,
    loader: Option<Arc<dyn ConfigLoader>>,
    discovery: Option<Arc<dyn ConfigDiscovery>>,
    saver: Option<Arc<dyn ConfigSaver>>,
    env_provider: Option<Arc<dyn EnvProvider>>,
    validators: ValidatorRegistry,
}

impl ConfigManagerBuilder {
    pub fn new(options: ConfigManagerOptions) -> Self {
        Self {
            options,
            loader: None,
            discovery: None,
            saver: None,
            env_provider: None,
            validators: ValidatorRegistry::new(),
        }
    }

    pub fn loader(mut self, loader: Arc<dyn ConfigLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn ConfigDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn saver(mut self, saver: Arc<dyn ConfigSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    /// 替换环境变量来源，默认读取进程环境
    pub fn env_provider(mut self, provider: Arc<dyn EnvProvider>) -> Self {
        self.env_provider = Some(provider);
        self
    }

    pub fn validator(mut self, validator: Box<dyn ConfigValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn build(self) -> ConfigResult<ConfigManager> {
        let loader = self
            .loader
            .ok_or_else(|| ConfigError::with_code("MISSING_LOADER", "构建配置管理器需要 loader"))?;
        let discovery = self
            .discovery
            .ok_or_else(|| ConfigError::with_code("MISSING_DISCOVERY", "构建配置管理器需要 discovery"))?;

        let options = self.options;
        let env_options = EnvResolverOptions {
            strict: options.strict_env,
            prefix: options.env_prefix.clone(),
            warn: options.warn_on_missing_env,
        };
        let env_provider = self.env_provider.unwrap_or_else(|| Arc::new(ProcessEnv));
        let cache = EnhancedCache::new(EnhancedCacheOptions {
            max_size: options.cache_max_size,
            ttl_ms: options.cache_ttl_ms,
            max_memory_bytes: options.cache_max_memory_bytes,
        });

        let inner = Inner {
            loader,
            discovery,
            saver: self.saver,
            state: RwLock::new(ConfigState {
                config: Value::Object(Map::new()),
                files: Vec::new(),
            }),
            cache,
            snapshots: RwLock::new(SnapshotManager::new(options.max_snapshots)),
            recovery: ConfigRecoveryManager::new(options.recovery.clone()),
            env: EnvResolver::with_provider(env_provider, env_options),
            validators: self.validators,
            events: EventBus::new(options.event_capacity),
            reloading: AtomicBool::new(false),
            debouncer: Debouncer::new(Duration::from_millis(options.debounce_ms)),
            watch_task: Mutex::new(None),
            options,
        };

        Ok(ConfigManager {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticLoader(Value);

    #[async_trait]
    impl ConfigLoader for StaticLoader {
        async fn load(&self, _path: &Path) -> ConfigResult<Value> {
            Ok(self.0.clone())
        }
    }

    struct SingleFile;

    #[async_trait]
    impl ConfigDiscovery for SingleFile {
        async fn discover(
            &self,
            dir: &Path,
            base_name: &str,
            _environment: Option<&str>,
        ) -> ConfigResult<Vec<ConfigFileDescriptor>> {
            Ok(vec![ConfigFileDescriptor::base(dir.join(format!("{base_name}.json")), "json")])
        }
    }

    fn manager(initial: Value) -> ConfigManager {
        ConfigManagerBuilder::new(ConfigManagerOptions::default())
            .loader(Arc::new(StaticLoader(initial)))
            .discovery(Arc::new(SingleFile))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = ConfigManagerBuilder::new(ConfigManagerOptions::default())
            .build()
            .err()
            .unwrap();
        assert_eq!(err.code(), Some("MISSING_LOADER"));
    }

    #[test]
    fn test_find_reserved_reports_path() {
        assert_eq!(
            find_reserved(&json!({"a": [{"ok": 1}, {"constructor": 1}]}), ""),
            Some("a[1].constructor".to_string())
        );
        assert_eq!(find_reserved(&json!({"a": {"b": 1}}), ""), None);
    }

    #[tokio::test]
    async fn test_cached_reads_follow_mutations() {
        let manager = manager(json!({"server": {"port": 3000}}));
        manager.load().await.unwrap();

        assert_eq!(manager.get("server.port").await, Some(json!(3000)));
        manager.set("server.port", json!(4000)).await.unwrap();
        assert_eq!(manager.get("server.port").await, Some(json!(4000)));
        assert_eq!(manager.get_typed::<u16>("server.port").await.unwrap(), 4000);
    }

    #[tokio::test]
    async fn test_reserved_paths_are_rejected() {
        let manager = manager(json!({}));
        manager.load().await.unwrap();

        let err = manager.set("__proto__.x", json!(1)).await.unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        let err = manager.merge(&json!({"a": {"prototype": 1}})).await.unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref path, .. } if path == "a.prototype"));
        assert_eq!(manager.config().await, json!({}));
    }
}
