use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use hotconf_core::ConfigManagerOptions;
use serde::Deserialize;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 读取当前环境名时依次尝试的变量
pub const ENVIRONMENT_VARIABLES: [&str; 2] = ["APP_ENV", "NODE_ENV"];

/// 守护进程自身的设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub log_level: String,
    pub log_format: String,
    /// 监听配置文件并自动重载
    pub watch: bool,
    /// 以 JSON 行输出每个配置事件
    pub event_log: bool,
    /// 退出时把快照历史写入该文件
    pub snapshot_file: Option<PathBuf>,
    pub manager: ConfigManagerOptions,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            watch: true,
            event_log: false,
            snapshot_file: None,
            manager: ConfigManagerOptions::default(),
        }
    }
}

/// 命令行上显式给出的覆盖项
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_dir: Option<PathBuf>,
    pub environment: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub no_watch: bool,
}

/// 加载守护进程设置
///
/// 优先级从低到高: 默认值、设置文件、`HOTCONF_` 前缀的环境变量、命令行参数。
/// 嵌套字段用双下划线分隔，例如 `HOTCONF_MANAGER__DEBOUNCE_MS=500`。
pub fn load_settings(settings_file: Option<&Path>, overrides: &CliOverrides) -> Result<DaemonSettings> {
    let mut builder = Config::builder();

    if let Some(path) = settings_file {
        if !path.exists() {
            return Err(anyhow::anyhow!("设置文件不存在: {}", path.display()));
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(
        Environment::with_prefix("HOTCONF")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let mut settings: DaemonSettings = builder
        .build()
        .context("构建守护进程设置失败")?
        .try_deserialize()
        .context("反序列化守护进程设置失败")?;

    apply_overrides(&mut settings, overrides);
    if settings.manager.environment.is_none() {
        settings.manager.environment = detect_environment(|key| std::env::var(key).ok());
    }

    Ok(settings)
}

fn apply_overrides(settings: &mut DaemonSettings, overrides: &CliOverrides) {
    if let Some(dir) = &overrides.config_dir {
        settings.manager.config_dir = dir.clone();
    }
    if let Some(env) = &overrides.environment {
        settings.manager.environment = Some(env.clone());
    }
    if let Some(level) = &overrides.log_level {
        settings.log_level = level.clone();
    }
    if let Some(format) = &overrides.log_format {
        settings.log_format = format.clone();
    }
    if overrides.no_watch {
        settings.watch = false;
    }
}

/// 返回第一个非空的环境变量值
pub fn detect_environment<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    ENVIRONMENT_VARIABLES
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
