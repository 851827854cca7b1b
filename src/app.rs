use std::sync::Arc;

use anyhow::{Context, Result};
use hotconf_core::{ConfigEvent, ConfigManager, ConfigManagerBuilder, EventSummary};
use hotconf_infrastructure::{FileConfigLoader, FileConfigSaver, FileDiscovery, FormatRegistry, NotifyConfigWatcher};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::common::DaemonSettings;

/// 主应用程序
pub struct Application {
    settings: DaemonSettings,
    manager: ConfigManager,
}

impl Application {
    /// 创建新的应用实例，基于文件系统装配配置管理器
    pub fn new(settings: DaemonSettings) -> Result<Self> {
        let registry = Arc::new(FormatRegistry::default());
        info!(
            config_dir = %settings.manager.config_dir.display(),
            environment = ?settings.manager.environment,
            formats = ?registry.names(),
            "初始化配置管理器"
        );

        let manager = ConfigManagerBuilder::new(settings.manager.clone())
            .loader(Arc::new(FileConfigLoader::new(Arc::clone(&registry))))
            .discovery(Arc::new(FileDiscovery::new(Arc::clone(&registry))))
            .saver(Arc::new(FileConfigSaver::new(registry)))
            .build()
            .context("创建配置管理器失败")?;

        Ok(Self { settings, manager })
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }

    /// 加载配置并持续处理事件，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut events = self.manager.subscribe();

        if let Some(path) = &self.settings.snapshot_file {
            self.restore_snapshots(path).await;
        }

        self.manager.load().await.context("首次加载配置失败")?;

        if self.settings.watch {
            self.manager
                .watch(Arc::new(NotifyConfigWatcher::default()))
                .await
                .context("启动配置文件监听失败")?;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止配置监听");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "事件处理落后，部分事件被丢弃");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.manager.unwatch().await;
        if let Some(path) = &self.settings.snapshot_file {
            self.persist_snapshots(path).await?;
        }
        Ok(())
    }

    fn handle_event(&self, event: &ConfigEvent) {
        if self.settings.event_log {
            match serde_json::to_string(&EventSummary::from(event)) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "事件序列化失败"),
            }
        }

        match event {
            ConfigEvent::Changed(changes) => {
                for change in changes {
                    debug!(
                        kind = %change.kind,
                        path = %change.path,
                        source = %change.source,
                        "配置项变更"
                    );
                }
            }
            ConfigEvent::Error { operation, error, .. } => {
                error!(operation = %operation, error = %error, "配置操作失败，继续使用当前配置");
            }
            other => debug!(event = other.name(), "配置事件"),
        }
    }

    async fn restore_snapshots(&self, path: &std::path::Path) {
        let document = match tokio::fs::read_to_string(path).await {
            Ok(document) => document,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "没有可恢复的快照文件");
                return;
            }
        };
        match self.manager.import_snapshots(&document).await {
            Ok(count) => info!(count, path = %path.display(), "已恢复快照历史"),
            Err(e) => warn!(error = %e, path = %path.display(), "快照文件无法导入，忽略"),
        }
    }

    async fn persist_snapshots(&self, path: &std::path::Path) -> Result<()> {
        let document = self.manager.export_snapshots().await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建快照目录失败: {}", parent.display()))?;
        }
        tokio::fs::write(path, document)
            .await
            .with_context(|| format!("写入快照文件失败: {}", path.display()))?;
        info!(path = %path.display(), "快照历史已保存");
        Ok(())
    }
}
