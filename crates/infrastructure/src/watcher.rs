//! 基于 `notify` 的配置文件监听
//!
//! 监听的是文件所在目录而不是文件本身，编辑器"写临时文件再重命名"的保存方式
//! 会替换 inode，直接监听文件会在第一次保存后失效。

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hotconf_core::{ConfigError, ConfigResult, ConfigWatchSource, FileEvent, FileEventKind, WatchSubscription};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct NotifyConfigWatcher {
    channel_capacity: usize,
}

impl Default for NotifyConfigWatcher {
    fn default() -> Self {
        Self { channel_capacity: 100 }
    }
}

impl NotifyConfigWatcher {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }
}

/// 绝对化路径；父目录存在时解析符号链接，与 notify 上报的路径保持一致
fn normalize(path: &Path) -> ConfigResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| ConfigError::watch(path.display().to_string(), e))?
            .join(path)
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(std::fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or(absolute.clone())),
        _ => Ok(absolute),
    }
}

fn map_kind(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Added),
        EventKind::Modify(_) => Some(FileEventKind::Changed),
        EventKind::Remove(_) => Some(FileEventKind::Removed),
        _ => None,
    }
}

#[async_trait]
impl ConfigWatchSource for NotifyConfigWatcher {
    async fn watch(&self, paths: &[PathBuf]) -> ConfigResult<WatchSubscription> {
        // 归一化路径 -> 调用方给出的原始路径
        let mut targets: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut dirs = BTreeSet::new();
        for path in paths {
            let normalized = normalize(path)?;
            if let Some(parent) = normalized.parent() {
                dirs.insert(parent.to_path_buf());
            }
            targets.insert(normalized, path.clone());
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let Some(kind) = map_kind(&event.kind) else {
                    return;
                };
                for changed in &event.paths {
                    if let Some(original) = targets.get(changed) {
                        let _ = tx.blocking_send(FileEvent {
                            path: original.clone(),
                            kind,
                        });
                    }
                }
            }
            Err(e) => warn!(error = %e, "文件监听出错"),
        })
        .map_err(|e| ConfigError::watch("*", e))?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigError::watch(dir.display().to_string(), e))?;
            debug!(dir = %dir.display(), "监听目录");
        }

        info!(files = paths.len(), dirs = dirs.len(), "文件监听已启动");
        Ok(WatchSubscription::new(rx, watcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(map_kind(&EventKind::Create(CreateKind::File)), Some(FileEventKind::Added));
        assert_eq!(map_kind(&EventKind::Modify(ModifyKind::Any)), Some(FileEventKind::Changed));
        assert_eq!(map_kind(&EventKind::Remove(RemoveKind::File)), Some(FileEventKind::Removed));
        assert_eq!(map_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn test_normalize_makes_paths_absolute() {
        let normalized = normalize(Path::new("some/config.json")).unwrap();
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("some/config.json"));
    }
}
