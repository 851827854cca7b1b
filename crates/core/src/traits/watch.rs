use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::ConfigResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Changed,
    Added,
    Removed,
}

/// 文件变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// 一次监听的句柄，丢弃后停止监听
pub struct WatchSubscription {
    pub events: mpsc::Receiver<FileEvent>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchSubscription {
    /// `guard` 在订阅存活期间保持底层监听器
    pub fn new(events: mpsc::Receiver<FileEvent>, guard: impl Any + Send) -> Self {
        Self {
            events,
            _guard: Some(Box::new(guard)),
        }
    }

    pub fn from_receiver(events: mpsc::Receiver<FileEvent>) -> Self {
        Self {
            events,
            _guard: None,
        }
    }

    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.events.recv().await
    }
}

impl fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("has_guard", &self._guard.is_some())
            .finish()
    }
}

/// 文件监听接口
#[async_trait]
pub trait ConfigWatchSource: Send + Sync {
    /// 开始监听给定文件的变化
    async fn watch(&self, paths: &[PathBuf]) -> ConfigResult<WatchSubscription>;
}
