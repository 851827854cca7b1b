use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hotconf_core::{ConfigError, ConfigLoader, ConfigResult, LoadErrorKind};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::debug;

use crate::formats::FormatRegistry;

/// 从磁盘读取配置文件，按扩展名选择解析格式
#[derive(Clone, Default)]
pub struct FileConfigLoader {
    registry: Arc<FormatRegistry>,
}

impl FileConfigLoader {
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }
}

pub(crate) fn io_kind(error: &io::Error) -> LoadErrorKind {
    match error.kind() {
        io::ErrorKind::NotFound => LoadErrorKind::NotFound,
        _ => LoadErrorKind::Io,
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load(&self, path: &Path) -> ConfigResult<Value> {
        let display = path.display().to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        let format = self.registry.for_path(path).ok_or_else(|| {
            ConfigError::load(&display, &ext, LoadErrorKind::UnsupportedFormat, "没有匹配的解析格式")
        })?;

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::load(&display, format.name(), io_kind(&e), e))?;

        if content.trim().is_empty() {
            debug!(path = %path.display(), "配置文件为空");
            return Ok(Value::Object(Map::new()));
        }

        let value = format
            .parse(&content)
            .map_err(|e| ConfigError::load(&display, format.name(), LoadErrorKind::Parse, e))?;

        match value {
            Value::Object(_) => {
                debug!(path = %path.display(), format = format.name(), "已加载配置文件");
                Ok(value)
            }
            // YAML 中只有注释的文件解析为 null
            Value::Null => Ok(Value::Object(Map::new())),
            other => Err(ConfigError::load(
                &display,
                format.name(),
                LoadErrorKind::Parse,
                format!("顶层必须是映射，实际为 {}", hotconf_core::ValueType::of(&other)),
            )),
        }
    }
}
