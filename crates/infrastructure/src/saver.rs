use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hotconf_core::{ConfigError, ConfigResult, ConfigSaver, LoadErrorKind};
use serde_json::Value;
use tokio::fs;
use tracing::info;

use crate::formats::FormatRegistry;
use crate::loader::io_kind;

/// 按指定格式序列化并写入文件，父目录不存在时自动创建
#[derive(Clone, Default)]
pub struct FileConfigSaver {
    registry: Arc<FormatRegistry>,
}

impl FileConfigSaver {
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ConfigSaver for FileConfigSaver {
    async fn save(&self, path: &Path, config: &Value, format: &str) -> ConfigResult<()> {
        let display = path.display().to_string();
        let codec = self.registry.get(format).ok_or_else(|| {
            ConfigError::load(&display, format, LoadErrorKind::UnsupportedFormat, "不支持的保存格式")
        })?;

        let text = codec
            .serialize(config)
            .map_err(|e| ConfigError::load(&display, codec.name(), LoadErrorKind::Parse, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::load(&display, codec.name(), io_kind(&e), e))?;
        }

        fs::write(path, text)
            .await
            .map_err(|e| ConfigError::load(&display, codec.name(), io_kind(&e), e))?;

        info!(path = %path.display(), format = codec.name(), "配置文件已写入");
        Ok(())
    }
}
