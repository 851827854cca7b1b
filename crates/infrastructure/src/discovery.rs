use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hotconf_core::{ConfigDiscovery, ConfigError, ConfigFileDescriptor, ConfigResult, LoadErrorKind};
use tokio::fs;
use tracing::debug;

use crate::formats::FormatRegistry;

/// 在目录中查找 `<base>.<ext>` 和 `<base>.<env>.<ext>`
///
/// 每一层只取一个文件，扩展名按注册表顺序尝试，先找到的生效。
#[derive(Clone, Default)]
pub struct FileDiscovery {
    registry: Arc<FormatRegistry>,
}

impl FileDiscovery {
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self { registry }
    }

    async fn first_existing(&self, dir: &Path, stem: &str) -> Option<(PathBuf, &'static str)> {
        for ext in self.registry.extensions() {
            let candidate = dir.join(format!("{stem}.{ext}"));
            let is_file = fs::metadata(&candidate)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if is_file {
                let name = self.registry.get(ext).map(|f| f.name()).unwrap_or(ext);
                return Some((candidate, name));
            }
        }
        None
    }
}

#[async_trait]
impl ConfigDiscovery for FileDiscovery {
    async fn discover(
        &self,
        dir: &Path,
        base_name: &str,
        environment: Option<&str>,
    ) -> ConfigResult<Vec<ConfigFileDescriptor>> {
        let is_dir = fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(ConfigError::load(
                dir.display().to_string(),
                "*",
                LoadErrorKind::NotFound,
                "配置目录不存在",
            ));
        }

        let mut files = Vec::with_capacity(2);
        if let Some((path, format)) = self.first_existing(dir, base_name).await {
            files.push(ConfigFileDescriptor::base(path, format));
        }

        if let Some(env) = environment.filter(|e| !e.is_empty()) {
            let stem = format!("{base_name}.{env}");
            if let Some((path, format)) = self.first_existing(dir, &stem).await {
                files.push(ConfigFileDescriptor::for_environment(path, format, env));
            }
        }

        debug!(dir = %dir.display(), found = files.len(), "配置文件发现完成");
        Ok(files)
    }
}
