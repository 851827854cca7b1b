use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigResult;

/// 发现阶段找到的一个配置文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileDescriptor {
    pub path: PathBuf,
    /// 解析该文件使用的格式标识，如 `json`
    pub format: String,
    pub is_environment_specific: bool,
    pub environment: Option<String>,
}

impl ConfigFileDescriptor {
    pub fn base(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            is_environment_specific: false,
            environment: None,
        }
    }

    pub fn for_environment(
        path: impl Into<PathBuf>,
        format: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            is_environment_specific: true,
            environment: Some(environment.into()),
        }
    }
}

/// 配置文件加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 读取并解析文件；解析失败必须以 `LoadErrorKind::Parse` 报告
    async fn load(&self, path: &Path) -> ConfigResult<Value>;
}

/// 配置文件发现接口
#[async_trait]
pub trait ConfigDiscovery: Send + Sync {
    /// 按应用顺序返回文件：基础文件在前，环境文件在后
    async fn discover(
        &self,
        dir: &Path,
        base_name: &str,
        environment: Option<&str>,
    ) -> ConfigResult<Vec<ConfigFileDescriptor>>;
}

/// 配置序列化保存接口
#[async_trait]
pub trait ConfigSaver: Send + Sync {
    /// 格式不受支持时返回 `LoadErrorKind::UnsupportedFormat`
    async fn save(&self, path: &Path, config: &Value, format: &str) -> ConfigResult<()>;
}
