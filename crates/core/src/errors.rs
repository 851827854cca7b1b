use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 加载失败的细分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    NotFound,
    UnsupportedFormat,
    Parse,
    Io,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadErrorKind::NotFound => "not_found",
            LoadErrorKind::UnsupportedFormat => "unsupported_format",
            LoadErrorKind::Parse => "parse",
            LoadErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Schema校验中的单条违规记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
    pub value: Option<Value>,
}

/// 恢复过程中附加到错误上的诊断字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryContext {
    fields: BTreeMap<String, String>,
}

impl RecoveryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.fields.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.fields.iter()
    }
}

impl fmt::Display for RecoveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// 错误种类，`WithContext` 包装不会改变种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Load,
    Watch,
    EnvResolution,
    SchemaValidation,
    CircuitOpen,
}

/// 配置系统错误类型定义
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("配置错误: {message}")]
    Configuration {
        code: Option<String>,
        message: String,
    },

    #[error("配置校验失败 [{path}]: {message}")]
    Validation {
        path: String,
        value: Option<Value>,
        message: String,
    },

    #[error("配置加载失败 {path} ({format}, {kind}): {cause}")]
    Load {
        path: String,
        format: String,
        kind: LoadErrorKind,
        cause: String,
    },

    #[error("文件监听失败 {path}: {cause}")]
    Watch { path: String, cause: String },

    #[error("环境变量未定义: {variable} (路径: {path})")]
    EnvResolution { variable: String, path: String },

    #[error("Schema校验失败: {} 项违规", .violations.len())]
    SchemaValidation {
        violations: Vec<SchemaViolation>,
        path: Option<String>,
        value: Option<Value>,
    },

    #[error("熔断器已打开，拒绝调用 (剩余冷却 {}ms)", .retry_after.as_millis())]
    CircuitOpen { retry_after: Duration },

    #[error("{inner} [{context}]")]
    WithContext {
        #[source]
        inner: Box<ConfigError>,
        context: RecoveryContext,
    },
}

/// 统一的Result类型
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration {
            code: None,
            message: msg.into(),
        }
    }

    pub fn with_code<C: Into<String>, S: Into<String>>(code: C, msg: S) -> Self {
        Self::Configuration {
            code: Some(code.into()),
            message: msg.into(),
        }
    }

    pub fn validation<P: Into<String>, S: Into<String>>(path: P, msg: S) -> Self {
        Self::Validation {
            path: path.into(),
            value: None,
            message: msg.into(),
        }
    }

    pub fn load<P, F, C>(path: P, format: F, kind: LoadErrorKind, cause: C) -> Self
    where
        P: Into<String>,
        F: Into<String>,
        C: ToString,
    {
        Self::Load {
            path: path.into(),
            format: format.into(),
            kind,
            cause: cause.to_string(),
        }
    }

    pub fn watch<P: Into<String>, C: ToString>(path: P, cause: C) -> Self {
        Self::Watch {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// 附加诊断上下文；已有上下文时合并，不嵌套
    pub fn with_context(self, extra: RecoveryContext) -> Self {
        match self {
            ConfigError::WithContext { inner, mut context } => {
                for (key, value) in extra.fields {
                    context.fields.insert(key, value);
                }
                ConfigError::WithContext { inner, context }
            }
            other => ConfigError::WithContext {
                inner: Box::new(other),
                context: extra,
            },
        }
    }

    /// 去掉上下文包装后的原始错误
    pub fn root(&self) -> &ConfigError {
        match self {
            ConfigError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    pub fn context(&self) -> Option<&RecoveryContext> {
        match self {
            ConfigError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::WithContext { inner, .. } => inner.kind(),
            ConfigError::Configuration { .. } => ErrorKind::Configuration,
            ConfigError::Validation { .. } => ErrorKind::Validation,
            ConfigError::Load { .. } => ErrorKind::Load,
            ConfigError::Watch { .. } => ErrorKind::Watch,
            ConfigError::EnvResolution { .. } => ErrorKind::EnvResolution,
            ConfigError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            ConfigError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self.root() {
            ConfigError::Configuration { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == ErrorKind::CircuitOpen
    }

    /// 解析/语法类错误，重试无法修复
    pub fn is_parse_error(&self) -> bool {
        match self.root() {
            ConfigError::Load { kind, .. } => *kind == LoadErrorKind::Parse,
            ConfigError::Configuration { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("parse error")
                    || lower.contains("syntax error")
                    || lower.contains("unexpected token")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind() {
        let err = ConfigError::load("config.json", "json", LoadErrorKind::Parse, "bad token");
        let enriched = err.with_context(RecoveryContext::new().with("circuit_state", "Open"));

        assert_eq!(enriched.kind(), ErrorKind::Load);
        assert!(enriched.is_parse_error());
        assert_eq!(enriched.context().and_then(|c| c.get("circuit_state")), Some("Open"));
        assert!(enriched.to_string().contains("circuit_state=Open"));
    }

    #[test]
    fn test_context_merges_instead_of_nesting() {
        let err = ConfigError::configuration("boom")
            .with_context(RecoveryContext::new().with("a", 1))
            .with_context(RecoveryContext::new().with("b", 2));

        match &err {
            ConfigError::WithContext { inner, context } => {
                assert!(matches!(**inner, ConfigError::Configuration { .. }));
                assert_eq!(context.get("a"), Some("1"));
                assert_eq!(context.get("b"), Some("2"));
            }
            other => panic!("unexpected error shape: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_detection() {
        assert!(ConfigError::configuration("JSON parse error at line 3").is_parse_error());
        assert!(!ConfigError::load("a.toml", "toml", LoadErrorKind::NotFound, "missing").is_parse_error());
        assert!(!ConfigError::CircuitOpen {
            retry_after: Duration::from_millis(5)
        }
        .is_parse_error());
    }

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let err = ConfigError::CircuitOpen {
            retry_after: Duration::from_millis(10),
        }
        .with_context(RecoveryContext::new().with("operation", "config_load"));
        assert!(err.is_circuit_open());
        assert_eq!(ConfigError::with_code("E_X", "x").code(), Some("E_X"));
    }
}
