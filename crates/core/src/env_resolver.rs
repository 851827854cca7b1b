//! 环境变量占位符解析
//!
//! 支持两种写法：
//! - `${NAME}` 直接替换
//! - `${NAME:default}` 变量缺失时使用默认值（默认值可以为空串）
//!
//! 替换是纯文本的，结果总是字符串。变量查找通过 [`EnvProvider`] 注入，
//! 测试可以传入 `HashMap` 而不依赖进程环境。

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{ConfigError, ConfigResult};
use crate::path::{join_index, join_key};

lazy_static! {
    /// Group 1: variable name (no `}` or `:`), group 2: default value if present
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("placeholder pattern is valid");
}

/// 环境变量来源
pub trait EnvProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// 读取当前进程环境
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvProvider for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvProvider for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// 解析器选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvResolverOptions {
    /// 缺失且无默认值时报错
    pub strict: bool,
    /// 查找时拼接在变量名前
    pub prefix: String,
    /// 非严格模式下缺失变量是否打印警告
    pub warn: bool,
}

impl Default for EnvResolverOptions {
    fn default() -> Self {
        Self {
            strict: false,
            prefix: String::new(),
            warn: true,
        }
    }
}

/// `validate` 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvValidation {
    pub valid: bool,
    pub missing: Vec<String>,
}

pub struct EnvResolver {
    env: Arc<dyn EnvProvider>,
    options: EnvResolverOptions,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(EnvResolverOptions::default())
    }
}

impl EnvResolver {
    /// 使用进程环境
    pub fn new(options: EnvResolverOptions) -> Self {
        Self::with_provider(Arc::new(ProcessEnv), options)
    }

    pub fn with_provider(env: Arc<dyn EnvProvider>, options: EnvResolverOptions) -> Self {
        Self { env, options }
    }

    pub fn options(&self) -> &EnvResolverOptions {
        &self.options
    }

    /// 递归替换结构中所有字符串里的占位符
    pub fn resolve(&self, value: &Value) -> ConfigResult<Value> {
        self.resolve_at(value, "")
    }

    fn resolve_at(&self, value: &Value, path: &str) -> ConfigResult<Value> {
        match value {
            Value::String(text) => Ok(Value::String(self.resolve_str(text, path)?)),
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    resolved.push(self.resolve_at(item, &join_index(path, index))?);
                }
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_at(item, &join_key(path, key))?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// 替换单个字符串，`path` 仅用于错误信息
    pub fn resolve_str(&self, text: &str, path: &str) -> ConfigResult<String> {
        let mut failure = None;
        let resolved = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            let lookup = format!("{}{}", self.options.prefix, name);
            if let Some(found) = self.env.get(&lookup) {
                return found;
            }
            if let Some(default) = caps.get(2) {
                return default.as_str().to_string();
            }
            if self.options.strict {
                if failure.is_none() {
                    failure = Some(ConfigError::EnvResolution {
                        variable: name.to_string(),
                        path: path.to_string(),
                    });
                }
            } else if self.options.warn {
                warn!(variable = %lookup, path = %path, "环境变量未定义，保留原始占位符");
            }
            caps[0].to_string()
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(resolved.into_owned()),
        }
    }

    /// 结构中任一字符串含占位符时返回 true
    pub fn has_env_vars(&self, value: &Value) -> bool {
        match value {
            Value::String(text) => PLACEHOLDER.is_match(text),
            Value::Array(items) => items.iter().any(|item| self.has_env_vars(item)),
            Value::Object(map) => map.values().any(|item| self.has_env_vars(item)),
            _ => false,
        }
    }

    /// 按首次出现顺序去重的变量名（不含前缀）
    pub fn extract_env_vars(&self, value: &Value) -> Vec<String> {
        let mut names = Vec::new();
        visit_placeholders(value, &mut |name, _| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        });
        names
    }

    /// 列出无默认值且环境中缺失的变量
    pub fn validate(&self, value: &Value) -> EnvValidation {
        let mut missing: Vec<String> = Vec::new();
        visit_placeholders(value, &mut |name, has_default| {
            if has_default || missing.iter().any(|n| n == name) {
                return;
            }
            let lookup = format!("{}{}", self.options.prefix, name);
            if self.env.get(&lookup).is_none() {
                missing.push(name.to_string());
            }
        });
        EnvValidation {
            valid: missing.is_empty(),
            missing,
        }
    }
}

fn visit_placeholders(value: &Value, visit: &mut dyn FnMut(&str, bool)) {
    match value {
        Value::String(text) => {
            for caps in PLACEHOLDER.captures_iter(text) {
                visit(&caps[1], caps.get(2).is_some());
            }
        }
        Value::Array(items) => items.iter().for_each(|item| visit_placeholders(item, visit)),
        Value::Object(map) => map.values().for_each(|item| visit_placeholders(item, visit)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(vars: &[(&str, &str)], options: EnvResolverOptions) -> EnvResolver {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvResolver::with_provider(Arc::new(env), options)
    }

    #[test]
    fn test_default_value_used_when_missing() {
        let r = resolver(&[], EnvResolverOptions::default());
        assert_eq!(r.resolve(&json!("${MISSING:fallback}")).unwrap(), json!("fallback"));
        assert_eq!(r.resolve(&json!("${MISSING:}")).unwrap(), json!(""));
    }

    #[test]
    fn test_multiple_placeholders_in_one_string() {
        let r = resolver(&[("HOST", "localhost"), ("PORT", "3000")], EnvResolverOptions::default());
        let resolved = r.resolve(&json!({"url": "http://${HOST}:${PORT}/x"})).unwrap();
        assert_eq!(resolved, json!({"url": "http://localhost:3000/x"}));
    }

    #[test]
    fn test_result_is_always_string() {
        let r = resolver(&[("PORT", "8080"), ("DEBUG", "true")], EnvResolverOptions::default());
        let resolved = r.resolve(&json!({"port": "${PORT}", "debug": "${DEBUG}", "n": 5})).unwrap();
        assert_eq!(resolved, json!({"port": "8080", "debug": "true", "n": 5}));
    }

    #[test]
    fn test_strict_mode_reports_variable_and_path() {
        let options = EnvResolverOptions {
            strict: true,
            ..Default::default()
        };
        let r = resolver(&[], options);
        let err = r
            .resolve(&json!({"db": {"hosts": ["ok", "${MISSING}"]}}))
            .unwrap_err();
        match err {
            ConfigError::EnvResolution { variable, path } => {
                assert_eq!(variable, "MISSING");
                assert_eq!(path, "db.hosts[1]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_strict_leaves_token() {
        let r = resolver(&[], EnvResolverOptions::default());
        assert_eq!(r.resolve(&json!("a-${MISSING}-b")).unwrap(), json!("a-${MISSING}-b"));
    }

    #[test]
    fn test_prefix_applies_to_lookup_only() {
        let options = EnvResolverOptions {
            prefix: "APP_".to_string(),
            ..Default::default()
        };
        let r = resolver(&[("APP_NAME", "svc"), ("NAME", "wrong")], options);
        let config = json!({"name": "${NAME}", "other": "${OTHER:x}"});
        assert_eq!(r.resolve(&config).unwrap(), json!({"name": "svc", "other": "x"}));
        assert_eq!(r.extract_env_vars(&config), vec!["NAME", "OTHER"]);
    }

    #[test]
    fn test_extract_and_validate() {
        let r = resolver(&[("PRESENT", "1")], EnvResolverOptions::default());
        let config = json!({
            "a": "${B_VAR} ${A_VAR:d}",
            "list": ["${B_VAR}", "${PRESENT}", "${C_VAR}"],
            "plain": 1
        });

        assert!(r.has_env_vars(&config));
        assert!(!r.has_env_vars(&json!({"x": "no vars", "n": 1})));
        assert_eq!(r.extract_env_vars(&config), vec!["B_VAR", "A_VAR", "PRESENT", "C_VAR"]);

        let report = r.validate(&config);
        assert!(!report.valid);
        assert_eq!(report.missing, vec!["B_VAR", "C_VAR"]);
    }
}
