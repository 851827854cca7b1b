//! 配置文件格式注册表
//!
//! 每种格式提供一对 `parse` / `serialize`，按名称或扩展名查找。
//! 核心库只看到解析后的 [`Value`]，不感知具体格式。

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("解析失败: {0}")]
    Parse(String),

    #[error("序列化失败: {0}")]
    Serialize(String),
}

pub trait ConfigFormat: Send + Sync {
    /// 格式标识，如 `json`
    fn name(&self) -> &'static str;

    /// 按优先级排列的扩展名，不含点号
    fn extensions(&self) -> &'static [&'static str];

    fn parse(&self, content: &str) -> Result<Value, FormatError>;

    fn serialize(&self, value: &Value) -> Result<String, FormatError>;
}

pub struct JsonFormat;

impl ConfigFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn parse(&self, content: &str) -> Result<Value, FormatError> {
        serde_json::from_str(content).map_err(|e| FormatError::Parse(e.to_string()))
    }

    fn serialize(&self, value: &Value) -> Result<String, FormatError> {
        serde_json::to_string_pretty(value).map_err(|e| FormatError::Serialize(e.to_string()))
    }
}

pub struct YamlFormat;

impl ConfigFormat for YamlFormat {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }

    fn parse(&self, content: &str) -> Result<Value, FormatError> {
        serde_yaml::from_str(content).map_err(|e| FormatError::Parse(e.to_string()))
    }

    fn serialize(&self, value: &Value) -> Result<String, FormatError> {
        serde_yaml::to_string(value).map_err(|e| FormatError::Serialize(e.to_string()))
    }
}

pub struct TomlFormat;

impl ConfigFormat for TomlFormat {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<Value, FormatError> {
        let table: toml::Table = toml::from_str(content).map_err(|e| FormatError::Parse(e.to_string()))?;
        Ok(toml_to_json(toml::Value::Table(table)))
    }

    fn serialize(&self, value: &Value) -> Result<String, FormatError> {
        if !value.is_object() {
            return Err(FormatError::Serialize("TOML 顶层必须是表".to_string()));
        }
        toml::to_string_pretty(value).map_err(|e| FormatError::Serialize(e.to_string()))
    }
}

/// 日期时间按原文保留为字符串
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

/// 格式注册表，注册顺序即发现时扩展名的优先级
#[derive(Clone)]
pub struct FormatRegistry {
    formats: Vec<Arc<dyn ConfigFormat>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::empty()
            .with_format(JsonFormat)
            .with_format(YamlFormat)
            .with_format(TomlFormat)
    }
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self { formats: Vec::new() }
    }

    /// 同名格式会被替换，位置不变
    pub fn with_format(mut self, format: impl ConfigFormat + 'static) -> Self {
        self.register(Arc::new(format));
        self
    }

    pub fn register(&mut self, format: Arc<dyn ConfigFormat>) {
        match self.formats.iter().position(|f| f.name() == format.name()) {
            Some(index) => self.formats[index] = format,
            None => self.formats.push(format),
        }
    }

    /// 按名称或扩展名查找，忽略大小写
    pub fn get(&self, name: &str) -> Option<Arc<dyn ConfigFormat>> {
        let name = name.trim_start_matches('.').to_ascii_lowercase();
        self.formats
            .iter()
            .find(|f| f.name() == name || f.extensions().contains(&name.as_str()))
            .cloned()
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn ConfigFormat>> {
        let ext = path.extension()?.to_str()?;
        self.get(ext)
    }

    /// 全部扩展名，按注册顺序
    pub fn extensions(&self) -> Vec<&'static str> {
        self.formats
            .iter()
            .flat_map(|f| f.extensions().iter().copied())
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_by_name_and_extension() {
        let registry = FormatRegistry::default();
        assert_eq!(registry.names(), vec!["json", "yaml", "toml"]);
        assert_eq!(registry.extensions(), vec!["json", "yaml", "yml", "toml"]);
        assert_eq!(registry.get("YML").map(|f| f.name()), Some("yaml"));
        assert_eq!(
            registry.for_path(Path::new("conf/app.toml")).map(|f| f.name()),
            Some("toml")
        );
        assert!(registry.get("ini").is_none());
        assert!(registry.for_path(Path::new("Makefile")).is_none());
    }

    #[test]
    fn test_same_document_in_every_format() {
        let expected = json!({"server": {"host": "localhost", "port": 8080}, "tags": ["a", "b"]});
        let registry = FormatRegistry::default();

        let sources = [
            ("json", r#"{"server": {"host": "localhost", "port": 8080}, "tags": ["a", "b"]}"#),
            ("yaml", "server:\n  host: localhost\n  port: 8080\ntags:\n  - a\n  - b\n"),
            ("toml", "tags = [\"a\", \"b\"]\n\n[server]\nhost = \"localhost\"\nport = 8080\n"),
        ];
        for (name, text) in sources {
            let format = registry.get(name).unwrap();
            assert_eq!(format.parse(text).unwrap(), expected, "format {name}");
        }
    }

    #[test]
    fn test_toml_datetime_becomes_string() {
        let value = TomlFormat.parse("released = 1979-05-27T07:32:00Z\n").unwrap();
        assert_eq!(value, json!({"released": "1979-05-27T07:32:00Z"}));
    }

    #[test]
    fn test_toml_rejects_non_table_root() {
        assert!(matches!(
            TomlFormat.serialize(&json!([1, 2])),
            Err(FormatError::Serialize(_))
        ));
    }

    #[test]
    fn test_register_replaces_in_place() {
        struct LoudJson;
        impl ConfigFormat for LoudJson {
            fn name(&self) -> &'static str {
                "json"
            }
            fn extensions(&self) -> &'static [&'static str] {
                &["json", "jsonc"]
            }
            fn parse(&self, content: &str) -> Result<Value, FormatError> {
                JsonFormat.parse(content)
            }
            fn serialize(&self, value: &Value) -> Result<String, FormatError> {
                JsonFormat.serialize(value)
            }
        }

        let registry = FormatRegistry::default().with_format(LoudJson);
        assert_eq!(registry.names(), vec!["json", "yaml", "toml"]);
        assert_eq!(registry.get("jsonc").map(|f| f.name()), Some("json"));
    }
}
