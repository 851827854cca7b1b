use std::fmt;

use serde_json::Value;

use crate::errors::{ConfigError, ConfigResult, SchemaViolation};
use crate::safe_ops;

/// Custom per-field check; `Err` carries the violation message
pub type CustomValidator = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

pub trait ConfigValidator: Send + Sync {
    /// Returns `SchemaValidation` listing every violation found.
    fn validate(&self, config: &Value) -> ConfigResult<()>;
    fn name(&self) -> &str;
}

/// JSON type names used in type constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

pub struct BasicConfigValidator {
    name: String,
    required_fields: Vec<String>,
    field_types: Vec<(String, ValueType)>,
    custom_validators: Vec<(String, CustomValidator)>,
}

impl BasicConfigValidator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_fields: Vec::new(),
            field_types: Vec::new(),
            custom_validators: Vec::new(),
        }
    }

    /// Field must be present and of the given type
    pub fn required_field(mut self, field: impl Into<String>, field_type: ValueType) -> Self {
        let field = field.into();
        self.required_fields.push(field.clone());
        self.field_types.push((field, field_type));
        self
    }

    /// Type is checked only when the field is present
    pub fn optional_field(mut self, field: impl Into<String>, field_type: ValueType) -> Self {
        self.field_types.push((field.into(), field_type));
        self
    }

    pub fn custom_validator<F>(mut self, field: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom_validators.push((field.into(), Box::new(validator)));
        self
    }
}

impl ConfigValidator for BasicConfigValidator {
    fn validate(&self, config: &Value) -> ConfigResult<()> {
        let mut violations = Vec::new();

        for field in &self.required_fields {
            if !safe_ops::has(config, field) {
                violations.push(SchemaViolation {
                    path: field.clone(),
                    message: "required field missing".to_string(),
                    value: None,
                });
            }
        }

        for (field, expected) in &self.field_types {
            if let Some(value) = safe_ops::get(config, field) {
                let actual = ValueType::of(value);
                if actual != *expected {
                    violations.push(SchemaViolation {
                        path: field.clone(),
                        message: format!("expected {expected}, got {actual}"),
                        value: Some(value.clone()),
                    });
                }
            }
        }

        for (field, validator) in &self.custom_validators {
            if let Some(value) = safe_ops::get(config, field) {
                if let Err(message) = validator(value) {
                    violations.push(SchemaViolation {
                        path: field.clone(),
                        message,
                        value: Some(value.clone()),
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::SchemaValidation {
                violations,
                path: None,
                value: None,
            })
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs validators in registration order and stops at the first failure.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: Vec<Box<dyn ConfigValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_validator(mut self, validator: Box<dyn ConfigValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn push(&mut self, validator: Box<dyn ConfigValidator>) {
        self.validators.push(validator);
    }

    pub fn validate(&self, config: &Value) -> ConfigResult<()> {
        for validator in &self.validators {
            validator.validate(config)?;
        }
        Ok(())
    }

    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_validator() -> BasicConfigValidator {
        BasicConfigValidator::new("server")
            .required_field("server.port", ValueType::Number)
            .optional_field("server.host", ValueType::String)
            .custom_validator("server.port", |value| match value.as_u64() {
                Some(port) if (1..=65535).contains(&port) => Ok(()),
                _ => Err("port out of range".to_string()),
            })
    }

    #[test]
    fn test_valid_config_passes() {
        let config = json!({"server": {"port": 8080, "host": "0.0.0.0"}});
        assert!(server_validator().validate(&config).is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let config = json!({"server": {"port": 70000, "host": 12}});
        let err = server_validator().validate(&config).unwrap_err();

        match err {
            ConfigError::SchemaValidation { violations, .. } => {
                let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
                assert_eq!(paths, vec!["server.host", "server.port"]);
                assert_eq!(violations[0].message, "expected string, got number");
                assert_eq!(violations[1].message, "port out of range");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_field() {
        let err = server_validator().validate(&json!({})).unwrap_err();
        match err {
            ConfigError::SchemaValidation { violations, .. } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].message, "required field missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_registry_runs_in_order() {
        let registry = ValidatorRegistry::new()
            .add_validator(Box::new(server_validator()))
            .add_validator(Box::new(
                BasicConfigValidator::new("database").required_field("database.url", ValueType::String),
            ));

        assert_eq!(registry.validator_names(), vec!["server", "database"]);
        assert!(registry.validate(&json!({"server": {"port": 1}})).is_err());
        assert!(registry
            .validate(&json!({"server": {"port": 1}, "database": {"url": "pg://"}}))
            .is_ok());
    }
}
