//! Plugin parameter declarations and config validation.
//!
//! Parameter specs carry a closed-set type; validation walks the
//! bounded matrix of (source shape × declared type) instead of
//! reflecting over arbitrary config.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::ValidationReport;
use crate::utils::value::{coerce, shape_of, DataType};

/// The closed set of parameter types a plugin may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterType {
    String,
    Int,
    Long,
    Double,
    Bool,
    Password,
    FilePath,
    Url,
    Json,
    Enum,
    List,
}

impl ParameterType {
    /// The data type used for shape checking, where one applies.
    /// Password/file-path/url/enum are strings on the wire; json
    /// accepts any shape.
    #[must_use]
    fn data_type(&self) -> Option<DataType> {
        match self {
            ParameterType::String
            | ParameterType::Password
            | ParameterType::FilePath
            | ParameterType::Url
            | ParameterType::Enum => Some(DataType::String),
            ParameterType::Int => Some(DataType::Int),
            ParameterType::Long => Some(DataType::Long),
            ParameterType::Double => Some(DataType::Double),
            ParameterType::Bool => Some(DataType::Bool),
            ParameterType::List => Some(DataType::Array),
            ParameterType::Json => None,
        }
    }
}

/// One declared plugin parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Legal values for `Enum` parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    /// Sensitive values are masked in generated artifacts.
    #[serde(default)]
    pub sensitive: bool,
    /// Optional validation regex applied to string-shaped values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ParameterSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            param_type,
            required: false,
            default_value: None,
            options: Vec::new(),
            category: String::new(),
            sensitive: false,
            pattern: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Validate a config map against declared parameters.
///
/// Checks: required presence, shape (with string coercion), enum
/// membership, and the optional regex pattern. Unknown config keys are
/// warnings, not errors — plugins may accept pass-through options.
#[must_use]
pub fn validate_against(specs: &[ParameterSpec], config: &Map<String, Value>) -> ValidationReport {
    let mut report = ValidationReport::ok();

    for spec in specs {
        let field = format!("config.{}", spec.name);
        let Some(value) = config.get(&spec.name) else {
            if spec.required && spec.default_value.is_none() {
                report.error(field, "required parameter is missing");
            }
            continue;
        };

        if let Some(data_type) = spec.param_type.data_type() {
            if coerce(value, data_type).is_err() {
                report.error(
                    &field,
                    format!("expected {data_type}, found {}", shape_of(value)),
                );
                continue;
            }
        }

        if spec.param_type == ParameterType::Enum {
            if let Some(s) = value.as_str() {
                if !spec.options.iter().any(|opt| opt == s) {
                    report.error(
                        &field,
                        format!("'{s}' is not one of [{}]", spec.options.join(", ")),
                    );
                }
            }
        }

        if let (Some(pattern), Some(s)) = (&spec.pattern, value.as_str()) {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        report.error(&field, format!("value does not match pattern {pattern}"));
                    }
                }
                Err(_) => report.warning(&field, "declared pattern is not a valid regex"),
            }
        }
    }

    let declared: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    for key in config.keys() {
        // Engine-level keys live alongside plugin parameters.
        if matches!(key.as_str(), "pluginType" | "sourceType" | "outputKey" | "inputKey" | "inputs") {
            continue;
        }
        if !declared.contains(&key.as_str()) {
            report.warning(format!("config.{key}"), "not a declared parameter");
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("path", ParameterType::FilePath).required(),
            ParameterSpec::new("limit", ParameterType::Int).with_default(json!(100)),
            ParameterSpec::new("format", ParameterType::Enum)
                .with_options(vec!["json".into(), "csv".into()]),
            ParameterSpec::new("token", ParameterType::Password)
                .sensitive()
                .with_pattern("^[a-z0-9]{8,}$"),
        ]
    }

    fn config(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn missing_required_parameter_fails() {
        let report = validate_against(&specs(), &config(json!({})));
        assert!(!report.is_valid());
        assert!(report.summary().contains("config.path"));
    }

    #[test]
    fn defaults_satisfy_missing_optionals() {
        let report = validate_against(&specs(), &config(json!({"path": "/tmp/x"})));
        assert!(report.is_valid());
    }

    #[test]
    fn enum_membership_is_enforced() {
        let report = validate_against(
            &specs(),
            &config(json!({"path": "/tmp/x", "format": "xml"})),
        );
        assert!(report.summary().contains("not one of"));
    }

    #[test]
    fn pattern_mismatch_fails() {
        let report = validate_against(
            &specs(),
            &config(json!({"path": "/tmp/x", "token": "SHORT"})),
        );
        assert!(report.summary().contains("pattern"));
    }

    #[test]
    fn numeric_strings_coerce() {
        let report = validate_against(
            &specs(),
            &config(json!({"path": "/tmp/x", "limit": "25"})),
        );
        assert!(report.is_valid());
    }

    #[test]
    fn unknown_keys_warn_but_pass() {
        let report = validate_against(
            &specs(),
            &config(json!({"path": "/tmp/x", "mystery": 1})),
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }
}
