//! Operator-facing artifacts generated from a plugin's declared
//! parameters: a commented YAML config skeleton, a JSON-Schema
//! document for editors, and a Markdown reference page.
//!
//! These are emitted for operators, never consumed by the engine.

use serde_json::{json, Map, Value};

use super::params::{ParameterSpec, ParameterType};
use super::{DataSourcePlugin, PluginInfo};

/// Placeholder rendered for sensitive parameters.
const MASKED: &str = "\"<secret>\"";

/// A commented YAML configuration skeleton for one plugin.
#[must_use]
pub fn config_skeleton(plugin: &dyn DataSourcePlugin) -> String {
    let info = plugin.info();
    let mut out = String::new();
    out.push_str(&format!(
        "# Configuration for {} ({}) v{}\n",
        info.name, info.plugin_id, info.version
    ));
    if !info.description.is_empty() {
        out.push_str(&format!("# {}\n", info.description));
    }
    out.push_str(&format!("pluginType: {}\n", info.plugin_id));

    for spec in plugin.supported_parameters() {
        out.push('\n');
        if !spec.description.is_empty() {
            out.push_str(&format!("# {}\n", spec.description));
        }
        let mut notes = vec![format!("type: {}", type_label(spec.param_type))];
        if spec.required {
            notes.push("required".into());
        }
        if !spec.options.is_empty() {
            notes.push(format!("one of: {}", spec.options.join(" | ")));
        }
        out.push_str(&format!("# ({})\n", notes.join(", ")));
        let value = placeholder(&spec);
        if spec.required {
            out.push_str(&format!("{}: {}\n", spec.name, value));
        } else {
            out.push_str(&format!("# {}: {}\n", spec.name, value));
        }
    }
    out
}

fn type_label(param_type: ParameterType) -> &'static str {
    match param_type {
        ParameterType::String => "string",
        ParameterType::Int => "int",
        ParameterType::Long => "long",
        ParameterType::Double => "double",
        ParameterType::Bool => "bool",
        ParameterType::Password => "password",
        ParameterType::FilePath => "file-path",
        ParameterType::Url => "url",
        ParameterType::Json => "json",
        ParameterType::Enum => "enum",
        ParameterType::List => "list",
    }
}

fn placeholder(spec: &ParameterSpec) -> String {
    if spec.sensitive {
        return MASKED.to_owned();
    }
    if let Some(default) = &spec.default_value {
        return default.to_string();
    }
    match spec.param_type {
        ParameterType::Int | ParameterType::Long => "0".into(),
        ParameterType::Double => "0.0".into(),
        ParameterType::Bool => "false".into(),
        ParameterType::List => "[]".into(),
        ParameterType::Json => "{}".into(),
        ParameterType::Enum => spec
            .options
            .first()
            .map(|o| o.clone())
            .unwrap_or_else(|| "\"\"".into()),
        _ => "\"\"".into(),
    }
}

/// A draft-07 JSON-Schema document describing one plugin's config.
#[must_use]
pub fn json_schema(plugin: &dyn DataSourcePlugin) -> Value {
    let info = plugin.info();
    let mut properties = Map::new();
    let mut required = vec![Value::String("pluginType".into())];

    properties.insert(
        "pluginType".into(),
        json!({"type": "string", "const": info.plugin_id}),
    );

    for spec in plugin.supported_parameters() {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(schema_type(spec.param_type)));
        if !spec.description.is_empty() {
            prop.insert("description".into(), json!(spec.description));
        }
        if let Some(default) = &spec.default_value {
            prop.insert("default".into(), default.clone());
        }
        if !spec.options.is_empty() {
            prop.insert("enum".into(), json!(spec.options));
        }
        if let Some(pattern) = &spec.pattern {
            prop.insert("pattern".into(), json!(pattern));
        }
        if spec.sensitive {
            prop.insert("writeOnly".into(), json!(true));
        }
        if spec.required && spec.default_value.is_none() {
            required.push(Value::String(spec.name.clone()));
        }
        properties.insert(spec.name.clone(), Value::Object(prop));
    }

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": format!("{} configuration", info.name),
        "description": info.description,
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn schema_type(param_type: ParameterType) -> &'static str {
    match param_type {
        ParameterType::Int | ParameterType::Long => "integer",
        ParameterType::Double => "number",
        ParameterType::Bool => "boolean",
        ParameterType::List => "array",
        ParameterType::Json => "object",
        _ => "string",
    }
}

/// A Markdown reference page for one plugin.
#[must_use]
pub fn markdown_reference(plugin: &dyn DataSourcePlugin) -> String {
    let info: PluginInfo = plugin.info();
    let mut out = String::new();
    out.push_str(&format!("# {} (`{}`)\n\n", info.name, info.plugin_id));
    out.push_str(&format!(
        "- **Version**: {}\n- **Author**: {}\n\n",
        info.version,
        if info.author.is_empty() {
            "unknown"
        } else {
            &info.author
        }
    ));
    if !info.description.is_empty() {
        out.push_str(&format!("{}\n\n", info.description));
    }

    out.push_str("## Parameters\n\n");
    out.push_str("| Name | Type | Required | Default | Description |\n");
    out.push_str("|------|------|----------|---------|-------------|\n");
    for spec in plugin.supported_parameters() {
        let default = if spec.sensitive {
            "—".to_owned()
        } else {
            spec.default_value
                .as_ref()
                .map(|v| format!("`{v}`"))
                .unwrap_or_else(|| "—".to_owned())
        };
        out.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            spec.name,
            type_label(spec.param_type),
            if spec.required { "yes" } else { "no" },
            default,
            spec.description.replace('|', "\\|"),
        ));
    }

    let dependencies = plugin.dependencies();
    if !dependencies.is_empty() {
        out.push_str("\n## Dependencies\n\n");
        for dep in dependencies {
            out.push_str(&format!("- {dep}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::MockSourcePlugin;
    use serde_json::json;

    fn plugin() -> MockSourcePlugin {
        MockSourcePlugin::new("mock-src", json!(null))
            .requiring("path")
            .with_password_param("token")
    }

    #[test]
    fn skeleton_masks_sensitive_values() {
        let text = config_skeleton(&plugin());
        assert!(text.contains("pluginType: mock-src"));
        assert!(text.contains("path:"));
        assert!(text.contains("<secret>"));
    }

    #[test]
    fn schema_is_draft07_with_required_list() {
        let schema = json_schema(&plugin());
        assert_eq!(
            schema["$schema"],
            json!("http://json-schema.org/draft-07/schema#")
        );
        let required: Vec<String> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_owned())
            .collect();
        assert!(required.contains(&"path".to_owned()));
        assert_eq!(schema["properties"]["token"]["writeOnly"], json!(true));
    }

    #[test]
    fn markdown_lists_every_parameter() {
        let text = markdown_reference(&plugin());
        assert!(text.contains("| `path` |"));
        assert!(text.contains("| `token` |"));
        assert!(text.starts_with("# "));
    }
}
