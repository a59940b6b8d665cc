//! Multi-input resolution: turning a node's declared input slots into
//! the single `input` payload its executor receives.
//!
//! Three modes exist, selected by the node's config:
//!
//! - **Single** (legacy default): `input = ctx[inputKey]`, or `null`
//!   when no key is configured or the slot is empty.
//! - **Multiple**: a list of parameters, each read from its context
//!   key, defaulted when optional, type-checked against its declared
//!   data type, and exposed under its alias in one object.
//! - **Merged**: the Multiple object collapsed under a single
//!   `mergeKey`.
//!
//! Resolution failures surface as pre-execution node failures with
//! `phase=input-resolution`; the node's `execute` never runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::node::NodeError;
use crate::utils::value::{coerce, shape_of, DataType};

/// How a node's input block is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputMode {
    #[default]
    Single,
    Multiple,
    Merged,
}

/// One declared input parameter (Multiple/Merged modes).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParameter {
    /// Context slot to read.
    pub key: String,
    /// Name the value is exposed under; defaults to `key`.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Declared type, checked (with coercion) after the read.
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputParameter {
    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.key)
    }
}

/// The parsed input declaration of a node.
#[derive(Clone, Debug, Default)]
pub struct InputSpec {
    pub mode: InputMode,
    pub input_key: Option<String>,
    pub merge_key: Option<String>,
    pub parameters: Vec<InputParameter>,
}

impl InputSpec {
    /// Parse the input declaration out of a node's config map.
    ///
    /// A structured `inputs` block wins; otherwise the legacy
    /// `inputKey` string selects Single mode.
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, NodeError> {
        if let Some(block) = config.get("inputs") {
            let mode = block
                .get("mode")
                .and_then(Value::as_str)
                .map(|s| match s.to_ascii_uppercase().as_str() {
                    "SINGLE" => Ok(InputMode::Single),
                    "MULTIPLE" => Ok(InputMode::Multiple),
                    "MERGED" => Ok(InputMode::Merged),
                    other => Err(NodeError::InputResolution {
                        message: format!("unknown input mode: {other}"),
                    }),
                })
                .transpose()?
                .unwrap_or(InputMode::Multiple);
            let parameters: Vec<InputParameter> = block
                .get("parameters")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()
                .map_err(|e| NodeError::InputResolution {
                    message: format!("malformed input parameters: {e}"),
                })?
                .unwrap_or_default();
            let merge_key = block
                .get("mergeKey")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if mode == InputMode::Merged && merge_key.is_none() {
                return Err(NodeError::InputResolution {
                    message: "merged input mode requires a mergeKey".into(),
                });
            }
            return Ok(Self {
                mode,
                input_key: None,
                merge_key,
                parameters,
            });
        }

        Ok(Self {
            mode: InputMode::Single,
            input_key: config
                .get("inputKey")
                .and_then(Value::as_str)
                .map(str::to_owned),
            merge_key: None,
            parameters: Vec::new(),
        })
    }

    /// Resolve this declaration against the context into the node's
    /// `input` payload.
    pub fn resolve(&self, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        match self.mode {
            InputMode::Single => Ok(self
                .input_key
                .as_deref()
                .and_then(|key| ctx.get(key))
                .unwrap_or(Value::Null)),
            InputMode::Multiple => self.resolve_parameters(ctx).map(Value::Object),
            InputMode::Merged => {
                let resolved = self.resolve_parameters(ctx)?;
                let merge_key = self
                    .merge_key
                    .clone()
                    .expect("merge key checked at parse time");
                let mut outer = Map::new();
                outer.insert(merge_key, Value::Object(resolved));
                Ok(Value::Object(outer))
            }
        }
    }

    fn resolve_parameters(&self, ctx: &ExecutionContext) -> Result<Map<String, Value>, NodeError> {
        let mut out = Map::new();
        for param in &self.parameters {
            let raw = match ctx.get(&param.key) {
                Some(value) => value,
                None if param.required => {
                    return Err(NodeError::InputResolution {
                        message: format!("required input slot '{}' is missing", param.key),
                    });
                }
                None => param.default_value.clone().unwrap_or(Value::Null),
            };

            let value = match param.data_type.as_deref() {
                Some(type_name) if !raw.is_null() => {
                    let Some(data_type) = DataType::parse(type_name) else {
                        return Err(NodeError::InputResolution {
                            message: format!(
                                "input '{}' declares unknown data type '{type_name}'",
                                param.key
                            ),
                        });
                    };
                    coerce(&raw, data_type).map_err(|_| NodeError::InputResolution {
                        message: format!(
                            "input '{}' expected {data_type}, found {}",
                            param.key,
                            shape_of(&raw)
                        ),
                    })?
                }
                _ => raw,
            };

            out.insert(param.alias().to_owned(), value);
        }
        Ok(out)
    }
}

/// Convenience: parse and resolve in one step (the scheduler's path).
pub fn resolve_input(
    config: &Map<String, Value>,
    ctx: &ExecutionContext,
) -> Result<Value, NodeError> {
    InputSpec::from_config(config)?.resolve(ctx)
}
