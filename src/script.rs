//! Script execution seam and the built-in expression host.
//!
//! Script nodes delegate to a [`ScriptHost`]; the host is the extension
//! point for embedding a full scripting language. The bindings surface
//! a host must expose is fixed and small:
//!
//! - `input` — the node's resolved input payload,
//! - `context` — get/set plus the workflow and execution ids,
//! - `logger` — leveled logging (forwarded to `tracing` here),
//! - `utils` — currently `now()`, an RFC 3339 timestamp.
//!
//! The crate ships [`ExprHost`], a minimal arithmetic/comparison
//! evaluator over those bindings. It exists so reference-node
//! conditions and simple transforms work without an embedded language;
//! anything richer belongs in an external host implementation.
//!
//! # Examples
//!
//! ```rust
//! use flowloom::context::ExecutionContext;
//! use flowloom::script::{ExprHost, ScriptBindings, ScriptHost};
//! use serde_json::json;
//!
//! # async fn example() {
//! let ctx = ExecutionContext::new("wf");
//! ctx.set("threshold", json!(5));
//! let bindings = ScriptBindings::new(json!(10), &ctx);
//! let host = ExprHost::default();
//! let out = host.eval("input * 2 + threshold", &bindings).await.unwrap();
//! assert_eq!(out, json!(25));
//! # }
//! ```

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::utils::value::truthy;

// ============================================================================
// Bindings
// ============================================================================

/// Log levels the `logger` binding accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The fixed set of bindings a script sees during evaluation.
pub struct ScriptBindings<'a> {
    input: Value,
    context: &'a ExecutionContext,
}

impl<'a> ScriptBindings<'a> {
    #[must_use]
    pub fn new(input: Value, context: &'a ExecutionContext) -> Self {
        Self { input, context }
    }

    /// The node's resolved input payload.
    #[must_use]
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// `context.get(key)`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.context.get(key)
    }

    /// `context.set(key, value)`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.context.set(key, value);
    }

    /// `context.getWorkflowId()`.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.context.workflow_id()
    }

    /// `context.getExecutionId()`.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        self.context.execution_id()
    }

    /// The `logger` binding: forwards to `tracing` with the script's
    /// workflow and execution ids attached.
    pub fn log(&self, level: ScriptLogLevel, message: &str) {
        let workflow = self.workflow_id();
        let execution = self.execution_id();
        match level {
            ScriptLogLevel::Debug => {
                tracing::debug!(workflow, execution, "script: {message}");
            }
            ScriptLogLevel::Info => {
                tracing::info!(workflow, execution, "script: {message}");
            }
            ScriptLogLevel::Warn => {
                tracing::warn!(workflow, execution, "script: {message}");
            }
            ScriptLogLevel::Error => {
                tracing::error!(workflow, execution, "script: {message}");
            }
        }
    }

    /// `utils.now()`: the current instant as RFC 3339.
    #[must_use]
    pub fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

// ============================================================================
// Host seam
// ============================================================================

/// Errors a script host may report.
#[derive(Debug, Error, Diagnostic)]
pub enum ScriptError {
    /// The script text could not be parsed.
    #[error("script parse error at offset {offset}: {message}")]
    #[diagnostic(code(flowloom::script::parse))]
    Parse { offset: usize, message: String },

    /// Evaluation failed (bad operand types, unknown function, ...).
    #[error("script evaluation error: {message}")]
    #[diagnostic(code(flowloom::script::eval))]
    Eval { message: String },
}

/// The seam between script nodes and whatever evaluates their scripts.
///
/// Hosts are single-threaded per evaluation; the engine never calls
/// `eval` concurrently for one node execution. Context writes performed
/// through the bindings are visible immediately (no rollback on
/// failure).
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Evaluate `script` against the bindings, returning its value.
    async fn eval(
        &self,
        script: &str,
        bindings: &ScriptBindings<'_>,
    ) -> Result<Value, ScriptError>;
}

// ============================================================================
// Built-in expression host
// ============================================================================

/// The built-in minimal host: arithmetic, comparison, and boolean
/// expressions over the bindings.
///
/// Identifiers resolve to `input` or, failing that, to context slots;
/// unknown identifiers evaluate to `null`. Supported functions:
/// `now()`, `len(x)`, `sum(x)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExprHost;

#[async_trait]
impl ScriptHost for ExprHost {
    async fn eval(
        &self,
        script: &str,
        bindings: &ScriptBindings<'_>,
    ) -> Result<Value, ScriptError> {
        let mut parser = Parser::new(script, bindings);
        let value = parser.expression()?;
        parser.expect_end()?;
        Ok(value)
    }
}

/// Evaluate a condition string to a boolean using loose truthiness.
pub async fn eval_condition(
    host: &dyn ScriptHost,
    condition: &str,
    ctx: &ExecutionContext,
) -> Result<bool, ScriptError> {
    let bindings = ScriptBindings::new(Value::Null, ctx);
    let value = host.eval(condition, &bindings).await?;
    Ok(truthy(&value))
}

// A single-pass recursive-descent evaluator. The grammar is small
// enough that evaluating while parsing beats building an AST.
struct Parser<'s, 'b, 'c> {
    src: &'s [u8],
    pos: usize,
    bindings: &'b ScriptBindings<'c>,
}

impl<'s, 'b, 'c> Parser<'s, 'b, 'c> {
    fn new(src: &'s str, bindings: &'b ScriptBindings<'c>) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            bindings,
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Parse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect_end(&mut self) -> Result<(), ScriptError> {
        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Value, ScriptError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.and_expr()?;
        while self.eat("||") {
            let right = self.and_expr()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.comparison()?;
        while self.eat("&&") {
            let right = self.comparison()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Value, ScriptError> {
        let left = self.additive()?;
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat(op) {
                let right = self.additive()?;
                return self.compare(op, &left, &right);
            }
        }
        Ok(left)
    }

    fn compare(&self, op: &str, left: &Value, right: &Value) -> Result<Value, ScriptError> {
        let result = match op {
            "==" => left == right,
            "!=" => left != right,
            _ => {
                let (l, r) = (number_of(left), number_of(right));
                match (l, r) {
                    (Some(l), Some(r)) => match op {
                        "<" => l < r,
                        ">" => l > r,
                        "<=" => l <= r,
                        ">=" => l >= r,
                        _ => unreachable!(),
                    },
                    _ => {
                        return Err(ScriptError::Eval {
                            message: format!("'{op}' requires numeric operands"),
                        });
                    }
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn additive(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.multiplicative()?;
        loop {
            if self.eat("+") {
                let right = self.multiplicative()?;
                left = add_values(&left, &right)?;
            } else if self.peek_minus() {
                self.eat("-");
                let right = self.multiplicative()?;
                left = numeric_op(&left, &right, "-", |l, r| l - r)?;
            } else {
                return Ok(left);
            }
        }
    }

    // '-' only binds as a binary operator here; unary minus is handled
    // in `unary`.
    fn peek_minus(&mut self) -> bool {
        self.peek() == Some(b'-')
    }

    fn multiplicative(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.unary()?;
        loop {
            if self.eat("*") {
                let right = self.unary()?;
                left = numeric_op(&left, &right, "*", |l, r| l * r)?;
            } else if self.eat("/") {
                let right = self.unary()?;
                if number_of(&right) == Some(0.0) {
                    return Err(ScriptError::Eval {
                        message: "division by zero".into(),
                    });
                }
                left = numeric_op(&left, &right, "/", |l, r| l / r)?;
            } else if self.eat("%") {
                let right = self.unary()?;
                left = numeric_op(&left, &right, "%", |l, r| l % r)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Value, ScriptError> {
        if self.eat("!") {
            let value = self.unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        if self.eat("-") {
            let value = self.unary()?;
            let n = number_of(&value).ok_or_else(|| ScriptError::Eval {
                message: "unary '-' requires a numeric operand".into(),
            })?;
            return Ok(number_value(-n));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, ScriptError> {
        match self.peek() {
            Some(b'(') => {
                self.eat("(");
                let value = self.expression()?;
                if !self.eat(")") {
                    return Err(self.error("expected ')'"));
                }
                Ok(value)
            }
            Some(b'\'') | Some(b'"') => self.string_literal(),
            Some(c) if c.is_ascii_digit() => self.number_literal(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.identifier(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c as char))),
            None => Err(self.error("unexpected end of script")),
        }
    }

    fn string_literal(&mut self) -> Result<Value, ScriptError> {
        let quote = self.src[self.pos];
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            return Err(self.error("unterminated string literal"));
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("invalid UTF-8 in string literal"))?
            .to_owned();
        self.pos += 1;
        Ok(Value::String(text))
    }

    fn number_literal(&mut self) -> Result<Value, ScriptError> {
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits");
        let n: f64 = text
            .parse()
            .map_err(|_| self.error(format!("invalid number '{text}'")))?;
        Ok(number_value(n))
    }

    fn identifier(&mut self) -> Result<Value, ScriptError> {
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_alphanumeric() || self.src[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos])
            .expect("ascii identifier")
            .to_owned();

        if self.peek() == Some(b'(') {
            self.eat("(");
            return self.call(&name);
        }

        let value = match name.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            "input" => self.bindings.input().clone(),
            other => self.bindings.get(other).unwrap_or(Value::Null),
        };
        Ok(value)
    }

    fn call(&mut self, name: &str) -> Result<Value, ScriptError> {
        let mut args = Vec::new();
        if self.peek() != Some(b')') {
            loop {
                args.push(self.expression()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        if !self.eat(")") {
            return Err(self.error("expected ')' after arguments"));
        }

        match (name, args.as_slice()) {
            ("now", []) => Ok(Value::String(ScriptBindings::now())),
            ("len", [arg]) => {
                let len = match arg {
                    Value::String(s) => s.chars().count(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => {
                        return Err(ScriptError::Eval {
                            message: "len() requires a string, array, or object".into(),
                        });
                    }
                };
                Ok(Value::from(len as u64))
            }
            ("sum", [arg]) => {
                let Value::Array(items) = arg else {
                    return Err(ScriptError::Eval {
                        message: "sum() requires an array".into(),
                    });
                };
                let mut total = 0.0;
                for item in items {
                    total += number_of(item).ok_or_else(|| ScriptError::Eval {
                        message: "sum() requires numeric elements".into(),
                    })?;
                }
                Ok(number_value(total))
            }
            _ => Err(ScriptError::Eval {
                message: format!("unknown function '{name}' with {} argument(s)", args.len()),
            }),
        }
    }
}

fn number_of(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Render a float as an integer JSON number when it is one.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn numeric_op(
    left: &Value,
    right: &Value,
    op: &str,
    apply: impl Fn(f64, f64) -> f64,
) -> Result<Value, ScriptError> {
    match (number_of(left), number_of(right)) {
        (Some(l), Some(r)) => Ok(number_value(apply(l, r))),
        _ => Err(ScriptError::Eval {
            message: format!("'{op}' requires numeric operands"),
        }),
    }
}

fn add_values(left: &Value, right: &Value) -> Result<Value, ScriptError> {
    match (left, right) {
        (Value::String(l), r) => Ok(Value::String(format!("{l}{}", display(r)))),
        (l, Value::String(r)) => Ok(Value::String(format!("{}{r}", display(l)))),
        _ => numeric_op(left, right, "+", |l, r| l + r),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn eval(script: &str, input: Value, ctx: &ExecutionContext) -> Result<Value, ScriptError> {
        let bindings = ScriptBindings::new(input, ctx);
        ExprHost.eval(script, &bindings).await
    }

    #[tokio::test]
    async fn arithmetic_keeps_integers_integral() {
        let ctx = ExecutionContext::new("wf");
        assert_eq!(eval("input * 2", json!(10), &ctx).await.unwrap(), json!(20));
        assert_eq!(eval("7 / 2", Value::Null, &ctx).await.unwrap(), json!(3.5));
        assert_eq!(eval("2 + 3 * 4", Value::Null, &ctx).await.unwrap(), json!(14));
    }

    #[tokio::test]
    async fn identifiers_fall_back_to_context_slots() {
        let ctx = ExecutionContext::new("wf");
        ctx.set("threshold", json!(100));
        assert_eq!(
            eval("threshold > 50", Value::Null, &ctx).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("missing == null", Value::Null, &ctx).await.unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn string_concatenation_via_plus() {
        let ctx = ExecutionContext::new("wf");
        assert_eq!(
            eval("'y=' + input", json!(20), &ctx).await.unwrap(),
            json!("y=20")
        );
    }

    #[tokio::test]
    async fn sum_and_len_functions() {
        let ctx = ExecutionContext::new("wf");
        assert_eq!(
            eval("sum(input)", json!([1, 2, 3]), &ctx).await.unwrap(),
            json!(6)
        );
        assert_eq!(
            eval("len(input)", json!("abc"), &ctx).await.unwrap(),
            json!(3)
        );
    }

    #[tokio::test]
    async fn division_by_zero_is_an_eval_error() {
        let ctx = ExecutionContext::new("wf");
        let err = eval("1 / 0", Value::Null, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn trailing_garbage_is_a_parse_error() {
        let ctx = ExecutionContext::new("wf");
        let err = eval("1 + 2 @", Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Parse { .. }));
    }

    #[tokio::test]
    async fn conditions_use_loose_truthiness() {
        let ctx = ExecutionContext::new("wf");
        ctx.set("flag", json!("yes"));
        assert!(eval_condition(&ExprHost, "flag", &ctx).await.unwrap());
        assert!(!eval_condition(&ExprHost, "absent", &ctx).await.unwrap());
        assert!(eval_condition(&ExprHost, "1 < 2 && !false", &ctx).await.unwrap());
    }
}
