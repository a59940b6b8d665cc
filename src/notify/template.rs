//! `${...}` template interpolation for notification content.
//!
//! Two namespaces exist: `${ctx.key}` resolves against the execution
//! context, bare `${key}` against the node's input payload (when the
//! payload is an object; otherwise only `${input}` itself resolves).
//! Unresolvable placeholders are left verbatim so a broken template is
//! visible in the delivered message rather than silently blanked.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::context::ExecutionContext;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("placeholder regex"))
}

/// Render a template against the input payload and execution context.
#[must_use]
pub fn render(template: &str, input: &Value, ctx: &ExecutionContext) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            resolve(key, input, ctx).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

fn resolve(key: &str, input: &Value, ctx: &ExecutionContext) -> Option<String> {
    if let Some(ctx_key) = key.strip_prefix("ctx.") {
        return ctx.get(ctx_key).map(|v| scalar(&v));
    }
    if key == "input" {
        return Some(scalar(input));
    }
    input
        .as_object()
        .and_then(|obj| obj.get(key))
        .map(scalar)
}

/// Scalar rendering: strings bare, everything else compact JSON.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_and_input_namespaces_resolve() {
        let ctx = ExecutionContext::new("wf");
        ctx.set("y", json!(20));
        let input = json!({"host": "db-1"});
        let out = render("y=${ctx.y} on ${host}", &input, &ctx);
        assert_eq!(out, "y=20 on db-1");
    }

    #[test]
    fn bare_input_placeholder_renders_the_payload() {
        let ctx = ExecutionContext::new("wf");
        let out = render("got ${input}", &json!(42), &ctx);
        assert_eq!(out, "got 42");
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let ctx = ExecutionContext::new("wf");
        let out = render("missing ${ctx.nope} and ${gone}", &json!({}), &ctx);
        assert_eq!(out, "missing ${ctx.nope} and ${gone}");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let ctx = ExecutionContext::new("wf");
        ctx.set("items", json!([1, 2]));
        let out = render("list=${ctx.items}", &Value::Null, &ctx);
        assert_eq!(out, "list=[1,2]");
    }
}
