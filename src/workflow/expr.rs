//! `${...}` binding expressions resolved against a run context.
//!
//! The context is a JSON tree shaped like
//! `{"workflow": {"input": ..}, "<ref>": {"input": .., "output": ..}}`.
//! Paths are dot separated; a segment indexes arrays when it parses as a number.
//! Anything that does not resolve yields `null`.

use serde_json::Value;

use crate::model::Fields;

/// Resolve every parameter of `params` against `context`.
pub fn resolve_parameters(params: &Fields, context: &Value) -> Fields {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve(value, context)))
        .collect()
}

/// Resolve expressions inside `template`, recursing into arrays and objects.
pub fn resolve(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => resolve_str(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A string that is exactly one expression resolves to the referenced value.
/// Expressions embedded in text are substituted with their string form.
pub fn resolve_str(template: &str, context: &Value) -> Value {
    if let Some(path) = whole_expression(template) {
        return lookup(path, context);
    }
    if !template.contains("${") {
        return Value::String(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let path = &rest[start + 2..start + len];
        out.push_str(&display(&lookup(path, context)));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// Value at a dotted `path`, or `null`.
pub fn lookup(path: &str, context: &Value) -> Value {
    let mut current = context;
    for segment in path.trim().split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// String form used for interpolation and header comparison.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn whole_expression(template: &str) -> Option<&str> {
    let inner = template.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains('}') {
        None
    } else {
        Some(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "workflow": {"input": {"request": {"orderedBy": "Ada", "total": 12.5}}},
            "IntakeOrder": {"output": {"order": {"number": "42", "payment": {"type": "ON_ACCOUNT"}}}},
            "Items": {"output": {"list": ["a", "b"]}}
        })
    }

    #[test]
    fn whole_expression_keeps_json_type() {
        let ctx = context();
        assert_eq!(
            resolve_str("${workflow.input.request}", &ctx),
            json!({"orderedBy": "Ada", "total": 12.5})
        );
        assert_eq!(resolve_str("${workflow.input.request.total}", &ctx), json!(12.5));
        assert_eq!(
            resolve_str("${IntakeOrder.output.order.payment.type}", &ctx),
            json!("ON_ACCOUNT")
        );
    }

    #[test]
    fn missing_path_is_null() {
        let ctx = context();
        assert_eq!(resolve_str("${FraudCheck.output.order}", &ctx), Value::Null);
        assert_eq!(resolve_str("${IntakeOrder.output.order.number.x}", &ctx), Value::Null);
    }

    #[test]
    fn array_segments_index() {
        assert_eq!(resolve_str("${Items.output.list.1}", &context()), json!("b"));
        assert_eq!(resolve_str("${Items.output.list.9}", &context()), Value::Null);
    }

    #[test]
    fn embedded_expressions_interpolate() {
        let ctx = context();
        assert_eq!(
            resolve_str("order-${IntakeOrder.output.order.number}/${workflow.input.request.total}", &ctx),
            json!("order-42/12.5")
        );
        assert_eq!(resolve_str("plain text", &ctx), json!("plain text"));
        assert_eq!(resolve_str("broken ${oops", &ctx), json!("broken ${oops"));
    }

    #[test]
    fn parameters_resolve_recursively() {
        let mut params = Fields::new();
        params.insert("order".into(), json!("${IntakeOrder.output.order.number}"));
        params.insert("nested".into(), json!({"who": "${workflow.input.request.orderedBy}", "n": 3}));

        let resolved = resolve_parameters(&params, &context());
        assert_eq!(resolved["order"], json!("42"));
        assert_eq!(resolved["nested"], json!({"who": "Ada", "n": 3}));
    }
}
