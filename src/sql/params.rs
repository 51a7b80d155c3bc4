//! Convert record values into bindable text parameters.

use crate::registry::FieldKind;
use serde_json::Value;

/// Text form of `v` for a column of `kind`; None binds SQL NULL.
///
/// Structured values are serialized as JSON. Empty strings on non-text columns bind NULL,
/// since the server cannot cast them.
pub fn to_param(v: &Value, kind: FieldKind) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.is_empty() && kind != FieldKind::Text && kind != FieldKind::Json => None,
        Value::String(s) if kind == FieldKind::Json => Some(Value::String(s.clone()).to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_render_as_text() {
        assert_eq!(to_param(&json!(7), FieldKind::Integer).as_deref(), Some("7"));
        assert_eq!(to_param(&json!(true), FieldKind::Boolean).as_deref(), Some("true"));
        assert_eq!(to_param(&json!("x"), FieldKind::Text).as_deref(), Some("x"));
        assert_eq!(to_param(&Value::Null, FieldKind::Text), None);
    }

    #[test]
    fn empty_string_on_typed_column_is_null() {
        assert_eq!(to_param(&json!(""), FieldKind::Timestamp), None);
        assert_eq!(to_param(&json!(""), FieldKind::Text).as_deref(), Some(""));
    }

    #[test]
    fn json_columns_get_documents() {
        assert_eq!(to_param(&json!({"a": 1}), FieldKind::Json).as_deref(), Some("{\"a\":1}"));
        assert_eq!(to_param(&json!("s"), FieldKind::Json).as_deref(), Some("\"s\""));
    }
}
