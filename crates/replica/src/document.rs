use serde_json::{Map, Value};

/// Schema-less tree value used for component state, template arguments,
/// save records and replication payloads.
pub type Document = Value;

pub fn empty_object() -> Document {
    Value::Object(Map::new())
}

/// Shallow merge where keys present in `overlay` win. A null overlay keeps
/// `base`; any other non-object overlay replaces it outright.
pub fn merge_over(base: &Document, overlay: &Document) -> Document {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}

pub fn kind_name(document: &Document) -> &'static str {
    match document {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_explicit_keys_win() {
        let defaults = json!({"hp": 10, "name": "slime", "color": "green"});
        let args = json!({"hp": 25});

        let merged = merge_over(&defaults, &args);
        assert_eq!(merged, json!({"hp": 25, "name": "slime", "color": "green"}));
    }

    #[test]
    fn test_merge_null_keeps_base() {
        let defaults = json!({"value": 1});
        assert_eq!(merge_over(&defaults, &Value::Null), defaults);
    }

    #[test]
    fn test_merge_is_shallow() {
        let base = json!({"inner": {"a": 1, "b": 2}});
        let overlay = json!({"inner": {"a": 5}});
        assert_eq!(merge_over(&base, &overlay), json!({"inner": {"a": 5}}));
    }

    #[test]
    fn test_kind_name() {
        assert_eq!(kind_name(&json!([1, 2])), "array");
        assert_eq!(kind_name(&empty_object()), "object");
    }
}
