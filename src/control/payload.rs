//! Coercion helpers for loosely-typed admin payloads.
//!
//! Incoming payloads are JSON maps where numbers may arrive as floats and any
//! field may be absent. These helpers return typed values or sensible
//! absences; none of them panic.

use serde_json::Value;

/// String field, empty when absent or not a string.
pub fn get_string(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Numeric field as f64; accepts integers and floats.
pub fn get_f64(data: &Value, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64)
}

/// Numeric field truncated to i64.
pub fn get_i64(data: &Value, key: &str) -> Option<i64> {
    get_f64(data, key).map(|f| f as i64)
}

/// Boolean field, `None` when absent or mis-typed.
pub fn get_bool(data: &Value, key: &str) -> Option<bool> {
    data.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_coercion() {
        let data = json!({"name": "web", "count": 3});
        assert_eq!(get_string(&data, "name"), "web");
        assert_eq!(get_string(&data, "missing"), "");
        assert_eq!(get_string(&data, "count"), "");
    }

    #[test]
    fn test_numbers_arrive_as_floats() {
        let data = json!({"interval": 60.0, "timeout": 10, "name": "x"});
        assert_eq!(get_i64(&data, "interval"), Some(60));
        assert_eq!(get_i64(&data, "timeout"), Some(10));
        assert_eq!(get_i64(&data, "name"), None);
        assert_eq!(get_i64(&data, "missing"), None);
    }

    #[test]
    fn test_bool_coercion() {
        let data = json!({"follow_redirects": false, "active": 1});
        assert_eq!(get_bool(&data, "follow_redirects"), Some(false));
        assert_eq!(get_bool(&data, "active"), None);
        assert_eq!(get_bool(&data, "missing"), None);
    }

    #[test]
    fn test_non_object_never_panics() {
        let data = json!([1, 2, 3]);
        assert_eq!(get_string(&data, "name"), "");
        assert_eq!(get_i64(&data, "id"), None);
    }
}
