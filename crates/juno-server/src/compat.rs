//! Mobile client param compatibility.
//!
//! The app sends a mix of camelCase and snake_case keys. Handlers only read
//! snake_case.

use serde_json::Value;

const CAMEL_TO_SNAKE: &[(&str, &str)] = &[
    ("firebaseUID", "firebase_uid"),
    ("firebaseUid", "firebase_uid"),
    ("userId", "user_id"),
    ("locationContext", "location_context"),
];

/// Rename known camelCase keys. An existing snake_case key wins.
pub fn normalize_params(params: &Value) -> Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut result = obj.clone();
    for &(camel, snake) in CAMEL_TO_SNAKE {
        if result.contains_key(snake) {
            let _ = result.remove(camel);
        } else if let Some(val) = result.remove(camel) {
            let _ = result.insert(snake.to_string(), val);
        }
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renames_camel_keys() {
        let out = normalize_params(&json!({"firebaseUID": "uid42", "userId": "1111111111", "query": "hi"}));
        assert_eq!(out, json!({"firebase_uid": "uid42", "user_id": "1111111111", "query": "hi"}));
    }

    #[test]
    fn snake_key_takes_precedence() {
        let out = normalize_params(&json!({"firebaseUID": "camel", "firebase_uid": "snake"}));
        assert_eq!(out, json!({"firebase_uid": "snake"}));
    }

    #[test]
    fn non_object_untouched() {
        assert_eq!(normalize_params(&json!([1, 2])), json!([1, 2]));
        assert_eq!(normalize_params(&Value::Null), Value::Null);
    }
}
