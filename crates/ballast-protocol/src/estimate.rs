//! Token estimation (~4 chars per token, never zero)

use serde_json::Value;

/// Estimate tokens for a string: `ceil(len / 4)`, floored at 1.
///
/// Every size decision in the system goes through this function so that
/// eviction, externalization, and reporting all agree on what a token is.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len().div_ceil(4)).max(1) as u64
}

/// Estimate tokens for a JSON value by serializing it first.
pub fn estimate_value_tokens(value: &Value) -> u64 {
    estimate_tokens(&value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("12345678901234567890"), 5);
    }

    #[test]
    fn test_empty_object_is_one_token() {
        // "{}" serializes to two chars
        assert_eq!(estimate_value_tokens(&json!({})), 1);
    }

    #[test]
    fn test_value_estimate_tracks_serialized_length() {
        let small = json!({"a": 1});
        let large = json!({"a": "x".repeat(400)});
        assert!(estimate_value_tokens(&large) > estimate_value_tokens(&small));
    }
}
