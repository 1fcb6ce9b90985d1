//! Lenient JSON extraction for `llm_reason` steps with `outputFormat =
//! "json"`: strip Markdown code fences, drop trailing commas, then parse.

use serde_json::Value;

pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = strip_code_fence(text.trim());
    serde_json::from_str(stripped)
        .ok()
        .or_else(|| serde_json::from_str(&drop_trailing_commas(stripped)).ok())
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(after_open) = text.strip_prefix("```") else {
        return text;
    };
    let after_open = after_open
        .strip_prefix("json")
        .unwrap_or(after_open)
        .trim_start_matches(['\n', '\r']);
    after_open.strip_suffix("```").unwrap_or(after_open).trim()
}

fn drop_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        assert_eq!(extract_json(r#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn strips_fenced_json_block() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn repairs_trailing_comma() {
        let text = r#"{"a": 1, "b": [1, 2,],}"#;
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn returns_none_for_unparseable_garbage() {
        assert!(extract_json("not json at all").is_none());
    }
}
