//! Tolerant parsing helpers for model output.
//!
//! Models wrap JSON in markdown fences, lead with prose, and trail with
//! commentary. These helpers pull the usable payload out without being
//! strict about the packaging.

use serde_json::Value;

/// Strip a surrounding markdown fence (with optional language tag) if the
/// text is fenced; otherwise return the input trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return trimmed.trim_matches('`').trim().to_string(),
    };
    let body = match without_open.rfind("```") {
        Some(idx) => &without_open[..idx],
        None => without_open,
    };
    body.trim().to_string()
}

/// First well-formed JSON object in the text, fences tolerated.
pub fn extract_json_object(text: &str) -> Option<Value> {
    extract_json(text, '{', '}')
}

/// First well-formed JSON array in the text, fences tolerated.
pub fn extract_json_array(text: &str) -> Option<Value> {
    extract_json(text, '[', ']')
}

fn extract_json(text: &str, open: char, close: char) -> Option<Value> {
    let unfenced = strip_code_fences(text);
    let candidate = balanced_slice(&unfenced, open, close)?;
    serde_json::from_str(candidate).ok()
}

/// The first balanced `open`..`close` slice, string-literal aware.
fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_parses() {
        let value = extract_json_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn prose_around_json_is_ignored() {
        let value =
            extract_json_object("Sure, here is the result:\n{\"ok\": true}\nHope it helps.")
                .unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let value = extract_json_object(r#"{"msg": "use { and } freely", "n": 2}"#).unwrap();
        assert_eq!(value["n"], json!(2));
    }

    #[test]
    fn arrays_are_extracted_too() {
        let value = extract_json_array("result: [1, 2, 3] done").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn unbalanced_input_yields_none() {
        assert!(extract_json_object("{\"a\": ").is_none());
    }

    #[test]
    fn fence_with_language_tag_is_stripped() {
        assert_eq!(strip_code_fences("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }
}
