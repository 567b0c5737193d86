//! Request context: a free-form string map with typed projections.
//!
//! The context arrives as untyped key/value pairs from planners and callers.
//! Rather than threading raw strings everywhere, the engine reads it through
//! small pure projections: boolean flags, URL collections, numeric parameter
//! views, and the administrative filter applied before prompting.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::constants::ADMIN_CONTEXT_KEYS;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s\x22'<>\)]+").unwrap());

/// Ordered-insertion-irrelevant string map carried by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContext {
    entries: BTreeMap<String, String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Truthy-flag projection: `"true"`, `"1"`, and `"yes"` count as set.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| {
                let v = v.trim().to_lowercase();
                v == "true" || v == "1" || v == "yes"
            })
            .unwrap_or(false)
    }

    /// Copy of the map with administrative plumbing keys removed. This is the
    /// view handed to prompts and to tool input-schema inference.
    pub fn without_admin_keys(&self) -> TaskContext {
        let entries = self
            .entries
            .iter()
            .filter(|(k, _)| !ADMIN_CONTEXT_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        TaskContext { entries }
    }

    /// Declared artifact filenames, comma-separated in `artifact_names`.
    pub fn artifact_names(&self) -> Vec<String> {
        self.get("artifact_names")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every URL present in URL-bearing context keys (`url`, `urls`,
    /// `source_url*`, `link_*`), deduplicated in key order.
    pub fn urls(&self) -> Vec<String> {
        let mut found = Vec::new();
        for (key, value) in &self.entries {
            if !is_url_key(key) {
                continue;
            }
            for m in URL_PATTERN.find_iter(value) {
                let url = m.as_str().trim_end_matches(['.', ',']).to_string();
                if !found.contains(&url) {
                    found.push(url);
                }
            }
        }
        found
    }

    /// Keys whose values parse as numbers, with the parsed value.
    pub fn numeric_params(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.trim().parse::<f64>().ok().map(|n| (k.clone(), n)))
            .collect()
    }

    /// Multi-line `key: value` rendering used inside prompts.
    pub fn render_for_prompt(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(String, String)> for TaskContext {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        TaskContext {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for TaskContext {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

fn is_url_key(key: &str) -> bool {
    key == "url" || key == "urls" || key.starts_with("source_url") || key.starts_with("link_")
}

/// Extract every URL embedded in free text (descriptions, tool arguments).
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',']).to_string();
        if !found.contains(&url) {
            found.push(url);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_projection_accepts_truthy_spellings() {
        let ctx = TaskContext::from([("a", "true"), ("b", "1"), ("c", "YES"), ("d", "no")]);
        assert!(ctx.flag("a"));
        assert!(ctx.flag("b"));
        assert!(ctx.flag("c"));
        assert!(!ctx.flag("d"));
        assert!(!ctx.flag("missing"));
    }

    #[test]
    fn admin_keys_are_filtered() {
        let ctx = TaskContext::from([
            ("session_id", "s-1"),
            ("project_id", "p-1"),
            ("count", "10"),
            ("artifact_names", "out.txt"),
        ]);
        let filtered = ctx.without_admin_keys();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("count"), Some("10"));
    }

    #[test]
    fn urls_come_from_url_shaped_keys_only() {
        let ctx = TaskContext::from([
            ("url", "https://example.com/a"),
            ("link_docs", "see https://example.com/b"),
            ("source_url_2", "https://example.com/c"),
            ("note", "https://example.com/ignored"),
        ]);
        let urls = ctx.urls();
        assert_eq!(
            urls,
            vec![
                "https://example.com/b",
                "https://example.com/c",
                "https://example.com/a",
            ]
        );
    }

    #[test]
    fn numeric_view_parses_numbers_only() {
        let ctx = TaskContext::from([("count", "10"), ("label", "ten"), ("ratio", "0.5")]);
        let nums = ctx.numeric_params();
        assert_eq!(nums.get("count"), Some(&10.0));
        assert_eq!(nums.get("ratio"), Some(&0.5));
        assert!(!nums.contains_key("label"));
    }

    #[test]
    fn artifact_names_split_and_trim() {
        let ctx = TaskContext::from([("artifact_names", "prog1.go, prog2.py ,report.txt")]);
        assert_eq!(
            ctx.artifact_names(),
            vec!["prog1.go", "prog2.py", "report.txt"]
        );
    }

    #[test]
    fn free_text_url_extraction_strips_trailing_punctuation() {
        let urls = extract_urls("fetch https://example.com/a, then https://example.com/b.");
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }
}
