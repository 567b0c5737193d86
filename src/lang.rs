//! Language detection and filename mapping for generated programs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Detection order matters: `rust` is checked before `go` so the literal
/// "go" never shadows a Rust mention, and the short names (`go`, `c`) only
/// match on word boundaries so "algorithm" or "calculate" cannot trigger
/// them.
const DETECTION_ORDER: &[(&str, &str)] = &[
    ("python", "python"),
    ("rust", "rust"),
    ("golang", "go"),
    ("go", "go"),
    ("javascript", "javascript"),
    ("typescript", "typescript"),
    ("node.js", "javascript"),
    ("ruby", "ruby"),
    ("java", "java"),
    ("c++", "cpp"),
    ("cpp", "cpp"),
    ("c", "c"),
];

static WORD_BOUNDED: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    DETECTION_ORDER
        .iter()
        .map(|(marker, canonical)| {
            // A trailing \b misfires after non-word characters ("c++").
            let tail = if marker.ends_with(|c: char| c.is_alphanumeric()) {
                r"\b"
            } else {
                ""
            };
            let pattern = format!(r"(?i)\b{}{}", regex::escape(marker), tail);
            (canonical.to_string(), Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// First language mentioned in the text, in detection-priority order.
pub fn detect_language(text: &str) -> Option<String> {
    WORD_BOUNDED
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(canonical, _)| canonical.clone())
}

/// All distinct languages mentioned in the text, in detection-priority order.
pub fn detect_languages(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (canonical, re) in WORD_BOUNDED.iter() {
        if re.is_match(text) && !found.contains(canonical) {
            found.push(canonical.clone());
        }
    }
    found
}

/// All distinct languages mentioned in the text, ordered by where they first
/// appear. This is the order chained programs run in ("Python then Go" runs
/// Python first regardless of detection priority).
pub fn detect_languages_positional(text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    for (canonical, re) in WORD_BOUNDED.iter() {
        if let Some(m) = re.find(text) {
            if !hits.iter().any(|(_, lang)| lang == canonical) {
                hits.push((m.start(), canonical.clone()));
            }
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, lang)| lang).collect()
}

/// Canonical source-file extension for a language.
pub fn extension_for(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "python" => "py",
        "go" => "go",
        "rust" => "rs",
        "javascript" => "js",
        "typescript" => "ts",
        "ruby" => "rb",
        "java" => "java",
        "c" => "c",
        "cpp" | "c++" => "cpp",
        _ => "txt",
    }
}

/// Language implied by a source-file extension, when it is a program file.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "py" => Some("python"),
        "go" => Some("go"),
        "rs" => Some("rust"),
        "js" => Some("javascript"),
        "ts" => Some("typescript"),
        "rb" => Some("ruby"),
        "java" => Some("java"),
        "c" => Some("c"),
        "cpp" | "cc" | "cxx" => Some("cpp"),
        _ => None,
    }
}

/// Language implied by a filename, when its extension is a program file.
pub fn language_for_filename(name: &str) -> Option<&'static str> {
    name.rsplit_once('.')
        .and_then(|(_, ext)| language_for_extension(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_is_not_shadowed_by_go() {
        assert_eq!(
            detect_languages("a Rust program then a Go program"),
            vec!["rust", "go"]
        );
    }

    #[test]
    fn go_needs_a_word_boundary() {
        assert!(detect_language("calculate the algorithm category").is_none());
        assert_eq!(detect_language("write it in Go").as_deref(), Some("go"));
    }

    #[test]
    fn positional_order_reflects_mention_order() {
        assert_eq!(
            detect_languages_positional("a Go program then the same in Python"),
            vec!["go", "python"]
        );
    }

    #[test]
    fn golang_maps_to_go() {
        assert_eq!(detect_language("a golang service").as_deref(), Some("go"));
    }

    #[test]
    fn filename_inference_skips_non_programs() {
        assert_eq!(language_for_filename("prog1.py"), Some("python"));
        assert_eq!(language_for_filename("prog2.go"), Some("go"));
        assert_eq!(language_for_filename("report.txt"), None);
        assert_eq!(language_for_filename("no_extension"), None);
    }

    #[test]
    fn extensions_round_trip_for_program_languages() {
        for lang in ["python", "go", "rust", "javascript", "ruby"] {
            assert_eq!(language_for_extension(extension_for(lang)), Some(lang));
        }
    }
}
