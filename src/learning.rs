//! Learning store: failure patterns and generation-strategy statistics kept
//! in an external TTL key/value store.
//!
//! Updates are advisory. Read-modify-write sequences are not fenced, so
//! concurrent executions may lose an increment; the executor treats every
//! operation here as best-effort and never lets a failure propagate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::constants::{
    HINT_MIN_FREQUENCY, LEARNING_TTL, STRATEGY_EMA_ALPHA, STRATEGY_MIN_SUCCESS_RATE,
    STRATEGY_MIN_USAGE,
};
use crate::interfaces::LearningKv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Compilation,
    Runtime,
    TypeError,
    Validation,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::Compilation => write!(f, "compilation"),
            PatternType::Runtime => write!(f, "runtime"),
            PatternType::TypeError => write!(f, "type_error"),
            PatternType::Validation => write!(f, "validation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UndefinedSymbol,
    UnusedImport,
    TypeMismatch,
    AssignmentMismatch,
    ImportError,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::UndefinedSymbol => write!(f, "undefined_symbol"),
            ErrorCategory::UnusedImport => write!(f, "unused_import"),
            ErrorCategory::TypeMismatch => write!(f, "type_mismatch"),
            ErrorCategory::AssignmentMismatch => write!(f, "assignment_mismatch"),
            ErrorCategory::ImportError => write!(f, "import_error"),
            ErrorCategory::Other => write!(f, "other"),
        }
    }
}

/// A recurring failure shape, keyed by `{pattern_type, category, language}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern_type: PatternType,
    pub error_category: ErrorCategory,
    pub language: String,
    pub frequency: u64,
    pub success_rate_after_fix: f64,
    #[serde(default)]
    pub common_fixes: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Moving statistics for one `{task_category, language}` generation bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenStrategy {
    pub task_category: String,
    pub language: String,
    pub success_rate: f64,
    pub avg_retries: f64,
    pub avg_quality: f64,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

/// Classify an error message into its pattern type and category.
///
/// Matching is ordered: compilation-shaped markers first, then runtime, then
/// type errors. "imported and not used" therefore lands in
/// `compilation/unused_import` even though it also mentions imports.
pub fn categorize_error(error: &str) -> (PatternType, ErrorCategory) {
    let lowered = error.to_lowercase();

    let category = if lowered.contains("undefined") {
        ErrorCategory::UndefinedSymbol
    } else if lowered.contains("unused") || lowered.contains("not used") {
        ErrorCategory::UnusedImport
    } else if lowered.contains("import") {
        ErrorCategory::ImportError
    } else if lowered.contains("type") {
        ErrorCategory::TypeMismatch
    } else if lowered.contains("assignment mismatch") {
        ErrorCategory::AssignmentMismatch
    } else {
        ErrorCategory::Other
    };

    let pattern_type = if lowered.contains("undefined")
        || lowered.contains("unused")
        || lowered.contains("not used")
        || lowered.contains("import")
    {
        PatternType::Compilation
    } else if lowered.contains("panic")
        || lowered.contains("runtime")
        || lowered.contains("out of range")
        || lowered.contains("nil pointer")
    {
        PatternType::Runtime
    } else if lowered.contains("type mismatch")
        || lowered.contains("cannot use")
        || lowered.contains("assignment mismatch")
    {
        PatternType::TypeError
    } else {
        PatternType::Validation
    };

    (pattern_type, category)
}

/// Keyword bucketing of a description into a strategy category.
pub fn task_category(description: &str) -> &'static str {
    let lowered = description.to_lowercase();
    if lowered.contains("json") {
        "json_processing"
    } else if lowered.contains("file") || lowered.contains("directory") {
        "file_operations"
    } else if lowered.contains("http") || lowered.contains("url") || lowered.contains("fetch") {
        "http_operations"
    } else if lowered.contains("calculat")
        || lowered.contains("comput")
        || lowered.contains("math")
        || lowered.contains("prime")
        || lowered.contains("sum")
        || lowered.contains("matrix")
        || lowered.contains("statistic")
    {
        "calculation"
    } else if lowered.contains("transform")
        || lowered.contains("convert")
        || lowered.contains("parse")
        || lowered.contains("format")
    {
        "data_transformation"
    } else {
        "general"
    }
}

fn hint_for(category: ErrorCategory, language: &str) -> String {
    match category {
        ErrorCategory::UnusedImport => format!(
            "In {}, import only what the program references; unused imports have caused failures before.",
            language
        ),
        ErrorCategory::UndefinedSymbol => format!(
            "In {}, define or import every symbol before use; undefined identifiers have caused failures before.",
            language
        ),
        ErrorCategory::TypeMismatch => format!(
            "In {}, convert values explicitly before mixing numeric types; type mismatches have caused failures before.",
            language
        ),
        ErrorCategory::AssignmentMismatch => format!(
            "In {}, match the number of values on both sides of an assignment.",
            language
        ),
        ErrorCategory::ImportError => format!(
            "In {}, stick to the standard library unless a dependency is explicitly available.",
            language
        ),
        ErrorCategory::Other => format!(
            "Re-read the task parameters carefully when generating {} code; a previous attempt failed validation.",
            language
        ),
    }
}

fn pattern_key(pattern_type: PatternType, category: ErrorCategory, language: &str) -> String {
    format!("failure_pattern:{}:{}:{}", pattern_type, category, language)
}

fn hint_key(pattern_type: PatternType, category: ErrorCategory, language: &str) -> String {
    format!("prevention_hint:{}:{}:{}", pattern_type, category, language)
}

fn strategy_key(category: &str, language: &str) -> String {
    format!("codegen_strategy:{}:{}", category, language)
}

#[derive(Clone)]
pub struct LearningStore {
    kv: Arc<dyn LearningKv>,
}

impl LearningStore {
    pub fn new(kv: Arc<dyn LearningKv>) -> Self {
        Self { kv }
    }

    /// Record one observed failure: increment the pattern and refresh its
    /// prevention hint.
    pub async fn record_failure(&self, language: &str, error: &str) -> anyhow::Result<()> {
        let (pattern_type, category) = categorize_error(error);
        let key = pattern_key(pattern_type, category, language);
        let now = Utc::now();

        let mut pattern = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str::<FailurePattern>(&raw).unwrap_or_else(|_| {
                new_pattern(pattern_type, category, language, now)
            }),
            None => new_pattern(pattern_type, category, language, now),
        };
        pattern.frequency += 1;
        pattern.last_seen = now;

        self.kv
            .set(&key, &serde_json::to_string(&pattern)?, LEARNING_TTL)
            .await?;
        self.kv
            .set(
                &hint_key(pattern_type, category, language),
                &hint_for(category, language),
                LEARNING_TTL,
            )
            .await?;
        debug!(%key, frequency = pattern.frequency, "failure pattern recorded");
        Ok(())
    }

    /// Record the outcome of a repair attempt for the pattern that caused it.
    pub async fn record_fix_outcome(
        &self,
        language: &str,
        original_error: &str,
        fixed: bool,
        fix_note: Option<&str>,
    ) -> anyhow::Result<()> {
        let (pattern_type, category) = categorize_error(original_error);
        let key = pattern_key(pattern_type, category, language);
        let raw = match self.kv.get(&key).await? {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let mut pattern: FailurePattern = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        pattern.success_rate_after_fix = (1.0 - STRATEGY_EMA_ALPHA)
            * pattern.success_rate_after_fix
            + STRATEGY_EMA_ALPHA * if fixed { 1.0 } else { 0.0 };
        if fixed {
            if let Some(note) = fix_note {
                if !pattern.common_fixes.iter().any(|f| f == note) {
                    pattern.common_fixes.push(note.to_string());
                }
            }
        }
        self.kv
            .set(&key, &serde_json::to_string(&pattern)?, LEARNING_TTL)
            .await
    }

    /// Prevention hints for patterns observed at least twice in a language.
    pub async fn prevention_hints(&self, language: &str) -> anyhow::Result<Vec<String>> {
        let mut hints = Vec::new();
        for key in self.kv.keys("failure_pattern:*").await? {
            if !key.ends_with(&format!(":{}", language)) {
                continue;
            }
            let raw = match self.kv.get(&key).await? {
                Some(raw) => raw,
                None => continue,
            };
            let pattern: FailurePattern = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if pattern.frequency < HINT_MIN_FREQUENCY {
                continue;
            }
            let hint = self
                .kv
                .get(&hint_key(
                    pattern.pattern_type,
                    pattern.error_category,
                    language,
                ))
                .await?;
            if let Some(hint) = hint {
                if !hints.contains(&hint) {
                    hints.push(hint);
                }
            }
        }
        Ok(hints)
    }

    /// Fold one run into the strategy bucket for this description/language.
    pub async fn record_strategy(
        &self,
        description: &str,
        language: &str,
        success: bool,
        retries: u32,
    ) -> anyhow::Result<()> {
        let category = task_category(description);
        let key = strategy_key(category, language);
        let now = Utc::now();
        let quality = (1.0 - retries as f64 / 5.0).max(0.0);

        let mut strategy = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str::<CodegenStrategy>(&raw).unwrap_or_else(|_| {
                new_strategy(category, language, now)
            }),
            None => new_strategy(category, language, now),
        };

        let alpha = STRATEGY_EMA_ALPHA;
        strategy.success_rate =
            (1.0 - alpha) * strategy.success_rate + alpha * if success { 1.0 } else { 0.0 };
        strategy.avg_retries = (1.0 - alpha) * strategy.avg_retries + alpha * retries as f64;
        strategy.avg_quality = (1.0 - alpha) * strategy.avg_quality + alpha * quality;
        strategy.usage_count += 1;
        strategy.last_used = now;

        self.kv
            .set(&key, &serde_json::to_string(&strategy)?, LEARNING_TTL)
            .await
    }

    /// Strategy descriptors strong enough to feed prompt augmentation.
    pub async fn proven_strategies(&self, language: &str) -> anyhow::Result<Vec<CodegenStrategy>> {
        let mut strategies = Vec::new();
        for key in self.kv.keys("codegen_strategy:*").await? {
            if !key.ends_with(&format!(":{}", language)) {
                continue;
            }
            let raw = match self.kv.get(&key).await? {
                Some(raw) => raw,
                None => continue,
            };
            let strategy: CodegenStrategy = match serde_json::from_str(&raw) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if strategy.success_rate > STRATEGY_MIN_SUCCESS_RATE
                && strategy.usage_count >= STRATEGY_MIN_USAGE
            {
                strategies.push(strategy);
            }
        }
        Ok(strategies)
    }
}

fn new_pattern(
    pattern_type: PatternType,
    category: ErrorCategory,
    language: &str,
    now: DateTime<Utc>,
) -> FailurePattern {
    FailurePattern {
        pattern_type,
        error_category: category,
        language: language.to_string(),
        frequency: 0,
        success_rate_after_fix: 0.0,
        common_fixes: Vec::new(),
        first_seen: now,
        last_seen: now,
    }
}

fn new_strategy(category: &str, language: &str, now: DateTime<Utc>) -> CodegenStrategy {
    CodegenStrategy {
        task_category: category.to_string(),
        language: language.to_string(),
        success_rate: 0.0,
        avg_retries: 0.0,
        avg_quality: 0.0,
        usage_count: 0,
        last_used: now,
    }
}
