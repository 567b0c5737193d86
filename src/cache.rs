//! Capability cache matching: deciding whether a stored artifact can serve
//! the current request.
//!
//! Compatibility is domain-aware. Mathematical tasks tolerate loose context
//! overlap as long as the critical parameters agree; string tasks are
//! stricter; everything else falls back to a structural key-overlap test.
//! Language mismatch is a hard guard that beats every other score.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::constants::{
    CRITICAL_MATH_PARAMS, MATH_OVERLAP_THRESHOLD, MATH_TASK_MARKERS, NUMERIC_FALLBACK_CONFIDENCE,
    NUMERIC_PARAM_NAMES, STRING_OVERLAP_THRESHOLD, STRING_TASK_MARKERS,
    STRUCTURAL_OVERLAP_THRESHOLD,
};
use crate::context::TaskContext;
use crate::interfaces::CodeStorage;
use crate::types::{ExecutionRequest, GeneratedArtifact};

/// Why an artifact was (or was not) judged reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityStatus {
    ExactMatch,
    LanguageMismatch,
    ProjectMismatch,
    MathematicalCompatible,
    MathematicalNumericOverlap,
    StringCompatible,
    StructurallyCompatible,
    Incompatible,
}

/// The outcome of one artifact-vs-request compatibility assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityVerdict {
    pub compatible: bool,
    pub status: CompatibilityStatus,
    pub reason: String,
    /// In `[0, 1]`; used to rank multiple compatible candidates.
    pub confidence: f64,
}

impl CompatibilityVerdict {
    fn incompatible(status: CompatibilityStatus, reason: impl Into<String>) -> Self {
        Self {
            compatible: false,
            status,
            reason: reason.into(),
            confidence: 0.0,
        }
    }

    fn compatible(
        status: CompatibilityStatus,
        reason: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            compatible: true,
            status,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Assess whether a cached artifact is compatible with the request.
pub fn assess(request: &ExecutionRequest, artifact: &GeneratedArtifact) -> CompatibilityVerdict {
    if let Some(language) = &request.language {
        if !language.eq_ignore_ascii_case(&artifact.language) {
            return CompatibilityVerdict::incompatible(
                CompatibilityStatus::LanguageMismatch,
                format!(
                    "request wants {} but artifact is {}",
                    language, artifact.language
                ),
            );
        }
    }

    if let (Some(req_project), Some(art_project)) = (
        request.context.get("project_id"),
        artifact.context.get("project_id"),
    ) {
        if req_project != art_project {
            return CompatibilityVerdict::incompatible(
                CompatibilityStatus::ProjectMismatch,
                format!("artifact belongs to project {}", art_project),
            );
        }
    }

    if request.context == artifact.context {
        return CompatibilityVerdict::compatible(
            CompatibilityStatus::ExactMatch,
            "contexts are identical",
            1.0,
        );
    }

    let task = request.task_name.to_lowercase();
    if contains_any(&task, MATH_TASK_MARKERS) {
        return assess_mathematical(request, artifact);
    }
    if contains_any(&task, STRING_TASK_MARKERS) {
        return assess_string(request, artifact);
    }
    assess_structural(request, artifact)
}

fn assess_mathematical(
    request: &ExecutionRequest,
    artifact: &GeneratedArtifact,
) -> CompatibilityVerdict {
    if request.task_name != artifact.task_name {
        return CompatibilityVerdict::incompatible(
            CompatibilityStatus::Incompatible,
            "mathematical tasks require identical task names",
        );
    }

    for param in CRITICAL_MATH_PARAMS {
        if let (Some(req_val), Some(art_val)) =
            (request.context.get(param), artifact.context.get(param))
        {
            if req_val != art_val {
                return CompatibilityVerdict::incompatible(
                    CompatibilityStatus::Incompatible,
                    format!("critical parameter '{}' differs", param),
                );
            }
        }
    }

    let ratio = cached_key_coverage(&artifact.context, &request.context);
    if ratio >= MATH_OVERLAP_THRESHOLD {
        return CompatibilityVerdict::compatible(
            CompatibilityStatus::MathematicalCompatible,
            format!("{:.0}% of cached parameters present", ratio * 100.0),
            ratio,
        );
    }

    let shared_numeric = NUMERIC_PARAM_NAMES.iter().find(|name| {
        request.context.contains_key(name) && artifact.context.contains_key(name)
    });
    if let Some(name) = shared_numeric {
        return CompatibilityVerdict::compatible(
            CompatibilityStatus::MathematicalNumericOverlap,
            format!("shared numeric parameter '{}'", name),
            NUMERIC_FALLBACK_CONFIDENCE,
        );
    }

    CompatibilityVerdict::incompatible(
        CompatibilityStatus::Incompatible,
        "insufficient parameter overlap for a mathematical task",
    )
}

fn assess_string(request: &ExecutionRequest, artifact: &GeneratedArtifact) -> CompatibilityVerdict {
    let ratio = cached_key_coverage(&artifact.context, &request.context);
    if ratio >= STRING_OVERLAP_THRESHOLD {
        CompatibilityVerdict::compatible(
            CompatibilityStatus::StringCompatible,
            format!("{:.0}% of cached parameters present", ratio * 100.0),
            ratio,
        )
    } else {
        CompatibilityVerdict::incompatible(
            CompatibilityStatus::Incompatible,
            "string tasks require near-complete parameter overlap",
        )
    }
}

fn assess_structural(
    request: &ExecutionRequest,
    artifact: &GeneratedArtifact,
) -> CompatibilityVerdict {
    let request_keys: BTreeSet<&String> = request.context.keys().collect();
    let artifact_keys: BTreeSet<&String> = artifact.context.keys().collect();
    let combined = request_keys.union(&artifact_keys).count();
    if combined == 0 {
        // Both empty would have been an exact match already.
        return CompatibilityVerdict::incompatible(
            CompatibilityStatus::Incompatible,
            "no context to compare",
        );
    }
    let shared = request_keys.intersection(&artifact_keys).count();
    let ratio = shared as f64 / combined as f64;
    if ratio >= STRUCTURAL_OVERLAP_THRESHOLD {
        CompatibilityVerdict::compatible(
            CompatibilityStatus::StructurallyCompatible,
            format!("{}/{} shared context keys", shared, combined),
            ratio,
        )
    } else {
        CompatibilityVerdict::incompatible(
            CompatibilityStatus::Incompatible,
            format!("only {}/{} shared context keys", shared, combined),
        )
    }
}

/// Ratio of the cached context's keys that also appear on the request. An
/// empty cached context constrains nothing and counts as full coverage.
fn cached_key_coverage(cached: &TaskContext, request: &TaskContext) -> f64 {
    if cached.is_empty() {
        return 1.0;
    }
    let present = cached
        .keys()
        .filter(|key| request.contains_key(key))
        .count();
    present as f64 / cached.len() as f64
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Search the external code storage for the best compatible artifact.
pub async fn find_compatible(
    storage: &Arc<dyn CodeStorage>,
    request: &ExecutionRequest,
) -> anyhow::Result<Option<(GeneratedArtifact, CompatibilityVerdict)>> {
    let candidates = storage.search(&request.task_name, None, &[]).await?;
    let mut best: Option<(GeneratedArtifact, CompatibilityVerdict)> = None;
    for artifact in candidates.into_iter().filter(|a| a.executable) {
        let verdict = assess(request, &artifact);
        debug!(
            artifact = %artifact.id,
            status = ?verdict.status,
            confidence = verdict.confidence,
            "cache candidate assessed"
        );
        if !verdict.compatible {
            continue;
        }
        let better = match &best {
            Some((_, current)) => verdict.confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some((artifact, verdict));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionRequest;

    fn artifact(task: &str, language: &str, context: TaskContext) -> GeneratedArtifact {
        GeneratedArtifact::new(task, "cached", language, "print(1)", context)
    }

    #[test]
    fn identical_context_is_an_exact_match() {
        let ctx = TaskContext::from([("count", "10"), ("input", "10")]);
        let request = ExecutionRequest::new("CalculatePrimes", "primes")
            .with_context(ctx.clone())
            .with_language("python");
        let verdict = assess(&request, &artifact("CalculatePrimes", "python", ctx));
        assert_eq!(verdict.status, CompatibilityStatus::ExactMatch);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn language_mismatch_beats_everything() {
        let ctx = TaskContext::from([("count", "10")]);
        let request = ExecutionRequest::new("CalculatePrimes", "primes")
            .with_context(ctx.clone())
            .with_language("python");
        let verdict = assess(&request, &artifact("CalculatePrimes", "go", ctx));
        assert_eq!(verdict.status, CompatibilityStatus::LanguageMismatch);
        assert!(!verdict.compatible);
    }

    #[test]
    fn project_mismatch_is_a_hard_guard() {
        let request = ExecutionRequest::new("Render", "render")
            .with_context(TaskContext::from([("project_id", "alpha"), ("n", "1")]));
        let verdict = assess(
            &request,
            &artifact(
                "Render",
                "python",
                TaskContext::from([("project_id", "beta"), ("n", "1")]),
            ),
        );
        assert_eq!(verdict.status, CompatibilityStatus::ProjectMismatch);
    }

    #[test]
    fn critical_math_parameter_difference_is_fatal() {
        let request = ExecutionRequest::new("CalculateStats", "stats").with_context(
            TaskContext::from([("operation", "mean"), ("count", "10")]),
        );
        let verdict = assess(
            &request,
            &artifact(
                "CalculateStats",
                "python",
                TaskContext::from([("operation", "median"), ("count", "10")]),
            ),
        );
        assert!(!verdict.compatible);
    }

    #[test]
    fn math_task_accepts_high_key_coverage() {
        let request = ExecutionRequest::new("CalculatePrimes", "primes").with_context(
            TaskContext::from([("count", "25"), ("input", "25"), ("extra", "x")]),
        );
        let verdict = assess(
            &request,
            &artifact(
                "CalculatePrimes",
                "python",
                TaskContext::from([("count", "10"), ("input", "10")]),
            ),
        );
        assert_eq!(verdict.status, CompatibilityStatus::MathematicalCompatible);
        assert!(verdict.compatible);
    }

    #[test]
    fn math_task_falls_back_to_shared_numeric_names() {
        let request = ExecutionRequest::new("SumNumbers", "sum")
            .with_context(TaskContext::from([("n", "5"), ("mode_hint", "fast")]));
        let verdict = assess(
            &request,
            &artifact(
                "SumNumbers",
                "python",
                TaskContext::from([("n", "9"), ("seed", "1"), ("cap", "100"), ("style", "x"), ("z", "1")]),
            ),
        );
        assert_eq!(
            verdict.status,
            CompatibilityStatus::MathematicalNumericOverlap
        );
        assert_eq!(verdict.confidence, 0.8);
    }

    #[test]
    fn string_task_requires_near_complete_overlap() {
        let request = ExecutionRequest::new("FormatText", "format")
            .with_context(TaskContext::from([("text", "abc")]));
        let verdict = assess(
            &request,
            &artifact(
                "FormatText",
                "python",
                TaskContext::from([("text", "xyz"), ("width", "80")]),
            ),
        );
        assert!(!verdict.compatible);
    }

    #[test]
    fn structural_fallback_uses_combined_key_ratio() {
        let request = ExecutionRequest::new("Render", "render").with_context(TaskContext::from([
            ("a", "1"),
            ("b", "2"),
            ("c", "3"),
        ]));
        let verdict = assess(
            &request,
            &artifact(
                "Render",
                "python",
                TaskContext::from([("a", "9"), ("b", "9"), ("c", "9"), ("d", "9")]),
            ),
        );
        assert_eq!(
            verdict.status,
            CompatibilityStatus::StructurallyCompatible
        );
        assert!((verdict.confidence - 0.75).abs() < 1e-9);
    }
}
