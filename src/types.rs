//! Core data model: requests, artifacts, validation steps, results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants::{DEFAULT_RETRY_BUDGET, DEFAULT_SANDBOX_TIMEOUT};
use crate::context::TaskContext;
use crate::error::ExecutorError;

/// Model-call priority, propagated verbatim to the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// User-initiated work.
    High,
    /// Background work.
    Low,
}

/// An execution request. Immutable for the duration of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Free-text task name, stable within a session.
    pub task_name: String,
    /// Free-text description; the primary semantic carrier.
    pub description: String,
    /// Parameter map (see [`TaskContext`] for the typed projections).
    #[serde(default)]
    pub context: TaskContext,
    /// Target language, when the caller knows it.
    #[serde(default)]
    pub language: Option<String>,
    /// Generate/repair attempts allowed in the validation loop.
    pub max_retries: u32,
    /// Sandbox execution timeout.
    pub timeout: Duration,
    /// Skip the capability cache and generate fresh code.
    #[serde(default)]
    pub force_regenerate: bool,
    pub priority: Priority,
}

impl ExecutionRequest {
    pub fn new(task_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            description: description.into(),
            context: TaskContext::new(),
            language: None,
            max_retries: DEFAULT_RETRY_BUDGET,
            timeout: DEFAULT_SANDBOX_TIMEOUT,
            force_regenerate: false,
            priority: Priority::High,
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// The `force_regenerate` request flag or its context-key spelling.
    pub fn wants_regeneration(&self) -> bool {
        self.force_regenerate || self.context.flag("force_regenerate")
    }
}

/// Provenance tags attached to stored artifacts.
pub mod tags {
    pub const INTELLIGENT_EXECUTION: &str = "intelligent_execution";
    pub const VALIDATED: &str = "validated";
    pub const FIXED: &str = "fixed";
    pub const CHAINED: &str = "chained";
}

/// A generated program plus its provenance. Immutable once stored; a repair
/// produces a new artifact rather than mutating the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub id: String,
    /// Task name this artifact was generated for.
    pub task_name: String,
    pub description: String,
    pub language: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the stored source is directly runnable.
    pub executable: bool,
    /// Context the artifact was produced under; drives cache compatibility.
    #[serde(default)]
    pub context: TaskContext,
}

impl GeneratedArtifact {
    pub fn new(
        task_name: impl Into<String>,
        description: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
        context: TaskContext,
    ) -> Self {
        Self {
            id: next_artifact_id(),
            task_name: task_name.into(),
            description: description.into(),
            language: language.into(),
            code: code.into(),
            created_at: Utc::now(),
            tags: vec![tags::INTELLIGENT_EXECUTION.to_string()],
            executable: true,
            context,
        }
    }

    pub fn tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// A new artifact carrying repaired code, tagged `fixed`.
    pub fn repaired(&self, code: String) -> Self {
        let mut next = Self {
            id: next_artifact_id(),
            code,
            created_at: Utc::now(),
            ..self.clone()
        };
        next.tag(tags::FIXED);
        next
    }
}

/// What kind of check a validation step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStepKind {
    StaticSafetyCheck,
    DockerExecution,
    ChainedExecution,
    DirectExecution,
}

/// One recorded verification attempt. Appended once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStep {
    pub kind: ValidationStepKind,
    pub success: bool,
    pub message: String,
    pub duration: Duration,
    /// Snapshot of the code under validation, when useful for diagnosis.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub error: String,
}

impl ValidationStep {
    pub fn new(kind: ValidationStepKind, success: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            success,
            message: message.into(),
            duration: Duration::ZERO,
            code: None,
            stdout: String::new(),
            error: String::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

/// Result payload: plain text for generated-program output and reports,
/// structured JSON for direct tool responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Text(String),
    Json(serde_json::Value),
}

impl ResultValue {
    /// Text view of the payload, serializing JSON values as needed.
    pub fn as_text(&self) -> String {
        match self {
            ResultValue::Text(s) => s.clone(),
            ResultValue::Json(v) => v.to_string(),
        }
    }
}

/// The outcome of one execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Option<ResultValue>,
    /// Terminal error, when `success` is false.
    #[serde(default)]
    pub error: Option<ExecutorError>,
    /// The artifact that produced the result, when one exists.
    #[serde(default)]
    pub artifact: Option<GeneratedArtifact>,
    pub elapsed: Duration,
    /// Validation-loop attempts consumed (1 on first-try success).
    pub retry_count: u32,
    pub used_cached_code: bool,
    /// Time-ascending record of every verification attempt.
    pub validation_steps: Vec<ValidationStep>,
    /// Id of a tool registered from this execution, if promotion happened.
    #[serde(default)]
    pub dynamic_action: Option<String>,
    /// Per-program timings, populated by chained executions.
    #[serde(default)]
    pub program_timings: Vec<ProgramTiming>,
    pub workflow_id: String,
}

/// Timing captured for one program of a chained execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramTiming {
    pub program_name: String,
    pub language: String,
    /// Algorithm-only duration parsed from the program's own output, when a
    /// timing token was present and plausible.
    #[serde(default)]
    pub algorithm: Option<Duration>,
    /// Full wall-clock duration of the sandbox run.
    pub total: Duration,
    /// Whether `algorithm` was extracted rather than defaulted to `total`.
    pub using_extracted_time: bool,
    pub success: bool,
}

impl ProgramTiming {
    /// The duration a comparison should use: extracted algorithm time when
    /// available, wall-clock otherwise.
    pub fn effective(&self) -> Duration {
        self.algorithm.unwrap_or(self.total)
    }
}

/// One entry of a parsed multi-program request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedProgram {
    pub name: String,
    pub language: String,
    pub description: String,
    #[serde(default)]
    pub context: TaskContext,
}

static WORKFLOW_COUNTER: AtomicU64 = AtomicU64::new(0);
static ARTIFACT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Time-derived workflow id, locally unique for the process lifetime.
pub fn next_workflow_id() -> String {
    let seq = WORKFLOW_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("wf_{}_{}", Utc::now().timestamp_millis(), seq)
}

fn next_artifact_id() -> String {
    let seq = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("art_{}_{}", Utc::now().timestamp_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_ids_are_unique() {
        let a = next_workflow_id();
        let b = next_workflow_id();
        assert_ne!(a, b);
        assert!(a.starts_with("wf_"));
    }

    #[test]
    fn repaired_artifact_is_a_new_artifact() {
        let original = GeneratedArtifact::new(
            "Sum",
            "sum numbers",
            "python",
            "print(1+2)",
            TaskContext::new(),
        );
        let fixed = original.repaired("print(3)".to_string());
        assert_ne!(original.id, fixed.id);
        assert!(fixed.has_tag(tags::FIXED));
        assert!(!original.has_tag(tags::FIXED));
        assert_eq!(fixed.task_name, original.task_name);
    }

    #[test]
    fn effective_timing_prefers_extracted() {
        let timing = ProgramTiming {
            program_name: "prog1".to_string(),
            language: "go".to_string(),
            algorithm: Some(Duration::from_nanos(1_500)),
            total: Duration::from_millis(40),
            using_extracted_time: true,
            success: true,
        };
        assert_eq!(timing.effective(), Duration::from_nanos(1_500));
    }

    #[test]
    fn regeneration_flag_reads_both_spellings() {
        let mut request = ExecutionRequest::new("T", "d");
        assert!(!request.wants_regeneration());
        request.context.set("force_regenerate", "true");
        assert!(request.wants_regeneration());
    }
}
