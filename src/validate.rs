//! The validation loop: sandbox the candidate, interpret the result, repair
//! through the model, retry within the budget.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codegen::GenerationDriver;
use crate::config::constants::{OUTPUT_EXPECTING_MARKERS, VALIDATION_SANDBOX_CEILING};
use crate::error::ExecutorError;
use crate::interfaces::{SandboxError, SandboxExecutor, SandboxOutcome, SandboxRequest};
use crate::learning::LearningStore;
use crate::safety::SafetyGate;
use crate::types::{ExecutionRequest, GeneratedArtifact, ValidationStep, ValidationStepKind};

static OUTPUT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    let alternation = OUTPUT_EXPECTING_MARKERS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{})", alternation)).unwrap()
});

/// Whether a description implies the program must produce stdout.
pub fn expects_output(description: &str) -> bool {
    OUTPUT_MARKERS.is_match(description)
}

/// Environment for a sandboxed program: the non-administrative context
/// values under uppercased keys, a QUIET flag, and the tool API callback URL.
pub fn sandbox_env(
    context: &crate::context::TaskContext,
    tool_api_base: &str,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = context
        .without_admin_keys()
        .iter()
        .map(|(key, value)| (key.to_uppercase(), value.clone()))
        .collect();
    env.insert("QUIET".to_string(), "1".to_string());
    env.insert("TOOL_API_URL".to_string(), tool_api_base.to_string());
    env
}

/// Successful exit of the validation loop.
pub struct ValidationOutcome {
    /// The artifact that passed (possibly a repaired descendant of the input).
    pub artifact: GeneratedArtifact,
    /// The sandbox run that passed.
    pub run: SandboxOutcome,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
}

/// Per-invocation knobs for the loop.
pub struct ValidationSettings {
    /// Step kind recorded for sandbox attempts.
    pub step_kind: ValidationStepKind,
    /// Whether generated code may perform network requests.
    pub network_allowed: bool,
    /// Empty stdout is acceptable when the run leaves files behind
    /// (chained sub-programs whose job is file creation).
    pub empty_output_ok_with_files: bool,
    /// Environment handed to the sandboxed program.
    pub env: BTreeMap<String, String>,
}

pub struct ValidationLoop<'a> {
    pub safety: &'a SafetyGate,
    pub driver: &'a GenerationDriver,
    pub sandbox: &'a Arc<dyn SandboxExecutor>,
    pub learning: &'a LearningStore,
}

impl ValidationLoop<'_> {
    /// Drive the artifact through validate/repair until it passes or the
    /// request's retry budget runs out. Every attempt appends exactly one
    /// validation step.
    pub async fn run(
        &self,
        mut artifact: GeneratedArtifact,
        request: &ExecutionRequest,
        settings: &ValidationSettings,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<ValidationOutcome, ExecutorError> {
        let budget = request.max_retries.max(1);
        let mut last_error = String::new();
        let mut last_output = String::new();

        for attempt in 1..=budget {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled(format!(
                    "cancelled before validation attempt {}",
                    attempt
                )));
            }

            if let Err(err) = self
                .safety
                .check_code(&artifact.code, settings.network_allowed)
            {
                steps.push(
                    ValidationStep::new(
                        ValidationStepKind::StaticSafetyCheck,
                        false,
                        err.to_string(),
                    )
                    .with_code(&artifact.code),
                );
                return Err(err);
            }

            let sandbox_request = SandboxRequest {
                language: artifact.language.clone(),
                code: artifact.code.clone(),
                stdin: None,
                env: settings.env.clone(),
                timeout: request.timeout.min(VALIDATION_SANDBOX_CEILING),
                is_validation: true,
            };

            let run = match self.sandbox.execute(sandbox_request, cancel).await {
                Ok(run) => run,
                Err(SandboxError::Unavailable(detail)) => {
                    steps.push(ValidationStep::new(
                        settings.step_kind,
                        false,
                        format!("docker executor unavailable: {}", detail),
                    ));
                    return Err(ExecutorError::SandboxUnavailable(detail));
                }
                Err(SandboxError::Dispatch(detail)) => {
                    debug!(attempt, error = %detail, "sandbox dispatch failed");
                    SandboxOutcome {
                        success: false,
                        stderr: detail,
                        exit_code: -1,
                        ..SandboxOutcome::default()
                    }
                }
            };

            let verdict = interpret(&run, request, settings);
            steps.push(
                ValidationStep::new(settings.step_kind, verdict.passed, verdict.message.clone())
                    .with_duration(run.duration)
                    .with_code(&artifact.code)
                    .with_stdout(run.stdout.clone())
                    .with_error(run.stderr.clone()),
            );

            if verdict.passed {
                if attempt > 1 {
                    self.best_effort_fix_outcome(&artifact.language, &last_error, true)
                        .await;
                }
                return Ok(ValidationOutcome {
                    artifact,
                    run,
                    attempts: attempt,
                });
            }

            last_error = verdict.error_text;
            last_output = run.stdout.clone();
            if let Err(err) = self
                .learning
                .record_failure(&artifact.language, &last_error)
                .await
            {
                warn!(error = %err, "failure pattern update failed");
            }

            if attempt == budget {
                break;
            }

            match self
                .driver
                .repair(&artifact, request, &last_error, &last_output, cancel)
                .await
            {
                Ok(repaired) => artifact = repaired,
                Err(ExecutorError::Cancelled(cause)) => {
                    return Err(ExecutorError::Cancelled(cause));
                }
                Err(err) => {
                    // The attempt is consumed; the loop re-validates the
                    // unrepaired artifact rather than aborting early.
                    warn!(error = %err, attempt, "repair attempt failed");
                    self.best_effort_fix_outcome(&artifact.language, &last_error, false)
                        .await;
                }
            }
        }

        let detail = if last_error.is_empty() {
            last_output
        } else {
            last_error
        };
        Err(ExecutorError::ValidationFailure(detail))
    }

    async fn best_effort_fix_outcome(&self, language: &str, error: &str, fixed: bool) {
        if error.is_empty() {
            return;
        }
        let note = fixed.then_some("model-driven repair");
        if let Err(err) = self
            .learning
            .record_fix_outcome(language, error, fixed, note)
            .await
        {
            warn!(error = %err, "fix-outcome update failed");
        }
    }
}

struct Interpretation {
    passed: bool,
    message: String,
    error_text: String,
}

/// Decide whether a sandbox run satisfies the request. A clean exit with
/// empty stdout still fails when the description promises output, unless the
/// run produced files and the settings permit that.
fn interpret(
    run: &SandboxOutcome,
    request: &ExecutionRequest,
    settings: &ValidationSettings,
) -> Interpretation {
    if !run.success {
        let error_text = if run.stderr.is_empty() {
            format!("exit code {}", run.exit_code)
        } else {
            run.stderr.clone()
        };
        return Interpretation {
            passed: false,
            message: format!("execution failed: {}", summarize(&error_text)),
            error_text,
        };
    }

    if run.stdout.trim().is_empty() && expects_output(&request.description) {
        if settings.empty_output_ok_with_files && !run.files.is_empty() {
            return Interpretation {
                passed: true,
                message: format!("produced {} file(s) with no stdout", run.files.len()),
                error_text: String::new(),
            };
        }
        return Interpretation {
            passed: false,
            message: "program exited cleanly but produced no output".to_string(),
            error_text: "expected output but stdout was empty".to_string(),
        };
    }

    Interpretation {
        passed: true,
        message: "execution succeeded".to_string(),
        error_text: String::new(),
    }
}

fn summarize(text: &str) -> String {
    let mut line = text.lines().next().unwrap_or("").to_string();
    if line.len() > 160 {
        line.truncate(160);
    }
    line
}
