//! Chained program engine: parse a multi-program request, run the programs
//! in order with inter-program data handoff, and shape the combined result.
//!
//! Each program goes through the standard generation and validation loop,
//! but the loop protector is bypassed and program failures do not abort the
//! chain: timings and outputs are recorded for every participant so a
//! comparison report can still be produced.

pub mod parse;
pub mod report;
pub mod timing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::ArtifactSink;
use crate::codegen::{GenerationDriver, PromptEnrichment};
use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::interfaces::{LanguageModel, SandboxExecutor};
use crate::lang::extension_for;
use crate::learning::LearningStore;
use crate::safety::SafetyGate;
use crate::types::{
    tags, ChainedProgram, ExecutionRequest, GeneratedArtifact, ProgramTiming, ResultValue,
    ValidationStep, ValidationStepKind,
};
use crate::validate::{sandbox_env, ValidationLoop, ValidationSettings};

/// What a chained run hands back to the executor.
pub struct ChainedOutcome {
    pub result: ResultValue,
    pub timings: Vec<ProgramTiming>,
    /// The last successfully validated artifact, for result provenance.
    pub last_artifact: Option<GeneratedArtifact>,
}

pub struct ChainedEngine<'a> {
    pub llm: &'a Arc<dyn LanguageModel>,
    pub driver: &'a GenerationDriver,
    pub safety: &'a SafetyGate,
    pub sandbox: &'a Arc<dyn SandboxExecutor>,
    pub learning: &'a LearningStore,
    pub sink: &'a ArtifactSink,
    pub config: &'a ExecutorConfig,
}

impl ChainedEngine<'_> {
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        workflow_id: &str,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<ChainedOutcome, ExecutorError> {
        let programs = parse::parse_programs(self.llm, request, cancel).await?;
        let comparison = report::is_comparison_request(&request.description);
        info!(
            count = programs.len(),
            comparison, "chained execution starting"
        );

        let mut timings: Vec<ProgramTiming> = Vec::new();
        let mut outputs: Vec<String> = Vec::new();
        let mut previous_output: Option<String> = None;
        let mut last_artifact: Option<GeneratedArtifact> = None;

        for (index, program) in programs.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled(format!(
                    "cancelled before program {} of {}",
                    index + 1,
                    programs.len()
                )));
            }

            let step_request = program_request(request, program, previous_output.as_deref());
            match self
                .run_single(&step_request, program, index, workflow_id, steps, cancel)
                .await
            {
                Ok((artifact, stdout, timing)) => {
                    previous_output = Some(handoff_output(&stdout, comparison));
                    outputs.push(stdout);
                    timings.push(timing);
                    last_artifact = Some(artifact);
                }
                Err(ProgramFailure::Fatal(err)) => return Err(err),
                Err(ProgramFailure::Recoverable { detail, timing }) => {
                    warn!(program = %program.name, error = %detail, "chained program failed");
                    outputs.push(detail);
                    timings.push(timing);
                    previous_output = None;
                }
            }
        }

        let result = if comparison {
            let entries: Vec<report::ProgramReportEntry<'_>> = timings
                .iter()
                .zip(outputs.iter())
                .map(|(timing, output)| report::ProgramReportEntry {
                    timing,
                    output: output.as_str(),
                })
                .collect();
            let text = report::synthesize_report(&entries);
            if let Err(err) = self
                .sink
                .store_source(
                    "performance_comparison_report.txt",
                    &text,
                    workflow_id,
                    "report",
                )
                .await
            {
                warn!(error = %err, "report store failed");
            }
            ResultValue::Text(text)
        } else {
            ResultValue::Text(
                outputs
                    .last()
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
            )
        };

        Ok(ChainedOutcome {
            result,
            timings,
            last_artifact,
        })
    }

    /// Generate, validate, and persist one program of the chain.
    async fn run_single(
        &self,
        step_request: &ExecutionRequest,
        program: &ChainedProgram,
        index: usize,
        workflow_id: &str,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<(GeneratedArtifact, String, ProgramTiming), ProgramFailure> {
        let hints = self
            .learning
            .prevention_hints(&program.language)
            .await
            .unwrap_or_default();
        let tool_api_base = self.config.tool_api_base_for_sandbox();
        let enrichment = PromptEnrichment {
            tools: &[],
            tool_api_base: &tool_api_base,
            hints: &hints,
            strategies: &[],
        };

        let mut artifact = match self
            .driver
            .generate(step_request, &program.language, &enrichment, cancel)
            .await
        {
            Ok(artifact) => artifact,
            Err(err @ ExecutorError::Cancelled(_)) => return Err(ProgramFailure::Fatal(err)),
            Err(err) => {
                return Err(ProgramFailure::Recoverable {
                    detail: err.to_string(),
                    timing: failed_timing(program),
                });
            }
        };
        artifact.tag(tags::CHAINED);

        let settings = ValidationSettings {
            step_kind: ValidationStepKind::ChainedExecution,
            network_allowed: self.config.allow_requests
                || step_request.context.flag("allow_requests"),
            empty_output_ok_with_files: true,
            env: sandbox_env(&step_request.context, &tool_api_base),
        };
        let validation = ValidationLoop {
            safety: self.safety,
            driver: self.driver,
            sandbox: self.sandbox,
            learning: self.learning,
        };

        let outcome = match validation
            .run(artifact, step_request, &settings, steps, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(
                err @ (ExecutorError::Cancelled(_)
                | ExecutorError::SandboxUnavailable(_)
                | ExecutorError::BlockedBySafety(_)
                | ExecutorError::SafetyInfrastructureUnavailable(_)),
            ) => return Err(ProgramFailure::Fatal(err)),
            Err(err) => {
                return Err(ProgramFailure::Recoverable {
                    detail: err.to_string(),
                    timing: failed_timing(program),
                });
            }
        };

        let mut artifact = outcome.artifact;
        artifact.tag(tags::VALIDATED);

        let filename = format!("prog{}.{}", index + 1, extension_for(&program.language));
        if let Err(err) = self
            .sink
            .store_source(&filename, &artifact.code, workflow_id, &program.name)
            .await
        {
            warn!(filename = %filename, error = %err, "program source store failed");
        }
        if let Err(err) = self.sink.store_artifact(&artifact).await {
            warn!(error = %err, "chained artifact store failed");
        }

        let extracted = timing::extract_timing(&outcome.run.stdout);
        let timing = ProgramTiming {
            program_name: program.name.clone(),
            language: program.language.clone(),
            algorithm: extracted,
            total: outcome.run.duration,
            using_extracted_time: extracted.is_some(),
            success: true,
        };

        Ok((artifact, outcome.run.stdout, timing))
    }
}

enum ProgramFailure {
    /// Abort the whole chain (cancellation, safety, sandbox outage).
    Fatal(ExecutorError),
    /// Record and continue with the next program.
    Recoverable {
        detail: String,
        timing: ProgramTiming,
    },
}

fn failed_timing(program: &ChainedProgram) -> ProgramTiming {
    ProgramTiming {
        program_name: program.name.clone(),
        language: program.language.clone(),
        algorithm: None,
        total: std::time::Duration::ZERO,
        using_extracted_time: false,
        success: false,
    }
}

/// The request one program of the chain runs under: its own description and
/// language, the parent context merged with the program's own, and the
/// previous program's output injected both ways.
fn program_request(
    base: &ExecutionRequest,
    program: &ChainedProgram,
    previous_output: Option<&str>,
) -> ExecutionRequest {
    let mut context = base.context.clone();
    for (key, value) in program.context.iter() {
        context.set(key.clone(), value.clone());
    }

    let mut description = program.description.clone();
    if let Some(previous) = previous_output {
        context.set("previous_output", previous);
        description.push_str("\n\nOutput of the previous program:\n");
        description.push_str(previous);
    }

    let mut request = base.clone();
    request.description = description;
    request.language = Some(program.language.clone());
    request.context = context;
    request
}

/// What the next program receives: raw output for comparisons (timing lines
/// must survive), extracted JSON for data-flow chains.
fn handoff_output(stdout: &str, comparison: bool) -> String {
    if comparison {
        return stdout.to_string();
    }
    report::extract_json_output(stdout).unwrap_or_else(|| stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;

    #[test]
    fn previous_output_is_injected_into_context_and_description() {
        let base = ExecutionRequest::new("pair", "two programs");
        let program = ChainedProgram {
            name: "prog2".to_string(),
            language: "go".to_string(),
            description: "double the number".to_string(),
            context: TaskContext::new(),
        };
        let request = program_request(&base, &program, Some("{\"number\":7}"));
        assert_eq!(request.context.get("previous_output"), Some("{\"number\":7}"));
        assert!(request.description.contains("{\"number\":7}"));
        assert_eq!(request.language.as_deref(), Some("go"));
    }

    #[test]
    fn data_flow_handoff_extracts_json() {
        let stdout = "QUIET=1\n{\"number\": 7}\n";
        assert_eq!(handoff_output(stdout, false), "{\"number\":7}");
        assert_eq!(handoff_output(stdout, true), stdout);
    }

    #[test]
    fn non_json_handoff_passes_trimmed_text() {
        assert_eq!(handoff_output("  14 \n", false), "14");
    }
}
