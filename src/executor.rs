//! The execution orchestrator: the single entry point that routes a request
//! through safety gating, strategy selection, caching, generation,
//! validation, and the post-success side effects.
//!
//! The executor owns handles to its external collaborators and threads them
//! explicitly into each component; the only shared mutable state is the
//! loop-protector map. Requests are handled by one logical worker each and
//! the executor itself is reentrant.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactSink;
use crate::cache;
use crate::chained::ChainedEngine;
use crate::codegen::{infer_language, relevant_tools, GenerationDriver, PromptEnrichment};
use crate::config::constants::GENERATION_TIMEOUT;
use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::interfaces::{
    CodeStorage, FileStorage, LanguageModel, LearningKv, Planner, PolicyOracle, SandboxExecutor,
    SandboxOutcome, SandboxRequest, SelfModelStore, ToolRegistry,
};
use crate::learning::LearningStore;
use crate::loop_protector::{LoopProtector, LoopVerdict};
use crate::promoter::ToolPromoter;
use crate::router::{Complexity, Route, RouteClassifier};
use crate::safety::SafetyGate;
use crate::tools::{aggregate_urls, tool_params};
use crate::types::{
    next_workflow_id, tags, ExecutionRequest, ExecutionResult, GeneratedArtifact, ProgramTiming,
    ResultValue, ValidationStep, ValidationStepKind,
};
use crate::validate::{sandbox_env, ValidationLoop, ValidationSettings};

/// The external services an executor is wired to.
pub struct Collaborators {
    pub llm: Arc<dyn LanguageModel>,
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub tools: Arc<dyn ToolRegistry>,
    pub oracle: Arc<dyn PolicyOracle>,
    pub code_storage: Arc<dyn CodeStorage>,
    pub file_storage: Arc<dyn FileStorage>,
    pub self_model: Arc<dyn SelfModelStore>,
    pub learning_kv: Arc<dyn LearningKv>,
    pub planner: Option<Arc<dyn Planner>>,
}

pub struct IntelligentExecutor {
    config: ExecutorConfig,
    llm: Arc<dyn LanguageModel>,
    sandbox: Arc<dyn SandboxExecutor>,
    tools: Arc<dyn ToolRegistry>,
    code_storage: Arc<dyn CodeStorage>,
    self_model: Arc<dyn SelfModelStore>,
    planner: Option<Arc<dyn Planner>>,
    safety: SafetyGate,
    driver: GenerationDriver,
    router: RouteClassifier,
    learning: LearningStore,
    sink: ArtifactSink,
    promoter: ToolPromoter,
    loop_protector: LoopProtector,
}

/// What a successful route hands back for result assembly.
struct RoutePayload {
    result: ResultValue,
    artifact: Option<GeneratedArtifact>,
    retry_count: u32,
    used_cached_code: bool,
    dynamic_action: Option<String>,
    timings: Vec<ProgramTiming>,
}

impl RoutePayload {
    fn text(text: impl Into<String>) -> Self {
        Self {
            result: ResultValue::Text(text.into()),
            artifact: None,
            retry_count: 0,
            used_cached_code: false,
            dynamic_action: None,
            timings: Vec::new(),
        }
    }
}

impl IntelligentExecutor {
    pub fn new(config: ExecutorConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            llm,
            sandbox,
            tools,
            oracle,
            code_storage,
            file_storage,
            self_model,
            learning_kv,
            planner,
        } = collaborators;

        Self {
            safety: SafetyGate::new(llm.clone(), oracle),
            driver: GenerationDriver::new(llm.clone()),
            router: RouteClassifier::new(llm.clone()),
            learning: LearningStore::new(learning_kv),
            sink: ArtifactSink::new(code_storage.clone(), file_storage),
            promoter: ToolPromoter::new(llm.clone(), tools.clone()),
            loop_protector: LoopProtector::new(),
            config,
            llm,
            sandbox,
            tools,
            code_storage,
            self_model,
            planner,
        }
    }

    /// Execute one request to completion. All failures are folded into the
    /// returned [`ExecutionResult`]; validation steps accumulated before a
    /// failure are preserved on it.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let workflow_id = next_workflow_id();
        let mut steps: Vec<ValidationStep> = Vec::new();
        info!(task = %request.task_name, workflow = %workflow_id, "execution started");

        let outcome = self
            .execute_inner(&request, &workflow_id, &mut steps, &cancel)
            .await;

        match outcome {
            Ok(payload) => {
                info!(workflow = %workflow_id, retries = payload.retry_count, "execution succeeded");
                ExecutionResult {
                    success: true,
                    result: Some(payload.result),
                    error: None,
                    artifact: payload.artifact,
                    elapsed: started.elapsed(),
                    retry_count: payload.retry_count,
                    used_cached_code: payload.used_cached_code,
                    validation_steps: steps,
                    dynamic_action: payload.dynamic_action,
                    program_timings: payload.timings,
                    workflow_id,
                }
            }
            Err(err) => {
                if err.is_safety_block()
                    && !steps
                        .iter()
                        .any(|s| s.kind == ValidationStepKind::StaticSafetyCheck)
                {
                    steps.push(ValidationStep::new(
                        ValidationStepKind::StaticSafetyCheck,
                        false,
                        err.to_string(),
                    ));
                }
                let retry_count = steps
                    .iter()
                    .filter(|s| {
                        matches!(
                            s.kind,
                            ValidationStepKind::DockerExecution
                                | ValidationStepKind::ChainedExecution
                        )
                    })
                    .count() as u32;
                warn!(workflow = %workflow_id, error = %err, "execution failed");
                ExecutionResult {
                    success: false,
                    result: None,
                    error: Some(err),
                    artifact: None,
                    elapsed: started.elapsed(),
                    retry_count,
                    used_cached_code: false,
                    validation_steps: steps,
                    dynamic_action: None,
                    program_timings: Vec::new(),
                    workflow_id,
                }
            }
        }
    }

    async fn execute_inner(
        &self,
        request: &ExecutionRequest,
        workflow_id: &str,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<RoutePayload, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled("cancelled on entry".to_string()));
        }

        // The static layer and the route table are model-free; the
        // model-assisted policy layer runs per route, after loop protection
        // on the codegen path, so suppressed duplicates cost no model calls.
        self.safety.check_request_static(
            &request.task_name,
            &request.description,
            &request.context,
        )?;

        let route = self.router.decide(request);

        match route {
            Route::DirectSummarization => {
                self.policy_gate(request, cancel).await?;
                self.summarize(request, steps, cancel).await
            }
            Route::HypothesisTesting => {
                let rewritten = rewrite_hypothesis(request);
                if let Err(err) = self.self_model.add_goal(&rewritten.description).await {
                    debug!(error = %err, "goal record failed");
                }
                self.codegen_path(&rewritten, workflow_id, steps, true, cancel)
                    .await
            }
            Route::ExplicitTool { tool_id } => {
                self.policy_gate(request, cancel).await?;
                self.invoke_tool(&tool_id, request, steps).await
            }
            Route::SimpleInformational => {
                self.policy_gate(request, cancel).await?;
                steps.push(ValidationStep::new(
                    ValidationStepKind::DirectExecution,
                    true,
                    "informational request acknowledged without generation",
                ));
                Ok(RoutePayload::text(format!(
                    "Acknowledged: {}",
                    request.description.trim()
                )))
            }
            Route::WebAggregation { urls } => {
                self.policy_gate(request, cancel).await?;
                let summary = aggregate_urls(&self.tools, &urls, cancel).await;
                steps.push(
                    ValidationStep::new(
                        ValidationStepKind::DirectExecution,
                        true,
                        format!("aggregated {} url(s)", urls.len()),
                    )
                    .with_stdout(summary.clone()),
                );
                Ok(RoutePayload::text(summary))
            }
            Route::Chained => {
                self.policy_gate(request, cancel).await?;
                let engine = ChainedEngine {
                    llm: &self.llm,
                    driver: &self.driver,
                    safety: &self.safety,
                    sandbox: &self.sandbox,
                    learning: &self.learning,
                    sink: &self.sink,
                    config: &self.config,
                };
                let outcome = engine.run(request, workflow_id, steps, cancel).await?;
                steps.push(
                    ValidationStep::new(
                        ValidationStepKind::ChainedExecution,
                        true,
                        format!(
                            "chain completed: {} program(s), {} succeeded",
                            outcome.timings.len(),
                            outcome.timings.iter().filter(|t| t.success).count()
                        ),
                    )
                    .with_stdout(outcome.result.as_text()),
                );
                Ok(RoutePayload {
                    result: outcome.result,
                    artifact: outcome.last_artifact,
                    retry_count: steps
                        .iter()
                        .filter(|s| s.kind == ValidationStepKind::ChainedExecution)
                        .count() as u32,
                    used_cached_code: false,
                    dynamic_action: None,
                    timings: outcome.timings,
                })
            }
            Route::Traditional => {
                self.codegen_path(request, workflow_id, steps, false, cancel)
                    .await
            }
        }
    }

    async fn policy_gate(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        self.safety
            .check_request_policy(
                &request.task_name,
                &request.description,
                request.priority,
                cancel,
            )
            .await
    }

    /// Direct-model summarization for self-model analysis tasks.
    async fn summarize(
        &self,
        request: &ExecutionRequest,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<RoutePayload, ExecutorError> {
        let state = self.self_model.load().await.unwrap_or_else(|err| {
            warn!(error = %err, "self-model load failed; summarizing without state");
            json!({})
        });
        let prompt = format!(
            "Summarize the following state for the task '{}'. Respond with one \
             paragraph of at most 80 words, then exactly 3 bullet points, then \
             exactly 3 open questions.\n\nDescription: {}\n\nState:\n{}",
            request.task_name, request.description, state
        );
        let response = tokio::time::timeout(
            GENERATION_TIMEOUT,
            self.llm.complete(&prompt, request.priority, cancel),
        )
        .await
        .map_err(|_| ExecutorError::CodeGenerationFailure("summarization timed out".to_string()))?
        .map_err(|err| ExecutorError::CodeGenerationFailure(err.to_string()))?;

        if let Err(err) = self
            .self_model
            .update_belief(
                &request.task_name,
                &json!({ "summary": response, "description": request.description }),
            )
            .await
        {
            debug!(error = %err, "belief update failed");
        }

        steps.push(
            ValidationStep::new(
                ValidationStepKind::DirectExecution,
                true,
                "summarization answered directly by the model",
            )
            .with_stdout(response.clone()),
        );
        Ok(RoutePayload::text(response))
    }

    /// Explicit-tool short circuit: no generation, the tool's JSON response
    /// is the result.
    async fn invoke_tool(
        &self,
        tool_id: &str,
        request: &ExecutionRequest,
        steps: &mut Vec<ValidationStep>,
    ) -> Result<RoutePayload, ExecutorError> {
        let params = tool_params(tool_id, request);
        debug!(tool = tool_id, %params, "explicit tool invocation");
        let response = self
            .tools
            .invoke(tool_id, &params)
            .await
            .map_err(|err| ExecutorError::ValidationFailure(err.to_string()))?;

        steps.push(
            ValidationStep::new(
                ValidationStepKind::DirectExecution,
                response.success,
                format!("tool {} invoked", tool_id),
            )
            .with_stdout(response.output.to_string())
            .with_error(response.error.clone().unwrap_or_default()),
        );

        if !response.success {
            return Err(ExecutorError::ValidationFailure(
                response
                    .error
                    .unwrap_or_else(|| format!("tool {} reported failure", tool_id)),
            ));
        }

        Ok(RoutePayload {
            result: ResultValue::Json(serde_json::to_value(&response).unwrap_or(json!(null))),
            artifact: None,
            retry_count: 0,
            used_cached_code: false,
            dynamic_action: None,
            timings: Vec::new(),
        })
    }

    async fn delegate_to_planner(
        &self,
        request: &ExecutionRequest,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RoutePayload, ExecutorError> {
        let planner = self
            .planner
            .as_ref()
            .ok_or_else(|| ExecutorError::ValidationFailure("no planner wired".to_string()))?;
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(
                "cancelled before planner delegation".to_string(),
            ));
        }
        let episode = planner
            .plan_and_execute(
                &request.task_name,
                &request.description,
                &request.context,
                workflow_id,
            )
            .await
            .map_err(|err| ExecutorError::ValidationFailure(err.to_string()))?;
        Ok(RoutePayload {
            result: ResultValue::Json(episode),
            artifact: None,
            retry_count: 0,
            used_cached_code: false,
            dynamic_action: None,
            timings: Vec::new(),
        })
    }

    /// The traditional single-program path: loop protection, the policy
    /// safety layer, optional planner escalation, cache lookup, generation,
    /// validation, and the post-success side effects.
    async fn codegen_path(
        &self,
        request: &ExecutionRequest,
        workflow_id: &str,
        steps: &mut Vec<ValidationStep>,
        network_allowed_by_route: bool,
        cancel: &CancellationToken,
    ) -> Result<RoutePayload, ExecutorError> {
        match self.loop_protector.check(
            &request.task_name,
            &request.description,
            request.wants_regeneration(),
        ) {
            LoopVerdict::Proceed => {}
            LoopVerdict::DuplicateWithinWindow { elapsed } => {
                return Err(ExecutorError::LoopDetected(format!(
                    "identical invocation {}ms ago",
                    elapsed.as_millis()
                )));
            }
            LoopVerdict::TrivialRepetition { pattern } => {
                return Err(ExecutorError::LoopDetected(format!(
                    "trivial task '{}' repeated within a minute",
                    pattern
                )));
            }
        }

        self.policy_gate(request, cancel).await?;

        // Planner escalation: only for plainly non-simple tasks, and only
        // when the complexity classifier clearly says so. A failed planner
        // episode falls back to local generation.
        if self.planner.is_some()
            && self.config.planner_enabled
            && !request.context.flag("prefer_traditional")
            && !self.router.matches_simple_pattern(&request.description)
            && self.router.classify_complexity(request, cancel).await == Complexity::Complex
        {
            match self.delegate_to_planner(request, workflow_id, cancel).await {
                Ok(payload) => {
                    steps.push(ValidationStep::new(
                        ValidationStepKind::DirectExecution,
                        true,
                        "planner episode completed",
                    ));
                    return Ok(payload);
                }
                Err(err) => {
                    warn!(error = %err, "planner delegation failed; generating locally");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(
                "cancelled before cache lookup".to_string(),
            ));
        }

        let network_allowed = network_allowed_by_route
            || self.config.allow_requests
            || request.context.flag("allow_requests");
        let tool_api_base = self.config.tool_api_base_for_sandbox();
        let settings = ValidationSettings {
            step_kind: ValidationStepKind::DockerExecution,
            network_allowed,
            empty_output_ok_with_files: false,
            env: sandbox_env(&request.context, &tool_api_base),
        };
        let validation = ValidationLoop {
            safety: &self.safety,
            driver: &self.driver,
            sandbox: &self.sandbox,
            learning: &self.learning,
        };

        if !request.wants_regeneration() {
            match cache::find_compatible(&self.code_storage, request).await {
                Ok(Some((artifact, verdict))) => {
                    info!(
                        artifact = %artifact.id,
                        status = ?verdict.status,
                        "re-validating cached artifact"
                    );
                    match validation
                        .run(artifact, request, &settings, steps, cancel)
                        .await
                    {
                        Ok(outcome) => {
                            return self
                                .finish_success(request, workflow_id, outcome, true, steps, cancel)
                                .await;
                        }
                        Err(
                            err @ (ExecutorError::Cancelled(_)
                            | ExecutorError::SandboxUnavailable(_)
                            | ExecutorError::BlockedBySafety(_)
                            | ExecutorError::SafetyInfrastructureUnavailable(_)),
                        ) => return Err(err),
                        Err(err) => {
                            // A stale cache entry is not fatal; generate fresh.
                            warn!(error = %err, "cached artifact failed re-validation");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "cache lookup failed"),
            }
        }

        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(
                "cancelled before generation".to_string(),
            ));
        }

        let language = infer_language(request);
        let hints = self
            .learning
            .prevention_hints(&language)
            .await
            .unwrap_or_default();
        let strategies = self
            .learning
            .proven_strategies(&language)
            .await
            .unwrap_or_default();
        let catalog = match self.tools.list().await {
            Ok(catalog) => relevant_tools(&catalog, &request.description),
            Err(err) => {
                debug!(error = %err, "tool catalog unavailable for prompting");
                Vec::new()
            }
        };
        let enrichment = PromptEnrichment {
            tools: &catalog,
            tool_api_base: &tool_api_base,
            hints: &hints,
            strategies: &strategies,
        };

        let artifact = self
            .driver
            .generate(request, &language, &enrichment, cancel)
            .await?;

        match validation
            .run(artifact, request, &settings, steps, cancel)
            .await
        {
            Ok(outcome) => {
                self.finish_success(request, workflow_id, outcome, false, steps, cancel)
                    .await
            }
            Err(err) => {
                if let Err(learn_err) = self
                    .learning
                    .record_strategy(
                        &request.description,
                        &language,
                        false,
                        request.max_retries.max(1),
                    )
                    .await
                {
                    warn!(error = %learn_err, "strategy update failed");
                }
                Err(err)
            }
        }
    }

    /// Post-validation side effects: the production run with artifact
    /// extraction, persistence, learning, promotion, and the episode record.
    async fn finish_success(
        &self,
        request: &ExecutionRequest,
        workflow_id: &str,
        outcome: crate::validate::ValidationOutcome,
        used_cached_code: bool,
        steps: &mut Vec<ValidationStep>,
        cancel: &CancellationToken,
    ) -> Result<RoutePayload, ExecutorError> {
        let mut artifact = outcome.artifact;
        artifact.tag(tags::VALIDATED);

        // Production run: a different route than validation may apply, and
        // declared artifact files are extracted here. Best-effort; the
        // validated result stands even if this run fails.
        let tool_api_base = self.config.tool_api_base_for_sandbox();
        let production = SandboxRequest {
            language: artifact.language.clone(),
            code: artifact.code.clone(),
            stdin: None,
            env: sandbox_env(&request.context, &tool_api_base),
            timeout: request.timeout,
            is_validation: false,
        };
        let mut result_stdout = outcome.run.stdout.clone();
        match self.sandbox.execute(production, cancel).await {
            Ok(SandboxOutcome {
                success: true,
                stdout,
                files,
                duration,
                ..
            }) => {
                let stored = self
                    .sink
                    .store_extracted_files(
                        &files,
                        &request.context.artifact_names(),
                        workflow_id,
                        "production",
                    )
                    .await;
                steps.push(
                    ValidationStep::new(
                        ValidationStepKind::DirectExecution,
                        true,
                        format!("production run completed; {} file(s) stored", stored),
                    )
                    .with_duration(duration)
                    .with_stdout(stdout.clone()),
                );
                if !stdout.trim().is_empty() {
                    result_stdout = stdout;
                }
            }
            Ok(run) => {
                warn!(exit_code = run.exit_code, "production run failed; keeping validated output");
            }
            Err(err) => {
                warn!(error = %err, "production run unavailable; keeping validated output");
            }
        }

        if !used_cached_code {
            if let Err(err) = self.sink.store_artifact(&artifact).await {
                warn!(error = %err, "artifact store failed");
            }
        }

        if let Err(err) = self
            .learning
            .record_strategy(
                &request.description,
                &artifact.language,
                true,
                outcome.attempts,
            )
            .await
        {
            warn!(error = %err, "strategy update failed");
        }

        let dynamic_action = if used_cached_code {
            None
        } else {
            self.promoter.maybe_promote(request, &artifact, cancel).await
        };
        if let (Some(tool_id), Some(planner)) = (&dynamic_action, &self.planner) {
            let capability = json!({
                "id": tool_id,
                "task_name": request.task_name,
                "description": request.description,
                "language": artifact.language,
            });
            if let Err(err) = planner.register_capability(&capability).await {
                debug!(error = %err, "capability registration with planner failed");
            }
        }

        let episode = json!({
            "task_name": request.task_name,
            "workflow_id": workflow_id,
            "language": artifact.language,
            "retries": outcome.attempts,
            "used_cached_code": used_cached_code,
        });
        if let Err(err) = self.self_model.record_episode(&episode).await {
            debug!(error = %err, "episode record failed");
        }

        Ok(RoutePayload {
            result: ResultValue::Text(result_stdout.trim().to_string()),
            artifact: Some(artifact),
            retry_count: outcome.attempts,
            used_cached_code,
            dynamic_action,
            timings: Vec::new(),
        })
    }
}

/// Rewrite a "test hypothesis:" request into an evidence-gathering
/// specification that may call the knowledge-graph query tool and must
/// produce a report artifact.
fn rewrite_hypothesis(request: &ExecutionRequest) -> ExecutionRequest {
    let hypothesis = request
        .description
        .trim()
        .get("test hypothesis:".len()..)
        .unwrap_or("")
        .trim()
        .to_string();

    let mut context = request.context.clone();
    context.set("allow_requests", "true");
    let mut names = context.artifact_names();
    if !names.iter().any(|n| n == "hypothesis_test_report.md") {
        names.push("hypothesis_test_report.md".to_string());
    }
    context.set("artifact_names", names.join(","));

    let mut rewritten = request.clone();
    rewritten.description = format!(
        "Generate a program that tests this hypothesis: {}. Gather supporting and \
         contradicting evidence by querying the knowledge graph through the \
         tool_knowledge_query HTTP endpoint, evaluate the evidence, and write a \
         markdown report of the findings to hypothesis_test_report.md. Print a \
         one-line verdict to stdout.",
        hypothesis
    );
    rewritten.context = context;
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;

    #[test]
    fn hypothesis_rewrite_sets_flags_and_artifacts() {
        let request = ExecutionRequest::new(
            "hyp",
            "Test hypothesis: caching reduces latency",
        );
        let rewritten = rewrite_hypothesis(&request);
        assert!(rewritten.context.flag("allow_requests"));
        assert!(rewritten
            .context
            .artifact_names()
            .contains(&"hypothesis_test_report.md".to_string()));
        assert!(rewritten.description.contains("caching reduces latency"));
        assert!(rewritten.description.contains("tool_knowledge_query"));
    }

    #[test]
    fn hypothesis_rewrite_preserves_existing_artifacts() {
        let request = ExecutionRequest::new("hyp", "test hypothesis: x")
            .with_context(TaskContext::from([("artifact_names", "evidence.json")]));
        let rewritten = rewrite_hypothesis(&request);
        let names = rewritten.context.artifact_names();
        assert!(names.contains(&"evidence.json".to_string()));
        assert!(names.contains(&"hypothesis_test_report.md".to_string()));
    }
}
