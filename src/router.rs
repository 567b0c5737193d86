//! Route classification: decides which of the execution strategies handles
//! a request.
//!
//! The route table itself is deterministic and model-free, so duplicate
//! suppression and safety gating can run before any model traffic. Only the
//! planner escalation consults the model (see [`RouteClassifier::classify_complexity`]),
//! and that call defaults to "simple" on any failure so an unreachable model
//! can never escalate a request out of the traditional path.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::constants::{tools, CLASSIFICATION_TIMEOUT, INFORMATIONAL_MAX_CHARS};
use crate::context::extract_urls;
use crate::interfaces::LanguageModel;
use crate::lang::{detect_language, detect_languages, language_for_filename};
use crate::types::ExecutionRequest;

/// The execution strategy selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Self-model summarization answered directly by the model.
    DirectSummarization,
    /// Evidence-gathering codegen for a "test hypothesis:" request.
    HypothesisTesting,
    /// A recognized tool identifier short-circuits generation entirely.
    ExplicitTool { tool_id: String },
    /// Short, verb-free informational text; acknowledged without generation.
    SimpleInformational,
    /// Fetch-and-summarize over the request's URL list.
    WebAggregation { urls: Vec<String> },
    /// Multi-program chained execution.
    Chained,
    /// Single-program generate/validate flow, with optional planner
    /// escalation decided later by the complexity classifier.
    Traditional,
}

/// Verdict of the planner-escalation classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

static ACTION_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(create|write|generate|build|implement|calculate|process|analyze|fetch|get)\b",
    )
    .unwrap()
});

static CODE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(matrix|math|code|program|algorithm|function|script|equation)\b").unwrap()
});

static FETCH_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(fetch|scrape|crawl|download)\b").unwrap());

/// Descriptions matching these never escalate to the planner.
const SIMPLE_TASK_MARKERS: &[&str] = &[
    "hello world",
    "fibonacci",
    "print",
    "factorial",
    "reverse a string",
];

pub struct RouteClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl RouteClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Run the deterministic decision procedure. First match wins.
    pub fn decide(&self, request: &ExecutionRequest) -> Route {
        let route = decide_route(request);
        debug!(task = %request.task_name, ?route, "route selected");
        route
    }

    /// Whether the description matches a hardcoded always-simple pattern.
    pub fn matches_simple_pattern(&self, description: &str) -> bool {
        let lowered = description.to_lowercase();
        SIMPLE_TASK_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    /// Binary complexity classification with a strict "simple" default: the
    /// planner is only engaged when the model clearly says "complex".
    pub async fn classify_complexity(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Complexity {
        let prompt = format!(
            "Classify this task's complexity. Answer with exactly one word, \
             'simple' or 'complex'. A task is complex only if it needs multiple \
             coordinated steps or external planning.\n\nTask: {}",
            request.description
        );
        let answer = tokio::time::timeout(
            CLASSIFICATION_TIMEOUT,
            self.llm.complete(&prompt, request.priority, cancel),
        )
        .await;
        match answer {
            Ok(Ok(text)) if text.trim().to_lowercase().contains("complex") => Complexity::Complex,
            _ => Complexity::Simple,
        }
    }
}

fn decide_route(request: &ExecutionRequest) -> Route {
    let description = request.description.trim();
    let lowered = description.to_lowercase();

    if request.task_name == "analyze_bootstrap" || request.task_name == "analyze_belief" {
        return Route::DirectSummarization;
    }

    if lowered.starts_with("test hypothesis:") {
        return Route::HypothesisTesting;
    }

    if let Some(tool_id) = tools::SHORT_CIRCUIT
        .iter()
        .find(|id| lowered.contains(**id))
    {
        return Route::ExplicitTool {
            tool_id: tool_id.to_string(),
        };
    }

    if is_simple_informational(request, description) {
        return Route::SimpleInformational;
    }

    let urls = gather_urls(request);
    if !urls.is_empty()
        && (FETCH_MARKERS.is_match(description)
            || !request.context.urls().is_empty()
            || request.context.flag("prefer_tools"))
    {
        return Route::WebAggregation { urls };
    }

    if is_chained(request, &lowered) {
        return Route::Chained;
    }

    Route::Traditional
}

fn is_simple_informational(request: &ExecutionRequest, description: &str) -> bool {
    description.len() < INFORMATIONAL_MAX_CHARS
        && !ACTION_VERBS.is_match(description)
        && !CODE_MARKERS.is_match(description)
        && request.language.is_none()
        && detect_language(description).is_none()
        && gather_urls(request).is_empty()
}

/// Chained-request detection: explicit multi-program phrasing, a language
/// pair joined by "then", or at least two program files in `artifact_names`.
fn is_chained(request: &ExecutionRequest, lowered: &str) -> bool {
    if lowered.contains("two programs")
        || lowered.contains("first program")
        || lowered.contains("second program")
        || lowered.contains("prog1")
        || lowered.contains("prog2")
    {
        return true;
    }
    if lowered.contains(" then ") && detect_languages(lowered).len() >= 2 {
        return true;
    }
    let program_files = request
        .context
        .artifact_names()
        .iter()
        .filter(|name| language_for_filename(name).is_some())
        .count();
    program_files >= 2
}

fn gather_urls(request: &ExecutionRequest) -> Vec<String> {
    let mut urls = request.context.urls();
    for url in extract_urls(&request.description) {
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::types::Priority;
    use async_trait::async_trait;

    struct ScriptedLlm(&'static str);

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _priority: Priority,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn classifier(answer: &'static str) -> RouteClassifier {
        RouteClassifier::new(Arc::new(ScriptedLlm(answer)))
    }

    #[test]
    fn bootstrap_analysis_goes_direct() {
        let request = ExecutionRequest::new("analyze_bootstrap", "summarize startup state");
        assert_eq!(classifier("").decide(&request), Route::DirectSummarization);
    }

    #[test]
    fn hypothesis_prefix_is_detected_case_insensitively() {
        let request = ExecutionRequest::new("hyp", "Test Hypothesis: caching improves latency");
        assert_eq!(classifier("").decide(&request), Route::HypothesisTesting);
    }

    #[test]
    fn explicit_tool_identifier_short_circuits() {
        let request = ExecutionRequest::new("fetch", "use tool_http_get on the status endpoint");
        assert_eq!(
            classifier("").decide(&request),
            Route::ExplicitTool {
                tool_id: "tool_http_get".to_string()
            }
        );
    }

    #[test]
    fn short_verbless_description_is_informational() {
        let request = ExecutionRequest::new("note", "the deployment finished last night");
        assert_eq!(classifier("").decide(&request), Route::SimpleInformational);
    }

    #[test]
    fn url_in_context_routes_to_aggregation() {
        let request = ExecutionRequest::new("collect", "summarize these pages please")
            .with_context(TaskContext::from([("url", "https://example.com/a")]));
        match classifier("").decide(&request) {
            Route::WebAggregation { urls } => {
                assert_eq!(urls, vec!["https://example.com/a"]);
            }
            other => panic!("expected web aggregation, got {:?}", other),
        }
    }

    #[test]
    fn language_pair_with_then_is_chained() {
        let request = ExecutionRequest::new(
            "compare",
            "Create a bubble sort program in Go then the same program in Python",
        );
        assert_eq!(classifier("").decide(&request), Route::Chained);
    }

    #[test]
    fn two_program_artifacts_are_chained() {
        let request = ExecutionRequest::new("pair", "run the generated pair of programs now")
            .with_context(TaskContext::from([("artifact_names", "prog1.go,prog2.py")]));
        assert_eq!(classifier("").decide(&request), Route::Chained);
    }

    #[test]
    fn codegen_fallthrough_is_traditional() {
        let request =
            ExecutionRequest::new("CalculatePrimes", "calculate the first ten prime numbers");
        assert_eq!(classifier("").decide(&request), Route::Traditional);
    }

    #[test]
    fn simple_patterns_are_recognized() {
        let router = classifier("");
        assert!(router.matches_simple_pattern("print hello world in a program"));
        assert!(router.matches_simple_pattern("compute the fibonacci sequence"));
        assert!(!router.matches_simple_pattern("restructure the ingestion service"));
    }

    #[tokio::test]
    async fn complexity_defaults_to_simple_on_vague_answers() {
        let request = ExecutionRequest::new("t", "do the thing");
        let token = CancellationToken::new();
        assert_eq!(
            classifier("complex").classify_complexity(&request, &token).await,
            Complexity::Complex
        );
        assert_eq!(
            classifier("hard to say").classify_complexity(&request, &token).await,
            Complexity::Simple
        );
    }
}
