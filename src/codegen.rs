//! Code generation driver: prompt assembly, model invocation, and code
//! extraction, plus the repair prompts used by the validation loop.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::constants::GENERATION_TIMEOUT;
use crate::error::ExecutorError;
use crate::interfaces::{LanguageModel, ToolDescriptor};
use crate::lang::detect_language;
use crate::learning::CodegenStrategy;
use crate::types::{ExecutionRequest, GeneratedArtifact};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([a-zA-Z0-9+#]*)\n(.*?)```").unwrap());

static MATRIX_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(matrix|matrices|per[- ]row)\b").unwrap());

static PARAMETER_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(parameter|from the context|environment variable|env var)\b").unwrap()
});

/// Everything the driver folds into a generation prompt besides the request.
pub struct PromptEnrichment<'a> {
    /// Tool catalog already filtered to the request (may be empty).
    pub tools: &'a [ToolDescriptor],
    /// Tool API base as the sandboxed program will reach it.
    pub tool_api_base: &'a str,
    /// Learned prevention hints (frequency-gated by the learning store).
    pub hints: &'a [String],
    /// Prior strategies worth imitating (success-gated by the learning store).
    pub strategies: &'a [CodegenStrategy],
}

pub struct GenerationDriver {
    llm: Arc<dyn LanguageModel>,
}

impl GenerationDriver {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Generate a fresh artifact for the request.
    pub async fn generate(
        &self,
        request: &ExecutionRequest,
        language: &str,
        enrichment: &PromptEnrichment<'_>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedArtifact, ExecutorError> {
        let prompt = build_generation_prompt(request, language, enrichment);
        debug!(language, task = %request.task_name, "requesting code generation");
        let response = self.call_model(&prompt, request, cancel).await?;
        let code = extract_code(&response, language).ok_or_else(|| {
            ExecutorError::CodeGenerationFailure(
                "model response contained no usable code".to_string(),
            )
        })?;
        Ok(GeneratedArtifact::new(
            request.task_name.clone(),
            request.description.clone(),
            language,
            code,
            request.context.clone(),
        ))
    }

    /// Produce a repaired artifact from a failed validation attempt.
    pub async fn repair(
        &self,
        artifact: &GeneratedArtifact,
        request: &ExecutionRequest,
        last_error: &str,
        last_output: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedArtifact, ExecutorError> {
        let prompt = build_repair_prompt(artifact, request, last_error, last_output);
        debug!(language = %artifact.language, "requesting code repair");
        let response = self.call_model(&prompt, request, cancel).await?;
        let code = extract_code(&response, &artifact.language).ok_or_else(|| {
            ExecutorError::CodeGenerationFailure(
                "repair response contained no usable code".to_string(),
            )
        })?;
        Ok(artifact.repaired(code))
    }

    async fn call_model(
        &self,
        prompt: &str,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(
                "cancelled before generation".to_string(),
            ));
        }
        match tokio::time::timeout(
            GENERATION_TIMEOUT,
            self.llm.complete(prompt, request.priority, cancel),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(ExecutorError::CodeGenerationFailure(err.to_string())),
            Err(_) => Err(ExecutorError::CodeGenerationFailure(
                "generation model call timed out".to_string(),
            )),
        }
    }
}

/// Language for a request: explicit choice, then a mention in the
/// description, then the default generation language.
pub fn infer_language(request: &ExecutionRequest) -> String {
    if let Some(language) = &request.language {
        return language.to_lowercase();
    }
    detect_language(&request.description).unwrap_or_else(|| "python".to_string())
}

fn build_generation_prompt(
    request: &ExecutionRequest,
    language: &str,
    enrichment: &PromptEnrichment<'_>,
) -> String {
    let filtered = request.context.without_admin_keys();
    let mut sections = Vec::new();

    sections.push(format!(
        "Write a complete, runnable {} program for this task.\n\nTask: {}\nDescription: {}",
        language, request.task_name, request.description
    ));

    if !filtered.is_empty() {
        sections.push(format!(
            "Parameters are provided as environment variables:\n{}",
            filtered.render_for_prompt()
        ));
    }

    if let Some(guidance) = domain_guidance(&request.description) {
        sections.push(guidance);
    }

    if !enrichment.tools.is_empty() {
        let mut catalog = format!(
            "These HTTP tools are available at {} (POST /api/v1/tools/{{id}}/invoke with a JSON body):",
            enrichment.tool_api_base
        );
        for tool in enrichment.tools {
            catalog.push_str(&format!("\n- {}: {}", tool.id, tool.description));
        }
        sections.push(catalog);
    }

    if !enrichment.hints.is_empty() {
        sections.push(format!(
            "Avoid these previously observed failure modes:\n- {}",
            enrichment.hints.join("\n- ")
        ));
    }

    if !enrichment.strategies.is_empty() {
        let lines: Vec<String> = enrichment
            .strategies
            .iter()
            .map(|s| {
                format!(
                    "{} in {} (success rate {:.0}%)",
                    s.task_category,
                    s.language,
                    s.success_rate * 100.0
                )
            })
            .collect();
        sections.push(format!(
            "Approaches that worked before:\n- {}",
            lines.join("\n- ")
        ));
    }

    sections.push(format!(
        "Rules:\n{}\nRespond with a single fenced code block and nothing else.",
        language_rules(language)
    ));

    sections.join("\n\n")
}

fn build_repair_prompt(
    artifact: &GeneratedArtifact,
    request: &ExecutionRequest,
    last_error: &str,
    last_output: &str,
) -> String {
    let filtered = request.context.without_admin_keys();
    format!(
        "The following {} program failed. Fix it and return the complete corrected \
         program in a single fenced code block.\n\nProgram:\n```{}\n{}\n```\n\n\
         Error:\n{}\n\nOutput:\n{}\n\nContext:\n{}\n\nRules:\n{}",
        artifact.language,
        artifact.language,
        artifact.code,
        if last_error.is_empty() { "(none captured)" } else { last_error },
        if last_output.is_empty() { "(empty)" } else { last_output },
        filtered.render_for_prompt(),
        language_rules(&artifact.language),
    )
}

/// Extra instructions for descriptions that match known tricky domains.
fn domain_guidance(description: &str) -> Option<String> {
    let mut guidance = Vec::new();
    if MATRIX_MARKERS.is_match(description) {
        guidance.push(
            "Read the matrix from the MATRIX environment variable as JSON, \
             process it, and print one line of output per row.",
        );
    }
    if PARAMETER_MARKERS.is_match(description) {
        guidance.push(
            "Read every task parameter from its environment variable and parse \
             JSON values before use; never hardcode parameter values.",
        );
    }
    if guidance.is_empty() {
        None
    } else {
        Some(guidance.join("\n"))
    }
}

/// Per-language generation and repair rules.
fn language_rules(language: &str) -> &'static str {
    match language {
        "go" => {
            "- JSON numbers decode into float64; convert explicitly before using them as integers.\n\
             - Unused imports and unused variables are compile errors; import only what is referenced.\n\
             - json.Unmarshal returns only an error and fills the target through a pointer.\n\
             - Print results to stdout with the fmt package."
        }
        "python" => {
            "- Read parameters with os.environ.get and parse JSON with json.loads.\n\
             - Print the final result to stdout.\n\
             - Use only the standard library unless a tool endpoint is listed above."
        }
        "rust" => {
            "- Return Result from fallible helpers and propagate with ?.\n\
             - Read parameters with std::env::var and print results to stdout.\n\
             - Use only the standard library."
        }
        _ => {
            "- Read parameters from environment variables.\n\
             - Print the final result to stdout.\n\
             - Use only the standard library."
        }
    }
}

/// Filter the tool catalog to entries the description plausibly needs.
pub fn relevant_tools<'a>(
    catalog: &'a [ToolDescriptor],
    description: &str,
) -> Vec<ToolDescriptor> {
    let lowered = description.to_lowercase();
    catalog
        .iter()
        .filter(|tool| {
            lowered.contains(&tool.id.to_lowercase())
                || tool
                    .description
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|word| word.len() > 4)
                    .any(|word| lowered.contains(word))
        })
        .cloned()
        .collect()
}

/// Pull source code out of a model response: a fence tagged with the target
/// language wins, then any fence, then the raw response when it does not
/// look like prose.
pub fn extract_code(response: &str, language: &str) -> Option<String> {
    let mut fallback = None;
    for captures in FENCED_BLOCK.captures_iter(response) {
        let tag = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        if body.is_empty() {
            continue;
        }
        if tag.eq_ignore_ascii_case(language)
            || (tag.eq_ignore_ascii_case("golang") && language == "go")
            || (tag.eq_ignore_ascii_case("py") && language == "python")
        {
            return Some(body.to_string());
        }
        if fallback.is_none() {
            fallback = Some(body.to_string());
        }
    }
    if let Some(code) = fallback {
        return Some(code);
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Unfenced responses are accepted only when they resemble source text.
    let looks_like_code = trimmed.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("import ")
            || line.starts_with("package ")
            || line.starts_with("def ")
            || line.starts_with("fn ")
            || line.starts_with("func ")
            || line.starts_with("print(")
            || line.starts_with("#include")
            || line.starts_with("console.")
    });
    if looks_like_code {
        Some(trimmed.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use serde_json::json;

    #[test]
    fn tagged_fence_wins_over_untagged() {
        let response = "```\nnot it\n```\nand the real one:\n```python\nprint(42)\n```";
        assert_eq!(extract_code(response, "python").as_deref(), Some("print(42)"));
    }

    #[test]
    fn untagged_fence_is_the_fallback() {
        let response = "Here you go:\n```\nfmt.Println(1)\n```";
        assert_eq!(
            extract_code(response, "go").as_deref(),
            Some("fmt.Println(1)")
        );
    }

    #[test]
    fn raw_code_without_fences_is_accepted() {
        let response = "import json\nprint(json.dumps({'a': 1}))";
        assert!(extract_code(response, "python").is_some());
    }

    #[test]
    fn prose_without_code_is_rejected() {
        assert!(extract_code("I cannot write that program.", "python").is_none());
    }

    #[test]
    fn golang_tag_matches_go() {
        let response = "```golang\nfmt.Println(2)\n```";
        assert_eq!(
            extract_code(response, "go").as_deref(),
            Some("fmt.Println(2)")
        );
    }

    #[test]
    fn language_inference_prefers_explicit_choice() {
        let request = ExecutionRequest::new("t", "write a go program").with_language("Python");
        assert_eq!(infer_language(&request), "python");

        let request = ExecutionRequest::new("t", "write a go program");
        assert_eq!(infer_language(&request), "go");

        let request = ExecutionRequest::new("t", "compute a sum");
        assert_eq!(infer_language(&request), "python");
    }

    #[test]
    fn matrix_descriptions_get_domain_guidance() {
        assert!(domain_guidance("multiply two matrices").is_some());
        assert!(domain_guidance("sort a list").is_none());
    }

    #[test]
    fn prompt_drops_admin_context_keys() {
        let request = ExecutionRequest::new("Sum", "sum the values").with_context(
            TaskContext::from([("session_id", "s"), ("count", "3")]),
        );
        let enrichment = PromptEnrichment {
            tools: &[],
            tool_api_base: "http://localhost:8080",
            hints: &[],
            strategies: &[],
        };
        let prompt = build_generation_prompt(&request, "python", &enrichment);
        assert!(prompt.contains("count: 3"));
        assert!(!prompt.contains("session_id"));
    }

    #[test]
    fn relevant_tools_match_by_id_or_description_keyword() {
        let catalog = vec![
            ToolDescriptor {
                id: "tool_http_get".to_string(),
                name: "http_get".to_string(),
                description: "perform an http request against a url".to_string(),
                input_schema: json!({}),
                permissions: vec![],
                safety_level: "medium".to_string(),
            },
            ToolDescriptor {
                id: "tool_ls".to_string(),
                name: "ls".to_string(),
                description: "enumerate workspace entries".to_string(),
                input_schema: json!({}),
                permissions: vec![],
                safety_level: "low".to_string(),
            },
        ];
        let matched = relevant_tools(&catalog, "fetch the request body from the url");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "tool_http_get");
    }
}
