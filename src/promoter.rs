//! Tool auto-promotion: turning a generalizable successful generation into
//! a registered tool.
//!
//! Promotion is conservative and entirely best-effort. A candidate must be
//! big enough to be worth reusing and the model must affirm, in strict JSON,
//! that it is a reusable capability. Failures anywhere in the pipeline just
//! skip promotion; they never affect the execution result.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::constants::{CLASSIFICATION_TIMEOUT, MIN_PROMOTABLE_LEN};
use crate::interfaces::{LanguageModel, ToolDescriptor, ToolRegistry};
use crate::types::{ExecutionRequest, GeneratedArtifact};
use crate::util::extract_json_object;

#[derive(Debug, Deserialize)]
struct PromotionVerdict {
    should_create_tool: bool,
    #[serde(default)]
    reason: String,
}

pub struct ToolPromoter {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<dyn ToolRegistry>,
}

impl ToolPromoter {
    pub fn new(llm: Arc<dyn LanguageModel>, registry: Arc<dyn ToolRegistry>) -> Self {
        Self { llm, registry }
    }

    /// Evaluate a successful artifact and register it as a tool when it
    /// qualifies. Returns the new tool id when registration happened.
    pub async fn maybe_promote(
        &self,
        request: &ExecutionRequest,
        artifact: &GeneratedArtifact,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if artifact.code.len() < MIN_PROMOTABLE_LEN {
            debug!(len = artifact.code.len(), "artifact too small to promote");
            return None;
        }

        let verdict = self.evaluate(request, artifact, cancel).await?;
        if !verdict.should_create_tool {
            debug!(reason = %verdict.reason, "promotion declined by evaluator");
            return None;
        }

        let tool = build_descriptor(request, artifact);
        match self.registry.register(&tool).await {
            Ok(()) => {
                info!(tool = %tool.id, reason = %verdict.reason, "capability promoted to tool");
                Some(tool.id)
            }
            Err(err) => {
                warn!(tool = %tool.id, error = %err, "tool registration failed");
                None
            }
        }
    }

    async fn evaluate(
        &self,
        request: &ExecutionRequest,
        artifact: &GeneratedArtifact,
        cancel: &CancellationToken,
    ) -> Option<PromotionVerdict> {
        let prompt = format!(
            "Is this validated program a reusable capability worth registering as a \
             tool? Respond with ONLY a JSON object: {{\"should_create_tool\": bool, \
             \"reason\": string}}.\n\nTask: {}\nDescription: {}\nLanguage: {}\n\n\
             Program:\n{}",
            request.task_name, request.description, artifact.language, artifact.code
        );
        let response = tokio::time::timeout(
            CLASSIFICATION_TIMEOUT,
            self.llm.complete(&prompt, request.priority, cancel),
        )
        .await
        .ok()?
        .ok()?;
        let value = extract_json_object(&response)?;
        serde_json::from_value(value).ok()
    }
}

fn build_descriptor(request: &ExecutionRequest, artifact: &GeneratedArtifact) -> ToolDescriptor {
    ToolDescriptor {
        id: tool_id(&request.task_name, artifact),
        name: request.task_name.clone(),
        description: request.description.clone(),
        input_schema: infer_schema(request),
        permissions: vec!["proc:exec".to_string()],
        safety_level: "medium".to_string(),
    }
}

/// Stable id: a slug of the task name, or a language/length hash when the
/// name slugs away to nothing.
fn tool_id(task_name: &str, artifact: &GeneratedArtifact) -> String {
    let slug: String = task_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.len() >= 3 {
        return format!("tool_{}", slug);
    }
    let mut hasher = Sha256::new();
    hasher.update(artifact.code.as_bytes());
    let digest = hasher.finalize();
    format!(
        "tool_{}_{:02x}{:02x}{:02x}{:02x}",
        artifact.language, digest[0], digest[1], digest[2], digest[3]
    )
}

/// JSON-schema input description inferred from the non-administrative
/// context keys, with scalar type inference per value.
fn infer_schema(request: &ExecutionRequest) -> Value {
    let mut properties = serde_json::Map::new();
    for (key, value) in request.context.without_admin_keys().iter() {
        properties.insert(key.clone(), json!({ "type": infer_type(value) }));
    }
    json!({ "type": "object", "properties": properties })
}

fn infer_type(value: &str) -> &'static str {
    let trimmed = value.trim();
    if trimmed.parse::<i64>().is_ok() {
        "integer"
    } else if trimmed.parse::<f64>().is_ok() {
        "number"
    } else if matches!(trimmed.to_lowercase().as_str(), "true" | "false") {
        "boolean"
    } else {
        "string"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::types::Priority;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _priority: Priority,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingRegistry {
        registered: Mutex<Vec<ToolDescriptor>>,
    }

    #[async_trait]
    impl ToolRegistry for RecordingRegistry {
        async fn list(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![])
        }
        async fn invoke(
            &self,
            _id: &str,
            _params: &Value,
        ) -> anyhow::Result<crate::interfaces::ToolResponse> {
            anyhow::bail!("not invokable in tests")
        }
        async fn register(&self, tool: &ToolDescriptor) -> anyhow::Result<()> {
            self.registered.lock().push(tool.clone());
            Ok(())
        }
    }

    fn artifact(code_len: usize) -> GeneratedArtifact {
        GeneratedArtifact::new(
            "CalculatePrimes",
            "calculate primes",
            "python",
            "x".repeat(code_len),
            TaskContext::new(),
        )
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("CalculatePrimes", "calculate primes").with_context(
            TaskContext::from([("count", "10"), ("ratio", "0.5"), ("verbose", "true")]),
        )
    }

    #[tokio::test]
    async fn affirmative_verdict_registers_a_tool() {
        let registry = Arc::new(RecordingRegistry::default());
        let promoter = ToolPromoter::new(
            Arc::new(ScriptedLlm(
                "{\"should_create_tool\": true, \"reason\": \"parameterized and reusable\"}"
                    .to_string(),
            )),
            registry.clone(),
        );
        let id = promoter
            .maybe_promote(&request(), &artifact(400), &CancellationToken::new())
            .await;
        assert_eq!(id.as_deref(), Some("tool_calculateprimes"));

        let registered = registry.registered.lock();
        assert_eq!(registered.len(), 1);
        let schema = &registered[0].input_schema;
        assert_eq!(schema["properties"]["count"]["type"], "integer");
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        assert_eq!(schema["properties"]["verbose"]["type"], "boolean");
        assert_eq!(registered[0].permissions, vec!["proc:exec"]);
    }

    #[tokio::test]
    async fn negative_verdict_skips_registration() {
        let registry = Arc::new(RecordingRegistry::default());
        let promoter = ToolPromoter::new(
            Arc::new(ScriptedLlm(
                "{\"should_create_tool\": false, \"reason\": \"one-off\"}".to_string(),
            )),
            registry.clone(),
        );
        let id = promoter
            .maybe_promote(&request(), &artifact(400), &CancellationToken::new())
            .await;
        assert!(id.is_none());
        assert!(registry.registered.lock().is_empty());
    }

    #[tokio::test]
    async fn small_artifacts_never_promote() {
        let registry = Arc::new(RecordingRegistry::default());
        let promoter = ToolPromoter::new(
            Arc::new(ScriptedLlm(
                "{\"should_create_tool\": true, \"reason\": \"sure\"}".to_string(),
            )),
            registry.clone(),
        );
        let id = promoter
            .maybe_promote(&request(), &artifact(10), &CancellationToken::new())
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn unparseable_verdict_skips_promotion() {
        let registry = Arc::new(RecordingRegistry::default());
        let promoter = ToolPromoter::new(
            Arc::new(ScriptedLlm("definitely make it a tool!".to_string())),
            registry.clone(),
        );
        let id = promoter
            .maybe_promote(&request(), &artifact(400), &CancellationToken::new())
            .await;
        assert!(id.is_none());
    }

    #[test]
    fn degenerate_names_fall_back_to_a_hash_id() {
        let art = artifact(300);
        let id = tool_id("!!", &art);
        assert!(id.starts_with("tool_python_"));
    }
}
