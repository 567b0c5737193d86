//! Two-layer safety gate: static pattern scans plus model-assisted
//! classification checked against the external policy oracle.
//!
//! Both layers must pass. The oracle failing to answer blocks the request
//! (fail closed); the classifier model failing to answer does not (its
//! permissive defaults are recorded and the oracle still decides).

pub mod patterns;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::TaskContext;
use crate::error::ExecutorError;
use crate::interfaces::{LanguageModel, PolicyOracle, SafetyDimensions};
use crate::types::Priority;
use crate::util::extract_json_object;

pub struct SafetyGate {
    llm: Arc<dyn LanguageModel>,
    oracle: Arc<dyn PolicyOracle>,
}

impl SafetyGate {
    pub fn new(llm: Arc<dyn LanguageModel>, oracle: Arc<dyn PolicyOracle>) -> Self {
        Self { llm, oracle }
    }

    /// Static layer: pattern scans over the request text and sensitive
    /// context fields. No model traffic; runs before loop protection.
    pub fn check_request_static(
        &self,
        task_name: &str,
        description: &str,
        context: &TaskContext,
    ) -> Result<(), ExecutorError> {
        if let Some(phrase) = patterns::scan_request_text(task_name, description) {
            return Err(ExecutorError::BlockedBySafety(format!(
                "request matches destructive pattern '{}'",
                phrase
            )));
        }
        if let Some(phrase) = patterns::scan_context_fields(context) {
            return Err(ExecutorError::BlockedBySafety(format!(
                "request context matches destructive pattern '{}'",
                phrase
            )));
        }
        Ok(())
    }

    /// Model-assisted layer: classify the request into the seven policy
    /// dimensions and pass them to the external oracle. Blocks on explicit
    /// denial or oracle unavailability (fail closed).
    pub async fn check_request_policy(
        &self,
        task_name: &str,
        description: &str,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(
                "cancelled before safety classification".to_string(),
            ));
        }

        let dimensions = self
            .classify(task_name, description, priority, cancel)
            .await;
        debug!(?dimensions, task = task_name, "safety dimensions classified");

        match self.oracle.check_action(task_name, &dimensions).await {
            Ok(decision) if decision.allowed => Ok(()),
            Ok(decision) => Err(ExecutorError::BlockedBySafety(format!(
                "policy denied: {}",
                decision.reasons.join("; ")
            ))),
            Err(err) => Err(ExecutorError::SafetyInfrastructureUnavailable(
                err.to_string(),
            )),
        }
    }

    /// Both layers in sequence, for callers outside the traditional path.
    pub async fn check_request(
        &self,
        task_name: &str,
        description: &str,
        context: &TaskContext,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        self.check_request_static(task_name, description, context)?;
        self.check_request_policy(task_name, description, priority, cancel)
            .await
    }

    /// Static scan of generated code. `network_allowed` reflects the process
    /// flag, the request's `allow_requests` context flag, or a tool-calling
    /// route classification.
    pub fn check_code(&self, code: &str, network_allowed: bool) -> Result<(), ExecutorError> {
        match patterns::scan_code(code, network_allowed) {
            Some(construct) => Err(ExecutorError::BlockedBySafety(format!(
                "generated code contains forbidden construct '{}'",
                construct
            ))),
            None => Ok(()),
        }
    }

    /// Model-assisted classification into the seven policy dimensions.
    /// Tolerates fenced JSON; falls back to permissive defaults when the
    /// model is unavailable or the response does not parse.
    async fn classify(
        &self,
        task_name: &str,
        description: &str,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> SafetyDimensions {
        let prompt = classification_prompt(task_name, description);
        let response = match self.llm.complete(&prompt, priority, cancel).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "safety classifier unavailable; using permissive defaults");
                return SafetyDimensions::permissive();
            }
        };

        match extract_json_object(&response)
            .and_then(|v| serde_json::from_value::<SafetyDimensions>(v).ok())
        {
            Some(dimensions) => dimensions,
            None => {
                warn!("safety classifier response did not parse; using permissive defaults");
                SafetyDimensions::permissive()
            }
        }
    }
}

fn classification_prompt(task_name: &str, description: &str) -> String {
    format!(
        "Classify the following task for safety. Respond with ONLY a JSON object \
         containing exactly these boolean fields: human_harm, human_order, self_harm, \
         privacy_violation, endanger_others, order_unethical, discrimination.\n\n\
         Task: {}\nDescription: {}",
        task_name, description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::PolicyDecision;
    use async_trait::async_trait;

    struct ScriptedLlm(Option<String>);

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _priority: Priority,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<String> {
            match &self.0 {
                Some(text) => Ok(text.clone()),
                None => Err(anyhow::anyhow!("model offline")),
            }
        }
    }

    struct AllowAll;

    #[async_trait]
    impl PolicyOracle for AllowAll {
        async fn check_action(
            &self,
            _task_name: &str,
            _dimensions: &SafetyDimensions,
        ) -> anyhow::Result<PolicyDecision> {
            Ok(PolicyDecision {
                allowed: true,
                reasons: vec![],
            })
        }
    }

    struct BrokenOracle;

    #[async_trait]
    impl PolicyOracle for BrokenOracle {
        async fn check_action(
            &self,
            _task_name: &str,
            _dimensions: &SafetyDimensions,
        ) -> anyhow::Result<PolicyDecision> {
            Err(anyhow::anyhow!("oracle unreachable"))
        }
    }

    fn dims_response() -> String {
        "```json\n{\"human_harm\": false, \"human_order\": true, \"self_harm\": false, \
         \"privacy_violation\": false, \"endanger_others\": false, \
         \"order_unethical\": false, \"discrimination\": false}\n```"
            .to_string()
    }

    #[tokio::test]
    async fn destructive_request_blocks_before_model_call() {
        let gate = SafetyGate::new(Arc::new(ScriptedLlm(None)), Arc::new(AllowAll));
        let err = gate
            .check_request(
                "cleanup",
                "delete all files from disk",
                &TaskContext::new(),
                Priority::High,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::BlockedBySafety(_)));
        assert!(err.to_string().contains("delete all files"));
    }

    #[tokio::test]
    async fn fenced_classifier_response_is_tolerated() {
        let gate = SafetyGate::new(
            Arc::new(ScriptedLlm(Some(dims_response()))),
            Arc::new(AllowAll),
        );
        gate.check_request(
            "Summarize",
            "summarize the report",
            &TaskContext::new(),
            Priority::High,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn oracle_unreachable_fails_closed() {
        let gate = SafetyGate::new(
            Arc::new(ScriptedLlm(Some(dims_response()))),
            Arc::new(BrokenOracle),
        );
        let err = gate
            .check_request(
                "Summarize",
                "summarize the report",
                &TaskContext::new(),
                Priority::High,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::SafetyInfrastructureUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn classifier_outage_still_reaches_oracle() {
        let gate = SafetyGate::new(Arc::new(ScriptedLlm(None)), Arc::new(AllowAll));
        gate.check_request(
            "Summarize",
            "summarize the report",
            &TaskContext::new(),
            Priority::High,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }
}
