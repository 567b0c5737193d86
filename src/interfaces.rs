//! Contracts for the external collaborators the engine consumes.
//!
//! The engine owns none of these services. Each is reached through a narrow
//! async trait so embedders can wire real transports and tests can wire
//! in-memory fakes. All methods accept or observe cancellation through the
//! token passed down from the executor.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{GeneratedArtifact, Priority};

/// Language model service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt. Token accounting is the service's concern.
    async fn complete(
        &self,
        prompt: &str,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String>;
}

/// A single sandbox execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    /// Environment handed to the program.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Validation runs may be routed differently from production runs.
    pub is_validation: bool,
}

/// What came back from the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
    /// Files the program left behind, for artifact extraction.
    #[serde(default)]
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Transport-level sandbox failures. Execution failures (non-zero exit,
/// timeouts inside the sandbox) are reported through [`SandboxOutcome`].
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The transport answered 404/501 or is administratively disabled;
    /// the router may fail over to the other transport.
    #[error("sandbox transport unavailable: {0}")]
    Unavailable(String),
    /// The transport was reachable but the dispatch itself failed.
    #[error("sandbox dispatch failed: {0}")]
    Dispatch(String),
}

/// Containerized code runner (local container or remote SSH worker).
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(
        &self,
        request: SandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError>;
}

/// Registered tool metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped input description.
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub safety_level: String,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Open-world tool catalog, fetched at request time.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<ToolDescriptor>>;
    async fn invoke(&self, id: &str, params: &Value) -> anyhow::Result<ToolResponse>;
    /// Registration tolerates duplicates; registering an existing id is Ok.
    async fn register(&self, tool: &ToolDescriptor) -> anyhow::Result<()>;
}

/// The seven boolean dimensions the safety classifier produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDimensions {
    #[serde(default)]
    pub human_harm: bool,
    #[serde(default)]
    pub human_order: bool,
    #[serde(default)]
    pub self_harm: bool,
    #[serde(default)]
    pub privacy_violation: bool,
    #[serde(default)]
    pub endanger_others: bool,
    #[serde(default)]
    pub order_unethical: bool,
    #[serde(default)]
    pub discrimination: bool,
}

impl SafetyDimensions {
    /// Defaults applied when the classifier response cannot be parsed:
    /// permissive on every harm dimension, but the request is still treated
    /// as a human-ordered action.
    pub fn permissive() -> Self {
        Self {
            human_order: true,
            ..Self::default()
        }
    }
}

/// Verdict from the external safety policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// External policy oracle. An `Err` means the oracle is unreachable and the
/// gate must fail closed.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    async fn check_action(
        &self,
        task_name: &str,
        dimensions: &SafetyDimensions,
    ) -> anyhow::Result<PolicyDecision>;
}

/// Durable storage of generated artifacts; the capability cache reads it.
#[async_trait]
pub trait CodeStorage: Send + Sync {
    async fn store(&self, artifact: &GeneratedArtifact) -> anyhow::Result<()>;
    async fn search(
        &self,
        task_name: &str,
        language: Option<&str>,
        tags: &[String],
    ) -> anyhow::Result<Vec<GeneratedArtifact>>;
    async fn list_all(&self) -> anyhow::Result<Vec<GeneratedArtifact>>;
}

/// A file produced by an execution, headed for artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub size: usize,
    pub workflow_id: String,
    pub step_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Storage for extracted file artifacts.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(&self, file: StoredFile) -> anyhow::Result<()>;
}

/// Self-model / episodic store. Updates are best-effort from the engine's
/// perspective; failures are logged and never propagate.
#[async_trait]
pub trait SelfModelStore: Send + Sync {
    async fn add_goal(&self, goal: &str) -> anyhow::Result<()>;
    async fn record_episode(&self, episode: &Value) -> anyhow::Result<()>;
    async fn update_belief(&self, key: &str, value: &Value) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Value>;
}

/// Hierarchical planner for requests the complexity classifier escalates.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_and_execute(
        &self,
        task_name: &str,
        description: &str,
        context: &crate::context::TaskContext,
        workflow_id: &str,
    ) -> anyhow::Result<Value>;

    async fn register_capability(&self, capability: &Value) -> anyhow::Result<()>;
}

/// Key/value store with TTL backing the learning store.
#[async_trait]
pub trait LearningKv: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    /// Keys matching a glob-style pattern (`prefix:*`).
    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>>;
}
