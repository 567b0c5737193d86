//! # mindexec - Intelligent task execution engine
//!
//! `mindexec` turns natural-language tasks into verified artifacts: it
//! generates source code through a language model, validates it in an
//! isolated sandbox, repairs it on failure, and returns the execution output
//! together with provenance. It sits between a higher-level planner and a
//! containerized code runner, owning the decisions that make that pipeline
//! safe, cached, and self-improving.
//!
//! ## Highlights
//!
//! - **Route classification**: a deterministic decision procedure picks one
//!   of eight execution strategies per request, from direct model answers
//!   through tool short-circuits up to chained multi-program runs.
//! - **Two-layer safety gate**: hardcoded destructive-intent and forbidden
//!   construct scans plus a model-assisted policy classification checked
//!   against an external oracle, failing closed when the oracle is away.
//! - **Validation loop**: bounded generate → sandbox → diagnose → repair
//!   iteration, with every attempt recorded as an immutable validation step.
//! - **Capability cache**: domain-aware compatibility matching reuses
//!   previously validated artifacts instead of regenerating them.
//! - **Chained programs**: multi-program requests run sequentially with
//!   typed data handoff, per-program timing extraction, and synthesized
//!   performance comparison reports.
//! - **Learning store**: failure patterns and strategy statistics feed
//!   prevention hints back into future generation prompts.
//!
//! ## Architecture Overview
//!
//! - `config/`: read-once environment capture and centralized constants.
//! - `interfaces`: narrow async contracts for every external collaborator
//!   (model, sandbox, tools, policy oracle, storage, planner, learning KV).
//! - `safety/`, `router`, `cache`, `codegen`, `validate`, `chained/`,
//!   `learning`, `loop_protector`, `artifacts`, `promoter`: one module per
//!   engine component.
//! - `executor`: the single entry point tying the components together.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use mindexec::{Collaborators, ExecutionRequest, ExecutorConfig, IntelligentExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = IntelligentExecutor::new(ExecutorConfig::from_env(), collaborators());
//!     let request = ExecutionRequest::new(
//!         "CalculatePrimes",
//!         "calculate the first ten prime numbers and print them",
//!     );
//!     let result = executor.execute(request, CancellationToken::new()).await;
//!     println!("{:?}", result.result);
//! }
//! ```

pub mod artifacts;
pub mod cache;
pub mod chained;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod interfaces;
pub mod lang;
pub mod learning;
pub mod loop_protector;
pub mod promoter;
pub mod router;
pub mod safety;
pub mod sandbox;
pub mod tools;
pub mod types;
pub mod util;
pub mod validate;

pub use cache::{CompatibilityStatus, CompatibilityVerdict};
pub use config::{ExecutionMethod, ExecutorConfig};
pub use context::TaskContext;
pub use error::ExecutorError;
pub use executor::{Collaborators, IntelligentExecutor};
pub use interfaces::{
    CodeStorage, FileStorage, LanguageModel, LearningKv, Planner, PolicyDecision, PolicyOracle,
    SafetyDimensions, SandboxError, SandboxExecutor, SandboxOutcome, SandboxRequest,
    SelfModelStore, StoredFile, ToolDescriptor, ToolRegistry, ToolResponse,
};
pub use router::{Complexity, Route};
pub use sandbox::SandboxRouter;
pub use types::{
    ChainedProgram, ExecutionRequest, ExecutionResult, GeneratedArtifact, Priority, ProgramTiming,
    ResultValue, ValidationStep, ValidationStepKind,
};
