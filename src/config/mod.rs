//! Engine configuration.
//!
//! All environment flags are read exactly once, at construction. Nothing else
//! in the crate touches the process environment, which keeps request handling
//! reentrant and deterministic under test.

pub mod constants;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use constants::{DEFAULT_RETRY_BUDGET, DEFAULT_SANDBOX_TIMEOUT, DEFAULT_TOOL_API_BASE};

/// Which sandbox transport a request is dispatched to first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    /// Remote worker reached over SSH.
    Ssh,
    /// Local container runner.
    Docker,
}

impl std::fmt::Display for ExecutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMethod::Ssh => write!(f, "ssh"),
            ExecutionMethod::Docker => write!(f, "docker"),
        }
    }
}

/// Immutable engine configuration, captured once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Preferred sandbox transport.
    pub execution_method: ExecutionMethod,
    /// Whether ARM64 hosts should route to the remote worker.
    pub enable_arm64_tools: bool,
    /// Process-wide switch allowing generated code to perform network calls.
    pub allow_requests: bool,
    /// Base URL of the tool API as seen from this process.
    pub tool_api_base: String,
    /// Cluster-internal DNS name for the tool API, when running under an
    /// orchestrator. Takes precedence over host rewriting for cluster jobs.
    pub cluster_service: Option<String>,
    /// Remote worker host, for the SSH transport.
    pub remote_host: Option<String>,
    /// Hand the request to the planner when the complexity classifier says so.
    pub planner_enabled: bool,
    /// Attempts per validation loop.
    pub retry_budget: u32,
    /// Default sandbox execution timeout.
    pub sandbox_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            execution_method: ExecutionMethod::Docker,
            enable_arm64_tools: false,
            allow_requests: false,
            tool_api_base: DEFAULT_TOOL_API_BASE.to_string(),
            cluster_service: None,
            remote_host: None,
            planner_enabled: true,
            retry_budget: DEFAULT_RETRY_BUDGET,
            sandbox_timeout: DEFAULT_SANDBOX_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    /// Capture configuration from the process environment.
    ///
    /// Recognized flags: `EXECUTION_METHOD` (`ssh` | `docker`),
    /// `ENABLE_ARM64_TOOLS`, `ALLOW_REQUESTS`, `HDN_URL`, `HDN_K8S_SERVICE`,
    /// `RPI_HOST`. Unset flags fall back to defaults; on aarch64 hosts with
    /// `ENABLE_ARM64_TOOLS` set the SSH transport is preferred.
    pub fn from_env() -> Self {
        let enable_arm64_tools = env_flag("ENABLE_ARM64_TOOLS");
        let execution_method = match std::env::var("EXECUTION_METHOD")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Ok("ssh") => ExecutionMethod::Ssh,
            Ok("docker") => ExecutionMethod::Docker,
            _ => {
                if cfg!(target_arch = "aarch64") && enable_arm64_tools {
                    ExecutionMethod::Ssh
                } else {
                    ExecutionMethod::Docker
                }
            }
        };

        Self {
            execution_method,
            enable_arm64_tools,
            allow_requests: env_flag("ALLOW_REQUESTS"),
            tool_api_base: std::env::var("HDN_URL")
                .unwrap_or_else(|_| DEFAULT_TOOL_API_BASE.to_string()),
            cluster_service: std::env::var("HDN_K8S_SERVICE").ok().filter(|s| !s.is_empty()),
            remote_host: std::env::var("RPI_HOST").ok().filter(|s| !s.is_empty()),
            planner_enabled: true,
            retry_budget: DEFAULT_RETRY_BUDGET,
            sandbox_timeout: DEFAULT_SANDBOX_TIMEOUT,
        }
    }

    /// The tool API base URL as generated code will see it from inside the
    /// sandbox. Cluster jobs get the service DNS name; container runs get the
    /// container-internal host alias; the SSH worker reaches us directly.
    pub fn tool_api_base_for_sandbox(&self) -> String {
        if let Some(service) = &self.cluster_service {
            return format!("http://{}", service.trim_end_matches('/'));
        }
        match self.execution_method {
            ExecutionMethod::Docker => self
                .tool_api_base
                .replace("localhost", constants::CONTAINER_INTERNAL_HOST)
                .replace("127.0.0.1", constants::CONTAINER_INTERNAL_HOST),
            ExecutionMethod::Ssh => self.tool_api_base.clone(),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_rewrite_targets_container_host() {
        let config = ExecutorConfig {
            tool_api_base: "http://localhost:8080".to_string(),
            execution_method: ExecutionMethod::Docker,
            ..Default::default()
        };
        assert_eq!(
            config.tool_api_base_for_sandbox(),
            "http://host.docker.internal:8080"
        );
    }

    #[test]
    fn cluster_service_wins_over_host_rewrite() {
        let config = ExecutorConfig {
            tool_api_base: "http://localhost:8080".to_string(),
            cluster_service: Some("hdn-api.default.svc.cluster.local:8080".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.tool_api_base_for_sandbox(),
            "http://hdn-api.default.svc.cluster.local:8080"
        );
    }

    #[test]
    fn ssh_transport_keeps_base_untouched() {
        let config = ExecutorConfig {
            tool_api_base: "http://localhost:8080".to_string(),
            execution_method: ExecutionMethod::Ssh,
            ..Default::default()
        };
        assert_eq!(config.tool_api_base_for_sandbox(), "http://localhost:8080");
    }
}
