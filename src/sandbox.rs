//! Sandbox transport routing.
//!
//! Two transports exist for running generated code: a remote SSH worker and
//! a local container runner. The router picks a primary from configuration
//! and fails over to the other transport when the primary answers with a
//! not-found/not-implemented/disabled style response. Only when both are
//! unreachable does the execution surface a sandbox-unavailable failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{ExecutionMethod, ExecutorConfig};
use crate::interfaces::{SandboxError, SandboxExecutor, SandboxOutcome, SandboxRequest};

pub struct SandboxRouter {
    primary: Arc<dyn SandboxExecutor>,
    secondary: Arc<dyn SandboxExecutor>,
    primary_label: ExecutionMethod,
    secondary_label: ExecutionMethod,
}

impl SandboxRouter {
    /// Wire the router from configuration: `EXECUTION_METHOD` (or the
    /// aarch64 heuristic captured in the config) selects the primary.
    pub fn from_config(
        config: &ExecutorConfig,
        ssh: Arc<dyn SandboxExecutor>,
        docker: Arc<dyn SandboxExecutor>,
    ) -> Self {
        match config.execution_method {
            ExecutionMethod::Ssh => Self {
                primary: ssh,
                secondary: docker,
                primary_label: ExecutionMethod::Ssh,
                secondary_label: ExecutionMethod::Docker,
            },
            ExecutionMethod::Docker => Self {
                primary: docker,
                secondary: ssh,
                primary_label: ExecutionMethod::Docker,
                secondary_label: ExecutionMethod::Ssh,
            },
        }
    }
}

#[async_trait]
impl SandboxExecutor for SandboxRouter {
    async fn execute(
        &self,
        request: SandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        match self.primary.execute(request.clone(), cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(SandboxError::Unavailable(detail)) => {
                warn!(
                    primary = %self.primary_label,
                    fallback = %self.secondary_label,
                    detail = %detail,
                    "primary sandbox transport unavailable; failing over"
                );
                match self.secondary.execute(request, cancel).await {
                    Ok(outcome) => Ok(outcome),
                    Err(SandboxError::Unavailable(secondary_detail)) => {
                        Err(SandboxError::Unavailable(format!(
                            "{}: {}; {}: {}",
                            self.primary_label, detail, self.secondary_label, secondary_detail
                        )))
                    }
                    Err(other) => Err(other),
                }
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Scripted {
        label: &'static str,
        result: Result<SandboxOutcome, SandboxError>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl SandboxExecutor for Scripted {
        async fn execute(
            &self,
            _request: SandboxRequest,
            _cancel: &CancellationToken,
        ) -> Result<SandboxOutcome, SandboxError> {
            self.calls.lock().push(self.label);
            match &self.result {
                Ok(outcome) => Ok(outcome.clone()),
                Err(SandboxError::Unavailable(d)) => Err(SandboxError::Unavailable(d.clone())),
                Err(SandboxError::Dispatch(d)) => Err(SandboxError::Dispatch(d.clone())),
            }
        }
    }

    fn request() -> SandboxRequest {
        SandboxRequest {
            language: "python".to_string(),
            code: "print(1)".to_string(),
            stdin: None,
            env: Default::default(),
            timeout: std::time::Duration::from_secs(5),
            is_validation: true,
        }
    }

    fn ok_outcome(stdout: &str) -> SandboxOutcome {
        SandboxOutcome {
            success: true,
            stdout: stdout.to_string(),
            ..SandboxOutcome::default()
        }
    }

    #[tokio::test]
    async fn unavailable_primary_fails_over() {
        let calls = Arc::new(Mutex::new(vec![]));
        let config = ExecutorConfig {
            execution_method: ExecutionMethod::Ssh,
            ..Default::default()
        };
        let router = SandboxRouter::from_config(
            &config,
            Arc::new(Scripted {
                label: "ssh",
                result: Err(SandboxError::Unavailable("404".to_string())),
                calls: calls.clone(),
            }),
            Arc::new(Scripted {
                label: "docker",
                result: Ok(ok_outcome("hi")),
                calls: calls.clone(),
            }),
        );

        let outcome = router.execute(request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.stdout, "hi");
        assert_eq!(*calls.lock(), vec!["ssh", "docker"]);
    }

    #[tokio::test]
    async fn both_unavailable_surfaces_combined_detail() {
        let calls = Arc::new(Mutex::new(vec![]));
        let config = ExecutorConfig::default();
        let router = SandboxRouter::from_config(
            &config,
            Arc::new(Scripted {
                label: "ssh",
                result: Err(SandboxError::Unavailable("connection refused".to_string())),
                calls: calls.clone(),
            }),
            Arc::new(Scripted {
                label: "docker",
                result: Err(SandboxError::Unavailable("daemon disabled".to_string())),
                calls: calls.clone(),
            }),
        );

        let err = router
            .execute(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SandboxError::Unavailable(detail) => {
                assert!(detail.contains("docker"));
                assert!(detail.contains("ssh"));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn execution_failures_do_not_fail_over() {
        let calls = Arc::new(Mutex::new(vec![]));
        let config = ExecutorConfig::default(); // docker primary
        let router = SandboxRouter::from_config(
            &config,
            Arc::new(Scripted {
                label: "ssh",
                result: Ok(ok_outcome("never")),
                calls: calls.clone(),
            }),
            Arc::new(Scripted {
                label: "docker",
                result: Err(SandboxError::Dispatch("payload rejected".to_string())),
                calls: calls.clone(),
            }),
        );

        let err = router
            .execute(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Dispatch(_)));
        assert_eq!(*calls.lock(), vec!["docker"]);
    }
}
