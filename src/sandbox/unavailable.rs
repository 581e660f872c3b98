//! Degraded-mode backend
//!
//! Used when no isolation backend can be reached. It never runs anything;
//! code is never executed on the host as a fallback.

use async_trait::async_trait;

use super::{BackendError, RunOutcome, RunSpec, SandboxBackend};

#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl SandboxBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn is_available(&self) -> bool {
        false
    }

    fn unavailable_reason(&self) -> String {
        self.reason.clone()
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutcome, BackendError> {
        tracing::warn!(
            "Refusing to run request {} without a sandbox: {}",
            spec.request_id,
            self.reason
        );
        Err(BackendError::Unavailable(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionLimits;
    use crate::sandbox::{CommandSpec, IsolationPolicy, SandboxConfig};

    #[tokio::test]
    async fn test_never_runs() {
        let backend = UnavailableBackend::new("docker daemon is not reachable");
        assert!(!backend.is_available().await);

        let spec = RunSpec {
            request_id: "r".into(),
            image: "python:3.11-slim".into(),
            command: CommandSpec::shell("echo hi"),
            workspace: std::env::temp_dir(),
            policy: IsolationPolicy::hardened(
                &ExecutionLimits::default(),
                1.0,
                &SandboxConfig::default(),
            ),
            max_output_bytes: 64,
        };
        let err = backend.run(spec).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert_eq!(err.to_string(), "docker daemon is not reachable");
    }
}
