//! Error types
//!
//! Two families live here. `EngineError` is propagated to the caller and is
//! reserved for configuration or implementation defects. `FailureKind` is the
//! taxonomy of user-induced or infrastructure failures; those never propagate
//! and are rendered into `CodeExecutionResult::errors` instead.

use thiserror::Error;

use crate::harness::HarnessError;

/// Configuration/implementation defects
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid language configuration for '{language}': {reason}")]
    InvalidLanguageConfig { language: String, reason: String },
    #[error("failed to parse language configuration: {0}")]
    LanguageToml(#[from] toml::de::Error),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported as data in the execution result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailureKind {
    #[error("security violation: {0}")]
    ValidationRejection(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),
    #[error("execution timed out after {0:.1}s")]
    Timeout(f64),
    #[error("memory limit exceeded (limit: {0} bytes)")]
    ResourceExceeded(u64),
    #[error("test harness output could not be parsed: {0}")]
    HarnessParseFailure(String),
    #[error("compilation failed: {0}")]
    CompilationFailed(String),
    #[error("incompatible limits: {0}")]
    IncompatibleLimits(String),
    #[error("execution failed: {0}")]
    ExecutionFault(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            FailureKind::SandboxUnavailable("docker backend is not reachable".into()).to_string(),
            "sandbox unavailable: docker backend is not reachable"
        );
        assert_eq!(
            FailureKind::Timeout(2.0).to_string(),
            "execution timed out after 2.0s"
        );
        assert_eq!(
            FailureKind::UnsupportedLanguage("cobol".into()).to_string(),
            "unsupported language: cobol"
        );
        assert_eq!(
            FailureKind::IncompatibleLimits("java needs a scratch area".into()).to_string(),
            "incompatible limits: java needs a scratch area"
        );
    }
}
