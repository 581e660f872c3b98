//! codeguard - secure execution engine for untrusted code
//!
//! A request is screened by the [`security`] validator, wrapped in a test
//! [`harness`] when it carries test cases, and run once inside an isolation
//! unit provided by a [`sandbox`] backend. The [`orchestrator`] ties the
//! stages together and always answers with a [`CodeExecutionResult`].

pub mod audit;
pub mod compiler;
pub mod config;
pub mod core;
pub mod error;
pub mod harness;
pub mod languages;
pub mod orchestrator;
pub mod sandbox;
pub mod security;
pub mod syntax;

pub use crate::audit::{AuditLogger, AuditSink, JsonLinesSink};
pub use crate::config::{BackendKind, EngineConfig};
pub use crate::core::{
    CodeExecutionRequest, CodeExecutionResult, ExecutionLimits, ExecutionStatus,
    FileSystemAccess, LimitPolicy, ResourceUsage, SecurityViolation, Severity, TestCase,
    TestResult,
};
pub use crate::error::{EngineError, FailureKind};
pub use crate::languages::{LanguageConfig, LanguageRegistry};
pub use crate::orchestrator::Orchestrator;
pub use crate::sandbox::{connect_backend, SandboxBackend};
pub use crate::security::SecurityValidator;
