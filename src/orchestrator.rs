//! Execution orchestrator
//!
//! Drives one request through screening, sandboxed execution and result
//! assembly. `execute` returns `Err` only for configuration defects; every
//! user-induced or infrastructure failure is reported in the result.

use std::sync::Arc;
use std::time::Instant;

use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::compiler::{self, LaunchPlan, COMPILE_FAILED_EXIT};
use crate::core::{
    CodeExecutionRequest, CodeExecutionResult, ExecutionLimits, ExecutionStatus, LimitPolicy,
    TestCase, TestResult,
};
use crate::error::{EngineError, FailureKind};
use crate::harness::{self, protocol, GeneratedHarness};
use crate::languages::{LanguageConfig, LanguageRegistry};
use crate::sandbox::{
    BackendError, IsolationPolicy, RunOutcome, RunSpec, SandboxBackend, SandboxConfig, Workspace,
};
use crate::security::SecurityValidator;
use crate::syntax;

pub struct Orchestrator {
    backend: Arc<dyn SandboxBackend>,
    registry: Arc<LanguageRegistry>,
    validator: SecurityValidator,
    audit: AuditLogger,
    policy: LimitPolicy,
    sandbox: SandboxConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        registry: Arc<LanguageRegistry>,
        validator: SecurityValidator,
        audit: AuditLogger,
        policy: LimitPolicy,
    ) -> Self {
        Self {
            backend,
            registry,
            validator,
            audit,
            policy,
            sandbox: SandboxConfig::default(),
        }
    }

    pub fn with_sandbox_config(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn list_supported_languages(&self) -> Vec<String> {
        self.registry.list_supported()
    }

    pub fn is_language_supported(&self, language: &str) -> bool {
        self.registry.is_supported(language)
    }

    /// Release the backend
    pub async fn shutdown(&self) {
        info!("Shutting down {} sandbox backend", self.backend.name());
        self.backend.shutdown().await;
    }

    /// Screen, run and assess one request
    pub async fn execute(
        &self,
        request: &CodeExecutionRequest,
    ) -> Result<CodeExecutionResult, EngineError> {
        let started = Instant::now();
        let limits = request.limits().clamp(&self.policy);
        // aliases from operator profiles must reach the same rule set
        let scan_language = self
            .registry
            .get(request.language())
            .map_or(request.language(), |config| config.scan_language());
        let violations = self.validator.validate(request.code(), scan_language);
        let critical: Vec<String> = violations
            .iter()
            .filter(|v| v.is_critical())
            .map(|v| FailureKind::ValidationRejection(v.description.clone()).to_string())
            .collect();

        let mut result = if critical.is_empty() {
            self.audit.log_violations(request, &limits, &violations, false);
            self.run_screened(request, &limits, scan_language).await?
        } else {
            self.audit.log_violations(request, &limits, &violations, true);
            warn!(
                "Rejected request {}: {} critical security violation(s)",
                request.id(),
                critical.len()
            );
            let mut result =
                CodeExecutionResult::new(request.id(), ExecutionStatus::SecurityViolation);
            result.errors = critical;
            result
        };

        result.security_violations = violations;
        result.execution_time = started.elapsed().as_secs_f64();

        info!(
            "Request {} ({}) finished with {} in {:.3}s ({} tests, {} violations)",
            request.id(),
            request.language(),
            result.status,
            result.execution_time,
            result.test_results.len(),
            result.security_violations.len()
        );
        Ok(result)
    }

    /// Everything after the security gate
    async fn run_screened(
        &self,
        request: &CodeExecutionRequest,
        limits: &ExecutionLimits,
        scan_language: &str,
    ) -> Result<CodeExecutionResult, EngineError> {
        if !self.backend.is_available().await {
            warn!(
                "Sandbox unavailable for request {}, falling back to syntax check",
                request.id()
            );
            return Ok(unavailable_result(
                request,
                scan_language,
                self.backend.unavailable_reason(),
            ));
        }

        let config = match self.registry.get(request.language()) {
            Ok(config) => config,
            Err(EngineError::UnsupportedLanguage(language)) => {
                warn!("Request {} uses unsupported language {}", request.id(), language);
                return Ok(failed_result(
                    request,
                    FailureKind::UnsupportedLanguage(language),
                ));
            }
            Err(e) => return Err(e),
        };

        if config.needs_scratch && !limits.file_system_access.allows_scratch() {
            warn!(
                "Request {} asks for no scratch area, which {} needs",
                request.id(),
                config.name
            );
            return Ok(failed_result(
                request,
                FailureKind::IncompatibleLimits(format!(
                    "{} requires temp_only file system access",
                    config.name
                )),
            ));
        }

        let harness = if request.test_cases().is_empty() {
            None
        } else {
            Some(harness::generate(request, config)?)
        };
        let plan = compiler::plan_launch(config, harness.is_some())?;

        let workspace = match materialize(request, config, harness.as_ref()).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!("Failed to prepare workspace for request {}: {}", request.id(), e);
                return Ok(failed_result(
                    request,
                    FailureKind::ExecutionFault(format!("could not prepare workspace: {}", e)),
                ));
            }
        };

        let wall_timeout = config.effective_timeout(limits);
        let spec = RunSpec {
            request_id: request.id().to_string(),
            image: config.image.clone(),
            command: plan.command.clone(),
            workspace: workspace.path().to_path_buf(),
            policy: IsolationPolicy::hardened(limits, wall_timeout, &self.sandbox),
            max_output_bytes: self.sandbox.max_output_bytes,
        };

        info!(
            "Launching {} unit for request {} ({}, timeout {:.1}s, {} tests)",
            self.backend.name(),
            request.id(),
            config.name,
            wall_timeout,
            request.test_cases().len()
        );
        let outcome = self.backend.run(spec).await;

        if let Err(e) = workspace.close() {
            warn!("Failed to remove workspace of request {}: {}", request.id(), e);
        }

        match outcome {
            Ok(outcome) => Ok(assemble(
                request,
                limits,
                wall_timeout,
                &plan,
                harness.is_some(),
                outcome,
            )),
            Err(BackendError::Unavailable(reason)) => {
                Ok(unavailable_result(request, scan_language, reason))
            }
            Err(e) => {
                warn!("Sandbox run failed for request {}: {}", request.id(), e);
                Ok(failed_result(request, FailureKind::ExecutionFault(e.to_string())))
            }
        }
    }
}

async fn materialize(
    request: &CodeExecutionRequest,
    config: &LanguageConfig,
    harness: Option<&GeneratedHarness>,
) -> std::io::Result<Workspace> {
    let workspace = Workspace::create()?;
    workspace
        .write_file(&config.source_file, request.code())
        .await?;
    if let Some(harness) = harness {
        workspace
            .write_file(&harness.file_name, &harness.source)
            .await?;
    }
    Ok(workspace)
}

fn failed_result(request: &CodeExecutionRequest, failure: FailureKind) -> CodeExecutionResult {
    let mut result = CodeExecutionResult::new(request.id(), ExecutionStatus::Failed);
    result.errors.push(failure.to_string());
    result
}

/// FAILED result for a missing sandbox, with best-effort syntax findings
fn unavailable_result(
    request: &CodeExecutionRequest,
    scan_language: &str,
    reason: String,
) -> CodeExecutionResult {
    let mut result = failed_result(request, FailureKind::SandboxUnavailable(reason));
    result.errors.extend(
        syntax::check(request.code(), scan_language)
            .into_iter()
            .map(|issue| format!("syntax check: {}", issue)),
    );
    result
}

/// Turn a finished unit into the final result
fn assemble(
    request: &CodeExecutionRequest,
    limits: &ExecutionLimits,
    wall_timeout: f64,
    plan: &LaunchPlan,
    used_harness: bool,
    outcome: RunOutcome,
) -> CodeExecutionResult {
    let compile_failed = plan.has_compile_step && outcome.exit_code == Some(COMPILE_FAILED_EXIT);

    let mut fatal_error = None;
    let mut parse_miss = None;
    let mut test_results = Vec::new();
    let stdout = if used_harness {
        let parsed = protocol::parse_output(&outcome.stdout);
        if parsed.matched {
            fatal_error = parsed.fatal_error;
            // a fatal report carries no per-case results
            if fatal_error.is_none() {
                match reconcile(request.test_cases(), parsed.test_results) {
                    Ok(results) => test_results = results,
                    Err(reason) => parse_miss = Some(reason),
                }
            }
        } else {
            parse_miss = Some("no report line in program output".to_string());
        }
        parsed.output
    } else {
        outcome.stdout
    };

    let status = if outcome.timed_out {
        ExecutionStatus::Timeout
    } else if outcome.oom_killed {
        ExecutionStatus::MemoryExceeded
    } else if compile_failed {
        ExecutionStatus::CompilationError
    } else if outcome.exit_code == Some(0) && fatal_error.is_none() {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    };

    let mut result = CodeExecutionResult::new(request.id(), status);
    match status {
        ExecutionStatus::Timeout => {
            result.errors.push(FailureKind::Timeout(wall_timeout).to_string());
        }
        ExecutionStatus::MemoryExceeded => {
            result
                .errors
                .push(FailureKind::ResourceExceeded(limits.memory_limit).to_string());
        }
        ExecutionStatus::CompilationError => {
            let message = match outcome.stderr.trim() {
                "" => "compiler reported errors".to_string(),
                stderr => stderr.to_string(),
            };
            result
                .errors
                .push(FailureKind::CompilationFailed(message).to_string());
        }
        ExecutionStatus::Failed => {
            let reason = fatal_error.unwrap_or_else(|| describe_exit(outcome.exit_code));
            result
                .errors
                .push(FailureKind::ExecutionFault(reason).to_string());
        }
        _ => {}
    }

    // a killed or uncompiled harness cannot have reported
    if let Some(reason) = parse_miss {
        if matches!(status, ExecutionStatus::Success | ExecutionStatus::Failed) {
            result
                .errors
                .push(FailureKind::HarnessParseFailure(reason).to_string());
        }
    }

    result.output = combine_output(stdout, &outcome.stderr);
    result.test_results = test_results;
    result.resource_usage = outcome.resource_usage.sanitized();
    result
}

/// Align reported results with the request's cases, in request order
///
/// Expected output always comes from the request, and `passed` is
/// recomputed rather than trusted.
fn reconcile(cases: &[TestCase], reported: Vec<TestResult>) -> Result<Vec<TestResult>, String> {
    if cases.len() != reported.len() {
        return Err(format!(
            "report has {} results for {} test cases",
            reported.len(),
            cases.len()
        ));
    }

    Ok(cases
        .iter()
        .zip(reported)
        .map(|(case, reported)| {
            let time = if reported.execution_time.is_finite() {
                reported.execution_time.max(0.0)
            } else {
                0.0
            };
            TestResult::evaluate(
                case.name.clone(),
                reported.actual_output,
                case.expected_output.clone(),
                time,
                reported.error_message,
            )
        })
        .collect())
}

fn combine_output(mut stdout: String, stderr: &str) -> String {
    if !stderr.is_empty() {
        if !stdout.is_empty() && !stdout.ends_with('\n') {
            stdout.push('\n');
        }
        stdout.push_str(stderr);
    }
    stdout
}

fn describe_exit(exit_code: Option<i64>) -> String {
    match exit_code {
        None => "process terminated without an exit status".to_string(),
        Some(code) if code > 128 => {
            let signal = i32::try_from(code - 128)
                .ok()
                .and_then(|s| Signal::try_from(s).ok());
            match signal {
                Some(signal) => format!("process killed by signal {}", signal.as_str()),
                None => format!("process exited with status {}", code),
            }
        }
        Some(code) => format!("process exited with status {}", code),
    }
}
