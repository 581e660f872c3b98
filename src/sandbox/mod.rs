//! Sandbox module - isolation backends
//!
//! This module provides the `SandboxBackend` abstraction and its
//! implementations:
//! - `DockerBackend`: one hardened container per request
//! - `IsolateBackend`: one isolate box per request
//! - `UnavailableBackend`: degraded mode, never runs anything
//!
//! The sandbox module does NOT:
//! - Interpret results into an execution status (that's the orchestrator's job)
//! - Know about languages or harnesses
//! - Compare outputs

pub mod config;
pub mod docker;
pub mod isolate_box;
pub mod meta;
pub mod unavailable;
pub mod workspace;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BackendKind, EngineConfig};
use crate::core::{ExecutionLimits, ResourceUsage};

pub use config::{IsolateConfig, SandboxConfig};
pub use docker::DockerBackend;
pub use isolate_box::IsolateBackend;
pub use meta::{parse_meta, IsolateMeta, IsolateStatus};
pub use unavailable::UnavailableBackend;
pub use workspace::Workspace;

/// Mount point of the workspace inside the unit
pub const CODE_DIR: &str = "/code";
/// Size-capped, non-executable scratch area inside the unit
pub const SCRATCH_DIR: &str = "/tmp";
/// nobody:nogroup
pub const SANDBOX_UID: u32 = 65534;
pub const SANDBOX_GID: u32 = 65534;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Environment variables (key=value)
    pub env: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.env = env.into_iter().map(|e| e.into()).collect();
        self
    }

    /// Run `script` through `/bin/sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("/bin/sh").with_args(["-c".to_string(), script.into()])
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self {
            program,
            args: iter.cloned().collect(),
            env: Vec::new(),
        }
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Hardening applied to every isolation unit
///
/// Built only through [`IsolationPolicy::hardened`]; the read-only code
/// mount, privilege and capability settings cannot be relaxed.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationPolicy {
    network: bool,
    memory_bytes: u64,
    cpus: f64,
    wall_timeout: f64,
    scratch_bytes: Option<u64>,
    pids_limit: u32,
}

impl IsolationPolicy {
    /// Policy for already-clamped limits and the language's wall timeout
    pub fn hardened(limits: &ExecutionLimits, wall_timeout: f64, sandbox: &SandboxConfig) -> Self {
        let scratch_bytes = limits
            .file_system_access
            .allows_scratch()
            .then(|| limits.disk_limit.min(sandbox.scratch_limit_bytes));

        Self {
            network: limits.network_access,
            memory_bytes: limits.memory_limit,
            cpus: limits.cpu_limit,
            wall_timeout,
            scratch_bytes,
            pids_limit: sandbox.pids_limit,
        }
    }

    pub fn network(&self) -> bool {
        self.network
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn cpus(&self) -> f64 {
        self.cpus
    }

    /// Seconds
    pub fn wall_timeout(&self) -> f64 {
        self.wall_timeout
    }

    /// `None` when the unit gets no writable scratch area
    pub fn scratch_bytes(&self) -> Option<u64> {
        self.scratch_bytes
    }

    pub fn pids_limit(&self) -> u32 {
        self.pids_limit
    }

    pub fn uid(&self) -> u32 {
        SANDBOX_UID
    }

    pub fn gid(&self) -> u32 {
        SANDBOX_GID
    }

    pub fn read_only_code(&self) -> bool {
        true
    }

    pub fn no_new_privileges(&self) -> bool {
        true
    }

    pub fn drop_all_capabilities(&self) -> bool {
        true
    }
}

/// Everything a backend needs to launch one isolation unit
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub request_id: String,
    /// Container image (ignored by backends that run host runtimes)
    pub image: String,
    pub command: CommandSpec,
    /// Host directory mounted read-only at `CODE_DIR`
    pub workspace: PathBuf,
    pub policy: IsolationPolicy,
    /// Per-stream capture cap
    pub max_output_bytes: usize,
}

/// Raw outcome of one isolation unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// `None` when the unit was killed before reporting one
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub resource_usage: ResourceUsage,
    /// The wall-clock timeout fired and the unit was killed
    pub timed_out: bool,
    /// The isolation layer reported an out-of-memory kill
    pub oom_killed: bool,
    /// Seconds
    pub wall_time: f64,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("isolate error: {0}")]
    Isolate(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("image '{0}' is not available on the sandbox host")]
    ImageMissing(String),
    #[error("failed to launch isolation unit: {0}")]
    Launch(String),
    #[error("isolation backend did not respond within {0:.1}s")]
    Stalled(f64),
}

/// An isolation backend
///
/// `run` launches exactly one unit, enforces the policy and wall timeout,
/// and tears the unit down on every path before returning.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    /// Why `is_available` returned false
    fn unavailable_reason(&self) -> String {
        format!("{} backend is not reachable", self.name())
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutcome, BackendError>;

    /// Release backend-wide resources at process exit
    async fn shutdown(&self) {}
}

/// Build the backend selected by configuration
///
/// A backend that cannot be constructed degrades to `UnavailableBackend`.
pub fn connect_backend(config: &EngineConfig) -> Arc<dyn SandboxBackend> {
    match config.backend {
        BackendKind::Docker => match DockerBackend::connect() {
            Ok(backend) => {
                info!("Using docker sandbox backend");
                Arc::new(backend)
            }
            Err(e) => {
                warn!("Docker backend unavailable, running in degraded mode: {}", e);
                Arc::new(UnavailableBackend::new(format!(
                    "docker backend could not be initialized: {}",
                    e
                )))
            }
        },
        BackendKind::Isolate => {
            info!(
                "Using isolate sandbox backend ({}, worker {})",
                config.isolate.bin, config.isolate.worker_id
            );
            Arc::new(IsolateBackend::new(config.isolate.clone()))
        }
        BackendKind::None => {
            warn!("Sandbox backend disabled by configuration, code will not be executed");
            Arc::new(UnavailableBackend::new(
                "sandbox backend is disabled by configuration",
            ))
        }
    }
}

/// Capped capture that keeps the beginning and the end of a stream
///
/// The end is kept because the harness report is the last line printed.
#[derive(Debug)]
pub struct OutputBuffer {
    head_limit: usize,
    tail_limit: usize,
    head: Vec<u8>,
    tail: VecDeque<u8>,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        let head_limit = limit / 2;
        Self {
            head_limit,
            tail_limit: limit - head_limit,
            head: Vec::new(),
            tail: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, mut bytes: &[u8]) {
        if self.head.len() < self.head_limit {
            let take = bytes.len().min(self.head_limit - self.head.len());
            self.head.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }

        for &byte in bytes {
            if self.tail.len() == self.tail_limit {
                if self.tail.pop_front().is_none() {
                    self.dropped += 1;
                    continue;
                }
                self.dropped += 1;
            }
            self.tail.push_back(byte);
        }
    }

    pub fn truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.head).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n[... {} bytes truncated ...]\n", self.dropped));
        }
        let tail: Vec<u8> = self.tail.into_iter().collect();
        text.push_str(&String::from_utf8_lossy(&tail));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileSystemAccess;

    #[test]
    fn test_command_spec() {
        let cmd = CommandSpec::from_vec(&["python3".into(), "-B".into(), "/code/a.py".into()]);
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.to_vec(), vec!["python3", "-B", "/code/a.py"]);

        let shell = CommandSpec::shell("javac A.java && java A");
        assert_eq!(shell.to_vec(), vec!["/bin/sh", "-c", "javac A.java && java A"]);
        assert_eq!(CommandSpec::from_vec(&[]).program, "");
    }

    #[test]
    fn test_hardened_policy() {
        let limits = ExecutionLimits {
            disk_limit: 512 * 1024 * 1024,
            ..Default::default()
        };
        let sandbox = SandboxConfig::default();
        let policy = IsolationPolicy::hardened(&limits, 10.0, &sandbox);

        assert!(!policy.network());
        assert_eq!(policy.memory_bytes(), limits.memory_limit);
        assert_eq!(policy.cpus(), 0.5);
        assert_eq!(policy.wall_timeout(), 10.0);
        assert_eq!(policy.scratch_bytes(), Some(sandbox.scratch_limit_bytes));
        assert_eq!(policy.pids_limit(), 64);
        assert_eq!((policy.uid(), policy.gid()), (65534, 65534));
        assert!(policy.read_only_code());
        assert!(policy.no_new_privileges());
        assert!(policy.drop_all_capabilities());
    }

    #[test]
    fn test_policy_without_scratch() {
        let limits = ExecutionLimits {
            file_system_access: FileSystemAccess::ReadOnly,
            network_access: true,
            ..Default::default()
        };
        let policy = IsolationPolicy::hardened(&limits, 1.0, &SandboxConfig::default());
        assert_eq!(policy.scratch_bytes(), None);
        assert!(policy.network());
    }

    #[test]
    fn test_output_buffer_under_limit() {
        let mut buffer = OutputBuffer::new(16);
        buffer.push(b"hello ");
        buffer.push(b"world");
        assert!(!buffer.truncated());
        assert_eq!(buffer.into_string(), "hello world");
    }

    #[test]
    fn test_output_buffer_keeps_head_and_tail() {
        let mut buffer = OutputBuffer::new(8);
        buffer.push(b"abcd");
        buffer.push(b"0123456789");
        buffer.push(b"wxyz");
        assert!(buffer.truncated());
        assert_eq!(
            buffer.into_string(),
            "abcd\n[... 10 bytes truncated ...]\nwxyz"
        );
    }

    #[test]
    fn test_output_buffer_zero_limit() {
        let mut buffer = OutputBuffer::new(0);
        buffer.push(b"abc");
        assert!(buffer.truncated());
        assert_eq!(buffer.into_string(), "\n[... 3 bytes truncated ...]\n");
    }
}
