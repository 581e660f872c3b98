//! Engine configuration from environment variables
//!
//! `main` loads `.env` with dotenvy first; everything here only reads the
//! resulting environment.

use std::path::PathBuf;
use std::str::FromStr;

use crate::core::LimitPolicy;
use crate::error::EngineError;
use crate::sandbox::{IsolateConfig, SandboxConfig};

const MIB: u64 = 1024 * 1024;

/// Which isolation backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Isolate,
    /// Degraded mode: nothing is ever executed
    None,
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "isolate" => Ok(BackendKind::Isolate),
            "none" | "disabled" => Ok(BackendKind::None),
            other => Err(EngineError::Config(format!(
                "SANDBOX_BACKEND must be docker, isolate or none, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendKind,
    pub sandbox: SandboxConfig,
    pub policy: LimitPolicy,
    /// Optional language file replacing the built-in profiles
    pub languages_path: Option<PathBuf>,
    pub isolate: IsolateConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Docker,
            sandbox: SandboxConfig::default(),
            policy: LimitPolicy::default(),
            languages_path: None,
            isolate: IsolateConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("SANDBOX_BACKEND") {
            config.backend = value.parse()?;
        }

        if let Some(value) = get("SANDBOX_PIDS_LIMIT") {
            config.sandbox.pids_limit = parse_positive("SANDBOX_PIDS_LIMIT", &value)?;
        }
        if let Some(value) = get("SANDBOX_SCRATCH_MB") {
            config.sandbox.scratch_limit_bytes =
                parse_positive::<u64>("SANDBOX_SCRATCH_MB", &value)? * MIB;
        }
        if let Some(value) = get("SANDBOX_MAX_OUTPUT_KB") {
            config.sandbox.max_output_bytes =
                parse_positive::<usize>("SANDBOX_MAX_OUTPUT_KB", &value)? * 1024;
        }

        if let Some(value) = get("SANDBOX_MAX_TIMEOUT_SECS") {
            config.policy.max_timeout = parse_positive_f64("SANDBOX_MAX_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("SANDBOX_MAX_MEMORY_MB") {
            config.policy.max_memory = parse_positive::<u64>("SANDBOX_MAX_MEMORY_MB", &value)? * MIB;
        }
        if let Some(value) = get("SANDBOX_MAX_CPUS") {
            config.policy.max_cpu = parse_positive_f64("SANDBOX_MAX_CPUS", &value)?;
        }
        if let Some(value) = get("SANDBOX_ALLOW_NETWORK") {
            config.policy.allow_network = parse_bool("SANDBOX_ALLOW_NETWORK", &value)?;
        }

        config.languages_path = get("LANGUAGES_CONFIG").map(PathBuf::from);

        if let Some(value) = get("ISOLATE_BIN") {
            config.isolate.bin = value;
        }
        if let Some(value) = get("ISOLATE_WORKER_ID") {
            config.isolate.worker_id = value.trim().parse().map_err(|_| {
                EngineError::Config(format!("ISOLATE_WORKER_ID must be an integer, got '{}'", value))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let policy = &self.policy;
        if policy.max_timeout < policy.min_timeout {
            return Err(EngineError::Config(format!(
                "SANDBOX_MAX_TIMEOUT_SECS must be at least {}",
                policy.min_timeout
            )));
        }
        if policy.max_memory < policy.min_memory {
            return Err(EngineError::Config(format!(
                "SANDBOX_MAX_MEMORY_MB must be at least {}",
                policy.min_memory / MIB
            )));
        }
        if policy.max_cpu < policy.min_cpu {
            return Err(EngineError::Config(format!(
                "SANDBOX_MAX_CPUS must be at least {}",
                policy.min_cpu
            )));
        }
        Ok(())
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T, EngineError>
where
    T: FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(EngineError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}

fn parse_positive_f64(key: &str, value: &str) -> Result<f64, EngineError> {
    match value.trim().parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed > 0.0 => Ok(parsed),
        _ => Err(EngineError::Config(format!(
            "{} must be a positive number, got '{}'",
            key, value
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, EngineError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
