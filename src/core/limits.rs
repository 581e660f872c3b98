//! Resource limits requested by callers and the policy that bounds them

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// How much of the filesystem the submitted program may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSystemAccess {
    /// Code is readable, nothing is writable
    None,
    /// Same mounts as `None`; kept distinct for callers that record intent
    ReadOnly,
    /// Code is readable and a size-capped scratch area is writable
    #[default]
    TempOnly,
}

impl FileSystemAccess {
    pub fn allows_scratch(&self) -> bool {
        matches!(self, FileSystemAccess::TempOnly)
    }
}

/// Caller-supplied execution limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock timeout in seconds
    pub timeout: f64,
    /// Memory ceiling in bytes
    pub memory_limit: u64,
    /// CPU ceiling in (fractional) cores
    pub cpu_limit: f64,
    /// Scratch space ceiling in bytes
    pub disk_limit: u64,
    pub network_access: bool,
    pub file_system_access: FileSystemAccess,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: 10.0,
            memory_limit: 128 * MIB,
            cpu_limit: 0.5,
            disk_limit: 64 * MIB,
            network_access: false,
            file_system_access: FileSystemAccess::TempOnly,
        }
    }
}

impl ExecutionLimits {
    /// Return the limits actually enforced under `policy`.
    ///
    /// Non-finite and non-positive values fall back to the policy defaults;
    /// everything else is clamped into the policy range.
    pub fn clamp(&self, policy: &LimitPolicy) -> ExecutionLimits {
        let defaults = &policy.defaults;
        ExecutionLimits {
            timeout: clamp_f64(
                self.timeout,
                defaults.timeout,
                policy.min_timeout,
                policy.max_timeout,
            ),
            memory_limit: clamp_u64(
                self.memory_limit,
                defaults.memory_limit,
                policy.min_memory,
                policy.max_memory,
            ),
            cpu_limit: clamp_f64(
                self.cpu_limit,
                defaults.cpu_limit,
                policy.min_cpu,
                policy.max_cpu,
            ),
            disk_limit: clamp_u64(
                self.disk_limit,
                defaults.disk_limit,
                policy.min_disk,
                policy.max_disk,
            ),
            network_access: self.network_access && policy.allow_network,
            file_system_access: self.file_system_access,
        }
    }
}

fn clamp_f64(value: f64, default: f64, min: f64, max: f64) -> f64 {
    let value = if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    };
    value.max(min).min(max)
}

fn clamp_u64(value: u64, default: u64, min: u64, max: u64) -> u64 {
    let value = if value == 0 { default } else { value };
    value.max(min).min(max)
}

/// Host-side bounds applied to every request
#[derive(Debug, Clone, PartialEq)]
pub struct LimitPolicy {
    pub defaults: ExecutionLimits,
    pub min_timeout: f64,
    pub max_timeout: f64,
    pub min_memory: u64,
    pub max_memory: u64,
    pub min_cpu: f64,
    pub max_cpu: f64,
    pub min_disk: u64,
    pub max_disk: u64,
    /// When false, `network_access` requests are ignored
    pub allow_network: bool,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            defaults: ExecutionLimits::default(),
            min_timeout: 0.1,
            max_timeout: 30.0,
            min_memory: 16 * MIB,
            max_memory: 1024 * MIB,
            min_cpu: 0.1,
            max_cpu: 2.0,
            min_disk: MIB,
            max_disk: 1024 * MIB,
            allow_network: false,
        }
    }
}
