//! Sandbox configuration
//!
//! Host-side knobs shared by every backend, plus isolate-specific settings.

/// Bounds applied to every isolation unit regardless of the request
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Maximum number of processes/threads per unit (default: 64)
    pub pids_limit: u32,
    /// Upper bound for the scratch area in bytes (default: 64MB)
    pub scratch_limit_bytes: u64,
    /// Captured bytes per stream before truncation (default: 1MB)
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            pids_limit: 64,
            scratch_limit_bytes: 64 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Settings for the isolate backend
#[derive(Debug, Clone, PartialEq)]
pub struct IsolateConfig {
    /// isolate executable
    pub bin: String,
    /// Worker ID for box ID allocation (0-9)
    pub worker_id: u32,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            bin: "isolate".to_string(),
            worker_id: 0,
        }
    }
}

impl IsolateConfig {
    /// Box ID for the n-th unit launched by this worker.
    /// Isolate only supports box IDs 0-9999, so each worker (0-9) cycles
    /// through its own range of 1000 IDs. The last ID of the range is
    /// reserved for the cgroup probe.
    pub fn box_id(&self, counter: u32) -> u32 {
        self.worker_offset() + counter % 999
    }

    /// Box ID used to probe for cgroup support
    pub fn probe_box_id(&self) -> u32 {
        self.worker_offset() + 999
    }

    fn worker_offset(&self) -> u32 {
        (self.worker_id % 10) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_ids_stay_in_worker_range() {
        let config = IsolateConfig {
            worker_id: 3,
            ..Default::default()
        };
        assert_eq!(config.box_id(0), 3000);
        assert_eq!(config.box_id(998), 3998);
        assert_eq!(config.box_id(999), 3000);
        assert_eq!(config.probe_box_id(), 3999);
    }

    #[test]
    fn test_worker_id_wraps() {
        let config = IsolateConfig {
            worker_id: 12,
            ..Default::default()
        };
        assert_eq!(config.box_id(5), 2005);
    }
}
