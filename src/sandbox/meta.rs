//! Isolate meta file parser
//!
//! Parses the meta file isolate writes after a run.

/// Raw execution status from isolate
#[derive(Debug, Clone, PartialEq)]
pub enum IsolateStatus {
    /// Program exited normally
    Ok,
    /// Time limit exceeded
    TimeOut,
    /// Killed by signal
    Signal(i32),
    /// Runtime error (non-zero exit)
    RuntimeError,
    /// Internal error in isolate
    InternalError,
}

/// Parsed isolate meta file contents
#[derive(Debug, Clone, PartialEq)]
pub struct IsolateMeta {
    /// CPU time used in milliseconds
    pub time_ms: u64,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u64,
    /// Memory used in KB (from cg-mem or max-rss)
    pub memory_kb: u64,
    /// Exit code of the process
    pub exit_code: i32,
    pub status: IsolateStatus,
    /// The cgroup OOM killer fired
    pub oom_killed: bool,
    /// Human-readable explanation from isolate
    pub message: Option<String>,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            time_ms: 0,
            wall_time_ms: 0,
            memory_kb: 0,
            exit_code: 0,
            status: IsolateStatus::Ok,
            oom_killed: false,
            message: None,
        }
    }
}

impl IsolateMeta {
    /// Exit code in shell convention (128 + signal for signal deaths)
    pub fn shell_exit_code(&self) -> i64 {
        match self.status {
            IsolateStatus::Signal(sig) if sig > 0 => 128 + i64::from(sig),
            _ => i64::from(self.exit_code),
        }
    }
}

/// Parse isolate meta file content
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut status_str = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "time" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.time_ms = (t * 1000.0) as u64;
                }
            }
            "time-wall" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.wall_time_ms = (t * 1000.0) as u64;
                }
            }
            "cg-mem" | "max-rss" => {
                // cg-mem for cgroups, max-rss for non-cgroups (both in KB)
                if let Ok(m) = value.parse::<u64>() {
                    meta.memory_kb = meta.memory_kb.max(m);
                }
            }
            "cg-oom-killed" => {
                meta.oom_killed = value == "1";
            }
            "status" => {
                status_str = value.to_string();
            }
            "exitcode" => {
                meta.exit_code = value.parse().unwrap_or(0);
            }
            "exitsig" => {
                if let Ok(sig) = value.parse::<i32>() {
                    meta.status = IsolateStatus::Signal(sig);
                }
            }
            "message" => {
                meta.message = Some(value.to_string());
            }
            _ => {}
        }
    }

    // A timeout wins over the signal that enforced it
    if status_str == "TO" {
        meta.status = IsolateStatus::TimeOut;
    } else if meta.status == IsolateStatus::Ok {
        meta.status = match status_str.as_str() {
            "SG" => IsolateStatus::Signal(0),
            "RE" => IsolateStatus::RuntimeError,
            "XX" => IsolateStatus::InternalError,
            "" if meta.exit_code == 0 => IsolateStatus::Ok,
            _ => IsolateStatus::RuntimeError,
        };
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_success() {
        let content = "time:0.015\ntime-wall:0.020\ncg-mem:1024\nexitcode:0\n";
        let meta = parse_meta(content);

        assert_eq!(meta.time_ms, 15);
        assert_eq!(meta.wall_time_ms, 20);
        assert_eq!(meta.memory_kb, 1024);
        assert_eq!(meta.exit_code, 0);
        assert_eq!(meta.status, IsolateStatus::Ok);
        assert!(!meta.oom_killed);
    }

    #[test]
    fn test_parse_meta_timeout() {
        let content = "time:1.000\nstatus:TO\nexitsig:9\nmessage:Time limit exceeded (wall clock)\n";
        let meta = parse_meta(content);

        assert_eq!(meta.time_ms, 1000);
        assert_eq!(meta.status, IsolateStatus::TimeOut);
        assert_eq!(
            meta.message.as_deref(),
            Some("Time limit exceeded (wall clock)")
        );
    }

    #[test]
    fn test_parse_meta_signal() {
        let content = "status:SG\nexitsig:11\n";
        let meta = parse_meta(content);

        assert_eq!(meta.status, IsolateStatus::Signal(11));
        assert_eq!(meta.shell_exit_code(), 139);
    }

    #[test]
    fn test_parse_meta_oom() {
        let content = "cg-mem:131072\ncg-oom-killed:1\nstatus:SG\nexitsig:9\n";
        let meta = parse_meta(content);

        assert!(meta.oom_killed);
        assert_eq!(meta.memory_kb, 131072);
        assert_eq!(meta.status, IsolateStatus::Signal(9));
    }

    #[test]
    fn test_parse_meta_runtime_error() {
        let meta = parse_meta("status:RE\nexitcode:3\n");
        assert_eq!(meta.status, IsolateStatus::RuntimeError);
        assert_eq!(meta.shell_exit_code(), 3);
    }
}
