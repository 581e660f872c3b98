//! Isolate backend
//!
//! Runs each request in a fresh isolate box with cgroup limits. Isolate uses
//! the host's runtimes, so `RunSpec::image` is ignored here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::config::IsolateConfig;
use super::meta::{parse_meta, IsolateMeta, IsolateStatus};
use super::{
    BackendError, OutputBuffer, RunOutcome, RunSpec, SandboxBackend, CODE_DIR, SCRATCH_DIR,
};
use crate::core::ResourceUsage;

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
/// Grace period on top of isolate's own wall-time limit
const WALL_GRACE_SECS: f64 = 5.0;

pub struct IsolateBackend {
    config: IsolateConfig,
    counter: AtomicU32,
    cgroups: OnceCell<bool>,
}

impl IsolateBackend {
    pub fn new(config: IsolateConfig) -> Self {
        Self {
            config,
            counter: AtomicU32::new(0),
            cgroups: OnceCell::new(),
        }
    }

    /// Check if isolate cgroups are available (probed once)
    async fn cgroups_available(&self) -> bool {
        *self
            .cgroups
            .get_or_init(|| async {
                let box_id = self.config.probe_box_id().to_string();

                // Try to initialize a test box with cgroups
                let test_result = Command::new(&self.config.bin)
                    .args(["--box-id", &box_id, "--cg", "--init"])
                    .output()
                    .await;

                // Cleanup
                let _ = Command::new(&self.config.bin)
                    .args(["--box-id", &box_id, "--cg", "--cleanup"])
                    .output()
                    .await;

                match test_result {
                    Ok(r) => r.status.success(),
                    Err(e) => {
                        warn!("Failed to run {}: {}", self.config.bin, e);
                        false
                    }
                }
            })
            .await
    }

    async fn run_in_box(
        &self,
        isolate_box: &IsolateBox,
        spec: &RunSpec,
    ) -> Result<RunOutcome, BackendError> {
        let meta_file = tempfile::Builder::new()
            .prefix("codeguard-meta-")
            .tempfile()?;
        let args = isolate_args(spec, isolate_box.box_id, meta_file.path());
        debug!("Running isolate with args: {:?}", args);

        let started = Instant::now();
        let limit = Duration::from_secs_f64(spec.policy.wall_timeout() + WALL_GRACE_SECS);
        let output = Command::new(&self.config.bin)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, output).await {
            Ok(result) => Some(result?),
            Err(_) => {
                warn!(
                    "isolate box {} did not finish within {:.1}s, killed",
                    isolate_box.box_id,
                    limit.as_secs_f64()
                );
                None
            }
        };
        let wall_time = started.elapsed().as_secs_f64();

        let Some(output) = output else {
            return Ok(RunOutcome {
                timed_out: true,
                wall_time,
                ..Default::default()
            });
        };

        let meta_content = fs::read_to_string(meta_file.path())
            .await
            .unwrap_or_default();
        let meta = parse_meta(&meta_content);

        if meta.status == IsolateStatus::InternalError {
            let message = meta
                .message
                .clone()
                .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
            return Err(BackendError::Isolate(message));
        }

        let stdout = read_capped(&isolate_box.work_dir().join(STDOUT_FILE), spec.max_output_bytes).await;
        let stderr = read_capped(&isolate_box.work_dir().join(STDERR_FILE), spec.max_output_bytes).await;

        Ok(into_outcome(&meta, stdout, stderr, wall_time))
    }
}

#[async_trait]
impl SandboxBackend for IsolateBackend {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn is_available(&self) -> bool {
        self.cgroups_available().await
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutcome, BackendError> {
        let box_id = self
            .config
            .box_id(self.counter.fetch_add(1, Ordering::Relaxed));
        let isolate_box = IsolateBox::init(&self.config.bin, box_id).await?;

        let outcome = self.run_in_box(&isolate_box, &spec).await;
        isolate_box.cleanup().await;
        outcome
    }
}

/// An initialized box; cleaned up explicitly or, failing that, on drop
struct IsolateBox {
    bin: String,
    box_id: u32,
    box_path: PathBuf,
    cleaned: bool,
}

impl IsolateBox {
    async fn init(bin: &str, box_id: u32) -> Result<Self, BackendError> {
        let box_id_str = box_id.to_string();

        // Clean up any existing box
        let _ = Command::new(bin)
            .args(["--box-id", &box_id_str, "--cg", "--cleanup"])
            .output()
            .await;

        let output = Command::new(bin)
            .args(["--box-id", &box_id_str, "--cg", "--init"])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Launch(format!(
                "isolate --init failed for box {}: {}",
                box_id,
                stderr.trim()
            )));
        }

        let box_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        info!("Initialized isolate box {} at {}", box_id, box_path.display());

        Ok(Self {
            bin: bin.to_string(),
            box_id,
            box_path,
            cleaned: false,
        })
    }

    /// The box/box subdirectory (working directory for programs)
    fn work_dir(&self) -> PathBuf {
        self.box_path.join("box")
    }

    async fn cleanup(mut self) {
        match cleanup_command(&self.bin, self.box_id).output().await {
            Ok(_) => debug!("Cleaned up isolate box {}", self.box_id),
            Err(e) => warn!("Failed to clean up isolate box {}: {}", self.box_id, e),
        }
        self.cleaned = true;
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to clean up isolate box {}", self.box_id);
            return;
        };
        let mut command = cleanup_command(&self.bin, self.box_id);
        let box_id = self.box_id;
        handle.spawn(async move {
            if let Err(e) = command.output().await {
                warn!("Failed to clean up isolate box {}: {}", box_id, e);
            }
        });
    }
}

fn cleanup_command(bin: &str, box_id: u32) -> Command {
    let mut command = Command::new(bin);
    command.args(["--box-id", &box_id.to_string(), "--cg", "--cleanup"]);
    command
}

/// isolate command line for a run spec
pub fn isolate_args(spec: &RunSpec, box_id: u32, meta_file: &Path) -> Vec<String> {
    let policy = &spec.policy;
    let wall_time_secs = policy.wall_timeout();
    let cpu_time_secs = wall_time_secs * policy.cpus().max(0.1);
    let memory_limit_kb = policy.memory_bytes() / 1024;

    // Output files are written by the sandboxed process, so the size cap
    // must leave room for them even without scratch space.
    let fsize_bytes = policy
        .scratch_bytes()
        .unwrap_or(0)
        .max(spec.max_output_bytes as u64);
    let fsize_kb = fsize_bytes / 1024 + 1;

    let mut args = vec![
        "--box-id".to_string(),
        box_id.to_string(),
        "--cg".to_string(),
        format!("--cg-mem={}", memory_limit_kb),
        format!("--time={}", cpu_time_secs),
        format!("--wall-time={}", wall_time_secs),
        format!("--meta={}", meta_file.display()),
        format!("--stdout={}", STDOUT_FILE),
        format!("--stderr={}", STDERR_FILE),
        format!("--processes={}", policy.pids_limit()),
        "--open-files=256".to_string(),
        format!("--fsize={}", fsize_kb),
        // Mount directories needed for runtime
        "--dir=/usr".to_string(),
        "--dir=/lib".to_string(),
        "--dir=/lib64:maybe".to_string(),
        "--dir=/etc:noexec".to_string(),
        format!("--dir={}={}", CODE_DIR, spec.workspace.display()),
    ];

    if policy.scratch_bytes().is_some() {
        args.push(format!("--dir={}:tmp:noexec", SCRATCH_DIR));
    }
    if policy.network() {
        args.push("--share-net".to_string());
    }

    args.extend([
        "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
        format!("--env=HOME={}", SCRATCH_DIR),
        "--env=PYTHONDONTWRITEBYTECODE=1".to_string(),
        "--env=PYTHONUNBUFFERED=1".to_string(),
    ]);
    args.extend(spec.command.env.iter().map(|e| format!("--env={}", e)));

    args.push("--run".to_string());
    args.push("--".to_string());

    // Prepend /usr/bin/ to the command if it's not an absolute path
    let mut cmd_iter = spec.command.to_vec().into_iter();
    if let Some(cmd) = cmd_iter.next() {
        if cmd.starts_with('/') || cmd.starts_with("./") {
            args.push(cmd);
        } else {
            args.push(format!("/usr/bin/{}", cmd));
        }
        args.extend(cmd_iter);
    }

    args
}

fn into_outcome(meta: &IsolateMeta, stdout: String, stderr: String, wall_time: f64) -> RunOutcome {
    let timed_out = meta.status == IsolateStatus::TimeOut;
    let memory = meta.memory_kb * 1024;

    RunOutcome {
        exit_code: (!timed_out).then(|| meta.shell_exit_code()),
        stdout,
        stderr,
        resource_usage: ResourceUsage {
            cpu_time: meta.time_ms as f64 / 1000.0,
            memory_peak: memory,
            // isolate only reports the peak
            memory_average: memory,
            disk_read: 0,
            disk_write: 0,
        },
        timed_out,
        oom_killed: meta.oom_killed,
        wall_time,
    }
}

async fn read_capped(path: &Path, limit: usize) -> String {
    let mut buffer = OutputBuffer::new(limit);
    match fs::read(path).await {
        Ok(bytes) => buffer.push(&bytes),
        Err(e) => debug!("No output file {}: {}", path.display(), e),
    }
    buffer.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionLimits, FileSystemAccess};
    use crate::sandbox::{CommandSpec, IsolationPolicy, SandboxConfig};

    fn spec(limits: ExecutionLimits, command: CommandSpec) -> RunSpec {
        RunSpec {
            request_id: "req".to_string(),
            image: "ignored".to_string(),
            command,
            workspace: PathBuf::from("/tmp/codeguard-ws"),
            policy: IsolationPolicy::hardened(&limits, 4.0, &SandboxConfig::default()),
            max_output_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn test_isolate_args() {
        let command = CommandSpec::from_vec(&["python3".into(), "-B".into(), "/code/solution.py".into()]);
        let args = isolate_args(
            &spec(ExecutionLimits::default(), command),
            7,
            Path::new("/tmp/meta.txt"),
        );

        assert_eq!(&args[..2], &["--box-id".to_string(), "7".to_string()]);
        assert!(args.contains(&"--cg-mem=131072".to_string()));
        assert!(args.contains(&"--time=2".to_string()));
        assert!(args.contains(&"--wall-time=4".to_string()));
        assert!(args.contains(&"--meta=/tmp/meta.txt".to_string()));
        assert!(args.contains(&"--processes=64".to_string()));
        assert!(args.contains(&"--dir=/code=/tmp/codeguard-ws".to_string()));
        assert!(args.contains(&"--dir=/tmp:tmp:noexec".to_string()));
        assert!(!args.contains(&"--share-net".to_string()));

        let run = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(
            &args[run + 1..],
            &["/usr/bin/python3", "-B", "/code/solution.py"]
        );
    }

    #[test]
    fn test_isolate_args_without_scratch_with_network() {
        let limits = ExecutionLimits {
            file_system_access: FileSystemAccess::ReadOnly,
            network_access: true,
            ..Default::default()
        };
        let args = isolate_args(
            &spec(limits, CommandSpec::shell("exit 0")),
            1,
            Path::new("/m"),
        );
        assert!(!args.iter().any(|a| a.starts_with("--dir=/tmp")));
        assert!(args.contains(&"--share-net".to_string()));
        // output still fits under the file size cap
        assert!(args.contains(&"--fsize=1025".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("exit 0"));
    }

    #[test]
    fn test_into_outcome() {
        let meta = parse_meta("time:0.250\ncg-mem:2048\nexitcode:1\nstatus:RE\n");
        let outcome = into_outcome(&meta, "out".into(), "err".into(), 0.3);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.timed_out);
        assert_eq!(outcome.resource_usage.cpu_time, 0.25);
        assert_eq!(outcome.resource_usage.memory_peak, 2048 * 1024);

        let meta = parse_meta("status:TO\n");
        let outcome = into_outcome(&meta, String::new(), String::new(), 4.0);
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, None);

        let meta = parse_meta("cg-oom-killed:1\nstatus:SG\nexitsig:9\n");
        let outcome = into_outcome(&meta, String::new(), String::new(), 0.1);
        assert!(outcome.oom_killed);
        assert_eq!(outcome.exit_code, Some(137));
    }
}
