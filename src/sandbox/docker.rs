//! Docker backend
//!
//! One container per request, created with the hardened host config from
//! [`container_config`]. The container is force-removed on every path: by
//! an explicit remove after collection, and by a drop guard otherwise.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendError, OutputBuffer, RunOutcome, RunSpec, SandboxBackend, CODE_DIR, SCRATCH_DIR,
};
use crate::core::ResourceUsage;

/// Label carrying the request id on every container
pub const REQUEST_LABEL: &str = "codeguard.request_id";

/// Time allowed on top of the wall timeout for daemon round trips
const DAEMON_GRACE: Duration = Duration::from_secs(15);

pub struct DockerBackend {
    docker: Docker,
    daemon_grace: Duration,
}

impl DockerBackend {
    /// Connect using `DOCKER_HOST` or the platform's local defaults
    pub fn connect() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            daemon_grace: DAEMON_GRACE,
        }
    }

    pub fn with_daemon_grace(mut self, grace: Duration) -> Self {
        self.daemon_grace = grace;
        self
    }

    async fn ensure_image(&self, image: &str) -> Result<(), BackendError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(BackendError::ImageMissing(image.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_container(
        &self,
        guard: &ContainerGuard,
        spec: &RunSpec,
    ) -> Result<RunOutcome, BackendError> {
        let id = guard.id.as_str();
        let started = Instant::now();

        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;

        let mut wait_stream = Box::pin(
            self.docker
                .wait_container(id, None::<WaitContainerOptions>),
        );
        let mut stats_stream = Box::pin(self.docker.stats(
            id,
            Some(StatsOptions {
                stream: true,
                one_shot: false,
            }),
        ));
        let deadline = tokio::time::sleep(Duration::from_secs_f64(spec.policy.wall_timeout()));
        tokio::pin!(deadline);

        let mut sampler = UsageSampler::default();
        let mut stats_open = true;
        let mut timed_out = false;

        loop {
            tokio::select! {
                // bollard reports non-zero exits as errors; either way the unit is done
                _ = wait_stream.next() => break,
                _ = &mut deadline => {
                    warn!(
                        "Container {} for request {} exceeded {:.1}s wall timeout, killing",
                        id,
                        spec.request_id,
                        spec.policy.wall_timeout()
                    );
                    timed_out = true;
                    if let Err(e) = self
                        .docker
                        .kill_container(id, None::<KillContainerOptions>)
                        .await
                    {
                        debug!("Kill of container {} failed (already stopped?): {}", id, e);
                    }
                    break;
                }
                sample = stats_stream.next(), if stats_open => match sample {
                    Some(Ok(stats)) => match serde_json::to_value(&stats) {
                        Ok(value) => sampler.observe_value(&value),
                        Err(e) => debug!("Unreadable stats sample: {}", e),
                    },
                    Some(Err(e)) => {
                        debug!("Stats stream for container {} failed: {}", id, e);
                        stats_open = false;
                    }
                    None => stats_open = false,
                },
            }
        }
        let wall_time = started.elapsed().as_secs_f64();

        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = inspect.state.unwrap_or_default();
        let oom_killed = state.oom_killed.unwrap_or(false);
        let exit_code = if timed_out { None } else { state.exit_code };

        let (stdout, stderr) = self.collect_logs(id, spec.max_output_bytes).await?;

        Ok(RunOutcome {
            exit_code,
            stdout,
            stderr,
            resource_usage: sampler.finish(),
            timed_out,
            oom_killed,
            wall_time,
        })
    }

    async fn collect_logs(
        &self,
        id: &str,
        max_output_bytes: usize,
    ) -> Result<(String, String), BackendError> {
        let mut output_stream = self.docker.logs(
            id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut stdout = OutputBuffer::new(max_output_bytes);
        let mut stderr = OutputBuffer::new(max_output_bytes);
        while let Some(log_result) = output_stream.next().await {
            match log_result? {
                LogOutput::StdOut { message } => stdout.push(&message),
                LogOutput::StdErr { message } => stderr.push(&message),
                _ => {}
            }
        }

        if stdout.truncated() || stderr.truncated() {
            warn!("Output of container {} was truncated", id);
        }
        Ok((stdout.into_string(), stderr.into_string()))
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        match self.docker.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Docker daemon is not reachable: {}", e);
                false
            }
        }
    }

    /// Bounded by the wall timeout plus the daemon grace; a stalled daemon
    /// drops the container guard, which removes the container.
    async fn run(&self, spec: RunSpec) -> Result<RunOutcome, BackendError> {
        let budget = Duration::from_secs_f64(spec.policy.wall_timeout()) + self.daemon_grace;
        match tokio::time::timeout(budget, self.run_unit(&spec)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Docker daemon stalled on request {} for {:.1}s, giving up",
                    spec.request_id,
                    budget.as_secs_f64()
                );
                Err(BackendError::Stalled(budget.as_secs_f64()))
            }
        }
    }
}

impl DockerBackend {
    async fn run_unit(&self, spec: &RunSpec) -> Result<RunOutcome, BackendError> {
        self.ensure_image(&spec.image).await?;

        let name = format!("codeguard-{}", Uuid::new_v4());
        let options = Some(CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        });
        let container = self
            .docker
            .create_container(options, container_config(spec))
            .await?;
        let guard = ContainerGuard::new(self.docker.clone(), container.id);
        info!(
            "Created container {} ({}) for request {}",
            name, spec.image, spec.request_id
        );

        let outcome = self.run_container(&guard, spec).await;
        guard.remove().await;
        outcome
    }
}

/// Container definition for a run spec
pub fn container_config(spec: &RunSpec) -> ContainerCreateBody {
    let policy = &spec.policy;

    let mut tmpfs = HashMap::new();
    if let Some(bytes) = policy.scratch_bytes() {
        tmpfs.insert(
            SCRATCH_DIR.to_string(),
            format!("rw,noexec,nosuid,nodev,size={}", bytes),
        );
    }

    let mut env = vec![
        format!("HOME={}", SCRATCH_DIR),
        "PYTHONDONTWRITEBYTECODE=1".to_string(),
        "PYTHONUNBUFFERED=1".to_string(),
    ];
    env.extend(spec.command.env.iter().cloned());

    let mut labels = HashMap::new();
    labels.insert(REQUEST_LABEL.to_string(), spec.request_id.clone());

    let memory = i64::try_from(policy.memory_bytes()).unwrap_or(i64::MAX);
    let mut security_opt = Vec::new();
    if policy.no_new_privileges() {
        security_opt.push("no-new-privileges:true".to_string());
    }
    let bind_mode = if policy.read_only_code() { "ro" } else { "rw" };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.to_vec()),
        env: Some(env),
        user: Some(format!("{}:{}", policy.uid(), policy.gid())),
        working_dir: Some(CODE_DIR.to_string()),
        network_disabled: Some(!policy.network()),
        labels: Some(labels),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(HostConfig {
            binds: Some(vec![format!(
                "{}:{}:{}",
                spec.workspace.display(),
                CODE_DIR,
                bind_mode
            )]),
            readonly_rootfs: Some(true),
            cap_drop: policy
                .drop_all_capabilities()
                .then(|| vec!["ALL".to_string()]),
            security_opt: Some(security_opt),
            network_mode: Some(if policy.network() { "bridge" } else { "none" }.to_string()),
            memory: Some(memory),
            memory_swap: Some(memory),
            nano_cpus: Some((policy.cpus() * 1e9) as i64),
            pids_limit: Some(i64::from(policy.pids_limit())),
            tmpfs: (!tmpfs.is_empty()).then_some(tmpfs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Force-removes the container unless `remove` already did
struct ContainerGuard {
    docker: Docker,
    id: String,
    removed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, id: String) -> Self {
        Self {
            docker,
            id,
            removed: false,
        }
    }

    async fn remove(mut self) {
        match self.docker.remove_container(&self.id, Some(remove_options())).await {
            Ok(()) => debug!("Removed container {}", self.id),
            Err(e) => warn!("Failed to remove container {}: {}", self.id, e),
        }
        self.removed = true;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to remove container {}, leaking it", self.id);
            return;
        };
        let docker = self.docker.clone();
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            if let Err(e) = docker.remove_container(&id, Some(remove_options())).await {
                warn!("Failed to remove container {}: {}", id, e);
            }
        });
    }
}

fn remove_options() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    }
}

/// Accumulates docker stats samples into a `ResourceUsage`
#[derive(Debug, Default)]
struct UsageSampler {
    peak: u64,
    sum: u128,
    samples: u64,
    cpu_ns: u64,
    disk_read: u64,
    disk_write: u64,
}

impl UsageSampler {
    fn observe_value(&mut self, stats: &serde_json::Value) {
        let u64_at = |pointer: &str| stats.pointer(pointer).and_then(|v| v.as_u64());

        if let Some(usage) = u64_at("/memory_stats/usage").filter(|u| *u > 0) {
            self.peak = self.peak.max(usage);
            self.sum += u128::from(usage);
            self.samples += 1;
        }
        if let Some(max_usage) = u64_at("/memory_stats/max_usage") {
            self.peak = self.peak.max(max_usage);
        }
        if let Some(cpu) = u64_at("/cpu_stats/cpu_usage/total_usage") {
            self.cpu_ns = self.cpu_ns.max(cpu);
        }

        if let Some(entries) = stats
            .pointer("/blkio_stats/io_service_bytes_recursive")
            .and_then(|v| v.as_array())
        {
            let (mut read, mut write) = (0u64, 0u64);
            for entry in entries {
                let value = entry.get("value").and_then(|v| v.as_u64()).unwrap_or(0);
                match entry.get("op").and_then(|v| v.as_str()) {
                    Some(op) if op.eq_ignore_ascii_case("read") => read += value,
                    Some(op) if op.eq_ignore_ascii_case("write") => write += value,
                    _ => {}
                }
            }
            self.disk_read = self.disk_read.max(read);
            self.disk_write = self.disk_write.max(write);
        }
    }

    fn finish(self) -> ResourceUsage {
        let memory_average = if self.samples == 0 {
            0
        } else {
            u64::try_from(self.sum / u128::from(self.samples)).unwrap_or(u64::MAX)
        };

        ResourceUsage {
            cpu_time: self.cpu_ns as f64 / 1e9,
            memory_peak: self.peak,
            memory_average,
            disk_read: self.disk_read,
            disk_write: self.disk_write,
        }
        .sanitized()
    }
}
