//! Docker CLI runtime adapter

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::git;
use crate::deploy::runtime::{ContainerRuntime, LogLineFn, RunSpec, MANAGED_LABEL};
use crate::errors::{PlatformError, PlatformResult};
use crate::models::container::{ContainerInfo, ContainerStats};

/// Build output lines kept for the error message of a failed build
const BUILD_ERROR_TAIL: usize = 10;

/// Docker adapter options
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Docker CLI binary
    pub docker_binary: String,

    /// Git binary used for checkouts
    pub git_binary: String,

    /// Shared network every project container joins
    pub network: String,

    /// Repository prefix for built images
    pub image_prefix: String,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            git_binary: "git".to_string(),
            network: "dockyard".to_string(),
            image_prefix: "dockyard".to_string(),
        }
    }
}

/// [`ContainerRuntime`] that shells out to the docker CLI
pub struct DockerCli {
    options: DockerOptions,
}

impl DockerCli {
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.options.docker_binary);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a docker subcommand to completion; spawn failures mean the CLI is unusable
    async fn output(&self, args: &[&str]) -> PlatformResult<Output> {
        debug!("Executing docker {:?}", args);
        self.command().args(args).output().await.map_err(|e| {
            PlatformError::RuntimeUnavailable(format!("Failed to run docker {}: {}", args[0], e))
        })
    }

    /// Like [`Self::output`] but turns a non-zero exit into an error
    async fn checked(&self, args: &[&str]) -> PlatformResult<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(command_error(args, &output))
        }
    }

    fn image_tag(&self, name_hint: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}:{}-{}",
            self.options.image_prefix,
            name_hint,
            Utc::now().format("%Y%m%d%H%M%S"),
            &suffix[..6]
        )
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn health_check(&self) -> bool {
        match self.checked(&["info", "--format", "{{.ServerVersion}}"]).await {
            Ok(version) => {
                debug!("Docker daemon reachable, server version {}", version);
                true
            }
            Err(e) => {
                warn!("Docker health check failed: {}", e);
                false
            }
        }
    }

    async fn ensure_network(&self) -> PlatformResult<()> {
        let network = self.options.network.as_str();
        let output = self.output(&["network", "create", network]).await?;

        if output.status.success() {
            info!("Created docker network {}", network);
            return Ok(());
        }
        if stderr_of(&output).contains("already exists") {
            debug!("Docker network {} already exists", network);
            return Ok(());
        }
        Err(command_error(&["network", "create", network], &output))
    }

    async fn clone_repository(&self, url: &str, branch: &str, dest: &Path) -> PlatformResult<()> {
        git::clone_repository(&self.options.git_binary, url, branch, dest).await
    }

    async fn build_image(
        &self,
        context: &Path,
        name_hint: &str,
        on_line: LogLineFn<'_>,
    ) -> PlatformResult<String> {
        let tag = self.image_tag(name_hint);
        info!("Building image {} from {}", tag, context.display());

        let mut child = self
            .command()
            .args(["build", "--progress=plain", "-t", &tag])
            .arg(context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlatformError::RuntimeUnavailable(format!("Failed to run docker build: {}", e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlatformError::Internal("docker build stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PlatformError::Internal("docker build stderr not captured".to_string()))?;

        // Split on raw bytes: build tools print whatever encoding they like
        let mut out_lines = Some(BufReader::new(stdout).split(b'\n'));
        let mut err_lines = Some(BufReader::new(stderr).split(b'\n'));
        let mut tail: VecDeque<String> = VecDeque::with_capacity(BUILD_ERROR_TAIL);

        while out_lines.is_some() || err_lines.is_some() {
            let (segment, from_stdout) = tokio::select! {
                segment = next_segment(&mut out_lines), if out_lines.is_some() => (segment, true),
                segment = next_segment(&mut err_lines), if err_lines.is_some() => (segment, false),
            };

            match segment {
                Ok(Some(bytes)) => {
                    let line = decode_line(&bytes);
                    on_line(&line);
                    if tail.len() == BUILD_ERROR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read docker build output: {}", e),
            }

            // Dropping the reader closes the pipe so the build cannot block on it
            if from_stdout {
                out_lines = None;
            } else {
                err_lines = None;
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let tail: Vec<String> = tail.into_iter().collect();
            return Err(PlatformError::BuildError(format!(
                "docker build exited with {}: {}",
                status,
                tail.join(" | ")
            )));
        }

        info!("Built image {}", tag);
        Ok(tag)
    }

    async fn run_container(&self, spec: &RunSpec) -> PlatformResult<String> {
        info!("Starting container {} from {}", spec.name, spec.image);

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--network".to_string(),
            self.options.network.clone(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
            "--cpus".to_string(),
            spec.limits.cpus.to_string(),
            "--memory".to_string(),
            format!("{}m", spec.limits.memory_mb),
            "--expose".to_string(),
            spec.port.to_string(),
            "-e".to_string(),
            format!("PORT={}", spec.port),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        // Values travel through the CLI's environment, never through argv
        for key in spec.env.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.push(spec.image.clone());

        let output = self
            .command()
            .args(&args)
            .envs(&spec.env)
            .output()
            .await
            .map_err(|e| {
                PlatformError::RuntimeUnavailable(format!("Failed to run docker run: {}", e))
            })?;

        if !output.status.success() {
            return Err(PlatformError::RuntimeError(format!(
                "docker run for {} failed: {}",
                spec.name,
                stderr_of(&output).trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Container {} started: {}", spec.name, container_id);
        Ok(container_id)
    }

    async fn stop_container(&self, name: &str) -> PlatformResult<bool> {
        // `docker stop` also succeeds on an exited container
        let inspect = [
            "inspect",
            "--type",
            "container",
            "--format",
            "{{.State.Running}}",
            name,
        ];
        let output = self.output(&inspect).await?;
        if !output.status.success() {
            if is_missing_container(&output) {
                debug!("No container {} to stop", name);
                return Ok(false);
            }
            return Err(command_error(&inspect, &output));
        }
        if String::from_utf8_lossy(&output.stdout).trim() != "true" {
            debug!("Container {} is not running", name);
            return Ok(false);
        }

        let output = self.output(&["stop", name]).await?;
        if output.status.success() {
            info!("Stopped container {}", name);
            return Ok(true);
        }
        if is_missing_container(&output) {
            debug!("Container {} disappeared before stop", name);
            return Ok(false);
        }
        Err(command_error(&["stop", name], &output))
    }

    async fn remove_container(&self, name: &str) -> PlatformResult<()> {
        let output = self.output(&["rm", "-f", name]).await?;
        if output.status.success() || is_missing_container(&output) {
            return Ok(());
        }
        Err(command_error(&["rm", "-f", name], &output))
    }

    async fn restart_container(&self, name: &str) -> PlatformResult<()> {
        let output = self.output(&["restart", name]).await?;
        if output.status.success() {
            info!("Restarted container {}", name);
            return Ok(());
        }
        if is_missing_container(&output) {
            return Err(PlatformError::NotFound(format!("container {}", name)));
        }
        Err(command_error(&["restart", name], &output))
    }

    async fn list_containers(&self) -> PlatformResult<Vec<ContainerInfo>> {
        let filter = format!("label={}=true", MANAGED_LABEL);
        let stdout = self
            .checked(&["ps", "-a", "--filter", &filter, "--format", "{{json .}}"])
            .await?;
        parse_ps_lines(&stdout)
    }

    async fn stats(&self, name: &str) -> PlatformResult<ContainerStats> {
        let stdout = self
            .checked(&["stats", "--no-stream", "--format", "{{json .}}", name])
            .await?;
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| PlatformError::NotFound(format!("stats for {}", name)))?;
        parse_stats_line(line)
    }

    async fn logs(&self, name: &str, lines: usize) -> PlatformResult<String> {
        let tail = lines.to_string();
        let output = self.output(&["logs", "--tail", &tail, name]).await?;
        if !output.status.success() {
            return Err(command_error(&["logs", name], &output));
        }

        // Containers write to both streams; the CLI replays them separately
        let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn is_missing_container(output: &Output) -> bool {
    let stderr = stderr_of(output);
    stderr.contains("No such container") || stderr.contains("No such object")
}

async fn next_segment<R>(reader: &mut Option<Split<R>>) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(reader) => reader.next_segment().await,
        None => Ok(None),
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(line).into_owned()
}

fn command_error(args: &[&str], output: &Output) -> PlatformError {
    PlatformError::RuntimeError(format!(
        "docker {} exited with {}: {}",
        args.join(" "),
        output.status,
        stderr_of(output).trim()
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    status: String,
    #[serde(default)]
    ports: String,
    created_at: String,
}

fn parse_ps_lines(stdout: &str) -> PlatformResult<Vec<ContainerInfo>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let entry: PsEntry = serde_json::from_str(line)?;
            Ok(ContainerInfo {
                id: entry.id,
                name: entry.names,
                status: entry.status,
                ports: entry.ports,
                created_at: entry.created_at,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StatsEntry {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
}

fn parse_stats_line(line: &str) -> PlatformResult<ContainerStats> {
    let entry: StatsEntry = serde_json::from_str(line)?;
    let used = entry.mem_usage.split('/').next().unwrap_or("");

    Ok(ContainerStats {
        cpu: parse_percent(&entry.cpu_perc)?,
        memory: parse_size(used)?,
    })
}

fn parse_percent(raw: &str) -> PlatformResult<f64> {
    let trimmed = raw.trim().trim_end_matches('%');
    if trimmed == "--" || trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| PlatformError::RuntimeError(format!("unparseable CPU figure: {}", raw)))
}

/// Parse docker's human sizes ("12.5MiB", "1.2GB", "512B") into bytes
fn parse_size(raw: &str) -> PlatformResult<u64> {
    let trimmed = raw.trim();
    if trimmed == "--" || trimmed.is_empty() {
        return Ok(0);
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| PlatformError::RuntimeError(format!("unparseable size: {}", raw)))?;

    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "KiB" => 1024.0,
        "MB" => 1e6,
        "MiB" => 1024.0 * 1024.0,
        "GB" => 1e9,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1e12,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(PlatformError::RuntimeError(format!(
                "unknown size unit: {}",
                other
            )))
        }
    };

    Ok((value * multiplier).round() as u64)
}
