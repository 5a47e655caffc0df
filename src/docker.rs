use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::process::Stdio;
use tokio::{
    process::Command,
    time::{timeout, Duration},
};

const LOGS_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the most recent output lines of a named running process.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Returns at most `max_lines` most-recent lines, or an empty window when
    /// the process cannot be read.
    async fn tail(&self, name: &str, max_lines: usize) -> Vec<String>;
}

/// Reads container output through the `docker logs` CLI.
pub struct DockerLogs {
    program: String,
}

impl DockerLogs {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, name: &str, max_lines: usize) -> anyhow::Result<Vec<String>> {
        let mut command = Command::new(&self.program);
        command
            .args(["logs", "--timestamps", "--tail"])
            .arg(max_lines.to_string())
            .arg(name)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = timeout(LOGS_TIMEOUT, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {}s", LOGS_TIMEOUT.as_secs()))??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(merge_streams(&stdout, &stderr, max_lines))
    }
}

impl Default for DockerLogs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSource for DockerLogs {
    async fn tail(&self, name: &str, max_lines: usize) -> Vec<String> {
        match self.run(name, max_lines).await {
            Ok(lines) => {
                tracing::debug!(container = %name, lines = lines.len(), "fetched container logs");
                lines
            }
            Err(err) => {
                tracing::warn!(container = %name, error = %err, "failed to read container logs");
                Vec::new()
            }
        }
    }
}

/// Interleaves the container's stdout and stderr by their `--timestamps`
/// prefix, strips the prefix, and keeps the newest `max_lines` lines.
///
/// The sort is stable, so lines sharing an instant keep stream order.
fn merge_streams(stdout: &str, stderr: &str, max_lines: usize) -> Vec<String> {
    let mut stamped: Vec<(Option<DateTime<FixedOffset>>, &str)> = stdout
        .lines()
        .chain(stderr.lines())
        .map(split_timestamp)
        .collect();
    stamped.sort_by_key(|(stamp, _)| *stamp);
    let skip = stamped.len().saturating_sub(max_lines);
    stamped
        .into_iter()
        .skip(skip)
        .map(|(_, line)| line.to_string())
        .collect()
}

fn split_timestamp(line: &str) -> (Option<DateTime<FixedOffset>>, &str) {
    line.split_once(' ')
        .and_then(|(stamp, rest)| {
            DateTime::parse_from_rfc3339(stamp)
                .ok()
                .map(|parsed| (Some(parsed), rest))
        })
        .unwrap_or((None, line))
}
