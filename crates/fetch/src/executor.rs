//! Running the external fetch tool.

use crate::source::ToolSpec;
use async_trait::async_trait;
use audiograb_core::{FetchError, StorageError, CACHE_EXTENSION, MAX_DIAGNOSTIC_BYTES};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};
use tokio::process::Command;
use tokio::time::timeout;

/// Capability to turn a URL into exactly one audio file in `dest_dir`.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        dest_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, FetchError>;
}

/// Runs an external program and picks up the file it leaves behind.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    spec: ToolSpec,
    extension: String,
}

impl ProcessExecutor {
    pub fn new(spec: ToolSpec) -> Self {
        Self {
            spec,
            extension: CACHE_EXTENSION.to_string(),
        }
    }

    /// Expect output files with `extension` instead of `mp3`
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }
}

#[async_trait]
impl FetchExecutor for ProcessExecutor {
    async fn execute(
        &self,
        url: &str,
        dest_dir: &Path,
        timeout_duration: Duration,
    ) -> Result<PathBuf, FetchError> {
        let tool = self.spec.program.as_str();
        let args = self.spec.render(url, &dest_dir.display().to_string());

        let mut cmd = Command::new(tool);
        cmd.args(&args)
            .current_dir(dest_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also reaches helpers the tool forks
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            let detail = if e.kind() == std::io::ErrorKind::NotFound {
                format!("'{tool}' is not installed or not on PATH")
            } else {
                format!("failed to start '{tool}': {e}")
            };
            FetchError::tool_failure(tool, None, detail)
        })?;

        let pid = child.id();
        tracing::debug!(%url, tool, pid = ?pid, "fetch tool started");

        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::tool_failure(
                    tool,
                    None,
                    format!("failed to wait for '{tool}': {e}"),
                ))
            }
            Err(_) => {
                tracing::warn!(%url, tool, after = ?timeout_duration, "fetch tool timed out");
                kill_process_group(pid);
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    after: timeout_duration,
                });
            }
        };

        if !output.status.success() {
            let stream = if output.stderr.is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            return Err(FetchError::tool_failure(
                tool,
                output.status.code(),
                diagnostics_tail(stream),
            ));
        }

        let produced = newest_with_extension(dest_dir, &self.extension)?.ok_or_else(|| {
            FetchError::NoOutputProduced {
                tool: tool.to_string(),
                extension: self.extension.clone(),
            }
        })?;

        tracing::debug!(
            %url,
            file = %produced.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch tool finished"
        );
        Ok(produced)
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, "Failed to kill fetch tool process group: {e}"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Last `MAX_DIAGNOSTIC_BYTES` of tool output, trimmed
fn diagnostics_tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

/// Most recently modified regular file in `dir` ending in `.extension`
fn newest_with_extension(dir: &Path, extension: &str) -> Result<Option<PathBuf>, FetchError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| StorageError::new(dir, "list staging directory", e))?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
