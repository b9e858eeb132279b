//! Running the external yt-dlp and ffmpeg binaries.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use mediastash_common::{Error, Result};
use tokio::process::Command;

use crate::config::ToolsConfig;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub const YTDLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for one invocation of an external tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Short name used in error messages.
    pub fn name(&self) -> String {
        tool_name(&self.program)
    }

    /// Build the underlying process without running it.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Spawn failures, timeouts and non-zero exits are all [`Error::Tool`].
    pub async fn execute(&self) -> Result<ToolOutput> {
        let name = self.name();
        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&name, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool(name, format!("I/O error waiting for process: {e}")))
            }
            Err(_) => {
                return Err(Error::tool(
                    name,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        let out = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !out.status.success() {
            return Err(Error::tool(
                name,
                format!("exited with status {}: {}", out.status, out.stderr.trim()),
            ));
        }

        Ok(out)
    }
}

pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

/// Resolve a configured tool path, falling back to a PATH lookup.
pub fn resolve(configured: Option<&Path>, default_name: &str) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_absolute() => {
            if path.exists() {
                Ok(path.to_path_buf())
            } else {
                Err(Error::tool(default_name, format!("not found at {path:?}")))
            }
        }
        Some(path) => which::which(path)
            .map_err(|e| Error::tool(default_name, format!("{path:?} not found: {e}"))),
        None => which::which(default_name)
            .map_err(|e| Error::tool(default_name, format!("not found on PATH: {e}"))),
    }
}

pub fn ytdlp_path(config: &ToolsConfig) -> PathBuf {
    config
        .ytdlp_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(YTDLP))
}

pub fn ffmpeg_path(config: &ToolsConfig) -> PathBuf {
    config
        .ffmpeg_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(FFMPEG))
}

/// Cookie arguments for yt-dlp, only when the configured file exists.
pub fn cookie_args(config: &ToolsConfig) -> Vec<String> {
    match &config.cookies_path {
        Some(path) if path.exists() => {
            vec!["--cookies".to_string(), path.to_string_lossy().to_string()]
        }
        _ => Vec::new(),
    }
}

/// First line of a tool's version output.
pub async fn version(program: &Path, flag: &str) -> Result<String> {
    let out = ToolCommand::new(program)
        .arg(flag)
        .timeout(Duration::from_secs(10))
        .execute()
        .await?;
    Ok(out.stdout.lines().next().unwrap_or_default().trim().to_string())
}
