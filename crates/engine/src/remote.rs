//! Command execution on target hosts.
//!
//! [`RemoteShell`] is the seam the configuration phase talks through. The
//! only required method is [`RemoteShell::exec`]; file helpers default to
//! POSIX shell commands and may be overridden.

use std::process::Stdio;

use async_trait::async_trait;
use berth_util::{redact_sensitive, shell_quote};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const SSH_BINARY: &str = "ssh";
/// Keep stderr excerpts in errors short enough to read in a report.
const STDERR_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not start ssh for {address}: {source}")]
    Spawn {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` on {address} exited with {status}: {stderr}")]
    CommandFailed {
        address: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A shell on a target host with root privileges.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Address the shell is connected to.
    fn address(&self) -> &str;

    /// Run `command` through `sh`, feeding `input` on stdin when given.
    /// A non-zero exit status is returned in the output, not as an error.
    async fn exec(&self, command: &str, input: Option<&str>) -> Result<CommandOutput, RemoteError>;

    /// Run `command`, failing on a non-zero exit status.
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = self.exec(command, None).await?;
        check_status(self.address(), command, output)
    }

    /// Like [`RemoteShell::run`] with `input` on stdin.
    async fn run_with_input(&self, command: &str, input: &str) -> Result<CommandOutput, RemoteError> {
        let output = self.exec(command, Some(input)).await?;
        check_status(self.address(), command, output)
    }

    async fn file_exists(&self, path: &str) -> Result<bool, RemoteError> {
        let output = self.exec(&format!("test -e {}", shell_quote(path)), None).await?;
        Ok(output.success())
    }

    /// Contents of `path`, or `None` when it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>, RemoteError> {
        if !self.file_exists(path).await? {
            return Ok(None);
        }
        let output = self.run(&format!("cat {}", shell_quote(path))).await?;
        Ok(Some(output.stdout))
    }

    /// Replace `path` with `contents`, creating parent directories.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), RemoteError> {
        let quoted = shell_quote(path);
        self.run_with_input(&format!("mkdir -p \"$(dirname {quoted})\" && cat > {quoted}"), contents)
            .await
            .map(|_| ())
    }

    /// Remove `path`; returns whether anything was removed.
    async fn remove_file(&self, path: &str) -> Result<bool, RemoteError> {
        let quoted = shell_quote(path);
        let existed = self.exec(&format!("test -e {quoted} || test -L {quoted}"), None).await?.success();
        if existed {
            self.run(&format!("rm -f {quoted}")).await?;
        }
        Ok(existed)
    }

    /// Point `link` at `target`, replacing an existing link.
    async fn symlink(&self, target: &str, link: &str) -> Result<(), RemoteError> {
        self.run(&format!("ln -sfn {} {}", shell_quote(target), shell_quote(link)))
            .await
            .map(|_| ())
    }
}

fn check_status(address: &str, command: &str, output: CommandOutput) -> Result<CommandOutput, RemoteError> {
    if output.success() {
        return Ok(output);
    }
    let stderr: String = output.stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
    Err(RemoteError::CommandFailed {
        address: address.to_string(),
        command: redact_sensitive(command),
        status: output.status,
        stderr: redact_sensitive(&stderr),
    })
}

/// [`RemoteShell`] over the system `ssh` client.
///
/// Commands run as `user`; anyone other than `root` goes through `sudo -n`.
/// Host keys for new hosts are accepted on first contact, which is why the
/// provisioning phase prunes stale entries before a fresh droplet is reached.
#[derive(Debug, Clone)]
pub struct SshShell {
    address: String,
    user: String,
    port: u16,
    ssh_binary: String,
}

impl SshShell {
    pub fn new(address: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            port,
            ssh_binary: SSH_BINARY.to_string(),
        }
    }

    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-p".into(),
            self.port.to_string(),
            format!("{}@{}", self.user, self.address),
            elevate(&self.user, command),
        ]
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str, input: Option<&str>) -> Result<CommandOutput, RemoteError> {
        debug!(address = %self.address, command = %redact_sensitive(command), "running remote command");
        let spawn_error = |source| RemoteError::Spawn {
            address: self.address.clone(),
            source,
        };

        let mut child = Command::new(&self.ssh_binary)
            .args(self.ssh_args(command))
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(input) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes()).await.map_err(spawn_error)?;
            stdin.shutdown().await.map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        let status = output.status.code().unwrap_or(-1);
        if status == 255 {
            warn!(address = %self.address, "ssh reported a connection failure");
        }
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Wrap `command` so it runs as root for `user`.
fn elevate(user: &str, command: &str) -> String {
    if user == "root" {
        command.to_string()
    } else {
        format!("sudo -n sh -c {}", shell_quote(command))
    }
}
