//! Wraps every `wg`/`wg-quick`/`ping` invocation behind a trait so the
//! reconciler and monitor never shell out directly. Grounded in
//! `gnosis_vpn-lib/src/shell_command_ext.rs`'s extension-trait pattern,
//! extended with an explicit deadline per call (§5, §9.5).

use std::future::Future;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::ping::PingStats;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("`{command}` timed out after {deadline:?}")]
    Timeout { command: String, deadline: Duration },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, #[source] source: std::io::Error },
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed { command: String, status: String, stderr: String },
    #[error("`{command}` produced non-utf8 output")]
    NonUtf8 { command: String },
}

pub enum Logs {
    Print,
    Suppress,
}

/// Mirrors `ShellCommandExt` from the teacher, plus a deadline parameter.
pub trait CommandExt {
    fn run_stdout(&mut self, deadline: Duration, logs: Logs) -> impl Future<Output = Result<String, Error>> + Send;
    fn run(&mut self, deadline: Duration, logs: Logs) -> impl Future<Output = Result<(), Error>> + Send;
}

impl CommandExt for Command {
    async fn run_stdout(&mut self, deadline: Duration, logs: Logs) -> Result<String, Error> {
        let command = format!("{:?}", self.as_std());
        let output = run_with_deadline(self, deadline, &command).await?;
        stdout_from_output(&command, output, logs)
    }

    async fn run(&mut self, deadline: Duration, logs: Logs) -> Result<(), Error> {
        self.run_stdout(deadline, logs).await.map(|_| ())
    }
}

async fn run_with_deadline(cmd: &mut Command, deadline: Duration, command: &str) -> Result<Output, Error> {
    tokio::time::timeout(deadline, cmd.output())
        .await
        .map_err(|_| Error::Timeout { command: command.to_string(), deadline })?
        .map_err(|source| Error::Spawn { command: command.to_string(), source })
}

fn stdout_from_output(command: &str, output: Output, logs: Logs) -> Result<String, Error> {
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if matches!(logs, Logs::Print) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(command, stderr = %stderr.trim(), "command stderr");
        }
    }
    String::from_utf8(output.stdout).map_err(|_| Error::NonUtf8 { command: command.to_string() })
}

/// Every platform tool contract named in §6.
#[async_trait]
pub trait PlatformOps: Send + Sync {
    async fn wg_genkey(&self) -> Result<String, Error>;
    async fn wg_pubkey(&self, private_key: &str) -> Result<String, Error>;
    async fn wg_show_all_dump(&self) -> Result<String, Error>;
    async fn wg_show(&self, interface: &str) -> Result<String, Error>;
    async fn wg_quick_up(&self, config_path: &Path) -> Result<(), Error>;
    async fn wg_quick_down(&self, config_path: &Path) -> Result<(), Error>;
    /// Validates a candidate config file the way `wg-quick strip` does,
    /// without applying it (§4.2 Phase B: "validate ... rename on success").
    async fn wg_quick_strip(&self, config_path: &Path) -> Result<String, Error>;
    async fn interface_exists(&self, interface: &str) -> Result<bool, Error>;
    async fn ping(&self, ip: &str, attempts: u32, per_attempt_timeout: Duration) -> Result<PingStats, Error>;
    async fn default_egress_interface(&self) -> Result<String, Error>;
}

pub struct RealPlatform;

#[async_trait]
impl PlatformOps for RealPlatform {
    async fn wg_genkey(&self) -> Result<String, Error> {
        let key = Command::new("wg").arg("genkey").run_stdout(DEFAULT_DEADLINE, Logs::Suppress).await?;
        Ok(key.trim().to_string())
    }

    async fn wg_pubkey(&self, private_key: &str) -> Result<String, Error> {
        use std::process::Stdio;
        let mut cmd = Command::new("wg");
        cmd.arg("pubkey").stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        let command = format!("{:?}", cmd.as_std());
        let mut child = cmd.spawn().map_err(|source| Error::Spawn { command: command.clone(), source })?;
        {
            use tokio::io::AsyncWriteExt;
            let mut stdin = child.stdin.take().expect("stdin piped");
            stdin
                .write_all(format!("{private_key}\n").as_bytes())
                .await
                .map_err(|source| Error::Spawn { command: command.clone(), source })?;
        }
        let output = tokio::time::timeout(DEFAULT_DEADLINE, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout { command: command.clone(), deadline: DEFAULT_DEADLINE })?
            .map_err(|source| Error::Spawn { command: command.clone(), source })?;
        Ok(stdout_from_output(&command, output, Logs::Suppress)?.trim().to_string())
    }

    async fn wg_show_all_dump(&self) -> Result<String, Error> {
        Command::new("wg").args(["show", "all", "dump"]).run_stdout(DEFAULT_DEADLINE, Logs::Suppress).await
    }

    async fn wg_show(&self, interface: &str) -> Result<String, Error> {
        Command::new("wg").args(["show", interface]).run_stdout(DEFAULT_DEADLINE, Logs::Suppress).await
    }

    async fn wg_quick_up(&self, config_path: &Path) -> Result<(), Error> {
        Command::new("wg-quick").arg("up").arg(config_path).run(DEFAULT_DEADLINE, Logs::Print).await
    }

    async fn wg_quick_down(&self, config_path: &Path) -> Result<(), Error> {
        Command::new("wg-quick").arg("down").arg(config_path).run(DEFAULT_DEADLINE, Logs::Print).await
    }

    async fn wg_quick_strip(&self, config_path: &Path) -> Result<String, Error> {
        Command::new("wg-quick").arg("strip").arg(config_path).run_stdout(DEFAULT_DEADLINE, Logs::Suppress).await
    }

    async fn interface_exists(&self, interface: &str) -> Result<bool, Error> {
        match self.wg_show(interface).await {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self, ip: &str, attempts: u32, per_attempt_timeout: Duration) -> Result<PingStats, Error> {
        let wait_secs = per_attempt_timeout.as_secs_f64().max(0.2);
        let total_deadline = per_attempt_timeout * attempts + Duration::from_secs(2);
        let output = Command::new("ping")
            .args(["-c", &attempts.to_string(), "-W", &wait_secs.to_string(), "-i", "0.2", ip])
            .run_stdout(total_deadline, Logs::Suppress)
            .await;
        match output {
            Ok(text) => Ok(crate::ping::parse_ping_output(&text)),
            Err(Error::CommandFailed { stderr, .. }) => {
                tracing::debug!(ip, stderr, "ping reported failure, treating as total loss");
                Ok(PingStats::default())
            }
            Err(e) => Err(e),
        }
    }

    async fn default_egress_interface(&self) -> Result<String, Error> {
        let text = Command::new("ip")
            .args(["route", "show", "default"])
            .run_stdout(DEFAULT_DEADLINE, Logs::Suppress)
            .await?;
        parse_default_egress(&text).ok_or_else(|| Error::CommandFailed {
            command: "ip route show default".to_string(),
            status: "0".to_string(),
            stderr: "no default route found".to_string(),
        })
    }
}

fn parse_default_egress(text: &str) -> Option<String> {
    let line = text.lines().next()?;
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(str::to_string);
        }
    }
    None
}
