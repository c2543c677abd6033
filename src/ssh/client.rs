//! libssh2-backed sessions.
//!
//! libssh2 is blocking, so every call runs on the blocking pool. Each call
//! sets the libssh2 timeout to the remaining budget and is additionally
//! wrapped in [`tokio::time::timeout`], so a wedged socket cannot hold a
//! dispatch past its deadline.

use async_trait::async_trait;
use ssh2::{ExtendedData, OpenFlags, OpenType};
use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, RemoteExecutionError};

use super::session::{BatchFailure, CommandOutput, Connector, Session, SshTarget, home_relative};

/// Extra time granted to the blocking call before the async backstop fires.
const BACKSTOP_GRACE: Duration = Duration::from_secs(5);

/// Keepalive interval in seconds.
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// Permissions of uploaded files.
const UPLOAD_MODE: i32 = 0o644;

/// Exit code reported for a command killed by a signal.
const SIGNAL_EXIT_CODE: i32 = -1;

/// Connector opening libssh2 sessions with public key authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    /// Creates a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for Ssh2Connector {
    async fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ConnectionError> {
        debug!(
            "Connecting to {} ({}@{}:{})",
            target.hostname, target.user, target.address, target.port
        );

        let owned = target.clone();
        let handle = tokio::task::spawn_blocking(move || open_session(&owned, timeout));

        let session = match tokio::time::timeout(timeout + BACKSTOP_GRACE, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(target.connection_error(format!("connect task failed: {e}"))),
            Err(_) => {
                return Err(target.connection_error(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };

        debug!("Session to {} established", target.hostname);
        Ok(Box::new(Ssh2Session {
            hostname: target.hostname.clone(),
            session: Some(session),
        }))
    }
}

/// An authenticated libssh2 session to one node.
pub struct Ssh2Session {
    hostname: String,
    /// `None` once closed.
    session: Option<ssh2::Session>,
}

impl std::fmt::Debug for Ssh2Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Session")
            .field("hostname", &self.hostname)
            .field("open", &self.session.is_some())
            .finish()
    }
}

impl Ssh2Session {
    fn handle(&self) -> Result<ssh2::Session, RemoteExecutionError> {
        self.session
            .clone()
            .ok_or_else(|| RemoteExecutionError::session(format!("session to {} is closed", self.hostname)))
    }
}

#[async_trait]
impl Session for Ssh2Session {
    async fn run_commands(
        &mut self,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<CommandOutput>, BatchFailure> {
        let session = self.handle()?;
        let batch = commands.to_vec();
        let handle = tokio::task::spawn_blocking(move || run_batch(&session, &batch, timeout));

        match tokio::time::timeout(timeout + BACKSTOP_GRACE, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RemoteExecutionError::session(format!("command task failed: {e}")).into()),
            Err(_) => Err(RemoteExecutionError::timeout(
                commands.last().map_or("command batch", String::as_str),
                timeout,
            )
            .into()),
        }
    }

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<u64, RemoteExecutionError> {
        let session = self.handle()?;
        let local = local.to_path_buf();
        let remote_path = remote.to_string();
        let handle =
            tokio::task::spawn_blocking(move || upload(&session, &local, &remote_path, timeout));

        match tokio::time::timeout(timeout + BACKSTOP_GRACE, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RemoteExecutionError::session(format!("upload task failed: {e}"))),
            Err(_) => Err(RemoteExecutionError::timeout(format!("upload to {remote}"), timeout)),
        }
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let hostname = self.hostname.clone();
        let result = tokio::task::spawn_blocking(move || {
            session.set_timeout(millis(BACKSTOP_GRACE));
            session.disconnect(None, "fleetwright done", None)
        })
        .await;

        match result {
            Ok(Ok(())) => trace!("Session to {hostname} closed"),
            Ok(Err(e)) => debug!("Disconnect from {hostname} failed: {e}"),
            Err(e) => warn!("Disconnect task for {hostname} failed: {e}"),
        }
    }
}

/// Dials, handshakes and authenticates.
fn open_session(target: &SshTarget, timeout: Duration) -> Result<ssh2::Session, ConnectionError> {
    let addr = (target.address.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| target.connection_error(format!("cannot resolve address: {e}")))?
        .next()
        .ok_or_else(|| target.connection_error("address resolved to nothing"))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| target.connection_error(e.to_string()))?;

    let mut session =
        ssh2::Session::new().map_err(|e| target.connection_error(format!("cannot create session: {e}")))?;
    session.set_timeout(millis(timeout));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| target.connection_error(format!("handshake failed: {e}")))?;
    session
        .userauth_pubkey_file(&target.user, None, &target.key_path, None)
        .map_err(|e| target.connection_error(format!("authentication failed: {e}")))?;

    if !session.authenticated() {
        return Err(target.connection_error("authentication failed"));
    }
    session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
    Ok(session)
}

/// Runs a command batch against one shared deadline.
fn run_batch(
    session: &ssh2::Session,
    commands: &[String],
    timeout: Duration,
) -> Result<Vec<CommandOutput>, BatchFailure> {
    let deadline = Instant::now() + timeout;
    let mut outputs = Vec::with_capacity(commands.len());

    for command in commands {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BatchFailure {
                completed: outputs,
                error: RemoteExecutionError::timeout(command.as_str(), timeout),
            });
        }
        session.set_timeout(millis(remaining));

        trace!("exec: {command}");
        let output = match exec(session, command) {
            Ok(output) => output,
            Err(e) => {
                let error = if is_timeout(&e) || Instant::now() >= deadline {
                    RemoteExecutionError::timeout(command.as_str(), timeout)
                } else {
                    RemoteExecutionError::session(format!("`{command}`: {e}"))
                };
                return Err(BatchFailure {
                    completed: outputs,
                    error,
                });
            }
        };

        if output.exit_code != 0 {
            return Err(BatchFailure {
                completed: outputs,
                error: RemoteExecutionError::NonZeroExit {
                    command: output.command,
                    exit_code: output.exit_code,
                    output: output.output,
                },
            });
        }
        outputs.push(output);
    }

    Ok(outputs)
}

/// Executes one command on a fresh channel, merging stderr into stdout.
fn exec(session: &ssh2::Session, command: &str) -> io::Result<CommandOutput> {
    let mut channel = session.channel_session()?;
    channel.handle_extended_data(ExtendedData::Merge)?;
    channel.exec(command)?;

    let mut buf = Vec::new();
    channel.read_to_end(&mut buf)?;
    channel.wait_close()?;

    let status = channel.exit_status()?;
    let signal = channel.exit_signal()?.exit_signal;
    Ok(command_output(command, status, signal, &buf))
}

/// Builds the outcome of a finished command.
///
/// The exit status of a command killed by a signal is 0, so a reported
/// signal always turns into a failure.
fn command_output(command: &str, status: i32, signal: Option<String>, buf: &[u8]) -> CommandOutput {
    let mut output = String::from_utf8_lossy(buf).into_owned();
    let exit_code = match signal {
        Some(name) => {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!("killed by signal SIG{name}"));
            SIGNAL_EXIT_CODE
        }
        None => status,
    };

    CommandOutput {
        command: command.to_string(),
        exit_code,
        output,
    }
}

/// Streams a local file to the node over SFTP.
fn upload(
    session: &ssh2::Session,
    local: &Path,
    remote: &str,
    timeout: Duration,
) -> Result<u64, RemoteExecutionError> {
    let deadline = Instant::now() + timeout;
    let write_error = |message: String| RemoteExecutionError::RemoteWriteError {
        remote_path: remote.to_string(),
        message,
    };
    let classify = |e: io::Error| {
        if is_timeout(&e) || Instant::now() >= deadline {
            RemoteExecutionError::timeout(format!("upload to {remote}"), timeout)
        } else {
            write_error(e.to_string())
        }
    };

    let mut source = File::open(local)
        .map_err(|e| write_error(format!("cannot read local file {}: {e}", local.display())))?;

    session.set_timeout(millis(timeout));
    let sftp = session.sftp().map_err(|e| classify(e.into()))?;
    let mut target = sftp
        .open_mode(
            Path::new(home_relative(remote)),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            UPLOAD_MODE,
            OpenType::File,
        )
        .map_err(|e| classify(e.into()))?;

    let written = io::copy(&mut source, &mut target).map_err(classify)?;
    debug!("Uploaded {} ({written} bytes) to {remote}", local.display());
    Ok(written)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// libssh2 timeout in milliseconds; zero would mean "no timeout".
fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::from_secs(u64::MAX / 1000)), u32::MAX);
    }

    #[test]
    fn test_signal_turns_into_failure() {
        let output = command_output("ansible-playbook site.yaml", 0, Some(String::from("KILL")), b"PLAY [all]");
        assert_eq!(output.exit_code, SIGNAL_EXIT_CODE);
        assert_eq!(output.output, "PLAY [all]\nkilled by signal SIGKILL");

        let silent = command_output("sleep 600", 0, Some(String::from("TERM")), b"");
        assert_eq!(silent.exit_code, SIGNAL_EXIT_CODE);
        assert_eq!(silent.output, "killed by signal SIGTERM");
    }

    #[test]
    fn test_exit_status_without_signal() {
        let ok = command_output("true", 0, None, b"done\n");
        assert_eq!(ok.exit_code, 0);
        assert_eq!(ok.output, "done\n");

        let failed = command_output("false", 2, None, b"");
        assert_eq!(failed.exit_code, 2);
        assert!(failed.output.is_empty());
    }

    #[test]
    fn test_timeout_kinds() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let target = SshTarget {
            hostname: String::from("node1"),
            address: String::from("127.0.0.1"),
            port,
            user: String::from("ubuntu"),
            key_path: PathBuf::from("/keys/cluster.pem"),
        };
        let Err(err) = Ssh2Connector::new()
            .connect(&target, Duration::from_secs(2))
            .await
        else {
            panic!("nothing listens on the port");
        };
        assert_eq!(err.port, port);
        assert_eq!(err.address, "127.0.0.1");
    }
}
