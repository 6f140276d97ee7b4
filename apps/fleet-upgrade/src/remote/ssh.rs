use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};
use std::fs;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::scp::{check_acks, write_stream, SinkHeader};
use super::{RemoteShell, ShellConnector};
use crate::config::UpgradeConfig;
use crate::error::RemoteError;
use crate::paths::expand_home;
use crate::plan::Credentials;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub port: u16,
    pub timeout: Duration,
    /// When set, host keys must match an entry in this OpenSSH known_hosts file.
    pub known_hosts: Option<PathBuf>,
}

impl SshOptions {
    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self {
            port: config.ssh_port(),
            timeout: config.ssh_timeout(),
            known_hosts: config
                .common
                .ssh_known_hosts
                .as_deref()
                .map(expand_home),
        }
    }
}

pub(crate) fn fingerprint_sha256(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let b64 = STANDARD_NO_PAD.encode(digest);
    format!("SHA256:{b64}")
}

/// libssh2 treats 0 as "block until the remote side answers".
const COMMAND_TIMEOUT_MILLIS: u32 = 0;

fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX)) as u32
}

fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| format!("cannot resolve {host}: {err}"))?;
    let mut last_err = format!("{host} resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => last_err = format!("failed to open TCP connection to {addr}: {err}"),
        }
    }
    Err(last_err)
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    known_hosts_path: &Path,
) -> Result<(), String> {
    let (host_key, _) = session
        .host_key()
        .ok_or_else(|| "SSH host key unavailable".to_string())?;
    let fingerprint = fingerprint_sha256(host_key);
    let mut known_hosts = session.known_hosts().map_err(|err| err.to_string())?;
    known_hosts
        .read_file(known_hosts_path, KnownHostFileKind::OpenSSH)
        .map_err(|err| format!("failed to read {}: {err}", known_hosts_path.display()))?;
    match known_hosts.check_port(host, port, host_key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(format!(
            "SSH host key for {host}:{port} is not in {} (fingerprint {fingerprint})",
            known_hosts_path.display()
        )),
        CheckResult::Mismatch => Err(format!(
            "SSH host key mismatch for {host}:{port}, got {fingerprint}. Refusing to connect."
        )),
        CheckResult::Failure => Err(format!(
            "unable to verify SSH host key for {host}:{port} (known_hosts: {})",
            known_hosts_path.display()
        )),
    }
}

/// What an exec channel reported once the remote side finished.
struct ChannelOutput {
    streams: io::Result<(Vec<u8>, Vec<u8>)>,
    closed: Result<(), String>,
    exit: Result<i32, String>,
}

fn read_streams(channel: &mut Channel) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    channel.read_to_end(&mut stdout)?;
    let mut stderr = Vec::new();
    channel.stderr().read_to_end(&mut stderr)?;
    Ok((stdout, stderr))
}

/// Drains both streams and waits for the channel to close. The exit status is only
/// meaningful after a clean close; before that libssh2 reports 0.
fn finish_channel(channel: &mut Channel) -> ChannelOutput {
    let streams = read_streams(channel);
    let closed = channel.wait_close().map_err(|err| err.to_string());
    let exit = match &closed {
        Ok(()) => channel.exit_status().map_err(|err| err.to_string()),
        Err(_) => Err("channel was not closed".to_string()),
    };
    ChannelOutput {
        streams,
        closed,
        exit,
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn command_result(host: &str, command: &str, output: ChannelOutput) -> Result<String, RemoteError> {
    let command_err = |status: i32, stderr: String| RemoteError::Command {
        host: host.to_string(),
        command: command.to_string(),
        status,
        stderr,
    };
    let (stdout, stderr) = output.streams.map_err(|err| {
        if is_timeout(&err) {
            command_err(-1, format!("timed out waiting for command output: {err}"))
        } else {
            RemoteError::connect(host, format!("lost SSH transport while reading output: {err}"))
        }
    })?;
    output.closed.map_err(|err| {
        RemoteError::connect(host, format!("SSH channel did not close cleanly: {err}"))
    })?;
    let status = output
        .exit
        .map_err(|err| command_err(-1, format!("no exit status: {err}")))?;
    if status != 0 {
        return Err(command_err(
            status,
            String::from_utf8_lossy(&stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

fn exec_command(session: &Session, host: &str, command: &str) -> Result<String, RemoteError> {
    let mut channel = session
        .channel_session()
        .map_err(|err| RemoteError::connect(host, format!("failed to open SSH channel: {err}")))?;
    channel
        .exec(command)
        .map_err(|err| RemoteError::connect(host, format!("failed to start {command:?}: {err}")))?;
    command_result(host, command, finish_channel(&mut channel))
}

fn transfer_result(
    host: &str,
    remote: &str,
    written: io::Result<u64>,
    eof: Result<(), String>,
    output: ChannelOutput,
) -> Result<(), RemoteError> {
    let transfer_err = |message: String| RemoteError::transfer(host, remote, message);
    let (acks, stderr) = output
        .streams
        .map_err(|err| transfer_err(format!("failed to read copy sink response: {err}")))?;
    check_acks(&acks).map_err(transfer_err)?;
    written.map_err(|err| transfer_err(format!("write failed: {err}")))?;
    eof.map_err(|err| transfer_err(format!("failed to close copy sink input: {err}")))?;
    output
        .closed
        .map_err(|err| transfer_err(format!("copy channel did not close cleanly: {err}")))?;
    let exit = output
        .exit
        .map_err(|err| transfer_err(format!("copy sink gave no exit status: {err}")))?;
    if exit != 0 {
        let stderr = String::from_utf8_lossy(&stderr);
        let detail = stderr.trim();
        return Err(transfer_err(if detail.is_empty() {
            format!("copy sink exited with {exit}")
        } else {
            format!("copy sink exited with {exit}: {detail}")
        }));
    }
    Ok(())
}

fn push_file(
    session: &Session,
    host: &str,
    local: &Path,
    remote: &str,
    permissions: &str,
) -> Result<(), RemoteError> {
    let transfer_err = |message: String| RemoteError::transfer(host, remote, message);
    let mut file = fs::File::open(local)
        .map_err(|err| transfer_err(format!("failed to open {}: {err}", local.display())))?;
    let size = file
        .metadata()
        .map_err(|err| transfer_err(format!("failed to stat {}: {err}", local.display())))?
        .len();
    let header = SinkHeader::new(remote, permissions, size).map_err(transfer_err)?;

    let mut channel = session
        .channel_session()
        .map_err(|err| RemoteError::connect(host, format!("failed to open SSH channel: {err}")))?;
    channel
        .exec(&header.sink_command())
        .map_err(|err| transfer_err(format!("failed to start copy sink: {err}")))?;

    let written = write_stream(&mut channel, &header, &mut file);
    let eof = channel.send_eof().map_err(|err| err.to_string());
    let output = finish_channel(&mut channel);
    transfer_result(host, remote, written, eof, output)
}

/// An SSH connection to one host for one set of credentials.
///
/// The transport is opened lazily. `run` and `copy_file` close whatever they opened
/// themselves; a transport opened with [`SshConnection::open`] stays up until
/// [`SshConnection::close`].
pub struct SshConnection {
    host: String,
    username: String,
    key_path: PathBuf,
    private_key: Option<String>,
    options: SshOptions,
    session: Option<Session>,
    auto_open: bool,
}

impl SshConnection {
    pub fn new(host: &str, credentials: &Credentials, options: SshOptions) -> Self {
        let private_key = match fs::read_to_string(&credentials.private_key_path) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(
                    host = %host,
                    key = %credentials.private_key_path.display(),
                    "unable to read SSH private key: {err}"
                );
                None
            }
        };
        Self {
            host: host.to_string(),
            username: credentials.username.clone(),
            key_path: credentials.private_key_path.clone(),
            private_key,
            options,
            session: None,
            auto_open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn enable_auto_open(&mut self) {
        self.auto_open = true;
    }

    pub fn disable_auto_open(&mut self) {
        self.auto_open = false;
    }

    pub fn open(&mut self) -> Result<(), RemoteError> {
        if self.session.is_some() {
            return Ok(());
        }
        let key = self.private_key.as_deref().ok_or_else(|| {
            RemoteError::connect(
                &self.host,
                format!("no usable private key at {}", self.key_path.display()),
            )
        })?;
        let connect_err = |message: String| RemoteError::connect(&self.host, message);

        let tcp = open_tcp(&self.host, self.options.port, self.options.timeout).map_err(connect_err)?;
        let mut session =
            Session::new().map_err(|err| connect_err(format!("failed to create SSH session: {err}")))?;
        session.set_tcp_stream(tcp);
        // Bounds the handshake and authentication only.
        session.set_timeout(timeout_millis(self.options.timeout));
        session
            .handshake()
            .map_err(|err| connect_err(format!("SSH handshake failed: {err}")))?;
        if let Some(known_hosts) = self.options.known_hosts.as_deref() {
            verify_host_key(&session, &self.host, self.options.port, known_hosts)
                .map_err(connect_err)?;
        }
        session
            .userauth_pubkey_memory(&self.username, None, key, None)
            .map_err(|err| connect_err(format!("SSH key authentication failed: {err}")))?;
        if !session.authenticated() {
            return Err(connect_err("SSH authentication failed".to_string()));
        }
        // Remote commands such as a service stop may legitimately run for minutes.
        session.set_timeout(COMMAND_TIMEOUT_MILLIS);
        tracing::debug!(host = %self.host, user = %self.username, "SSH connection opened");
        self.session = Some(session);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.disconnect(None, "closing", None).ok();
            tracing::debug!(host = %self.host, "SSH connection closed");
        }
    }

    fn with_session<T>(
        &mut self,
        op: impl FnOnce(&Session, &str) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let opened_here = self.session.is_none();
        if opened_here {
            if !self.auto_open {
                return Err(RemoteError::connect(
                    &self.host,
                    "connection is closed and auto-open is disabled",
                ));
            }
            self.open()?;
        }
        let result = match self.session.as_ref() {
            Some(session) => op(session, &self.host),
            None => Err(RemoteError::connect(&self.host, "connection is closed")),
        };
        if opened_here {
            self.close();
        }
        result
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl RemoteShell for SshConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        tracing::debug!(host = %self.host, "$ {command}");
        self.with_session(|session, host| exec_command(session, host, command))
    }

    fn copy_file(
        &mut self,
        local: &Path,
        remote: &str,
        permissions: &str,
    ) -> Result<(), RemoteError> {
        // Reject bad headers before a transport is opened.
        SinkHeader::new(remote, permissions, 0)
            .map_err(|message| RemoteError::transfer(&self.host, remote, message))?;
        tracing::debug!(
            host = %self.host,
            local = %local.display(),
            remote = %remote,
            "scp push"
        );
        self.with_session(|session, host| push_file(session, host, local, remote, permissions))
    }
}

/// Hands out [`SshConnection`]s sharing one set of transport options.
#[derive(Debug, Clone)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl ShellConnector for SshConnector {
    type Shell = SshConnection;

    fn connect(&self, host: &str, credentials: &Credentials) -> SshConnection {
        SshConnection::new(host, credentials, self.options.clone())
    }
}
