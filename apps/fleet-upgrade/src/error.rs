use std::path::PathBuf;

/// Failures raised by the remote execution gateway.
///
/// `Connect` and `Command` are kept apart so callers can tell an unreachable host
/// from a command that ran and failed.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },
    #[error("command failed on {host} ({status}): {command}{}", stderr_suffix(.stderr))]
    Command {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("transfer to {host}:{remote_path} failed: {message}")]
    Transfer {
        host: String,
        remote_path: String,
        message: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl RemoteError {
    pub fn connect(host: &str, message: impl Into<String>) -> Self {
        Self::Connect {
            host: host.to_string(),
            message: message.into(),
        }
    }

    pub fn transfer(host: &str, remote_path: &str, message: impl Into<String>) -> Self {
        Self::Transfer {
            host: host.to_string(),
            remote_path: remote_path.to_string(),
            message: message.into(),
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Exit status of a failed remote command, if this error carries one.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Self::Command { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("invalid upgrade configuration: {0}")]
    Config(String),
    #[error("session file {path}: {source}")]
    SessionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is corrupt: {source}")]
    CorruptSession {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("pre-flight verification failed:\n{0}")]
    Preflight(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<serde_json::Error> for UpgradeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type UpgradeResult<T> = Result<T, UpgradeError>;
