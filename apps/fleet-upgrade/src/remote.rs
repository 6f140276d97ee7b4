pub mod scp;
pub mod ssh;

use std::path::Path;

use crate::error::RemoteError;
use crate::plan::Credentials;

pub use ssh::{SshConnection, SshConnector, SshOptions};

/// Remote shell operations against a single host.
///
/// `directory_exists`, `process_status`, `signal` and `interrupt` are built on `run`
/// and assume `test`, `pgrep` and `pkill` are on the remote `PATH`.
pub trait RemoteShell {
    fn host(&self) -> &str;

    /// Runs `command` and returns its standard output.
    fn run(&mut self, command: &str) -> Result<String, RemoteError>;

    /// Pushes `local` to `remote` (a file path, not a directory) with `permissions`.
    fn copy_file(&mut self, local: &Path, remote: &str, permissions: &str)
        -> Result<(), RemoteError>;

    fn directory_exists(&mut self, path: &str) -> Result<bool, RemoteError> {
        match self.run(&format!("test -d {}", shell_quote(path))) {
            Ok(_) => Ok(true),
            Err(err) if err.exit_status() == Some(1) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn process_status(&mut self, name: &str) -> Result<bool, RemoteError> {
        match self.run(&format!("pgrep -l {}", shell_quote(name))) {
            Ok(output) => Ok(!output.trim().is_empty()),
            // pgrep exits 1 when nothing matched
            Err(err) if err.exit_status() == Some(1) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn signal(&mut self, name: &str, signal: &str) -> Result<String, RemoteError> {
        self.run(&format!("pkill -{signal} {}", shell_quote(name)))
    }

    fn interrupt(&mut self, name: &str) -> Result<String, RemoteError> {
        self.signal(name, "INT")
    }
}

/// Produces a shell for a host. Transports are opened lazily by the shell itself.
pub trait ShellConnector {
    type Shell: RemoteShell;

    fn connect(&self, host: &str, credentials: &Credentials) -> Self::Shell;
}

pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

/// Copies the current file aside as `<path>.<suffix>`, keeping an existing backup.
pub fn backup_command(path: &str, suffix: &str) -> String {
    let current = shell_quote(path);
    let backup = shell_quote(&format!("{path}.{suffix}"));
    format!("if [ -e {current} ] && [ ! -e {backup} ]; then cp -p {current} {backup}; fi")
}

/// Moves `<path>.<suffix>` back over `path` when the backup exists.
pub fn restore_command(path: &str, suffix: &str) -> String {
    let current = shell_quote(path);
    let backup = shell_quote(&format!("{path}.{suffix}"));
    format!("if [ -e {backup} ]; then mv -f {backup} {current}; fi")
}
