use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::plan::Credentials;
use crate::remote::scp::SinkHeader;
use crate::remote::{RemoteShell, ShellConnector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Command(String),
    Transfer {
        local: PathBuf,
        remote: String,
        permissions: String,
    },
}

#[derive(Default)]
struct FakeState {
    failures: HashMap<(String, String), i32>,
    replies: HashMap<(String, String), String>,
    unreachable: HashSet<String>,
    failed_transfers: HashSet<(String, String)>,
    cancel_on: Vec<(String, String, CancellationToken)>,
    calls: Vec<(String, Call)>,
    connects: Vec<(String, Credentials)>,
}

/// Scripted stand-in for the SSH gateway. Unscripted commands succeed with no output.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Rc<RefCell<FakeState>>,
}

fn key(host: &str, value: &str) -> (String, String) {
    (host.to_string(), value.to_string())
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_command(&self, host: &str, command: &str, status: i32) {
        self.state
            .borrow_mut()
            .failures
            .insert(key(host, command), status);
    }

    pub fn reply(&self, host: &str, command: &str, output: &str) {
        self.state
            .borrow_mut()
            .replies
            .insert(key(host, command), output.to_string());
    }

    pub fn unreachable(&self, host: &str) {
        self.state.borrow_mut().unreachable.insert(host.to_string());
    }

    pub fn fail_transfer(&self, host: &str, remote: &str) {
        self.state
            .borrow_mut()
            .failed_transfers
            .insert(key(host, remote));
    }

    /// Cancels `token` when `command` runs on `host`; the command itself still completes.
    pub fn cancel_on(&self, host: &str, command: &str, token: &CancellationToken) {
        self.state
            .borrow_mut()
            .cancel_on
            .push((host.to_string(), command.to_string(), token.clone()));
    }

    pub fn shell(&self, host: &str) -> FakeShell {
        FakeShell {
            host: host.to_string(),
            state: Rc::clone(&self.state),
        }
    }

    pub fn calls(&self, host: &str) -> Vec<Call> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.calls(host)
            .into_iter()
            .filter_map(|call| match call {
                Call::Command(command) => Some(command),
                Call::Transfer { .. } => None,
            })
            .collect()
    }

    pub fn transfers(&self, host: &str) -> Vec<String> {
        self.calls(host)
            .into_iter()
            .filter_map(|call| match call {
                Call::Transfer { remote, .. } => Some(remote),
                Call::Command(_) => None,
            })
            .collect()
    }

    pub fn touched_hosts(&self) -> HashSet<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn credentials_for(&self, host: &str) -> Vec<Credentials> {
        self.state
            .borrow()
            .connects
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, credentials)| credentials.clone())
            .collect()
    }
}

impl ShellConnector for FakeConnector {
    type Shell = FakeShell;

    fn connect(&self, host: &str, credentials: &Credentials) -> FakeShell {
        self.state
            .borrow_mut()
            .connects
            .push((host.to_string(), credentials.clone()));
        self.shell(host)
    }
}

pub struct FakeShell {
    host: String,
    state: Rc<RefCell<FakeState>>,
}

impl FakeShell {
    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.state.borrow().unreachable.contains(&self.host) {
            return Err(RemoteError::connect(&self.host, "connection refused"));
        }
        Ok(())
    }
}

impl RemoteShell for FakeShell {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        self.ensure_reachable()?;
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push((self.host.clone(), Call::Command(command.to_string())));
        for (host, trigger, token) in &state.cancel_on {
            if host == &self.host && trigger == command {
                token.cancel();
            }
        }
        let id = key(&self.host, command);
        if let Some(status) = state.failures.get(&id) {
            return Err(RemoteError::Command {
                host: self.host.clone(),
                command: command.to_string(),
                status: *status,
                stderr: "scripted failure".to_string(),
            });
        }
        Ok(state.replies.get(&id).cloned().unwrap_or_default())
    }

    fn copy_file(
        &mut self,
        local: &Path,
        remote: &str,
        permissions: &str,
    ) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        SinkHeader::new(remote, permissions, 0)
            .map_err(|message| RemoteError::transfer(&self.host, remote, message))?;
        if !local.is_file() {
            return Err(RemoteError::transfer(
                &self.host,
                remote,
                format!("failed to open {}", local.display()),
            ));
        }
        let mut state = self.state.borrow_mut();
        state.calls.push((
            self.host.clone(),
            Call::Transfer {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                permissions: permissions.to_string(),
            },
        ));
        if state.failed_transfers.contains(&key(&self.host, remote)) {
            return Err(RemoteError::transfer(&self.host, remote, "scripted failure"));
        }
        Ok(())
    }
}
