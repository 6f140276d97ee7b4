use std::path::Path;

use super::steps::{self, run_step, Step};
use super::types::{PairOutcome, RunMode, RunReport, RunStatus};
use super::Orchestrator;
use crate::error::{UpgradeError, UpgradeResult};
use crate::remote::ShellConnector;
use crate::session::{FailedUpgradeInfo, PersistOutcome, RollbackSession, SessionFile};
use crate::signals::pause_unless_cancelled;

/// Session state for one run, plus whether each set was read from an existing file.
struct Sessions {
    failed: FailedUpgradeInfo,
    rollback: RollbackSession,
    resumed: bool,
    failed_loaded: bool,
    rollback_loaded: bool,
    /// False when an unreadable failed-nodes file was set aside and must not be overwritten.
    save_failed: bool,
}

/// A session that exists but cannot be read counts as no prior session; one that
/// cannot be decoded is fatal.
fn load_session<S: SessionFile>(path: &Path) -> UpgradeResult<Option<S>> {
    match S::load(path) {
        Ok(session) => Ok(session),
        Err(err @ UpgradeError::SessionIo { .. }) => {
            tracing::warn!("Unable to read session, starting without it: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn persist_session<S: SessionFile>(session: &S, path: &Path, consumed: bool, label: &str) {
    match session.persist(path, consumed) {
        Ok(PersistOutcome::Saved) => {
            tracing::info!("Saved {label} session to {}", path.display());
        }
        Ok(PersistOutcome::RemovedStale) => {
            tracing::info!("Removed empty {label} session {}", path.display());
        }
        Ok(PersistOutcome::Skipped) => {
            tracing::debug!("Nothing to save for the {label} session");
        }
        Err(err) => tracing::error!("Unable to save the {label} session: {err}"),
    }
}

impl<C: ShellConnector> Orchestrator<C> {
    /// Runs the whole staged sequence.
    ///
    /// Per-pair failures are recorded in the session files, never returned. `Err` means a
    /// fatal condition (an undecodable session file the mode depends on) and nothing was
    /// persisted.
    pub fn run(&self) -> UpgradeResult<RunReport> {
        let mode = self.options.mode;
        let mut report = RunReport::new(mode);
        tracing::info!(
            pid = std::process::id(),
            dry_run = self.options.dry_run,
            "Starting {mode}; rollback file: {}",
            self.options.rollback_path.display()
        );

        if let Err(err) = self.preflight() {
            tracing::error!("{err}");
            tracing::info!("{}", report.status_line());
            return Ok(report);
        }

        let mut sessions = match self.load_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!("session state will not be saved");
                return Err(err);
            }
        };

        self.execute(&mut sessions, &mut report);

        if sessions.save_failed {
            persist_session(
                &sessions.failed,
                &self.options.failed_nodes_path,
                sessions.failed_loaded,
                "failed nodes",
            );
        }
        persist_session(
            &sessions.rollback,
            &self.options.rollback_path,
            sessions.rollback_loaded,
            "rollback",
        );
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "{}",
            report.status_line()
        );
        Ok(report)
    }

    fn load_sessions(&self) -> UpgradeResult<Sessions> {
        let mode = self.options.mode;
        let failed_path = &self.options.failed_nodes_path;
        // Rollback never resumes from the failed-nodes file, so a corrupt one must not
        // block it.
        let (loaded_failed, save_failed) = match load_session::<FailedUpgradeInfo>(failed_path) {
            Ok(session) => (session, true),
            Err(err) if mode == RunMode::Rollback => {
                tracing::warn!("Ignoring failed nodes session, it will not be updated: {err}");
                (None, false)
            }
            Err(err) => return Err(err),
        };
        let loaded_rollback = load_session::<RollbackSession>(&self.options.rollback_path)?;

        let failed_loaded = loaded_failed.is_some();
        let mut failed = loaded_failed.unwrap_or_default();
        let resumed = mode == RunMode::Upgrade && !failed.is_empty();
        if resumed {
            tracing::info!(
                "Resuming upgrade of {} pending pairs from {}",
                failed.len(),
                failed_path.display()
            );
        } else if mode == RunMode::Upgrade {
            for item in self.config.work_items() {
                failed.add_pending(item.node, item.software);
            }
        }

        let rollback_loaded = loaded_rollback.is_some();
        let rollback = match loaded_rollback {
            Some(session) => {
                tracing::info!(
                    suffix = %session.session_suffix,
                    "Loaded rollback session {}",
                    self.options.rollback_path.display()
                );
                session
            }
            None => {
                if mode == RunMode::Rollback {
                    tracing::warn!(
                        "No rollback session at {}; nothing to roll back",
                        self.options.rollback_path.display()
                    );
                }
                RollbackSession::new(self.options.rollback_suffix.clone())
            }
        };

        Ok(Sessions {
            failed,
            rollback,
            resumed,
            failed_loaded,
            rollback_loaded,
            save_failed,
        })
    }

    fn execute(&self, sessions: &mut Sessions, report: &mut RunReport) {
        let mode = self.options.mode;
        let pause = self.config.common.group_pause;
        for group in self.config.group_names() {
            if self.cancelled() {
                break;
            }
            tracing::info!(group, "Performing {mode} for software group: {group}");
            let software = self.config.group_software(group);
            let mut did_work = false;
            for node in self.config.group_nodes(group) {
                if software.is_empty() {
                    continue;
                }
                if self.cancelled() {
                    break;
                }
                did_work = true;
                for name in software {
                    if self.cancelled() {
                        break;
                    }
                    report.record(self.process_pair(node, name, sessions));
                }
            }
            if self.cancelled() {
                break;
            }
            if did_work && !pause.is_zero() {
                tracing::info!("Pausing for {}...", humantime::format_duration(pause));
                if !pause_unless_cancelled(&self.cancel, pause) {
                    break;
                }
            }
        }
        if !self.cancelled() {
            report.status = RunStatus::Completed;
        }
    }

    fn process_pair(&self, node: &str, software: &str, sessions: &mut Sessions) -> PairOutcome {
        let mode = self.options.mode;
        if mode == RunMode::Rollback && !sessions.rollback.rollback_info.exists(node, software) {
            tracing::debug!(node, software, "nothing to roll back");
            return PairOutcome::Skipped;
        }
        if sessions.resumed && !sessions.failed.exists(node, software) {
            tracing::info!(node, software, "Skipping software {software} for node {node}");
            return PairOutcome::Skipped;
        }

        let plan = self.config.resolve(node, software);
        let mut shell = self.connector.connect(node, &plan.credentials);
        tracing::info!(node, software, "{mode} node: {node} with software: {software}");

        if run_step(&mut shell, &plan, Step::Stop, &plan.stop_cmd).is_err() {
            sessions.failed.add_pending(node, software);
            return PairOutcome::Failed;
        }

        let suffix = sessions.rollback.session_suffix.clone();
        let action_ok = if self.options.dry_run {
            tracing::info!(node, software, "Dry run, skipping {mode} of {software} on {node}");
            true
        } else {
            match mode {
                RunMode::Upgrade => {
                    let ok = steps::upgrade(&mut shell, &plan, &suffix);
                    if ok {
                        tracing::info!(
                            node,
                            software,
                            "Upgraded node: {node} with software {software} successfully"
                        );
                        sessions.failed.remove(node, software);
                        sessions.rollback.rollback_info.add_pending(node, software);
                    } else {
                        tracing::error!(node, software, "Error during upgrade of {software} on {node}");
                    }
                    ok
                }
                RunMode::Rollback => {
                    let ok = steps::rollback(&mut shell, &plan, &suffix);
                    if ok {
                        tracing::info!(
                            node,
                            software,
                            "Rollback node: {node} with software {software} successfully"
                        );
                        sessions.rollback.rollback_info.remove(node, software);
                    } else {
                        tracing::error!(node, software, "Error during rollback of {software} on {node}");
                    }
                    ok
                }
            }
        };

        let start_ok = run_step(&mut shell, &plan, Step::Start, &plan.start_cmd).is_ok();
        if action_ok && start_ok {
            PairOutcome::Succeeded
        } else {
            PairOutcome::Failed
        }
    }
}
