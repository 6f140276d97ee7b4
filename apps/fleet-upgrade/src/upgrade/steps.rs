use std::fmt;

use crate::error::RemoteError;
use crate::plan::{FileTransfer, ResolvedNodeUpgrade};
use crate::remote::{backup_command, restore_command, RemoteShell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Stop,
    Start,
    PreUpgrade,
    PostUpgrade,
    Backup,
    Verify,
    Restore,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::PreUpgrade => "preupgrade",
            Self::PostUpgrade => "postupgrade",
            Self::Backup => "backup",
            Self::Verify => "verify",
            Self::Restore => "restore",
        })
    }
}

/// Runs one remote command for `plan`, logging the command and its outcome.
/// An empty command is treated as nothing to do.
pub(super) fn run_step<S: RemoteShell>(
    shell: &mut S,
    plan: &ResolvedNodeUpgrade,
    step: Step,
    command: &str,
) -> Result<(), RemoteError> {
    let node = plan.node.as_str();
    let software = plan.software.as_str();
    let command = command.trim();
    if command.is_empty() {
        tracing::debug!(node, software, step = %step, "no command configured");
        return Ok(());
    }
    tracing::debug!(node, software, step = %step, "$ {command}");
    match shell.run(command) {
        Ok(output) => {
            let output = output.trim_end();
            tracing::info!(node, software, step = %step, "Node: {node} {step}: ok");
            for line in output.lines().filter(|line| !line.trim().is_empty()) {
                tracing::debug!(node, software, step = %step, "{line}");
            }
            Ok(())
        }
        Err(err) => {
            tracing::error!(node, software, step = %step, "Node: {node} {step}: {err}");
            Err(err)
        }
    }
}

/// Pushes one file: backup of the current remote copy, the copy itself, then the
/// optional verification command.
fn push_transfer<S: RemoteShell>(
    shell: &mut S,
    plan: &ResolvedNodeUpgrade,
    transfer: &FileTransfer,
    suffix: &str,
) -> Result<(), RemoteError> {
    let node = plan.node.as_str();
    let software = plan.software.as_str();
    run_step(
        shell,
        plan,
        Step::Backup,
        &backup_command(&transfer.destination, suffix),
    )?;
    shell
        .copy_file(&transfer.source, &transfer.destination, &transfer.permissions)
        .inspect_err(|err| {
            tracing::error!(node, software, "Error copying {}: {err}", transfer.source.display())
        })?;
    tracing::info!(
        node,
        software,
        "Copied {} to {}:{}",
        transfer.source.display(),
        node,
        transfer.destination
    );
    if let Some(verify) = transfer.verify_command.as_deref() {
        run_step(shell, plan, Step::Verify, verify).map_err(|err| {
            RemoteError::transfer(
                node,
                &transfer.destination,
                format!("verification failed: {err}"),
            )
        })?;
    }
    Ok(())
}

/// Runs the upgrade action for a pair whose software is already stopped.
///
/// Pre-upgrade hooks run first and stop the action on failure. Every transfer is
/// attempted even after an earlier one fails; the action succeeds only if all did.
pub(super) fn upgrade<S: RemoteShell>(
    shell: &mut S,
    plan: &ResolvedNodeUpgrade,
    suffix: &str,
) -> bool {
    for hook in &plan.pre_upgrade {
        if run_step(shell, plan, Step::PreUpgrade, hook).is_err() {
            return false;
        }
    }

    let mut failed_transfers = 0usize;
    for transfer in &plan.transfers {
        if push_transfer(shell, plan, transfer, suffix).is_err() {
            failed_transfers += 1;
        }
    }
    if failed_transfers > 0 {
        tracing::error!(
            node = %plan.node,
            software = %plan.software,
            "{failed_transfers} of {} file transfers failed",
            plan.transfers.len()
        );
        return false;
    }

    for hook in &plan.post_upgrade {
        if run_step(shell, plan, Step::PostUpgrade, hook).is_err() {
            return false;
        }
    }
    true
}

/// Moves each `<destination>.<suffix>` backup back into place.
pub(super) fn rollback<S: RemoteShell>(
    shell: &mut S,
    plan: &ResolvedNodeUpgrade,
    suffix: &str,
) -> bool {
    let mut ok = true;
    for transfer in &plan.transfers {
        let command = restore_command(&transfer.destination, suffix);
        if run_step(shell, plan, Step::Restore, &command).is_err() {
            ok = false;
        }
    }
    ok
}
