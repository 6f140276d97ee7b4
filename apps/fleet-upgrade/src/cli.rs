use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::paths::{DEFAULT_DEBUG_LOG, DEFAULT_FAILED_NODES};
use crate::upgrade::{RunMode, Verification};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fleet-upgrade",
    version,
    about = "Staged software upgrade and rollback across remote nodes over SSH"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = RunMode::Upgrade)]
    pub mode: RunMode,
    /// Also write debug-level logs to --debug-log.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value = DEFAULT_DEBUG_LOG)]
    pub debug_log: PathBuf,
    /// JSON configuration describing nodes, software and groups.
    #[arg(long)]
    pub json: PathBuf,
    /// Session file of pairs that still need upgrading.
    #[arg(long, default_value = DEFAULT_FAILED_NODES)]
    pub failed_nodes: PathBuf,
    /// Rollback session file. Defaults to ~/Upgrade-Rollback-<suffix>.session for this run.
    #[arg(long)]
    pub rollback_nodes: Option<PathBuf>,
    /// Skip DNS resolution of node names.
    #[arg(long, default_value_t = false)]
    pub disable_node_verification: bool,
    /// Skip checking that local source files exist.
    #[arg(long, default_value_t = false)]
    pub disable_file_verification: bool,
    /// Skip checking that remote target directories exist.
    #[arg(long, default_value_t = false)]
    pub disable_target_dir_verification: bool,
    /// Stop and start software without transferring or restoring files.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub dry_run: bool,
}

impl Cli {
    pub fn verification(&self) -> Verification {
        Verification {
            nodes: !self.disable_node_verification,
            source_files: !self.disable_file_verification,
            target_dirs: !self.disable_target_dir_verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_upgrade_dry_run() {
        let cli = Cli::try_parse_from(["fleet-upgrade", "--json", "nodes.json"]).expect("parse");
        assert_eq!(cli.mode, RunMode::Upgrade);
        assert!(cli.dry_run);
        assert!(!cli.debug);
        assert_eq!(cli.failed_nodes, PathBuf::from("~/Upgrade-Failed.session"));
        assert_eq!(cli.debug_log, PathBuf::from("~/Upgrade-debug.log"));
        assert!(cli.rollback_nodes.is_none());
        assert_eq!(
            cli.verification(),
            Verification {
                nodes: true,
                source_files: true,
                target_dirs: true,
            }
        );
    }

    #[test]
    fn parses_rollback_with_explicit_flags() {
        let cli = Cli::try_parse_from([
            "fleet-upgrade",
            "--mode",
            "rollback",
            "--json",
            "nodes.json",
            "--rollback-nodes",
            "/tmp/r.session",
            "--dry-run",
            "false",
            "--disable-target-dir-verification",
        ])
        .expect("parse");
        assert_eq!(cli.mode, RunMode::Rollback);
        assert!(!cli.dry_run);
        assert_eq!(cli.rollback_nodes, Some(PathBuf::from("/tmp/r.session")));
        assert!(!cli.verification().target_dirs);
        assert!(cli.verification().nodes);
    }

    #[test]
    fn rejects_unknown_mode_and_missing_json() {
        assert!(Cli::try_parse_from(["fleet-upgrade", "--json", "a.json", "--mode", "revert"]).is_err());
        assert!(Cli::try_parse_from(["fleet-upgrade"]).is_err());
    }
}
