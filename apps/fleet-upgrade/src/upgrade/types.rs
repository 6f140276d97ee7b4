use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    Upgrade,
    Rollback,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-flight checks to run before any remote work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub nodes: bool,
    pub source_files: bool,
    pub target_dirs: bool,
}

impl Verification {
    pub fn all() -> Self {
        Self {
            nodes: true,
            source_files: true,
            target_dirs: true,
        }
    }

    pub fn none() -> Self {
        Self {
            nodes: false,
            source_files: false,
            target_dirs: false,
        }
    }
}

impl Default for Verification {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub dry_run: bool,
    pub verification: Verification,
    pub failed_nodes_path: PathBuf,
    pub rollback_path: PathBuf,
    /// Backup suffix for this run; replaced by the stored one when a rollback session
    /// is loaded.
    pub rollback_suffix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PairOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: RunMode,
    pub status: RunStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            status: RunStatus::Aborted,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub(super) fn record(&mut self, outcome: PairOutcome) {
        match outcome {
            PairOutcome::Succeeded => self.succeeded += 1,
            PairOutcome::Failed => self.failed += 1,
            PairOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn status_line(&self) -> String {
        format!("{} {}", self.mode, self.status.as_str())
    }

    /// 0 when completed, 1 when aborted.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Aborted => 1,
        }
    }
}
