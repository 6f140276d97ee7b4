use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{UpgradeError, UpgradeResult};

/// Node name to the set of software names recorded against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeSoftwareSet {
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl NodeSoftwareSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending(&mut self, node: &str, software: &str) {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .insert(software.to_string());
    }

    pub fn remove(&mut self, node: &str, software: &str) -> bool {
        let Some(entries) = self.nodes.get_mut(node) else {
            return false;
        };
        let removed = entries.remove(software);
        if entries.is_empty() {
            self.nodes.remove(node);
        }
        removed
    }

    pub fn exists(&self, node: &str, software: &str) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|entries| entries.contains(software))
    }

    pub fn count_for_node(&self, node: &str) -> usize {
        self.nodes.get(node).map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.values().all(BTreeSet::is_empty)
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.nodes.iter().flat_map(|(node, entries)| {
            entries
                .iter()
                .map(move |software| (node.as_str(), software.as_str()))
        })
    }
}

/// Pairs still pending or failed; on disk it is a plain `{node: [software]}` object.
pub type FailedUpgradeInfo = NodeSoftwareSet;

/// Pairs that have a retained backup and can be rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSession {
    pub session_suffix: String,
    #[serde(default)]
    pub rollback_info: NodeSoftwareSet,
}

impl RollbackSession {
    pub fn new(session_suffix: impl Into<String>) -> Self {
        Self {
            session_suffix: session_suffix.into(),
            rollback_info: NodeSoftwareSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    RemovedStale,
    Skipped,
}

/// JSON persistence shared by both session files.
pub trait SessionFile: Serialize + DeserializeOwned {
    fn has_entries(&self) -> bool;

    /// Reads the session at `path`; `Ok(None)` when no file exists.
    fn load(path: &Path) -> UpgradeResult<Option<Self>> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(UpgradeError::SessionIo {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| UpgradeError::CorruptSession {
                path: path.to_path_buf(),
                source,
            })
    }

    fn save(&self, path: &Path) -> UpgradeResult<()> {
        let io_err = |source| UpgradeError::SessionIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = serde_json::to_vec_pretty(self)
            .map_err(|err| io_err(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        fs::write(path, contents).map_err(io_err)
    }

    /// Saves only when there is something to record. An empty set never creates or
    /// overwrites a file; if this run consumed an existing file it is removed instead.
    fn persist(&self, path: &Path, consumed_existing: bool) -> UpgradeResult<PersistOutcome> {
        if self.has_entries() {
            self.save(path)?;
            return Ok(PersistOutcome::Saved);
        }
        if consumed_existing {
            match fs::remove_file(path) {
                Ok(()) => return Ok(PersistOutcome::RemovedStale),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(UpgradeError::SessionIo {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
        Ok(PersistOutcome::Skipped)
    }
}

impl SessionFile for NodeSoftwareSet {
    fn has_entries(&self) -> bool {
        !self.is_empty()
    }
}

impl SessionFile for RollbackSession {
    fn has_entries(&self) -> bool {
        !self.rollback_info.is_empty()
    }
}
