use std::collections::{BTreeSet, HashSet};
use std::net::ToSocketAddrs;

use super::types::RunMode;
use super::Orchestrator;
use crate::error::{UpgradeError, UpgradeResult};
use crate::plan::ordered_transfers;
use crate::remote::{RemoteShell, ShellConnector};

/// Parent directory of a remote file path, as `dirname` would report it.
pub(super) fn remote_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

impl<C: ShellConnector> Orchestrator<C> {
    /// Runs the enabled checks and fails with every problem found.
    pub(super) fn preflight(&self) -> UpgradeResult<()> {
        let checks = self.options.verification;
        if checks.source_files && self.options.mode == RunMode::Upgrade {
            self.verify_source_files()?;
            tracing::info!("All source files verified.");
        }

        let groups = self.config.group_names();
        tracing::info!("{} groups defined: {:?}", groups.len(), groups);
        let nodes = self.config.node_names();
        tracing::info!("{} nodes found: {:?}", nodes.len(), nodes);

        if checks.nodes {
            self.verify_nodes_resolve(&nodes)?;
            tracing::info!("All nodes verified to be resolvable to IP addresses.");
        }
        if checks.target_dirs {
            tracing::info!("Verifying target directories, please wait.");
            self.verify_target_dirs()?;
            tracing::info!("All remote directories verified.");
        }
        Ok(())
    }

    fn verify_source_files(&self) -> UpgradeResult<()> {
        let copy_lists = self
            .config
            .software
            .iter()
            .map(|(name, info)| (format!("software {name}"), &info.copy))
            .chain(
                self.config
                    .nodes
                    .iter()
                    .map(|(name, info)| (format!("node {name}"), &info.upgrade.copy)),
            );
        let mut missing = BTreeSet::new();
        for (owner, copy) in copy_lists {
            for transfer in ordered_transfers(copy) {
                if !transfer.source.is_file() {
                    missing.insert(format!(
                        "{owner}: source file {} doesn't exist",
                        transfer.source.display()
                    ));
                }
            }
        }
        into_result(missing.into_iter().collect())
    }

    fn verify_nodes_resolve(&self, nodes: &[&str]) -> UpgradeResult<()> {
        let port = self.config.ssh_port();
        let problems = nodes
            .iter()
            .filter(|node| {
                (**node, port)
                    .to_socket_addrs()
                    .map(|mut addrs| addrs.next().is_none())
                    .unwrap_or(true)
            })
            .map(|node| format!("Can't resolve {node}"))
            .collect();
        into_result(problems)
    }

    fn verify_target_dirs(&self) -> UpgradeResult<()> {
        let mut checked: HashSet<(String, String)> = HashSet::new();
        let mut reported_errors = HashSet::new();
        let mut problems = Vec::new();

        for group in self.config.group_names() {
            let software = self.config.group_software(group);
            if software.is_empty() {
                continue;
            }
            for node in self.config.group_nodes(group) {
                for name in software {
                    let plan = self.config.resolve(node, name);
                    let mut shell = self.connector.connect(node, &plan.credentials);
                    for transfer in &plan.transfers {
                        let dir = remote_dir(&transfer.destination);
                        let cache_key = (node.clone(), dir.clone());
                        if checked.contains(&cache_key) {
                            continue;
                        }
                        match shell.directory_exists(&dir) {
                            Ok(exists) => {
                                if !exists {
                                    problems.push(format!(
                                        "Remote directory: {dir} doesn't exist on node: {node}"
                                    ));
                                }
                                checked.insert(cache_key);
                            }
                            Err(err) => {
                                let message = format!("Node: {node} error: {err}");
                                if reported_errors.insert(message.clone()) {
                                    problems.push(message);
                                }
                            }
                        }
                    }
                }
            }
        }
        into_result(problems)
    }
}

fn into_result(problems: Vec<String>) -> UpgradeResult<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(UpgradeError::Preflight(problems.join("\n")))
    }
}
