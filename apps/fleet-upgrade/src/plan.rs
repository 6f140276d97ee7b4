use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::{NodeOverrides, TransferEntry, UpgradeConfig, UpgradeInfo};
use crate::paths::expand_home;

/// A local file to push to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub order: u32,
    pub source: PathBuf,
    pub destination: String,
    /// Four octal digits, e.g. `0644`. Checked by the gateway before sending anything.
    pub permissions: String,
    pub verify_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub private_key_path: PathBuf,
}

/// The effective upgrade plan for one (node, software) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNodeUpgrade {
    pub node: String,
    pub software: String,
    pub start_cmd: String,
    pub stop_cmd: String,
    pub pre_upgrade: Vec<String>,
    pub post_upgrade: Vec<String>,
    pub transfers: Vec<FileTransfer>,
    pub credentials: Credentials,
}

impl UpgradeConfig {
    /// Resolves the plan for `software` on `node`.
    ///
    /// Each field independently takes the node override when it is non-empty and the
    /// software default otherwise; credentials fall back to `common`.
    pub fn resolve(&self, node: &str, software: &str) -> ResolvedNodeUpgrade {
        let empty_node = NodeOverrides::default();
        let empty_software = UpgradeInfo::default();
        let overrides = self.nodes.get(node).unwrap_or(&empty_node);
        let defaults = self.software.get(software).unwrap_or(&empty_software);
        let ours = &overrides.upgrade;

        let start_cmd = pick_str(&ours.start_cmd, &defaults.start_cmd);
        let stop_cmd = pick_str(&ours.stop_cmd, &defaults.stop_cmd);
        let pre_upgrade = pick_list(&ours.pre_upgrade, &defaults.pre_upgrade);
        let post_upgrade = pick_list(&ours.post_upgrade, &defaults.post_upgrade);
        let copy = if ours.copy.is_empty() {
            &defaults.copy
        } else {
            &ours.copy
        };
        let username = pick_str(&overrides.ssh.ssh_username, &self.common.ssh.ssh_username);
        let key_path = pick_str(&overrides.ssh.ssh_cert, &self.common.ssh.ssh_cert);

        ResolvedNodeUpgrade {
            node: node.to_string(),
            software: software.to_string(),
            start_cmd,
            stop_cmd,
            pre_upgrade,
            post_upgrade,
            transfers: ordered_transfers(copy),
            credentials: Credentials {
                username,
                private_key_path: expand_home(std::path::Path::new(&key_path)),
            },
        }
    }
}

fn pick_str(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

fn pick_list(preferred: &[String], fallback: &[String]) -> Vec<String> {
    if preferred.is_empty() {
        fallback.to_vec()
    } else {
        preferred.to_vec()
    }
}

/// Orders a `Copy` map numerically, dropping blank entries and entries without a source.
pub fn ordered_transfers(copy: &BTreeMap<String, TransferEntry>) -> Vec<FileTransfer> {
    let mut ordered: Vec<(u32, &TransferEntry)> = copy
        .iter()
        .filter_map(|(key, entry)| key.trim().parse::<u32>().ok().map(|order| (order, entry)))
        .collect();
    ordered.sort_by_key(|(order, _)| *order);
    ordered
        .into_iter()
        .filter(|(_, entry)| !entry.is_blank() && !entry.local_filename.trim().is_empty())
        .map(|(order, entry)| FileTransfer {
            order,
            source: expand_home(std::path::Path::new(entry.local_filename.trim())),
            destination: entry.remote_filename.trim().to_string(),
            permissions: entry.permissions.trim().to_string(),
            verify_command: Some(entry.verify_copy.trim())
                .filter(|cmd| !cmd.is_empty())
                .map(str::to_string),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshInfo;

    fn entry(local: &str, remote: &str) -> TransferEntry {
        TransferEntry {
            local_filename: local.to_string(),
            remote_filename: remote.to_string(),
            permissions: "0755".to_string(),
            verify_copy: String::new(),
        }
    }

    fn base_config() -> UpgradeConfig {
        let mut config = UpgradeConfig::default();
        config.common.ssh = SshInfo {
            ssh_cert: "/keys/common.pem".to_string(),
            ssh_username: "ubuntu".to_string(),
        };
        let mut copy = BTreeMap::new();
        copy.insert("0".to_string(), entry("/build/geth", "/usr/local/bin/geth"));
        config.software.insert(
            "quorum".to_string(),
            UpgradeInfo {
                post_upgrade: vec!["echo post".to_string()],
                pre_upgrade: vec!["echo pre".to_string()],
                start_cmd: "systemctl start quorum".to_string(),
                stop_cmd: "systemctl stop quorum".to_string(),
                copy,
            },
        );
        config
    }

    #[test]
    fn unknown_node_uses_software_defaults_and_common_credentials() {
        let config = base_config();
        let plan = config.resolve("node9", "quorum");
        assert_eq!(plan.start_cmd, "systemctl start quorum");
        assert_eq!(plan.stop_cmd, "systemctl stop quorum");
        assert_eq!(plan.pre_upgrade, vec!["echo pre".to_string()]);
        assert_eq!(plan.credentials.username, "ubuntu");
        assert_eq!(
            plan.credentials.private_key_path,
            PathBuf::from("/keys/common.pem")
        );
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].destination, "/usr/local/bin/geth");
    }

    #[test]
    fn partial_node_override_keeps_other_inherited_fields() {
        let mut config = base_config();
        let mut overrides = NodeOverrides::default();
        overrides.upgrade.start_cmd = "systemctl start quorum-node1".to_string();
        overrides.ssh.ssh_username = "admin".to_string();
        config.nodes.insert("node1".to_string(), overrides);

        let plan = config.resolve("node1", "quorum");
        assert_eq!(plan.start_cmd, "systemctl start quorum-node1");
        assert_eq!(plan.stop_cmd, "systemctl stop quorum");
        assert_eq!(plan.post_upgrade, vec!["echo post".to_string()]);
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.credentials.username, "admin");
        assert_eq!(
            plan.credentials.private_key_path,
            PathBuf::from("/keys/common.pem")
        );
    }

    #[test]
    fn node_copy_list_replaces_software_copy_list() {
        let mut config = base_config();
        let mut overrides = NodeOverrides::default();
        overrides
            .upgrade
            .copy
            .insert("1".to_string(), entry("/build/geth-arm", "/opt/geth"));
        config.nodes.insert("node2".to_string(), overrides);

        let plan = config.resolve("node2", "quorum");
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].source, PathBuf::from("/build/geth-arm"));
        assert_eq!(plan.transfers[0].order, 1);
    }

    #[test]
    fn resolve_is_deterministic() {
        let mut config = base_config();
        let mut overrides = NodeOverrides::default();
        overrides.upgrade.stop_cmd = "pkill -INT geth".to_string();
        config.nodes.insert("node1".to_string(), overrides);
        let first = config.resolve("node1", "quorum");
        for _ in 0..5 {
            assert_eq!(config.resolve("node1", "quorum"), first);
        }
    }

    #[test]
    fn transfers_are_ordered_numerically_and_skip_blank_entries() {
        let mut copy = BTreeMap::new();
        copy.insert("10".to_string(), entry("/b/ten", "/r/ten"));
        copy.insert("2".to_string(), entry("/b/two", "/r/two"));
        copy.insert("0".to_string(), TransferEntry::default());
        copy.insert("1".to_string(), entry("", "/r/no-source"));
        copy.insert("3".to_string(), entry("/b/three", "/r/three"));

        let transfers = ordered_transfers(&copy);
        let orders: Vec<u32> = transfers.iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![2, 3, 10]);
    }

    #[test]
    fn verify_command_is_optional() {
        let mut copy = BTreeMap::new();
        let mut with_verify = entry("/b/a", "/r/a");
        with_verify.verify_copy = " sha256sum /r/a ".to_string();
        copy.insert("0".to_string(), with_verify);
        copy.insert("1".to_string(), entry("/b/b", "/r/b"));

        let transfers = ordered_transfers(&copy);
        assert_eq!(
            transfers[0].verify_command.as_deref(),
            Some("sha256sum /r/a")
        );
        assert_eq!(transfers[1].verify_command, None);
    }
}
