use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{UpgradeError, UpgradeResult};

pub const DEFAULT_SSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshInfo {
    /// Path of the private key used to authenticate.
    #[serde(default)]
    pub ssh_cert: String,
    #[serde(default)]
    pub ssh_username: String,
}

/// One entry of a `Copy` list as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    #[serde(default, rename = "Local_Filename")]
    pub local_filename: String,
    #[serde(default, rename = "Remote_Filename")]
    pub remote_filename: String,
    #[serde(default, rename = "Permissions")]
    pub permissions: String,
    #[serde(default, rename = "VerifyCopy")]
    pub verify_copy: String,
}

impl TransferEntry {
    pub fn is_blank(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeInfo {
    #[serde(default, rename = "postupgrade")]
    pub post_upgrade: Vec<String>,
    #[serde(default, rename = "preupgrade")]
    pub pre_upgrade: Vec<String>,
    #[serde(default, rename = "start")]
    pub start_cmd: String,
    #[serde(default, rename = "stop")]
    pub stop_cmd: String,
    /// Keys are integers written as strings; copies run in numeric key order.
    #[serde(default, rename = "Copy")]
    pub copy: BTreeMap<String, TransferEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOverrides {
    #[serde(flatten)]
    pub upgrade: UpgradeInfo,
    #[serde(flatten)]
    pub ssh: SshInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    #[serde(flatten)]
    pub ssh: SshInfo,
    #[serde(default)]
    pub software_group: HashMap<String, Vec<String>>,
    #[serde(
        default,
        rename = "group_pause_after_upgrade",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub group_pause: Duration,
    #[serde(default)]
    pub ssh_timeout: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub ssh_known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub nodes: HashMap<String, NodeOverrides>,
    #[serde(default)]
    pub software: HashMap<String, UpgradeInfo>,
    #[serde(default, rename = "groupnodes")]
    pub group_nodes: HashMap<String, Vec<String>>,
}

/// A single unit of work: one software on one node, within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem<'a> {
    pub group: &'a str,
    pub node: &'a str,
    pub software: &'a str,
}

impl UpgradeConfig {
    pub fn from_slice(bytes: &[u8]) -> UpgradeResult<Self> {
        let config: UpgradeConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> UpgradeResult<()> {
        let copy_lists = self
            .software
            .iter()
            .map(|(name, info)| (format!("software {name}"), &info.copy))
            .chain(
                self.nodes
                    .iter()
                    .map(|(name, info)| (format!("node {name}"), &info.upgrade.copy)),
            );
        let mut problems = Vec::new();
        for (owner, copy) in copy_lists {
            for key in copy.keys() {
                if key.trim().parse::<u32>().is_err() {
                    problems.push(format!("{owner}: Copy key {key:?} is not a number"));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(UpgradeError::Config(problems.join("; ")))
        }
    }

    /// Group names in sorted order so every run walks groups the same way.
    pub fn group_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.group_nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn group_nodes(&self, group: &str) -> &[String] {
        self.group_nodes
            .get(group)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn group_software(&self, group: &str) -> &[String] {
        self.common
            .software_group
            .get(group)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every node referenced by a group, first occurrence wins, groups in sorted order.
    pub fn node_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for group in self.group_names() {
            for node in self.group_nodes(group) {
                if seen.insert(node.as_str()) {
                    nodes.push(node.as_str());
                }
            }
        }
        nodes
    }

    /// All (group, node, software) triples in execution order.
    pub fn work_items(&self) -> Vec<WorkItem<'_>> {
        let mut items = Vec::new();
        for group in self.group_names() {
            let software = self.group_software(group);
            for node in self.group_nodes(group) {
                for name in software {
                    items.push(WorkItem {
                        group,
                        node,
                        software: name,
                    });
                }
            }
        }
        items
    }

    pub fn ssh_timeout(&self) -> Duration {
        let Some(raw) = self.common.ssh_timeout.as_deref() else {
            return DEFAULT_SSH_TIMEOUT;
        };
        match humantime::parse_duration(raw.trim()) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            Ok(_) => DEFAULT_SSH_TIMEOUT,
            Err(err) => {
                tracing::warn!(value = raw, error = %err, "invalid ssh_timeout; using default");
                DEFAULT_SSH_TIMEOUT
            }
        }
    }

    pub fn ssh_port(&self) -> u16 {
        self.common
            .ssh_port
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_SSH_PORT)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Nanos(u64),
    Fractional(f64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        RawDuration::Fractional(nanos) if nanos.is_finite() && nanos >= 0.0 => {
            Ok(Duration::from_nanos(nanos as u64))
        }
        RawDuration::Fractional(nanos) => Err(serde::de::Error::custom(format!(
            "invalid duration {nanos}"
        ))),
        RawDuration::Text(text) => parse_duration_text(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration_text(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration {trimmed:?}: {err}"))
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "common": {
            "ssh_username": "ubuntu",
            "ssh_cert": "~/.ssh/fleet.pem",
            "software_group": {
                "group2": ["blockmetrics"],
                "group1": ["vault", "quorum"]
            },
            "group_pause_after_upgrade": "1m30s",
            "ssh_timeout": "10s"
        },
        "nodes": {
            "node1": {
                "start": "sudo systemctl start quorum-custom",
                "ssh_username": "admin"
            }
        },
        "software": {
            "quorum": {
                "start": "sudo systemctl start quorum",
                "stop": "sudo systemctl stop quorum",
                "Copy": {
                    "0": {
                        "Local_Filename": "/opt/build/geth",
                        "Remote_Filename": "/usr/local/bin/geth",
                        "Permissions": "0755"
                    }
                }
            }
        },
        "groupnodes": {
            "group2": ["node3"],
            "group1": ["node1", "node2"]
        }
    }"#;

    #[test]
    fn parses_sample_document() {
        let config = UpgradeConfig::from_slice(SAMPLE.as_bytes()).expect("parse config");
        assert_eq!(config.common.ssh.ssh_username, "ubuntu");
        assert_eq!(config.common.group_pause, Duration::from_secs(90));
        assert_eq!(config.ssh_timeout(), Duration::from_secs(10));
        assert_eq!(config.ssh_port(), 22);
        assert_eq!(config.nodes["node1"].ssh.ssh_username, "admin");
        assert_eq!(
            config.software["quorum"].copy["0"].permissions,
            "0755".to_string()
        );
    }

    #[test]
    fn group_names_are_sorted() {
        let config = UpgradeConfig::from_slice(SAMPLE.as_bytes()).expect("parse config");
        assert_eq!(config.group_names(), vec!["group1", "group2"]);
        assert_eq!(config.node_names(), vec!["node1", "node2", "node3"]);
    }

    #[test]
    fn work_items_follow_group_then_node_then_software_order() {
        let config = UpgradeConfig::from_slice(SAMPLE.as_bytes()).expect("parse config");
        let items: Vec<(&str, &str)> = config
            .work_items()
            .into_iter()
            .map(|item| (item.node, item.software))
            .collect();
        assert_eq!(
            items,
            vec![
                ("node1", "vault"),
                ("node1", "quorum"),
                ("node2", "vault"),
                ("node2", "quorum"),
                ("node3", "blockmetrics"),
            ]
        );
    }

    #[test]
    fn group_pause_accepts_nanoseconds() {
        let config = UpgradeConfig::from_slice(
            br#"{"common": {"group_pause_after_upgrade": 2500000000}}"#,
        )
        .expect("parse config");
        assert_eq!(config.common.group_pause, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_group_pause_is_a_config_error() {
        let err = UpgradeConfig::from_slice(br#"{"common": {"group_pause_after_upgrade": "soon"}}"#)
            .expect_err("should reject");
        assert!(matches!(err, UpgradeError::Config(_)), "got {err:?}");
    }

    #[test]
    fn missing_or_bad_ssh_timeout_falls_back_to_default() {
        let mut config = UpgradeConfig::default();
        assert_eq!(config.ssh_timeout(), DEFAULT_SSH_TIMEOUT);
        config.common.ssh_timeout = Some("later".to_string());
        assert_eq!(config.ssh_timeout(), DEFAULT_SSH_TIMEOUT);
    }

    #[test]
    fn non_numeric_copy_keys_are_rejected() {
        let err = UpgradeConfig::from_slice(
            br#"{"software": {"vault": {"Copy": {"first": {"Local_Filename": "/tmp/a"}}}}}"#,
        )
        .expect_err("should reject");
        let UpgradeError::Config(message) = err else {
            panic!("expected config error");
        };
        assert!(message.contains("software vault"), "{message}");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = UpgradeConfig::from_slice(b"{not json").expect_err("should reject");
        assert!(matches!(err, UpgradeError::Config(_)));
    }

    #[test]
    fn unknown_group_yields_empty_lists() {
        let config = UpgradeConfig::default();
        assert!(config.group_nodes("missing").is_empty());
        assert!(config.group_software("missing").is_empty());
    }
}
