//! Host Disk Model
//!
//! Passive holder for everything discovery learns about the node. A model
//! is built fresh for each controller invocation and dropped afterwards;
//! nothing in it is trusted across calls.

pub mod presenter;

pub use presenter::*;

use crate::cluster::config::CephConf;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// Block Devices
// =============================================================================

/// Raw lsblk columns in the order the tool reported them
pub type DeviceAttributes = IndexMap<String, String>;

/// A partition as reported by lsblk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub name: String,
    pub attributes: DeviceAttributes,
}

impl PartitionRecord {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn mountpoint(&self) -> Option<&str> {
        self.attr("MOUNTPOINT")
    }

    pub fn fstype(&self) -> Option<&str> {
        self.attr("FSTYPE")
    }

    /// GPT partition type GUID, lower-cased by lsblk
    pub fn parttype(&self) -> Option<&str> {
        self.attr("PARTTYPE")
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.attr("PKNAME")
    }

    pub fn is_swap(&self) -> bool {
        self.mountpoint() == Some("[SWAP]")
    }
}

/// A whole disk and the partitions lsblk placed under it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub name: String,
    pub attributes: DeviceAttributes,
    /// Label type from `parted print`, e.g. `gpt` or `msdos`
    pub partition_table: Option<String>,
    pub partitions: BTreeMap<String, PartitionRecord>,
}

impl DiskRecord {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.attr("SIZE").and_then(|s| s.parse().ok())
    }

    pub fn rotational(&self) -> Option<bool> {
        self.attr("ROTA").map(|r| r == "1")
    }

    pub fn scheduler(&self) -> Option<&str> {
        self.attr("SCHED")
    }

    pub fn vendor(&self) -> Option<&str> {
        self.attr("VENDOR")
    }

    pub fn is_gpt(&self) -> bool {
        self.partition_table.as_deref() == Some("gpt")
    }
}

// =============================================================================
// OSD Metadata
// =============================================================================

/// Identity files found in the root of an OSD data filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdMetadata {
    pub ceph_fsid: String,
    pub fsid: String,
    pub magic: String,
    /// Absent when the partition was reused
    pub journal_uuid: Option<String>,
    /// Absent until the OSD has been activated once
    pub whoami: Option<String>,
    /// Target of the `journal` symlink
    pub journal_device: Option<String>,
}

/// An OSD found on this node, keyed by its cluster in the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDaemon {
    pub fsid: String,
    pub cluster_fsid: String,
    pub magic: String,
    pub journal_uuid: Option<String>,
    pub whoami: Option<String>,
    pub device: String,
    pub journal_device: Option<String>,
    pub parent_device: Option<String>,
}

impl DiscoveredDaemon {
    pub fn from_metadata(device: &str, parent: Option<&str>, metadata: OsdMetadata) -> Self {
        Self {
            fsid: metadata.fsid,
            cluster_fsid: metadata.ceph_fsid,
            magic: metadata.magic,
            journal_uuid: metadata.journal_uuid,
            whoami: metadata.whoami,
            device: device.to_string(),
            journal_device: metadata.journal_device,
            parent_device: parent.map(str::to_string),
        }
    }
}

// =============================================================================
// Tool Versions
// =============================================================================

/// `major.minor[.revision]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl ToolVersion {
    pub fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Parsed `ceph --version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephVersion {
    pub major: u32,
    pub minor: u32,
    /// Everything after the minor number, e.g. `2` or `1-559-g5ae0` on dev builds
    pub revision: String,
    /// Build commit, without parentheses
    pub uuid: String,
}

// =============================================================================
// Cluster State
// =============================================================================

/// One `mon_initial_members` entry paired with its `mon_host` address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMember {
    pub name: String,
    pub addr: String,
}

impl MonitorMember {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// `mon_status` as reported by the local admin socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonStatus(pub serde_json::Value);

impl MonStatus {
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(|v| v.as_str())
    }

    pub fn fsid(&self) -> Option<&str> {
        self.0.pointer("/monmap/fsid").and_then(|v| v.as_str())
    }

    pub fn outside_quorum(&self) -> Vec<&str> {
        self.0
            .get("outside_quorum")
            .and_then(|v| v.as_array())
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default()
    }

    /// In quorum unless our own name is listed outside it
    pub fn in_quorum(&self) -> bool {
        match self.name() {
            Some(name) => !self.outside_quorum().contains(&name),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub poolnum: i64,
}

/// One entity from `ceph auth list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub key: Option<String>,
    /// `[service, capability]` pairs
    pub caps: Vec<Vec<String>>,
}

// =============================================================================
// Node Model
// =============================================================================

/// Everything known about the node for one invocation
#[derive(Debug, Clone, Default)]
pub struct NodeModel {
    pub hostname: Option<String>,
    pub cluster_name: Option<String>,
    pub cluster_uuid: Option<String>,

    pub disks: BTreeMap<String, DiskRecord>,
    /// Partition device path to owning disk
    pub partition_parent: BTreeMap<String, String>,
    /// Real device path to the stable aliases that resolve to it
    pub symlinks: BTreeMap<String, BTreeSet<String>>,
    pub storage_partitions: BTreeSet<String>,
    pub journal_partitions: BTreeSet<String>,
    /// Cluster fsid to the OSDs found for it
    pub discovered_daemons: BTreeMap<String, Vec<DiscoveredDaemon>>,

    pub conf: Option<CephConf>,
    /// Order matters when building the monitor map
    pub monitor_members: Vec<MonitorMember>,

    pub lsblk_version: Option<ToolVersion>,
    pub ceph_version: Option<CephVersion>,
    pub mon_status: Option<MonStatus>,
    pub cluster_status: Option<serde_json::Value>,
    pub auth_list: BTreeMap<String, AuthEntry>,
    pub pool_list: BTreeMap<String, PoolInfo>,

    pub refreshed_at: Option<DateTime<Utc>>,
}

impl NodeModel {
    pub fn new(cluster_name: Option<String>, cluster_uuid: Option<String>) -> Self {
        Self {
            cluster_name,
            cluster_uuid,
            ..Default::default()
        }
    }

    /// Look up a partition record anywhere on the node
    pub fn partition(&self, part: &str) -> Option<&PartitionRecord> {
        let disk = self.partition_parent.get(part)?;
        self.disks.get(disk)?.partitions.get(part)
    }

    /// The disk a partition lives on
    pub fn parent_disk(&self, part: &str) -> Option<&DiskRecord> {
        self.disks.get(self.partition_parent.get(part)?)
    }

    /// Every OSD in any cluster
    pub fn all_daemons(&self) -> impl Iterator<Item = &DiscoveredDaemon> {
        self.discovered_daemons.values().flatten()
    }

    /// Whether this host is listed in `mon_initial_members`
    pub fn mon_is(&self) -> bool {
        match &self.hostname {
            Some(hostname) => self.monitor_members.iter().any(|m| &m.name == hostname),
            None => false,
        }
    }

    pub fn mon_quorum(&self) -> bool {
        self.mon_status.as_ref().is_some_and(MonStatus::in_quorum)
    }

    /// A cluster status was obtained by an authenticated connect
    pub fn cluster_quorum(&self) -> bool {
        self.cluster_status.is_some()
    }

    /// Daemons run as root before 0.95 and as `ceph` afterwards
    pub fn ceph_daemon_user(&self) -> &'static str {
        match &self.ceph_version {
            Some(v) if v.major == 0 && v.minor < 95 => "root",
            _ => "ceph",
        }
    }
}
