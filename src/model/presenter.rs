//! Presentation Views
//!
//! Serializable snapshots of the model for operators. Views keep the lsblk
//! column names so output lines up with what the tools print.

use super::{CephVersion, NodeModel, PoolInfo};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

const PARTITION_KEYS: &[&str] = &[
    "NAME",
    "SIZE",
    "VENDOR",
    "UUID",
    "PARTLABEL",
    "PKNAME",
    "FSTYPE",
    "PARTTYPE",
    "MOUNTPOINT",
    "PARTUUID",
    "ROTA",
    "SCHED",
    "RQ-SIZE",
];

const DISK_KEYS: &[&str] = &["NAME", "ROTA", "RQ-SIZE", "SCHED", "SIZE", "VENDOR"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionView {
    #[serde(rename = "LINK", skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(flatten)]
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskView {
    #[serde(rename = "LINK", skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(rename = "PARTTABLE", skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<String>,
    #[serde(flatten)]
    pub attributes: IndexMap<String, String>,
    #[serde(rename = "PARTITION", skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionView>,
}

/// A discovered OSD with its devices expanded and cluster fields dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsdView {
    pub fsid: String,
    pub magic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whoami: Option<String>,
    pub dev: Option<PartitionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_journal: Option<PartitionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<Vec<String>>,
}

/// Read-only views over a [`NodeModel`]
pub struct Presenter<'a> {
    model: &'a NodeModel,
}

impl<'a> Presenter<'a> {
    pub fn new(model: &'a NodeModel) -> Self {
        Self { model }
    }

    fn links(&self, device: &str) -> Vec<String> {
        self.model
            .symlinks
            .get(device)
            .map(|links| links.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// None when the partition is not attached to a known disk
    pub fn partition(&self, part: &str) -> Option<PartitionView> {
        let record = self.model.partition(part)?;
        let attributes = record
            .attributes
            .iter()
            .filter(|(k, _)| PARTITION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(PartitionView {
            links: self.links(part),
            attributes,
        })
    }

    pub fn disk(&self, disk: &str) -> Option<DiskView> {
        let record = self.model.disks.get(disk)?;
        let attributes = record
            .attributes
            .iter()
            .filter(|(k, _)| DISK_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(DiskView {
            links: self.links(disk),
            partition_table: record.partition_table.clone(),
            attributes,
            partitions: record
                .partitions
                .keys()
                .filter_map(|p| self.partition(p))
                .collect(),
        })
    }

    /// Every disk with its partitions
    pub fn partitions_all(&self) -> BTreeMap<String, DiskView> {
        self.model
            .disks
            .keys()
            .filter_map(|d| Some((d.clone(), self.disk(d)?)))
            .collect()
    }

    pub fn storage_partitions(&self) -> Vec<PartitionView> {
        self.model
            .storage_partitions
            .iter()
            .filter_map(|p| self.partition(p))
            .collect()
    }

    pub fn journal_partitions(&self) -> Vec<PartitionView> {
        self.model
            .journal_partitions
            .iter()
            .filter_map(|p| self.partition(p))
            .collect()
    }

    pub fn discovered_osds_for(&self, cluster_fsid: &str) -> Vec<OsdView> {
        let Some(daemons) = self.model.discovered_daemons.get(cluster_fsid) else {
            return Vec::new();
        };
        daemons
            .iter()
            .map(|d| OsdView {
                fsid: d.fsid.clone(),
                magic: d.magic.clone(),
                journal_uuid: d.journal_uuid.clone(),
                whoami: d.whoami.clone(),
                dev: self.partition(&d.device),
                dev_journal: d.journal_device.as_deref().and_then(|j| self.partition(j)),
            })
            .collect()
    }

    pub fn discovered_osds(&self) -> BTreeMap<String, Vec<OsdView>> {
        self.model
            .discovered_daemons
            .keys()
            .map(|fsid| (fsid.clone(), self.discovered_osds_for(fsid)))
            .collect()
    }

    /// `mon_status` keyed by cluster fsid, with the fsid lifted out of the monmap
    pub fn mon_status(&self) -> BTreeMap<String, serde_json::Value> {
        let mut output = BTreeMap::new();
        let Some(status) = &self.model.mon_status else {
            return output;
        };
        let Some(fsid) = status.fsid().map(str::to_string) else {
            return output;
        };
        let mut value = status.0.clone();
        if let Some(monmap) = value.get_mut("monmap").and_then(|m| m.as_object_mut()) {
            monmap.remove("fsid");
        }
        output.insert(fsid, value);
        output
    }

    pub fn auth_list(&self) -> BTreeMap<String, AuthView> {
        self.model
            .auth_list
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    AuthView {
                        key: entry.key.clone(),
                        caps: entry.caps.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn pool_list(&self) -> &BTreeMap<String, PoolInfo> {
        &self.model.pool_list
    }

    pub fn ceph_version(&self) -> Option<&CephVersion> {
        self.model.ceph_version.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscoveredDaemon, DiskRecord, MonStatus, PartitionRecord};
    use serde_json::json;

    fn model() -> NodeModel {
        let mut part = PartitionRecord {
            name: "/dev/sdb1".into(),
            ..Default::default()
        };
        part.attributes.insert("NAME".into(), "/dev/sdb1".into());
        part.attributes.insert("PKNAME".into(), "/dev/sdb".into());
        part.attributes.insert("KNAME".into(), "/dev/sdb1".into());

        let mut disk = DiskRecord {
            name: "/dev/sdb".into(),
            partition_table: Some("gpt".into()),
            ..Default::default()
        };
        disk.attributes.insert("NAME".into(), "/dev/sdb".into());
        disk.attributes.insert("MODEL".into(), "ST1000".into());
        disk.partitions.insert("/dev/sdb1".into(), part);

        let mut model = NodeModel::default();
        model.disks.insert("/dev/sdb".into(), disk);
        model
            .partition_parent
            .insert("/dev/sdb1".into(), "/dev/sdb".into());
        model.symlinks.insert(
            "/dev/sdb1".into(),
            ["/dev/disk/by-partuuid/aa".to_string()].into(),
        );
        model
    }

    #[test]
    fn test_partition_view_filters_columns() {
        let model = model();
        let view = Presenter::new(&model).partition("/dev/sdb1").unwrap();
        assert_eq!(view.links, vec!["/dev/disk/by-partuuid/aa"]);
        assert!(view.attributes.contains_key("PKNAME"));
        assert!(!view.attributes.contains_key("KNAME"));
    }

    #[test]
    fn test_disk_view() {
        let model = model();
        let view = Presenter::new(&model).disk("/dev/sdb").unwrap();
        assert_eq!(view.partition_table.as_deref(), Some("gpt"));
        assert_eq!(view.partitions.len(), 1);
        assert!(!view.attributes.contains_key("MODEL"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["PARTTABLE"], "gpt");
        assert_eq!(json["NAME"], "/dev/sdb");
    }

    #[test]
    fn test_osd_view_expands_devices() {
        let mut model = model();
        model.discovered_daemons.insert(
            "c1".into(),
            vec![DiscoveredDaemon {
                fsid: "o1".into(),
                cluster_fsid: "c1".into(),
                magic: "ceph osd volume v026".into(),
                journal_uuid: None,
                whoami: Some("3".into()),
                device: "/dev/sdb1".into(),
                journal_device: None,
                parent_device: Some("/dev/sdb".into()),
            }],
        );
        let views = Presenter::new(&model).discovered_osds();
        let osd = &views["c1"][0];
        assert_eq!(osd.whoami.as_deref(), Some("3"));
        assert!(osd.dev.is_some());

        let json = serde_json::to_value(osd).unwrap();
        assert!(json.get("cluster_fsid").is_none());
        assert!(json.get("parent_device").is_none());
    }

    #[test]
    fn test_mon_status_keyed_by_fsid() {
        let mut model = NodeModel::default();
        model.mon_status = Some(MonStatus(json!({
            "name": "a",
            "outside_quorum": [],
            "monmap": {"fsid": "f00d", "epoch": 1}
        })));
        let view = Presenter::new(&model).mon_status();
        assert_eq!(view["f00d"]["monmap"], json!({"epoch": 1}));

        model.mon_status = Some(MonStatus(json!({"name": "a"})));
        assert!(Presenter::new(&model).mon_status().is_empty());
    }
}
