//! Storage/Journal Partition Classifier
//!
//! Decides which partitions hold OSD data and which hold journals, using
//! GPT type GUIDs where they are set and the on-disk identity files where
//! they are not.

use super::metadata::MetadataProbe;
use crate::model::{DiscoveredDaemon, DiskRecord, OsdMetadata, PartitionRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// GPT partition type ceph-disk assigns to OSD data
pub const OSD_PARTTYPE: &str = "4fbd7e29-9d25-41b8-afd0-062c0ceff05d";

/// GPT partition type ceph-disk assigns to OSD journals
pub const JOURNAL_PARTTYPE: &str = "45b0969e-9b03-4f30-b4c6-b4b80ceff106";

/// Filesystems an untagged partition may carry OSD data on
pub const LEGACY_FILESYSTEMS: &[&str] = &["xfs", "btrfs", "ext4"];

/// Result of one classification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub storage: BTreeSet<String>,
    pub journal: BTreeSet<String>,
    pub daemons: BTreeMap<String, Vec<DiscoveredDaemon>>,
}

fn has_parttype(part: &PartitionRecord, guid: &str) -> bool {
    part.parttype().is_some_and(|t| t.eq_ignore_ascii_case(guid))
}

async fn probe_mountpoint(
    probe: &dyn MetadataProbe,
    part: &str,
    mountpoint: &str,
) -> Option<OsdMetadata> {
    match probe.from_mountpoint(mountpoint).await {
        Ok(md) => md,
        Err(e) => {
            warn!("Skipping metadata on {} mounted at {}: {}", part, mountpoint, e);
            None
        }
    }
}

async fn probe_device(probe: &dyn MetadataProbe, part: &str) -> Option<OsdMetadata> {
    match probe.from_device(part).await {
        Ok(md) => md,
        Err(e) => {
            warn!("Skipping metadata on {}: {}", part, e);
            None
        }
    }
}

/// Classify every partition of every disk
///
/// Metadata failures never abort the pass; the partition is skipped. A
/// partition ends up in at most one of the two sets: anything found to
/// hold OSD data is removed from the journal set.
pub async fn classify(
    disks: &BTreeMap<String, DiskRecord>,
    partition_parent: &BTreeMap<String, String>,
    probe: &dyn MetadataProbe,
) -> Classification {
    let mut storage = BTreeSet::new();
    let mut journal = BTreeSet::new();
    let mut found: BTreeMap<String, OsdMetadata> = BTreeMap::new();

    for disk in disks.values() {
        for (name, part) in &disk.partitions {
            if part.is_swap() {
                continue;
            }
            let mountpoint = part.mountpoint();

            if let Some(mp) = mountpoint {
                if let Some(md) = probe_mountpoint(probe, name, mp).await {
                    found.insert(name.clone(), md);
                }
            }

            if has_parttype(part, OSD_PARTTYPE) {
                storage.insert(name.clone());
                if mountpoint.is_none() {
                    if let Some(md) = probe_device(probe, name).await {
                        found.insert(name.clone(), md);
                    }
                }
                continue;
            }

            if has_parttype(part, JOURNAL_PARTTYPE) {
                journal.insert(name.clone());
                continue;
            }

            if mountpoint.is_some() {
                continue;
            }
            let Some(fstype) = part.fstype() else {
                continue;
            };
            if !LEGACY_FILESYSTEMS.contains(&fstype) {
                continue;
            }
            debug!("Probing untagged {} partition {}", fstype, name);
            if let Some(md) = probe_device(probe, name).await {
                found.insert(name.clone(), md);
            }
        }
    }

    let mut daemons: BTreeMap<String, Vec<DiscoveredDaemon>> = BTreeMap::new();
    for (name, md) in found {
        storage.insert(name.clone());
        if let Some(journal_device) = &md.journal_device {
            journal.insert(journal_device.clone());
        }
        let parent = partition_parent.get(&name).map(String::as_str);
        let cluster = md.ceph_fsid.clone();
        daemons
            .entry(cluster)
            .or_default()
            .push(DiscoveredDaemon::from_metadata(&name, parent, md));
    }

    journal.retain(|p| !storage.contains(p));

    Classification {
        storage,
        journal,
        daemons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::lsblk::parse_listing;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProbe {
        by_mountpoint: HashMap<String, OsdMetadata>,
        by_device: HashMap<String, OsdMetadata>,
        failing: Vec<String>,
        mounted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetadataProbe for FakeProbe {
        async fn from_mountpoint(&self, mountpoint: &str) -> Result<Option<OsdMetadata>> {
            Ok(self.by_mountpoint.get(mountpoint).cloned())
        }

        async fn from_device(&self, device: &str) -> Result<Option<OsdMetadata>> {
            self.mounted.lock().push(device.to_string());
            if self.failing.iter().any(|d| d == device) {
                return Err(Error::ToolOutput {
                    tool: "mount".into(),
                    reason: "busy".into(),
                });
            }
            Ok(self.by_device.get(device).cloned())
        }
    }

    fn osd(cluster: &str, fsid: &str, journal: Option<&str>) -> OsdMetadata {
        OsdMetadata {
            ceph_fsid: cluster.into(),
            fsid: fsid.into(),
            magic: "ceph osd volume v026".into(),
            journal_uuid: None,
            whoami: Some("0".into()),
            journal_device: journal.map(str::to_string),
        }
    }

    fn line(name: &str, parent: &str, extra: &str) -> String {
        format!("NAME=\"{name}\" TYPE=\"part\" PKNAME=\"{parent}\" {extra}\n")
    }

    #[tokio::test]
    async fn test_tagged_unmounted_partition_is_storage() {
        let text = format!(
            "NAME=\"/dev/sdb\" TYPE=\"disk\"\n{}",
            line("/dev/sdb1", "/dev/sdb", &format!("PARTTYPE=\"{OSD_PARTTYPE}\" MOUNTPOINT=\"\""))
        );
        let listing = parse_listing(&text);
        let probe = FakeProbe::default();

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert!(result.storage.contains("/dev/sdb1"));
        assert!(result.journal.is_empty());
        assert_eq!(*probe.mounted.lock(), vec!["/dev/sdb1".to_string()]);
        assert_eq!(listing.partition_parent["/dev/sdb1"], "/dev/sdb");
    }

    #[tokio::test]
    async fn test_journal_tag_and_swap() {
        let text = format!(
            "NAME=\"/dev/sdc\" TYPE=\"disk\"\n{}{}",
            line("/dev/sdc1", "/dev/sdc", &format!("PARTTYPE=\"{JOURNAL_PARTTYPE}\"")),
            line("/dev/sdc2", "/dev/sdc", "MOUNTPOINT=\"[SWAP]\" FSTYPE=\"swap\""),
        );
        let listing = parse_listing(&text);
        let probe = FakeProbe::default();

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert_eq!(result.journal, BTreeSet::from(["/dev/sdc1".to_string()]));
        assert!(result.storage.is_empty());
        assert!(probe.mounted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_untagged_legacy_filesystem_with_metadata() {
        let text = format!(
            "NAME=\"/dev/sdd\" TYPE=\"disk\"\n{}{}{}",
            line("/dev/sdd1", "/dev/sdd", "FSTYPE=\"xfs\""),
            line("/dev/sdd2", "/dev/sdd", "FSTYPE=\"vfat\""),
            line("/dev/sdd3", "/dev/sdd", ""),
        );
        let listing = parse_listing(&text);
        let mut probe = FakeProbe::default();
        probe
            .by_device
            .insert("/dev/sdd1".into(), osd("c1", "o1", Some("/dev/sde1")));

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert_eq!(result.storage, BTreeSet::from(["/dev/sdd1".to_string()]));
        // journal target folded in even without a GUID tag
        assert!(result.journal.contains("/dev/sde1"));
        let daemon = &result.daemons["c1"][0];
        assert_eq!(daemon.device, "/dev/sdd1");
        assert_eq!(daemon.parent_device.as_deref(), Some("/dev/sdd"));
        assert_eq!(*probe.mounted.lock(), vec!["/dev/sdd1".to_string()]);
    }

    #[tokio::test]
    async fn test_mounted_partition_read_in_place() {
        let text = format!(
            "NAME=\"/dev/sdb\" TYPE=\"disk\"\n{}",
            line(
                "/dev/sdb1",
                "/dev/sdb",
                &format!("PARTTYPE=\"{OSD_PARTTYPE}\" MOUNTPOINT=\"/var/lib/ceph/osd/ceph-3\" FSTYPE=\"xfs\"")
            ),
        );
        let listing = parse_listing(&text);
        let mut probe = FakeProbe::default();
        probe
            .by_mountpoint
            .insert("/var/lib/ceph/osd/ceph-3".into(), osd("c1", "o3", None));

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert_eq!(result.daemons["c1"].len(), 1);
        assert!(probe.mounted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_storage_wins_over_journal() {
        // a journal-tagged partition whose filesystem says it holds OSD data
        let text = format!(
            "NAME=\"/dev/sdb\" TYPE=\"disk\"\n{}{}",
            line(
                "/dev/sdb1",
                "/dev/sdb",
                &format!("PARTTYPE=\"{JOURNAL_PARTTYPE}\" MOUNTPOINT=\"/mnt/osd\"")
            ),
            line("/dev/sdb2", "/dev/sdb", "FSTYPE=\"xfs\""),
        );
        let listing = parse_listing(&text);
        let mut probe = FakeProbe::default();
        probe
            .by_mountpoint
            .insert("/mnt/osd".into(), osd("c1", "o1", None));
        probe
            .by_device
            .insert("/dev/sdb2".into(), osd("c1", "o2", Some("/dev/sdb1")));

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert!(result.storage.contains("/dev/sdb1"));
        assert!(result.storage.contains("/dev/sdb2"));
        assert!(result.journal.intersection(&result.storage).next().is_none());
    }

    #[tokio::test]
    async fn test_probe_failure_skips_partition() {
        let text = format!(
            "NAME=\"/dev/sdf\" TYPE=\"disk\"\n{}{}",
            line("/dev/sdf1", "/dev/sdf", "FSTYPE=\"ext4\""),
            line("/dev/sdf2", "/dev/sdf", "FSTYPE=\"btrfs\""),
        );
        let listing = parse_listing(&text);
        let mut probe = FakeProbe::default();
        probe.failing.push("/dev/sdf1".into());
        probe.by_device.insert("/dev/sdf2".into(), osd("c2", "o9", None));

        let result = classify(&listing.disks, &listing.partition_parent, &probe).await;

        assert_eq!(result.storage, BTreeSet::from(["/dev/sdf2".to_string()]));
        assert_eq!(result.daemons.len(), 1);
    }

    #[tokio::test]
    async fn test_classification_is_deterministic() {
        let text = format!(
            "NAME=\"/dev/sdb\" TYPE=\"disk\"\n{}{}",
            line("/dev/sdb1", "/dev/sdb", "FSTYPE=\"xfs\""),
            line("/dev/sdb2", "/dev/sdb", &format!("PARTTYPE=\"{OSD_PARTTYPE}\"")),
        );
        let listing = parse_listing(&text);
        let mut probe = FakeProbe::default();
        probe.by_device.insert("/dev/sdb1".into(), osd("c1", "a", None));
        probe.by_device.insert("/dev/sdb2".into(), osd("c1", "b", None));

        let first = classify(&listing.disks, &listing.partition_parent, &probe).await;
        let second = classify(&listing.disks, &listing.partition_parent, &probe).await;
        assert_eq!(first, second);
    }
}
