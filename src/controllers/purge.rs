//! Node Purge
//!
//! Returns a node to a pre-install state: every cluster service stopped,
//! keyrings gone, OSD partitions unmounted, daemon data trees emptied, and
//! the cluster configuration removed. Nothing here is recoverable.

use crate::cluster::config::name_refresh;
use crate::context::NodeContext;
use crate::discovery::DiscoveryEngine;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::idempotent::remove_file_if_present;
use crate::keyring::{self, KeyringRole};
use crate::model::NodeModel;
use crate::service::{InitSystem, ServiceInstance};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Roles whose keyrings are removed, in removal order
const PURGED_KEYRINGS: [KeyringRole; 5] = [
    KeyringRole::Mds,
    KeyringRole::Rgw,
    KeyringRole::Osd,
    KeyringRole::Mon,
    KeyringRole::Admin,
];

/// Every cluster service on the node, as the init system names it
///
/// systemd matches the per-daemon units with a glob; the SysV `ceph`
/// script stops all local daemons when given no instance.
fn cluster_services(init: InitSystem) -> ServiceInstance {
    match init {
        InitSystem::Systemd => ServiceInstance::family("ceph*"),
        InitSystem::SysV => ServiceInstance::family("ceph"),
    }
}

/// What a purge removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub keyrings_removed: Vec<String>,
    pub unmounted: Vec<String>,
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub config_removed: bool,
}

pub struct Purger<'a> {
    ctx: &'a NodeContext,
}

impl<'a> Purger<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    pub async fn purge(&self, model: &mut NodeModel) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();

        self.ctx
            .supervisor()
            .stop(&cluster_services(self.ctx.config.init_system))
            .await?;

        let engine = DiscoveryEngine::new(self.ctx);
        if let Err(e) = engine.hostname_refresh(model).await {
            error!("Could not resolve hostname: {}", e);
        }
        let cluster = name_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name);
        if let Ok(cluster) = &cluster {
            report.keyrings_removed = self.remove_keyrings(model, cluster)?;
        }

        match self.update_osd(&engine, model).await {
            Ok(()) => report.unmounted = self.unmount_osd(model).await?,
            Err(e) => error!("Could not refresh OSD partitions: {}", e),
        }

        let layout = self.ctx.layout();
        let roots = [layout.mds_root(), layout.rgw_root(), layout.osd_root(), layout.mon_root()];
        for root in &roots {
            report.files_removed += remove_files_under(root)?;
        }
        for root in &roots {
            report.dirs_removed += remove_empty_dirs_under(root)?;
        }

        match cluster {
            Ok(cluster) => {
                let conf = layout.cluster_conf(&cluster);
                report.config_removed = remove_file_if_present(&conf)?;
                if report.config_removed {
                    info!("Removed {}", conf.display());
                }
            }
            Err(e) => error!("Cluster name not found: {}", e),
        }
        Ok(report)
    }

    /// Absent keyrings are skipped; a keyring that cannot be deleted fails the purge
    fn remove_keyrings(&self, model: &NodeModel, cluster: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for role in PURGED_KEYRINGS {
            if role == KeyringRole::Mon && model.hostname.is_none() {
                warn!("Hostname unknown, leaving the monitor keyring in place");
                continue;
            }
            let keyring = keyring::make(self.ctx, role, cluster, model.hostname.as_deref())?;
            if keyring.remove()? {
                removed.push(role.to_string());
            }
        }
        Ok(removed)
    }

    async fn update_osd(&self, engine: &DiscoveryEngine<'_>, model: &mut NodeModel) -> Result<()> {
        engine.symlinks_refresh(model);
        engine.partitions_all_refresh(model).await?;
        engine.discover_partitions_refresh(model).await;
        Ok(())
    }

    async fn unmount_osd(&self, model: &NodeModel) -> Result<Vec<String>> {
        let mut unmounted = Vec::new();
        for part in &model.storage_partitions {
            let Some(mountpoint) = model.partition(part).and_then(|p| p.mountpoint()) else {
                continue;
            };
            let command = CommandLine::new(&self.ctx.tools().umount).arg(mountpoint);
            self.ctx.run(&command).await?;
            info!("Unmounted {} from {}", part, mountpoint);
            unmounted.push(mountpoint.to_string());
        }
        Ok(unmounted)
    }
}

/// Every entry below `root`, parents before children
///
/// Symlinks are listed but never followed.
fn entries_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    if root.is_dir() {
        collect_entries(root, &mut entries)?;
    }
    Ok(entries)
}

fn collect_entries(dir: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    let listing = fs::read_dir(dir).map_err(|e| Error::resource("read", dir, e))?;
    let mut children: Vec<PathBuf> = listing.flatten().map(|entry| entry.path()).collect();
    children.sort();
    for child in children {
        let is_dir = fs::symlink_metadata(&child).is_ok_and(|m| m.is_dir());
        entries.push(child.clone());
        if is_dir {
            collect_entries(&child, entries)?;
        }
    }
    Ok(())
}

fn remove_files_under(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in entries_under(root)? {
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            continue;
        }
        debug!("Removing file {}", path.display());
        fs::remove_file(&path).map_err(|e| Error::resource("remove", &path, e))?;
        removed += 1;
    }
    Ok(removed)
}

/// Remove empty directories below `root`, deepest first; `root` itself stays
fn remove_empty_dirs_under(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in entries_under(root)?.into_iter().rev() {
        if !fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir()) {
            continue;
        }
        let empty = fs::read_dir(&path)
            .map_err(|e| Error::resource("read", &path, e))?
            .next()
            .is_none();
        if !empty {
            debug!("Directory not empty: {}", path.display());
            continue;
        }
        info!("Removing directory {}", path.display());
        fs::remove_dir(&path).map_err(|e| Error::resource("remove", &path, e))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeLayout, OperatorConfig};
    use crate::discovery::OSD_PARTTYPE;
    use crate::domain::ports::CommandOutput;
    use crate::exec::mock::ScriptedExecutor;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_file_then_dir_removal() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("mds");
        write(&base.join("ceph-a/keyring"), "k");
        write(&base.join("systemd/a"), "env");
        fs::create_dir_all(base.join("ceph-b/empty/deeper")).unwrap();

        assert_eq!(remove_files_under(&base).unwrap(), 2);
        assert!(base.join("ceph-a").is_dir());
        assert_eq!(remove_empty_dirs_under(&base).unwrap(), 5);
        assert!(base.is_dir());
        assert_eq!(fs::read_dir(&base).unwrap().count(), 0);

        assert_eq!(remove_files_under(&root.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_symlinked_dirs_are_not_followed() {
        let root = tempfile::tempdir().unwrap();
        let outside = root.path().join("outside");
        write(&outside.join("keep"), "x");
        let base = root.path().join("osd");
        fs::create_dir_all(&base).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        assert_eq!(remove_files_under(&base).unwrap(), 1);
        assert!(outside.join("keep").is_file());
    }

    #[tokio::test]
    async fn test_purge_node() {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        write(&layout.cluster_conf("ceph"), "[global]\nfsid = f00d\n");
        write(&layout.admin_keyring("ceph"), "[client.admin]\n");
        write(&layout.osd_bootstrap_keyring("ceph"), "[client.bootstrap-osd]\n");
        write(&layout.mon_keyring("ceph", "node1"), "[mon.]\n");
        write(&layout.mon_done_file("ceph", "node1"), "");
        write(&layout.mds_root().join("ceph-a/keyring"), "[client.a]\n");
        let osd_dir = layout.osd_data_dir("ceph", "0");
        fs::create_dir_all(&osd_dir).unwrap();

        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["lsblk", "--version"], CommandOutput::ok("lsblk from util-linux 2.29.2\n"));
        exec.on(
            &["lsblk", "--ascii"],
            CommandOutput::ok(format!(
                "NAME=\"/dev/sdb\" TYPE=\"disk\"\n\
                 NAME=\"/dev/sdb1\" TYPE=\"part\" PKNAME=\"/dev/sdb\" PARTTYPE=\"{OSD_PARTTYPE}\" MOUNTPOINT=\"{}\"\n",
                osd_dir.display()
            )),
        );
        let mut config = OperatorConfig {
            layout: layout.clone(),
            ..Default::default()
        };
        config.hostname = Some("node1".into());
        let ctx = NodeContext::new(exec.clone(), config);

        let report = Purger::new(&ctx).purge(&mut NodeModel::default()).await.unwrap();

        assert!(exec.was_called(&["systemctl", "stop", "ceph*"]));
        let osd_dir = osd_dir.to_string_lossy().into_owned();
        assert!(exec.was_called(&["umount", &osd_dir]));
        assert_eq!(report.unmounted, vec![osd_dir]);
        assert_eq!(report.keyrings_removed, vec!["osd", "mon", "admin"]);
        assert!(report.config_removed);
        assert!(!layout.cluster_conf("ceph").exists());
        assert!(!layout.mds_root().join("ceph-a").exists());
        assert!(!layout.mon_data_dir("ceph", "node1").exists());
        assert!(!layout.osd_bootstrap_keyring("ceph").exists());
    }

    #[tokio::test]
    async fn test_purge_survives_missing_tools() {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["lsblk"], CommandOutput::failed(127, "lsblk: not found"));
        let mut config = OperatorConfig {
            layout,
            ..Default::default()
        };
        config.hostname = Some("node1".into());
        let ctx = NodeContext::new(exec, config);

        let report = Purger::new(&ctx).purge(&mut NodeModel::default()).await.unwrap();
        assert_eq!(report, PurgeReport::default());
    }

    #[tokio::test]
    async fn test_purge_fails_when_keyring_cannot_be_removed() {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        write(&layout.cluster_conf("ceph"), "[global]\nfsid = f00d\n");
        write(&layout.admin_keyring("ceph"), "[client.admin]\n");
        // a directory in place of the keyring file cannot be unlinked
        fs::create_dir_all(layout.osd_bootstrap_keyring("ceph")).unwrap();

        let mut config = OperatorConfig {
            layout: layout.clone(),
            ..Default::default()
        };
        config.hostname = Some("node1".into());
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = NodeContext::new(exec.clone(), config);

        let err = Purger::new(&ctx).purge(&mut NodeModel::default()).await.unwrap_err();
        assert_matches!(err, Error::Resource { .. });
        assert!(layout.osd_bootstrap_keyring("ceph").is_dir());
        assert!(layout.cluster_conf("ceph").is_file());
        assert!(!exec.was_called(&["lsblk"]));
    }

    #[tokio::test]
    async fn test_purge_stops_sysv_script() {
        let root = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["lsblk"], CommandOutput::failed(127, "lsblk: not found"));
        let mut config = OperatorConfig {
            layout: NodeLayout::rooted(root.path()),
            init_system: InitSystem::SysV,
            ..Default::default()
        };
        config.hostname = Some("node1".into());
        let ctx = NodeContext::new(exec.clone(), config);

        Purger::new(&ctx).purge(&mut NodeModel::default()).await.unwrap();
        assert!(exec.was_called(&["service", "ceph", "stop"]));
        assert!(!exec.was_called(&["service", "ceph*"]));
    }

    #[tokio::test]
    async fn test_purge_stops_on_service_failure() {
        let root = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["systemctl", "stop"], CommandOutput::failed(5, "unit not loaded"));
        let ctx = NodeContext::new(
            exec,
            OperatorConfig {
                layout: NodeLayout::rooted(root.path()),
                ..Default::default()
            },
        );
        let err = Purger::new(&ctx).purge(&mut NodeModel::default()).await.unwrap_err();
        assert!(matches!(err, Error::Service { .. }));
    }
}
