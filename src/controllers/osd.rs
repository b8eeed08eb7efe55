//! OSD Controller
//!
//! Prepares, activates, and tears down storage daemons on local partitions,
//! and wipes whole disks for reuse. Every call starts from a fresh
//! discovery pass; what was found on a previous call is never trusted.

use crate::cluster::config::defaults_refresh;
use crate::cluster::remote::RemoteCluster;
use crate::context::NodeContext;
use crate::discovery::{DiscoveryEngine, JOURNAL_PARTTYPE, OSD_PARTTYPE};
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::idempotent::{ensure_dir, remove_dir_all_if_present, Ensured};
use crate::model::NodeModel;
use crate::service::ServiceInstance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const OSD_SERVICE: &str = "ceph-osd";

/// Bytes zeroed at the end of a disk to destroy the backup GPT
const GPT_BACKUP_BYTES: u64 = 33 * 4096;

const DEFAULT_FS_TYPE: &str = "xfs";

/// Parameters for [`OsdController::prepare`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdPrepareRequest {
    pub osd_dev: String,
    pub journal_dev: Option<String>,
    /// Filesystem for the data partition; xfs when unset
    pub fs_type: Option<String>,
    pub osd_uuid: Option<String>,
    pub journal_uuid: Option<String>,
}

// =============================================================================
// Device Helpers
// =============================================================================

/// Kernel name of a device path: `/dev/sda` -> `sda`, `/dev/cciss/c0d1` -> `cciss!c0d1`
pub fn device_name(path: &Path) -> Result<String> {
    let rest = path
        .to_str()
        .and_then(|p| p.strip_prefix("/dev/"))
        .ok_or_else(|| Error::InvalidValue {
            field: "device",
            value: path.display().to_string(),
        })?;
    Ok(rest.replace('/', "!"))
}

/// Whether a kernel device name is a partition, judged from the sysfs block tree
///
/// Whole disks have their own entry under the block directory; partitions
/// appear inside the entry of the disk they belong to.
pub fn is_partition_name(sys_block: &Path, name: &str) -> Result<bool> {
    if sys_block.join(name).exists() {
        return Ok(false);
    }
    let entries = fs::read_dir(sys_block).map_err(|e| Error::resource("read", sys_block, e))?;
    for entry in entries.flatten() {
        if entry.path().join(name).exists() {
            return Ok(true);
        }
    }
    Err(Error::NotDiskOrPartition {
        device: format!("/dev/{}", name.replace('!', "/")),
    })
}

fn resolve_device(dev: &str) -> Result<PathBuf> {
    fs::canonicalize(dev).map_err(|_| Error::DeviceNotFound {
        device: dev.to_string(),
    })
}

fn is_block_device(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path).map_err(|e| Error::resource("stat", path, e))?;
    Ok(meta.file_type().is_block_device())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// =============================================================================
// OSD Controller
// =============================================================================

pub struct OsdController<'a> {
    ctx: &'a NodeContext,
}

impl<'a> OsdController<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    /// Resolve the cluster and rediscover every disk
    pub async fn update_model(&self, model: &mut NodeModel) -> Result<()> {
        defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        DiscoveryEngine::new(self.ctx).refresh(model).await
    }

    /// Whether `dev` is a partition rather than a whole disk
    pub fn is_partition(&self, dev: &str) -> Result<bool> {
        let path = resolve_device(dev)?;
        if !is_block_device(&path)? {
            return Err(Error::NotBlockDevice {
                device: display(&path),
            });
        }
        is_partition_name(&self.ctx.layout().sys_block_dir, &device_name(&path)?)
    }

    /// Create an OSD on a disk or partition
    ///
    /// Returns [`Ensured::AlreadyPresent`] without touching the device when
    /// the requested uuids are already known in this cluster, when the
    /// target partition is a journal or mounted, or when the target disk
    /// already has partitions.
    pub async fn prepare(&self, model: &mut NodeModel, request: &OsdPrepareRequest) -> Result<Ensured> {
        if request.osd_dev.is_empty() {
            return Err(Error::MissingParameter("osd_dev"));
        }
        defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        let cluster = model
            .cluster_name
            .clone()
            .ok_or(Error::MissingParameter("cluster_name"))?;
        let layout = self.ctx.layout();

        let bootstrap = layout.osd_bootstrap_keyring(&cluster);
        if !bootstrap.is_file() {
            return Err(Error::KeyringMissing { path: bootstrap });
        }
        if ensure_dir(&layout.osd_root())?.created() {
            info!("Created {}", layout.osd_root().display());
        }

        let osd_dev = display(&resolve_device(&request.osd_dev)?);
        debug!("Transformed from '{}' to '{}'", request.osd_dev, osd_dev);
        let journal_dev = match request.journal_dev.as_deref() {
            Some(journal) => {
                let resolved = display(&resolve_device(journal)?);
                debug!("Transformed from '{}' to '{}'", journal, resolved);
                Some(resolved)
            }
            None => None,
        };
        DiscoveryEngine::new(self.ctx).refresh(model).await?;

        if self.already_known(model, request) {
            return Ok(Ensured::AlreadyPresent);
        }

        if self.is_partition(&osd_dev)? {
            if model.journal_partitions.contains(&osd_dev) {
                debug!("{} is already a journal", osd_dev);
                return Ok(Ensured::AlreadyPresent);
            }
            let record = model.partition(&osd_dev).ok_or_else(|| Error::DeviceNotFound {
                device: osd_dev.clone(),
            })?;
            if let Some(mountpoint) = record.mountpoint() {
                debug!("{} is already mounted on {}", osd_dev, mountpoint);
                return Ok(Ensured::AlreadyPresent);
            }
            let journal = journal_dev.as_deref().ok_or_else(|| Error::JournalRequired {
                device: osd_dev.clone(),
            })?;
            check_partition_type(model, &osd_dev, OSD_PARTTYPE)?;
            check_partition_type(model, journal, JOURNAL_PARTTYPE)?;
        } else {
            let disk = model.disks.get(&osd_dev).ok_or_else(|| Error::NotBlockDevice {
                device: osd_dev.clone(),
            })?;
            if !disk.partitions.is_empty() {
                debug!("{} already has partitions", osd_dev);
                return Ok(Ensured::AlreadyPresent);
            }
        }

        let command = prepare_command(
            &self.ctx.tools().ceph_disk,
            model,
            request,
            &osd_dev,
            journal_dev.as_deref(),
        );
        info!("Preparing OSD on {}", osd_dev);
        self.ctx.run(&command).await?;
        Ok(Ensured::Created)
    }

    fn already_known(&self, model: &NodeModel, request: &OsdPrepareRequest) -> bool {
        let Some(existing) = model
            .cluster_uuid
            .as_ref()
            .and_then(|fsid| model.discovered_daemons.get(fsid))
        else {
            return false;
        };
        for daemon in existing {
            if request.osd_uuid.is_some() && request.osd_uuid.as_ref() == Some(&daemon.fsid) {
                debug!("osd_uuid already exists: {}", daemon.fsid);
                return true;
            }
            if request.journal_uuid.is_some() && request.journal_uuid == daemon.journal_uuid {
                debug!("journal_uuid already exists: {:?}", daemon.journal_uuid);
                return true;
            }
        }
        false
    }

    /// Storage partitions to activate for the given devices
    ///
    /// A partition stands for itself; a disk stands for every storage
    /// partition on it. No devices means every storage partition on the node.
    pub fn activation_targets(&self, model: &NodeModel, devices: &[String]) -> Result<BTreeSet<String>> {
        if devices.is_empty() {
            return Ok(model.storage_partitions.clone());
        }
        let mut targets = BTreeSet::new();
        for dev in devices {
            let path = display(&resolve_device(dev)?);
            if self.is_partition(&path)? {
                targets.insert(path);
                continue;
            }
            targets.extend(
                model
                    .storage_partitions
                    .iter()
                    .filter(|part| model.partition_parent.get(*part) == Some(&path))
                    .cloned(),
            );
        }
        Ok(targets)
    }

    /// Mount and start the OSDs on the given devices
    pub async fn activate(&self, model: &mut NodeModel, devices: &[String]) -> Result<BTreeSet<String>> {
        self.update_model(model).await?;
        let targets = self.activation_targets(model, devices)?;
        let init = self.ctx.config.init_system.mark_init_tag();
        for partition in &targets {
            let command = CommandLine::new(&self.ctx.tools().ceph_disk)
                .args(["-v", "activate", "--mark-init", init, "--mount"])
                .arg(partition);
            info!("Activating OSD on {}", partition);
            self.ctx.run(&command).await?;
        }
        Ok(targets)
    }

    /// Stop the OSD and keep it from starting at boot
    pub async fn deactivate(&self, osd_id: &str) -> Result<()> {
        check_osd_id(osd_id)?;
        self.ctx
            .supervisor()
            .ensure_stopped(&ServiceInstance::new(OSD_SERVICE, osd_id))
            .await
    }

    /// Stop the OSD, revoke its key, unmount it and delete its data directory
    pub async fn remove(&self, model: &mut NodeModel, osd_id: &str) -> Result<()> {
        self.deactivate(osd_id).await?;
        self.update_model(model).await?;
        let cluster = model
            .cluster_name
            .clone()
            .ok_or(Error::MissingParameter("cluster_name"))?;

        let principal = format!("osd.{osd_id}");
        let mut remote = RemoteCluster::new(self.ctx, &cluster);
        match remote.ensure_connected(model).await {
            Ok(()) => {
                if let Err(e) = remote.auth_del(&principal).await {
                    warn!("Could not revoke {}: {}", principal, e);
                }
            }
            Err(e) => warn!("Could not revoke {}: {}", principal, e),
        }

        let mountpoint = model
            .cluster_uuid
            .as_ref()
            .and_then(|fsid| model.discovered_daemons.get(fsid))
            .into_iter()
            .flatten()
            .find(|d| d.whoami.as_deref() == Some(osd_id))
            .and_then(|d| model.partition(&d.device))
            .and_then(|p| p.mountpoint())
            .map(str::to_string);
        if let Some(mountpoint) = mountpoint {
            let command = CommandLine::new(&self.ctx.tools().umount).arg(&mountpoint);
            self.ctx.run(&command).await?;
            info!("Unmounted {}", mountpoint);
        }

        let data_dir = self.ctx.layout().osd_data_dir(&cluster, osd_id);
        if remove_dir_all_if_present(&data_dir)? {
            info!("Removed {}", data_dir.display());
        }
        Ok(())
    }

    /// Destroy the partition table and trailing GPT backup of a whole disk
    pub async fn zap(&self, dev: &str) -> Result<()> {
        let path = resolve_device(dev)?;
        let block_device = is_block_device(&path)?;
        self.zap_device(&path, block_device).await
    }

    async fn zap_device(&self, path: &Path, block_device: bool) -> Result<()> {
        let device = display(path);
        let sys_block = &self.ctx.layout().sys_block_dir;
        if !block_device || is_partition_name(sys_block, &device_name(path)?)? {
            return Err(Error::NotWholeDisk { device });
        }

        info!("Zapping partition table on {}", device);
        zero_tail(path, GPT_BACKUP_BYTES)?;

        let sgdisk = &self.ctx.tools().sgdisk;
        self.ctx
            .run(&CommandLine::new(sgdisk).args(["--zap-all", "--"]).arg(&device))
            .await?;
        self.ctx
            .run(&CommandLine::new(sgdisk).args(["--clear", "--mbrtogpt", "--"]).arg(&device))
            .await?;

        // udev may already hold the device after sgdisk; a busy rescan is harmless
        let probe = CommandLine::new(&self.ctx.tools().partprobe).arg(&device);
        let output = self.ctx.run_unchecked(&probe).await?;
        if !output.success() {
            warn!("'{}' exited {}: {}", probe, output.exit_code, output.stderr.trim());
        }
        Ok(())
    }
}

fn check_osd_id(osd_id: &str) -> Result<()> {
    if osd_id.is_empty() || !osd_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidValue {
            field: "osd_id",
            value: osd_id.to_string(),
        });
    }
    Ok(())
}

/// A partition of the wrong type may only be used on a GPT disk, where
/// ceph-disk can retag it
fn check_partition_type(model: &NodeModel, partition: &str, expected: &str) -> Result<()> {
    let record = model.partition(partition).ok_or_else(|| Error::DeviceNotFound {
        device: partition.to_string(),
    })?;
    if record
        .parttype()
        .is_some_and(|t| t.eq_ignore_ascii_case(expected))
    {
        return Ok(());
    }
    let disk = model.parent_disk(partition).ok_or_else(|| Error::DeviceNotFound {
        device: partition.to_string(),
    })?;
    if disk.is_gpt() {
        return Ok(());
    }
    Err(Error::UnsupportedPartitionTable {
        disk: disk.name.clone(),
        table: disk.partition_table.clone().unwrap_or_default(),
    })
}

fn prepare_command(
    ceph_disk: &str,
    model: &NodeModel,
    request: &OsdPrepareRequest,
    osd_dev: &str,
    journal_dev: Option<&str>,
) -> CommandLine {
    let fs_type = request.fs_type.as_deref().unwrap_or(DEFAULT_FS_TYPE);
    let mut command = CommandLine::new(ceph_disk)
        .args(["-v", "prepare", "--fs-type", fs_type])
        .arg("--data-dev");
    if journal_dev.is_some() {
        command = command.arg("--journal-dev");
    }
    let flags = [
        ("--cluster", model.cluster_name.as_ref()),
        ("--cluster-uuid", model.cluster_uuid.as_ref()),
        ("--osd-uuid", request.osd_uuid.as_ref()),
        ("--journal-uuid", request.journal_uuid.as_ref()),
    ];
    for (flag, value) in flags {
        if let Some(value) = value {
            command = command.arg(flag).arg(value);
        }
    }
    command = command.arg(osd_dev);
    if let Some(journal) = journal_dev {
        command = command.arg(journal);
    }
    command
}

fn zero_tail(path: &Path, size: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::resource("open", path, e))?;
    let len = file
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::resource("seek", path, e))?;
    let size = size.min(len);
    file.seek(SeekFrom::Start(len - size))
        .and_then(|_| file.write_all(&vec![0u8; size as usize]))
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::resource("zero", path, e))
}
