//! OSD Metadata Probe
//!
//! Reads the identity files ceph-disk leaves in the root of an OSD data
//! filesystem, either from where it is already mounted or through a
//! short-lived scratch mount.

use crate::context::NodeContext;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::model::OsdMetadata;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REQUIRED_FILES: &[&str] = &["ceph_fsid", "fsid", "magic"];

fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::resource("read", path, e))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if path.is_file() {
        return read_trimmed(path).map(Some);
    }
    Ok(None)
}

/// Read OSD identity from a directory
///
/// Returns `None` unless `ceph_fsid`, `fsid` and `magic` are all present.
pub fn read_from_dir(dir: &Path) -> Result<Option<OsdMetadata>> {
    if !REQUIRED_FILES.iter().all(|f| dir.join(f).exists()) {
        return Ok(None);
    }

    let journal_link = dir.join("journal");
    let journal_device = match fs::symlink_metadata(&journal_link) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(&journal_link)
            .or_else(|_| fs::read_link(&journal_link))
            .ok()
            .map(|p| p.to_string_lossy().into_owned()),
        _ => None,
    };

    Ok(Some(OsdMetadata {
        ceph_fsid: read_trimmed(&dir.join("ceph_fsid"))?,
        fsid: read_trimmed(&dir.join("fsid"))?,
        magic: read_trimmed(&dir.join("magic"))?,
        journal_uuid: read_optional(&dir.join("journal_uuid"))?,
        whoami: read_optional(&dir.join("whoami"))?,
        journal_device,
    }))
}

// =============================================================================
// Probe Port
// =============================================================================

/// Source of OSD metadata for the partition classifier
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    /// Read metadata from a filesystem that is already mounted
    async fn from_mountpoint(&self, mountpoint: &str) -> Result<Option<OsdMetadata>>;

    /// Mount `device` somewhere private, read metadata, unmount
    async fn from_device(&self, device: &str) -> Result<Option<OsdMetadata>>;
}

// =============================================================================
// Scratch Mount
// =============================================================================

/// A device mounted on a private directory
///
/// There is no async drop, so callers must hand the mount back through
/// [`ScratchMount::release`] on every path once [`ScratchMount::mount`]
/// has succeeded.
pub struct ScratchMount<'a> {
    ctx: &'a NodeContext,
    dir: PathBuf,
}

impl<'a> ScratchMount<'a> {
    /// Mount `device` on a fresh scratch directory
    ///
    /// A failed mount removes the directory again and yields `None`.
    pub async fn mount(ctx: &'a NodeContext, device: &str) -> Result<Option<ScratchMount<'a>>> {
        let root = ctx.layout().scratch_root();
        fs::create_dir_all(&root).map_err(|e| Error::resource("create directory", &root, e))?;
        let dir = tempfile::Builder::new()
            .prefix("ceph-probe.")
            .tempdir_in(&root)
            .map_err(|e| Error::resource("create scratch directory in", &root, e))?
            .keep();

        let command = CommandLine::new(&ctx.tools().mount)
            .arg(device)
            .arg(dir.to_string_lossy());
        let output = ctx.run_unchecked(&command).await;
        match output {
            Ok(out) if out.success() => Ok(Some(ScratchMount { ctx, dir })),
            Ok(out) => {
                warn!("Could not mount {}: {}", device, out.stderr.trim());
                remove_scratch_dir(&dir);
                Ok(None)
            }
            Err(e) => {
                remove_scratch_dir(&dir);
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Unmount and remove the scratch directory
    ///
    /// The directory is only removed once it is no longer a mount point, and
    /// only with a non-recursive remove.
    pub async fn release(self) -> Result<()> {
        let command = CommandLine::new(&self.ctx.tools().umount).arg(self.dir.to_string_lossy());
        self.ctx.run(&command).await?;
        fs::remove_dir(&self.dir).map_err(|e| Error::resource("remove", &self.dir, e))
    }
}

fn remove_scratch_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir(dir) {
        warn!("Could not remove scratch directory {}: {}", dir.display(), e);
    }
}

/// Probe backed by the local filesystem and the mount tools
pub struct MountProbe<'a> {
    ctx: &'a NodeContext,
}

impl<'a> MountProbe<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MetadataProbe for MountProbe<'_> {
    async fn from_mountpoint(&self, mountpoint: &str) -> Result<Option<OsdMetadata>> {
        read_from_dir(Path::new(mountpoint))
    }

    async fn from_device(&self, device: &str) -> Result<Option<OsdMetadata>> {
        let Some(mount) = ScratchMount::mount(self.ctx, device).await? else {
            return Ok(None);
        };
        debug!("Mounted {} on {}", device, mount.path().display());

        let metadata = read_from_dir(mount.path());
        let released = mount.release().await;
        let metadata = metadata?;
        released?;

        if metadata.is_some() {
            info!("Found OSD metadata on {}", device);
        }
        Ok(metadata)
    }
}
