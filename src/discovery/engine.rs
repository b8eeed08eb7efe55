//! Discovery Engine
//!
//! Refreshes a [`NodeModel`] from the tools. Each `*_refresh` step replaces
//! the fields it owns outright; nothing is merged with an earlier value.

use super::classifier::classify;
use super::lsblk::{listing_arguments, parse_listing, parse_version};
use super::metadata::{MetadataProbe, MountProbe};
use super::parted::parse_partition_table;
use super::symlinks::scan_aliases;
use crate::context::NodeContext;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::model::{NodeModel, ToolVersion};
use chrono::Utc;
use std::fs;
use tracing::{debug, info, warn};

/// Drives discovery for one controller invocation
pub struct DiscoveryEngine<'a> {
    ctx: &'a NodeContext,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    /// Full device refresh: aliases, block devices, partition tables, classification
    pub async fn refresh(&self, model: &mut NodeModel) -> Result<()> {
        info!("Refreshing block device model");
        self.symlinks_refresh(model);
        self.partitions_all_refresh(model).await?;
        self.partition_table_refresh(model).await?;
        self.discover_partitions_refresh(model).await;
        model.refreshed_at = Some(Utc::now());
        Ok(())
    }

    /// Resolve the local hostname once per model
    pub async fn hostname_refresh(&self, model: &mut NodeModel) -> Result<()> {
        if model.hostname.is_some() {
            return Ok(());
        }
        model.hostname = Some(resolve_hostname(self.ctx).await?);
        Ok(())
    }

    pub fn symlinks_refresh(&self, model: &mut NodeModel) {
        model.symlinks = scan_aliases(&self.ctx.layout().disk_alias_dir);
        debug!("Indexed aliases for {} devices", model.symlinks.len());
    }

    pub async fn lsblk_version_refresh(&self, model: &mut NodeModel) -> Result<ToolVersion> {
        let command = CommandLine::new(&self.ctx.tools().lsblk).arg("--version");
        let output = self.ctx.run(&command).await?;
        let version = parse_version(&output.stdout)?;
        debug!("lsblk version {}", version);
        model.lsblk_version = Some(version);
        Ok(version)
    }

    /// List every disk and partition
    pub async fn partitions_all_refresh(&self, model: &mut NodeModel) -> Result<()> {
        let version = match model.lsblk_version {
            Some(version) => version,
            None => self.lsblk_version_refresh(model).await?,
        };
        let command = CommandLine::new(&self.ctx.tools().lsblk).args(listing_arguments(&version)?);
        let output = self.ctx.run(&command).await?;

        let listing = parse_listing(&output.stdout);
        info!(
            "Found {} disks with {} partitions",
            listing.disks.len(),
            listing.partition_parent.len()
        );
        model.disks = listing.disks;
        model.partition_parent = listing.partition_parent;
        Ok(())
    }

    /// Record each disk's partition table type
    ///
    /// parted exits non-zero on disks without a label; those disks are left
    /// without a table type rather than failing the whole refresh.
    pub async fn partition_table_refresh(&self, model: &mut NodeModel) -> Result<()> {
        for (name, disk) in model.disks.iter_mut() {
            let command = CommandLine::new(&self.ctx.tools().parted)
                .arg(name)
                .arg("print");
            let output = self.ctx.run_unchecked(&command).await?;
            disk.partition_table = parse_partition_table(&output.stdout);
            if !output.success() {
                warn!(
                    "'{}' exited {}: {}",
                    command,
                    output.exit_code,
                    output.stderr.trim()
                );
            }
        }
        Ok(())
    }

    /// Classify partitions using the mount-based probe
    pub async fn discover_partitions_refresh(&self, model: &mut NodeModel) {
        let probe = MountProbe::new(self.ctx);
        self.discover_partitions_with(model, &probe).await;
    }

    pub async fn discover_partitions_with(&self, model: &mut NodeModel, probe: &dyn MetadataProbe) {
        let result = classify(&model.disks, &model.partition_parent, probe).await;
        info!(
            "Classified {} storage and {} journal partitions across {} clusters",
            result.storage.len(),
            result.journal.len(),
            result.daemons.len()
        );
        model.storage_partitions = result.storage;
        model.journal_partitions = result.journal;
        model.discovered_daemons = result.daemons;
    }
}

/// Hostname from configuration, then the `hostname` tool, then the hostname file
pub async fn resolve_hostname(ctx: &NodeContext) -> Result<String> {
    if let Some(hostname) = &ctx.config.hostname {
        return Ok(hostname.clone());
    }

    let command = CommandLine::new(&ctx.tools().hostname).arg("-s");
    match ctx.run_unchecked(&command).await {
        Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
            return Ok(output.stdout.trim().to_string());
        }
        Ok(output) => debug!("'{}' gave no hostname (rc={})", command, output.exit_code),
        Err(e) => debug!("'{}' failed: {}", command, e),
    }

    let path = &ctx.layout().hostname_file;
    let text = fs::read_to_string(path).map_err(|e| Error::resource("read", path, e))?;
    let hostname = text.trim();
    if hostname.is_empty() {
        return Err(Error::Configuration(format!(
            "hostname file {} is empty",
            path.display()
        )));
    }
    Ok(hostname.split('.').next().unwrap_or(hostname).to_string())
}
