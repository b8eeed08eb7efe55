//! Monitor Controller
//!
//! Provisions the local monitor from the bootstrap keyring and the initial
//! member list, and reports its status. A `done` sentinel in the data
//! directory marks a monitor that has been fully provisioned; once it is
//! there the map and mkfs steps never run again.

use crate::cluster::config::{
    defaults_refresh, load_conf, mon_members, mon_members_refresh, name_refresh, Membership,
};
use crate::cluster::user::DaemonUser;
use crate::cluster::version::ceph_version_refresh;
use crate::context::NodeContext;
use crate::discovery::DiscoveryEngine;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::idempotent::{ensure_file, remove_dir_all_if_present, Ensured};
use crate::model::{MonStatus, MonitorMember, NodeModel, Presenter};
use crate::service::ServiceInstance;
use backoff::ExponentialBackoffBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const MON_SERVICE: &str = "ceph-mon";

fn mon_service(hostname: &str) -> ServiceInstance {
    ServiceInstance::new(MON_SERVICE, hostname)
}

fn require_hostname(model: &NodeModel) -> Result<String> {
    model.hostname.clone().ok_or(Error::MissingParameter("hostname"))
}

fn require_cluster_name(model: &NodeModel) -> Result<String> {
    model
        .cluster_name
        .clone()
        .ok_or(Error::MissingParameter("cluster_name"))
}

/// Ask the local monitor for `mon_status` over its admin socket
pub async fn fetch_mon_status(ctx: &NodeContext, cluster: &str, hostname: &str) -> Result<MonStatus> {
    let socket = ctx.layout().mon_admin_socket(cluster, hostname);
    let command = CommandLine::new(&ctx.tools().ceph)
        .arg(format!("--cluster={cluster}"))
        .arg("--admin-daemon")
        .arg(socket.to_string_lossy())
        .arg("mon_status");
    let output = ctx.run(&command).await?;
    Ok(MonStatus(serde_json::from_str(output.stdout.trim())?))
}

pub async fn mon_status_refresh(ctx: &NodeContext, model: &mut NodeModel) -> Result<()> {
    let hostname = require_hostname(model)?;
    let cluster = require_cluster_name(model)?;
    model.mon_status = Some(fetch_mon_status(ctx, &cluster, &hostname).await?);
    Ok(())
}

/// Fail unless this host is a monitor member currently in quorum
pub async fn ensure_in_quorum(ctx: &NodeContext, model: &mut NodeModel) -> Result<()> {
    DiscoveryEngine::new(ctx).hostname_refresh(model).await?;
    name_refresh(model, ctx.layout(), &ctx.config.default_cluster_name)?;
    load_conf(model, ctx.layout())?;
    let hostname = require_hostname(model)?;
    if mon_members_refresh(model)? == Membership::NotMember {
        return Err(Error::NotMonitor { hostname });
    }
    mon_status_refresh(ctx, model).await?;
    if !model.mon_quorum() {
        return Err(Error::MonitorNotInQuorum { name: hostname });
    }
    Ok(())
}

// =============================================================================
// Monitor Controller
// =============================================================================

pub struct MonController<'a> {
    ctx: &'a NodeContext,
}

impl<'a> MonController<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    fn membership(&self, model: &mut NodeModel) -> Result<Membership> {
        load_conf(model, self.ctx.layout())?;
        mon_members_refresh(model)
    }

    fn require_member(&self, model: &mut NodeModel) -> Result<String> {
        let hostname = require_hostname(model)?;
        if self.membership(model)? == Membership::NotMember {
            return Err(Error::NotMonitor { hostname });
        }
        Ok(hostname)
    }

    /// Whether this host is listed as an initial monitor; an unconfigured
    /// cluster answers `false`
    pub async fn is(&self, model: &mut NodeModel) -> Result<bool> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        if let Err(e) = defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name) {
            debug!("Cluster not configured: {}", e);
            return Ok(false);
        }
        Ok(self.membership(model)? == Membership::Member)
    }

    /// `mon_status` keyed by fsid; empty when the cluster is not configured
    pub async fn status(&self, model: &mut NodeModel) -> Result<BTreeMap<String, serde_json::Value>> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        if let Err(e) = defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name) {
            debug!("Cluster not configured: {}", e);
            return Ok(BTreeMap::new());
        }
        self.require_member(model)?;
        mon_status_refresh(self.ctx, model).await?;
        Ok(Presenter::new(model).mon_status())
    }

    pub async fn quorum(&self, model: &mut NodeModel) -> Result<bool> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        self.membership(model)?;
        mon_status_refresh(self.ctx, model).await?;
        Ok(model.mon_quorum())
    }

    /// Whether the monitor service is running
    pub async fn active(&self, model: &mut NodeModel) -> Result<bool> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        let hostname = require_hostname(model)?;
        self.ctx.supervisor().is_running(&mon_service(&hostname)).await
    }

    /// Initial monitor members from the cluster config
    pub async fn list(&self, model: &mut NodeModel) -> Result<Vec<MonitorMember>> {
        defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        load_conf(model, self.ctx.layout())?;
        match &model.conf {
            Some(conf) => mon_members(conf),
            None => Ok(Vec::new()),
        }
    }

    /// Provision and start the local monitor
    ///
    /// With the `done` sentinel present this only makes sure the service is
    /// up, restarting it when it is not.
    pub async fn create(&self, model: &mut NodeModel) -> Result<Ensured> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        defaults_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        let hostname = self.require_member(model)?;
        let cluster = require_cluster_name(model)?;
        let layout = self.ctx.layout();
        let supervisor = self.ctx.supervisor();
        let service = mon_service(&hostname);

        let done = layout.mon_done_file(&cluster, &hostname);
        if done.is_file() {
            debug!("Mon done file exists: {}", done.display());
            if supervisor.is_running(&service).await? {
                return Ok(Ensured::AlreadyPresent);
            }
            supervisor.restart(&service).await?;
            self.wait_until_responding(model, &service).await?;
            return Ok(Ensured::AlreadyPresent);
        }

        let bootstrap = layout.mon_bootstrap_keyring(&cluster, &hostname);
        if !bootstrap.is_file() {
            return Err(Error::KeyringMissing { path: bootstrap });
        }
        let fsid = model
            .cluster_uuid
            .clone()
            .ok_or(Error::MissingParameter("cluster_uuid"))?;

        ceph_version_refresh(self.ctx, model).await?;
        let user = DaemonUser::for_model(model, &layout.passwd_file)?;

        let scratch_root = layout.scratch_root();
        fs::create_dir_all(&scratch_root)
            .map_err(|e| Error::resource("create directory", &scratch_root, e))?;
        let scratch = tempfile::Builder::new()
            .prefix("ceph-mon.")
            .tempdir_in(&scratch_root)
            .map_err(|e| Error::resource("create scratch directory in", &scratch_root, e))?;
        user.chown(scratch.path())?;

        let monmap = scratch.path().join("monmap");
        self.build_monmap(&monmap, &fsid, &model.monitor_members).await?;
        user.chown(&monmap)?;

        let keyring = scratch.path().join("keyring");
        self.merge_keyrings(&keyring, &bootstrap, &layout.admin_keyring(&cluster))
            .await?;
        user.chown(&keyring)?;

        let data_dir = layout.mon_data_dir(&cluster, &hostname);
        remove_dir_all_if_present(&data_dir)?;
        fs::create_dir_all(&data_dir).map_err(|e| Error::resource("create directory", &data_dir, e))?;
        user.chown(&data_dir)?;

        let mkfs = CommandLine::new(&self.ctx.tools().ceph_mon)
            .args(["--cluster", &cluster])
            .args(["--mkfs", "-i", &hostname])
            .arg("--monmap")
            .arg(monmap.to_string_lossy())
            .arg("--keyring")
            .arg(keyring.to_string_lossy());
        info!("Creating mon store for {}", hostname);
        self.ctx.run(&user.wrap(mkfs, self.ctx.tools())).await?;

        supervisor.restart(&service).await?;
        supervisor.on_boot_enable(&service).await?;
        self.wait_until_responding(model, &service).await?;

        ensure_file(&done, b"")?;
        user.chown(&done)?;
        scratch
            .close()
            .map_err(|e| Error::resource("remove", &scratch_root, e))?;
        info!("Mon {} created", hostname);
        Ok(Ensured::Created)
    }

    async fn build_monmap(&self, path: &Path, fsid: &str, members: &[MonitorMember]) -> Result<()> {
        let tool = &self.ctx.tools().monmaptool;
        let path = path.to_string_lossy();
        let create = CommandLine::new(tool)
            .args(["--create", "--fsid", fsid])
            .arg(path.as_ref());
        self.ctx.run(&create).await?;
        for member in members {
            let add = CommandLine::new(tool)
                .args(["--add", &member.name, &member.addr])
                .arg(path.as_ref());
            self.ctx.run(&add).await?;
        }
        Ok(())
    }

    /// Working keyring holding the mon key, plus the admin key when this host has it
    async fn merge_keyrings(&self, target: &Path, mon: &Path, admin: &Path) -> Result<()> {
        let tool = &self.ctx.tools().ceph_authtool;
        let create = CommandLine::new(tool)
            .arg("--create-keyring")
            .arg(target.to_string_lossy())
            .arg("--import-keyring")
            .arg(mon.to_string_lossy());
        self.ctx.run(&create).await?;
        if admin.is_file() {
            let import = CommandLine::new(tool)
                .arg(target.to_string_lossy())
                .arg("--import-keyring")
                .arg(admin.to_string_lossy());
            self.ctx.run(&import).await?;
        }
        Ok(())
    }

    /// Poll until the monitor answers on its admin socket
    ///
    /// A stopped service ends the wait at once; otherwise the socket is
    /// retried every `mon_poll_interval` until `mon_start_timeout` passes.
    async fn wait_until_responding(&self, model: &mut NodeModel, service: &ServiceInstance) -> Result<()> {
        let hostname = require_hostname(model)?;
        let cluster = require_cluster_name(model)?;
        let interval = self.ctx.config.mon_poll_interval;
        let timeout = self.ctx.config.mon_start_timeout;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(interval)
            .with_max_interval(interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(timeout))
            .build();

        let supervisor = self.ctx.supervisor();
        let ctx = self.ctx;
        let status = backoff::future::retry(policy, || {
            let supervisor = &supervisor;
            let (cluster, hostname) = (cluster.as_str(), hostname.as_str());
            async move {
                if !supervisor.is_running(service).await.map_err(backoff::Error::permanent)? {
                    return Err(backoff::Error::permanent(Error::MonitorDied {
                        unit: service.unit_name(),
                    }));
                }
                fetch_mon_status(ctx, cluster, hostname).await.map_err(|e| {
                    info!("Mon service did not start up, waiting: {}", e);
                    backoff::Error::transient(Error::MonitorStartTimeout {
                        secs: timeout.as_secs(),
                    })
                })
            }
        })
        .await?;

        model.mon_status = Some(status);
        Ok(())
    }

    /// Stop the monitor and delete its data directory
    pub async fn destroy(&self, model: &mut NodeModel) -> Result<bool> {
        DiscoveryEngine::new(self.ctx).hostname_refresh(model).await?;
        let cluster = name_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)?;
        let hostname = require_hostname(model)?;

        self.ctx
            .supervisor()
            .ensure_stopped(&mon_service(&hostname))
            .await?;
        let data_dir = self.ctx.layout().mon_data_dir(&cluster, &hostname);
        let removed = remove_dir_all_if_present(&data_dir)?;
        if removed {
            info!("Removed {}", data_dir.display());
        }
        Ok(removed)
    }
}
