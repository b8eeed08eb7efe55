//! RGW Controller
//!
//! Gateway daemons follow the common client-daemon lifecycle, except that
//! preparation refuses to run until the cluster holds every pool the
//! gateway writes to.

use super::daemon::{BindAddress, ClientDaemon, DaemonKind};
use crate::cluster::config::name_refresh;
use crate::cluster::remote::{PoolOptions, RemoteCluster};
use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::idempotent::Ensured;
use crate::model::NodeModel;
use std::collections::BTreeSet;
use tracing::{error, info};

/// Pools a gateway needs before it can start
pub const RGW_REQUIRED_POOLS: &[&str] = &[
    ".rgw",
    ".rgw.control",
    ".rgw.gc",
    ".log",
    ".intent-log",
    ".usage",
    ".users",
    ".users.email",
    ".users.swift",
    ".users.uid",
];

/// Required pools absent from the cluster, in name order
pub async fn rgw_pools_missing(ctx: &NodeContext, model: &mut NodeModel) -> Result<BTreeSet<String>> {
    let cluster = name_refresh(model, ctx.layout(), &ctx.config.default_cluster_name)?;
    let mut remote = RemoteCluster::new(ctx, &cluster);
    remote.ensure_connected(model).await?;
    remote.pool_list(model).await?;
    Ok(missing_from(model))
}

fn missing_from(model: &NodeModel) -> BTreeSet<String> {
    RGW_REQUIRED_POOLS
        .iter()
        .filter(|pool| !model.pool_list.contains_key(**pool))
        .map(|pool| pool.to_string())
        .collect()
}

/// Create every missing gateway pool
///
/// A failed creation is logged and the remaining pools are still attempted.
/// Returns `true` only when every creation succeeded.
pub async fn rgw_pools_create(ctx: &NodeContext, model: &mut NodeModel) -> Result<bool> {
    let cluster = name_refresh(model, ctx.layout(), &ctx.config.default_cluster_name)?;
    let mut remote = RemoteCluster::new(ctx, &cluster);
    remote.ensure_connected(model).await?;
    remote.pool_list(model).await?;

    let options = PoolOptions::with_pg_num(ctx.config.rgw_pool_pg_num);
    let mut all_created = true;
    for pool in missing_from(model) {
        info!("Adding missing pool {}", pool);
        if let Err(e) = remote.pool_add(model, &pool, &options).await {
            error!("Failed to add pool '{}': {}", pool, e);
            all_created = false;
        }
    }
    Ok(all_created)
}

/// Lifecycle of one named gateway
pub struct RgwController<'a> {
    ctx: &'a NodeContext,
    daemon: ClientDaemon<'a>,
}

impl<'a> RgwController<'a> {
    pub fn new(ctx: &'a NodeContext, name: &str) -> Result<Self> {
        Ok(Self {
            ctx,
            daemon: ClientDaemon::new(ctx, DaemonKind::Rgw, name)?,
        })
    }

    pub fn daemon(&self) -> &ClientDaemon<'a> {
        &self.daemon
    }

    pub async fn prepare(&self, model: &mut NodeModel) -> Result<Ensured> {
        let missing = rgw_pools_missing(self.ctx, model).await?;
        if !missing.is_empty() {
            return Err(Error::PoolsMissing {
                pools: missing.into_iter().collect(),
            });
        }
        self.daemon.prepare(model).await
    }

    pub async fn activate(&self, model: &mut NodeModel, bind: &BindAddress) -> Result<()> {
        self.daemon.activate(model, bind).await
    }

    pub async fn deactivate(&self) -> Result<()> {
        self.daemon.deactivate().await
    }

    pub async fn remove(&self, model: &mut NodeModel) -> Result<()> {
        self.daemon.remove(model).await
    }

    pub async fn create(&self, model: &mut NodeModel, bind: &BindAddress) -> Result<()> {
        self.prepare(model).await?;
        self.activate(model, bind).await
    }

    pub async fn destroy(&self, model: &mut NodeModel) -> Result<()> {
        self.daemon.destroy(model).await
    }
}
