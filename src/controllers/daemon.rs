//! Client Daemon Lifecycle
//!
//! MDS and RGW daemons share one shape: a data directory holding an
//! operational keyring fetched with the role's bootstrap key, an environment
//! file that tells the templated unit where to bind, and a service instance
//! named after the daemon.

use crate::cluster::config::name_refresh;
use crate::context::NodeContext;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::idempotent::{
    ensure_dir, ensure_file, ensure_file_with, remove_dir_all_if_present, remove_file_if_present,
    Ensured,
};
use crate::keyring::KeyringRole;
use crate::model::NodeModel;
use crate::service::ServiceInstance;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which client daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonKind {
    Mds,
    Rgw,
}

impl DaemonKind {
    pub fn service_family(&self) -> &'static str {
        match self {
            DaemonKind::Mds => "ceph-mds",
            DaemonKind::Rgw => "ceph-radosgw",
        }
    }

    pub fn bootstrap_role(&self) -> KeyringRole {
        match self {
            DaemonKind::Mds => KeyringRole::Mds,
            DaemonKind::Rgw => KeyringRole::Rgw,
        }
    }
}

/// Address and port written to the daemon's environment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAddress {
    pub addr: String,
    pub port: u16,
}

/// One named MDS or RGW instance
pub struct ClientDaemon<'a> {
    ctx: &'a NodeContext,
    kind: DaemonKind,
    name: String,
}

impl<'a> ClientDaemon<'a> {
    pub fn new(ctx: &'a NodeContext, kind: DaemonKind, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::MissingParameter("name"));
        }
        Ok(Self {
            ctx,
            kind,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> PathBuf {
        let layout = self.ctx.layout();
        match self.kind {
            DaemonKind::Mds => layout.mds_root(),
            DaemonKind::Rgw => layout.rgw_root(),
        }
    }

    /// `<root>/<cluster>-<name>`
    pub fn data_dir(&self, cluster: &str) -> PathBuf {
        self.root().join(format!("{}-{}", cluster, self.name))
    }

    pub fn keyring_path(&self, cluster: &str) -> PathBuf {
        self.data_dir(cluster).join("keyring")
    }

    /// Environment file read by the templated unit
    pub fn env_path(&self) -> PathBuf {
        self.root().join("systemd").join(&self.name)
    }

    fn principal(&self) -> String {
        format!("client.{}", self.name)
    }

    fn service(&self) -> ServiceInstance {
        ServiceInstance::new(self.kind.service_family(), &self.name)
    }

    fn cluster(&self, model: &mut NodeModel) -> Result<String> {
        name_refresh(model, self.ctx.layout(), &self.ctx.config.default_cluster_name)
    }

    fn bootstrap_keyring(&self, cluster: &str) -> Result<PathBuf> {
        self.kind.bootstrap_role().path(self.ctx.layout(), cluster, None)
    }

    /// `ceph` authenticated with the role's bootstrap key
    fn bootstrap_command(&self, cluster: &str, bootstrap: &Path) -> CommandLine {
        CommandLine::new(&self.ctx.tools().ceph)
            .arg("--connect-timeout")
            .arg(self.ctx.config.connect_timeout_secs.to_string())
            .args(["--cluster", cluster])
            .args(["--name", self.kind.bootstrap_role().principal()])
            .arg("--keyring")
            .arg(bootstrap.to_string_lossy())
    }

    /// Create the data directory and fetch the daemon's keyring
    pub async fn prepare(&self, model: &mut NodeModel) -> Result<Ensured> {
        let cluster = self.cluster(model)?;
        let bootstrap = self.bootstrap_keyring(&cluster)?;
        if !bootstrap.is_file() {
            return Err(Error::KeyringMissing { path: bootstrap });
        }
        if let Some(env_dir) = self.env_path().parent() {
            ensure_dir(env_dir)?;
        }
        ensure_dir(&self.data_dir(&cluster))?;

        let keyring = self.keyring_path(&cluster);
        let principal = self.principal();
        let command = self
            .bootstrap_command(&cluster, &bootstrap)
            .args(["auth", "get-or-create", principal.as_str()])
            .args(["osd", "allow rwx", "mon", "allow rw", "-o"])
            .arg(keyring.to_string_lossy());
        let outcome = ensure_file_with(&keyring, || async {
            info!("Creating keyring {}", keyring.display());
            self.ctx.run(&command).await.map(|_| ())
        })
        .await?;
        Ok(outcome)
    }

    /// Write the environment file if missing, then start and enable the service
    pub async fn activate(&self, model: &mut NodeModel, bind: &BindAddress) -> Result<()> {
        let cluster = self.cluster(model)?;
        let env = format!(
            "BIND_IPV4=\"{}\"\nBIND_PORT=\"{}\"\nCLUSTER=\"{}\"\n",
            bind.addr, bind.port, cluster
        );
        if ensure_file(&self.env_path(), env.as_bytes())?.created() {
            info!("Wrote {}", self.env_path().display());
        }
        self.ctx.supervisor().ensure_running(&self.service()).await
    }

    pub async fn deactivate(&self) -> Result<()> {
        self.ctx.supervisor().ensure_stopped(&self.service()).await
    }

    /// Delete the environment file, revoke the key and remove the data directory
    ///
    /// Revocation is best effort; the local files go regardless.
    pub async fn remove(&self, model: &mut NodeModel) -> Result<()> {
        let cluster = self.cluster(model)?;
        if remove_file_if_present(&self.env_path())? {
            info!("Removed {}", self.env_path().display());
        }

        let data_dir = self.data_dir(&cluster);
        if !data_dir.is_dir() {
            return Ok(());
        }
        if self.keyring_path(&cluster).is_file() {
            if let Err(e) = self.revoke(&cluster).await {
                warn!("Failed to remove {} from auth list: {}", self.principal(), e);
            }
        }
        remove_dir_all_if_present(&data_dir)?;
        info!("Removed {}", data_dir.display());
        Ok(())
    }

    async fn revoke(&self, cluster: &str) -> Result<()> {
        let bootstrap = self.bootstrap_keyring(cluster)?;
        let principal = self.principal();
        let command = self
            .bootstrap_command(cluster, &bootstrap)
            .args(["auth", "del", principal.as_str()]);
        self.ctx.run(&command).await?;
        Ok(())
    }

    pub async fn create(&self, model: &mut NodeModel, bind: &BindAddress) -> Result<()> {
        self.prepare(model).await?;
        self.activate(model, bind).await
    }

    pub async fn destroy(&self, model: &mut NodeModel) -> Result<()> {
        self.deactivate().await?;
        self.remove(model).await
    }
}
