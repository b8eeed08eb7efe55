//! MDS Controller

use super::daemon::{BindAddress, ClientDaemon, DaemonKind};
use crate::context::NodeContext;
use crate::error::Result;
use crate::idempotent::Ensured;
use crate::model::NodeModel;

/// Lifecycle of one named metadata server
pub struct MdsController<'a> {
    daemon: ClientDaemon<'a>,
}

impl<'a> MdsController<'a> {
    pub fn new(ctx: &'a NodeContext, name: &str) -> Result<Self> {
        Ok(Self {
            daemon: ClientDaemon::new(ctx, DaemonKind::Mds, name)?,
        })
    }

    pub fn daemon(&self) -> &ClientDaemon<'a> {
        &self.daemon
    }

    pub async fn prepare(&self, model: &mut NodeModel) -> Result<Ensured> {
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
        self.daemon.create(model, bind).await
    }

    pub async fn destroy(&self, model: &mut NodeModel) -> Result<()> {
        self.daemon.destroy(model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeLayout, OperatorConfig};
    use crate::domain::ports::CommandOutput;
    use crate::exec::mock::ScriptedExecutor;
    use std::fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_then_destroy() {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        let bootstrap = layout.mds_bootstrap_keyring("ceph");
        fs::create_dir_all(bootstrap.parent().unwrap()).unwrap();
        fs::write(&bootstrap, "[client.bootstrap-mds]\n\tkey = x\n").unwrap();

        let exec = Arc::new(ScriptedExecutor::new());
        exec.on_effect(&["ceph", "--connect-timeout"], |argv| {
            if argv.iter().any(|a| a == "get-or-create") {
                fs::write(argv.last().unwrap(), "[client.a]\n\tkey = y\n").unwrap();
            }
        });
        exec.on(&["systemctl", "show"], CommandOutput::ok("ActiveState=active\n"));
        let ctx = NodeContext::new(
            exec.clone(),
            OperatorConfig {
                layout,
                ..Default::default()
            },
        );

        let mds = MdsController::new(&ctx, "a").unwrap();
        let mut model = NodeModel::default();
        let bind = BindAddress {
            addr: "10.0.0.1".into(),
            port: 6800,
        };
        mds.create(&mut model, &bind).await.unwrap();
        assert!(mds.daemon().keyring_path("ceph").is_file());
        assert!(mds.daemon().env_path().is_file());
        // already running, so only enabled
        assert!(!exec.was_called(&["systemctl", "start"]));
        assert!(exec.was_called(&["systemctl", "enable", "ceph-mds@a"]));

        mds.destroy(&mut model).await.unwrap();
        assert!(exec.was_called(&["systemctl", "stop", "ceph-mds@a"]));
        assert!(!mds.daemon().data_dir("ceph").exists());
        assert!(!mds.daemon().env_path().exists());
        assert_eq!(exec.calls_matching(&["ceph", "--connect-timeout"]).len(), 2);
    }
}
