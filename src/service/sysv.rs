//! SysV init backend
//!
//! Legacy script-based services. The script is named after the service
//! family and the instance is passed as its argument; boot registration
//! happens per family through `chkconfig`.

use super::{run_service_command, ServiceInstance};
use crate::domain::ports::{CommandExecutorRef, CommandLine};
use crate::error::{Error, Result};
use tracing::info;

/// Supervisor for script-based init
pub struct SysVSupervisor {
    exec: CommandExecutorRef,
    service: String,
    chkconfig: String,
}

impl SysVSupervisor {
    pub fn new(exec: CommandExecutorRef, service: String, chkconfig: String) -> Self {
        Self {
            exec,
            service,
            chkconfig,
        }
    }

    fn script(&self, verb: &str, service: &ServiceInstance) -> CommandLine {
        let command = CommandLine::new(&self.service)
            .arg(&service.family)
            .arg(verb);
        match &service.instance {
            Some(instance) => command.arg(instance),
            None => command,
        }
    }

    /// LSB status codes: 0 running, 1-3 not running, anything else unknown
    pub async fn is_running(&self, service: &ServiceInstance) -> Result<bool> {
        let output = self.exec.execute(&self.script("status", service)).await?;
        match output.exit_code {
            0 => Ok(true),
            1..=3 => Ok(false),
            code => Err(Error::Service {
                unit: service.unit_name(),
                action: "status".into(),
                exit_code: code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }

    pub async fn start(&self, service: &ServiceInstance) -> Result<()> {
        info!("Starting {}", service);
        run_service_command(&self.exec, self.script("start", service), service, "start").await?;
        Ok(())
    }

    pub async fn stop(&self, service: &ServiceInstance) -> Result<()> {
        info!("Stopping {}", service);
        run_service_command(&self.exec, self.script("stop", service), service, "stop").await?;
        Ok(())
    }

    pub async fn restart(&self, service: &ServiceInstance) -> Result<()> {
        info!("Restarting {}", service);
        run_service_command(&self.exec, self.script("restart", service), service, "restart")
            .await?;
        Ok(())
    }

    pub async fn on_boot_enable(&self, service: &ServiceInstance) -> Result<()> {
        let command = CommandLine::new(&self.chkconfig).arg(&service.family).arg("on");
        run_service_command(&self.exec, command, service, "enable").await?;
        Ok(())
    }

    pub async fn on_boot_disable(&self, service: &ServiceInstance) -> Result<()> {
        let command = CommandLine::new(&self.chkconfig).arg(&service.family).arg("off");
        run_service_command(&self.exec, command, service, "disable").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::exec::mock::ScriptedExecutor;
    use std::sync::Arc;

    fn supervisor(exec: &Arc<ScriptedExecutor>) -> SysVSupervisor {
        SysVSupervisor::new(exec.clone(), "service".into(), "chkconfig".into())
    }

    #[tokio::test]
    async fn test_status_codes() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["service", "ceph-mon", "status"], CommandOutput::ok("running"));
        exec.on(&["service", "ceph-mon", "status"], CommandOutput::failed(3, ""));
        exec.on(&["service", "ceph-mon", "status"], CommandOutput::failed(4, "unknown"));
        let svc = ServiceInstance::new("ceph-mon", "node1");
        let sup = supervisor(&exec);

        assert!(sup.is_running(&svc).await.unwrap());
        assert!(!sup.is_running(&svc).await.unwrap());
        assert!(sup.is_running(&svc).await.is_err());
    }

    #[tokio::test]
    async fn test_instance_passed_to_script() {
        let exec = Arc::new(ScriptedExecutor::new());
        let svc = ServiceInstance::new("ceph-radosgw", "gw1");
        let sup = supervisor(&exec);

        sup.start(&svc).await.unwrap();
        sup.on_boot_enable(&svc).await.unwrap();

        assert_eq!(
            exec.calls(),
            vec![
                vec!["service", "ceph-radosgw", "start", "gw1"],
                vec!["chkconfig", "ceph-radosgw", "on"],
            ]
        );
    }
}
