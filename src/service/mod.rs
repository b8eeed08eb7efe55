//! Service Supervisor Facade
//!
//! Start, stop, and query daemon services through whichever init system the
//! node runs. The backend is chosen once, when the supervisor is built.

pub mod systemd;
pub mod sysv;

pub use systemd::*;
pub use sysv::*;

use crate::config::ToolPaths;
use crate::domain::ports::{CommandExecutorRef, CommandLine, CommandOutput};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Init System
// =============================================================================

/// Init systems the operator can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    Systemd,
    #[serde(alias = "sysvinit")]
    SysV,
}

impl InitSystem {
    /// Tag passed to `ceph-disk activate --mark-init`
    pub fn mark_init_tag(&self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::SysV => "sysvinit",
        }
    }
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitSystem::Systemd => write!(f, "systemd"),
            InitSystem::SysV => write!(f, "sysv"),
        }
    }
}

impl FromStr for InitSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "systemd" => Ok(InitSystem::Systemd),
            "sysv" | "sysvinit" => Ok(InitSystem::SysV),
            _ => Err(Error::InvalidValue {
                field: "init_system",
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Service Instance
// =============================================================================

/// A daemon family plus the instance it runs for, e.g. `ceph-mon` / `node1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub family: String,
    pub instance: Option<String>,
}

impl ServiceInstance {
    pub fn new(family: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            instance: Some(instance.into()),
        }
    }

    /// A service without an instance, e.g. `ceph*` for a unit glob
    pub fn family(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            instance: None,
        }
    }

    /// Templated unit name: `family@instance`
    pub fn unit_name(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}@{}", self.family, instance),
            None => self.family.clone(),
        }
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unit_name())
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Init-system backend for daemon services
pub enum ServiceSupervisor {
    Systemd(SystemdSupervisor),
    SysV(SysVSupervisor),
}

impl ServiceSupervisor {
    /// Build the backend for `init`
    pub fn new(init: InitSystem, exec: CommandExecutorRef, tools: &ToolPaths) -> Self {
        match init {
            InitSystem::Systemd => {
                ServiceSupervisor::Systemd(SystemdSupervisor::new(exec, tools.systemctl.clone()))
            }
            InitSystem::SysV => ServiceSupervisor::SysV(SysVSupervisor::new(
                exec,
                tools.service.clone(),
                tools.chkconfig.clone(),
            )),
        }
    }

    pub fn init_system(&self) -> InitSystem {
        match self {
            ServiceSupervisor::Systemd(_) => InitSystem::Systemd,
            ServiceSupervisor::SysV(_) => InitSystem::SysV,
        }
    }

    pub async fn is_running(&self, service: &ServiceInstance) -> Result<bool> {
        match self {
            ServiceSupervisor::Systemd(s) => s.is_running(service).await,
            ServiceSupervisor::SysV(s) => s.is_running(service).await,
        }
    }

    pub async fn start(&self, service: &ServiceInstance) -> Result<()> {
        match self {
            ServiceSupervisor::Systemd(s) => s.start(service).await,
            ServiceSupervisor::SysV(s) => s.start(service).await,
        }
    }

    pub async fn stop(&self, service: &ServiceInstance) -> Result<()> {
        match self {
            ServiceSupervisor::Systemd(s) => s.stop(service).await,
            ServiceSupervisor::SysV(s) => s.stop(service).await,
        }
    }

    pub async fn restart(&self, service: &ServiceInstance) -> Result<()> {
        match self {
            ServiceSupervisor::Systemd(s) => s.restart(service).await,
            ServiceSupervisor::SysV(s) => s.restart(service).await,
        }
    }

    pub async fn on_boot_enable(&self, service: &ServiceInstance) -> Result<()> {
        match self {
            ServiceSupervisor::Systemd(s) => s.on_boot_enable(service).await,
            ServiceSupervisor::SysV(s) => s.on_boot_enable(service).await,
        }
    }

    pub async fn on_boot_disable(&self, service: &ServiceInstance) -> Result<()> {
        match self {
            ServiceSupervisor::Systemd(s) => s.on_boot_disable(service).await,
            ServiceSupervisor::SysV(s) => s.on_boot_disable(service).await,
        }
    }

    /// Start if not running, then enable on boot
    pub async fn ensure_running(&self, service: &ServiceInstance) -> Result<()> {
        if !self.is_running(service).await? {
            self.start(service).await?;
        }
        self.on_boot_enable(service).await
    }

    /// Stop if running, then disable on boot
    pub async fn ensure_stopped(&self, service: &ServiceInstance) -> Result<()> {
        if self.is_running(service).await? {
            self.stop(service).await?;
        }
        self.on_boot_disable(service).await
    }
}

/// Map a non-zero exit into [`Error::Service`]
fn check_service(
    output: CommandOutput,
    service: &ServiceInstance,
    action: &str,
) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(Error::Service {
        unit: service.unit_name(),
        action: action.to_string(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Run `command` and fail with a service error on non-zero exit
async fn run_service_command(
    exec: &CommandExecutorRef,
    command: CommandLine,
    service: &ServiceInstance,
    action: &str,
) -> Result<CommandOutput> {
    let output = exec.execute(&command).await?;
    check_service(output, service, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::ScriptedExecutor;
    use std::sync::Arc;

    #[test]
    fn test_unit_name() {
        assert_eq!(ServiceInstance::new("ceph-mon", "node1").unit_name(), "ceph-mon@node1");
        assert_eq!(ServiceInstance::family("ceph*").unit_name(), "ceph*");
    }

    #[test]
    fn test_init_system_parse() {
        assert_eq!("systemd".parse::<InitSystem>().unwrap(), InitSystem::Systemd);
        assert_eq!("sysvinit".parse::<InitSystem>().unwrap(), InitSystem::SysV);
        assert!("upstart".parse::<InitSystem>().is_err());
        assert_eq!(InitSystem::SysV.mark_init_tag(), "sysvinit");
    }

    #[tokio::test]
    async fn test_ensure_running_starts_inactive_service() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["systemctl", "show"], CommandOutput::ok("ActiveState=inactive\n"));
        let supervisor =
            ServiceSupervisor::new(InitSystem::Systemd, exec.clone(), &ToolPaths::default());

        let svc = ServiceInstance::new("ceph-mds", "mds1");
        supervisor.ensure_running(&svc).await.unwrap();

        assert!(exec.was_called(&["systemctl", "start", "ceph-mds@mds1"]));
        assert!(exec.was_called(&["systemctl", "enable", "ceph-mds@mds1"]));
    }

    #[tokio::test]
    async fn test_ensure_stopped_is_idempotent() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["systemctl", "show"], CommandOutput::ok("ActiveState=inactive\n"));
        let supervisor =
            ServiceSupervisor::new(InitSystem::Systemd, exec.clone(), &ToolPaths::default());

        let svc = ServiceInstance::new("ceph-radosgw", "gw1");
        supervisor.ensure_stopped(&svc).await.unwrap();

        assert!(!exec.was_called(&["systemctl", "stop"]));
        assert!(exec.was_called(&["systemctl", "disable", "ceph-radosgw@gw1"]));
    }
}
