//! systemd backend
//!
//! Drives templated units through `systemctl`.

use super::{run_service_command, ServiceInstance};
use crate::domain::ports::{CommandExecutorRef, CommandLine};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Supervisor for unit-based init
pub struct SystemdSupervisor {
    exec: CommandExecutorRef,
    systemctl: String,
}

impl SystemdSupervisor {
    pub fn new(exec: CommandExecutorRef, systemctl: String) -> Self {
        Self { exec, systemctl }
    }

    fn command(&self, verb: &str, service: &ServiceInstance) -> CommandLine {
        CommandLine::new(&self.systemctl)
            .arg(verb)
            .arg(service.unit_name())
    }

    /// Only `ActiveState=active` counts as running
    pub async fn is_running(&self, service: &ServiceInstance) -> Result<bool> {
        let command = CommandLine::new(&self.systemctl)
            .args(["show", "--property", "ActiveState"])
            .arg(service.unit_name());
        let output = run_service_command(&self.exec, command, service, "query").await?;

        match parse_active_state(&output.stdout) {
            Some(state) => {
                debug!("{} ActiveState={}", service, state);
                Ok(state == "active")
            }
            None => Err(Error::Service {
                unit: service.unit_name(),
                action: "query".into(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: "no ActiveState in systemctl output".into(),
            }),
        }
    }

    pub async fn start(&self, service: &ServiceInstance) -> Result<()> {
        info!("Starting {}", service);
        run_service_command(&self.exec, self.command("start", service), service, "start").await?;
        Ok(())
    }

    pub async fn stop(&self, service: &ServiceInstance) -> Result<()> {
        info!("Stopping {}", service);
        run_service_command(&self.exec, self.command("stop", service), service, "stop").await?;
        Ok(())
    }

    pub async fn restart(&self, service: &ServiceInstance) -> Result<()> {
        info!("Restarting {}", service);
        run_service_command(&self.exec, self.command("restart", service), service, "restart")
            .await?;
        Ok(())
    }

    pub async fn on_boot_enable(&self, service: &ServiceInstance) -> Result<()> {
        run_service_command(&self.exec, self.command("enable", service), service, "enable")
            .await?;
        Ok(())
    }

    pub async fn on_boot_disable(&self, service: &ServiceInstance) -> Result<()> {
        run_service_command(&self.exec, self.command("disable", service), service, "disable")
            .await?;
        Ok(())
    }
}

/// Extract the value of `ActiveState=` from `systemctl show` output
pub fn parse_active_state(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "ActiveState").then(|| value.trim().to_string())
    })
}
