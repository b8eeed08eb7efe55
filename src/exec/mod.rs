//! Command Execution Gateway
//!
//! Runs external programs for every other component. When the operator is
//! loaded by a host automation runtime, that runtime can hand in its own
//! execution primitive; otherwise commands run as local child processes.

pub mod local;
#[cfg(test)]
pub(crate) mod mock;

pub use local::*;

use crate::domain::ports::{CommandExecutor, CommandExecutorRef, CommandLine, CommandOutput};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Routes commands to a host-supplied executor when one is present,
/// falling back to [`LocalExecutor`]
#[derive(Clone)]
pub struct CommandGateway {
    host: Option<CommandExecutorRef>,
    local: LocalExecutor,
}

impl CommandGateway {
    /// Gateway that always runs commands locally
    pub fn standalone() -> Self {
        Self {
            host: None,
            local: LocalExecutor::new(),
        }
    }

    /// Gateway that delegates to the hosting runtime's executor
    pub fn hosted(host: CommandExecutorRef) -> Self {
        Self {
            host: Some(host),
            local: LocalExecutor::new(),
        }
    }

    /// Gateway for an optional host executor
    pub fn new(host: Option<CommandExecutorRef>) -> Self {
        match host {
            Some(host) => Self::hosted(host),
            None => Self::standalone(),
        }
    }

    pub fn is_hosted(&self) -> bool {
        self.host.is_some()
    }

    pub fn into_ref(self) -> CommandExecutorRef {
        Arc::new(self)
    }
}

#[async_trait]
impl CommandExecutor for CommandGateway {
    async fn execute(&self, command: &CommandLine) -> Result<CommandOutput> {
        match &self.host {
            Some(host) => host.execute(command).await,
            None => self.local.execute(command).await,
        }
    }

    fn name(&self) -> &str {
        match &self.host {
            Some(host) => host.name(),
            None => self.local.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedExecutor;
    use super::*;

    #[tokio::test]
    async fn test_prefers_host_executor() {
        let host = Arc::new(ScriptedExecutor::new());
        host.on(&["lsblk", "--version"], CommandOutput::ok("lsblk from util-linux 2.29.2\n"));

        let gateway = CommandGateway::new(Some(host.clone()));
        assert!(gateway.is_hosted());
        assert_eq!(gateway.name(), "scripted");

        let output = gateway
            .execute(&CommandLine::new("lsblk").arg("--version"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "lsblk from util-linux 2.29.2\n");
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_local() {
        let gateway = CommandGateway::new(None);
        assert!(!gateway.is_hosted());

        let output = gateway
            .execute(&CommandLine::new("echo").arg("standalone"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "standalone");
    }
}
