//! Invocation Context
//!
//! The collaborators every controller needs, handed in explicitly: the
//! command executor and the operator configuration.

use crate::config::{NodeLayout, OperatorConfig, ToolPaths};
use crate::domain::ports::{CommandExecutorRef, CommandLine, CommandOutput};
use crate::error::Result;
use crate::exec::CommandGateway;
use crate::service::ServiceSupervisor;
use std::sync::Arc;

/// Shared, read-only collaborators for one operator invocation
#[derive(Clone)]
pub struct NodeContext {
    pub exec: CommandExecutorRef,
    pub config: Arc<OperatorConfig>,
}

impl NodeContext {
    pub fn new(exec: CommandExecutorRef, config: OperatorConfig) -> Self {
        Self {
            exec,
            config: Arc::new(config),
        }
    }

    /// Context that runs every command as a local child process
    pub fn standalone(config: OperatorConfig) -> Self {
        Self::new(CommandGateway::standalone().into_ref(), config)
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.config.layout
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.config.tools
    }

    /// Supervisor for the configured init system
    pub fn supervisor(&self) -> ServiceSupervisor {
        ServiceSupervisor::new(self.config.init_system, self.exec.clone(), &self.config.tools)
    }

    /// Run a command and fail on non-zero exit
    pub async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.exec.run_checked(command).await
    }

    /// Run a command and hand back its output whatever the exit code
    pub async fn run_unchecked(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.exec.execute(command).await
    }
}
