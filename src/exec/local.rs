//! Local Subprocess Executor
//!
//! Runs commands directly as child processes of the operator.

use crate::domain::ports::{CommandExecutor, CommandLine, CommandOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs commands as direct child processes
///
/// Both output streams are drained concurrently by `output()`, so tools
/// that write heavily to stdout and stderr at once cannot block on a full
/// pipe.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute(&self, command: &CommandLine) -> Result<CommandOutput> {
        info!("executing {}", command);

        let output = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                program: command.program().to_string(),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("{} exited with {}", command.program(), exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
