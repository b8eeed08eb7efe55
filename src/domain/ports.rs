//! Domain Ports - Core trait definitions for the node operator
//!
//! These traits define the boundaries between the lifecycle logic and the
//! host it runs on. Every interaction with the outside world goes through a
//! [`CommandExecutor`], which lets the hosting runtime supply its own
//! execution primitive and lets tests script tool output.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Command Line
// =============================================================================

/// Argument vector for an external program. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    argv: Vec<String>,
}

impl CommandLine {
    /// Start a command line with the program to run
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prepend a wrapper such as `sudo -u ceph`
    pub fn wrapped<I, S>(self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv: Vec<String> = prefix.into_iter().map(Into::into).collect();
        argv.extend(self.argv);
        Self { argv }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn arguments(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

// =============================================================================
// Command Output
// =============================================================================

/// Captured result of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, or -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`Error::CommandFailed`]
    pub fn check(self, command: &CommandLine) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            command: command.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

// =============================================================================
// Command Executor Port
// =============================================================================

/// Port for running external programs
///
/// Implementations must not treat a non-zero exit as an error: callers
/// decide what a failure means. `Err` is reserved for failing to run the
/// program at all.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command to completion and capture its output
    async fn execute(&self, command: &CommandLine) -> Result<CommandOutput>;

    /// Name used in logs
    fn name(&self) -> &str;

    /// Run the command and fail on a non-zero exit
    async fn run_checked(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.execute(command).await?.check(command)
    }
}

pub type CommandExecutorRef = Arc<dyn CommandExecutor>;
