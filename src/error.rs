//! Error types for the Ceph Node Operator
//!
//! Provides structured error types for discovery, keyring management,
//! daemon lifecycle control, and cluster queries. Tool failures carry the
//! complete argument vector and both captured output streams so operators
//! can diagnose the underlying system command.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Cluster config file does not exist: '{}'", path.display())]
    ConfigFileMissing { path: PathBuf },

    #[error("Cluster config file '{}' does not set [{section}] {option}", path.display())]
    ConfigOptionMissing {
        path: PathBuf,
        section: String,
        option: String,
    },

    #[error("No cluster config in {} has fsid '{fsid}'", dir.display())]
    ClusterNotFound { dir: PathBuf, fsid: String },

    #[error("Config has {names} mon names but {addrs} mon addresses")]
    MonitorMembersMismatch { names: usize, addrs: usize },

    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    // =========================================================================
    // Tool Execution Errors
    // =========================================================================
    #[error("Failed executing '{command}' Error rc={exit_code}, stdout={stdout} stderr={stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Could not spawn '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected output from {tool}: {reason}")]
    ToolOutput { tool: String, reason: String },

    #[error("{tool} version too old: {version}")]
    UnsupportedToolVersion { tool: String, version: String },

    #[error("Service {action} failed for '{unit}' rc={exit_code}, stdout={stdout} stderr={stderr}")]
    Service {
        unit: String,
        action: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Not a mon node: {hostname}")]
    NotMonitor { hostname: String },

    #[error("mon daemon is not in quorum: {name}")]
    MonitorNotInQuorum { name: String },

    #[error("mon service has died: {unit}")]
    MonitorDied { unit: String },

    #[error("Failed to get mon service status after {secs} seconds")]
    MonitorStartTimeout { secs: u64 },

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Not a block device: {device}")]
    NotBlockDevice { device: String },

    #[error("Not a disk or partition: {device}")]
    NotDiskOrPartition { device: String },

    #[error("Not full block device; cannot zap: {device}")]
    NotWholeDisk { device: String },

    #[error("Unsupported partition table type '{table}' for '{disk}'")]
    UnsupportedPartitionTable { disk: String, table: String },

    #[error("Journal device must be specified for partition {device}")]
    JournalRequired { device: String },

    #[error("Keyring not found at {}", path.display())]
    KeyringMissing { path: PathBuf },

    #[error("Keyring role '{role}' cannot be used for {operation}")]
    RoleNotPermitted { role: String, operation: String },

    #[error("Pools missing: {}", pools.join(", "))]
    PoolsMissing { pools: Vec<String> },

    #[error("Can't connect to cluster: no keyring authenticated")]
    NotConnected,

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Could not {action} {}: {source}", path.display())]
    Resource {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed cluster configuration, or a missing parameter
    Configuration,
    /// An external tool could not run or exited non-zero
    ToolExecution,
    /// The node is not in the state the operation requires
    Precondition,
    /// A file or directory could not be created, read, or removed
    Resource,
}

impl Error {
    /// Determine which category this error falls into
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::MissingParameter(_)
            | Error::ConfigFileMissing { .. }
            | Error::ConfigOptionMissing { .. }
            | Error::ClusterNotFound { .. }
            | Error::MonitorMembersMismatch { .. }
            | Error::InvalidValue { .. }
            | Error::YamlParse(_) => ErrorKind::Configuration,

            Error::CommandFailed { .. }
            | Error::CommandSpawn { .. }
            | Error::ToolOutput { .. }
            | Error::UnsupportedToolVersion { .. }
            | Error::Service { .. }
            | Error::JsonParse(_) => ErrorKind::ToolExecution,

            Error::NotMonitor { .. }
            | Error::MonitorNotInQuorum { .. }
            | Error::MonitorDied { .. }
            | Error::MonitorStartTimeout { .. }
            | Error::DeviceNotFound { .. }
            | Error::NotBlockDevice { .. }
            | Error::NotDiskOrPartition { .. }
            | Error::NotWholeDisk { .. }
            | Error::UnsupportedPartitionTable { .. }
            | Error::JournalRequired { .. }
            | Error::KeyringMissing { .. }
            | Error::RoleNotPermitted { .. }
            | Error::PoolsMissing { .. }
            | Error::NotConnected => ErrorKind::Precondition,

            Error::Resource { .. } | Error::Io(_) => ErrorKind::Resource,
        }
    }

    /// Check if a later invocation could succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::MonitorStartTimeout { .. }
                | Error::MonitorNotInQuorum { .. }
                | Error::NotConnected
                | Error::CommandSpawn { .. }
        )
    }

    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 2,
            ErrorKind::ToolExecution => 3,
            ErrorKind::Precondition => 4,
            ErrorKind::Resource => 5,
        }
    }

    /// Wrap an IO failure on a specific path
    pub fn resource(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Resource {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
