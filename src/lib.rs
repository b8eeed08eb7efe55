//! Ceph Node Operator
//!
//! Node-local discovery and daemon lifecycle control for Ceph storage
//! clusters. Every operation inspects the host afresh by shelling out to the
//! disk and cluster tools, then converges the node idempotently.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        Role Lifecycle Controllers                            │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐    │
//! │  │   MON    │  │   OSD    │  │   MDS    │  │   RGW    │  │    Purge     │    │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘  └────┬─────┘  └──────┬───────┘    │
//! │       └─────────────┴──────┬──────┴─────────────┴───────────────┘            │
//! ├────────────────────────────┼────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌────┴────────────┐  ┌─────────────────────────────┐  │
//! │  │    Discovery    │  │    Keyring      │  │     Cluster (conf,          │  │
//! │  │  (lsblk/parted) │  │    Authority    │  │     version, remote)        │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │      Node Model       │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │  Command Execution Gateway  │  │   Service Supervisor (systemd/sysv) │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`exec`]: Command execution gateway
//! - [`discovery`]: Block device discovery and OSD classification
//! - [`model`]: Per-invocation node model and presentation views
//! - [`keyring`]: Per-role keyring creation, persistence, and authorization
//! - [`cluster`]: Cluster config, release, daemon user, remote queries
//! - [`service`]: Init-system supervision
//! - [`controllers`]: Role lifecycle controllers
//! - [`domain`]: Core ports and traits
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod config;
pub mod context;
pub mod controllers;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod exec;
pub mod idempotent;
pub mod keyring;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use config::{NodeLayout, OperatorConfig, ToolPaths};
pub use context::NodeContext;

pub use controllers::{
    BindAddress, DaemonKind, MdsController, MonController, OsdController, OsdPrepareRequest,
    PurgeReport, Purger, RgwController,
};

pub use discovery::DiscoveryEngine;

pub use domain::ports::{CommandExecutor, CommandExecutorRef, CommandLine, CommandOutput};

pub use error::{Error, ErrorKind, Result};

pub use exec::{CommandGateway, LocalExecutor};

pub use idempotent::Ensured;

pub use keyring::{Keyring, KeyringRole};

pub use model::{NodeModel, Presenter};

pub use service::{InitSystem, ServiceInstance, ServiceSupervisor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
