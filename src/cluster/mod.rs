//! Cluster Layer
//!
//! Everything that concerns the cluster rather than the local disks: its
//! config file, the installed release, the daemon account, and
//! authenticated queries against the running cluster.

pub mod config;
pub mod remote;
pub mod user;
pub mod version;

pub use config::{CephConf, Membership};
pub use remote::{Identity, PoolOptions, PoolType, RemoteCluster};
pub use user::DaemonUser;
pub use version::ceph_version_refresh;
