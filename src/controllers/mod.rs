//! Role Lifecycle Controllers
//!
//! One controller per daemon role. Each call takes a fresh [`NodeModel`],
//! refreshes the parts it needs, and converges the node toward the
//! requested state; repeating a call that already succeeded changes
//! nothing.
//!
//! - `mon`: monitor provisioning and status
//! - `osd`: storage daemon prepare, activation, removal, and disk zapping
//! - `mds` / `rgw`: named client daemons built on `daemon`
//! - `purge`: tearing the whole node back down
//!
//! [`NodeModel`]: crate::model::NodeModel

pub mod daemon;
pub mod mds;
pub mod mon;
pub mod osd;
pub mod purge;
pub mod rgw;

pub use daemon::{BindAddress, ClientDaemon, DaemonKind};
pub use mds::MdsController;
pub use mon::{ensure_in_quorum, MonController};
pub use osd::{OsdController, OsdPrepareRequest};
pub use purge::{PurgeReport, Purger};
pub use rgw::{rgw_pools_create, rgw_pools_missing, RgwController, RGW_REQUIRED_POOLS};
