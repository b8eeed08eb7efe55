//! Discovery Engine
//!
//! Builds the block-device half of the node model:
//! - `lsblk`: disk and partition enumeration
//! - `parted`: partition table types
//! - `symlinks`: stable alias index
//! - `metadata`: OSD identity probing through scratch mounts
//! - `classifier`: storage/journal classification and daemon aggregation

pub mod classifier;
pub mod engine;
pub mod lsblk;
pub mod metadata;
pub mod parted;
pub mod symlinks;

pub use classifier::{Classification, JOURNAL_PARTTYPE, OSD_PARTTYPE};
pub use engine::{resolve_hostname, DiscoveryEngine};
pub use metadata::{MetadataProbe, MountProbe};
