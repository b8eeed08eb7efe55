//! Domain layer - Port definitions
//!
//! This module defines the traits (ports) that adapters implement, keeping
//! the lifecycle logic independent of how commands actually run.

pub mod ports;

pub use ports::*;
