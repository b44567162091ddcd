#![forbid(unsafe_code)]

//! Common types, errors and configuration shared by the Weir crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BalancerSettings, WeirConfig};
pub use error::{WeirError, WeirResult};
pub use types::{PacketSummary, Role, RttStats, StreamId, Version};
