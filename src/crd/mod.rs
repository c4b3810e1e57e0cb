//! Custom Resource Definitions (CRDs) for chia-operator.
//!
//! - `ChiaNode`: Deploy and manage Chia full nodes
//! - `ChiaHarvester`: Deploy and manage Chia harvesters

mod chia_harvester;
mod chia_node;
mod common;

pub use chia_harvester::*;
pub use chia_node::*;
pub use common::*;
