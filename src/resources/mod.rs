//! Resource synthesis module.
//!
//! Pure functions mapping a spec object to the Kubernetes resources it
//! owns. Synthesis never fails and never touches the cluster; the
//! convergence driver submits the results.
//!
//! ## Resources Synthesized
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Base Service | Externally reachable daemon/peer/RPC endpoint |
//! | Internal Service | Same-node traffic only (nodes) |
//! | Headless Service | Stable per-pod DNS for peer addressing |
//! | Metrics Service | chia-exporter scrape endpoint |
//! | StatefulSet | chia container plus exporter sidecar |

pub mod common;
pub mod harvester;
pub mod node;

// Re-export commonly used items from common
pub use common::{common_labels, owner_reference};
