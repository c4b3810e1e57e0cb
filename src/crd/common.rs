//! Spec fragments shared by every Chia component kind.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configuration for the chia-exporter metrics sidecar.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChiaExporterConfigSpec {
    /// Image for the chia-exporter sidecar. Falls back to the pinned
    /// ghcr.io/chia-network/chia-exporter image when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Additional labels applied to the metrics Service.
    #[serde(default)]
    pub service_labels: BTreeMap<String, String>,
}

/// CHIA_ROOT storage configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage backing the CHIA_ROOT data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chia_root: Option<ChiaRootConfig>,
}

/// Backing volume for CHIA_ROOT.
///
/// The claim is respected first when both are specified; with neither,
/// an emptyDir is synthesized so the exporter sidecar can always mount
/// CHIA_ROOT.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChiaRootConfig {
    /// PersistentVolumeClaim template parameters for CHIA_ROOT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimConfig>,

    /// Host path mount for CHIA_ROOT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_path_volume: Option<HostPathVolumeConfig>,
}

/// PersistentVolumeClaim template parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimConfig {
    /// Storage class of the generated claim.
    #[serde(default)]
    pub storage_class: String,

    /// Requested storage quantity, e.g. "300Gi".
    pub resource_request: String,
}

/// Host path volume parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostPathVolumeConfig {
    /// Path on the host to mount as CHIA_ROOT.
    pub path: String,
}
