//! ChiaNode Custom Resource Definition.
//!
//! Defines the ChiaNode CRD for running Chia full nodes on Kubernetes.
//! A ChiaNode owns a StatefulSet of full node pods plus the Services
//! that expose the daemon, peer, RPC, and metrics ports.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PodSecurityContext, Probe, ResourceRequirements, SecurityContext,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{ChiaExporterConfigSpec, StorageConfig};

/// ChiaNode is a custom resource for deploying Chia full nodes.
///
/// Example:
/// ```yaml
/// apiVersion: k8s.chia.net/v1
/// kind: ChiaNode
/// metadata:
///   name: mainnet
/// spec:
///   replicas: 1
///   chia:
///     caSecretName: chia-ca
///   storage:
///     chiaRoot:
///       persistentVolumeClaim:
///         resourceRequest: 300Gi
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.chia.net",
    version = "v1",
    kind = "ChiaNode",
    plural = "chianodes",
    status = "ChiaNodeStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChiaNodeSpec {
    /// Configuration options for the chia container.
    pub chia: ChiaNodeConfigSpec,

    /// Configuration options for the chia-exporter sidecar.
    #[serde(default)]
    pub chia_exporter: ChiaExporterConfigSpec,

    /// CHIA_ROOT storage configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Number of node replicas in the StatefulSet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Type of the externally reachable node Service (default: ClusterIP).
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Pull policy for every container in the pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// NodeSelector selects a node by key value pairs.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Security context for the pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,

    /// Additional labels merged into every child resource.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations merged into every child resource.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

/// Configuration options for the chia container of a full node.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChiaNodeConfigSpec {
    /// Name of the Secret containing the Chia CA crt and key.
    pub ca_secret_name: String,

    /// Switch the container to the latest default testnet's settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testnet: Option<bool>,

    /// Desired chia config log_level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Local timezone for accurate timestamps. Defaults to UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Image for the chia container.
    #[serde(default = "default_chia_image")]
    pub image: String,

    /// Periodic probe of container liveness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Periodic probe of container service readiness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// StartupProbe indicates that the pod has successfully initialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,

    /// Compute resources for the chia container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Security context for the chia container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

impl Default for ChiaNodeConfigSpec {
    fn default() -> Self {
        Self {
            ca_secret_name: String::new(),
            testnet: None,
            log_level: None,
            timezone: None,
            image: default_chia_image(),
            liveness_probe: None,
            readiness_probe: None,
            startup_probe: None,
            resources: None,
            security_context: None,
        }
    }
}

pub(crate) fn default_chia_image() -> String {
    "ghcr.io/chia-network/chia:latest".to_string()
}

/// Observed status of a ChiaNode.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChiaNodeStatus {
    /// True once every child resource converged in a reconciliation pass.
    #[serde(default)]
    pub ready: bool,
}
