//! Child resource synthesis for ChiaNode.
//!
//! Maps one ChiaNode spec to its full child set: an externally
//! reachable Service, an internal-traffic-only Service, a headless
//! Service for peer discovery, a metrics Service, and the node
//! StatefulSet with the chia container and exporter sidecar.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::ChiaNode;
use crate::resources::common::{
    chia_exporter_container, chia_volume_mounts, chia_volumes_and_claims, common_labels, env_var,
    owner_reference, CA_MOUNT_PATH, CHIA_EXPORTER_PORT, CHIA_ROOT_MOUNT_PATH, DAEMON_PORT,
};

/// Peer port for mainnet full nodes.
pub const MAINNET_NODE_PORT: i32 = 8444;

/// Peer port for testnet full nodes.
pub const TESTNET_NODE_PORT: i32 = 58444;

/// Port for the full_node RPC.
pub const NODE_RPC_PORT: i32 = 8555;

/// Label key binding child resources to their owning ChiaNode.
const OWNER_LABEL: &str = "chianode-owner";

/// Determine the full node peer port. Mainnet applies unless the
/// testnet flag is present and true.
pub fn full_node_port(node: &ChiaNode) -> i32 {
    match node.spec.chia.testnet {
        Some(true) => TESTNET_NODE_PORT,
        _ => MAINNET_NODE_PORT,
    }
}

fn node_labels(node: &ChiaNode) -> BTreeMap<String, String> {
    common_labels(OWNER_LABEL, &node.name_any(), &[&node.spec.labels])
}

fn selector_labels(node: &ChiaNode) -> BTreeMap<String, String> {
    common_labels(OWNER_LABEL, &node.name_any(), &[])
}

fn annotations(node: &ChiaNode) -> Option<BTreeMap<String, String>> {
    if node.spec.annotations.is_empty() {
        None
    } else {
        Some(node.spec.annotations.clone())
    }
}

fn node_service_ports(node: &ChiaNode) -> Vec<ServicePort> {
    vec![
        ServicePort {
            port: DAEMON_PORT,
            target_port: Some(IntOrString::String("daemon".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("daemon".to_string()),
            ..Default::default()
        },
        ServicePort {
            port: full_node_port(node),
            target_port: Some(IntOrString::String("peers".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("peers".to_string()),
            ..Default::default()
        },
        ServicePort {
            port: NODE_RPC_PORT,
            target_port: Some(IntOrString::String("rpc".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("rpc".to_string()),
            ..Default::default()
        },
    ]
}

/// Assemble the main Service resource for a ChiaNode.
pub fn base_service(node: &ChiaNode) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-node", node.name_any())),
            namespace: node.namespace(),
            labels: Some(node_labels(node)),
            annotations: annotations(node),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(node.spec.service_type.clone()),
            ports: Some(node_service_ports(node)),
            selector: Some(node_labels(node)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the internal Service resource for a ChiaNode.
///
/// Routes only to pods on the same cluster node via the Local internal
/// traffic policy.
pub fn internal_service(node: &ChiaNode) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-node-internal", node.name_any())),
            namespace: node.namespace(),
            labels: Some(node_labels(node)),
            annotations: annotations(node),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            internal_traffic_policy: Some("Local".to_string()),
            ports: Some(node_service_ports(node)),
            selector: Some(node_labels(node)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the headless Service resource for a ChiaNode.
///
/// Gives each StatefulSet pod a stable DNS record for direct
/// pod-to-pod peer addressing.
pub fn headless_service(node: &ChiaNode) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-node-headless", node.name_any())),
            namespace: node.namespace(),
            labels: Some(node_labels(node)),
            annotations: annotations(node),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            ports: Some(node_service_ports(node)),
            selector: Some(node_labels(node)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the chia-exporter Service resource for a ChiaNode.
pub fn metrics_service(node: &ChiaNode) -> Service {
    let labels = common_labels(
        OWNER_LABEL,
        &node.name_any(),
        &[&node.spec.labels, &node.spec.chia_exporter.service_labels],
    );

    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-node-metrics", node.name_any())),
            namespace: node.namespace(),
            labels: Some(labels),
            annotations: annotations(node),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: CHIA_EXPORTER_PORT,
                target_port: Some(IntOrString::String("metrics".to_string())),
                protocol: Some("TCP".to_string()),
                name: Some("metrics".to_string()),
                ..Default::default()
            }]),
            selector: Some(node_labels(node)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the node StatefulSet resource for a ChiaNode.
pub fn statefulset(node: &ChiaNode) -> StatefulSet {
    let name = node.name_any();
    let labels = node_labels(node);
    let (volumes, volume_claims) =
        chia_volumes_and_claims(&node.spec.chia.ca_secret_name, node.spec.storage.as_ref());

    let chia_container = Container {
        name: "chia".to_string(),
        image: Some(node.spec.chia.image.clone()),
        image_pull_policy: node.spec.image_pull_policy.clone(),
        security_context: node.spec.chia.security_context.clone(),
        env: Some(chia_node_env(node)),
        ports: Some(vec![
            ContainerPort {
                name: Some("daemon".to_string()),
                container_port: DAEMON_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("peers".to_string()),
                container_port: full_node_port(node),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("rpc".to_string()),
                container_port: NODE_RPC_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        liveness_probe: node.spec.chia.liveness_probe.clone(),
        readiness_probe: node.spec.chia.readiness_probe.clone(),
        startup_probe: node.spec.chia.startup_probe.clone(),
        resources: node.spec.chia.resources.clone(),
        volume_mounts: Some(chia_volume_mounts()),
        ..Default::default()
    };

    let exporter_container = chia_exporter_container(
        node.spec.chia_exporter.image.as_deref(),
        node.spec.chia.security_context.clone(),
        node.spec.image_pull_policy.clone(),
        node.spec.chia.resources.clone(),
    );

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(format!("{name}-node")),
            namespace: node.namespace(),
            labels: Some(labels.clone()),
            annotations: annotations(node),
            owner_references: Some(vec![owner_reference(node)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: node.spec.replicas,
            selector: LabelSelector {
                match_labels: Some(selector_labels(node)),
                ..Default::default()
            },
            service_name: format!("{name}-node-headless"),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: annotations(node),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![chia_container, exporter_container],
                    node_selector: if node.spec.node_selector.is_empty() {
                        None
                    } else {
                        Some(node.spec.node_selector.clone())
                    },
                    security_context: node.spec.pod_security_context.clone(),
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: if volume_claims.is_empty() {
                None
            } else {
                Some(volume_claims)
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment for the chia container of a full node.
///
/// The first four entries are always emitted in fixed order. testnet,
/// TZ, and log_level are appended only when configured; an unset field
/// emits nothing rather than a default value.
fn chia_node_env(node: &ChiaNode) -> Vec<EnvVar> {
    let mut env = vec![
        env_var("service", "node"),
        env_var("CHIA_ROOT", CHIA_ROOT_MOUNT_PATH),
        // no keys required for a full node
        env_var("keys", "none"),
        env_var("ca", CA_MOUNT_PATH),
    ];

    if node.spec.chia.testnet == Some(true) {
        env.push(env_var("testnet", "true"));
    }

    if let Some(timezone) = &node.spec.chia.timezone {
        env.push(env_var("TZ", timezone));
    }

    if let Some(log_level) = &node.spec.chia.log_level {
        env.push(env_var("log_level", log_level));
    }

    env
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{ChiaNodeConfigSpec, ChiaNodeSpec};

    fn test_node(name: &str) -> ChiaNode {
        ChiaNode {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: ChiaNodeSpec {
                chia: ChiaNodeConfigSpec {
                    ca_secret_name: "chia-ca".to_string(),
                    ..Default::default()
                },
                chia_exporter: Default::default(),
                storage: None,
                replicas: Some(1),
                service_type: "ClusterIP".to_string(),
                image_pull_policy: None,
                node_selector: BTreeMap::new(),
                pod_security_context: None,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
            status: None,
        }
    }

    fn env_names(env: &[EnvVar]) -> Vec<&str> {
        env.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let node = test_node("alpha");

        assert_eq!(base_service(&node), base_service(&node));
        assert_eq!(internal_service(&node), internal_service(&node));
        assert_eq!(headless_service(&node), headless_service(&node));
        assert_eq!(metrics_service(&node), metrics_service(&node));
        assert_eq!(statefulset(&node), statefulset(&node));
    }

    #[test]
    fn test_child_resource_names() {
        let node = test_node("alpha");

        assert_eq!(
            base_service(&node).metadata.name,
            Some("alpha-node".to_string())
        );
        assert_eq!(
            internal_service(&node).metadata.name,
            Some("alpha-node-internal".to_string())
        );
        assert_eq!(
            headless_service(&node).metadata.name,
            Some("alpha-node-headless".to_string())
        );
        assert_eq!(
            metrics_service(&node).metadata.name,
            Some("alpha-node-metrics".to_string())
        );
        assert_eq!(
            statefulset(&node).metadata.name,
            Some("alpha-node".to_string())
        );
    }

    #[test]
    fn test_port_policy() {
        let mut node = test_node("alpha");
        assert_eq!(full_node_port(&node), MAINNET_NODE_PORT);

        node.spec.chia.testnet = Some(false);
        assert_eq!(full_node_port(&node), MAINNET_NODE_PORT);

        node.spec.chia.testnet = Some(true);
        assert_eq!(full_node_port(&node), TESTNET_NODE_PORT);

        // daemon and rpc ports are constant regardless of testnet
        let ports = base_service(&node).spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, DAEMON_PORT);
        assert_eq!(ports[1].port, TESTNET_NODE_PORT);
        assert_eq!(ports[2].port, NODE_RPC_PORT);
    }

    #[test]
    fn test_env_mandatory_entries_only() {
        let node = test_node("alpha");
        let env = chia_node_env(&node);

        assert_eq!(env_names(&env), vec!["service", "CHIA_ROOT", "keys", "ca"]);
        assert_eq!(env[0].value.as_deref(), Some("node"));
        assert_eq!(env[1].value.as_deref(), Some("/chia-data"));
        assert_eq!(env[2].value.as_deref(), Some("none"));
        assert_eq!(env[3].value.as_deref(), Some("/chia-ca"));
    }

    #[test]
    fn test_env_testnet_appends_single_entry() {
        let mut node = test_node("alpha");
        node.spec.chia.testnet = Some(true);

        let env = chia_node_env(&node);
        assert_eq!(
            env_names(&env),
            vec!["service", "CHIA_ROOT", "keys", "ca", "testnet"]
        );
        assert_eq!(env[4].value.as_deref(), Some("true"));
    }

    #[test]
    fn test_env_testnet_false_emits_nothing() {
        let mut node = test_node("alpha");
        node.spec.chia.testnet = Some(false);

        let env = chia_node_env(&node);
        assert_eq!(env_names(&env), vec!["service", "CHIA_ROOT", "keys", "ca"]);
    }

    #[test]
    fn test_env_optional_tail_order() {
        let mut node = test_node("alpha");
        node.spec.chia.testnet = Some(true);
        node.spec.chia.timezone = Some("America/New_York".to_string());
        node.spec.chia.log_level = Some("INFO".to_string());

        let env = chia_node_env(&node);
        assert_eq!(
            env_names(&env),
            vec!["service", "CHIA_ROOT", "keys", "ca", "testnet", "TZ", "log_level"]
        );
    }

    #[test]
    fn test_headless_service_has_no_cluster_ip() {
        let node = test_node("alpha");
        let svc = headless_service(&node);

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.type_, Some("ClusterIP".to_string()));
    }

    #[test]
    fn test_internal_service_traffic_policy() {
        let node = test_node("alpha");
        let spec = internal_service(&node).spec.unwrap();

        assert_eq!(spec.internal_traffic_policy, Some("Local".to_string()));
    }

    #[test]
    fn test_metrics_service_single_port() {
        let node = test_node("alpha");
        let ports = metrics_service(&node).spec.unwrap().ports.unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, CHIA_EXPORTER_PORT);
        assert_eq!(ports[0].name, Some("metrics".to_string()));
    }

    #[test]
    fn test_metrics_service_extra_labels() {
        let mut node = test_node("alpha");
        node.spec
            .chia_exporter
            .service_labels
            .insert("prometheus".to_string(), "scrape".to_string());

        let svc = metrics_service(&node);
        let labels = svc.metadata.labels.unwrap();
        assert_eq!(labels.get("prometheus"), Some(&"scrape".to_string()));

        // extra service labels do not leak into the selector
        let selector = svc.spec.unwrap().selector.unwrap();
        assert!(!selector.contains_key("prometheus"));
    }

    #[test]
    fn test_statefulset_references_headless_service() {
        let node = test_node("alpha");
        let spec = statefulset(&node).spec.unwrap();

        assert_eq!(spec.service_name, "alpha-node-headless".to_string());
        assert_eq!(spec.replicas, Some(1));
    }

    #[test]
    fn test_statefulset_containers() {
        let node = test_node("alpha");
        let template = statefulset(&node).spec.unwrap().template;
        let containers = template.spec.unwrap().containers;

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "chia");
        assert_eq!(containers[1].name, "chia-exporter");

        let ports = containers[0].ports.as_ref().unwrap();
        assert_eq!(ports[1].container_port, MAINNET_NODE_PORT);
    }

    #[test]
    fn test_statefulset_empty_dir_fallback() {
        let node = test_node("alpha");
        let stateful = statefulset(&node);
        let spec = stateful.spec.unwrap();

        assert!(spec.volume_claim_templates.is_none());
        let volumes = spec.template.spec.unwrap().volumes.unwrap();
        let chiaroot = volumes.iter().find(|v| v.name == "chiaroot").unwrap();
        assert!(chiaroot.empty_dir.is_some());
    }

    #[test]
    fn test_owner_reference_on_every_child() {
        let node = test_node("alpha");

        for owner_refs in [
            base_service(&node).metadata.owner_references,
            internal_service(&node).metadata.owner_references,
            headless_service(&node).metadata.owner_references,
            metrics_service(&node).metadata.owner_references,
            statefulset(&node).metadata.owner_references,
        ] {
            let owner_refs = owner_refs.unwrap();
            assert_eq!(owner_refs.len(), 1);
            assert_eq!(owner_refs[0].api_version, "k8s.chia.net/v1");
            assert_eq!(owner_refs[0].kind, "ChiaNode");
            assert_eq!(owner_refs[0].name, "alpha");
            assert_eq!(owner_refs[0].uid, "test-uid");
            assert_eq!(owner_refs[0].controller, Some(true));
        }
    }

    #[test]
    fn test_user_labels_merged_but_identity_wins() {
        let mut node = test_node("alpha");
        node.spec
            .labels
            .insert("team".to_string(), "farming".to_string());
        node.spec.labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "not-the-operator".to_string(),
        );

        let labels = base_service(&node).metadata.labels.unwrap();
        assert_eq!(labels.get("team"), Some(&"farming".to_string()));
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"chia-operator".to_string())
        );
    }
}
