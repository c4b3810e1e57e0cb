//! Child resource synthesis for ChiaHarvester.
//!
//! A harvester gets a smaller child set than a full node: the base
//! Service, a headless Service governing the StatefulSet, and the
//! metrics Service. Harvesters dial out to their farmer peer, so there
//! is no internal-traffic flavor.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::ChiaHarvester;
use crate::resources::common::{
    chia_exporter_container, chia_volume_mounts, chia_volumes_and_claims, common_labels, env_var,
    owner_reference, CA_MOUNT_PATH, CHIA_EXPORTER_PORT, CHIA_ROOT_MOUNT_PATH, DAEMON_PORT,
};

/// Peer port harvesters listen on.
pub const HARVESTER_PORT: i32 = 8448;

/// Port for the harvester RPC.
pub const HARVESTER_RPC_PORT: i32 = 8560;

/// Farmer peer port harvesters dial. The spec only carries the
/// farmer's address; its port is inferred.
pub const FARMER_PORT: i32 = 8447;

/// Label key binding child resources to their owning ChiaHarvester.
const OWNER_LABEL: &str = "chiaharvester-owner";

fn harvester_labels(harvester: &ChiaHarvester) -> BTreeMap<String, String> {
    common_labels(
        OWNER_LABEL,
        &harvester.name_any(),
        &[&harvester.spec.labels],
    )
}

fn selector_labels(harvester: &ChiaHarvester) -> BTreeMap<String, String> {
    common_labels(OWNER_LABEL, &harvester.name_any(), &[])
}

fn annotations(harvester: &ChiaHarvester) -> Option<BTreeMap<String, String>> {
    if harvester.spec.annotations.is_empty() {
        None
    } else {
        Some(harvester.spec.annotations.clone())
    }
}

fn harvester_service_ports() -> Vec<ServicePort> {
    vec![
        ServicePort {
            port: DAEMON_PORT,
            target_port: Some(IntOrString::String("daemon".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("daemon".to_string()),
            ..Default::default()
        },
        ServicePort {
            port: HARVESTER_PORT,
            target_port: Some(IntOrString::String("peers".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("peers".to_string()),
            ..Default::default()
        },
        ServicePort {
            port: HARVESTER_RPC_PORT,
            target_port: Some(IntOrString::String("rpc".to_string())),
            protocol: Some("TCP".to_string()),
            name: Some("rpc".to_string()),
            ..Default::default()
        },
    ]
}

/// Assemble the main Service resource for a ChiaHarvester.
pub fn base_service(harvester: &ChiaHarvester) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-harvester", harvester.name_any())),
            namespace: harvester.namespace(),
            labels: Some(harvester_labels(harvester)),
            annotations: annotations(harvester),
            owner_references: Some(vec![owner_reference(harvester)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(harvester.spec.service_type.clone()),
            ports: Some(harvester_service_ports()),
            selector: Some(harvester_labels(harvester)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the headless Service resource for a ChiaHarvester.
pub fn headless_service(harvester: &ChiaHarvester) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-harvester-headless", harvester.name_any())),
            namespace: harvester.namespace(),
            labels: Some(harvester_labels(harvester)),
            annotations: annotations(harvester),
            owner_references: Some(vec![owner_reference(harvester)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            ports: Some(harvester_service_ports()),
            selector: Some(harvester_labels(harvester)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the chia-exporter Service resource for a ChiaHarvester.
pub fn metrics_service(harvester: &ChiaHarvester) -> Service {
    let labels = common_labels(
        OWNER_LABEL,
        &harvester.name_any(),
        &[
            &harvester.spec.labels,
            &harvester.spec.chia_exporter.service_labels,
        ],
    );

    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-harvester-metrics", harvester.name_any())),
            namespace: harvester.namespace(),
            labels: Some(labels),
            annotations: annotations(harvester),
            owner_references: Some(vec![owner_reference(harvester)]),
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
            selector: Some(harvester_labels(harvester)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Assemble the harvester StatefulSet resource for a ChiaHarvester.
///
/// Harvesters run as a single replica; plots attached to one harvester
/// must not be served twice.
pub fn statefulset(harvester: &ChiaHarvester) -> StatefulSet {
    let name = harvester.name_any();
    let labels = harvester_labels(harvester);
    let (volumes, volume_claims) = chia_volumes_and_claims(
        &harvester.spec.chia.ca_secret_name,
        harvester.spec.storage.as_ref(),
    );

    let chia_container = Container {
        name: "chia".to_string(),
        image: Some(harvester.spec.chia.image.clone()),
        image_pull_policy: harvester.spec.image_pull_policy.clone(),
        security_context: harvester.spec.chia.security_context.clone(),
        env: Some(chia_harvester_env(harvester)),
        ports: Some(vec![
            ContainerPort {
                name: Some("daemon".to_string()),
                container_port: DAEMON_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("peers".to_string()),
                container_port: HARVESTER_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("rpc".to_string()),
                container_port: HARVESTER_RPC_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        liveness_probe: harvester.spec.chia.liveness_probe.clone(),
        readiness_probe: harvester.spec.chia.readiness_probe.clone(),
        startup_probe: harvester.spec.chia.startup_probe.clone(),
        resources: harvester.spec.chia.resources.clone(),
        volume_mounts: Some(chia_volume_mounts()),
        ..Default::default()
    };

    let exporter_container = chia_exporter_container(
        harvester.spec.chia_exporter.image.as_deref(),
        harvester.spec.chia.security_context.clone(),
        harvester.spec.image_pull_policy.clone(),
        harvester.spec.chia.resources.clone(),
    );

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(format!("{name}-harvester")),
            namespace: harvester.namespace(),
            labels: Some(labels.clone()),
            annotations: annotations(harvester),
            owner_references: Some(vec![owner_reference(harvester)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(harvester)),
                ..Default::default()
            },
            service_name: format!("{name}-harvester-headless"),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: annotations(harvester),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![chia_container, exporter_container],
                    node_selector: if harvester.spec.node_selector.is_empty() {
                        None
                    } else {
                        Some(harvester.spec.node_selector.clone())
                    },
                    security_context: harvester.spec.pod_security_context.clone(),
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

/// Environment for the chia container of a harvester.
///
/// Mandatory entries in fixed order, including the farmer peer address
/// and its inferred port; testnet, TZ, and log_level are appended only
/// when configured.
fn chia_harvester_env(harvester: &ChiaHarvester) -> Vec<EnvVar> {
    let mut env = vec![
        env_var("service", "harvester"),
        env_var("CHIA_ROOT", CHIA_ROOT_MOUNT_PATH),
        // harvesters hold no wallet keys, only the farmer's CA
        env_var("keys", "none"),
        env_var("ca", CA_MOUNT_PATH),
        env_var("farmer_address", &harvester.spec.chia.farmer_address),
        env_var("farmer_port", &FARMER_PORT.to_string()),
    ];

    if harvester.spec.chia.testnet == Some(true) {
        env.push(env_var("testnet", "true"));
    }

    if let Some(timezone) = &harvester.spec.chia.timezone {
        env.push(env_var("TZ", timezone));
    }

    if let Some(log_level) = &harvester.spec.chia.log_level {
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
    use crate::crd::{ChiaHarvesterConfigSpec, ChiaHarvesterSpec};

    fn test_harvester(name: &str) -> ChiaHarvester {
        ChiaHarvester {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: ChiaHarvesterSpec {
                chia: ChiaHarvesterConfigSpec {
                    ca_secret_name: "chia-ca".to_string(),
                    farmer_address: "farmer.chia.svc.cluster.local".to_string(),
                    ..Default::default()
                },
                chia_exporter: Default::default(),
                storage: None,
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

    #[test]
    fn test_child_resource_names() {
        let harvester = test_harvester("plots-1");

        assert_eq!(
            base_service(&harvester).metadata.name,
            Some("plots-1-harvester".to_string())
        );
        assert_eq!(
            headless_service(&harvester).metadata.name,
            Some("plots-1-harvester-headless".to_string())
        );
        assert_eq!(
            metrics_service(&harvester).metadata.name,
            Some("plots-1-harvester-metrics".to_string())
        );
        assert_eq!(
            statefulset(&harvester).metadata.name,
            Some("plots-1-harvester".to_string())
        );
    }

    #[test]
    fn test_env_mandatory_entries() {
        let harvester = test_harvester("plots-1");
        let env = chia_harvester_env(&harvester);

        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["service", "CHIA_ROOT", "keys", "ca", "farmer_address", "farmer_port"]
        );
        assert_eq!(env[0].value.as_deref(), Some("harvester"));
        assert_eq!(
            env[4].value.as_deref(),
            Some("farmer.chia.svc.cluster.local")
        );
        assert_eq!(env[5].value.as_deref(), Some("8447"));
    }

    #[test]
    fn test_env_conditional_tail() {
        let mut harvester = test_harvester("plots-1");
        harvester.spec.chia.testnet = Some(true);
        harvester.spec.chia.log_level = Some("WARNING".to_string());

        let env = chia_harvester_env(&harvester);
        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "service",
                "CHIA_ROOT",
                "keys",
                "ca",
                "farmer_address",
                "farmer_port",
                "testnet",
                "log_level"
            ]
        );
    }

    #[test]
    fn test_harvester_ports_ignore_testnet() {
        let mut harvester = test_harvester("plots-1");
        harvester.spec.chia.testnet = Some(true);

        let ports = base_service(&harvester).spec.unwrap().ports.unwrap();
        assert_eq!(ports[1].port, HARVESTER_PORT);
        assert_eq!(ports[2].port, HARVESTER_RPC_PORT);
    }

    #[test]
    fn test_statefulset_single_replica() {
        let harvester = test_harvester("plots-1");
        let spec = statefulset(&harvester).spec.unwrap();

        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name, "plots-1-harvester-headless".to_string());
    }

    #[test]
    fn test_owner_reference_kind() {
        let harvester = test_harvester("plots-1");
        let owner_refs = statefulset(&harvester).metadata.owner_references.unwrap();

        assert_eq!(owner_refs.len(), 1);
        assert_eq!(owner_refs[0].kind, "ChiaHarvester");
        assert_eq!(owner_refs[0].controller, Some(true));
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let harvester = test_harvester("plots-1");

        assert_eq!(base_service(&harvester), base_service(&harvester));
        assert_eq!(statefulset(&harvester), statefulset(&harvester));
    }
}
