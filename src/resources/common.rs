//! Common resource synthesis utilities.
//!
//! Label merge policy, owner references, the chia-exporter sidecar
//! container, and CHIA_ROOT volume selection shared by every component
//! synthesizer. All functions here are pure: same spec in, same
//! manifest out.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, HostPathVolumeSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Probe, ResourceRequirements,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::StorageConfig;

/// Port for the Chia daemon.
pub const DAEMON_PORT: i32 = 55400;

/// Port chia-exporter instances serve metrics on.
pub const CHIA_EXPORTER_PORT: i32 = 9914;

/// Default image name and tag of the chia-exporter image.
pub const DEFAULT_CHIA_EXPORTER_IMAGE: &str = "ghcr.io/chia-network/chia-exporter:latest";

/// Mount path of the CHIA_ROOT volume.
pub const CHIA_ROOT_MOUNT_PATH: &str = "/chia-data";

/// Mount path of the CA secret volume.
pub const CA_MOUNT_PATH: &str = "/chia-ca";

/// Merge labels for a component's child resources.
///
/// User-supplied label maps go in first; the identity keys are applied
/// on top so user labels can never clobber them. The result doubles as
/// the selector of every Service and the workload's pod template
/// labels, and must stay stable across reconciliations.
pub fn common_labels(
    owner_key: &str,
    instance: &str,
    additions: &[&BTreeMap<String, String>],
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for addition in additions {
        for (key, value) in addition.iter() {
            labels.insert(key.clone(), value.clone());
        }
    }
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        instance.to_string(),
    );
    labels.insert(owner_key.to_string(), instance.to_string());
    labels.insert("app.kubernetes.io/name".to_string(), "chia".to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "chia-operator".to_string(),
    );
    labels
}

/// Create the owner reference binding a child resource to its owning
/// spec object.
///
/// The cluster's garbage collector cascades deletion of children
/// through this reference; the operator never deletes children itself.
pub fn owner_reference<K>(resource: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        ..Default::default()
    }
}

/// Plain-value environment variable.
pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Assemble the chia-exporter sidecar container.
///
/// The sidecar contract is fixed: a CHIA_ROOT environment variable, one
/// metrics port, and HTTP health checks under /healthz on that port.
pub fn chia_exporter_container(
    image: Option<&str>,
    security_context: Option<SecurityContext>,
    image_pull_policy: Option<String>,
    resources: Option<ResourceRequirements>,
) -> Container {
    let healthz = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/healthz".to_string()),
            port: IntOrString::Int(CHIA_EXPORTER_PORT),
            ..Default::default()
        }),
        ..Default::default()
    };

    Container {
        name: "chia-exporter".to_string(),
        image: Some(image.unwrap_or(DEFAULT_CHIA_EXPORTER_IMAGE).to_string()),
        image_pull_policy,
        security_context,
        env: Some(vec![env_var("CHIA_ROOT", CHIA_ROOT_MOUNT_PATH)]),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: CHIA_EXPORTER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        liveness_probe: Some(healthz.clone()),
        readiness_probe: Some(healthz.clone()),
        startup_probe: Some(Probe {
            failure_threshold: Some(30),
            period_seconds: Some(10),
            ..healthz
        }),
        resources,
        volume_mounts: Some(vec![VolumeMount {
            name: "chiaroot".to_string(),
            mount_path: CHIA_ROOT_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Select the pod volumes and claim templates for a Chia component.
///
/// The CA secret volume is always present. For CHIA_ROOT the claim
/// template is respected first when both it and a host path are
/// specified; with neither, an emptyDir keeps the `chiaroot` mount
/// available for the exporter sidecar.
pub fn chia_volumes_and_claims(
    ca_secret_name: &str,
    storage: Option<&StorageConfig>,
) -> (Vec<Volume>, Vec<PersistentVolumeClaim>) {
    let mut volumes = vec![Volume {
        name: "secret-ca".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(ca_secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut claims = Vec::new();

    let chia_root = storage.and_then(|storage| storage.chia_root.as_ref());
    match (
        chia_root.and_then(|root| root.persistent_volume_claim.as_ref()),
        chia_root.and_then(|root| root.host_path_volume.as_ref()),
    ) {
        (Some(claim), _) => {
            claims.push(PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("chiaroot".to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: Some(claim.storage_class.clone()),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some({
                            let mut requests = BTreeMap::new();
                            requests.insert(
                                "storage".to_string(),
                                Quantity(claim.resource_request.clone()),
                            );
                            requests
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        (None, Some(host_path)) => {
            volumes.push(Volume {
                name: "chiaroot".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: host_path.path.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        (None, None) => {
            volumes.push(Volume {
                name: "chiaroot".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
        }
    }

    (volumes, claims)
}

/// Volume mounts for the chia container.
pub fn chia_volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: "secret-ca".to_string(),
            mount_path: CA_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "chiaroot".to_string(),
            mount_path: CHIA_ROOT_MOUNT_PATH.to_string(),
            ..Default::default()
        },
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{ChiaRootConfig, HostPathVolumeConfig, PersistentVolumeClaimConfig};

    fn storage_with(
        claim: Option<PersistentVolumeClaimConfig>,
        host_path: Option<HostPathVolumeConfig>,
    ) -> StorageConfig {
        StorageConfig {
            chia_root: Some(ChiaRootConfig {
                persistent_volume_claim: claim,
                host_path_volume: host_path,
            }),
        }
    }

    #[test]
    fn test_identity_labels_cannot_be_clobbered() {
        let mut user_labels = BTreeMap::new();
        user_labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "someone-else".to_string(),
        );
        user_labels.insert("team".to_string(), "farming".to_string());

        let labels = common_labels("chianode-owner", "alpha", &[&user_labels]);

        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"chia-operator".to_string())
        );
        assert_eq!(labels.get("app.kubernetes.io/name"), Some(&"chia".to_string()));
        assert_eq!(
            labels.get("app.kubernetes.io/instance"),
            Some(&"alpha".to_string())
        );
        assert_eq!(labels.get("chianode-owner"), Some(&"alpha".to_string()));
        assert_eq!(labels.get("team"), Some(&"farming".to_string()));
    }

    #[test]
    fn test_claim_takes_precedence_over_host_path() {
        let storage = storage_with(
            Some(PersistentVolumeClaimConfig {
                storage_class: "fast".to_string(),
                resource_request: "300Gi".to_string(),
            }),
            Some(HostPathVolumeConfig {
                path: "/mnt/chia".to_string(),
            }),
        );

        let (volumes, claims) = chia_volumes_and_claims("chia-ca", Some(&storage));

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name, Some("chiaroot".to_string()));
        // only the CA secret volume remains, no host path volume
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "secret-ca");
    }

    #[test]
    fn test_host_path_volume() {
        let storage = storage_with(
            None,
            Some(HostPathVolumeConfig {
                path: "/mnt/chia".to_string(),
            }),
        );

        let (volumes, claims) = chia_volumes_and_claims("chia-ca", Some(&storage));

        assert!(claims.is_empty());
        assert_eq!(volumes.len(), 2);
        let chiaroot = volumes.iter().find(|v| v.name == "chiaroot").unwrap();
        assert_eq!(
            chiaroot.host_path.as_ref().unwrap().path,
            "/mnt/chia".to_string()
        );
    }

    #[test]
    fn test_empty_dir_fallback_without_storage() {
        let (volumes, claims) = chia_volumes_and_claims("chia-ca", None);

        assert!(claims.is_empty());
        let chiaroot: Vec<_> = volumes.iter().filter(|v| v.name == "chiaroot").collect();
        assert_eq!(chiaroot.len(), 1);
        assert!(chiaroot[0].empty_dir.is_some());
    }

    #[test]
    fn test_exporter_image_default_and_override() {
        let default_container = chia_exporter_container(None, None, None, None);
        assert_eq!(
            default_container.image,
            Some(DEFAULT_CHIA_EXPORTER_IMAGE.to_string())
        );

        let custom = chia_exporter_container(Some("ghcr.io/example/exporter:1.2"), None, None, None);
        assert_eq!(
            custom.image,
            Some("ghcr.io/example/exporter:1.2".to_string())
        );
    }

    #[test]
    fn test_exporter_probes_target_metrics_port() {
        let container = chia_exporter_container(None, None, None, None);

        for probe in [
            container.liveness_probe.as_ref().unwrap(),
            container.readiness_probe.as_ref().unwrap(),
            container.startup_probe.as_ref().unwrap(),
        ] {
            let http_get = probe.http_get.as_ref().unwrap();
            assert_eq!(http_get.path.as_deref(), Some("/healthz"));
            assert_eq!(http_get.port, IntOrString::Int(CHIA_EXPORTER_PORT));
        }
        assert_eq!(
            container.startup_probe.as_ref().unwrap().failure_threshold,
            Some(30)
        );
    }

    #[test]
    fn test_chia_volume_mounts() {
        let mounts = chia_volume_mounts();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].name, "secret-ca");
        assert_eq!(mounts[0].mount_path, CA_MOUNT_PATH);
        assert_eq!(mounts[1].name, "chiaroot");
        assert_eq!(mounts[1].mount_path, CHIA_ROOT_MOUNT_PATH);
    }
}
