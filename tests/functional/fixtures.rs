//! Test fixtures and builder patterns for chia-operator CRDs.

use std::collections::BTreeMap;

use chia_operator::crd::{
    ChiaHarvester, ChiaHarvesterConfigSpec, ChiaHarvesterSpec, ChiaNode, ChiaNodeConfigSpec,
    ChiaNodeSpec, ChiaRootConfig, HostPathVolumeConfig, PersistentVolumeClaimConfig, StorageConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Builder for creating ChiaNode test fixtures.
///
/// # Example
/// ```
/// let node = ChiaNodeBuilder::new("alpha")
///     .namespace("testnet")
///     .testnet(true)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct ChiaNodeBuilder {
    name: String,
    namespace: String,
    uid: String,
    testnet: Option<bool>,
    timezone: Option<String>,
    log_level: Option<String>,
    storage: Option<StorageConfig>,
    replicas: Option<i32>,
    labels: BTreeMap<String, String>,
}

impl ChiaNodeBuilder {
    /// Create a new builder with the given resource name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            uid: "test-uid".to_string(),
            testnet: None,
            timezone: None,
            log_level: None,
            storage: None,
            replicas: Some(1),
            labels: BTreeMap::new(),
        }
    }

    /// Set the namespace for the resource.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the testnet flag.
    pub fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = Some(testnet);
        self
    }

    /// Set the container timezone.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the chia log level.
    pub fn log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = Some(log_level.into());
        self
    }

    /// Configure a PersistentVolumeClaim template for CHIA_ROOT.
    pub fn claim_storage(
        mut self,
        storage_class: impl Into<String>,
        request: impl Into<String>,
    ) -> Self {
        let chia_root = self.chia_root_mut();
        chia_root.persistent_volume_claim = Some(PersistentVolumeClaimConfig {
            storage_class: storage_class.into(),
            resource_request: request.into(),
        });
        self
    }

    /// Configure a host path volume for CHIA_ROOT.
    pub fn host_path_storage(mut self, path: impl Into<String>) -> Self {
        let chia_root = self.chia_root_mut();
        chia_root.host_path_volume = Some(HostPathVolumeConfig { path: path.into() });
        self
    }

    /// Set the replica count.
    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// Add a user-supplied label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    fn chia_root_mut(&mut self) -> &mut ChiaRootConfig {
        self.storage
            .get_or_insert_with(StorageConfig::default)
            .chia_root
            .get_or_insert_with(ChiaRootConfig::default)
    }

    /// Build the ChiaNode resource.
    pub fn build(self) -> ChiaNode {
        ChiaNode {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: Some(self.uid),
                ..Default::default()
            },
            spec: ChiaNodeSpec {
                chia: ChiaNodeConfigSpec {
                    ca_secret_name: "chia-ca".to_string(),
                    testnet: self.testnet,
                    timezone: self.timezone,
                    log_level: self.log_level,
                    ..Default::default()
                },
                chia_exporter: Default::default(),
                storage: self.storage,
                replicas: self.replicas,
                service_type: "ClusterIP".to_string(),
                image_pull_policy: None,
                node_selector: BTreeMap::new(),
                pod_security_context: None,
                labels: self.labels,
                annotations: BTreeMap::new(),
            },
            status: None,
        }
    }
}

/// Builder for creating ChiaHarvester test fixtures.
#[derive(Clone, Debug)]
pub struct ChiaHarvesterBuilder {
    name: String,
    namespace: String,
    farmer_address: String,
}

impl ChiaHarvesterBuilder {
    /// Create a new builder with the given resource name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            farmer_address: "farmer.chia.svc.cluster.local".to_string(),
        }
    }

    /// Set the namespace for the resource.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the farmer peer address.
    pub fn farmer_address(mut self, address: impl Into<String>) -> Self {
        self.farmer_address = address.into();
        self
    }

    /// Build the ChiaHarvester resource.
    pub fn build(self) -> ChiaHarvester {
        ChiaHarvester {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: ChiaHarvesterSpec {
                chia: ChiaHarvesterConfigSpec {
                    ca_secret_name: "chia-ca".to_string(),
                    farmer_address: self.farmer_address,
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
}
