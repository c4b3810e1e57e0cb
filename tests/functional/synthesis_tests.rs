//! End-to-end synthesis scenarios.
//!
//! Each test takes one spec object through the full child set the
//! reconciler would converge, and checks the cross-resource contracts:
//! deterministic names, stable selectors, port policy, volume
//! precedence, and owner references.

use chia_operator::resources::{harvester, node};

use crate::fixtures::{ChiaHarvesterBuilder, ChiaNodeBuilder};

#[test]
fn test_testnet_node_without_storage() {
    let node = ChiaNodeBuilder::new("alpha").testnet(true).build();

    let headless = node::headless_service(&node);
    assert_eq!(headless.metadata.name, Some("alpha-node-headless".to_string()));
    assert_eq!(
        headless.spec.as_ref().unwrap().cluster_ip,
        Some("None".to_string())
    );

    let stateful = node::statefulset(&node);
    assert_eq!(stateful.metadata.name, Some("alpha-node".to_string()));

    let spec = stateful.spec.unwrap();
    let containers = spec.template.spec.as_ref().unwrap().containers.clone();
    let peer_port = containers[0]
        .ports
        .as_ref()
        .unwrap()
        .iter()
        .find(|p| p.name.as_deref() == Some("peers"))
        .unwrap()
        .container_port;
    assert_eq!(peer_port, node::TESTNET_NODE_PORT);

    let volumes = spec.template.spec.unwrap().volumes.unwrap();
    let chiaroot = volumes.iter().find(|v| v.name == "chiaroot").unwrap();
    assert!(chiaroot.empty_dir.is_some());
    assert!(spec.volume_claim_templates.is_none());
}

#[test]
fn test_mainnet_node_with_claim_storage() {
    let node = ChiaNodeBuilder::new("mainnet")
        .claim_storage("fast", "300Gi")
        .host_path_storage("/mnt/chia")
        .build();

    let stateful = node::statefulset(&node);
    let spec = stateful.spec.unwrap();

    // claim wins over host path
    let claims = spec.volume_claim_templates.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].metadata.name, Some("chiaroot".to_string()));

    let volumes = spec.template.spec.unwrap().volumes.unwrap();
    assert!(volumes.iter().all(|v| v.name != "chiaroot"));

    // mainnet peer port on every service flavor
    for svc in [
        node::base_service(&node),
        node::internal_service(&node),
        node::headless_service(&node),
    ] {
        let ports = svc.spec.unwrap().ports.unwrap();
        let peers = ports
            .iter()
            .find(|p| p.name.as_deref() == Some("peers"))
            .unwrap();
        assert_eq!(peers.port, node::MAINNET_NODE_PORT);
    }
}

#[test]
fn test_node_child_set_shares_selector_and_owner() {
    let node = ChiaNodeBuilder::new("alpha")
        .label("team", "farming")
        .build();

    let stateful = node::statefulset(&node);
    let pod_labels = stateful
        .spec
        .as_ref()
        .unwrap()
        .template
        .metadata
        .as_ref()
        .unwrap()
        .labels
        .clone()
        .unwrap();

    for svc in [
        node::base_service(&node),
        node::internal_service(&node),
        node::headless_service(&node),
        node::metrics_service(&node),
    ] {
        let selector = svc.spec.as_ref().unwrap().selector.clone().unwrap();
        assert_eq!(selector, pod_labels);

        let owner_refs = svc.metadata.owner_references.unwrap();
        assert_eq!(owner_refs.len(), 1);
        assert_eq!(owner_refs[0].kind, "ChiaNode");
        assert_eq!(owner_refs[0].name, "alpha");
        assert_eq!(owner_refs[0].controller, Some(true));
    }

    // the statefulset match labels are a subset of the pod labels
    let match_labels = stateful
        .spec
        .unwrap()
        .selector
        .match_labels
        .unwrap();
    for (key, value) in &match_labels {
        assert_eq!(pod_labels.get(key), Some(value));
    }
    assert!(!match_labels.contains_key("team"));
}

#[test]
fn test_node_synthesis_is_deterministic() {
    let build = || {
        ChiaNodeBuilder::new("alpha")
            .testnet(true)
            .timezone("UTC")
            .claim_storage("fast", "300Gi")
            .build()
    };

    assert_eq!(node::statefulset(&build()), node::statefulset(&build()));
    assert_eq!(node::base_service(&build()), node::base_service(&build()));
    assert_eq!(
        node::metrics_service(&build()),
        node::metrics_service(&build())
    );
}

#[test]
fn test_harvester_child_set() {
    let harvester = ChiaHarvesterBuilder::new("plots-1")
        .namespace("farm")
        .farmer_address("farmer.farm.svc.cluster.local")
        .build();

    let base = harvester::base_service(&harvester);
    assert_eq!(base.metadata.name, Some("plots-1-harvester".to_string()));
    assert_eq!(base.metadata.namespace, Some("farm".to_string()));

    let stateful = harvester::statefulset(&harvester);
    let spec = stateful.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    assert_eq!(spec.service_name, "plots-1-harvester-headless".to_string());

    let containers = spec.template.spec.unwrap().containers;
    let env = containers[0].env.as_ref().unwrap();
    let farmer_address = env
        .iter()
        .find(|e| e.name == "farmer_address")
        .unwrap()
        .value
        .as_deref();
    assert_eq!(farmer_address, Some("farmer.farm.svc.cluster.local"));

    let metrics = harvester::metrics_service(&harvester);
    let ports = metrics.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].port, 9914);
}
