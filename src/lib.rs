//! chia-operator library crate
//!
//! This module exports the controllers, CRD definitions, and resource
//! synthesizers for managing Chia node components on Kubernetes.

pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{metadata_watcher, predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, harvester_reconciler, node_reconciler};
use crd::{ChiaHarvester, ChiaNode};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// This ensures consistent behavior across all controllers:
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run both component controllers (cluster-wide).
///
/// This is the main entry point that watches ChiaNode and ChiaHarvester
/// resources and reconciles them. It can be called from main.rs or
/// spawned as a background task during integration tests.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>) {
    run_controller_scoped(client, health_state, None).await
}

/// Run both component controllers with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    futures::join!(
        run_node_controller(client.clone(), health_state.clone(), namespace),
        run_harvester_controller(client, health_state, namespace),
    );
}

/// Run the ChiaNode controller.
async fn run_node_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        "Starting controller for ChiaNode resources (scope: {})",
        scope_msg
    );

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    // Set up APIs for the controller (namespaced or cluster-wide)
    let nodes: Api<ChiaNode> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);

    // Use consistent watcher configuration across all controllers
    let watcher_config = default_watcher_config();

    // Create filtered stream with standard optimizations (reflector, backoff, generation predicate)
    let (reader, node_stream) = create_filtered_stream(nodes, watcher_config.clone());

    // Memory optimization: Services are watched via metadata_watcher since
    // we only need to know they exist/changed. Keep the full watcher for
    // StatefulSet, whose shape drives readiness.
    Controller::for_stream(node_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config).touched_objects())
        .run(node_reconciler::reconcile, node_reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled ChiaNode: {}", obj.name);
                }
                Err(e) => log_controller_error("ChiaNode", &e),
            }
        })
        .await;

    // This should never complete in normal operation
    error!("ChiaNode controller stream ended unexpectedly");
}

/// Run the ChiaHarvester controller.
async fn run_harvester_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        "Starting controller for ChiaHarvester resources (scope: {})",
        scope_msg
    );

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    let harvesters: Api<ChiaHarvester> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();

    let (reader, harvester_stream) = create_filtered_stream(harvesters, watcher_config.clone());

    Controller::for_stream(harvester_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config).touched_objects())
        .run(
            harvester_reconciler::reconcile,
            harvester_reconciler::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled ChiaHarvester: {}", obj.name);
                }
                Err(e) => log_controller_error("ChiaHarvester", &e),
            }
        })
        .await;

    error!("ChiaHarvester controller stream ended unexpectedly");
}

/// Log a controller stream error at the appropriate level.
///
/// ObjectNotFound/NotFound errors are expected after deletion when
/// related watch events trigger reconciliation for a deleted object.
/// Log these at debug level instead of error.
fn log_controller_error<E>(
    kind: &str,
    error: &kube::runtime::controller::Error<controller::error::Error, E>,
) where
    E: std::error::Error + 'static,
{
    let is_not_found = match error {
        kube::runtime::controller::Error::ObjectNotFound(_) => true,
        kube::runtime::controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
        _ => false,
    };
    if is_not_found {
        debug!("{} no longer exists (likely deleted): {:?}", kind, error);
    } else {
        error!("{} reconciliation error: {:?}", kind, error);
    }
}
