//! Reconciliation loop for ChiaHarvester.
//!
//! Mirrors the ChiaNode pass with the harvester's smaller child set:
//! base Service, headless Service, metrics Service, StatefulSet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{runtime::controller::Action, Api, ResourceExt};
use tracing::{debug, warn};

use crate::{
    controller::{context::Context, convergence::converge, error::Error, status::update_ready},
    crd::ChiaHarvester,
    resources::harvester,
};

/// Requeue interval after a successful pass.
const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile a ChiaHarvester
pub async fn reconcile(harvester: Arc<ChiaHarvester>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = harvester.name_any();
    let namespace = harvester
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let owner = format!("ChiaHarvester {namespace}/{name}");

    debug!(name = %name, namespace = %namespace, "Reconciling ChiaHarvester");

    if let Err(error) = converge_children(&harvester, &ctx, &namespace, &owner).await {
        ctx.publish_warning_event(
            harvester.as_ref(),
            "ConvergenceFailed",
            "Reconciling",
            Some(error.to_string()),
        )
        .await;
        return Err(error);
    }

    let became_ready = !harvester
        .status
        .as_ref()
        .is_some_and(|status| status.ready);
    let api: Api<ChiaHarvester> = Api::namespaced(ctx.client.clone(), &namespace);
    update_ready(&api, &name, &owner, true).await?;

    if became_ready {
        ctx.publish_normal_event(
            harvester.as_ref(),
            "Ready",
            "Reconciling",
            Some("All child resources converged".to_string()),
        )
        .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile("ChiaHarvester", &namespace, &name, duration);
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Converge the full child set in a fixed order.
async fn converge_children(
    harvester: &ChiaHarvester,
    ctx: &Context,
    namespace: &str,
    owner: &str,
) -> Result<(), Error> {
    converge(
        &ctx.client,
        namespace,
        owner,
        &harvester::base_service(harvester),
    )
    .await?;
    converge(
        &ctx.client,
        namespace,
        owner,
        &harvester::headless_service(harvester),
    )
    .await?;
    converge(
        &ctx.client,
        namespace,
        owner,
        &harvester::metrics_service(harvester),
    )
    .await?;
    converge(
        &ctx.client,
        namespace,
        owner,
        &harvester::statefulset(harvester),
    )
    .await?;
    Ok(())
}

/// Error policy for the ChiaHarvester controller
pub fn error_policy(harvester: Arc<ChiaHarvester>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = harvester.name_any();
    let namespace = harvester
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error("ChiaHarvester", &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "ChiaHarvester no longer exists (likely deleted)");
        return Action::await_change();
    }

    warn!(name = %name, error = %error, "Reconciliation failed, will retry");
    Action::requeue(error.requeue_after())
}
