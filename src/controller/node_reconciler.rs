//! Reconciliation loop for ChiaNode.
//!
//! One pass: synthesize every child manifest from the spec, converge
//! each against the cluster in a fixed order, then mark the spec
//! ready. Any convergence failure aborts the pass immediately and the
//! runtime schedules a retry; partial convergence is safe because
//! synthesis and apply are both idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{runtime::controller::Action, Api, ResourceExt};
use tracing::{debug, warn};

use crate::{
    controller::{context::Context, convergence::converge, error::Error, status::update_ready},
    crd::ChiaNode,
    resources::node,
};

/// Requeue interval after a successful pass.
const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile a ChiaNode
pub async fn reconcile(node: Arc<ChiaNode>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = node.name_any();
    let namespace = node.namespace().unwrap_or_else(|| "default".to_string());
    let owner = format!("ChiaNode {namespace}/{name}");

    debug!(name = %name, namespace = %namespace, "Reconciling ChiaNode");

    if let Err(error) = converge_children(&node, &ctx, &namespace, &owner).await {
        ctx.publish_warning_event(
            node.as_ref(),
            "ConvergenceFailed",
            "Reconciling",
            Some(error.to_string()),
        )
        .await;
        return Err(error);
    }

    let became_ready = !node.status.as_ref().is_some_and(|status| status.ready);
    let api: Api<ChiaNode> = Api::namespaced(ctx.client.clone(), &namespace);
    update_ready(&api, &name, &owner, true).await?;

    if became_ready {
        ctx.publish_normal_event(
            node.as_ref(),
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
            .record_reconcile("ChiaNode", &namespace, &name, duration);
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Converge the full child set in a fixed order.
async fn converge_children(
    node: &ChiaNode,
    ctx: &Context,
    namespace: &str,
    owner: &str,
) -> Result<(), Error> {
    converge(&ctx.client, namespace, owner, &node::base_service(node)).await?;
    converge(&ctx.client, namespace, owner, &node::internal_service(node)).await?;
    converge(&ctx.client, namespace, owner, &node::headless_service(node)).await?;
    converge(&ctx.client, namespace, owner, &node::metrics_service(node)).await?;
    converge(&ctx.client, namespace, owner, &node::statefulset(node)).await?;
    Ok(())
}

/// Error policy for the ChiaNode controller
pub fn error_policy(node: Arc<ChiaNode>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = node.name_any();
    let namespace = node.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error("ChiaNode", &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "ChiaNode no longer exists (likely deleted)");
        return Action::await_change();
    }

    warn!(name = %name, error = %error, "Reconciliation failed, will retry");
    Action::requeue(error.requeue_after())
}
