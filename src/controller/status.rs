//! Status reporting for managed spec objects.
//!
//! Status is a single readiness flag patched through the status
//! subresource, set only after every child resource of the current
//! pass converged. The spec itself is never written.

use std::fmt::Debug;

use kube::{
    api::{Patch, PatchParams},
    Api, Resource,
};
use serde::de::DeserializeOwned;

use crate::controller::convergence::FIELD_MANAGER;
use crate::controller::error::{Error, Result};

/// Persist the readiness flag on a spec object's status subresource.
pub async fn update_ready<K>(api: &Api<K>, name: &str, owner: &str, ready: bool) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    let patch = serde_json::json!({
        "status": { "ready": ready }
    });

    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(|source| Error::StatusUpdate {
        owner: owner.to_string(),
        source,
    })?;

    Ok(())
}
