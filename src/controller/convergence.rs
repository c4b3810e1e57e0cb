//! Converge-to-present driver for synthesized child resources.
//!
//! One idempotent primitive: server-side apply of a manifest under the
//! operator's field manager. The apply creates the resource when
//! absent, patches drifted fields when present, and no-ops when the
//! manifest already matches. Child resources are never pruned here;
//! a flavor removed from the synthesis output stays in the cluster
//! until its owner is deleted and the garbage collector takes it.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::controller::error::{Error, Result};

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "chia-operator";

/// Converge one child resource to present.
///
/// `owner` names the spec object the manifest belongs to; it is carried
/// into the error context so a failed pass identifies both the child
/// resource and the owning spec.
pub async fn converge<K>(client: &Client, namespace: &str, owner: &str, manifest: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let kind = K::kind(&()).into_owned();
    let name = manifest
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(manifest),
    )
    .await
    .map_err(|source| Error::Convergence {
        kind: kind.clone(),
        name: name.clone(),
        owner: owner.to_string(),
        source,
    })?;

    debug!(kind = %kind, name = %name, "Converged resource");
    Ok(())
}
