//! Recreate deleted children from the live spec of their parent.
use kube::{core::DynamicObject, Api, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    locust::{
        children::{merge_patch_child, ChildManager, ChildRef},
        error::{is_forbidden, is_not_found, Error},
        owner::{owner_api_resource, snapshot_owner_refs},
        stats::StatsClient,
        LocustSpec,
    },
    utils::Context,
};

/// Handle the deletion of a managed child.
///
/// The child is recreated only while its parent can still be read and is not itself
/// being deleted.
pub async fn on_child_deleted<S>(cx: &Context<S>, child: &ChildRef) -> Result<(), Error>
where
    S: StatsClient,
{
    let Some(owner) = child.parent() else {
        debug!(kind = %child.kind, name = child.name, "deleted child has no load test owner");
        return Ok(());
    };
    let Some(role) = child.role() else {
        debug!(kind = %child.kind, name = child.name, "deleted child has no known role");
        return Ok(());
    };
    let resource = owner_api_resource(owner)?;
    let parents: Api<DynamicObject> =
        Api::namespaced_with(cx.k_client.clone(), &child.namespace, &resource);
    let parent = match parents.get(&owner.name).await {
        Ok(parent) => parent,
        Err(err) if is_not_found(&err) => {
            info!(
                parent = owner.name,
                child = child.name,
                "parent is gone, not recreating child"
            );
            return Ok(());
        }
        Err(err) if is_forbidden(&err) => {
            error!(
                parent = owner.name,
                child = child.name,
                %err,
                "parent cannot be read, not recreating child"
            );
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    if parent.metadata.deletion_timestamp.is_some() {
        info!(
            parent = owner.name,
            child = child.name,
            "parent is being deleted, not recreating child"
        );
        return Ok(());
    }

    match merge_patch_child(
        cx.k_client.clone(),
        child,
        &json!({ "metadata": { "finalizers": null } }),
    )
    .await
    {
        Ok(()) => debug!(kind = %child.kind, name = child.name, "finalizers cleared"),
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(err.into()),
    }

    let spec: LocustSpec = serde_json::from_value(
        parent
            .data
            .get("spec")
            .cloned()
            .ok_or(Error::MissingObjectKey("spec"))?,
    )?;
    let orefs = snapshot_owner_refs(&parent, &resource)?;
    ChildManager::new(cx.k_client.clone(), role)
        .create(&parent.name_any(), &child.namespace, &spec, orefs)
        .await?;
    info!(%role, name = child.name, "child recreated");
    Ok(())
}
