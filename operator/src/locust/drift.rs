//! Revert out-of-band edits to the ownership labels of children.
use serde_json::json;
use tracing::{info, warn};

use crate::{
    labels::{APP_LABEL, CONTROLLER_LABEL, CONTROLLER_LABEL_VALUE},
    locust::{
        children::{merge_patch_child, ChildRef},
        error::Error,
        stats::StatsClient,
    },
    utils::Context,
};

/// Label patch reverting a drifted label.
///
/// The controller label is always restored. The app label is restored to its prior
/// value together with the controller label, and left alone when it had no prior value.
pub fn relabel_patch(label: &str, old: Option<&str>) -> Option<serde_json::Value> {
    match label {
        CONTROLLER_LABEL => Some(json!({
            "metadata": { "labels": { CONTROLLER_LABEL: CONTROLLER_LABEL_VALUE } }
        })),
        APP_LABEL => old.map(|old| {
            json!({
                "metadata": { "labels": { CONTROLLER_LABEL: CONTROLLER_LABEL_VALUE, APP_LABEL: old } }
            })
        }),
        _ => None,
    }
}

/// Handle a drifted ownership label on a child.
pub async fn on_label_drift<S>(
    cx: &Context<S>,
    child: &ChildRef,
    label: &str,
    old: Option<&str>,
) -> Result<(), Error>
where
    S: StatsClient,
{
    let Some(patch) = relabel_patch(label, old) else {
        return Ok(());
    };
    merge_patch_child(cx.k_client.clone(), child, &patch).await?;
    info!(kind = %child.kind, name = child.name, label, "child labels patched");
    Ok(())
}

/// Handle an out-of-band change to the spec of a child.
///
/// Spec edits are trusted, only label ownership is enforced.
pub fn on_spec_drift(child: &ChildRef) {
    warn!(
        kind = %child.kind,
        name = child.name,
        namespace = child.namespace,
        "child spec drifted, leaving it as is"
    );
}
