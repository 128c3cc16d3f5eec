//! Converge the children of a load test to the state derived from its spec.
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{
    locust::{
        children::{ChildManager, Role},
        deployment::validate,
        error::Error,
        owner::parent_owner_refs,
        stats::StatsClient,
        Locust,
    },
    utils::Context,
};

fn parent_key(locust: &Locust) -> Result<(String, String), Error> {
    let ns = locust
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    Ok((locust.name_any(), ns))
}

/// Create all three children of a new load test, controller first.
///
/// Children are not probed. After a partial failure the event is redelivered as an update.
pub async fn on_create<S>(cx: &Context<S>, locust: &Locust) -> Result<(), Error>
where
    S: StatsClient,
{
    let (name, ns) = parent_key(locust)?;
    validate(&locust.spec)?;
    let orefs = parent_owner_refs(locust)?;
    for role in Role::ALL {
        ChildManager::new(cx.k_client.clone(), role)
            .create(&name, &ns, &locust.spec, orefs.clone())
            .await?;
    }
    info!(name, ns, "load test created");
    Ok(())
}

/// Converge the children after a spec edit.
pub async fn on_update<S>(cx: &Context<S>, locust: &Locust) -> Result<(), Error>
where
    S: StatsClient,
{
    converge(cx, locust).await
}

/// Converge the children of a load test that existed before the operator started.
pub async fn on_resume<S>(cx: &Context<S>, locust: &Locust) -> Result<(), Error>
where
    S: StatsClient,
{
    converge(cx, locust).await
}

// Probe each child and create it when absent, otherwise patch it with the full desired manifest.
async fn converge<S>(cx: &Context<S>, locust: &Locust) -> Result<(), Error>
where
    S: StatsClient,
{
    let (name, ns) = parent_key(locust)?;
    validate(&locust.spec)?;
    let orefs = parent_owner_refs(locust)?;
    for role in Role::ALL {
        let manager = ChildManager::new(cx.k_client.clone(), role);
        match manager.get(&name, &ns).await? {
            None => {
                debug!(name, %role, "child is missing");
                manager
                    .create(&name, &ns, &locust.spec, orefs.clone())
                    .await?
            }
            Some(_) => {
                manager
                    .patch(&name, &ns, &locust.spec, orefs.clone())
                    .await?
            }
        }
    }
    Ok(())
}
