use std::{sync::Arc, time::Duration};

use anyhow::Result;
use kube::client::Client;
use tracing::info;

use crate::{
    locust::{
        events::{RetryPolicy, Router},
        stats::HttpStatsClient,
        utils::{is_running_in_cluster, slower_if_local},
        watch::{watch_deployments, watch_parents, watch_services},
    },
    utils::Context,
};

/// Start the operator for the Locust CRD, watching the whole cluster.
pub async fn run(stats_interval: Duration) -> Result<()> {
    let k_client = Client::try_default().await?;
    let in_cluster = is_running_in_cluster();
    let stats_interval = slower_if_local(stats_interval, in_cluster);
    let context = Arc::new(Context::new(
        k_client.clone(),
        HttpStatsClient::new()?,
        stats_interval,
    ));
    let router = Router::new(context, RetryPolicy::default());

    info!(in_cluster, ?stats_interval, "watching load tests");
    tokio::join!(
        watch_parents(k_client.clone(), router.clone()),
        watch_deployments(k_client.clone(), router.clone()),
        watch_services(k_client, router),
    );
    Ok(())
}
