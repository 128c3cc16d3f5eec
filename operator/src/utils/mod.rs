//! Utils is shared functions and constants for the controller

use std::time::Duration;

use kube::client::Client;

use crate::locust::stats::StatsClient;

/// Operator Context
pub struct Context<S> {
    /// Kube client
    pub k_client: Client,
    /// Locust stats client
    pub stats_client: S,
    /// Interval between two stats polls of one load test
    pub stats_interval: Duration,
}

impl<S> Context<S>
where
    S: StatsClient,
{
    /// Create new context
    pub fn new(k_client: Client, stats_client: S, stats_interval: Duration) -> Self {
        Context {
            k_client,
            stats_client,
            stats_interval,
        }
    }
}
