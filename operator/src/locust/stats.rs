//! Poll the statistics of a running load test and mirror them onto its status.
use std::time::Duration;

use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    Api,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    locust::{utils::stats_url, Locust, LocustStats, WorkerReport},
    utils::Context,
};

const STATS_TIMEOUT: Duration = Duration::from_secs(10);
const AGGREGATED_ENTRY: &str = "Aggregated";
const RUNNING_STATE: &str = "running";

/// Define the behavior we consume from the Locust web API.
#[async_trait]
pub trait StatsClient: Send + Sync {
    /// Fetch and decode the stats served at `url`.
    async fn request_stats(&self, url: &str) -> Result<StatsResponse, StatsError>;
}

/// Failure to read the statistics of a controller.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// The request did not complete.
    #[error("stats request failed: {source}")]
    Transport {
        /// Underlying error.
        #[from]
        source: reqwest::Error,
    },
    /// The controller answered with a non success status.
    #[error("stats endpoint answered with status {0}")]
    Status(u16),
    /// The body was not a stats response.
    #[error("stats response could not be decoded: {0}")]
    Decode(String),
}

/// Body of `GET /stats/requests`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsResponse {
    /// Runner state, e.g. `running` or `stopped`.
    pub state: String,
    /// Share of failed requests.
    pub fail_ratio: f64,
    /// Requests per second over all endpoints.
    pub total_rps: f64,
    /// Connected workers.
    #[serde(default)]
    pub workers: Vec<WorkerStats>,
    /// Per endpoint statistics.
    #[serde(default)]
    pub stats: Vec<EndpointStats>,
}

/// Report of a single worker.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkerStats {
    /// Worker id.
    pub id: String,
    /// Worker state.
    pub state: String,
    /// Users simulated by the worker.
    #[serde(default)]
    pub user_count: u64,
}

/// Statistics of one request name, or of all of them for the `Aggregated` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EndpointStats {
    /// Request name.
    pub name: String,
    /// Current requests per second.
    #[serde(default)]
    pub current_rps: f64,
}

/// Stats client over plain HTTP.
pub struct HttpStatsClient {
    client: reqwest::Client,
}

impl HttpStatsClient {
    /// Build a client whose requests time out.
    pub fn new() -> Result<Self, StatsError> {
        let client = reqwest::Client::builder().timeout(STATS_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatsClient for HttpStatsClient {
    async fn request_stats(&self, url: &str) -> Result<StatsResponse, StatsError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(StatsError::Status(resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|err| StatsError::Decode(err.to_string()))
    }
}

/// Reduce a stats response to the status view of the load test.
///
/// The current rate is only reported while the test is running.
pub fn collect_stats(resp: StatsResponse) -> LocustStats {
    let current_rps = if resp.state == RUNNING_STATE {
        resp.stats
            .iter()
            .find(|entry| entry.name == AGGREGATED_ENTRY)
            .map(|entry| entry.current_rps)
    } else {
        None
    };
    LocustStats {
        state: resp.state,
        fail_ratio: resp.fail_ratio,
        total_rps: resp.total_rps,
        workers: resp
            .workers
            .into_iter()
            .map(|w| WorkerReport {
                id: w.id,
                state: w.state,
                user_count: w.user_count,
            })
            .collect(),
        current_rps,
    }
}

/// Poll a controller once. Failures are logged and yield no stats.
pub async fn poll_stats(client: &impl StatsClient, url: &str) -> Option<LocustStats> {
    match client.request_stats(url).await {
        Ok(resp) => Some(collect_stats(resp)),
        Err(StatsError::Status(code)) => {
            warn!(url, code, "stats endpoint answered with an error status");
            None
        }
        Err(err) => {
            warn!(url, %err, "failed to poll stats");
            None
        }
    }
}

/// Status merge patch carrying the stats.
///
/// An absent current rate is written as null so a stale value is removed.
pub fn stats_patch(stats: &LocustStats) -> serde_json::Value {
    let mut value = json!(stats);
    if stats.current_rps.is_none() {
        value["currentRps"] = serde_json::Value::Null;
    }
    json!({ "status": { "stats": value } })
}

/// Handle one status tick of a load test. Never fails.
pub async fn on_status_tick<S>(cx: &Context<S>, name: &str, ns: &str)
where
    S: StatsClient,
{
    let Some(stats) = poll_stats(&cx.stats_client, &stats_url(name, ns)).await else {
        return;
    };
    let locusts: Api<Locust> = Api::namespaced(cx.k_client.clone(), ns);
    match locusts
        .patch_status(name, &PatchParams::default(), &Patch::Merge(stats_patch(&stats)))
        .await
    {
        Ok(_) => debug!(name, ns, state = %stats.state, "stats recorded"),
        Err(err) => warn!(name, ns, %err, "failed to record stats"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use mockall::mock;

    use crate::utils::test::timeout_after_1s;

    mock! {
        pub StatsClientTest {}
        #[async_trait]
        impl StatsClient for StatsClientTest {
            async fn request_stats(&self, url: &str) -> Result<StatsResponse, StatsError>;
        }
    }

    fn response(state: &str) -> StatsResponse {
        StatsResponse {
            state: state.to_owned(),
            fail_ratio: 0.5,
            total_rps: 10.0,
            workers: vec![WorkerStats {
                id: "w1".to_owned(),
                state: state.to_owned(),
                user_count: 3,
            }],
            stats: vec![
                EndpointStats {
                    name: "/".to_owned(),
                    current_rps: 7.0,
                },
                EndpointStats {
                    name: "Aggregated".to_owned(),
                    current_rps: 42.0,
                },
            ],
        }
    }

    #[test]
    fn decode_locust_response() {
        let resp: StatsResponse = serde_json::from_str(
            r#"{
                "state": "running",
                "fail_ratio": 0.0,
                "total_rps": 12.5,
                "user_count": 10,
                "workers": [{"id": "w_1", "state": "running", "user_count": 10, "cpu_usage": 3}],
                "stats": [{"name": "Aggregated", "method": "", "current_rps": 12.0, "num_requests": 99}],
                "errors": []
            }"#,
        )
        .expect("valid stats");
        assert_eq!(resp.workers[0].user_count, 10);
        assert_eq!(resp.stats[0].current_rps, 12.0);
    }

    #[test]
    fn running_reports_aggregated_rate() {
        let stats = collect_stats(response("running"));
        assert_eq!(stats.current_rps, Some(42.0));
        assert_eq!(stats.workers.len(), 1);
        assert_eq!(stats_patch(&stats)["status"]["stats"]["currentRps"], 42.0);
    }

    #[test]
    fn stopped_omits_rate() {
        let stats = collect_stats(response("stopped"));
        assert_eq!(stats.current_rps, None);
        let value = serde_json::to_value(&stats).expect("stats serialize");
        assert!(value.get("currentRps").is_none());
        assert_eq!(stats.state, "stopped");
    }

    #[test]
    fn running_without_aggregate_omits_rate() {
        let resp = StatsResponse {
            stats: vec![],
            ..response("running")
        };
        assert_eq!(collect_stats(resp).current_rps, None);
    }

    #[tokio::test]
    async fn connection_failure_yields_nothing() {
        let client = HttpStatsClient::new().expect("client should build");
        let result = client.request_stats("http://127.0.0.1:1/stats/requests").await;
        assert!(matches!(result, Err(StatsError::Transport { .. })));
        assert_eq!(
            poll_stats(&client, "http://127.0.0.1:1/stats/requests").await,
            None
        );
    }

    #[tokio::test]
    async fn tick_records_stats_on_status() {
        let mut stats_client = MockStatsClientTest::new();
        stats_client
            .expect_request_stats()
            .withf(|url| {
                url.to_string()
                    == "http://test-controller-service.test.svc.cluster.local:8089/stats/requests"
            })
            .times(1)
            .returning(|_| Ok(response("running")));
        let (cx, mut fakeserver) = Context::test(stats_client);
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver
                .handle_request_response(Some(&Locust::test()))
                .await
                .expect("status patch should be answered");
            assert_eq!(request.method, "PATCH");
            assert_eq!(
                request.path,
                "/apis/locust.io/v1/namespaces/test/locusts/test/status"
            );
            let body = request.json();
            assert_eq!(body["status"]["stats"]["state"], "running");
            assert_eq!(body["status"]["stats"]["currentRps"], 42.0);
            assert_eq!(body["status"]["stats"]["workers"][0]["userCount"], 3);
        });
        on_status_tick(&cx, "test", "test").await;
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn tick_with_error_status_patches_nothing() {
        let mut stats_client = MockStatsClientTest::new();
        stats_client
            .expect_request_stats()
            .times(1)
            .returning(|_| Err(StatsError::Status(500)));
        let (cx, fakeserver) = Context::test(stats_client);
        on_status_tick(&cx, "test", "test").await;
        drop(cx);
        fakeserver.assert_no_request().await;
    }

    #[tokio::test]
    async fn tick_survives_failed_status_patch() {
        let mut stats_client = MockStatsClientTest::new();
        stats_client
            .expect_request_stats()
            .returning(|_| Ok(response("stopped")));
        let (cx, mut fakeserver) = Context::test(stats_client);
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver
                .handle_error(500, "InternalError")
                .await
                .expect("status patch should be answered");
            assert!(request.json()["status"]["stats"]["currentRps"].is_null());
        });
        on_status_tick(&cx, "test", "test").await;
        timeout_after_1s(mocksrv).await;
    }
}
