use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Primary CRD for creating and managing a distributed Locust load test.
/// Desired state of a distributed Locust load test.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "locust.io",
    version = "v1",
    kind = "Locust",
    plural = "locusts",
    status = "LocustStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LocustSpec {
    /// Image used by both the controller and the worker containers.
    pub image: String,
    /// Path of the locustfile inside the image.
    pub locustfile: String,
    /// Configuration of the single controller (master) process.
    #[serde(default, alias = "controllerConfig")]
    pub controller: ControllerSpec,
    /// Configuration of the worker processes.
    #[serde(default, alias = "workerConfig")]
    pub worker: WorkerSpec,
    /// Host to load test, passed through as `--host`.
    pub host: Option<String>,
}

/// Controller (master) configuration.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    /// Whether the web UI is expected to be used.
    #[serde(default)]
    pub ui: bool,
    /// Start the test without user interaction.
    pub autostart: Option<AutostartSpec>,
}

/// Autostart behavior of the controller.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutostartSpec {
    /// Start swarming as soon as the controller is up.
    #[serde(default)]
    pub start: bool,
    /// Wait until all workers are connected before starting.
    #[serde(default)]
    pub wait_for_workers: bool,
    /// Run without the web UI.
    #[serde(default)]
    pub headless: bool,
}

/// Worker configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Number of worker pods, must be at least one.
    #[schemars(range(min = 1))]
    pub replicas: i32,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self { replicas: 1 }
    }
}

/// Current status of a load test.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocustStatus {
    /// Last observed `Available` condition keyed by child deployment name.
    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentAvailability>,
    /// Last polled statistics of the controller.
    pub stats: Option<LocustStats>,
}

/// The `Available` condition of a child deployment.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAvailability {
    /// One of True, False or Unknown.
    pub status: String,
    /// Machine readable reason of the last transition.
    pub reason: Option<String>,
    /// Human readable message of the last transition.
    pub message: Option<String>,
    /// RFC 3339 time of the last transition.
    pub last_transition_time: Option<String>,
}

/// Aggregate statistics reported by a Locust controller.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocustStats {
    /// Runner state, i.e. ready, spawning, running or stopped.
    pub state: String,
    /// Ratio of failed requests.
    pub fail_ratio: f64,
    /// Total requests per second over the whole run.
    pub total_rps: f64,
    /// Workers connected to the controller.
    #[serde(default)]
    pub workers: Vec<WorkerReport>,
    /// Current requests per second, only present while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rps: Option<f64>,
}

/// State of a single worker as seen by the controller.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    /// Worker id, usually `<hostname>_<uuid>`.
    pub id: String,
    /// Worker state.
    pub state: String,
    /// Users currently spawned by the worker.
    pub user_count: u64,
}
