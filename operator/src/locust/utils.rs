//! Naming and addressing shared by every child of a load test.
use std::time::Duration;

/// Port the controller listens on for workers.
pub const MASTER_PORT: i32 = 5557;
/// Port of the controller web UI and stats API.
pub const WEB_PORT: i32 = 8089;

const CONTROLLER_SUFFIX: &str = "-controller";
const WORKER_SUFFIX: &str = "-worker";
const SERVICE_SUFFIX: &str = "-controller-service";

/// Name of the controller deployment of a load test.
pub fn controller_name(parent: &str) -> String {
    format!("{parent}{CONTROLLER_SUFFIX}")
}

/// Name of the worker deployment of a load test.
pub fn worker_name(parent: &str) -> String {
    format!("{parent}{WORKER_SUFFIX}")
}

/// Name of the service in front of the controller.
pub fn controller_service_name(parent: &str) -> String {
    format!("{parent}{SERVICE_SUFFIX}")
}

/// Fully qualified in-cluster DNS name of the controller service.
pub fn controller_service_fqdn(parent: &str, ns: &str) -> String {
    format!("{}.{ns}.svc.cluster.local", controller_service_name(parent))
}

/// Address of the stats endpoint of a controller.
pub fn stats_url(parent: &str, ns: &str) -> String {
    format!(
        "http://{}:{WEB_PORT}/stats/requests",
        controller_service_fqdn(parent, ns)
    )
}

/// Reports whether a deployment name is a controller deployment name.
pub fn is_controller_name(name: &str) -> bool {
    name.ends_with(CONTROLLER_SUFFIX)
}

/// Reports whether a deployment name is a worker deployment name.
pub fn is_worker_name(name: &str) -> bool {
    name.ends_with(WORKER_SUFFIX)
}

/// Reports whether the operator runs inside a cluster.
pub fn is_running_in_cluster() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
}

/// Slow down an interval tenfold when not running in a cluster.
///
/// Out of cluster the service DNS names do not resolve, so polling them often is wasted work.
pub fn slower_if_local(interval: Duration, in_cluster: bool) -> Duration {
    if in_cluster {
        interval
    } else {
        interval * 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        assert_eq!(controller_name("loadtest1"), "loadtest1-controller");
        assert_eq!(worker_name("loadtest1"), "loadtest1-worker");
        assert_eq!(
            controller_service_name("loadtest1"),
            "loadtest1-controller-service"
        );
    }

    #[test]
    fn fqdn_is_service_name_plus_cluster_suffix() {
        for parent in ["a", "loadtest1", "my-test-controller"] {
            assert_eq!(
                controller_service_fqdn(parent, "perf"),
                controller_service_name(parent) + ".perf.svc.cluster.local"
            );
        }
    }

    #[test]
    fn stats_address() {
        assert_eq!(
            stats_url("lt", "default"),
            "http://lt-controller-service.default.svc.cluster.local:8089/stats/requests"
        );
    }

    #[test]
    fn role_suffixes() {
        assert!(is_controller_name("lt-controller"));
        assert!(!is_controller_name("lt-controller-service"));
        assert!(is_worker_name("lt-worker"));
        assert!(!is_worker_name("lt-controller"));
    }

    #[test]
    fn local_interval_is_ten_times_slower() {
        let base = Duration::from_secs(5);
        assert_eq!(slower_if_local(base, true), base);
        assert_eq!(slower_if_local(base, false), Duration::from_secs(50));
    }
}
