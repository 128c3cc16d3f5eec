//! Helper methods only available for tests
use crate::locust::{Locust, LocustSpec, LocustStatus};

// Add tests specific implementation to the Locust
impl Locust {
    /// A normal test load test in the `test` namespace
    pub fn test() -> Self {
        let mut locust = Locust::new(
            "test",
            LocustSpec {
                image: "locustio/locust".to_owned(),
                locustfile: "/mnt/locust/locustfile.py".to_owned(),
                ..Default::default()
            },
        );
        locust.metadata.namespace = Some("test".to_owned());
        locust.metadata.uid = Some("test-uid".to_owned());
        locust.metadata.generation = Some(1);
        locust
    }
    /// Modify a load test to have an expected spec
    pub fn with_spec(self, spec: LocustSpec) -> Self {
        Self { spec, ..self }
    }
    /// Modify a load test to have an expected status
    pub fn with_status(self, status: LocustStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}
