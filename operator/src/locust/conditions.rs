//! Mirror the availability of child deployments onto the parent status.
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Patch, PatchParams},
    Api,
};
use serde_json::json;
use tracing::debug;

use crate::{
    locust::{
        children::ChildRef,
        error::{is_not_found, Error},
        stats::StatsClient,
        DeploymentAvailability, Locust,
    },
    utils::Context,
};

const AVAILABLE_CONDITION: &str = "Available";

/// The `Available` condition of a deployment, if reported.
pub fn availability(deployment: &Deployment) -> Option<DeploymentAvailability> {
    deployment
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|cond| cond.type_ == AVAILABLE_CONDITION)
        .map(|cond| DeploymentAvailability {
            status: cond.status.to_owned(),
            reason: cond.reason.to_owned(),
            message: cond.message.to_owned(),
            last_transition_time: cond
                .last_transition_time
                .as_ref()
                .map(|time| time.0.to_rfc3339()),
        })
}

/// Record the availability of a child deployment on its parent.
pub async fn on_conditions_changed<S>(
    cx: &Context<S>,
    child: &ChildRef,
    available: &DeploymentAvailability,
) -> Result<(), Error>
where
    S: StatsClient,
{
    let Some(owner) = child.parent() else {
        return Ok(());
    };
    let locusts: Api<Locust> = Api::namespaced(cx.k_client.clone(), &child.namespace);
    let patch = json!({ "status": { "deployments": { &child.name: available } } });
    match locusts
        .patch_status(&owner.name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            debug!(
                parent = owner.name,
                child = child.name,
                status = %available.status,
                "availability recorded"
            );
            Ok(())
        }
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::apps::v1::{DeploymentCondition, DeploymentStatus},
        apimachinery::pkg::apis::meta::v1::OwnerReference,
    };

    use super::*;
    use crate::{
        locust::{children::ChildKind, stats::tests::MockStatsClientTest},
        utils::test::timeout_after_1s,
    };

    fn available(status: &str) -> DeploymentAvailability {
        DeploymentAvailability {
            status: status.to_owned(),
            reason: Some("MinimumReplicasAvailable".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn available_condition_is_extracted() {
        let deployment = Deployment {
            status: Some(DeploymentStatus {
                conditions: Some(vec![
                    DeploymentCondition {
                        type_: "Progressing".to_owned(),
                        status: "True".to_owned(),
                        ..Default::default()
                    },
                    DeploymentCondition {
                        type_: "Available".to_owned(),
                        status: "True".to_owned(),
                        reason: Some("MinimumReplicasAvailable".to_owned()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(availability(&deployment), Some(available("True")));
        assert_eq!(availability(&Deployment::default()), None);
    }

    #[tokio::test]
    async fn availability_is_patched_onto_parent() {
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
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
            assert_eq!(
                request.json()["status"]["deployments"]["test-worker"]["status"],
                "False"
            );
        });
        let child = ChildRef {
            kind: ChildKind::Deployment,
            name: "test-worker".to_owned(),
            namespace: "test".to_owned(),
            owner_references: vec![OwnerReference {
                api_version: "locust.io/v1".to_owned(),
                kind: "Locust".to_owned(),
                name: "test".to_owned(),
                uid: "test-uid".to_owned(),
                ..Default::default()
            }],
        };
        on_conditions_changed(&cx, &child, &available("False"))
            .await
            .expect("status patch should succeed");
        timeout_after_1s(mocksrv).await;
    }
}
