//! Get, create and patch the three children of a load test.
use std::fmt;

use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Service},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    api::{Patch, PatchParams, PostParams},
    client::Client,
    Api,
};
use tracing::{error, info};

use crate::locust::{
    deployment::{deployment, DeploymentConfig},
    error::{Error, ValidationError},
    owner::locust_owner,
    service::controller_service,
    utils::{
        controller_name, controller_service_name, is_controller_name, is_worker_name, worker_name,
    },
    LocustSpec,
};

/// Field manager recorded on every write of the operator.
pub const FIELD_MANAGER: &str = "locust-operator";

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..Default::default()
    }
}

/// The role a child plays in a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Single locust master deployment.
    Controller,
    /// Locust worker deployment.
    Worker,
    /// Service in front of the controller.
    Service,
}

impl Role {
    /// All roles in the order they are converged.
    pub const ALL: [Role; 3] = [Role::Controller, Role::Worker, Role::Service];

    /// Derived name of the child for a parent.
    pub fn child_name(&self, parent: &str) -> String {
        match self {
            Role::Controller => controller_name(parent),
            Role::Worker => worker_name(parent),
            Role::Service => controller_service_name(parent),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Controller => write!(f, "controller"),
            Role::Worker => write!(f, "worker"),
            Role::Service => write!(f, "service"),
        }
    }
}

/// Kind of a child resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// apps/v1 Deployment
    Deployment,
    /// v1 Service
    Service,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKind::Deployment => write!(f, "Deployment"),
            ChildKind::Service => write!(f, "Service"),
        }
    }
}

/// Reference to an observed child resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRef {
    /// Kind of the child.
    pub kind: ChildKind,
    /// Name of the child.
    pub name: String,
    /// Namespace of the child.
    pub namespace: String,
    /// Owner references as last observed on the child.
    pub owner_references: Vec<OwnerReference>,
}

impl ChildRef {
    /// The owning load test, if any.
    pub fn parent(&self) -> Option<&OwnerReference> {
        locust_owner(&self.owner_references)
    }

    /// Role of the child, from its kind and then its name suffix.
    pub fn role(&self) -> Option<Role> {
        match self.kind {
            ChildKind::Service => Some(Role::Service),
            ChildKind::Deployment if is_controller_name(&self.name) => Some(Role::Controller),
            ChildKind::Deployment if is_worker_name(&self.name) => Some(Role::Worker),
            ChildKind::Deployment => None,
        }
    }
}

/// Merge patch an observed child addressed by its reference.
pub async fn merge_patch_child(
    k_client: Client,
    child: &ChildRef,
    patch: &serde_json::Value,
) -> Result<(), kube::Error> {
    let params = patch_params();
    match child.kind {
        ChildKind::Deployment => {
            let deployments: Api<Deployment> = Api::namespaced(k_client, &child.namespace);
            deployments
                .patch(&child.name, &params, &Patch::Merge(patch))
                .await?;
        }
        ChildKind::Service => {
            let services: Api<Service> = Api::namespaced(k_client, &child.namespace);
            services
                .patch(&child.name, &params, &Patch::Merge(patch))
                .await?;
        }
    }
    Ok(())
}

/// Desired manifest of a child.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredChild {
    /// Controller or worker deployment.
    Deployment(Deployment),
    /// Controller service.
    Service(Service),
}

/// Observed state of an existing child.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildState {
    /// Controller or worker deployment.
    Deployment(Deployment),
    /// Controller service.
    Service(Service),
}

/// Build the desired manifest of a role. Recomputed on every pass.
pub fn desired(
    role: Role,
    parent: &str,
    ns: &str,
    spec: &LocustSpec,
    orefs: Vec<OwnerReference>,
) -> Result<DesiredChild, ValidationError> {
    Ok(match role {
        Role::Controller => DesiredChild::Deployment(deployment(
            DeploymentConfig::controller(parent, spec)?,
            ns,
            orefs,
        )),
        Role::Worker => DesiredChild::Deployment(deployment(
            DeploymentConfig::worker(parent, ns, spec)?,
            ns,
            orefs,
        )),
        Role::Service => DesiredChild::Service(controller_service(parent, ns, orefs)),
    })
}

/// Manages the child of a single role.
///
/// Does not retry, every API failure is returned to the caller.
#[derive(Clone)]
pub struct ChildManager {
    k_client: Client,
    role: Role,
}

impl ChildManager {
    /// Create a manager for a role.
    pub fn new(k_client: Client, role: Role) -> Self {
        Self { k_client, role }
    }
    /// Manager of the controller deployment.
    pub fn controller(k_client: Client) -> Self {
        Self::new(k_client, Role::Controller)
    }
    /// Manager of the worker deployment.
    pub fn worker(k_client: Client) -> Self {
        Self::new(k_client, Role::Worker)
    }
    /// Manager of the controller service.
    pub fn service(k_client: Client) -> Self {
        Self::new(k_client, Role::Service)
    }

    /// The role of the managed child.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Read the child, reporting None when it does not exist.
    pub async fn get(&self, parent: &str, ns: &str) -> Result<Option<ChildState>, Error> {
        let name = self.role.child_name(parent);
        let state = match self.role {
            Role::Controller | Role::Worker => {
                let deployments: Api<Deployment> = Api::namespaced(self.k_client.clone(), ns);
                deployments
                    .get_opt(&name)
                    .await
                    .map(|d| d.map(ChildState::Deployment))
            }
            Role::Service => {
                let services: Api<Service> = Api::namespaced(self.k_client.clone(), ns);
                services
                    .get_opt(&name)
                    .await
                    .map(|s| s.map(ChildState::Service))
            }
        };
        state.map_err(|err| {
            error!(role = %self.role, name, %err, "failed to read child");
            err.into()
        })
    }

    /// Create the child. The caller must have observed that it does not exist.
    pub async fn create(
        &self,
        parent: &str,
        ns: &str,
        spec: &LocustSpec,
        orefs: Vec<OwnerReference>,
    ) -> Result<(), Error> {
        let name = self.role.child_name(parent);
        let params = post_params();
        match desired(self.role, parent, ns, spec, orefs)? {
            DesiredChild::Deployment(data) => {
                let deployments: Api<Deployment> = Api::namespaced(self.k_client.clone(), ns);
                deployments.create(&params, &data).await?;
            }
            DesiredChild::Service(data) => {
                let services: Api<Service> = Api::namespaced(self.k_client.clone(), ns);
                services.create(&params, &data).await?;
            }
        }
        info!(role = %self.role, name, "child created");
        Ok(())
    }

    /// Merge patch the existing child with the full desired manifest.
    pub async fn patch(
        &self,
        parent: &str,
        ns: &str,
        spec: &LocustSpec,
        orefs: Vec<OwnerReference>,
    ) -> Result<(), Error> {
        let name = self.role.child_name(parent);
        let params = patch_params();
        match desired(self.role, parent, ns, spec, orefs)? {
            DesiredChild::Deployment(data) => {
                let deployments: Api<Deployment> = Api::namespaced(self.k_client.clone(), ns);
                deployments
                    .patch(&name, &params, &Patch::Merge(&data))
                    .await?;
            }
            DesiredChild::Service(data) => {
                let services: Api<Service> = Api::namespaced(self.k_client.clone(), ns);
                services.patch(&name, &params, &Patch::Merge(&data)).await?;
            }
        }
        info!(role = %self.role, name, "child patched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        locust::{stats::tests::MockStatsClientTest, Locust},
        utils::{test::timeout_after_1s, Context},
    };

    #[test]
    fn roles_derive_names() {
        let names: Vec<String> = Role::ALL.iter().map(|r| r.child_name("lt")).collect();
        assert_eq!(
            names,
            vec!["lt-controller", "lt-worker", "lt-controller-service"]
        );
    }

    fn child(kind: ChildKind, name: &str) -> ChildRef {
        ChildRef {
            kind,
            name: name.to_owned(),
            namespace: "test".to_owned(),
            owner_references: vec![],
        }
    }

    #[test]
    fn child_role_from_kind_and_suffix() {
        assert_eq!(
            child(ChildKind::Deployment, "lt-controller").role(),
            Some(Role::Controller)
        );
        assert_eq!(
            child(ChildKind::Deployment, "lt-worker").role(),
            Some(Role::Worker)
        );
        assert_eq!(
            child(ChildKind::Service, "lt-controller-service").role(),
            Some(Role::Service)
        );
        assert_eq!(child(ChildKind::Deployment, "lt-other").role(), None);
    }

    #[tokio::test]
    async fn get_missing_child_is_none() {
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver
                .handle_request_response::<Deployment>(None)
                .await
                .expect("get should be answered");
            assert_eq!(request.method, "GET");
            assert_eq!(
                request.path,
                "/apis/apps/v1/namespaces/default/deployments/lt-worker"
            );
        });
        let state = ChildManager::worker(cx.k_client.clone())
            .get("lt", "default")
            .await
            .expect("not found is not an error");
        assert_eq!(state, None);
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn get_surfaces_other_errors() {
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
        let mocksrv = tokio::spawn(async move {
            fakeserver
                .handle_error(500, "InternalError")
                .await
                .expect("get should be answered");
        });
        let result = ChildManager::service(cx.k_client.clone())
            .get("lt", "default")
            .await;
        assert!(matches!(result, Err(Error::Kube { .. })));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn get_existing_service() {
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver
                .handle_request_response(Some(&Service::default()))
                .await
                .expect("get should be answered");
            assert_eq!(
                request.path,
                "/api/v1/namespaces/default/services/lt-controller-service"
            );
        });
        let state = ChildManager::service(cx.k_client.clone())
            .get("lt", "default")
            .await
            .expect("service should be read");
        assert!(matches!(state, Some(ChildState::Service(_))));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn patch_sends_full_manifest_as_merge_patch() {
        let locust = Locust::test();
        let orefs = crate::locust::owner::parent_owner_refs(&locust).expect("uid");
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.handle_echo().await.expect("patch should apply");
            assert_eq!(request.method, "PATCH");
            assert!(request.uri.contains("fieldManager=locust-operator"));
            assert_eq!(
                request.path,
                "/apis/apps/v1/namespaces/test/deployments/test-controller"
            );
            assert_eq!(
                request.content_type.as_deref(),
                Some("application/merge-patch+json")
            );
            let body = request.json();
            assert_eq!(body["spec"]["replicas"], 1);
            assert_eq!(body["metadata"]["ownerReferences"][0]["name"], "test");
        });
        ChildManager::controller(cx.k_client.clone())
            .patch("test", "test", &locust.spec, orefs)
            .await
            .expect("patch should succeed");
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn create_records_field_manager() {
        let locust = Locust::test();
        let orefs = crate::locust::owner::parent_owner_refs(&locust).expect("uid");
        let (cx, mut fakeserver) = Context::test(MockStatsClientTest::new());
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.handle_echo().await.expect("create should apply");
            assert_eq!(request.method, "POST");
            assert_eq!(request.path, "/api/v1/namespaces/test/services");
            assert!(request.uri.contains("fieldManager=locust-operator"));
            assert_eq!(request.json()["metadata"]["name"], "test-controller-service");
        });
        ChildManager::service(cx.k_client.clone())
            .create("test", "test", &locust.spec, orefs)
            .await
            .expect("create should succeed");
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn create_with_invalid_spec_issues_no_call() {
        let mut locust = Locust::test();
        locust.spec.worker.replicas = 0;
        let (cx, fakeserver) = Context::test(MockStatsClientTest::new());
        let result = ChildManager::worker(cx.k_client.clone())
            .create("test", "test", &locust.spec, vec![])
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        drop(cx);
        fakeserver.assert_no_request().await;
    }
}
