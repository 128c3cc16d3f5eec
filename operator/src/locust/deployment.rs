use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference},
};
use kube::core::ObjectMeta;

use crate::{
    labels::{child_labels, selector_labels, APP_LABEL},
    locust::{
        error::ValidationError,
        utils::{controller_name, controller_service_fqdn, worker_name, MASTER_PORT, WEB_PORT},
        LocustSpec,
    },
};

const CONTAINER_NAME: &str = "locust";

/// Reject specs that cannot be converged. Must run before any API call.
pub fn validate(spec: &LocustSpec) -> Result<(), ValidationError> {
    if spec.worker.replicas < 1 {
        return Err(ValidationError::Replicas(spec.worker.replicas));
    }
    Ok(())
}

/// Command of the controller (master) container.
pub fn controller_command(spec: &LocustSpec) -> Vec<String> {
    let mut command = vec![
        "run".to_owned(),
        "--master".to_owned(),
        "--file".to_owned(),
        spec.locustfile.to_owned(),
    ];
    if let Some(host) = &spec.host {
        command.extend(["--host".to_owned(), host.to_owned()]);
    }
    if let Some(autostart) = &spec.controller.autostart {
        if autostart.headless {
            command.push("--headless".to_owned());
        }
        if autostart.start {
            command.push("--autostart".to_owned());
        }
        if autostart.wait_for_workers {
            command.extend([
                "--expect-workers".to_owned(),
                spec.worker.replicas.to_string(),
            ]);
        }
    }
    command
}

/// Command of the worker containers.
pub fn worker_command(parent: &str, ns: &str, spec: &LocustSpec) -> Vec<String> {
    let mut command = vec![
        "run".to_owned(),
        "--worker".to_owned(),
        "--file".to_owned(),
        spec.locustfile.to_owned(),
        "--master-host".to_owned(),
        controller_service_fqdn(parent, ns),
        "--master-port".to_owned(),
        MASTER_PORT.to_string(),
    ];
    if let Some(host) = &spec.host {
        command.extend(["--host".to_owned(), host.to_owned()]);
    }
    command
}

/// DeploymentConfig defines which properties of the Deployment differ between roles.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentConfig {
    /// Name of the deployment.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Pod replicas.
    pub replicas: i32,
    /// Container command.
    pub command: Vec<String>,
    /// Container ports.
    pub ports: Vec<ContainerPort>,
}

impl DeploymentConfig {
    /// Configuration of the single controller deployment.
    pub fn controller(parent: &str, spec: &LocustSpec) -> Result<Self, ValidationError> {
        validate(spec)?;
        Ok(Self {
            name: controller_name(parent),
            image: spec.image.to_owned(),
            replicas: 1,
            command: controller_command(spec),
            ports: vec![
                ContainerPort {
                    container_port: WEB_PORT,
                    name: Some("web".to_owned()),
                    ..Default::default()
                },
                ContainerPort {
                    container_port: MASTER_PORT,
                    name: Some("master".to_owned()),
                    ..Default::default()
                },
            ],
        })
    }

    /// Configuration of the worker deployment.
    pub fn worker(parent: &str, ns: &str, spec: &LocustSpec) -> Result<Self, ValidationError> {
        validate(spec)?;
        Ok(Self {
            name: worker_name(parent),
            image: spec.image.to_owned(),
            replicas: spec.worker.replicas,
            command: worker_command(parent, ns, spec),
            ports: vec![],
        })
    }
}

/// Full desired Deployment for a role configuration.
pub fn deployment(config: DeploymentConfig, ns: &str, orefs: Vec<OwnerReference>) -> Deployment {
    let mut labels = child_labels(&config.name);
    labels.insert(APP_LABEL.to_owned(), config.name.to_owned());
    Deployment {
        metadata: ObjectMeta {
            name: Some(config.name.to_owned()),
            namespace: Some(ns.to_owned()),
            owner_references: Some(orefs),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&config.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(child_labels(&config.name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_owned(),
                        image: Some(config.image),
                        command: Some(config.command),
                        ports: if config.ports.is_empty() {
                            None
                        } else {
                            Some(config.ports)
                        },
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
