use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{apis::meta::v1::OwnerReference, util::intstr::IntOrString},
};
use kube::core::ObjectMeta;

use crate::{
    labels::{child_labels, selector_labels},
    locust::utils::{controller_name, controller_service_name, MASTER_PORT, WEB_PORT},
};

/// Spec of the service routing to the controller pods.
pub fn controller_service_spec(parent: &str) -> ServiceSpec {
    ServiceSpec {
        ports: Some(vec![
            ServicePort {
                port: WEB_PORT,
                name: Some("web".to_owned()),
                protocol: Some("TCP".to_owned()),
                target_port: Some(IntOrString::Int(WEB_PORT)),
                ..Default::default()
            },
            ServicePort {
                port: MASTER_PORT,
                name: Some("master".to_owned()),
                protocol: Some("TCP".to_owned()),
                target_port: Some(IntOrString::Int(MASTER_PORT)),
                ..Default::default()
            },
        ]),
        selector: Some(selector_labels(&controller_name(parent))),
        ..Default::default()
    }
}

/// Full desired Service in front of the controller.
pub fn controller_service(parent: &str, ns: &str, orefs: Vec<OwnerReference>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(controller_service_name(parent)),
            namespace: Some(ns.to_owned()),
            owner_references: Some(orefs),
            labels: Some(child_labels(&controller_name(parent))),
            ..ObjectMeta::default()
        },
        spec: Some(controller_service_spec(parent)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_selects_controller_pods() {
        let service = controller_service("lt", "default", vec![]);
        assert_eq!(
            service.metadata.name.as_deref(),
            Some("lt-controller-service")
        );
        let spec = service.spec.expect("spec");
        assert_eq!(spec.selector, Some(selector_labels("lt-controller")));
        let ports: Vec<i32> = spec
            .ports
            .unwrap_or_default()
            .iter()
            .map(|p| p.port)
            .collect();
        assert_eq!(ports, vec![8089, 5557]);
    }
}
