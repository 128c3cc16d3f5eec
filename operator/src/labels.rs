use std::collections::BTreeMap;

/// Label marking a resource as owned by this operator.
pub const CONTROLLER_LABEL: &str = "controller";
/// Value of the [`CONTROLLER_LABEL`] on every managed resource.
pub const CONTROLLER_LABEL_VALUE: &str = "locust-operator";
/// Label carrying the role-qualified name of a child.
pub const ROLE_LABEL: &str = "label";
/// Label carrying the deployment name of a child deployment.
pub const APP_LABEL: &str = "app";

/// Create labels that can be used as a unique selector for a given role-qualified name.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![(ROLE_LABEL.to_owned(), name.to_owned())])
}

/// Labels that indicate the resource is managed by the locust operator.
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![(
        CONTROLLER_LABEL.to_owned(),
        CONTROLLER_LABEL_VALUE.to_owned(),
    )])
}

/// Selector labels for a role-qualified name plus the managed label.
pub fn child_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.extend(selector_labels(name));
    labels
}

/// Reports whether the labels mark a resource as managed by the locust operator.
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(CONTROLLER_LABEL).map(String::as_str) == Some(CONTROLLER_LABEL_VALUE)
}
