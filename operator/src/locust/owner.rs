//! Owner reference stamping and lookup.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Resource,
};

use crate::locust::{error::Error, Locust};

const LOCUST_KIND: &str = "Locust";

/// Owner references stamping a child with the load test currently being reconciled.
pub fn parent_owner_refs(locust: &Locust) -> Result<Vec<OwnerReference>, Error> {
    locust
        .controller_owner_ref(&())
        .map(|oref| vec![oref])
        .ok_or(Error::MissingObjectKey("metadata.uid"))
}

/// Owner references stamping a child with an explicitly fetched parent snapshot.
pub fn snapshot_owner_refs(
    parent: &DynamicObject,
    resource: &ApiResource,
) -> Result<Vec<OwnerReference>, Error> {
    parent
        .controller_owner_ref(resource)
        .map(|oref| vec![oref])
        .ok_or(Error::MissingObjectKey("metadata.uid"))
}

/// Find the reference to the owning load test.
pub fn locust_owner(orefs: &[OwnerReference]) -> Option<&OwnerReference> {
    orefs.iter().find(|oref| oref.kind == LOCUST_KIND)
}

/// Describe the custom object API addressed by an owner reference.
///
/// The plural is the lower cased kind with an `s` appended.
pub fn owner_api_resource(owner: &OwnerReference) -> Result<ApiResource, Error> {
    let (group, version) = owner
        .api_version
        .split_once('/')
        .ok_or_else(|| Error::InvalidOwner(owner.api_version.to_owned()))?;
    let plural = format!("{}s", owner.kind.to_lowercase());
    Ok(ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(group, version, &owner.kind),
        &plural,
    ))
}
