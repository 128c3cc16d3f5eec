//! Turn watch streams of load tests and their children into typed events.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use futures::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    runtime::{watcher, WatchStreamExt},
    core::ObjectMeta,
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    labels::{is_managed, APP_LABEL, CONTROLLER_LABEL, CONTROLLER_LABEL_VALUE},
    locust::{
        children::{ChildKind, ChildRef, FIELD_MANAGER},
        conditions::availability,
        events::{Event, ParentKey, Router},
        stats::StatsClient,
        DeploymentAvailability, Locust,
    },
};

/// Tracks load tests to tell creations, spec updates and resumes apart.
#[derive(Debug, Default)]
pub struct ParentTracker {
    listed: bool,
    generations: HashMap<ParentKey, Option<i64>>,
}

impl ParentTracker {
    /// Translate one watch event into the lifecycle events it implies.
    pub fn observe(&mut self, event: watcher::Event<Locust>) -> Vec<Event> {
        match event {
            watcher::Event::Applied(locust) => self.applied(locust).into_iter().collect(),
            watcher::Event::Deleted(locust) => ParentKey::from_locust(&locust)
                .and_then(|key| self.generations.remove_entry(&key))
                .map(|(key, _)| Event::ParentDeleted(key))
                .into_iter()
                .collect(),
            watcher::Event::Restarted(locusts) if !self.listed => {
                self.listed = true;
                locusts
                    .into_iter()
                    .filter_map(|locust| {
                        let key = ParentKey::from_locust(&locust)?;
                        self.generations.insert(key, locust.metadata.generation);
                        (!is_terminating(&locust)).then(|| Event::ParentResumed(Arc::new(locust)))
                    })
                    .collect()
            }
            watcher::Event::Restarted(locusts) => {
                // A relist after the watch was lost, diff it against what we know.
                let listed: HashSet<ParentKey> =
                    locusts.iter().filter_map(ParentKey::from_locust).collect();
                let gone: Vec<ParentKey> = self
                    .generations
                    .keys()
                    .filter(|key| !listed.contains(*key))
                    .cloned()
                    .collect();
                let mut events: Vec<Event> = locusts
                    .into_iter()
                    .filter_map(|locust| self.applied(locust))
                    .collect();
                for key in gone {
                    self.generations.remove(&key);
                    events.push(Event::ParentDeleted(key));
                }
                events
            }
        }
    }

    fn applied(&mut self, locust: Locust) -> Option<Event> {
        let key = ParentKey::from_locust(&locust)?;
        let generation = locust.metadata.generation;
        let previous = self.generations.insert(key, generation);
        // Marking for deletion bumps the generation. Children are left to the garbage collector.
        if is_terminating(&locust) {
            return None;
        }
        match previous {
            None => Some(Event::ParentCreated(Arc::new(locust))),
            // Status writes do not bump the generation.
            Some(previous) if previous != generation => {
                Some(Event::ParentUpdated(Arc::new(locust)))
            }
            Some(_) => None,
        }
    }
}

fn is_terminating(locust: &Locust) -> bool {
    locust.metadata.deletion_timestamp.is_some()
}

/// The parts of a child the operator reacts to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSnapshot {
    /// The observed child.
    pub child: ChildRef,
    /// Labels of the child.
    pub labels: BTreeMap<String, String>,
    /// Spec of the child as JSON.
    pub spec: Option<serde_json::Value>,
    /// Availability, only set for deployments.
    pub available: Option<DeploymentAvailability>,
    /// Whether a deletion timestamp is set.
    pub deleting: bool,
    /// Field manager of the latest write to the spec.
    pub spec_writer: Option<String>,
}

impl ChildSnapshot {
    /// Snapshot of a deployment, None when it lacks a name or namespace.
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        Self::from_object(deployment, ChildKind::Deployment).map(|snapshot| Self {
            spec: serde_json::to_value(&deployment.spec).ok(),
            available: availability(deployment),
            ..snapshot
        })
    }

    /// Snapshot of a service, None when it lacks a name or namespace.
    pub fn from_service(service: &Service) -> Option<Self> {
        Self::from_object(service, ChildKind::Service).map(|snapshot| Self {
            spec: serde_json::to_value(&service.spec).ok(),
            ..snapshot
        })
    }

    fn from_object<K: Resource>(obj: &K, kind: ChildKind) -> Option<Self> {
        let meta = obj.meta();
        Some(Self {
            child: ChildRef {
                kind,
                name: meta.name.clone()?,
                namespace: meta.namespace.clone()?,
                owner_references: meta.owner_references.clone().unwrap_or_default(),
            },
            labels: meta.labels.clone().unwrap_or_default(),
            spec: None,
            available: None,
            deleting: meta.deletion_timestamp.is_some(),
            spec_writer: spec_writer(meta),
        })
    }

    /// Reports whether the object belongs to a load test.
    pub fn is_tracked(&self) -> bool {
        is_managed(&self.labels) || self.child.parent().is_some()
    }

    fn key(&self) -> (ChildKind, String, String) {
        (
            self.child.kind,
            self.child.namespace.to_owned(),
            self.child.name.to_owned(),
        )
    }

    fn label(&self, label: &str) -> Option<&str> {
        self.labels.get(label).map(String::as_str)
    }
}

fn spec_writer(meta: &ObjectMeta) -> Option<String> {
    meta.managed_fields
        .as_ref()?
        .iter()
        .filter(|entry| {
            entry
                .fields_v1
                .as_ref()
                .is_some_and(|fields| fields.0.get("f:spec").is_some())
        })
        .max_by_key(|entry| entry.time.as_ref().map(|time| time.0))
        .and_then(|entry| entry.manager.clone())
}

/// Caches the last observation of every child and diffs new observations against it.
#[derive(Debug, Default)]
pub struct ChildTracker {
    snapshots: HashMap<(ChildKind, String, String), ChildSnapshot>,
}

impl ChildTracker {
    /// An object was created or modified.
    pub fn applied(&mut self, snapshot: ChildSnapshot) -> Vec<Event> {
        let key = snapshot.key();
        let previous = self.snapshots.get(&key);
        if previous.is_none() && !snapshot.is_tracked() {
            return vec![];
        }
        let events = diff(previous, &snapshot);
        self.snapshots.insert(key, snapshot);
        events
    }

    /// An object is gone.
    pub fn deleted(&mut self, snapshot: ChildSnapshot) -> Vec<Event> {
        match self.snapshots.remove(&snapshot.key()) {
            // Already reported when its deletion timestamp was first seen.
            Some(previous) if previous.deleting => vec![],
            Some(_) => vec![Event::ChildDeleted(snapshot.child)],
            None if snapshot.is_tracked() => vec![Event::ChildDeleted(snapshot.child)],
            None => vec![],
        }
    }

    /// All objects of a kind were listed again.
    pub fn restarted(&mut self, kind: ChildKind, snapshots: Vec<ChildSnapshot>) -> Vec<Event> {
        let listed: HashSet<_> = snapshots.iter().map(ChildSnapshot::key).collect();
        let gone: Vec<ChildSnapshot> = self
            .snapshots
            .iter()
            .filter(|(key, _)| key.0 == kind && !listed.contains(*key))
            .map(|(_, snapshot)| snapshot.clone())
            .collect();
        let mut events: Vec<Event> = snapshots
            .into_iter()
            .flat_map(|snapshot| self.applied(snapshot))
            .collect();
        for snapshot in gone {
            events.extend(self.deleted(snapshot));
        }
        events
    }
}

// Events caused by the change from the previous to the current observation of a child.
fn diff(previous: Option<&ChildSnapshot>, current: &ChildSnapshot) -> Vec<Event> {
    let mut events = Vec::new();
    let child = &current.child;
    if let Some(previous) = previous {
        // Only changes away from the managed value count, reverting them is not drift.
        let controller = current.label(CONTROLLER_LABEL);
        if previous.label(CONTROLLER_LABEL) == Some(CONTROLLER_LABEL_VALUE)
            && controller != Some(CONTROLLER_LABEL_VALUE)
        {
            events.push(Event::ChildLabelDrifted {
                child: child.clone(),
                label: CONTROLLER_LABEL.to_owned(),
                old: Some(CONTROLLER_LABEL_VALUE.to_owned()),
                new: controller.map(str::to_owned),
            });
        }
        let app = current.label(APP_LABEL);
        if child.kind == ChildKind::Deployment
            && previous.label(APP_LABEL) == Some(child.name.as_str())
            && app != previous.label(APP_LABEL)
        {
            events.push(Event::ChildLabelDrifted {
                child: child.clone(),
                label: APP_LABEL.to_owned(),
                old: previous.label(APP_LABEL).map(str::to_owned),
                new: app.map(str::to_owned),
            });
        }
        // The operator's own patches are convergence, not drift.
        if previous.spec != current.spec
            && current.spec_writer.as_deref() != Some(FIELD_MANAGER)
        {
            events.push(Event::ChildSpecDrifted(child.clone()));
        }
    }
    if current.available != previous.and_then(|p| p.available.clone()) {
        if let Some(available) = &current.available {
            events.push(Event::ChildConditionsChanged {
                child: child.clone(),
                available: available.clone(),
            });
        }
    }
    if current.deleting && !previous.is_some_and(|p| p.deleting) {
        events.push(Event::ChildDeleted(child.clone()));
    }
    events
}

/// Watch all load tests and dispatch their lifecycle events.
pub async fn watch_parents<S>(k_client: Client, router: Arc<Router<S>>)
where
    S: StatsClient + 'static,
{
    let locusts: Api<Locust> = Api::all(k_client);
    let mut tracker = ParentTracker::default();
    let mut stream = watcher(locusts, watcher::Config::default())
        .default_backoff()
        .boxed();
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => tracker
                .observe(event)
                .into_iter()
                .for_each(|event| router.dispatch(event)),
            Err(err) => warn!(%err, "load test watch failed"),
        }
    }
    debug!("load test watch ended");
}

/// Watch all deployments and dispatch events of those belonging to load tests.
pub async fn watch_deployments<S>(k_client: Client, router: Arc<Router<S>>)
where
    S: StatsClient + 'static,
{
    watch_children(
        Api::<Deployment>::all(k_client),
        ChildKind::Deployment,
        ChildSnapshot::from_deployment,
        router,
    )
    .await
}

/// Watch all services and dispatch events of those belonging to load tests.
pub async fn watch_services<S>(k_client: Client, router: Arc<Router<S>>)
where
    S: StatsClient + 'static,
{
    watch_children(
        Api::<Service>::all(k_client),
        ChildKind::Service,
        ChildSnapshot::from_service,
        router,
    )
    .await
}

// A label selector would turn a drifted label into a deletion, so every object is watched
// and filtered by the tracker.
async fn watch_children<K, S>(
    api: Api<K>,
    kind: ChildKind,
    snapshot: fn(&K) -> Option<ChildSnapshot>,
    router: Arc<Router<S>>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    S: StatsClient + 'static,
{
    let mut tracker = ChildTracker::default();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    while let Some(event) = stream.next().await {
        let events = match event {
            Ok(watcher::Event::Applied(obj)) => snapshot(&obj)
                .map(|s| tracker.applied(s))
                .unwrap_or_default(),
            Ok(watcher::Event::Deleted(obj)) => snapshot(&obj)
                .map(|s| tracker.deleted(s))
                .unwrap_or_default(),
            Ok(watcher::Event::Restarted(objs)) => {
                tracker.restarted(kind, objs.iter().filter_map(snapshot).collect())
            }
            Err(err) => {
                warn!(%kind, %err, "child watch failed");
                continue;
            }
        };
        for event in events {
            debug!(event = event.kind(), "child event");
            router.dispatch(event);
        }
    }
    debug!(%kind, "child watch ended");
}
