//! Typed events and the router delivering them to their handlers.
//!
//! Events of one parent are handled one at a time in arrival order, events of different
//! parents concurrently. Status ticks bypass the queues.
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use kube::ResourceExt;
use opentelemetry::{global, metrics::Counter, KeyValue};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, warn};

use crate::{
    locust::{
        children::ChildRef,
        conditions::on_conditions_changed,
        drift::{on_label_drift, on_spec_drift},
        error::Error,
        orphan::on_child_deleted,
        reconcile::{on_create, on_resume, on_update},
        stats::{on_status_tick, StatsClient},
        DeploymentAvailability, Locust,
    },
    utils::Context,
};

/// Identity of a load test.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentKey {
    /// Name of the load test.
    pub name: String,
    /// Namespace of the load test.
    pub namespace: String,
}

impl ParentKey {
    /// Key from a name and a namespace.
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
        }
    }

    /// Key of a load test, None when it has no namespace.
    pub fn from_locust(locust: &Locust) -> Option<Self> {
        Some(Self::new(&locust.name_any(), &locust.namespace()?))
    }

    /// Key of the load test owning a child.
    pub fn from_child(child: &ChildRef) -> Option<Self> {
        child
            .parent()
            .map(|owner| Self::new(&owner.name, &child.namespace))
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Everything the operator reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A load test appeared after the operator started.
    ParentCreated(Arc<Locust>),
    /// The spec of a load test changed.
    ParentUpdated(Arc<Locust>),
    /// A load test existed when the operator started.
    ParentResumed(Arc<Locust>),
    /// A load test is gone.
    ParentDeleted(ParentKey),
    /// An ownership label of a child changed away from its managed value.
    ChildLabelDrifted {
        /// The drifted child.
        child: ChildRef,
        /// Key of the label.
        label: String,
        /// Value before the change.
        old: Option<String>,
        /// Value after the change, None when removed.
        new: Option<String>,
    },
    /// The spec of a child changed out of band.
    ChildSpecDrifted(ChildRef),
    /// The `Available` condition of a child deployment changed.
    ChildConditionsChanged {
        /// The child deployment.
        child: ChildRef,
        /// Its new `Available` condition.
        available: DeploymentAvailability,
    },
    /// A managed child is being deleted.
    ChildDeleted(ChildRef),
    /// Time to poll the stats of a load test.
    StatusTick(ParentKey),
}

impl Event {
    /// Name of the event kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ParentCreated(_) => "parent_created",
            Event::ParentUpdated(_) => "parent_updated",
            Event::ParentResumed(_) => "parent_resumed",
            Event::ParentDeleted(_) => "parent_deleted",
            Event::ChildLabelDrifted { .. } => "child_label_drifted",
            Event::ChildSpecDrifted(_) => "child_spec_drifted",
            Event::ChildConditionsChanged { .. } => "child_conditions_changed",
            Event::ChildDeleted(_) => "child_deleted",
            Event::StatusTick(_) => "status_tick",
        }
    }

    /// The queue an event is serialized on. None for events handled right away.
    pub fn queue_key(&self) -> Option<ParentKey> {
        match self {
            Event::ParentCreated(locust)
            | Event::ParentUpdated(locust)
            | Event::ParentResumed(locust) => ParentKey::from_locust(locust),
            Event::ChildLabelDrifted { child, .. }
            | Event::ChildSpecDrifted(child)
            | Event::ChildConditionsChanged { child, .. }
            | Event::ChildDeleted(child) => ParentKey::from_child(child),
            Event::ParentDeleted(_) | Event::StatusTick(_) => None,
        }
    }

    /// The event delivered again after its handler failed.
    ///
    /// A failed creation may have left some children behind, so it comes back as an update
    /// which probes every child before creating it.
    pub fn redelivery(self) -> Self {
        match self {
            Event::ParentCreated(locust) => Event::ParentUpdated(locust),
            event => event,
        }
    }
}

/// Route a single event to its handler.
pub async fn handle<S>(cx: &Context<S>, event: &Event) -> Result<(), Error>
where
    S: StatsClient,
{
    match event {
        Event::ParentCreated(locust) => on_create(cx, locust).await,
        Event::ParentUpdated(locust) => on_update(cx, locust).await,
        Event::ParentResumed(locust) => on_resume(cx, locust).await,
        // Children are garbage collected through their owner references.
        Event::ParentDeleted(_) => Ok(()),
        Event::ChildLabelDrifted {
            child, label, old, ..
        } => on_label_drift(cx, child, label, old.as_deref()).await,
        Event::ChildSpecDrifted(child) => {
            on_spec_drift(child);
            Ok(())
        }
        Event::ChildConditionsChanged { child, available } => {
            on_conditions_changed(cx, child, available).await
        }
        Event::ChildDeleted(child) => on_child_deleted(cx, child).await,
        Event::StatusTick(key) => {
            on_status_tick(cx, &key.name, &key.namespace).await;
            Ok(())
        }
    }
}

/// Redelivery of events whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first redelivery.
    pub initial_delay: Duration,
    /// Upper bound of the doubling delay.
    pub max_delay: Duration,
    /// Attempts after which the event is dropped.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt`, counting from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Clone)]
struct EventMetrics {
    events: Counter<u64>,
}

impl EventMetrics {
    fn new() -> Self {
        let meter = global::meter("locust-operator");
        let events = meter
            .u64_counter("locust_event_count")
            .with_description("Number of handled events")
            .init();
        Self { events }
    }

    fn record(&self, kind: &'static str, result: &'static str) {
        self.events.add(
            1,
            &[KeyValue::new("event", kind), KeyValue::new("result", result)],
        );
    }
}

/// Handle an event, redelivering it while the failure is transient.
async fn handle_with_retry<S>(
    cx: &Context<S>,
    metrics: &EventMetrics,
    retry: RetryPolicy,
    mut event: Event,
) where
    S: StatsClient,
{
    let kind = event.kind();
    let mut attempt = 1;
    loop {
        let result = handle(cx, &event).await;
        match result {
            Ok(()) => {
                metrics.record(kind, "ok");
                return;
            }
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay(attempt);
                warn!(event = kind, attempt, ?delay, %err, "handler failed, retrying");
                tokio::time::sleep(delay).await;
                event = event.redelivery();
                attempt += 1;
            }
            Err(err) => {
                error!(event = kind, attempt, %err, "handler failed");
                metrics.record(kind, "err");
                return;
            }
        }
    }
}

/// Delivers events to their handlers and owns the per parent stats timers.
pub struct Router<S> {
    cx: Arc<Context<S>>,
    retry: RetryPolicy,
    metrics: EventMetrics,
    queues: Mutex<HashMap<ParentKey, mpsc::UnboundedSender<Event>>>,
    timers: Mutex<HashMap<ParentKey, JoinHandle<()>>>,
}

impl<S> Router<S>
where
    S: StatsClient + 'static,
{
    /// Create a router with no queues or timers yet.
    pub fn new(cx: Arc<Context<S>>, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            cx,
            retry,
            metrics: EventMetrics::new(),
            queues: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Accept an event. Must be called from within a tokio runtime.
    pub fn dispatch(self: &Arc<Self>, event: Event) {
        debug!(event = event.kind(), "dispatching");
        match &event {
            Event::ParentCreated(locust)
            | Event::ParentUpdated(locust)
            | Event::ParentResumed(locust) => {
                if let Some(key) = ParentKey::from_locust(locust) {
                    self.start_timer(key);
                }
            }
            Event::ParentDeleted(key) => {
                self.stop_timer(key);
                self.queues
                    .lock()
                    .expect("should be able to acquire lock")
                    .remove(key);
                self.metrics.record(event.kind(), "ok");
                return;
            }
            _ => {}
        }
        match event.queue_key() {
            Some(key) => self.enqueue(key, event),
            None => {
                let cx = self.cx.clone();
                let metrics = self.metrics.clone();
                let retry = self.retry;
                tokio::spawn(async move { handle_with_retry(&cx, &metrics, retry, event).await });
            }
        }
    }

    fn enqueue(&self, key: ParentKey, event: Event) {
        let mut queues = self.queues.lock().expect("should be able to acquire lock");
        let event = match queues.get(&key) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                // The worker of this queue is gone, start a new one.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            return;
        }
        queues.insert(key, tx);

        let cx = self.cx.clone();
        let metrics = self.metrics.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle_with_retry(&cx, &metrics, retry, event).await;
            }
        });
    }

    fn start_timer(self: &Arc<Self>, key: ParentKey) {
        let mut timers = self.timers.lock().expect("should be able to acquire lock");
        if timers.get(&key).is_some_and(|timer| !timer.is_finished()) {
            return;
        }
        let router = Arc::downgrade(self);
        let period = self.cx.stats_interval;
        let tick_key = key.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    return;
                };
                router.dispatch(Event::StatusTick(tick_key.clone()));
            }
        });
        debug!(parent = %key, "stats timer started");
        timers.insert(key, timer);
    }

    fn stop_timer(&self, key: &ParentKey) {
        let timer = self
            .timers
            .lock()
            .expect("should be able to acquire lock")
            .remove(key);
        if let Some(timer) = timer {
            timer.abort();
            debug!(parent = %key, "stats timer stopped");
        }
    }

    #[cfg(test)]
    fn has_timer(&self, key: &ParentKey) -> bool {
        self.timers
            .lock()
            .expect("should be able to acquire lock")
            .contains_key(key)
    }
}
