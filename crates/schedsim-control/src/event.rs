//! Event control: read and purge cluster events.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use schedsim_core::filter::{self, EventFilter};
use schedsim_core::{BatchOutcome, ShutdownSignal};

use crate::error::{ControlError, Result};
use crate::selection::{bulk_delete, Selection};
use crate::tracker::{SchedulingReport, SchedulingTracker, TrackingError};

pub(crate) const KIND: &str = "Event";

/// Operations on cluster events.
#[async_trait]
pub trait EventControl: Send + Sync {
    /// List events in `namespace` that pass every filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the list request fails.
    async fn list_events(&self, namespace: &str, filters: &[EventFilter]) -> Result<Vec<Event>>;

    /// Delete every event in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the targets cannot be resolved or the collection
    /// delete fails.
    async fn delete_all_events(&self, namespace: &str) -> Result<BatchOutcome<(), ControlError>>;

    /// Wait until every pod in `pods` has a scheduling decision.
    ///
    /// Uses a [`SchedulingTracker`] with the default poll cadence.
    ///
    /// # Errors
    ///
    /// See [`SchedulingTracker::track`].
    async fn track_pod_scheduling(
        &self,
        namespace: &str,
        since: DateTime<Utc>,
        pods: &[Pod],
        per_pod_timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> std::result::Result<SchedulingReport, TrackingError> {
        SchedulingTracker::default()
            .track(self, namespace, since, pods, per_pod_timeout, shutdown)
            .await
    }
}

/// Event control backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeEventControl {
    client: Client,
}

impl KubeEventControl {
    /// Create an event control using `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl EventControl for KubeEventControl {
    async fn list_events(&self, namespace: &str, filters: &[EventFilter]) -> Result<Vec<Event>> {
        let events = self.api(namespace).list(&ListParams::default()).await?.items;
        Ok(filter::apply(events, filters))
    }

    async fn delete_all_events(&self, namespace: &str) -> Result<BatchOutcome<(), ControlError>> {
        bulk_delete(&self.api(namespace), KIND, &Selection::All).await
    }
}
