//! Pod control: submit, look up and delete workloads.
//!
//! Workloads are created either as submitted by the caller or rebuilt as
//! unscheduled copies addressed to a specific scheduler. Both paths zero the
//! termination grace period so bulk deletes between simulation runs are fast.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use schedsim_core::filter::{self, PodFilter};
use schedsim_core::names::{object_key, DEFAULT_NAMESPACE};
use schedsim_core::BatchOutcome;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::selection::{bulk_delete, Selection};

pub(crate) const KIND: &str = "Pod";

/// Operations on workloads.
#[async_trait]
pub trait PodControl: Send + Sync {
    /// List pods in `namespace` that pass every filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the list request fails.
    async fn list_pods(&self, namespace: &str, filters: &[PodFilter]) -> Result<Vec<Pod>>;

    /// List pods in every namespace carrying all of `labels`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list request fails.
    async fn list_pods_matching_labels(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>>;

    /// Fetch the named pods from `namespace`. Missing pods are left out.
    ///
    /// # Errors
    ///
    /// Returns an error on the first lookup that fails for any reason other
    /// than the pod not existing.
    async fn get_pods_by_name(&self, namespace: &str, names: &[String]) -> Result<Vec<Pod>>;

    /// Create unscheduled copies of `pods` for `scheduler_name`.
    ///
    /// See [`unscheduled`] for what is kept from each input.
    async fn create_pods_as_unscheduled(
        &self,
        scheduler_name: &str,
        pods: &[Pod],
    ) -> BatchOutcome<Pod, ControlError>;

    /// Create `pods` as given, minus server-assigned fields.
    async fn create_pods(&self, pods: &[Pod]) -> BatchOutcome<Pod, ControlError>;

    /// Delete the selected pods in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the targets cannot be resolved or a collection
    /// delete fails.
    async fn delete_pods_in(
        &self,
        namespace: &str,
        selection: &Selection,
    ) -> Result<BatchOutcome<(), ControlError>>;

    /// Delete the given pod objects, each in its own namespace.
    ///
    /// A namespace whose targets cannot be resolved reports every one of its
    /// pods as failed.
    async fn delete_pods(&self, pods: &[Pod]) -> BatchOutcome<(), ControlError> {
        let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pod in pods {
            by_namespace
                .entry(namespace_of(pod).to_string())
                .or_default()
                .push(pod.name_any());
        }

        let mut outcome = BatchOutcome::new();
        for (namespace, names) in by_namespace {
            match self.delete_pods_in(&namespace, &Selection::names(&names)).await {
                Ok(deleted) => outcome.extend(deleted),
                Err(e) => {
                    let reason = e.to_string();
                    for name in names {
                        outcome.record(
                            object_key(Some(&namespace), Some(&name)),
                            Err(ControlError::Rejected(reason.clone())),
                        );
                    }
                }
            }
        }
        outcome
    }

    /// Delete pods in `namespace` by name. Names that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// See [`PodControl::delete_pods_in`].
    async fn delete_pods_matching_names(
        &self,
        namespace: &str,
        names: &[String],
    ) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_pods_in(namespace, &Selection::names(names)).await
    }

    /// Delete every pod in `namespace`.
    ///
    /// # Errors
    ///
    /// See [`PodControl::delete_pods_in`].
    async fn delete_all_pods(&self, namespace: &str) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_pods_in(namespace, &Selection::All).await
    }

    /// Delete pods in `namespace` carrying all of `labels`.
    ///
    /// # Errors
    ///
    /// See [`PodControl::delete_pods_in`].
    async fn delete_pods_matching_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_pods_in(namespace, &Selection::labels(labels)).await
    }
}

/// Namespace of `pod`, defaulting like the API server does.
#[must_use]
pub fn namespace_of(pod: &Pod) -> &str {
    pod.metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// A copy of `pod` the API server will accept as a new object.
///
/// Drops server-assigned identity and forces a zero termination grace period.
#[must_use]
pub fn replay_safe(pod: &Pod) -> Pod {
    let mut pod = pod.clone();
    let meta = &mut pod.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.deletion_timestamp = None;
    if let Some(spec) = pod.spec.as_mut() {
        spec.termination_grace_period_seconds = Some(0);
    }
    pod
}

/// An unscheduled copy of `pod` addressed to `scheduler_name`.
///
/// Only namespace, owner references, labels, annotations and the name (or
/// generate-name when no name is set) survive from the input metadata. The
/// bound node is cleared, the grace period zeroed and status dropped.
#[must_use]
pub fn unscheduled(pod: &Pod, scheduler_name: &str) -> Pod {
    let source = &pod.metadata;
    let (name, generate_name) = match source.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => (Some(name.to_string()), None),
        None => (None, source.generate_name.clone()),
    };

    let mut spec = pod.spec.clone().unwrap_or_default();
    spec.node_name = None;
    spec.scheduler_name = Some(scheduler_name.to_string());
    spec.termination_grace_period_seconds = Some(0);

    Pod {
        metadata: ObjectMeta {
            name,
            generate_name,
            namespace: Some(namespace_of(pod).to_string()),
            owner_references: source.owner_references.clone(),
            labels: source.labels.clone(),
            annotations: source.annotations.clone(),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

fn display_name(pod: &Pod) -> String {
    let name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref());
    object_key(Some(namespace_of(pod)), name)
}

/// Pod control backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubePodControl {
    client: Client,
}

impl KubePodControl {
    /// Create a pod control using `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn submit(&self, pod: Pod) -> Result<Pod> {
        let target = display_name(&pod);
        if pod.metadata.name.is_none() && pod.metadata.generate_name.is_none() {
            return Err(ControlError::MissingName(KIND));
        }
        self.api(namespace_of(&pod))
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| ControlError::from_kube(KIND, &target, e))
    }

    async fn submit_all(&self, pods: Vec<Pod>) -> BatchOutcome<Pod, ControlError> {
        let requested = pods.len();
        let mut outcome = BatchOutcome::new();
        for pod in pods {
            let target = display_name(&pod);
            let result = self.submit(pod).await;
            if let Err(e) = &result {
                warn!(pod = %target, error = %e, "Failed to create pod");
            }
            outcome.record(target, result);
        }
        info!(
            requested,
            failed = outcome.failed_targets().len(),
            "Created pods"
        );
        outcome
    }
}

#[async_trait]
impl PodControl for KubePodControl {
    async fn list_pods(&self, namespace: &str, filters: &[PodFilter]) -> Result<Vec<Pod>> {
        let pods = self.api(namespace).list(&ListParams::default()).await?.items;
        Ok(filter::apply(pods, filters))
    }

    async fn list_pods_matching_labels(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = match Selection::labels(labels).label_selector() {
            Some(selector) if !selector.is_empty() => ListParams::default().labels(&selector),
            _ => ListParams::default(),
        };
        Ok(api.list(&params).await?.items)
    }

    async fn get_pods_by_name(&self, namespace: &str, names: &[String]) -> Result<Vec<Pod>> {
        let api = self.api(namespace);
        let mut pods = Vec::with_capacity(names.len());
        for name in names {
            match api.get_opt(name).await {
                Ok(Some(pod)) => pods.push(pod),
                Ok(None) => debug!(namespace, pod = %name, "Pod not found, skipping"),
                Err(e) => return Err(ControlError::from_kube(KIND, name, e)),
            }
        }
        Ok(pods)
    }

    async fn create_pods_as_unscheduled(
        &self,
        scheduler_name: &str,
        pods: &[Pod],
    ) -> BatchOutcome<Pod, ControlError> {
        let copies = pods.iter().map(|p| unscheduled(p, scheduler_name)).collect();
        self.submit_all(copies).await
    }

    async fn create_pods(&self, pods: &[Pod]) -> BatchOutcome<Pod, ControlError> {
        self.submit_all(pods.iter().map(replay_safe).collect()).await
    }

    async fn delete_pods_in(
        &self,
        namespace: &str,
        selection: &Selection,
    ) -> Result<BatchOutcome<(), ControlError>> {
        bulk_delete(&self.api(namespace), KIND, selection).await
    }
}
