//! In-memory cluster for testing without an API server.
//!
//! [`MockCluster`] implements every control and [`ClusterClient`] over a
//! shared in-memory store. It honours the same contracts as the kube-backed
//! controls: resource versions guard taint patches, deletes by name skip
//! missing objects, and created objects get server-assigned metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Node, NodeCondition, NodeStatus, ObjectReference, Pod, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::ResourceExt;
use parking_lot::Mutex;
use schedsim_core::filter::{self, EventFilter, NodeFilter, PodFilter};
use schedsim_core::names::{object_key, REASON_SCHEDULED};
use schedsim_core::{BatchOutcome, ItemOutcome};

use crate::cluster::{self, ClusterClient};
use crate::error::{ControlError, Result};
use crate::event::{self, EventControl};
use crate::node::{self, NodeControl};
use crate::pod::{self, namespace_of, PodControl};
use crate::selection::Selection;

#[derive(Default)]
struct MockState {
    nodes: BTreeMap<String, Node>,
    pods: BTreeMap<(String, String), Pod>,
    events: Vec<Event>,
    priority_classes: BTreeSet<String>,
    csi_nodes: BTreeSet<String>,
    revision: u64,
    event_list_failures: usize,
    event_list_calls: usize,
    failing_deletes: BTreeSet<&'static str>,
}

impl MockState {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        meta.resource_version = Some(self.next_revision());
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(Utc::now()));
    }

    fn check_delete(&self, kind: &'static str) -> Result<()> {
        if self.failing_deletes.contains(kind) {
            return Err(ControlError::Rejected(format!("injected failure deleting {kind}")));
        }
        Ok(())
    }
}

/// A mock cluster that stores objects in memory.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl MockCluster {
    /// Create an empty mock cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pod event with the given reason, timestamped now.
    pub fn push_event(&self, namespace: &str, pod: &str, reason: &str) {
        self.push_event_at(namespace, pod, reason, Utc::now());
    }

    /// Record a pod event with the given reason and timestamp.
    pub fn push_event_at(&self, namespace: &str, pod: &str, reason: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        let resource_version = state.next_revision();
        let event_type = if reason == REASON_SCHEDULED {
            "Normal"
        } else {
            "Warning"
        };
        state.events.push(Event {
            metadata: ObjectMeta {
                name: Some(format!("{pod}.{}", uuid::Uuid::new_v4().simple())),
                namespace: Some(namespace.to_string()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(pod.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            type_: Some(event_type.to_string()),
            event_time: Some(MicroTime(at)),
            ..Default::default()
        });
    }

    /// Make the next `count` event list calls fail.
    pub fn fail_next_event_lists(&self, count: usize) {
        self.state.lock().event_list_failures = count;
    }

    /// Make every bulk delete of `kind` fail until cleared.
    pub fn fail_deletes_of(&self, kind: &'static str) {
        self.state.lock().failing_deletes.insert(kind);
    }

    /// Clear injected delete failures.
    pub fn clear_delete_failures(&self) {
        self.state.lock().failing_deletes.clear();
    }

    /// Number of event list calls so far, failed ones included.
    #[must_use]
    pub fn event_list_calls(&self) -> usize {
        self.state.lock().event_list_calls
    }

    /// Register a priority class.
    pub fn add_priority_class(&self, name: &str) {
        self.state.lock().priority_classes.insert(name.to_string());
    }

    /// Register a CSI node object.
    pub fn add_csi_node(&self, name: &str) {
        self.state.lock().csi_nodes.insert(name.to_string());
    }

    /// Simulate a concurrent writer touching a node.
    pub fn touch_node(&self, name: &str) {
        let mut state = self.state.lock();
        let rv = state.next_revision();
        if let Some(node) = state.nodes.get_mut(name) {
            node.metadata.resource_version = Some(rv);
        }
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Number of stored pods across namespaces.
    #[must_use]
    pub fn pod_count(&self) -> usize {
        self.state.lock().pods.len()
    }

    /// Number of stored events across namespaces.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of stored priority classes.
    #[must_use]
    pub fn priority_class_count(&self) -> usize {
        self.state.lock().priority_classes.len()
    }

    /// Number of stored CSI node objects.
    #[must_use]
    pub fn csi_node_count(&self) -> usize {
        self.state.lock().csi_nodes.len()
    }

    fn patch_taints(&self, node: &Node, edit: impl Fn(&Node) -> Vec<Taint>) -> Result<Node> {
        let name = node.name_any();
        let mut state = self.state.lock();
        let rv = state.next_revision();
        let stored = state.nodes.get_mut(&name).ok_or_else(|| ControlError::NotFound {
            kind: node::KIND,
            name: name.clone(),
        })?;

        let taints = match node.metadata.resource_version.as_deref() {
            Some(expected) if stored.metadata.resource_version.as_deref() != Some(expected) => {
                return Err(ControlError::Conflict {
                    kind: node::KIND,
                    name,
                });
            }
            Some(_) => edit(node),
            None => edit(stored),
        };

        let spec = stored.spec.get_or_insert_with(Default::default);
        spec.taints = if taints.is_empty() { None } else { Some(taints) };
        stored.metadata.resource_version = Some(rv);
        Ok(stored.clone())
    }

    fn create_pod(&self, pod: Pod) -> Result<Pod> {
        let mut pod = pod;
        let namespace = namespace_of(&pod).to_string();
        let name = match (pod.metadata.name.clone(), pod.metadata.generate_name.as_deref()) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(prefix)) => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{prefix}{}", &suffix[..5])
            }
            _ => return Err(ControlError::MissingName(pod::KIND)),
        };

        let mut state = self.state.lock();
        let key = (namespace.clone(), name.clone());
        if state.pods.contains_key(&key) {
            return Err(ControlError::AlreadyExists {
                kind: pod::KIND,
                name: object_key(Some(&namespace), Some(&name)),
            });
        }
        pod.metadata.name = Some(name);
        pod.metadata.namespace = Some(namespace);
        state.stamp(&mut pod.metadata);
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    fn create_pods_from(&self, pods: Vec<Pod>) -> BatchOutcome<Pod, ControlError> {
        let mut outcome = BatchOutcome::new();
        for pod in pods {
            let target = object_key(
                Some(namespace_of(&pod)),
                pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()),
            );
            outcome.record(target, self.create_pod(pod));
        }
        outcome
    }
}

#[async_trait]
impl NodeControl for MockCluster {
    async fn create_nodes(&self, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        let mut outcome = BatchOutcome::new();
        for node in nodes {
            let name = node.name_any();
            let mut state = self.state.lock();
            let result = if name.is_empty() {
                Err(ControlError::MissingName(node::KIND))
            } else if state.nodes.contains_key(&name) {
                Err(ControlError::AlreadyExists {
                    kind: node::KIND,
                    name: name.clone(),
                })
            } else {
                let mut created = node::replay_safe(node);
                state.stamp(&mut created.metadata);
                state.nodes.insert(name.clone(), created.clone());
                Ok(created)
            };
            drop(state);
            outcome.record(name, result);
        }
        outcome
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.state
            .lock()
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::NotFound {
                kind: node::KIND,
                name: name.to_string(),
            })
    }

    async fn list_nodes(&self, filters: &[NodeFilter]) -> Result<Vec<Node>> {
        let nodes: Vec<Node> = self.state.lock().nodes.values().cloned().collect();
        Ok(filter::apply(nodes, filters))
    }

    async fn taint_nodes(&self, taint: &Taint, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        nodes
            .iter()
            .map(|n| {
                let result = self.patch_taints(n, |base| node::with_taint(base, taint));
                ItemOutcome {
                    target: n.name_any(),
                    result,
                }
            })
            .collect()
    }

    async fn untaint_nodes(&self, key: &str, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        nodes
            .iter()
            .map(|n| {
                let result = self.patch_taints(n, |base| node::without_taint(base, key));
                ItemOutcome {
                    target: n.name_any(),
                    result,
                }
            })
            .collect()
    }

    async fn set_node_conditions(
        &self,
        conditions: &[NodeCondition],
        names: &[String],
    ) -> BatchOutcome<Node, ControlError> {
        let mut state = self.state.lock();
        let mut outcome = BatchOutcome::new();
        for name in names {
            let rv = state.next_revision();
            let result = match state.nodes.get_mut(name) {
                Some(stored) => {
                    stored
                        .status
                        .get_or_insert_with(NodeStatus::default)
                        .conditions = Some(conditions.to_vec());
                    stored.metadata.resource_version = Some(rv);
                    Ok(stored.clone())
                }
                None => Err(ControlError::NotFound {
                    kind: node::KIND,
                    name: name.clone(),
                }),
            };
            outcome.record(name.clone(), result);
        }
        outcome
    }

    async fn delete_nodes(&self, selection: &Selection) -> Result<BatchOutcome<(), ControlError>> {
        let mut state = self.state.lock();
        state.check_delete(node::KIND)?;
        let targets: Vec<String> = state
            .nodes
            .values()
            .filter(|n| selection.matches(&n.metadata))
            .map(ResourceExt::name_any)
            .collect();
        let mut outcome = BatchOutcome::new();
        for name in targets {
            state.nodes.remove(&name);
            outcome.record(name, Ok(()));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl PodControl for MockCluster {
    async fn list_pods(&self, namespace: &str, filters: &[PodFilter]) -> Result<Vec<Pod>> {
        let pods: Vec<Pod> = self
            .state
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect();
        Ok(filter::apply(pods, filters))
    }

    async fn list_pods_matching_labels(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let selection = Selection::labels(labels);
        Ok(self
            .state
            .lock()
            .pods
            .values()
            .filter(|p| selection.matches(&p.metadata))
            .cloned()
            .collect())
    }

    async fn get_pods_by_name(&self, namespace: &str, names: &[String]) -> Result<Vec<Pod>> {
        let state = self.state.lock();
        Ok(names
            .iter()
            .filter_map(|n| state.pods.get(&(namespace.to_string(), n.clone())).cloned())
            .collect())
    }

    async fn create_pods_as_unscheduled(
        &self,
        scheduler_name: &str,
        pods: &[Pod],
    ) -> BatchOutcome<Pod, ControlError> {
        self.create_pods_from(pods.iter().map(|p| pod::unscheduled(p, scheduler_name)).collect())
    }

    async fn create_pods(&self, pods: &[Pod]) -> BatchOutcome<Pod, ControlError> {
        self.create_pods_from(pods.iter().map(pod::replay_safe).collect())
    }

    async fn delete_pods_in(
        &self,
        namespace: &str,
        selection: &Selection,
    ) -> Result<BatchOutcome<(), ControlError>> {
        let mut state = self.state.lock();
        state.check_delete(pod::KIND)?;
        let targets: Vec<(String, String)> = state
            .pods
            .iter()
            .filter(|((ns, _), p)| ns == namespace && selection.matches(&p.metadata))
            .map(|(key, _)| key.clone())
            .collect();
        let mut outcome = BatchOutcome::new();
        for key in targets {
            state.pods.remove(&key);
            outcome.record(key.1, Ok(()));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl EventControl for MockCluster {
    async fn list_events(&self, namespace: &str, filters: &[EventFilter]) -> Result<Vec<Event>> {
        let mut state = self.state.lock();
        state.event_list_calls += 1;
        if state.event_list_failures > 0 {
            state.event_list_failures -= 1;
            return Err(ControlError::Rejected("injected event list failure".to_string()));
        }
        let events: Vec<Event> = state
            .events
            .iter()
            .filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect();
        drop(state);
        Ok(filter::apply(events, filters))
    }

    async fn delete_all_events(&self, namespace: &str) -> Result<BatchOutcome<(), ControlError>> {
        let mut state = self.state.lock();
        state.check_delete(event::KIND)?;
        let mut outcome = BatchOutcome::new();
        state.events.retain(|e| {
            let doomed = e.metadata.namespace.as_deref() == Some(namespace);
            if doomed {
                outcome.record(e.name_any(), Ok(()));
            }
            !doomed
        });
        Ok(outcome)
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    type Nodes = Self;
    type Pods = Self;
    type Events = Self;

    fn nodes(&self) -> Self::Nodes {
        self.clone()
    }

    fn pods(&self) -> Self::Pods {
        self.clone()
    }

    fn events(&self) -> Self::Events {
        self.clone()
    }

    async fn delete_all_priority_classes(&self) -> Result<BatchOutcome<(), ControlError>> {
        let mut state = self.state.lock();
        state.check_delete(cluster::PRIORITY_CLASS_KIND)?;
        Ok(std::mem::take(&mut state.priority_classes)
            .into_iter()
            .map(|name| ItemOutcome::ok(name, ()))
            .collect())
    }

    async fn delete_all_csi_nodes(&self) -> Result<BatchOutcome<(), ControlError>> {
        let mut state = self.state.lock();
        state.check_delete(cluster::CSI_NODE_KIND)?;
        Ok(std::mem::take(&mut state.csi_nodes)
            .into_iter()
            .map(|name| ItemOutcome::ok(name, ()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{NodeSpec, PodSpec};
    use schedsim_core::filter::{node as node_filter, pod as pod_filter};
    use schedsim_core::names::DEFAULT_NAMESPACE;

    use super::*;

    fn node(name: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                resource_version: Some("999".to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec::default()),
            ..Default::default()
        }
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("stale-node".to_string()),
                termination_grace_period_seconds: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn simulated_taint() -> Taint {
        Taint {
            key: "schedsim/not-ready".to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_replays_read_nodes() {
        let cluster = MockCluster::new();
        let created = cluster.create_nodes(&[node("n1", &[]), node("n2", &[])]).await;

        assert!(created.is_success());
        let n1 = cluster.get_node("n1").await.unwrap();
        assert_ne!(n1.metadata.resource_version.as_deref(), Some("999"));
        assert!(n1.metadata.uid.is_some());

        let again = cluster.create_nodes(&[node("n1", &[])]).await;
        assert_eq!(again.failed_targets(), vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn taint_then_untaint_restores_taints() {
        let cluster = MockCluster::new();
        cluster.create_nodes(&[node("n1", &[])]).await;
        let original = cluster.get_node("n1").await.unwrap();

        let tainted = cluster
            .taint_nodes(&simulated_taint(), &[original.clone()])
            .await
            .into_succeeded();
        assert_eq!(node::current_taints(&tainted[0]), &[simulated_taint()]);

        let restored = cluster
            .untaint_nodes("schedsim/not-ready", &tainted)
            .await
            .into_succeeded();
        assert_eq!(
            node::current_taints(&restored[0]),
            node::current_taints(&original)
        );
    }

    #[tokio::test]
    async fn stale_taint_is_a_conflict() {
        let cluster = MockCluster::new();
        cluster.create_nodes(&[node("n1", &[]), node("n2", &[])]).await;
        let read = cluster.list_nodes(&[]).await.unwrap();
        cluster.touch_node("n1");

        let outcome = cluster.taint_nodes(&simulated_taint(), &read).await;

        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.failed_targets(), vec!["n1".to_string()]);
        assert!(matches!(
            outcome.failures().next(),
            Some((_, ControlError::Conflict { .. }))
        ));
        assert!(node::current_taints(&cluster.get_node("n1").await.unwrap()).is_empty());
        assert_eq!(
            node::current_taints(&cluster.get_node("n2").await.unwrap()).len(),
            1
        );
    }

    #[tokio::test]
    async fn unversioned_taint_keeps_existing_taints() {
        let cluster = MockCluster::new();
        let existing = Taint {
            key: "dedicated".to_string(),
            value: Some("batch".to_string()),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        };
        let mut tainted = node("n1", &[]);
        tainted.spec = Some(NodeSpec {
            taints: Some(vec![existing.clone()]),
            ..Default::default()
        });
        cluster.create_nodes(&[tainted]).await;

        let bare = Node {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let outcome = cluster.taint_nodes(&simulated_taint(), &[bare.clone()]).await;
        assert!(outcome.is_success());

        let stored = cluster.get_node("n1").await.unwrap();
        let taints = node::current_taints(&stored);
        assert_eq!(taints.len(), 2);
        assert!(taints.contains(&existing));
        assert!(taints.contains(&simulated_taint()));

        let outcome = cluster.untaint_nodes("schedsim/not-ready", &[bare]).await;
        assert!(outcome.is_success());
        assert_eq!(
            node::current_taints(&cluster.get_node("n1").await.unwrap()),
            &[existing]
        );
    }

    #[tokio::test]
    async fn create_and_untaint_brings_nodes_online() {
        let cluster = MockCluster::new();
        let mut tainted = node("n1", &[]);
        tainted.spec = Some(NodeSpec {
            taints: Some(vec![simulated_taint()]),
            ..Default::default()
        });

        let outcome = cluster
            .create_and_untaint_nodes(&[tainted], "schedsim/not-ready")
            .await;

        assert!(outcome.is_success());
        assert!(node::current_taints(&cluster.get_node("n1").await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn list_filters_are_conjunctive() {
        let cluster = MockCluster::new();
        cluster
            .create_nodes(&[
                node("pool-a-1", &[("pool", "a")]),
                node("pool-a-2", &[("pool", "a")]),
                node("pool-b-1", &[("pool", "b")]),
            ])
            .await;

        let mut labels = BTreeMap::new();
        labels.insert("pool".to_string(), "a".to_string());
        let filters = vec![node_filter::has_labels(labels), node_filter::name_contains("-2")];

        let found = cluster.list_nodes(&filters).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "pool-a-2");
        assert_eq!(cluster.list_nodes(&[]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_by_partially_missing_names() {
        let cluster = MockCluster::new();
        cluster.create_nodes(&[node("n1", &[]), node("n2", &[])]).await;

        let names = vec!["n1".to_string(), "ghost".to_string()];
        let outcome = cluster.delete_nodes_named(&names).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.len(), 1);
        assert_eq!(cluster.node_count(), 1);
        assert!(cluster.get_node("n1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unscheduled_pods_are_unbound_with_zero_grace() {
        let cluster = MockCluster::new();
        let created = cluster
            .create_pods_as_unscheduled("sim-scheduler", &[pod("p1"), pod("p2")])
            .await;
        assert!(created.is_success());

        let pending = cluster
            .list_pods(DEFAULT_NAMESPACE, &[pod_filter::not_yet_scheduled()])
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        for p in pending {
            let spec = p.spec.unwrap();
            assert_eq!(spec.node_name, None);
            assert_eq!(spec.termination_grace_period_seconds, Some(0));
            assert_eq!(spec.scheduler_name.as_deref(), Some("sim-scheduler"));
        }
    }

    #[tokio::test]
    async fn generated_names_are_assigned() {
        let cluster = MockCluster::new();
        let mut template = pod("ignored");
        template.metadata.name = None;
        template.metadata.generate_name = Some("burst-".to_string());

        let created = cluster
            .create_pods_as_unscheduled("default-scheduler", &[template.clone(), template])
            .await
            .into_succeeded();

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|p| p.name_any().starts_with("burst-")));
        assert_ne!(created[0].name_any(), created[1].name_any());
    }

    #[tokio::test]
    async fn get_pods_by_name_omits_missing() {
        let cluster = MockCluster::new();
        cluster.create_pods(&[pod("p1")]).await;

        let names = vec!["p1".to_string(), "missing".to_string()];
        let found = cluster.get_pods_by_name(DEFAULT_NAMESPACE, &names).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "p1");
    }

    #[tokio::test]
    async fn delete_pod_objects_across_namespaces() {
        let cluster = MockCluster::new();
        let mut elsewhere = pod("p2");
        elsewhere.metadata.namespace = Some("other".to_string());
        let created = cluster.create_pods(&[pod("p1"), elsewhere]).await.into_succeeded();

        let outcome = cluster.delete_pods(&created).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.len(), 2);
        assert_eq!(cluster.pod_count(), 0);
    }

    #[tokio::test]
    async fn events_are_scoped_by_namespace() {
        let cluster = MockCluster::new();
        cluster.push_event(DEFAULT_NAMESPACE, "p1", REASON_SCHEDULED);
        cluster.push_event("other", "p2", REASON_SCHEDULED);

        let deleted = cluster.delete_all_events(DEFAULT_NAMESPACE).await.unwrap();

        assert_eq!(deleted.len(), 1);
        assert_eq!(cluster.event_count(), 1);
        assert!(cluster.list_events(DEFAULT_NAMESPACE, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_delete_failure_surfaces() {
        let cluster = MockCluster::new();
        cluster.create_nodes(&[node("n1", &[])]).await;
        cluster.fail_deletes_of(node::KIND);

        assert!(cluster.delete_all_nodes().await.is_err());
        assert_eq!(cluster.node_count(), 1);

        cluster.clear_delete_failures();
        assert_eq!(cluster.delete_all_nodes().await.unwrap().len(), 1);
    }

    fn labeled_pod(name: &str, namespace: &str, labels: &[(&str, &str)]) -> Pod {
        let mut p = pod(name);
        p.metadata.namespace = Some(namespace.to_string());
        p.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        p
    }

    fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn node_conditions_are_replaced_per_name() {
        let cluster = MockCluster::new();
        cluster.create_nodes(&[node("n1", &[]), node("n2", &[])]).await;
        let ready = NodeCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        };

        let names = vec!["n1".to_string(), "ghost".to_string()];
        let outcome = cluster
            .set_node_conditions(std::slice::from_ref(&ready), &names)
            .await;

        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.failed_targets(), vec!["ghost".to_string()]);
        assert!(matches!(
            outcome.failures().next(),
            Some((_, ControlError::NotFound { .. }))
        ));
        let n1 = cluster.get_node("n1").await.unwrap();
        assert_eq!(n1.status.unwrap().conditions, Some(vec![ready]));
        assert!(cluster.get_node("n2").await.unwrap().status.is_none());
    }

    #[tokio::test]
    async fn pods_matching_labels_span_namespaces() {
        let cluster = MockCluster::new();
        cluster
            .create_pods(&[
                labeled_pod("p1", DEFAULT_NAMESPACE, &[("app", "sim"), ("tier", "web")]),
                labeled_pod("p2", "other", &[("app", "sim")]),
                labeled_pod("p3", "other", &[("app", "real")]),
            ])
            .await;

        let mut found: Vec<String> = cluster
            .list_pods_matching_labels(&label_map(&[("app", "sim")]))
            .await
            .unwrap()
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        found.sort();
        assert_eq!(found, vec!["p1".to_string(), "p2".to_string()]);

        let narrowed = cluster
            .list_pods_matching_labels(&label_map(&[("app", "sim"), ("tier", "web")]))
            .await
            .unwrap();
        assert_eq!(narrowed.len(), 1);

        let everything = cluster.list_pods_matching_labels(&BTreeMap::new()).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn delete_nodes_by_labels() {
        let cluster = MockCluster::new();
        cluster
            .create_nodes(&[
                node("pool-a-1", &[("pool", "a")]),
                node("pool-a-2", &[("pool", "a"), ("zone", "z1")]),
                node("pool-b-1", &[("pool", "b")]),
            ])
            .await;

        let outcome = cluster
            .delete_nodes_matching_labels(&label_map(&[("pool", "a")]))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.len(), 2);
        assert_eq!(cluster.node_count(), 1);
        assert!(cluster.get_node("pool-b-1").await.is_ok());
    }

    #[tokio::test]
    async fn empty_label_map_deletes_every_node() {
        let cluster = MockCluster::new();
        cluster
            .create_nodes(&[node("n1", &[("pool", "a")]), node("n2", &[])])
            .await;

        let outcome = cluster
            .delete_nodes_matching_labels(&BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.len(), 2);
        assert_eq!(cluster.node_count(), 0);
    }

    #[tokio::test]
    async fn delete_pods_by_labels_stays_in_namespace() {
        let cluster = MockCluster::new();
        cluster
            .create_pods(&[
                labeled_pod("p1", DEFAULT_NAMESPACE, &[("app", "sim")]),
                labeled_pod("p2", DEFAULT_NAMESPACE, &[("app", "real")]),
                labeled_pod("p3", "other", &[("app", "sim")]),
            ])
            .await;

        let outcome = cluster
            .delete_pods_matching_labels(DEFAULT_NAMESPACE, &label_map(&[("app", "sim")]))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.len(), 1);
        assert_eq!(cluster.pod_count(), 2);
        let left = cluster
            .get_pods_by_name(DEFAULT_NAMESPACE, &["p1".to_string(), "p2".to_string()])
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name_any(), "p2");

        let rest = cluster
            .delete_pods_matching_labels("other", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(cluster.pod_count(), 1);
    }
}
