//! Node control: create, list, taint and delete nodes.
//!
//! Taint changes are read-modify-write patches guarded by the resource
//! version captured when the node was read. A lost race is reported as
//! [`ControlError::Conflict`] for that node and never retried here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeCondition, Taint};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use schedsim_core::filter::{self, NodeFilter};
use schedsim_core::BatchOutcome;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::selection::{bulk_delete, Selection};

pub(crate) const KIND: &str = "Node";

/// Operations on cluster nodes.
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Create every node, continuing past failures.
    ///
    /// Server-assigned metadata on the inputs is ignored so that nodes read
    /// from another cluster can be replayed.
    async fn create_nodes(&self, nodes: &[Node]) -> BatchOutcome<Node, ControlError>;

    /// Fetch a single node.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotFound`] if the node does not exist.
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// List nodes that pass every filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the list request fails.
    async fn list_nodes(&self, filters: &[NodeFilter]) -> Result<Vec<Node>>;

    /// Add `taint` to each node, replacing a taint with the same key and effect.
    async fn taint_nodes(&self, taint: &Taint, nodes: &[Node]) -> BatchOutcome<Node, ControlError>;

    /// Remove every taint with `key` from each node.
    async fn untaint_nodes(&self, key: &str, nodes: &[Node]) -> BatchOutcome<Node, ControlError>;

    /// Replace the status conditions of the named nodes.
    async fn set_node_conditions(
        &self,
        conditions: &[NodeCondition],
        names: &[String],
    ) -> BatchOutcome<Node, ControlError>;

    /// Delete the selected nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the targets cannot be resolved or a collection
    /// delete fails.
    async fn delete_nodes(&self, selection: &Selection) -> Result<BatchOutcome<(), ControlError>>;

    /// Delete nodes by name. Names that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// See [`NodeControl::delete_nodes`].
    async fn delete_nodes_named(&self, names: &[String]) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_nodes(&Selection::names(names)).await
    }

    /// Delete every node.
    ///
    /// # Errors
    ///
    /// See [`NodeControl::delete_nodes`].
    async fn delete_all_nodes(&self) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_nodes(&Selection::All).await
    }

    /// Delete nodes carrying all of `labels`.
    ///
    /// # Errors
    ///
    /// See [`NodeControl::delete_nodes`].
    async fn delete_nodes_matching_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<BatchOutcome<(), ControlError>> {
        self.delete_nodes(&Selection::labels(labels)).await
    }

    /// Create nodes and then lift a taint from the ones that were created.
    ///
    /// Used to bring simulated nodes online only after they are all
    /// registered, so the scheduler never sees a partial set.
    async fn create_and_untaint_nodes(
        &self,
        nodes: &[Node],
        taint_key: &str,
    ) -> BatchOutcome<Node, ControlError> {
        let mut outcome = BatchOutcome::new();
        let mut created = Vec::new();
        for item in self.create_nodes(nodes).await.into_items() {
            match item.result {
                Ok(node) => created.push(node),
                Err(e) => outcome.record(item.target, Err(e)),
            }
        }
        outcome.extend(self.untaint_nodes(taint_key, &created).await);
        outcome
    }
}

/// A copy of `node` that the API server will accept as a new object.
#[must_use]
pub fn replay_safe(node: &Node) -> Node {
    let mut node = node.clone();
    let meta = &mut node.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.deletion_timestamp = None;
    node
}

/// Taints of `node` with `taint` added, replacing any same key and effect.
#[must_use]
pub fn with_taint(node: &Node, taint: &Taint) -> Vec<Taint> {
    let mut taints: Vec<Taint> = current_taints(node)
        .iter()
        .filter(|t| !(t.key == taint.key && t.effect == taint.effect))
        .cloned()
        .collect();
    taints.push(taint.clone());
    taints
}

/// Taints of `node` with every taint keyed `key` removed.
#[must_use]
pub fn without_taint(node: &Node, key: &str) -> Vec<Taint> {
    current_taints(node)
        .iter()
        .filter(|t| t.key != key)
        .cloned()
        .collect()
}

/// The node's taints; an absent list is empty.
#[must_use]
pub fn current_taints(node: &Node) -> &[Taint] {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or_default()
}

/// Node control backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeNodeControl {
    client: Client,
}

impl KubeNodeControl {
    /// Create a node control using `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Rewrite the taint list of one node with `edit`, guarded by the version
    /// the list was computed from.
    ///
    /// A node without a version token is read first so `edit` sees the taints
    /// currently on the server.
    async fn patch_taints<F>(&self, node: &Node, edit: F) -> Result<Node>
    where
        F: Fn(&Node) -> Vec<Taint> + Send + Sync,
    {
        let name = node.name_any();
        let api = self.api();

        let fetched;
        let base = if node.resource_version().is_some() {
            node
        } else {
            fetched = api
                .get(&name)
                .await
                .map_err(|e| ControlError::from_kube(KIND, &name, e))?;
            &fetched
        };

        let patch = taint_patch(&base.resource_version().unwrap_or_default(), &edit(base))?;
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ControlError::from_kube(KIND, &name, e))
    }
}

/// Merge patch that replaces the whole taint list at `resource_version`.
fn taint_patch(resource_version: &str, taints: &[Taint]) -> Result<serde_json::Value> {
    let taints = if taints.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::to_value(taints)?
    };
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "spec": { "taints": taints },
    }))
}

#[async_trait]
impl NodeControl for KubeNodeControl {
    async fn create_nodes(&self, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        let api = self.api();
        let mut outcome = BatchOutcome::new();

        for node in nodes {
            let name = node.name_any();
            let result = api
                .create(&PostParams::default(), &replay_safe(node))
                .await
                .map_err(|e| ControlError::from_kube(KIND, &name, e));
            if let Err(e) = &result {
                warn!(node = %name, error = %e, "Failed to create node");
            }
            outcome.record(name, result);
        }

        info!(
            requested = nodes.len(),
            failed = outcome.failed_targets().len(),
            "Created nodes"
        );
        outcome
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.api()
            .get(name)
            .await
            .map_err(|e| ControlError::from_kube(KIND, name, e))
    }

    async fn list_nodes(&self, filters: &[NodeFilter]) -> Result<Vec<Node>> {
        let nodes = self.api().list(&Default::default()).await?.items;
        Ok(filter::apply(nodes, filters))
    }

    async fn taint_nodes(&self, taint: &Taint, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        let mut outcome = BatchOutcome::new();
        for node in nodes {
            let result = self.patch_taints(node, |n| with_taint(n, taint)).await;
            if let Err(e) = &result {
                warn!(node = %node.name_any(), key = %taint.key, error = %e, "Failed to taint node");
            }
            outcome.record(node.name_any(), result);
        }
        debug!(key = %taint.key, count = nodes.len(), "Tainted nodes");
        outcome
    }

    async fn untaint_nodes(&self, key: &str, nodes: &[Node]) -> BatchOutcome<Node, ControlError> {
        let mut outcome = BatchOutcome::new();
        for node in nodes {
            let result = self.patch_taints(node, |n| without_taint(n, key)).await;
            if let Err(e) = &result {
                warn!(node = %node.name_any(), key, error = %e, "Failed to untaint node");
            }
            outcome.record(node.name_any(), result);
        }
        debug!(key, count = nodes.len(), "Untainted nodes");
        outcome
    }

    async fn set_node_conditions(
        &self,
        conditions: &[NodeCondition],
        names: &[String],
    ) -> BatchOutcome<Node, ControlError> {
        let api = self.api();
        let mut outcome = BatchOutcome::new();
        let patch = json!({ "status": { "conditions": conditions } });

        for name in names {
            let result = api
                .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| ControlError::from_kube(KIND, name, e));
            outcome.record(name.clone(), result);
        }
        outcome
    }

    async fn delete_nodes(&self, selection: &Selection) -> Result<BatchOutcome<(), ControlError>> {
        bulk_delete(&self.api(), KIND, selection).await
    }
}
