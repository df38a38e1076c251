//! The cluster seam: one client handle that hands out every control.
//!
//! The orchestrator owns a [`ClusterClient`] and derives the node, pod and
//! event controls from it. Cluster-scoped purges that have no control of
//! their own (priority classes, CSI node registrations) live here.

use async_trait::async_trait;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::api::storage::v1::CSINode;
use kube::api::Api;
use kube::Client;
use schedsim_core::BatchOutcome;

use crate::error::{ControlError, Result};
use crate::event::{EventControl, KubeEventControl};
use crate::node::{KubeNodeControl, NodeControl};
use crate::pod::{KubePodControl, PodControl};
use crate::selection::{bulk_delete, Selection};

pub(crate) const PRIORITY_CLASS_KIND: &str = "PriorityClass";
pub(crate) const CSI_NODE_KIND: &str = "CSINode";

/// A connected cluster and the controls over it.
#[async_trait]
pub trait ClusterClient: Clone + Send + Sync + 'static {
    /// Node control type.
    type Nodes: NodeControl + Clone + 'static;
    /// Pod control type.
    type Pods: PodControl + Clone + 'static;
    /// Event control type.
    type Events: EventControl + Clone + 'static;

    /// Node control bound to this cluster.
    fn nodes(&self) -> Self::Nodes;

    /// Pod control bound to this cluster.
    fn pods(&self) -> Self::Pods;

    /// Event control bound to this cluster.
    fn events(&self) -> Self::Events;

    /// Delete every priority class.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge request fails.
    async fn delete_all_priority_classes(&self) -> Result<BatchOutcome<(), ControlError>>;

    /// Delete every CSI node registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge request fails.
    async fn delete_all_csi_nodes(&self) -> Result<BatchOutcome<(), ControlError>>;
}

/// A cluster reached through a Kubernetes client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap a connected client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    type Nodes = KubeNodeControl;
    type Pods = KubePodControl;
    type Events = KubeEventControl;

    fn nodes(&self) -> Self::Nodes {
        KubeNodeControl::new(self.client.clone())
    }

    fn pods(&self) -> Self::Pods {
        KubePodControl::new(self.client.clone())
    }

    fn events(&self) -> Self::Events {
        KubeEventControl::new(self.client.clone())
    }

    async fn delete_all_priority_classes(&self) -> Result<BatchOutcome<(), ControlError>> {
        let api: Api<PriorityClass> = Api::all(self.client.clone());
        bulk_delete(&api, PRIORITY_CLASS_KIND, &Selection::All).await
    }

    async fn delete_all_csi_nodes(&self) -> Result<BatchOutcome<(), ControlError>> {
        let api: Api<CSINode> = Api::all(self.client.clone());
        bulk_delete(&api, CSI_NODE_KIND, &Selection::All).await
    }
}
