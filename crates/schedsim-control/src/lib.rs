//! Resource controls and scheduling-convergence tracking for schedsim.
//!
//! This crate provides thin controls over the objects a scheduling
//! simulation touches, and the tracker that waits for a submitted batch to
//! converge:
//!
//! - [`NodeControl`]: create, list, taint/untaint and delete nodes
//! - [`PodControl`]: submit workloads (optionally as unscheduled), look them up, delete them
//! - [`EventControl`]: read and purge events
//! - [`SchedulingTracker`]: classify pods as scheduled or unschedulable from events
//!
//! Batch mutations never stop at the first failure. Each target gets its own
//! entry in a [`BatchOutcome`](schedsim_core::BatchOutcome).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ClusterClient                              │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐               │
//! │  │ NodeControl │ │ PodControl  │ │EventControl │──► Tracker    │
//! │  └─────────────┘ └─────────────┘ └─────────────┘               │
//! │          │              │               │                       │
//! │          └──────────────┼───────────────┘                       │
//! │                         ▼                                       │
//! │              Selection / bulk_delete                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Kubernetes API Server                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use schedsim_control::{ClusterClient, EventControl, KubeCluster, PodControl};
//! use schedsim_core::names::{DEFAULT_NAMESPACE, DEFAULT_SCHEDULER_NAME};
//! use schedsim_core::Shutdown;
//!
//! # async fn example(client: kube::Client, pods: Vec<k8s_openapi::api::core::v1::Pod>) -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = KubeCluster::new(client);
//! let since = chrono::Utc::now();
//!
//! let created = cluster
//!     .pods()
//!     .create_pods_as_unscheduled(DEFAULT_SCHEDULER_NAME, &pods)
//!     .await
//!     .into_succeeded();
//!
//! let report = cluster
//!     .events()
//!     .track_pod_scheduling(
//!         DEFAULT_NAMESPACE,
//!         since,
//!         &created,
//!         Duration::from_secs(2),
//!         Shutdown::new().signal(),
//!     )
//!     .await?;
//! println!("scheduled: {:?}", report.scheduled);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real cluster, enable the `test-utils` feature and
//! use the in-memory cluster:
//!
//! ```ignore
//! use schedsim_control::{MockCluster, NodeControl};
//!
//! # async fn example() {
//! let cluster = MockCluster::new();
//! cluster.create_nodes(&nodes).await;
//! assert_eq!(cluster.node_count(), nodes.len());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cluster;
pub mod error;
pub mod event;
pub mod node;
pub mod pod;
pub mod selection;
pub mod tracker;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterClient, KubeCluster};
pub use error::{ControlError, Result};
pub use event::{EventControl, KubeEventControl};
pub use node::{KubeNodeControl, NodeControl};
pub use pod::{KubePodControl, PodControl};
pub use selection::Selection;
pub use tracker::{SchedulingReport, SchedulingTracker, TrackingError};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockCluster;
