//! Ephemeral Kubernetes control plane for scheduling simulations.
//!
//! [`ControlPlane`] brings up etcd, an API server and a scheduler on
//! loopback, hands out the resource controls from `schedsim-control` while
//! running, and tears everything down again. Nothing persists between runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ControlPlane                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Lifecycle  │ │  Factory    │ │  Node / Pod / Event │    │
//! │  │  State      │ │  Reset      │ │  accessors          │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Subsystems
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────────┐  ┌────────────────┐
//!        │   etcd   │◀──│kube-apiserver│◀─│ kube-scheduler │
//!        └──────────┘   └──────────────┘  └────────────────┘
//! ```
//!
//! Startup writes two artifacts: the kubeconfig at
//! [`PlaneConfig::kubeconfig_path`] and, with audit logging on, the audit
//! policy at [`PlaneConfig::audit_policy_path`].
//!
//! # Usage
//!
//! ```no_run
//! use schedsim_control::NodeControl;
//! use schedsim_core::Shutdown;
//! use schedsim_plane::{ControlPlane, LocalSubsystems, PlaneConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlaneConfig::with_binary_assets_dir("/opt/kube/bin");
//! let mut plane = ControlPlane::new(config, LocalSubsystems::new()?, Shutdown::new());
//!
//! plane.start().await?;
//! let nodes = plane.node_control()?.list_nodes(&[]).await?;
//! println!("{} nodes", nodes.len());
//!
//! plane.factory_reset().await?;
//! plane.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod certs;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod lifecycle;
pub mod local;
pub mod plane;
pub mod process;
pub mod scheduler_config;
pub mod subsystem;

pub use config::{EtcdTuning, PlaneConfig};
pub use error::{NotReadyError, PlaneError, Result, StartupStep, SubsystemError};
pub use lifecycle::PlaneState;
pub use local::{LocalApiServer, LocalSubsystems};
pub use plane::ControlPlane;
pub use scheduler_config::SchedulerConfiguration;
pub use subsystem::{ApiServerProcess, Connection, Subsystems};

#[cfg(any(test, feature = "test-utils"))]
pub use subsystem::{MockApiServer, MockSubsystems};
