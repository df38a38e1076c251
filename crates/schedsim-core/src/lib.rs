//! Core types and utilities for schedsim.
//!
//! This crate provides the foundational pieces shared by the resource controls
//! and the control-plane orchestrator:
//!
//! - **Filters**: conjunctive predicates over nodes, pods and events
//! - **Outcomes**: per-item results of batch operations
//! - **Shutdown**: the cancellation scope shared by background tasks
//! - **Names**: well-known namespace, reason and label constants
//!
//! # Example
//!
//! ```
//! use k8s_openapi::api::core::v1::Pod;
//! use schedsim_core::filter::{self, Filter};
//!
//! let filters: Vec<Filter<Pod>> = vec![filter::pod::not_yet_scheduled()];
//! let pods = vec![Pod::default()];
//! assert_eq!(filter::apply(pods, &filters).len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod filter;
pub mod names;
pub mod outcome;
pub mod shutdown;

pub use filter::{EventFilter, Filter, NodeFilter, PodFilter};
pub use outcome::{BatchOutcome, ItemOutcome};
pub use shutdown::{Shutdown, ShutdownSignal};
