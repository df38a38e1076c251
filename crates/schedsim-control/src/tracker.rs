//! Scheduling-convergence tracking.
//!
//! Classifies a batch of submitted pods by polling the events the scheduler
//! records for them:
//!
//! ```text
//!            Scheduled event
//!  Pending ─────────────────────► Scheduled   (terminal)
//!     │  ▲
//!     │  │ stays pending
//!     ▼  │
//!  Unschedulable ──Scheduled event──► Scheduled
//! ```
//!
//! Tracking succeeds the moment every pod is either scheduled or has been
//! reported unschedulable. The time budget is the per-pod timeout multiplied
//! by the number of pods.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Pod};
use schedsim_core::filter::event::{involved_name, since_for_names};
use schedsim_core::names::{pod_names, REASON_FAILED_SCHEDULING, REASON_SCHEDULED};
use schedsim_core::ShutdownSignal;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::event::EventControl;

/// Poll cadence used by [`SchedulingTracker::default`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Classification of a tracked batch. The two sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingReport {
    /// Pods bound to a node.
    pub scheduled: BTreeSet<String>,
    /// Pods the scheduler reported it could not place, and has not placed since.
    pub unschedulable: BTreeSet<String>,
}

impl SchedulingReport {
    /// Number of pods with a decision.
    #[must_use]
    pub fn classified(&self) -> usize {
        self.scheduled.len() + self.unschedulable.len()
    }

    fn apply(&mut self, pending: &mut BTreeSet<String>, events: &[Event]) {
        for event in events {
            let Some(name) = involved_name(event) else {
                continue;
            };
            match event.reason.as_deref() {
                Some(REASON_SCHEDULED) => {
                    self.unschedulable.remove(name);
                    pending.remove(name);
                    if self.scheduled.insert(name.to_string()) {
                        debug!(pod = %name, "Pod scheduled");
                    }
                }
                Some(REASON_FAILED_SCHEDULING) if !self.scheduled.contains(name) => {
                    if self.unschedulable.insert(name.to_string()) {
                        debug!(pod = %name, "Pod unschedulable");
                    }
                }
                _ => {}
            }
        }
    }
}

/// Tracking ended without every pod classified.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The time budget ran out.
    #[error("timed out after {budget:?} waiting for {expected} pods to be scheduled")]
    Timeout {
        /// The whole budget that elapsed.
        budget: Duration,
        /// Number of pods tracked.
        expected: usize,
        /// What was classified before the deadline.
        report: SchedulingReport,
    },

    /// The shutdown signal fired.
    #[error("cancelled while waiting for {expected} pods to be scheduled")]
    Cancelled {
        /// Number of pods tracked.
        expected: usize,
        /// What was classified before cancellation.
        report: SchedulingReport,
    },
}

impl TrackingError {
    /// The partial classification.
    #[must_use]
    pub fn report(&self) -> &SchedulingReport {
        match self {
            Self::Timeout { report, .. } | Self::Cancelled { report, .. } => report,
        }
    }

    /// Consume the error, keeping the partial classification.
    #[must_use]
    pub fn into_report(self) -> SchedulingReport {
        match self {
            Self::Timeout { report, .. } | Self::Cancelled { report, .. } => report,
        }
    }

    /// Whether this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Polls events until a batch of pods converges.
#[derive(Debug, Clone)]
pub struct SchedulingTracker {
    poll_interval: Duration,
}

impl Default for SchedulingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl SchedulingTracker {
    /// Create a tracker polling every `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Total budget for `pods` pods at `per_pod` each.
    #[must_use]
    pub fn budget(per_pod: Duration, pods: usize) -> Duration {
        per_pod.saturating_mul(u32::try_from(pods).unwrap_or(u32::MAX))
    }

    /// Track `pods` in `namespace` until each is scheduled or unschedulable.
    ///
    /// Only events at or after `since` are considered. Failed list calls are
    /// logged and retried on the next tick. When several sources are ready at
    /// once, cancellation wins over the deadline, and both win over polling.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::Timeout`] when the budget elapses and
    /// [`TrackingError::Cancelled`] when `shutdown` fires. Both carry the
    /// partial classification.
    pub async fn track<E>(
        &self,
        events: &E,
        namespace: &str,
        since: DateTime<Utc>,
        pods: &[Pod],
        per_pod_timeout: Duration,
        mut shutdown: ShutdownSignal,
    ) -> Result<SchedulingReport, TrackingError>
    where
        E: EventControl + ?Sized,
    {
        let mut pending: BTreeSet<String> = pod_names(pods).into_iter().collect();
        let expected = pending.len();
        let mut report = SchedulingReport::default();
        if expected == 0 {
            return Ok(report);
        }

        let budget = Self::budget(per_pod_timeout, expected);

        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        let mut cadence = tokio::time::interval(self.poll_interval);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(namespace, expected, ?budget, "Tracking pod scheduling");

        loop {
            tokio::select! {
                biased;

                () = shutdown.triggered() => {
                    warn!(expected, classified = report.classified(), "Scheduling tracking cancelled");
                    return Err(TrackingError::Cancelled { expected, report });
                }
                () = &mut deadline => {
                    warn!(
                        expected,
                        classified = report.classified(),
                        pending = ?pending,
                        "Scheduling tracking timed out"
                    );
                    return Err(TrackingError::Timeout { budget, expected, report });
                }
                _ = cadence.tick() => {
                    let filters = [since_for_names(since, pending.clone())];
                    match events.list_events(namespace, &filters).await {
                        Ok(found) => report.apply(&mut pending, &found),
                        Err(e) => warn!(error = %e, "Failed to list events, will retry"),
                    }
                    if report.classified() == expected {
                        info!(
                            scheduled = report.scheduled.len(),
                            unschedulable = report.unschedulable.len(),
                            "Pod scheduling converged"
                        );
                        return Ok(report);
                    }
                }
            }
        }
    }
}
