//! Well-known names used across the control plane.

use k8s_openapi::api::core::v1::Pod;

/// Namespace that simulations run workloads in.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Event reason the scheduler emits when a pod is bound to a node.
pub const REASON_SCHEDULED: &str = "Scheduled";

/// Event reason the scheduler emits when no node fits a pod.
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";

/// Node label carrying the machine type.
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Scheduler name used by the default kube-scheduler profile.
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

/// Names of the given pods, skipping pods without one.
#[must_use]
pub fn pod_names(pods: &[Pod]) -> Vec<String> {
    pods.iter()
        .filter_map(|p| p.metadata.name.clone())
        .collect()
}

/// Human-readable `namespace/name` key for logging.
#[must_use]
pub fn object_key(namespace: Option<&str>, name: Option<&str>) -> String {
    match (namespace, name) {
        (Some(ns), Some(n)) => format!("{ns}/{n}"),
        (None, Some(n)) => n.to_string(),
        (Some(ns), None) => format!("{ns}/<unnamed>"),
        (None, None) => "<unnamed>".to_string(),
    }
}
