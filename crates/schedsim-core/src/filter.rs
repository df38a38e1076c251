//! Predicate filters over cluster objects.
//!
//! Filters compose by logical AND: an item is kept only if every filter
//! returns `true`. An empty filter list keeps everything without evaluating
//! a single predicate. Overlapping predicates on the same field are not
//! reconciled here; the author of the filter list owns that.

use k8s_openapi::api::core::v1::{Event, Node, Pod};

/// A boxed predicate over one item.
pub type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A predicate over a [`Node`].
pub type NodeFilter = Filter<Node>;

/// A predicate over a [`Pod`].
pub type PodFilter = Filter<Pod>;

/// A predicate over an [`Event`].
pub type EventFilter = Filter<Event>;

/// Check whether `item` satisfies every filter.
#[must_use]
pub fn matches_all<T>(item: &T, filters: &[Filter<T>]) -> bool {
    filters.iter().all(|f| f(item))
}

/// Keep the items that satisfy every filter.
#[must_use]
pub fn apply<T>(items: Vec<T>, filters: &[Filter<T>]) -> Vec<T> {
    if filters.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| matches_all(item, filters))
        .collect()
}

/// Stock node filters.
pub mod node {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Node;

    use super::NodeFilter;
    use crate::names::INSTANCE_TYPE_LABEL;

    /// Keep nodes whose name contains `fragment`.
    #[must_use]
    pub fn name_contains(fragment: impl Into<String>) -> NodeFilter {
        let fragment = fragment.into();
        Box::new(move |node: &Node| {
            node.metadata
                .name
                .as_deref()
                .is_some_and(|name| name.contains(fragment.as_str()))
        })
    }

    /// Keep nodes carrying every one of the given labels with equal values.
    #[must_use]
    pub fn has_labels(labels: BTreeMap<String, String>) -> NodeFilter {
        Box::new(move |node: &Node| {
            let node_labels = node.metadata.labels.as_ref();
            labels.iter().all(|(k, v)| {
                node_labels
                    .and_then(|l| l.get(k))
                    .is_some_and(|actual| actual == v)
            })
        })
    }

    /// The instance type recorded on a node, if any.
    #[must_use]
    pub fn instance_type(node: &Node) -> Option<&str> {
        node.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(INSTANCE_TYPE_LABEL))
            .map(String::as_str)
    }

    /// Find the first node in `nodes` whose instance type is `wanted`.
    ///
    /// Reference nodes act as templates when new nodes of a given machine
    /// shape are added to a simulation.
    #[must_use]
    pub fn reference_node<'a>(nodes: &'a [Node], wanted: &str) -> Option<&'a Node> {
        nodes.iter().find(|n| instance_type(n) == Some(wanted))
    }
}

/// Stock pod filters.
pub mod pod {
    use k8s_openapi::api::core::v1::Pod;

    use super::PodFilter;

    /// Keep pods that have not been bound to a node.
    #[must_use]
    pub fn not_yet_scheduled() -> PodFilter {
        Box::new(|pod: &Pod| is_unbound(pod))
    }

    /// Keep pods whose `PodScheduled` condition reports `Unschedulable`.
    #[must_use]
    pub fn scheduling_failed() -> PodFilter {
        Box::new(|pod: &Pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conditions| {
                    conditions.iter().any(|c| {
                        c.type_ == "PodScheduled" && c.reason.as_deref() == Some("Unschedulable")
                    })
                })
        })
    }

    /// Keep pods labelled `key=value`.
    #[must_use]
    pub fn has_label(key: impl Into<String>, value: impl Into<String>) -> PodFilter {
        let key = key.into();
        let value = value.into();
        Box::new(move |pod: &Pod| {
            pod.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(&key))
                .is_some_and(|v| *v == value)
        })
    }

    /// Keep pods whose name is one of `names`.
    #[must_use]
    pub fn named(names: Vec<String>) -> PodFilter {
        Box::new(move |pod: &Pod| {
            pod.metadata
                .name
                .as_ref()
                .is_some_and(|n| names.contains(n))
        })
    }

    /// Whether the pod has no node name (or an empty one).
    #[must_use]
    pub fn is_unbound(pod: &Pod) -> bool {
        pod.spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .is_none_or(str::is_empty)
    }
}

/// Stock event filters.
pub mod event {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Utc};
    use k8s_openapi::api::core::v1::Event;

    use super::EventFilter;

    /// When the event happened.
    ///
    /// Prefers the micro-precision `eventTime` written by the events API and
    /// falls back to the legacy `lastTimestamp` / `firstTimestamp` fields.
    #[must_use]
    pub fn occurred_at(event: &Event) -> Option<DateTime<Utc>> {
        event
            .event_time
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.last_timestamp.as_ref().map(|t| t.0))
            .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
    }

    /// Name of the object the event is about.
    #[must_use]
    pub fn involved_name(event: &Event) -> Option<&str> {
        event.involved_object.name.as_deref()
    }

    /// Keep events at or after `since` that concern one of `names`.
    ///
    /// Events without any timestamp are dropped.
    #[must_use]
    pub fn since_for_names(since: DateTime<Utc>, names: BTreeSet<String>) -> EventFilter {
        Box::new(move |event: &Event| {
            let recent = occurred_at(event).is_some_and(|at| at >= since);
            recent && involved_name(event).is_some_and(|n| names.contains(n))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::{Duration, Utc};
    use k8s_openapi::api::core::v1::{
        Event, Node, ObjectReference, Pod, PodCondition, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};

    use super::*;
    use crate::names::INSTANCE_TYPE_LABEL;

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
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn event(name: &str, at: chrono::DateTime<Utc>) -> Event {
        Event {
            involved_object: ObjectReference {
                name: Some(name.to_string()),
                ..Default::default()
            },
            event_time: Some(MicroTime(at)),
            ..Default::default()
        }
    }

    #[test]
    fn empty_filter_list_keeps_everything() {
        let nodes = vec![node("a", &[]), node("b", &[])];
        assert_eq!(apply(nodes, &[]).len(), 2);
    }

    #[test]
    fn filters_are_conjunctive() {
        let nodes = vec![
            node("pool-a-1", &[("zone", "z1")]),
            node("pool-a-2", &[("zone", "z2")]),
            node("pool-b-1", &[("zone", "z1")]),
        ];
        let mut wanted = BTreeMap::new();
        wanted.insert("zone".to_string(), "z1".to_string());
        let filters = vec![node::name_contains("pool-a"), node::has_labels(wanted)];

        let kept = apply(nodes, &filters);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].metadata.name.as_deref(), Some("pool-a-1"));
    }

    #[test]
    fn reference_node_by_instance_type() {
        let nodes = vec![
            node("n1", &[(INSTANCE_TYPE_LABEL, "m5.large")]),
            node("n2", &[(INSTANCE_TYPE_LABEL, "m5.xlarge")]),
        ];
        let found = node::reference_node(&nodes, "m5.xlarge").unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("n2"));
        assert!(node::reference_node(&nodes, "c5.large").is_none());
    }

    #[test]
    fn unbound_pods() {
        let unbound = Pod::default();
        let empty_name = Pod {
            spec: Some(PodSpec {
                node_name: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let bound = Pod {
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let f = pod::not_yet_scheduled();
        assert!(f(&unbound));
        assert!(f(&empty_name));
        assert!(!f(&bound));
    }

    #[test]
    fn scheduling_failed_reads_pod_condition() {
        let failed = Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "False".to_string(),
                    reason: Some("Unschedulable".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod::scheduling_failed()(&failed));
        assert!(!pod::scheduling_failed()(&Pod::default()));
    }

    #[test]
    fn event_filter_drops_old_and_foreign_events() {
        let since = Utc::now();
        let names: BTreeSet<String> = ["p1".to_string()].into_iter().collect();
        let f = event::since_for_names(since, names);

        assert!(f(&event("p1", since)));
        assert!(f(&event("p1", since + Duration::seconds(1))));
        assert!(!f(&event("p1", since - Duration::seconds(1))));
        assert!(!f(&event("p2", since + Duration::seconds(1))));
        assert!(!f(&Event::default()));
    }
}
