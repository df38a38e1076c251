//! Bulk-delete selections and the one primitive that executes them.
//!
//! Every delete offered by the controls (by names, by labels, everything in a
//! scope) is a [`Selection`] handed to [`bulk_delete`]. The namespace scope is
//! carried by the [`Api`] the caller builds.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Resource, ResourceExt};
use schedsim_core::BatchOutcome;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ControlError, Result};

/// Which objects a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every object in scope.
    All,
    /// Objects with one of these names. Names that do not exist are skipped.
    Names(Vec<String>),
    /// Objects carrying all of these labels.
    Labels(BTreeMap<String, String>),
}

impl Selection {
    /// Select by name.
    #[must_use]
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::Names(names.iter().map(|n| n.as_ref().to_string()).collect())
    }

    /// Select by labels.
    #[must_use]
    pub fn labels(labels: &BTreeMap<String, String>) -> Self {
        Self::Labels(labels.clone())
    }

    /// Label selector string understood by the API server, if any.
    #[must_use]
    pub fn label_selector(&self) -> Option<String> {
        match self {
            Self::Labels(labels) => Some(
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Self::All | Self::Names(_) => None,
        }
    }

    /// Whether an object with this metadata is selected.
    #[must_use]
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => meta.name.as_ref().is_some_and(|n| names.contains(n)),
            Self::Labels(labels) => labels.iter().all(|(k, v)| {
                meta.labels
                    .as_ref()
                    .and_then(|l| l.get(k))
                    .is_some_and(|actual| actual == v)
            }),
        }
    }

    fn list_params(&self) -> ListParams {
        match self.label_selector() {
            Some(selector) if !selector.is_empty() => ListParams::default().labels(&selector),
            _ => ListParams::default(),
        }
    }
}

/// Delete the selected objects through `api`.
///
/// Targets are resolved with a list first so that every deleted object is
/// attributed in the outcome. Name selections delete one object at a time and
/// keep going past failures; label and scope selections go through a single
/// delete-collection call.
///
/// # Errors
///
/// Returns an error if resolving the targets or the delete-collection call
/// fails. Per-object failures of name selections are reported in the outcome.
pub async fn bulk_delete<K>(
    api: &Api<K>,
    kind: &'static str,
    selection: &Selection,
) -> Result<BatchOutcome<(), ControlError>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = selection.list_params();
    let targets: Vec<String> = api
        .list(&params)
        .await?
        .items
        .iter()
        .filter(|o| selection.matches(o.meta()))
        .map(ResourceExt::name_any)
        .collect();

    let mut outcome = BatchOutcome::new();
    if targets.is_empty() {
        debug!(kind, ?selection, "Nothing to delete");
        return Ok(outcome);
    }

    let delete_params = DeleteParams::default().grace_period(0);
    match selection {
        Selection::Names(_) => {
            for name in targets {
                let result = match api.delete(&name, &delete_params).await {
                    Ok(_) => Ok(()),
                    // Already gone between list and delete.
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                    Err(e) => Err(ControlError::from_kube(kind, &name, e)),
                };
                outcome.record(name, result);
            }
        }
        Selection::All | Selection::Labels(_) => {
            api.delete_collection(&delete_params, &params).await?;
            for name in targets {
                outcome.record(name, Ok(()));
            }
        }
    }

    if !outcome.is_success() {
        warn!(
            kind,
            failed = ?outcome.failed_targets(),
            "Failed to delete one or more objects"
        );
    }
    Ok(outcome)
}
