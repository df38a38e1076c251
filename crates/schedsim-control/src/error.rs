//! Error types for the resource controls.

use thiserror::Error;

/// Errors that can occur during resource operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object changed since it was read; the optimistic lock was lost.
    #[error("{kind} {name} was modified concurrently")]
    Conflict {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object has neither a name nor a generate-name.
    #[error("{0} has no name")]
    MissingName(&'static str),

    /// Building a patch body failed.
    #[error("Patch encoding failed: {0}")]
    Patch(#[from] serde_json::Error),

    /// Any other API-level rejection.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl ControlError {
    /// Map a kube error into a typed control error for the given object.
    #[must_use]
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
            },
            _ => Self::KubeApi(err),
        }
    }

    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::KubeApi(_) | Self::Conflict { .. })
    }

    /// Whether this error means the object is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A specialized Result type for resource operations.
pub type Result<T> = std::result::Result<T, ControlError>;
