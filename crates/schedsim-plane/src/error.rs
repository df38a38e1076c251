//! Error types for the control plane.
//!
//! [`SubsystemError`] covers everything that can go wrong while launching or
//! talking to the external processes. [`PlaneError`] is what the orchestrator
//! reports, wrapping subsystem failures with the startup step they came from.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use schedsim_control::ControlError;
use thiserror::Error;

use crate::lifecycle::PlaneState;

/// A result type using `PlaneError`.
pub type Result<T> = std::result::Result<T, PlaneError>;

/// The startup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStep {
    /// Writing the audit policy file.
    AuditPolicy,
    /// Launching the API server and its storage backend.
    ApiServer,
    /// Writing the kubeconfig artifact.
    Kubeconfig,
    /// Building a client for the API server.
    Client,
    /// Loading or rendering the scheduler configuration.
    SchedulerConfig,
    /// Starting the scheduler and waiting for it to sync.
    Scheduler,
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::AuditPolicy => "writing audit policy",
            Self::ApiServer => "launching api server",
            Self::Kubeconfig => "writing kubeconfig",
            Self::Client => "connecting client",
            Self::SchedulerConfig => "preparing scheduler config",
            Self::Scheduler => "starting scheduler",
        };
        f.write_str(step)
    }
}

/// Errors from the external subsystems.
#[derive(Debug, Error)]
pub enum SubsystemError {
    /// A required binary is not where it was expected.
    #[error("{name} binary not found at {}", path.display())]
    MissingBinary {
        /// Component name.
        name: &'static str,
        /// Expected location.
        path: PathBuf,
    },

    /// A process could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        /// Component name.
        name: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A process exited while it was expected to run.
    #[error("{name} exited unexpectedly: {status}")]
    Exited {
        /// Component name.
        name: &'static str,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// A process did not report ready in time.
    #[error("{name} not ready after {waited:?}")]
    NotReady {
        /// Component name.
        name: &'static str,
        /// How long we waited.
        waited: Duration,
    },

    /// Certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Readiness probe client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes client error.
    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// The generated kubeconfig was rejected.
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// YAML encoding or decoding failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The scheduler configuration is not usable.
    #[error("invalid scheduler configuration: {0}")]
    SchedulerConfig(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Injected or otherwise unclassified failure.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// A startup step failed; the plane is now `Failed`.
    #[error("startup failed while {step}: {source}")]
    Startup {
        /// The failing step.
        step: StartupStep,
        /// What went wrong.
        #[source]
        source: SubsystemError,
    },

    /// The requested lifecycle transition is not allowed.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: PlaneState,
        /// The requested target state.
        to: PlaneState,
    },

    /// A factory-reset step could not run.
    #[error("factory reset failed deleting {kind}: {source}")]
    Reset {
        /// Resource kind being purged.
        kind: &'static str,
        /// Underlying error.
        #[source]
        source: ControlError,
    },

    /// A factory-reset step left objects behind.
    #[error("factory reset could not delete some {kind} objects: {summary}")]
    ResetIncomplete {
        /// Resource kind being purged.
        kind: &'static str,
        /// Per-object failures.
        summary: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The plane is not running.
    #[error(transparent)]
    NotReady(#[from] NotReadyError),
}

impl PlaneError {
    /// Wrap a subsystem error with the step it failed in.
    #[must_use]
    pub const fn startup(step: StartupStep, source: SubsystemError) -> Self {
        Self::Startup { step, source }
    }

    /// The failing startup step, if this is a startup error.
    #[must_use]
    pub const fn startup_step(&self) -> Option<StartupStep> {
        match self {
            Self::Startup { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Reset { source, .. } => source.is_retriable(),
            Self::ResetIncomplete { .. } => true,
            _ => false,
        }
    }
}

/// A resource accessor was used while the plane was not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("control plane is {state}, start it before using its resources")]
pub struct NotReadyError {
    /// The state the plane was in.
    pub state: PlaneState,
}
