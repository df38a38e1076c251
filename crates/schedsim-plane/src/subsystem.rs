//! The seam between the orchestrator and the processes it runs.
//!
//! [`Subsystems`] launches the API server (with its storage backend),
//! connects a client to it and starts the scheduler. The orchestrator only
//! sequences these calls; [`LocalSubsystems`](crate::LocalSubsystems) runs
//! real binaries and [`MockSubsystems`] runs nothing.

use async_trait::async_trait;
use schedsim_control::ClusterClient;
use schedsim_core::ShutdownSignal;
use tokio::task::JoinHandle;

use crate::config::PlaneConfig;
use crate::error::SubsystemError;
use crate::scheduler_config::SchedulerConfiguration;

/// How to reach a running API server as the admin user.
#[derive(Debug, Clone)]
pub struct Connection {
    /// HTTPS endpoint, e.g. `https://127.0.0.1:6443`.
    pub server: String,
    /// PEM CA certificate the server's certificate chains to.
    pub ca_pem: String,
    /// PEM client certificate.
    pub client_cert_pem: String,
    /// PEM client key.
    pub client_key_pem: String,
}

/// A running API server and everything it depends on.
#[async_trait]
pub trait ApiServerProcess: Send + Sync {
    /// How to connect to it.
    fn connection(&self) -> &Connection;

    /// Stop the API server and its storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if a process could not be stopped cleanly.
    async fn stop(&mut self) -> Result<(), SubsystemError>;
}

/// Launches the pieces of a control plane.
#[async_trait]
pub trait Subsystems: Send + Sync {
    /// Cluster client produced by [`Subsystems::connect`].
    type Client: ClusterClient;
    /// Handle produced by [`Subsystems::launch_api_server`].
    type ApiServer: ApiServerProcess;

    /// Launch the storage backend and the API server, and wait until the
    /// API server reports ready.
    ///
    /// # Errors
    ///
    /// Returns an error if a process fails to start or become ready.
    async fn launch_api_server(&self, config: &PlaneConfig) -> Result<Self::ApiServer, SubsystemError>;

    /// Build a cluster client for `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    async fn connect(&self, connection: &Connection) -> Result<Self::Client, SubsystemError>;

    /// Start the scheduler and wait until it has synced its caches.
    ///
    /// The returned task runs until `shutdown` fires and finishes only once
    /// the scheduler is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler fails to start or become ready.
    async fn start_scheduler(
        &self,
        config: &PlaneConfig,
        scheduler: &SchedulerConfiguration,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SubsystemError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockApiServer, MockSubsystems};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use schedsim_control::MockCluster;

    use super::*;
    use crate::error::StartupStep;

    /// Subsystems backed by a [`MockCluster`].
    #[derive(Clone, Default)]
    pub struct MockSubsystems {
        cluster: MockCluster,
        fail_at: Arc<Mutex<Option<StartupStep>>>,
        launches: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        scheduler_running: Arc<AtomicBool>,
        scheduler_config: Arc<Mutex<Option<SchedulerConfiguration>>>,
    }

    impl MockSubsystems {
        /// Create subsystems over a fresh mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// The cluster handed out by `connect`.
        #[must_use]
        pub fn cluster(&self) -> &MockCluster {
            &self.cluster
        }

        /// Make the given step fail. Only `ApiServer`, `Client` and
        /// `Scheduler` are produced here.
        pub fn fail_at(&self, step: StartupStep) {
            *self.fail_at.lock() = Some(step);
        }

        /// Number of API server launches.
        #[must_use]
        pub fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        /// Number of API server stops.
        #[must_use]
        pub fn api_server_stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }

        /// Whether the scheduler task is still running.
        #[must_use]
        pub fn scheduler_running(&self) -> bool {
            self.scheduler_running.load(Ordering::SeqCst)
        }

        /// The configuration the scheduler was started with.
        #[must_use]
        pub fn scheduler_config(&self) -> Option<SchedulerConfiguration> {
            self.scheduler_config.lock().clone()
        }

        fn check(&self, step: StartupStep) -> Result<(), SubsystemError> {
            if *self.fail_at.lock() == Some(step) {
                return Err(SubsystemError::Other(format!("injected failure while {step}")));
            }
            Ok(())
        }
    }

    /// API server handle returned by [`MockSubsystems`].
    pub struct MockApiServer {
        connection: Connection,
        stops: Arc<AtomicUsize>,
        stopped: bool,
    }

    #[async_trait]
    impl ApiServerProcess for MockApiServer {
        fn connection(&self) -> &Connection {
            &self.connection
        }

        async fn stop(&mut self) -> Result<(), SubsystemError> {
            if !self.stopped {
                self.stopped = true;
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Subsystems for MockSubsystems {
        type Client = MockCluster;
        type ApiServer = MockApiServer;

        async fn launch_api_server(
            &self,
            _config: &PlaneConfig,
        ) -> Result<Self::ApiServer, SubsystemError> {
            self.check(StartupStep::ApiServer)?;
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(MockApiServer {
                connection: Connection {
                    server: "https://127.0.0.1:6443".to_string(),
                    ca_pem: "mock-ca".to_string(),
                    client_cert_pem: "mock-cert".to_string(),
                    client_key_pem: "mock-key".to_string(),
                },
                stops: Arc::clone(&self.stops),
                stopped: false,
            })
        }

        async fn connect(&self, _connection: &Connection) -> Result<Self::Client, SubsystemError> {
            self.check(StartupStep::Client)?;
            Ok(self.cluster.clone())
        }

        async fn start_scheduler(
            &self,
            _config: &PlaneConfig,
            scheduler: &SchedulerConfiguration,
            mut shutdown: ShutdownSignal,
        ) -> Result<JoinHandle<()>, SubsystemError> {
            self.check(StartupStep::Scheduler)?;
            *self.scheduler_config.lock() = Some(scheduler.clone());
            self.scheduler_running.store(true, Ordering::SeqCst);
            let running = Arc::clone(&self.scheduler_running);
            Ok(tokio::spawn(async move {
                shutdown.triggered().await;
                running.store(false, Ordering::SeqCst);
            }))
        }
    }
}
