//! The control plane orchestrator.

use schedsim_control::{ClusterClient, ControlError, EventControl, NodeControl, PodControl};
use schedsim_core::names::DEFAULT_NAMESPACE;
use schedsim_core::{BatchOutcome, Shutdown, ShutdownSignal};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit;
use crate::config::PlaneConfig;
use crate::error::{NotReadyError, PlaneError, Result, StartupStep, SubsystemError};
use crate::kubeconfig;
use crate::lifecycle::{validate_transition, PlaneState};
use crate::scheduler_config::SchedulerConfiguration;
use crate::subsystem::{ApiServerProcess, Subsystems};

/// An ephemeral control plane: API server, storage backend and scheduler.
///
/// Resource controls are handed out only while the plane is
/// [`PlaneState::Running`].
pub struct ControlPlane<S: Subsystems> {
    config: PlaneConfig,
    subsystems: S,
    shutdown: Shutdown,
    state: PlaneState,
    api_server: Option<S::ApiServer>,
    cluster: Option<S::Client>,
    scheduler: Option<JoinHandle<()>>,
}

fn at(step: StartupStep) -> impl FnOnce(SubsystemError) -> PlaneError {
    move |source| PlaneError::startup(step, source)
}

impl<S: Subsystems> ControlPlane<S> {
    /// Create a plane that will stop its background tasks when `shutdown`
    /// is triggered.
    #[must_use]
    pub fn new(config: PlaneConfig, subsystems: S, shutdown: Shutdown) -> Self {
        Self {
            config,
            subsystems,
            shutdown,
            state: PlaneState::Uninitialized,
            api_server: None,
            cluster: None,
            scheduler: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PlaneState {
        self.state
    }

    /// The configuration this plane was created with.
    #[must_use]
    pub const fn config(&self) -> &PlaneConfig {
        &self.config
    }

    /// The subsystems this plane launches.
    #[must_use]
    pub const fn subsystems(&self) -> &S {
        &self.subsystems
    }

    /// A signal that fires when the plane's cancellation scope is triggered.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Bring up the API server, write the kubeconfig, connect, and start the
    /// scheduler. Returns once the scheduler has synced.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::Config`] if the configuration is unusable,
    /// [`PlaneError::InvalidTransition`] unless the plane is uninitialized,
    /// and [`PlaneError::Startup`] naming the failed step otherwise. After a
    /// startup failure the plane is `Failed` and [`Self::stop`] releases
    /// whatever was launched.
    pub async fn start(&mut self) -> Result<()> {
        self.config.validate()?;
        self.state = validate_transition(self.state, PlaneState::Starting)?;
        info!(
            assets = %self.config.binary_assets_dir.display(),
            audit_logs = self.config.audit_logs,
            "Starting control plane"
        );

        match self.launch().await {
            Ok(()) => {
                self.state = validate_transition(self.state, PlaneState::Running)?;
                info!(kubeconfig = %self.config.kubeconfig_path.display(), "Control plane ready");
                Ok(())
            }
            Err(e) => {
                self.state = validate_transition(self.state, PlaneState::Failed)?;
                error!(error = %e, "Control plane failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&mut self) -> Result<()> {
        if self.config.audit_logs {
            audit::ensure_policy_file(&self.config.audit_policy_path)
                .await
                .map_err(|e| PlaneError::startup(StartupStep::AuditPolicy, e.into()))?;
        }

        let api_server = self
            .subsystems
            .launch_api_server(&self.config)
            .await
            .map_err(at(StartupStep::ApiServer))?;
        let connection = api_server.connection().clone();
        self.api_server = Some(api_server);
        debug!(server = %connection.server, "API server launched");

        kubeconfig::write(&connection, &self.config.kubeconfig_path)
            .await
            .map_err(at(StartupStep::Kubeconfig))?;

        let cluster = self
            .subsystems
            .connect(&connection)
            .await
            .map_err(at(StartupStep::Client))?;
        self.cluster = Some(cluster);

        let scheduler = SchedulerConfiguration::load(self.config.scheduler_config_file())
            .await
            .map_err(at(StartupStep::SchedulerConfig))?
            .bind_kubeconfig(&self.config.kubeconfig_path);
        let task = self
            .subsystems
            .start_scheduler(&self.config, &scheduler, self.shutdown.signal())
            .await
            .map_err(at(StartupStep::Scheduler))?;
        self.scheduler = Some(task);
        Ok(())
    }

    /// Tear everything down. Idempotent; teardown problems are logged.
    ///
    /// Triggers the cancellation scope, waits up to the configured grace
    /// period for the scheduler task, then stops the API server. A `Failed`
    /// plane releases whatever its start left running and stays `Failed`.
    pub async fn stop(&mut self) {
        if matches!(self.state, PlaneState::Uninitialized | PlaneState::Stopped) {
            debug!(state = %self.state, "Control plane not running, nothing to stop");
            return;
        }

        info!(state = %self.state, "Stopping control plane");
        self.shutdown.trigger();

        if let Some(mut task) = self.scheduler.take() {
            let grace = self.config.shutdown_grace();
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => debug!("Scheduler task finished"),
                Ok(Err(e)) => warn!(error = %e, "Scheduler task ended abnormally"),
                Err(_) => {
                    warn!(?grace, "Scheduler task still running after grace period, aborting");
                    task.abort();
                }
            }
        }

        self.cluster = None;

        if let Some(mut api_server) = self.api_server.take() {
            if let Err(e) = api_server.stop().await {
                warn!(error = %e, "API server did not stop cleanly");
            }
        }

        self.state = match self.state {
            PlaneState::Running => PlaneState::Stopped,
            // A start that was dropped mid-way never reached Running.
            PlaneState::Starting => PlaneState::Failed,
            other => other,
        };
        info!(state = %self.state, "Control plane stopped");
    }

    /// Delete all nodes, default-namespace pods and events, priority classes
    /// and CSI node registrations, in that order.
    ///
    /// The processes keep running. The first step that fails aborts the
    /// rest.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NotReady`] unless running, [`PlaneError::Reset`]
    /// if a step's request fails, and [`PlaneError::ResetIncomplete`] if a
    /// step left objects behind. Both name the resource kind.
    pub async fn factory_reset(&self) -> Result<()> {
        let cluster = self.cluster()?;
        info!("Factory reset started");

        info!("Removing all nodes");
        check_reset("Node", cluster.nodes().delete_all_nodes().await)?;

        info!(namespace = DEFAULT_NAMESPACE, "Removing all pods");
        check_reset("Pod", cluster.pods().delete_all_pods(DEFAULT_NAMESPACE).await)?;

        info!(namespace = DEFAULT_NAMESPACE, "Removing all events");
        check_reset(
            "Event",
            cluster.events().delete_all_events(DEFAULT_NAMESPACE).await,
        )?;

        info!("Removing all priority classes");
        check_reset("PriorityClass", cluster.delete_all_priority_classes().await)?;

        info!("Removing all CSI nodes");
        check_reset("CSINode", cluster.delete_all_csi_nodes().await)?;

        info!("Factory reset complete");
        Ok(())
    }

    /// The cluster client.
    ///
    /// # Errors
    ///
    /// Returns [`NotReadyError`] unless the plane is running.
    pub fn cluster(&self) -> std::result::Result<&S::Client, NotReadyError> {
        match (&self.cluster, self.state) {
            (Some(cluster), PlaneState::Running) => Ok(cluster),
            _ => Err(NotReadyError { state: self.state }),
        }
    }

    /// Node control for the running cluster.
    ///
    /// # Errors
    ///
    /// Returns [`NotReadyError`] unless the plane is running.
    pub fn node_control(
        &self,
    ) -> std::result::Result<<S::Client as ClusterClient>::Nodes, NotReadyError> {
        Ok(self.cluster()?.nodes())
    }

    /// Pod control for the running cluster.
    ///
    /// # Errors
    ///
    /// Returns [`NotReadyError`] unless the plane is running.
    pub fn pod_control(
        &self,
    ) -> std::result::Result<<S::Client as ClusterClient>::Pods, NotReadyError> {
        Ok(self.cluster()?.pods())
    }

    /// Event control for the running cluster.
    ///
    /// # Errors
    ///
    /// Returns [`NotReadyError`] unless the plane is running.
    pub fn event_control(
        &self,
    ) -> std::result::Result<<S::Client as ClusterClient>::Events, NotReadyError> {
        Ok(self.cluster()?.events())
    }
}

fn check_reset(
    kind: &'static str,
    result: schedsim_control::Result<BatchOutcome<(), ControlError>>,
) -> Result<()> {
    let outcome = result.map_err(|source| {
        error!(kind, error = %source, "Factory reset step failed");
        PlaneError::Reset { kind, source }
    })?;
    if !outcome.is_success() {
        let summary = outcome.failure_summary();
        error!(kind, %summary, "Factory reset left objects behind");
        return Err(PlaneError::ResetIncomplete { kind, summary });
    }
    debug!(kind, deleted = outcome.len(), "Factory reset step done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use k8s_openapi::api::core::v1::{Node, Pod};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use schedsim_core::names::REASON_SCHEDULED;

    use super::*;
    use crate::subsystem::MockSubsystems;

    fn config(dir: &Path) -> PlaneConfig {
        PlaneConfig {
            kubeconfig_path: dir.join("schedsim.yaml"),
            audit_policy_path: dir.join("audit-policy.yaml"),
            audit_log_path: dir.join("requests.log"),
            attach_output: false,
            shutdown_grace_seconds: 1,
            ..PlaneConfig::with_binary_assets_dir(dir)
        }
    }

    fn plane(dir: &Path) -> (ControlPlane<MockSubsystems>, MockSubsystems) {
        let subsystems = MockSubsystems::new();
        let plane = ControlPlane::new(config(dir), subsystems.clone(), Shutdown::new());
        (plane, subsystems)
    }

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(DEFAULT_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn populate(plane: &ControlPlane<MockSubsystems>, subsystems: &MockSubsystems) {
        let nodes = plane.node_control().unwrap();
        assert!(nodes.create_nodes(&[node("n1"), node("n2")]).await.is_success());
        let pods = plane.pod_control().unwrap();
        assert!(pods.create_pods(&[pod("p1"), pod("p2")]).await.is_success());
        subsystems.cluster().push_event(DEFAULT_NAMESPACE, "p1", REASON_SCHEDULED);
        subsystems.cluster().add_priority_class("high");
        subsystems.cluster().add_csi_node("n1");
    }

    #[tokio::test]
    async fn start_runs_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());

        plane.start().await.unwrap();

        assert_eq!(plane.state(), PlaneState::Running);
        assert_eq!(subsystems.launches(), 1);
        assert!(subsystems.scheduler_running());
        assert!(plane.node_control().is_ok());
        assert!(plane.event_control().is_ok());

        let kubeconfig = std::fs::read_to_string(dir.path().join("schedsim.yaml")).unwrap();
        assert!(kubeconfig.contains("https://127.0.0.1:6443"));

        let scheduler = subsystems.scheduler_config().unwrap();
        assert_eq!(
            Path::new(&scheduler.client_connection.kubeconfig),
            dir.path().join("schedsim.yaml")
        );
        // Audit logging is off by default.
        assert!(!dir.path().join("audit-policy.yaml").exists());
    }

    #[tokio::test]
    async fn accessors_fail_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let (plane, _) = plane(dir.path());

        let err = plane.pod_control().err().unwrap();
        assert_eq!(err.state, PlaneState::Uninitialized);
        assert!(matches!(
            plane.factory_reset().await,
            Err(PlaneError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());

        plane.stop().await;
        assert_eq!(plane.state(), PlaneState::Uninitialized);

        plane.start().await.unwrap();
        plane.stop().await;
        plane.stop().await;

        assert_eq!(plane.state(), PlaneState::Stopped);
        assert_eq!(subsystems.api_server_stops(), 1);
        assert!(!subsystems.scheduler_running());
        assert!(plane.shutdown_signal().is_triggered());
        assert!(plane.cluster().is_err());
    }

    #[tokio::test]
    async fn failure_after_launch_still_releases_api_server() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());
        subsystems.fail_at(StartupStep::Scheduler);

        let err = plane.start().await.unwrap_err();
        assert_eq!(err.startup_step(), Some(StartupStep::Scheduler));
        assert_eq!(plane.state(), PlaneState::Failed);
        assert!(plane.node_control().is_err());

        plane.stop().await;
        assert_eq!(plane.state(), PlaneState::Failed);
        assert_eq!(subsystems.api_server_stops(), 1);
    }

    #[tokio::test]
    async fn launch_failure_has_nothing_to_release() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());
        subsystems.fail_at(StartupStep::ApiServer);

        let err = plane.start().await.unwrap_err();
        assert_eq!(err.startup_step(), Some(StartupStep::ApiServer));
        assert!(!dir.path().join("schedsim.yaml").exists());

        plane.stop().await;
        assert_eq!(subsystems.api_server_stops(), 0);
        assert_eq!(plane.state(), PlaneState::Failed);
    }

    #[tokio::test]
    async fn plane_cannot_start_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());

        plane.start().await.unwrap();
        assert!(matches!(
            plane.start().await,
            Err(PlaneError::InvalidTransition {
                from: PlaneState::Running,
                to: PlaneState::Starting
            })
        ));
        assert_eq!(subsystems.launches(), 1);
    }

    #[tokio::test]
    async fn missing_assets_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut plane = ControlPlane::new(
            PlaneConfig {
                binary_assets_dir: std::path::PathBuf::new(),
                ..config(dir.path())
            },
            MockSubsystems::new(),
            Shutdown::new(),
        );

        assert!(matches!(plane.start().await, Err(PlaneError::Config(_))));
        assert_eq!(plane.state(), PlaneState::Uninitialized);
    }

    #[tokio::test]
    async fn audit_policy_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let subsystems = MockSubsystems::new();
        let mut plane = ControlPlane::new(
            PlaneConfig {
                audit_logs: true,
                ..config(dir.path())
            },
            subsystems,
            Shutdown::new(),
        );

        plane.start().await.unwrap();

        let policy = std::fs::read_to_string(dir.path().join("audit-policy.yaml")).unwrap();
        assert_eq!(policy, audit::AUDIT_POLICY);
    }

    #[tokio::test]
    async fn factory_reset_empties_the_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());
        plane.start().await.unwrap();
        populate(&plane, &subsystems).await;

        plane.factory_reset().await.unwrap();

        let cluster = subsystems.cluster();
        assert!(plane.node_control().unwrap().list_nodes(&[]).await.unwrap().is_empty());
        assert!(plane
            .pod_control()
            .unwrap()
            .list_pods(DEFAULT_NAMESPACE, &[])
            .await
            .unwrap()
            .is_empty());
        assert!(plane
            .event_control()
            .unwrap()
            .list_events(DEFAULT_NAMESPACE, &[])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(cluster.priority_class_count(), 0);
        assert_eq!(cluster.csi_node_count(), 0);
        assert_eq!(plane.state(), PlaneState::Running);
    }

    #[tokio::test]
    async fn factory_reset_stops_at_failing_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (mut plane, subsystems) = plane(dir.path());
        plane.start().await.unwrap();
        populate(&plane, &subsystems).await;
        subsystems.cluster().fail_deletes_of("Pod");

        let err = plane.factory_reset().await.unwrap_err();
        assert!(matches!(err, PlaneError::Reset { kind: "Pod", .. }));
        assert!(err.to_string().contains("Pod"));

        let cluster = subsystems.cluster();
        assert_eq!(cluster.node_count(), 0);
        assert_eq!(cluster.pod_count(), 2);
        assert_eq!(cluster.event_count(), 1);
        assert_eq!(cluster.priority_class_count(), 1);
    }
}
