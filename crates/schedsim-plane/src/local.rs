//! Subsystems backed by real `etcd`, `kube-apiserver` and `kube-scheduler`
//! binaries.
//!
//! Everything runs on loopback with freshly picked ports. Certificates, the
//! etcd data directory and the rendered scheduler configuration live in a
//! temporary directory that is removed with the [`LocalSubsystems`].

use std::path::Path;

use async_trait::async_trait;
use schedsim_control::KubeCluster;
use schedsim_core::ShutdownSignal;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::certs::{CertificatePaths, ClusterCertificates};
use crate::config::PlaneConfig;
use crate::error::SubsystemError;
use crate::kubeconfig;
use crate::process::{free_port, wait_until_ready, ManagedProcess};
use crate::scheduler_config::SchedulerConfiguration;
use crate::subsystem::{ApiServerProcess, Connection, Subsystems};

const ETCD: &str = "etcd";
const API_SERVER: &str = "kube-apiserver";
const SCHEDULER: &str = "kube-scheduler";

const SERVICE_CLUSTER_IP_RANGE: &str = "10.0.0.0/24";
const SERVICE_ACCOUNT_ISSUER: &str = "https://kubernetes.default.svc.cluster.local";

/// Runs each subsystem as a child process.
pub struct LocalSubsystems {
    work_dir: TempDir,
}

impl LocalSubsystems {
    /// Create subsystems with a fresh working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self, SubsystemError> {
        let work_dir = tempfile::Builder::new().prefix("schedsim-").tempdir()?;
        Ok(Self { work_dir })
    }

    /// Scratch directory for this plane.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    async fn launch_etcd(&self, config: &PlaneConfig) -> Result<(ManagedProcess, String), SubsystemError> {
        let client_port = free_port().await?;
        let peer_port = free_port().await?;
        let client_url = format!("http://127.0.0.1:{client_port}");
        let peer_url = format!("http://127.0.0.1:{peer_port}");
        let data_dir = self.work_dir().join("etcd");

        let mut args = vec![
            "--name=schedsim".to_string(),
            format!("--data-dir={}", data_dir.display()),
            format!("--listen-client-urls={client_url}"),
            format!("--advertise-client-urls={client_url}"),
            format!("--listen-peer-urls={peer_url}"),
            format!("--initial-advertise-peer-urls={peer_url}"),
            format!("--initial-cluster=schedsim={peer_url}"),
            "--unsafe-no-fsync=true".to_string(),
        ];
        args.extend(config.etcd.flags());

        let mut etcd = ManagedProcess::spawn(ETCD, &config.binary(ETCD), &args, config.attach_output)?;
        let probe = reqwest::Client::new();
        wait_until_ready(
            &probe,
            &format!("{client_url}/health"),
            &mut etcd,
            config.startup_timeout(),
        )
        .await?;
        Ok((etcd, client_url))
    }

    fn api_server_args(
        config: &PlaneConfig,
        etcd_url: &str,
        port: u16,
        cert_dir: &Path,
        certs: &CertificatePaths,
    ) -> Vec<String> {
        let mut args = vec![
            format!("--etcd-servers={etcd_url}"),
            format!("--cert-dir={}", cert_dir.display()),
            format!("--tls-cert-file={}", certs.serving_cert.display()),
            format!("--tls-private-key-file={}", certs.serving_key.display()),
            format!("--client-ca-file={}", certs.ca_cert.display()),
            format!("--secure-port={port}"),
            "--bind-address=127.0.0.1".to_string(),
            "--advertise-address=127.0.0.1".to_string(),
            format!("--service-cluster-ip-range={SERVICE_CLUSTER_IP_RANGE}"),
            format!("--service-account-issuer={SERVICE_ACCOUNT_ISSUER}"),
            format!("--service-account-key-file={}", certs.service_account_key.display()),
            format!(
                "--service-account-signing-key-file={}",
                certs.service_account_key.display()
            ),
            "--authorization-mode=RBAC".to_string(),
            "--allow-privileged=true".to_string(),
            "--disable-admission-plugins=ServiceAccount".to_string(),
        ];
        if config.audit_logs {
            args.push(format!("--audit-policy-file={}", config.audit_policy_path.display()));
            args.push(format!("--audit-log-path={}", config.audit_log_path.display()));
        }
        args
    }
}

/// API server and etcd launched by [`LocalSubsystems`].
pub struct LocalApiServer {
    etcd: ManagedProcess,
    api_server: ManagedProcess,
    connection: Connection,
    grace: std::time::Duration,
}

#[async_trait]
impl ApiServerProcess for LocalApiServer {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn stop(&mut self) -> Result<(), SubsystemError> {
        let api_server = self.api_server.stop(self.grace).await;
        let etcd = self.etcd.stop(self.grace).await;
        api_server.and(etcd)
    }
}

#[async_trait]
impl Subsystems for LocalSubsystems {
    type Client = KubeCluster;
    type ApiServer = LocalApiServer;

    async fn launch_api_server(&self, config: &PlaneConfig) -> Result<Self::ApiServer, SubsystemError> {
        let cert_dir = self.work_dir().join("certs");
        tokio::fs::create_dir_all(&cert_dir).await?;
        let certs = ClusterCertificates::generate()?;
        let paths = certs.write_to(&cert_dir).await?;

        let (etcd, etcd_url) = self.launch_etcd(config).await?;

        let port = free_port().await?;
        let args = Self::api_server_args(config, &etcd_url, port, &cert_dir, &paths);
        let mut api_server =
            ManagedProcess::spawn(API_SERVER, &config.binary(API_SERVER), &args, config.attach_output)?;

        let server = format!("https://127.0.0.1:{port}");
        let mut admin_pem = certs.admin.cert_pem.clone();
        admin_pem.push_str(&certs.admin.key_pem);
        let probe = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(certs.ca.cert_pem.as_bytes())?)
            .identity(reqwest::Identity::from_pem(admin_pem.as_bytes())?)
            .build()?;
        wait_until_ready(
            &probe,
            &format!("{server}/readyz"),
            &mut api_server,
            config.startup_timeout(),
        )
        .await?;

        info!(%server, "API server ready");
        Ok(LocalApiServer {
            etcd,
            api_server,
            connection: Connection {
                server,
                ca_pem: certs.ca.cert_pem,
                client_cert_pem: certs.admin.cert_pem,
                client_key_pem: certs.admin.key_pem,
            },
            grace: config.shutdown_grace(),
        })
    }

    async fn connect(&self, connection: &Connection) -> Result<Self::Client, SubsystemError> {
        let client = kubeconfig::client_for(connection).await?;
        let version = client.apiserver_version().await?;
        info!(version = %version.git_version, "Connected to API server");
        Ok(KubeCluster::new(client))
    }

    async fn start_scheduler(
        &self,
        config: &PlaneConfig,
        scheduler: &SchedulerConfiguration,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SubsystemError> {
        let config_path = self.work_dir().join("scheduler-config.yaml");
        tokio::fs::write(&config_path, scheduler.to_yaml()?).await?;

        let port = free_port().await?;
        let kubeconfig = config.kubeconfig_path.display().to_string();
        let args = vec![
            format!("--config={}", config_path.display()),
            format!("--secure-port={port}"),
            "--bind-address=127.0.0.1".to_string(),
            format!("--authentication-kubeconfig={kubeconfig}"),
            format!("--authorization-kubeconfig={kubeconfig}"),
        ];
        let mut process = ManagedProcess::spawn(
            SCHEDULER,
            &config.scheduler_binary_path(),
            &args,
            config.attach_output,
        )?;

        // Serves a self-signed certificate.
        let probe = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        wait_until_ready(
            &probe,
            &format!("https://127.0.0.1:{port}/readyz"),
            &mut process,
            config.startup_timeout(),
        )
        .await?;
        info!(profiles = ?scheduler.scheduler_names(), "Scheduler synced");

        let grace = config.shutdown_grace();
        Ok(tokio::spawn(async move {
            let exited = tokio::select! {
                status = process.wait() => Some(status),
                () = shutdown.triggered() => None,
            };
            match exited {
                Some(Ok(status)) => error!(%status, "Scheduler exited while the plane was running"),
                Some(Err(e)) => error!(error = %e, "Lost track of scheduler process"),
                None => {
                    if let Err(e) = process.stop(grace).await {
                        warn!(error = %e, "Scheduler did not stop cleanly");
                    }
                }
            }
        }))
    }
}
