//! Control plane configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlaneError, Result};

/// Storage backend tuning passed to etcd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdTuning {
    /// Compaction mode (`revision` or `periodic`).
    #[serde(default = "EtcdTuning::default_compaction_mode")]
    pub auto_compaction_mode: String,

    /// Compaction retention, interpreted according to the mode.
    #[serde(default = "EtcdTuning::default_compaction_retention")]
    pub auto_compaction_retention: String,

    /// Backend quota in bytes.
    #[serde(default = "EtcdTuning::default_quota_backend_bytes")]
    pub quota_backend_bytes: u64,
}

impl EtcdTuning {
    fn default_compaction_mode() -> String {
        "revision".to_string()
    }

    fn default_compaction_retention() -> String {
        "5".to_string()
    }

    const fn default_quota_backend_bytes() -> u64 {
        8 * 1024 * 1024 * 1024 // 8 GiB
    }

    /// Command-line flags for etcd.
    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        vec![
            format!("--auto-compaction-mode={}", self.auto_compaction_mode),
            format!("--auto-compaction-retention={}", self.auto_compaction_retention),
            format!("--quota-backend-bytes={}", self.quota_backend_bytes),
        ]
    }
}

impl Default for EtcdTuning {
    fn default() -> Self {
        Self {
            auto_compaction_mode: Self::default_compaction_mode(),
            auto_compaction_retention: Self::default_compaction_retention(),
            quota_backend_bytes: Self::default_quota_backend_bytes(),
        }
    }
}

/// Configuration for a [`ControlPlane`](crate::ControlPlane).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// Directory holding the `etcd`, `kube-apiserver` and `kube-scheduler` binaries.
    #[serde(default)]
    pub binary_assets_dir: PathBuf,

    /// Where the kubeconfig for external consumers is written.
    #[serde(default = "PlaneConfig::default_kubeconfig_path")]
    pub kubeconfig_path: PathBuf,

    /// Whether the API server records an audit log.
    #[serde(default)]
    pub audit_logs: bool,

    /// Where the audit policy is written when audit logs are enabled.
    #[serde(default = "PlaneConfig::default_audit_policy_path")]
    pub audit_policy_path: PathBuf,

    /// Where the API server writes the audit log.
    #[serde(default = "PlaneConfig::default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// Scheduler configuration file; the embedded default is used when unset.
    #[serde(default)]
    pub scheduler_config_path: Option<PathBuf>,

    /// Scheduler binary; defaults to `kube-scheduler` in the assets directory.
    #[serde(default)]
    pub scheduler_binary: Option<PathBuf>,

    /// Storage backend tuning.
    #[serde(default)]
    pub etcd: EtcdTuning,

    /// How long each subsystem may take to report ready, in seconds.
    #[serde(default = "PlaneConfig::default_startup_timeout")]
    pub startup_timeout_seconds: u64,

    /// How long `stop` waits for the scheduler task, in seconds.
    #[serde(default = "PlaneConfig::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Whether subsystem output goes to this process's stdout and stderr.
    #[serde(default = "PlaneConfig::default_attach_output")]
    pub attach_output: bool,
}

impl PlaneConfig {
    fn default_kubeconfig_path() -> PathBuf {
        PathBuf::from("/tmp/schedsim.yaml")
    }

    fn default_audit_policy_path() -> PathBuf {
        PathBuf::from("/tmp/audit-policy.yaml")
    }

    fn default_audit_log_path() -> PathBuf {
        PathBuf::from("/tmp/schedsim-requests.log")
    }

    const fn default_startup_timeout() -> u64 {
        60
    }

    const fn default_shutdown_grace() -> u64 {
        10
    }

    const fn default_attach_output() -> bool {
        true
    }

    /// Create a config with the given binary assets directory.
    #[must_use]
    pub fn with_binary_assets_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_assets_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `BINARY_ASSETS_DIR`: directory with the subsystem binaries
    /// - `KUBECONFIG`: where to write the kubeconfig artifact
    /// - `SCHEDSIM_AUDIT_LOGS`: enable audit logging (`true`/`1`)
    /// - `SCHEDSIM_SCHEDULER_CONFIG`: scheduler configuration file
    /// - `SCHEDSIM_SCHEDULER_BINARY`: scheduler binary
    /// - `SCHEDSIM_STARTUP_TIMEOUT_SECONDS`: per-subsystem readiness timeout
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("BINARY_ASSETS_DIR") {
            config.binary_assets_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("KUBECONFIG") {
            config.kubeconfig_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("SCHEDSIM_AUDIT_LOGS") {
            config.audit_logs = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(val) = lookup("SCHEDSIM_SCHEDULER_CONFIG") {
            config.scheduler_config_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("SCHEDSIM_SCHEDULER_BINARY") {
            config.scheduler_binary = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("SCHEDSIM_STARTUP_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.startup_timeout_seconds = n;
            }
        }

        config
    }

    /// Check that the configuration can be used to start a plane.
    ///
    /// # Errors
    ///
    /// Returns `PlaneError::Config` if the binary assets directory is unset
    /// or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.binary_assets_dir.as_os_str().is_empty() {
            return Err(PlaneError::Config(
                "binary assets directory is not set (use --binary-assets-dir or BINARY_ASSETS_DIR)"
                    .to_string(),
            ));
        }
        if self.startup_timeout_seconds == 0 {
            return Err(PlaneError::Config(
                "startup timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of a binary in the assets directory.
    #[must_use]
    pub fn binary(&self, name: &str) -> PathBuf {
        self.binary_assets_dir.join(name)
    }

    /// Path of the scheduler binary.
    #[must_use]
    pub fn scheduler_binary_path(&self) -> PathBuf {
        self.scheduler_binary
            .clone()
            .unwrap_or_else(|| self.binary("kube-scheduler"))
    }

    /// Scheduler configuration file, if one was supplied.
    #[must_use]
    pub fn scheduler_config_file(&self) -> Option<&Path> {
        self.scheduler_config_path.as_deref()
    }

    /// Get the readiness timeout as a `Duration`.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Get the shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            binary_assets_dir: PathBuf::new(),
            kubeconfig_path: Self::default_kubeconfig_path(),
            audit_logs: false,
            audit_policy_path: Self::default_audit_policy_path(),
            audit_log_path: Self::default_audit_log_path(),
            scheduler_config_path: None,
            scheduler_binary: None,
            etcd: EtcdTuning::default(),
            startup_timeout_seconds: Self::default_startup_timeout(),
            shutdown_grace_seconds: Self::default_shutdown_grace(),
            attach_output: Self::default_attach_output(),
        }
    }
}
