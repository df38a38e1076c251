//! Scheduler configuration.
//!
//! Only the fields the orchestrator reads or rewrites are typed. Everything
//! else in the document is carried through untouched, so any configuration
//! the scheduler accepts can be supplied.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::SubsystemError;

const EMBEDDED: &str = include_str!("scheduler-config.yaml");

const API_GROUP_PREFIX: &str = "kubescheduler.config.k8s.io/";
const KIND: &str = "KubeSchedulerConfiguration";

/// A `KubeSchedulerConfiguration` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfiguration {
    /// Versioned config API, e.g. `kubescheduler.config.k8s.io/v1`.
    pub api_version: String,
    /// Always `KubeSchedulerConfiguration`.
    pub kind: String,
    /// How the scheduler reaches the API server.
    #[serde(default)]
    pub client_connection: ClientConnection,
    /// Leader election settings.
    #[serde(default)]
    pub leader_election: LeaderElection,
    /// Share of feasible nodes to score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_of_nodes_to_score: Option<i32>,
    /// Scheduling profiles.
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// `clientConnection` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConnection {
    /// Path of the kubeconfig the scheduler uses.
    #[serde(default)]
    pub kubeconfig: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// `leaderElection` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElection {
    /// Whether the scheduler competes for a lease before scheduling.
    #[serde(default)]
    pub leader_elect: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// One entry of `profiles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Name pods use in `spec.schedulerName` to select this profile.
    pub scheduler_name: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl SchedulerConfiguration {
    /// The built-in configuration: a single default profile scoring every node.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded document does not parse.
    pub fn embedded() -> Result<Self, SubsystemError> {
        Self::parse(EMBEDDED)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or invalid.
    pub fn parse(yaml: &str) -> Result<Self, SubsystemError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub async fn from_file(path: &Path) -> Result<Self, SubsystemError> {
        let yaml = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), "Loaded scheduler configuration");
        Self::parse(&yaml)
    }

    /// Load the file at `path`, or the embedded configuration when `None`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_file`] and [`Self::embedded`].
    pub async fn load(path: Option<&Path>) -> Result<Self, SubsystemError> {
        match path {
            Some(path) => Self::from_file(path).await,
            None => Self::embedded(),
        }
    }

    /// Point the scheduler at `kubeconfig` and disable leader election.
    #[must_use]
    pub fn bind_kubeconfig(mut self, kubeconfig: &Path) -> Self {
        self.client_connection.kubeconfig = kubeconfig.display().to_string();
        self.leader_election.leader_elect = false;
        self
    }

    /// Check the fields the scheduler would otherwise reject at startup.
    ///
    /// # Errors
    ///
    /// Returns [`SubsystemError::SchedulerConfig`] describing the problem.
    pub fn validate(&self) -> Result<(), SubsystemError> {
        if !self.api_version.starts_with(API_GROUP_PREFIX) {
            return Err(SubsystemError::SchedulerConfig(format!(
                "unsupported apiVersion {:?}",
                self.api_version
            )));
        }
        if self.kind != KIND {
            return Err(SubsystemError::SchedulerConfig(format!(
                "expected kind {KIND}, got {:?}",
                self.kind
            )));
        }
        if let Some(pct) = self.percentage_of_nodes_to_score {
            if !(0..=100).contains(&pct) {
                return Err(SubsystemError::SchedulerConfig(format!(
                    "percentageOfNodesToScore must be between 0 and 100, got {pct}"
                )));
            }
        }
        Ok(())
    }

    /// Render as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_yaml(&self) -> Result<String, SubsystemError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Scheduler names served by this configuration.
    #[must_use]
    pub fn scheduler_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.scheduler_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn embedded_config_is_valid() {
        let config = SchedulerConfiguration::embedded().unwrap();
        assert_eq!(config.kind, KIND);
        assert_eq!(config.percentage_of_nodes_to_score, Some(100));
        assert_eq!(config.scheduler_names(), vec!["default-scheduler"]);
        assert!(!config.leader_election.leader_elect);
    }

    #[test]
    fn binding_sets_kubeconfig_and_disables_election() {
        let yaml = "\
apiVersion: kubescheduler.config.k8s.io/v1
kind: KubeSchedulerConfiguration
leaderElection:
  leaderElect: true
profiles:
  - schedulerName: sim
";
        let config = SchedulerConfiguration::parse(yaml)
            .unwrap()
            .bind_kubeconfig(&PathBuf::from("/tmp/schedsim.yaml"));

        assert_eq!(config.client_connection.kubeconfig, "/tmp/schedsim.yaml");
        assert!(!config.leader_election.leader_elect);
        assert!(config.to_yaml().unwrap().contains("kubeconfig: /tmp/schedsim.yaml"));
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let yaml = "\
apiVersion: kubescheduler.config.k8s.io/v1
kind: KubeSchedulerConfiguration
parallelism: 32
clientConnection:
  qps: 100
profiles:
  - schedulerName: sim
    plugins:
      score:
        disabled:
          - name: NodeResourcesBalancedAllocation
";
        let config = SchedulerConfiguration::parse(yaml).unwrap();
        let rendered = config.to_yaml().unwrap();

        assert!(rendered.contains("parallelism: 32"));
        assert!(rendered.contains("qps: 100"));
        assert!(rendered.contains("NodeResourcesBalancedAllocation"));
        assert_eq!(SchedulerConfiguration::parse(&rendered).unwrap(), config);
    }

    #[test]
    fn rejects_wrong_kind_and_bad_percentage() {
        let wrong_kind = "apiVersion: kubescheduler.config.k8s.io/v1\nkind: Policy\n";
        assert!(matches!(
            SchedulerConfiguration::parse(wrong_kind),
            Err(SubsystemError::SchedulerConfig(_))
        ));

        let bad_pct = "apiVersion: kubescheduler.config.k8s.io/v1\nkind: KubeSchedulerConfiguration\npercentageOfNodesToScore: 150\n";
        assert!(matches!(
            SchedulerConfiguration::parse(bad_pct),
            Err(SubsystemError::SchedulerConfig(_))
        ));

        let wrong_group = "apiVersion: v1\nkind: KubeSchedulerConfiguration\n";
        assert!(SchedulerConfiguration::parse(wrong_group).is_err());
    }

    #[tokio::test]
    async fn load_prefers_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.yaml");
        std::fs::write(
            &path,
            "apiVersion: kubescheduler.config.k8s.io/v1\nkind: KubeSchedulerConfiguration\nprofiles:\n  - schedulerName: custom\n",
        )
        .unwrap();

        let from_file = SchedulerConfiguration::load(Some(&path)).await.unwrap();
        assert_eq!(from_file.scheduler_names(), vec!["custom"]);

        let embedded = SchedulerConfiguration::load(None).await.unwrap();
        assert_eq!(embedded.scheduler_names(), vec!["default-scheduler"]);
    }
}
