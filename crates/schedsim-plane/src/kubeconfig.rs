//! Kubeconfig artifact for the running control plane.
//!
//! The same document is written for external consumers and used to build
//! the in-process client, so both always agree on how to connect.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::config::{
    AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
    NamedContext,
};
use kube::{Client, Config};
use tracing::info;

use crate::error::SubsystemError;
use crate::subsystem::Connection;

const CLUSTER_NAME: &str = "schedsim";
const USER_NAME: &str = "schedsim-admin";
const CONTEXT_NAME: &str = "schedsim";

/// Kubeconfig with one cluster, one user and one context for `connection`.
#[must_use]
pub fn kubeconfig(connection: &Connection) -> Kubeconfig {
    Kubeconfig {
        api_version: Some("v1".to_string()),
        kind: Some("Config".to_string()),
        clusters: vec![NamedCluster {
            name: CLUSTER_NAME.to_string(),
            cluster: Some(Cluster {
                server: Some(connection.server.clone()),
                certificate_authority_data: Some(STANDARD.encode(&connection.ca_pem)),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: USER_NAME.to_string(),
            auth_info: Some(AuthInfo {
                client_certificate_data: Some(STANDARD.encode(&connection.client_cert_pem)),
                client_key_data: Some(STANDARD.encode(&connection.client_key_pem).into()),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME.to_string(),
            context: Some(Context {
                cluster: CLUSTER_NAME.to_string().into(),
                user: USER_NAME.to_string().into(),
                ..Default::default()
            }),
        }],
        current_context: Some(CONTEXT_NAME.to_string()),
        ..Default::default()
    }
}

/// Render a kubeconfig document for `connection`.
///
/// # Errors
///
/// Returns an error if YAML encoding fails.
pub fn render(connection: &Connection) -> Result<String, SubsystemError> {
    Ok(serde_yaml::to_string(&kubeconfig(connection))?)
}

/// Write the kubeconfig for `connection` to `path`.
///
/// # Errors
///
/// Returns an error if rendering or writing fails.
pub async fn write(connection: &Connection, path: &Path) -> Result<(), SubsystemError> {
    let yaml = render(connection)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, yaml).await?;
    info!(path = %path.display(), server = %connection.server, "Wrote kubeconfig");
    Ok(())
}

/// Build a client from the kubeconfig for `connection`.
///
/// # Errors
///
/// Returns an error if the document is rejected or the client cannot be built.
pub async fn client_for(connection: &Connection) -> Result<Client, SubsystemError> {
    let config = Config::from_custom_kubeconfig(kubeconfig(connection), &KubeConfigOptions::default())
        .await
        .map_err(|e| SubsystemError::Kubeconfig(e.to_string()))?;
    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection {
            server: "https://127.0.0.1:6443".to_string(),
            ca_pem: "ca".to_string(),
            client_cert_pem: "cert".to_string(),
            client_key_pem: "key".to_string(),
        }
    }

    #[test]
    fn renders_parseable_kubeconfig() {
        let yaml = render(&connection()).unwrap();
        let parsed = Kubeconfig::from_yaml(&yaml).unwrap();

        assert_eq!(parsed.current_context.as_deref(), Some(CONTEXT_NAME));
        assert_eq!(parsed.clusters.len(), 1);
        assert_eq!(parsed.clusters[0].name, CLUSTER_NAME);
        assert_eq!(parsed.auth_infos.len(), 1);
        assert_eq!(parsed.contexts[0].name, CONTEXT_NAME);
    }

    #[test]
    fn embeds_base64_credentials() {
        let yaml = render(&connection()).unwrap();

        assert!(yaml.contains("https://127.0.0.1:6443"));
        assert!(yaml.contains(&format!("certificate-authority-data: {}", STANDARD.encode("ca"))));
        assert!(yaml.contains(&format!("client-key-data: {}", STANDARD.encode("key"))));
        assert!(yaml.contains("current-context: schedsim"));
    }

    #[test]
    fn user_and_context_line_up() {
        let parsed = Kubeconfig::from_yaml(&render(&connection()).unwrap()).unwrap();

        let user = &parsed.auth_infos[0];
        assert_eq!(user.name, USER_NAME);
        let auth = user.auth_info.as_ref().unwrap();
        assert_eq!(
            auth.client_certificate_data.as_deref(),
            Some(STANDARD.encode("cert").as_str())
        );
        assert!(auth.client_key_data.is_some());

        let cluster = parsed.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some("https://127.0.0.1:6443"));
        assert!(parsed.contexts[0].context.is_some());
    }

    #[tokio::test]
    async fn writes_file_creating_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("schedsim.yaml");

        write(&connection(), &path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, render(&connection()).unwrap());
    }
}
