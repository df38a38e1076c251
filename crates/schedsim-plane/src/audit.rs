//! API server audit policy artifact.

use std::io::ErrorKind;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Policy recording request and response bodies for every built-in API group.
pub const AUDIT_POLICY: &str = r#"apiVersion: audit.k8s.io/v1
kind: Policy
omitStages:
  - "RequestReceived"
rules:
  - level: RequestResponse
    resources:
      - group: ""
      - group: "apps"
      - group: "batch"
      - group: "autoscaling"
      - group: "policy"
      - group: "rbac.authorization.k8s.io"
      - group: "networking.k8s.io"
      - group: "storage.k8s.io"
      - group: "apiextensions.k8s.io"
      - group: "admissionregistration.k8s.io"
      - group: "coordination.k8s.io"
      - group: "events.k8s.io"
      - group: "authentication.k8s.io"
      - group: "authorization.k8s.io"
      - group: "node.k8s.io"
      - group: "scheduling.k8s.io"
      - group: "certificates.k8s.io"
      - group: "discovery.k8s.io"
"#;

/// Write the audit policy to `path` unless a file is already there.
///
/// Returns whether the file was written. An existing file is left untouched.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub async fn ensure_policy_file(path: &Path) -> std::io::Result<bool> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "Audit policy file already exists, leaving it as is");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    file.write_all(AUDIT_POLICY.as_bytes()).await?;
    file.flush().await?;
    info!(path = %path.display(), "Wrote audit policy");
    Ok(true)
}
