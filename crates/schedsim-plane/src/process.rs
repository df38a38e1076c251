//! Child process handling shared by the local subsystems.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::SubsystemError;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// A spawned subsystem binary. Killed when dropped.
#[derive(Debug)]
pub struct ManagedProcess {
    name: &'static str,
    child: Child,
}

impl ManagedProcess {
    /// Spawn `binary` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`SubsystemError::MissingBinary`] if `binary` does not exist
    /// and [`SubsystemError::Spawn`] if it cannot be executed.
    pub fn spawn(
        name: &'static str,
        binary: &Path,
        args: &[String],
        attach_output: bool,
    ) -> Result<Self, SubsystemError> {
        if !binary.is_file() {
            return Err(SubsystemError::MissingBinary {
                name,
                path: binary.to_path_buf(),
            });
        }

        let (stdout, stderr) = if attach_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SubsystemError::Spawn { name, source })?;

        info!(name, pid = child.id(), "Spawned subsystem");
        Ok(Self { name, child })
    }

    /// Component name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Fail if the process has already exited.
    ///
    /// # Errors
    ///
    /// Returns [`SubsystemError::Exited`] with the exit status.
    pub fn check_alive(&mut self) -> Result<(), SubsystemError> {
        match self.child.try_wait()? {
            Some(status) => Err(SubsystemError::Exited {
                name: self.name,
                status: status.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Wait for the process to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> Result<String, SubsystemError> {
        Ok(self.child.wait().await?.to_string())
    }

    /// Kill the process and wait up to `grace` for it to be reaped.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent or the process is
    /// not reaped in time.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), SubsystemError> {
        if self.child.try_wait()?.is_some() {
            debug!(name = self.name, "Subsystem already exited");
            return Ok(());
        }
        self.child.start_kill()?;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(name = self.name, %status, "Stopped subsystem");
                Ok(())
            }
            Err(_) => Err(SubsystemError::NotReady {
                name: self.name,
                waited: grace,
            }),
        }
    }
}

/// Reserve a free loopback port.
///
/// The port is released before returning, so another process could take it
/// before the subsystem binds.
///
/// # Errors
///
/// Returns an error if no port can be bound.
pub async fn free_port() -> Result<u16, SubsystemError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Poll `url` until it answers with a success status.
///
/// Fails early if `process` exits while waiting. A single request never
/// outlives `timeout`, so a listener that accepts but never answers cannot
/// stall startup.
///
/// # Errors
///
/// Returns [`SubsystemError::Exited`] if the process dies and
/// [`SubsystemError::NotReady`] if `timeout` elapses first.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    process: &mut ManagedProcess,
    timeout: Duration,
) -> Result<(), SubsystemError> {
    let started = tokio::time::Instant::now();
    loop {
        process.check_alive()?;
        let remaining = timeout.saturating_sub(started.elapsed());
        let request = client.get(url).timeout(remaining.min(READY_REQUEST_TIMEOUT));
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(name = process.name(), elapsed = ?started.elapsed(), "Subsystem ready");
                return Ok(());
            }
            Ok(response) => {
                debug!(name = process.name(), status = %response.status(), "Subsystem not ready yet");
            }
            Err(e) => {
                debug!(name = process.name(), error = %e, "Readiness probe failed");
            }
        }
        if started.elapsed() >= timeout {
            warn!(name = process.name(), ?timeout, "Subsystem did not become ready");
            return Err(SubsystemError::NotReady {
                name: process.name(),
                waited: timeout,
            });
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn missing_binary_is_reported() {
        let err = ManagedProcess::spawn("etcd", &PathBuf::from("/nonexistent/etcd"), &[], false)
            .unwrap_err();
        assert!(matches!(err, SubsystemError::MissingBinary { name: "etcd", .. }));
    }

    #[tokio::test]
    async fn free_ports_are_nonzero() {
        assert_ne!(free_port().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_running_process() {
        let mut process = ManagedProcess::spawn(
            "sleep",
            &PathBuf::from("/bin/sleep"),
            &["30".to_string()],
            false,
        )
        .unwrap();
        process.check_alive().unwrap();

        process.stop(Duration::from_secs(5)).await.unwrap();
        assert!(process.check_alive().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_fails_fast_when_process_exits() {
        let mut process =
            ManagedProcess::spawn("true", &PathBuf::from("/bin/true"), &[], false).unwrap();
        process.wait().await.unwrap();

        let client = reqwest::Client::new();
        let err = wait_until_ready(
            &client,
            "http://127.0.0.1:9/healthz",
            &mut process,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SubsystemError::Exited { name: "true", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_gives_up_on_a_silent_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let mut process = ManagedProcess::spawn(
            "sleep",
            &PathBuf::from("/bin/sleep"),
            &["30".to_string()],
            false,
        )
        .unwrap();

        let client = reqwest::Client::new();
        let started = std::time::Instant::now();
        let err = wait_until_ready(
            &client,
            &format!("{}/healthz", server.uri()),
            &mut process,
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SubsystemError::NotReady { name: "sleep", .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        process.stop(Duration::from_secs(5)).await.unwrap();
    }
}
