//! Local-process worker host.
//!
//! Runs each algorithm worker as a child process. The "volume" is a state
//! directory named after the suggestion; it survives scale-to-zero so a
//! FromVolume restart rehydrates from it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Suggestion;
use crate::domain::ports::{SuggestionWorkerConfig, WorkerEndpoint, WorkerHost};

#[derive(Debug, Clone)]
pub struct LocalWorkerHostConfig {
    /// State directories (the volumes) live under this root.
    pub state_root: PathBuf,
    pub connect_timeout: Duration,
}

impl Default for LocalWorkerHostConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from(".tunelab/workers"),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

struct WorkerProcess {
    child: Option<Child>,
    endpoint: WorkerEndpoint,
}

pub struct LocalWorkerHost {
    config: LocalWorkerHostConfig,
    workers: Mutex<HashMap<String, WorkerProcess>>,
}

impl LocalWorkerHost {
    pub fn new(config: LocalWorkerHostConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn state_dir(&self, suggestion: &Suggestion) -> PathBuf {
        self.config.state_root.join(suggestion.volume_name())
    }

    async fn stop_process(process: &mut WorkerProcess) {
        if let Some(mut child) = process.child.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl WorkerHost for LocalWorkerHost {
    async fn ensure_worker(
        &self,
        suggestion: &Suggestion,
        config: &SuggestionWorkerConfig,
    ) -> DomainResult<WorkerEndpoint> {
        let key = suggestion.worker_name();
        let mut workers = self.workers.lock().await;

        if let Some(process) = workers.get_mut(&key) {
            let alive = process
                .child
                .as_mut()
                .map(|c| matches!(c.try_wait(), Ok(None)))
                .unwrap_or(false);
            if alive {
                return Ok(process.endpoint.clone());
            }
        }

        let state_dir = self.state_dir(suggestion);
        std::fs::create_dir_all(&state_dir)
            .map_err(|e| DomainError::WorkerHost(format!("cannot create state dir: {e}")))?;

        let child = Command::new(&config.image)
            .args(&config.args)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--state-dir")
            .arg(&state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                DomainError::WorkerHost(format!(
                    "failed to start worker '{}': {e}",
                    config.image
                ))
            })?;
        info!(worker = %key, image = %config.image, port = config.port, "worker started");

        let endpoint = WorkerEndpoint {
            host: "127.0.0.1".to_string(),
            port: config.port,
        };
        workers.insert(
            key,
            WorkerProcess {
                child: Some(child),
                endpoint: endpoint.clone(),
            },
        );
        Ok(endpoint)
    }

    async fn is_ready(&self, suggestion: &Suggestion) -> DomainResult<bool> {
        let endpoint = {
            let mut workers = self.workers.lock().await;
            let Some(process) = workers.get_mut(&suggestion.worker_name()) else {
                return Ok(false);
            };
            let alive = process
                .child
                .as_mut()
                .map(|c| matches!(c.try_wait(), Ok(None)))
                .unwrap_or(false);
            if !alive {
                return Ok(false);
            }
            process.endpoint.clone()
        };

        let connect = TcpStream::connect(endpoint.address());
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(_)) => Ok(true),
            _ => Ok(false),
        }
    }

    async fn scale_to_zero(&self, suggestion: &Suggestion) -> DomainResult<()> {
        let mut workers = self.workers.lock().await;
        if let Some(process) = workers.get_mut(&suggestion.worker_name()) {
            Self::stop_process(process).await;
            info!(worker = %suggestion.worker_name(), "worker scaled to zero, state kept");
        }
        Ok(())
    }

    async fn teardown(&self, suggestion: &Suggestion, remove_state: bool) -> DomainResult<()> {
        let mut workers = self.workers.lock().await;
        if let Some(mut process) = workers.remove(&suggestion.worker_name()) {
            Self::stop_process(&mut process).await;
        }
        if remove_state {
            let state_dir = self.state_dir(suggestion);
            if state_dir.exists() {
                std::fs::remove_dir_all(&state_dir)
                    .map_err(|e| DomainError::WorkerHost(format!("cannot remove state dir: {e}")))?;
            }
        }
        info!(worker = %suggestion.worker_name(), remove_state, "worker torn down");
        Ok(())
    }
}
