//! Scriptable worker host for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Suggestion;
use crate::domain::ports::{SuggestionWorkerConfig, WorkerEndpoint, WorkerHost};

/// In-memory worker host tracking which workers exist and which state
/// volumes survive.
#[derive(Default)]
pub struct MockWorkerHost {
    ready: AtomicBool,
    deployed: Mutex<HashSet<String>>,
    volumes: Mutex<HashSet<String>>,
    scaled_to_zero: Mutex<Vec<String>>,
    teardowns: Mutex<Vec<(String, bool)>>,
}

impl MockWorkerHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.ready.store(true, Ordering::SeqCst);
        host
    }

    /// A host whose workers never become ready.
    pub fn not_ready() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_deployed(&self, worker_name: &str) -> bool {
        self.deployed.lock().unwrap().contains(worker_name)
    }

    pub fn has_volume(&self, volume_name: &str) -> bool {
        self.volumes.lock().unwrap().contains(volume_name)
    }

    pub fn scaled_to_zero(&self) -> Vec<String> {
        self.scaled_to_zero.lock().unwrap().clone()
    }

    pub fn teardowns(&self) -> Vec<(String, bool)> {
        self.teardowns.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerHost for MockWorkerHost {
    async fn ensure_worker(
        &self,
        suggestion: &Suggestion,
        config: &SuggestionWorkerConfig,
    ) -> DomainResult<WorkerEndpoint> {
        self.deployed.lock().unwrap().insert(suggestion.worker_name());
        self.volumes.lock().unwrap().insert(suggestion.volume_name());
        Ok(WorkerEndpoint {
            host: "127.0.0.1".to_string(),
            port: config.port,
        })
    }

    async fn is_ready(&self, suggestion: &Suggestion) -> DomainResult<bool> {
        Ok(self.ready.load(Ordering::SeqCst)
            && self.deployed.lock().unwrap().contains(&suggestion.worker_name()))
    }

    async fn scale_to_zero(&self, suggestion: &Suggestion) -> DomainResult<()> {
        let worker = suggestion.worker_name();
        self.deployed.lock().unwrap().remove(&worker);
        self.scaled_to_zero.lock().unwrap().push(worker);
        Ok(())
    }

    async fn teardown(&self, suggestion: &Suggestion, remove_state: bool) -> DomainResult<()> {
        let worker = suggestion.worker_name();
        self.deployed.lock().unwrap().remove(&worker);
        if remove_state {
            self.volumes.lock().unwrap().remove(&suggestion.volume_name());
        }
        self.teardowns.lock().unwrap().push((worker, remove_state));
        Ok(())
    }
}
