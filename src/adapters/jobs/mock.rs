//! Scriptable job provider for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::trial::reasons;
use crate::domain::models::Trial;
use crate::domain::ports::{JobProvider, WorkloadCondition};

/// In-memory job provider whose workload conditions are driven by the test.
#[derive(Default)]
pub struct MockJobProvider {
    created: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    conditions: Mutex<HashMap<String, WorkloadCondition>>,
    early_stop_signals: Mutex<Vec<String>>,
}

impl MockJobProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the condition reported for a trial's workload.
    pub fn set_condition(&self, trial_name: &str, condition: WorkloadCondition) {
        self.conditions
            .lock()
            .unwrap()
            .insert(trial_name.to_string(), condition);
    }

    pub fn succeed(&self, trial_name: &str) {
        self.set_condition(
            trial_name,
            WorkloadCondition::Succeeded {
                reason: "WorkloadSucceeded".to_string(),
                message: "Workload has completed".to_string(),
            },
        );
    }

    pub fn fail(&self, trial_name: &str, message: &str) {
        self.set_condition(
            trial_name,
            WorkloadCondition::Failed {
                reason: "WorkloadFailed".to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn was_created(&self, trial_name: &str) -> bool {
        self.created.lock().unwrap().contains(trial_name)
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn early_stop_signals(&self) -> Vec<String> {
        self.early_stop_signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobProvider for MockJobProvider {
    fn recognizes(&self, kind: &str) -> bool {
        kind == "ShellJob"
    }

    fn is_primary_container(&self, run_spec: &Value, container_name: &str) -> bool {
        match run_spec.pointer("/spec/containers").and_then(|c| c.as_array()) {
            Some(containers) => containers
                .iter()
                .any(|c| c.get("name").and_then(|n| n.as_str()) == Some(container_name)),
            // No container list to contradict the claim.
            None => true,
        }
    }

    async fn create(&self, trial: &Trial) -> DomainResult<()> {
        let mut created = self.created.lock().unwrap();
        if created.insert(trial.name.clone()) {
            self.conditions
                .lock()
                .unwrap()
                .entry(trial.name.clone())
                .or_insert(WorkloadCondition::Running);
        }
        Ok(())
    }

    async fn get_condition(&self, trial: &Trial) -> DomainResult<Option<WorkloadCondition>> {
        if !self.created.lock().unwrap().contains(&trial.name) {
            return Ok(None);
        }
        Ok(self.conditions.lock().unwrap().get(&trial.name).cloned())
    }

    async fn signal_early_stop(&self, trial: &Trial) -> DomainResult<()> {
        self.early_stop_signals.lock().unwrap().push(trial.name.clone());
        self.set_condition(
            &trial.name,
            WorkloadCondition::Succeeded {
                reason: reasons::TRIAL_EARLY_STOPPED.to_string(),
                message: "Workload stopped early".to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, trial: &Trial) -> DomainResult<()> {
        self.created.lock().unwrap().remove(&trial.name);
        self.conditions.lock().unwrap().remove(&trial.name);
        self.deleted.lock().unwrap().push(trial.name.clone());
        Ok(())
    }
}
