//! Local-process job provider for `ShellJob` workloads.
//!
//! A ShellJob run spec declares containers with commands; the primary
//! container's command is wrapped so its output lands in the trial's
//! metrics file and a completion marker distinguishes early stopping from a
//! crash. Metrics are parsed from the file on exit and pushed to the sink.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::expr;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::metrics_collector::{TRAINING_COMPLETED, TRAINING_EARLY_STOPPED};
use crate::domain::models::trial::reasons;
use crate::domain::models::{MetricEntry, Trial};
use crate::domain::ports::{JobProvider, MetricsSink, WorkloadCondition};
use crate::services::{EventAction, EventBus, ResourceKind};

pub const SHELL_JOB_KIND: &str = "ShellJob";

/// Default `name=value` line format when no filter is configured.
const DEFAULT_METRICS_FORMAT: &str = r"([\w|-]+)\s*=\s*([+-]?\d*\.?\d+(?:[Ee][+-]?\d+)?)";

/// Marker file the wrapped command and the early-stop signal share.
const MARKER_FILE: &str = "marker.pid";

#[derive(Debug, Clone)]
pub struct ShellJobConfig {
    /// Per-trial scratch directories live under this root.
    pub work_root: PathBuf,
}

impl Default for ShellJobConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".tunelab/trials"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadPhase {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
struct WorkloadState {
    phase: WorkloadPhase,
    early_stopped: bool,
    message: String,
    pid: Option<u32>,
}

pub struct ShellJobProvider {
    config: ShellJobConfig,
    sink: Arc<dyn MetricsSink>,
    bus: Arc<EventBus>,
    states: Arc<RwLock<HashMap<String, WorkloadState>>>,
}

impl ShellJobProvider {
    pub fn new(config: ShellJobConfig, sink: Arc<dyn MetricsSink>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            sink,
            bus,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn work_dir(&self, trial: &Trial) -> PathBuf {
        self.config.work_root.join(&trial.namespace).join(&trial.name)
    }

    fn containers(run_spec: &Value) -> Vec<&Value> {
        run_spec
            .pointer("/spec/containers")
            .and_then(|c| c.as_array())
            .map(|a| a.iter().collect())
            .unwrap_or_default()
    }

    fn primary_container<'a>(run_spec: &'a Value, name: &str) -> Option<&'a Value> {
        Self::containers(run_spec)
            .into_iter()
            .find(|c| c.get("name").and_then(|n| n.as_str()) == Some(name))
    }

    /// Wrap the user command so stdout is captured and the marker file
    /// distinguishes early stopping from failure.
    fn wrap_command(user_command: &str, metrics_file: &str, marker_file: &str) -> String {
        format!(
            "{user_command} 1>{metrics_file} 2>&1 || \
             if test -f {marker_file} && [ \"$(head -n1 {marker_file})\" = {TRAINING_EARLY_STOPPED} ]; \
             then exit 0; else exit 1; fi && \
             echo {TRAINING_COMPLETED} > {marker_file}"
        )
    }

    /// Build the synthetic status document the success/failure expressions
    /// are evaluated against.
    fn status_document(state: &WorkloadState) -> Value {
        serde_json::json!({
            "status": {
                "active": if state.phase == WorkloadPhase::Running { 1 } else { 0 },
                "succeeded": if state.phase == WorkloadPhase::Succeeded { 1 } else { 0 },
                "failed": if state.phase == WorkloadPhase::Failed { 1 } else { 0 },
                "earlyStopped": state.early_stopped,
            }
        })
    }
}

#[async_trait]
impl JobProvider for ShellJobProvider {
    fn recognizes(&self, kind: &str) -> bool {
        kind == SHELL_JOB_KIND
    }

    fn is_primary_container(&self, run_spec: &Value, container_name: &str) -> bool {
        Self::primary_container(run_spec, container_name).is_some()
    }

    async fn create(&self, trial: &Trial) -> DomainResult<()> {
        {
            let states = self.states.read().await;
            if states.contains_key(&trial.name) {
                return Ok(());
            }
        }

        let container = Self::primary_container(&trial.spec.run_spec, &trial.spec.primary_container_name)
            .ok_or_else(|| DomainError::PrimaryContainerMissing {
                trial: trial.name.clone(),
                container: trial.spec.primary_container_name.clone(),
            })?;
        let user_command = container
            .get("command")
            .and_then(|c| c.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                DomainError::Workload(format!(
                    "primary container of trial {} has no command",
                    trial.name
                ))
            })?;

        let work_dir = self.work_dir(trial);
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| DomainError::Workload(format!("cannot create work dir: {e}")))?;
        let metrics_file = work_dir.join("metrics.log");
        let marker_file = work_dir.join(MARKER_FILE);

        // Only file-capturing collectors need the command wrapped; a
        // prometheus or custom collector scrapes the workload directly.
        let wrapped = if trial.spec.metrics_collector.kind.wraps_primary_command() {
            Self::wrap_command(
                &user_command,
                &metrics_file.display().to_string(),
                &marker_file.display().to_string(),
            )
        } else {
            user_command.clone()
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&wrapped)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(env) = container.get("env").and_then(|e| e.as_array()) {
            for entry in env {
                if let (Some(name), Some(value)) = (
                    entry.get("name").and_then(|n| n.as_str()),
                    entry.get("value").and_then(|v| v.as_str()),
                ) {
                    command.env(name, value);
                }
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| DomainError::Workload(format!("failed to spawn workload: {e}")))?;
        let pid = child.id();
        info!(trial = %trial.name, pid, "shell job started");

        {
            let mut states = self.states.write().await;
            states.insert(
                trial.name.clone(),
                WorkloadState {
                    phase: WorkloadPhase::Running,
                    early_stopped: false,
                    message: "Workload is running".to_string(),
                    pid,
                },
            );
        }

        // Waiter: collect the exit status, parse metrics, flip the state
        // and publish a workload event so the trial reconciles promptly.
        let states = Arc::clone(&self.states);
        let sink = Arc::clone(&self.sink);
        let bus = Arc::clone(&self.bus);
        let trial_name = trial.name.clone();
        let namespace = trial.namespace.clone();
        let owner = trial.owner.clone();
        let formats: Vec<String> = trial.spec.metrics_collector.metrics_formats().to_vec();
        tokio::spawn(async move {
            let exit = child.wait().await;

            if let Ok(content) = std::fs::read_to_string(&metrics_file) {
                let entries = parse_metrics(&content, &formats);
                if !entries.is_empty() {
                    if let Err(e) = sink.report_observation_log(&trial_name, &entries).await {
                        warn!(trial = %trial_name, error = %e, "failed to report metrics");
                    }
                }
            }

            let marker = std::fs::read_to_string(&marker_file).unwrap_or_default();
            let early_stopped = marker.lines().next() == Some(TRAINING_EARLY_STOPPED);
            let succeeded = exit.map(|s| s.success()).unwrap_or(false);

            {
                let mut states = states.write().await;
                if let Some(state) = states.get_mut(&trial_name) {
                    state.early_stopped = early_stopped;
                    state.pid = None;
                    if succeeded {
                        state.phase = WorkloadPhase::Succeeded;
                        state.message = if early_stopped {
                            "Workload stopped early".to_string()
                        } else {
                            "Workload has completed".to_string()
                        };
                    } else {
                        state.phase = WorkloadPhase::Failed;
                        state.message = "Workload exited with an error".to_string();
                    }
                }
            }
            bus.publish(
                ResourceKind::Workload,
                EventAction::Updated,
                &namespace,
                &trial_name,
                Some(&owner),
            );
        });

        Ok(())
    }

    async fn get_condition(&self, trial: &Trial) -> DomainResult<Option<WorkloadCondition>> {
        let states = self.states.read().await;
        let Some(state) = states.get(&trial.name) else {
            return Ok(None);
        };

        if state.phase == WorkloadPhase::Running {
            return Ok(Some(WorkloadCondition::Running));
        }

        let doc = Self::status_document(state);
        if expr::evaluate(&doc, &trial.spec.success_condition) {
            let reason = if state.early_stopped {
                reasons::TRIAL_EARLY_STOPPED
            } else {
                "WorkloadSucceeded"
            };
            return Ok(Some(WorkloadCondition::Succeeded {
                reason: reason.to_string(),
                message: state.message.clone(),
            }));
        }
        if expr::evaluate(&doc, &trial.spec.failure_condition) {
            return Ok(Some(WorkloadCondition::Failed {
                reason: "WorkloadFailed".to_string(),
                message: state.message.clone(),
            }));
        }
        // Finished but matching neither expression; leave it running-shaped
        // so the owner keeps polling rather than mislabeling it.
        Ok(Some(WorkloadCondition::Running))
    }

    async fn signal_early_stop(&self, trial: &Trial) -> DomainResult<()> {
        let marker_file = self.work_dir(trial).join(MARKER_FILE);
        std::fs::write(&marker_file, format!("{TRAINING_EARLY_STOPPED}\n"))
            .map_err(|e| DomainError::Workload(format!("cannot write marker: {e}")))?;

        let pid = {
            let mut states = self.states.write().await;
            let Some(state) = states.get_mut(&trial.name) else {
                return Ok(());
            };
            state.early_stopped = true;
            state.pid
        };
        if let Some(pid) = pid {
            info!(trial = %trial.name, pid, "early stopping workload");
            let _ = Command::new("kill").arg(pid.to_string()).status().await;
        }
        Ok(())
    }

    async fn delete(&self, trial: &Trial) -> DomainResult<()> {
        let removed = {
            let mut states = self.states.write().await;
            states.remove(&trial.name)
        };
        if let Some(state) = removed {
            if let Some(pid) = state.pid {
                let _ = Command::new("kill").arg(pid.to_string()).status().await;
            }
        }
        let work_dir = self.work_dir(trial);
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)
                .map_err(|e| DomainError::Workload(format!("cannot remove work dir: {e}")))?;
        }
        Ok(())
    }
}

fn default_metrics_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(DEFAULT_METRICS_FORMAT).unwrap())
}

/// Parse metric entries out of collected output, one candidate per line.
fn parse_metrics(content: &str, formats: &[String]) -> Vec<MetricEntry> {
    let patterns: Vec<Regex> = if formats.is_empty() {
        vec![default_metrics_regex().clone()]
    } else {
        formats.iter().filter_map(|f| Regex::new(f).ok()).collect()
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        for pattern in &patterns {
            for captures in pattern.captures_iter(line) {
                let (Some(name), Some(value)) = (captures.get(1), captures.get(2)) else {
                    continue;
                };
                if let Ok(value) = value.as_str().parse::<f64>() {
                    entries.push(MetricEntry {
                        timestamp: Utc::now(),
                        name: name.as_str().to_string(),
                        value,
                    });
                }
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics_default_format() {
        let content = "epoch 1\naccuracy=0.71\nloss = 0.39\nnoise line\naccuracy=0.84\n";
        let entries = parse_metrics(content, &[]);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "accuracy");
        assert_eq!(entries[0].value, 0.71);
        assert_eq!(entries[1].name, "loss");
        assert_eq!(entries[2].value, 0.84);
    }

    #[test]
    fn test_parse_metrics_custom_format() {
        let content = "metric: accuracy value: 0.9";
        let formats = vec![r"metric: ([\w-]+) value: ([\d.]+)".to_string()];
        let entries = parse_metrics(content, &formats);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "accuracy");
        assert_eq!(entries[0].value, 0.9);
    }

    #[test]
    fn test_wrap_command_shape() {
        let wrapped = ShellJobProvider::wrap_command("python3 train.py", "/tmp/m.log", "/tmp/marker.pid");
        assert!(wrapped.starts_with("python3 train.py 1>/tmp/m.log 2>&1"));
        assert!(wrapped.contains(TRAINING_EARLY_STOPPED));
        assert!(wrapped.ends_with("echo completed > /tmp/marker.pid"));
    }

    #[test]
    fn test_status_document_shapes() {
        let running = WorkloadState {
            phase: WorkloadPhase::Running,
            early_stopped: false,
            message: String::new(),
            pid: Some(1),
        };
        let doc = ShellJobProvider::status_document(&running);
        assert!(expr::evaluate(&doc, "status.active > 0"));
        assert!(!expr::evaluate(&doc, "status.succeeded > 0"));

        let done = WorkloadState {
            phase: WorkloadPhase::Succeeded,
            early_stopped: false,
            message: String::new(),
            pid: None,
        };
        let doc = ShellJobProvider::status_document(&done);
        assert!(expr::evaluate(&doc, "status.succeeded > 0"));
        assert!(!expr::evaluate(&doc, "status.failed > 0"));
    }
}
