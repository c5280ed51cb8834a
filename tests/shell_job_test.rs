//! Exercises the local-process job provider end to end: spawn, metrics
//! capture, condition classification, cleanup.

use std::sync::Arc;
use std::time::Duration;

use tunelab::adapters::jobs::{ShellJobConfig, ShellJobProvider};
use tunelab::adapters::metrics::MemoryMetricsSink;
use tunelab::domain::models::common::{ObjectiveSpec, ObjectiveType, ParameterAssignment};
use tunelab::domain::models::{MetricsCollectorSpec, Trial, TrialSpec};
use tunelab::domain::ports::{JobProvider, MetricsSink, WorkloadCondition};
use tunelab::services::EventBus;

fn trial(name: &str, command: &[&str]) -> Trial {
    Trial::new(
        "default",
        name,
        "tune",
        TrialSpec {
            objective: ObjectiveSpec {
                objective_type: ObjectiveType::Maximize,
                goal: None,
                objective_metric_name: "accuracy".to_string(),
                additional_metric_names: vec![],
            },
            parameter_assignments: vec![ParameterAssignment {
                name: "lr".to_string(),
                value: "0.05".to_string(),
            }],
            run_spec: serde_json::json!({
                "apiVersion": "tunelab.dev/v1",
                "kind": "ShellJob",
                "spec": {
                    "containers": [{
                        "name": "training",
                        "command": command,
                    }]
                }
            }),
            metrics_collector: MetricsCollectorSpec::default(),
            primary_container_name: "training".to_string(),
            success_condition: "status.succeeded > 0".to_string(),
            failure_condition: "status.failed > 0".to_string(),
            early_stopping_rules: vec![],
            retain: false,
        },
    )
}

async fn wait_terminal(
    provider: &ShellJobProvider,
    trial: &Trial,
) -> Option<WorkloadCondition> {
    for _ in 0..100 {
        match provider.get_condition(trial).await.unwrap() {
            Some(condition) if condition.is_terminal() => return Some(condition),
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    None
}

#[tokio::test]
async fn test_shell_job_captures_metrics_and_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemoryMetricsSink::new());
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let provider = ShellJobProvider::new(
        ShellJobConfig {
            work_root: tmp.path().to_path_buf(),
        },
        sink.clone() as Arc<dyn MetricsSink>,
        Arc::clone(&bus),
    );

    let trial = trial("tune-shell-ok", &["echo", "accuracy=0.91"]);
    assert!(provider.is_primary_container(&trial.spec.run_spec, "training"));
    provider.create(&trial).await.unwrap();
    // A second create is a no-op.
    provider.create(&trial).await.unwrap();

    let condition = wait_terminal(&provider, &trial).await.expect("workload never finished");
    assert!(matches!(condition, WorkloadCondition::Succeeded { .. }));

    let log = sink
        .get_observation_log("tune-shell-ok", None, None, None)
        .await
        .unwrap();
    assert_eq!(
        log.best_value("accuracy", ObjectiveType::Maximize),
        Some(0.91)
    );

    // The waiter published a workload event for the owner to route.
    let event = events.recv().await.unwrap();
    assert_eq!(event.name, "tune-shell-ok");
    assert_eq!(event.owner.as_deref(), Some("tune"));

    provider.delete(&trial).await.unwrap();
    assert!(provider.get_condition(&trial).await.unwrap().is_none());
}

#[tokio::test]
async fn test_shell_job_failure_is_classified() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemoryMetricsSink::new());
    let bus = EventBus::new(64);
    let provider = ShellJobProvider::new(
        ShellJobConfig {
            work_root: tmp.path().to_path_buf(),
        },
        sink as Arc<dyn MetricsSink>,
        bus,
    );

    let trial = trial("tune-shell-bad", &["false"]);
    provider.create(&trial).await.unwrap();

    let condition = wait_terminal(&provider, &trial).await.expect("workload never finished");
    assert!(matches!(condition, WorkloadCondition::Failed { .. }));
}
