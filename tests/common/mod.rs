//! Shared test harness: real controllers over an in-memory sqlite store
//! with scriptable algorithm, job, worker and metrics adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tunelab::adapters::algorithms::MockAlgorithmClient;
use tunelab::adapters::catalog::ConfigCatalog;
use tunelab::adapters::jobs::MockJobProvider;
use tunelab::adapters::metrics::MemoryMetricsSink;
use tunelab::adapters::sqlite::{
    all_embedded_migrations, create_test_pool, Migrator, SqliteExperimentRepository,
    SqliteSuggestionRepository, SqliteTrialRepository,
};
use tunelab::adapters::workers::MockWorkerHost;
use tunelab::application::{
    ExperimentController, ReconcileOutcome, Reconcile, ResourceKey, SuggestionController,
    TrialController,
};
use tunelab::domain::models::common::{
    AlgorithmSpec, MetricEntry, ObjectiveSpec, ObjectiveType, ParameterAssignment,
    TrialAssignment,
};
use tunelab::domain::models::{
    Experiment, ExperimentSpec, FeasibleSpace, MetricsCollectorSpec, ParameterSpec,
    ParameterType, ResumePolicy, Suggestion, SuggestionSpec, TemplateSource, TrialParameterSpec,
    TrialTemplate,
};
use tunelab::domain::ports::catalog::SuggestionWorkerConfig;
use tunelab::domain::ports::{
    ExperimentRepository, JobProvider, MetricsSink, RuntimeCatalog, SuggestionRepository,
    TrialRepository, WorkerHost,
};
use tunelab::domain::DomainResult;
use tunelab::services::config::CatalogConfig;
use tunelab::services::{EventBus, Telemetry};

pub const NS: &str = "default";

pub struct Harness {
    pub experiments: Arc<dyn ExperimentRepository>,
    pub suggestions: Arc<dyn SuggestionRepository>,
    pub trials: Arc<dyn TrialRepository>,
    pub sink: Arc<MemoryMetricsSink>,
    pub jobs: Arc<MockJobProvider>,
    pub workers: Arc<MockWorkerHost>,
    pub algorithm: Arc<MockAlgorithmClient>,
    pub telemetry: Arc<Telemetry>,
    experiment_controller: ExperimentController,
    suggestion_controller: SuggestionController,
    trial_controller: TrialController,
}

impl Harness {
    pub async fn new(algorithm: MockAlgorithmClient) -> Self {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();

        let bus = EventBus::new(1024);
        let experiments: Arc<dyn ExperimentRepository> =
            Arc::new(SqliteExperimentRepository::new(pool.clone(), Arc::clone(&bus)));
        let suggestions: Arc<dyn SuggestionRepository> =
            Arc::new(SqliteSuggestionRepository::new(pool.clone(), Arc::clone(&bus)));
        let trials: Arc<dyn TrialRepository> =
            Arc::new(SqliteTrialRepository::new(pool, Arc::clone(&bus)));

        let sink = Arc::new(MemoryMetricsSink::new());
        let jobs = Arc::new(MockJobProvider::new());
        let workers = Arc::new(MockWorkerHost::new());
        let algorithm = Arc::new(algorithm);
        let telemetry = Telemetry::new();

        let mut catalog_config = CatalogConfig::default();
        catalog_config.suggestions.insert(
            "random".to_string(),
            SuggestionWorkerConfig {
                image: "tunelab-worker-random".to_string(),
                args: vec![],
                port: 6789,
                service_account: None,
            },
        );
        let catalog: Arc<ConfigCatalog> = Arc::new(ConfigCatalog::new(catalog_config));

        let experiment_controller = ExperimentController::new(
            Arc::clone(&experiments),
            Arc::clone(&suggestions),
            Arc::clone(&trials),
            jobs.clone() as Arc<dyn JobProvider>,
            workers.clone() as Arc<dyn WorkerHost>,
            catalog.clone() as Arc<dyn RuntimeCatalog>,
            Arc::clone(&telemetry),
        );
        let suggestion_controller = SuggestionController::new(
            Arc::clone(&suggestions),
            Arc::clone(&experiments),
            Arc::clone(&trials),
            algorithm.clone() as Arc<dyn tunelab::domain::ports::AlgorithmClient>,
            workers.clone() as Arc<dyn WorkerHost>,
            catalog.clone() as Arc<dyn RuntimeCatalog>,
            2,
            Duration::from_millis(10),
        );
        let trial_controller = TrialController::new(
            Arc::clone(&trials),
            jobs.clone() as Arc<dyn JobProvider>,
            sink.clone() as Arc<dyn MetricsSink>,
            Arc::clone(&telemetry),
            Duration::from_millis(10),
        );

        Self {
            experiments,
            suggestions,
            trials,
            sink,
            jobs,
            workers,
            algorithm,
            telemetry,
            experiment_controller,
            suggestion_controller,
            trial_controller,
        }
    }

    pub async fn reconcile_experiment(&self, name: &str) -> DomainResult<ReconcileOutcome> {
        self.experiment_controller
            .reconcile(&ResourceKey::new(NS, name))
            .await
    }

    pub async fn reconcile_suggestion(&self, name: &str) -> DomainResult<ReconcileOutcome> {
        self.suggestion_controller
            .reconcile(&ResourceKey::new(NS, name))
            .await
    }

    pub async fn reconcile_trial(&self, name: &str) -> DomainResult<ReconcileOutcome> {
        self.trial_controller
            .reconcile(&ResourceKey::new(NS, name))
            .await
    }

    /// One sweep: experiment, suggestion, then every owned trial.
    pub async fn step(&self, name: &str) {
        let _ = self.reconcile_experiment(name).await;
        let _ = self.reconcile_suggestion(name).await;
        for trial in self.trials.list_by_owner(NS, name).await.unwrap() {
            let _ = self.reconcile_trial(&trial.name).await;
        }
    }

    /// Drive sweeps until the state stops changing (bounded).
    pub async fn settle(&self, name: &str) {
        for _ in 0..8 {
            self.step(name).await;
        }
    }

    pub async fn experiment(&self, name: &str) -> Experiment {
        self.experiments.get(NS, name).await.unwrap().unwrap()
    }

    pub async fn suggestion(&self, name: &str) -> Suggestion {
        self.suggestions.get(NS, name).await.unwrap().unwrap()
    }

    pub async fn trial_names(&self, owner: &str) -> Vec<String> {
        self.trials
            .list_by_owner(NS, owner)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    /// Record an objective value and finish the trial's workload.
    pub async fn finish_trial(&self, trial_name: &str, accuracy: f64) {
        self.sink
            .report_observation_log(
                trial_name,
                &[MetricEntry {
                    timestamp: Utc::now(),
                    name: "accuracy".to_string(),
                    value: accuracy,
                }],
            )
            .await
            .unwrap();
        self.jobs.succeed(trial_name);
    }
}

/// A valid experiment over one double parameter, customized per scenario.
pub fn make_experiment(name: &str, customize: impl FnOnce(&mut ExperimentSpec)) -> Experiment {
    let mut spec = ExperimentSpec {
        objective: ObjectiveSpec {
            objective_type: ObjectiveType::Maximize,
            goal: None,
            objective_metric_name: "accuracy".to_string(),
            additional_metric_names: vec![],
        },
        algorithm: AlgorithmSpec {
            algorithm_name: "random".to_string(),
            algorithm_settings: vec![],
        },
        early_stopping: None,
        parameters: vec![ParameterSpec {
            name: "lr".to_string(),
            parameter_type: ParameterType::Double,
            feasible_space: FeasibleSpace {
                min: Some("0.01".to_string()),
                max: Some("0.1".to_string()),
                ..Default::default()
            },
        }],
        nas_config: None,
        parallel_trial_count: 2,
        max_trial_count: Some(4),
        max_failed_trial_count: None,
        trial_template: TrialTemplate {
            source: TemplateSource::Inline(serde_json::json!({
                "apiVersion": "tunelab.dev/v1",
                "kind": "ShellJob",
                "spec": {
                    "containers": [{
                        "name": "training",
                        "command": ["run-training", "--lr=${trialParameters.learningRate}"]
                    }]
                }
            })),
            trial_parameters: vec![TrialParameterSpec {
                name: "learningRate".to_string(),
                description: String::new(),
                reference: "lr".to_string(),
            }],
            primary_container_name: "training".to_string(),
            success_condition: "status.succeeded > 0".to_string(),
            failure_condition: "status.failed > 0".to_string(),
            retain: false,
        },
        metrics_collector: MetricsCollectorSpec::default(),
        resume_policy: ResumePolicy::NeverResume,
    };
    customize(&mut spec);
    Experiment::new(NS, name, spec)
}

pub fn assignment(name: &str, lr: &str) -> TrialAssignment {
    TrialAssignment {
        name: name.to_string(),
        parameter_assignments: vec![ParameterAssignment {
            name: "lr".to_string(),
            value: lr.to_string(),
        }],
        early_stopping_rules: vec![],
    }
}

/// A suggestion seeded with pre-produced assignments.
pub fn seeded_suggestion(
    experiment: &Experiment,
    assignments: Vec<TrialAssignment>,
) -> Suggestion {
    let mut suggestion = Suggestion::new(
        NS,
        &experiment.name,
        SuggestionSpec {
            algorithm: experiment.spec.algorithm.clone(),
            early_stopping: None,
            requests: 0,
            resume_policy: experiment.spec.resume_policy,
        },
    );
    suggestion.append_assignments(assignments);
    suggestion
}
