//! Command handlers and the composition root.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use super::types::{Cli, Commands, ExperimentCommands, TrialCommands};
use crate::adapters::algorithms::{HttpAlgorithmClient, HttpAlgorithmConfig};
use crate::adapters::catalog::ConfigCatalog;
use crate::adapters::jobs::{ShellJobConfig, ShellJobProvider};
use crate::adapters::sqlite::{
    all_embedded_migrations, create_pool, Migrator, PoolConfig, SqliteExperimentRepository,
    SqliteMetricsSink, SqliteSuggestionRepository, SqliteTrialRepository,
};
use crate::adapters::workers::{LocalWorkerHost, LocalWorkerHostConfig};
use crate::application::{
    BackoffPolicy, ControllerManager, ControllerRunner, ExperimentController,
    ExperimentValidator, SuggestionController, TrialController,
};
use crate::domain::models::{Experiment, ExperimentSpec};
use crate::domain::ports::{
    AlgorithmClient, ExperimentRepository, JobProvider, MetricsSink, RuntimeCatalog,
    SuggestionRepository, TrialRepository, WorkerHost,
};
use crate::services::{Config, EventBus, Telemetry};

/// Everything the commands need, wired once per invocation.
struct Runtime {
    config: Config,
    bus: Arc<EventBus>,
    experiments: Arc<dyn ExperimentRepository>,
    suggestions: Arc<dyn SuggestionRepository>,
    trials: Arc<dyn TrialRepository>,
    metrics_sink: Arc<dyn MetricsSink>,
    job_provider: Arc<dyn JobProvider>,
    worker_host: Arc<dyn WorkerHost>,
    algorithm_client: Arc<dyn AlgorithmClient>,
    catalog: Arc<ConfigCatalog>,
    telemetry: Arc<Telemetry>,
}

async fn build_runtime(config: Config) -> Result<Runtime> {
    let pool = create_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..Default::default()
        }),
    )
    .await
    .context("failed to open the database")?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("failed to run migrations")?;

    let bus = EventBus::new(1024);
    let experiments: Arc<dyn ExperimentRepository> = Arc::new(SqliteExperimentRepository::new(
        pool.clone(),
        Arc::clone(&bus),
    ));
    let suggestions: Arc<dyn SuggestionRepository> = Arc::new(SqliteSuggestionRepository::new(
        pool.clone(),
        Arc::clone(&bus),
    ));
    let trials: Arc<dyn TrialRepository> =
        Arc::new(SqliteTrialRepository::new(pool.clone(), Arc::clone(&bus)));
    let metrics_sink: Arc<dyn MetricsSink> = Arc::new(SqliteMetricsSink::new(pool));

    let job_provider: Arc<dyn JobProvider> = Arc::new(ShellJobProvider::new(
        ShellJobConfig {
            work_root: config.jobs.work_root.clone(),
        },
        Arc::clone(&metrics_sink),
        Arc::clone(&bus),
    ));
    let worker_host: Arc<dyn WorkerHost> = Arc::new(LocalWorkerHost::new(LocalWorkerHostConfig {
        state_root: config.workers.state_root.clone(),
        ..Default::default()
    }));
    let algorithm_client: Arc<dyn AlgorithmClient> =
        Arc::new(HttpAlgorithmClient::new(HttpAlgorithmConfig::default())?);
    let catalog = Arc::new(ConfigCatalog::new(config.catalog.clone()));

    Ok(Runtime {
        config,
        bus,
        experiments,
        suggestions,
        trials,
        metrics_sink,
        job_provider,
        worker_host,
        algorithm_client,
        catalog,
        telemetry: Telemetry::new(),
    })
}

fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { force } => init(&cli, *force).await,
        Commands::Serve => serve(&cli).await,
        Commands::Experiment(cmd) => experiment_command(&cli, cmd).await,
        Commands::Trial(cmd) => trial_command(&cli, cmd).await,
    }
}

async fn init(cli: &Cli, force: bool) -> Result<()> {
    if cli.config.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            cli.config.display()
        );
    }
    let config = Config::default();
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    std::fs::write(&cli.config, rendered)
        .with_context(|| format!("failed to write {}", cli.config.display()))?;

    init_logging(&config);
    // Create the database and schema up front so serve starts clean.
    build_runtime(config).await?;
    println!("Initialized configuration at {}", cli.config.display());
    Ok(())
}

async fn serve(cli: &Cli) -> Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config);
    let runtime = build_runtime(config).await?;
    let controllers = &runtime.config.controllers;

    let experiment_controller = Arc::new(ExperimentController::new(
        Arc::clone(&runtime.experiments),
        Arc::clone(&runtime.suggestions),
        Arc::clone(&runtime.trials),
        Arc::clone(&runtime.job_provider),
        Arc::clone(&runtime.worker_host),
        runtime.catalog.clone() as Arc<dyn RuntimeCatalog>,
        Arc::clone(&runtime.telemetry),
    ));
    let suggestion_controller = Arc::new(SuggestionController::new(
        Arc::clone(&runtime.suggestions),
        Arc::clone(&runtime.experiments),
        Arc::clone(&runtime.trials),
        Arc::clone(&runtime.algorithm_client),
        Arc::clone(&runtime.worker_host),
        runtime.catalog.clone() as Arc<dyn RuntimeCatalog>,
        controllers.algorithm_retry_budget,
        Duration::from_millis(controllers.requeue_interval_ms),
    ));
    let trial_controller = Arc::new(TrialController::new(
        Arc::clone(&runtime.trials),
        Arc::clone(&runtime.job_provider),
        Arc::clone(&runtime.metrics_sink),
        Arc::clone(&runtime.telemetry),
        Duration::from_millis(controllers.requeue_interval_ms),
    ));

    let backoff = BackoffPolicy {
        base: Duration::from_millis(controllers.backoff_base_ms),
        cap: Duration::from_millis(controllers.backoff_cap_ms),
    };
    let manager = ControllerManager::new(
        Arc::clone(&runtime.bus),
        Arc::clone(&runtime.experiments),
        Arc::clone(&runtime.suggestions),
        Arc::clone(&runtime.trials),
        ControllerRunner::new(
            "experiment",
            experiment_controller,
            backoff.clone(),
            controllers.experiment_workers,
        ),
        ControllerRunner::new(
            "suggestion",
            suggestion_controller,
            backoff.clone(),
            controllers.suggestion_workers,
        ),
        ControllerRunner::new("trial", trial_controller, backoff, controllers.trial_workers),
    );

    let shutdown = manager.shutdown_signal();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown.send(true);
    });

    manager.run().await?;
    Ok(())
}

/// On-disk manifest for `experiment submit`.
#[derive(Deserialize)]
struct ExperimentManifest {
    #[serde(default = "default_namespace")]
    namespace: String,
    name: String,
    spec: ExperimentSpec,
}

fn default_namespace() -> String {
    "default".to_string()
}

async fn experiment_command(cli: &Cli, cmd: &ExperimentCommands) -> Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config);
    let runtime = build_runtime(config).await?;

    match cmd {
        ExperimentCommands::Submit { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let manifest: ExperimentManifest =
                serde_json::from_str(&content).context("invalid experiment manifest")?;
            let experiment =
                Experiment::new(manifest.namespace, manifest.name, manifest.spec);

            let validator = ExperimentValidator::new(
                runtime.catalog.clone() as Arc<dyn RuntimeCatalog>,
                Arc::clone(&runtime.job_provider),
            );
            let existing = runtime
                .experiments
                .get(&experiment.namespace, &experiment.name)
                .await?;
            validator
                .validate(&experiment, existing.as_ref())
                .await
                .context("experiment rejected")?;

            match existing {
                Some(mut stored) => {
                    stored.spec = experiment.spec;
                    runtime.experiments.update(&stored).await?;
                    println!("Experiment {}/{} updated", stored.namespace, stored.name);
                }
                None => {
                    runtime.experiments.create(&experiment).await?;
                    println!(
                        "Experiment {}/{} created",
                        experiment.namespace, experiment.name
                    );
                }
            }
        }
        ExperimentCommands::List { namespace } => {
            let experiments = runtime.experiments.list(namespace.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&experiments)?);
            } else {
                for exp in experiments {
                    let state = current_state(&exp);
                    let counts = &exp.status.trial_counts;
                    println!(
                        "{}/{}\t{}\ttrials={} succeeded={} failed={}",
                        exp.namespace, exp.name, state, counts.trials, counts.succeeded, counts.failed
                    );
                }
            }
        }
        ExperimentCommands::Get { name, namespace } => {
            let experiment = runtime
                .experiments
                .get(namespace, name)
                .await?
                .with_context(|| format!("experiment {namespace}/{name} not found"))?;
            println!("{}", serde_json::to_string_pretty(&experiment)?);
        }
        ExperimentCommands::Delete { name, namespace } => {
            runtime.experiments.delete(namespace, name).await?;
            println!("Experiment {namespace}/{name} deletion requested");
        }
    }
    Ok(())
}

async fn trial_command(cli: &Cli, cmd: &TrialCommands) -> Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config);
    let runtime = build_runtime(config).await?;

    match cmd {
        TrialCommands::List { experiment, namespace } => {
            let trials = runtime.trials.list_by_owner(namespace, experiment).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&trials)?);
            } else {
                for trial in trials {
                    let state = trial
                        .status
                        .conditions
                        .last()
                        .map(|c| c.reason.clone())
                        .unwrap_or_else(|| "Pending".to_string());
                    let objective = trial
                        .status
                        .observation
                        .metric_value(&trial.spec.objective.objective_metric_name)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}\t{}\t{}", trial.name, state, objective);
                }
            }
        }
    }
    Ok(())
}

fn current_state(experiment: &Experiment) -> &'static str {
    if experiment.is_failed() {
        "Failed"
    } else if experiment.is_succeeded() {
        "Succeeded"
    } else if experiment.is_restarting() {
        "Restarting"
    } else if experiment.is_running() {
        "Running"
    } else if experiment.is_created() {
        "Created"
    } else {
        "Pending"
    }
}
