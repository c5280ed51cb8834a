//! Controller manager.
//!
//! Owns the three controller runners, pumps store events into their work
//! queues, performs the initial resync so a restarted process resumes
//! in-flight searches, and coordinates graceful shutdown.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::application::reconciler::{ControllerRunner, ResourceKey};
use crate::domain::errors::DomainResult;
use crate::domain::ports::{ExperimentRepository, SuggestionRepository, TrialRepository};
use crate::services::{EventBus, ResourceEvent, ResourceKind};

pub struct ControllerManager {
    bus: Arc<EventBus>,
    experiments: Arc<dyn ExperimentRepository>,
    suggestions: Arc<dyn SuggestionRepository>,
    trials: Arc<dyn TrialRepository>,
    experiment_runner: Arc<ControllerRunner>,
    suggestion_runner: Arc<ControllerRunner>,
    trial_runner: Arc<ControllerRunner>,
    shutdown_tx: watch::Sender<bool>,
}

impl ControllerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        experiments: Arc<dyn ExperimentRepository>,
        suggestions: Arc<dyn SuggestionRepository>,
        trials: Arc<dyn TrialRepository>,
        experiment_runner: Arc<ControllerRunner>,
        suggestion_runner: Arc<ControllerRunner>,
        trial_runner: Arc<ControllerRunner>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            experiments,
            suggestions,
            trials,
            experiment_runner,
            suggestion_runner,
            trial_runner,
            shutdown_tx,
        }
    }

    /// Flip the shutdown flag; `run` returns once the workers drain.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown. Subscribes before the resync so no event falls
    /// between the initial listing and the live stream.
    pub async fn run(&self) -> DomainResult<()> {
        let receiver = self.bus.subscribe();
        self.resync().await?;

        let pump = {
            let shutdown = self.shutdown_tx.subscribe();
            let experiment_queue = self.experiment_runner.queue();
            let suggestion_queue = self.suggestion_runner.queue();
            let trial_queue = self.trial_runner.queue();
            tokio::spawn(pump_events(
                receiver,
                shutdown,
                move |event| match event.kind {
                    ResourceKind::Experiment => {
                        experiment_queue.add(ResourceKey::new(&event.namespace, &event.name));
                    }
                    ResourceKind::Suggestion => {
                        suggestion_queue.add(ResourceKey::new(&event.namespace, &event.name));
                        let owner = event.owner.as_deref().unwrap_or(&event.name);
                        experiment_queue.add(ResourceKey::new(&event.namespace, owner));
                    }
                    ResourceKind::Trial => {
                        trial_queue.add(ResourceKey::new(&event.namespace, &event.name));
                        if let Some(owner) = &event.owner {
                            experiment_queue.add(ResourceKey::new(&event.namespace, owner));
                        }
                    }
                    ResourceKind::Workload => {
                        trial_queue.add(ResourceKey::new(&event.namespace, &event.name));
                    }
                },
            ))
        };

        info!("controller manager running");
        let experiment_run = Arc::clone(&self.experiment_runner).run(self.shutdown_tx.subscribe());
        let suggestion_run = Arc::clone(&self.suggestion_runner).run(self.shutdown_tx.subscribe());
        let trial_run = Arc::clone(&self.trial_runner).run(self.shutdown_tx.subscribe());
        tokio::join!(experiment_run, suggestion_run, trial_run);

        pump.abort();
        info!("controller manager stopped");
        Ok(())
    }

    /// Enqueue every stored resource so the edge-triggered loops observe
    /// state that changed while the process was down.
    pub async fn resync(&self) -> DomainResult<()> {
        let experiments = self.experiments.list(None).await?;
        let suggestions = self.suggestions.list(None).await?;
        let trials = self.trials.list(None).await?;
        debug!(
            experiments = experiments.len(),
            suggestions = suggestions.len(),
            trials = trials.len(),
            "resync"
        );
        for experiment in experiments {
            self.experiment_runner
                .enqueue(ResourceKey::new(&experiment.namespace, &experiment.name));
        }
        for suggestion in suggestions {
            self.suggestion_runner
                .enqueue(ResourceKey::new(&suggestion.namespace, &suggestion.name));
        }
        for trial in trials {
            self.trial_runner
                .enqueue(ResourceKey::new(&trial.namespace, &trial.name));
        }
        Ok(())
    }
}

async fn pump_events<F>(
    mut receiver: broadcast::Receiver<ResourceEvent>,
    mut shutdown: watch::Receiver<bool>,
    route: F,
) where
    F: Fn(&ResourceEvent) + Send + 'static,
{
    loop {
        tokio::select! {
            result = receiver.recv() => match result {
                Ok(event) => route(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed events are recovered by the controllers'
                    // level-style re-reads on the next touch of each key,
                    // but log it so capacity can be raised.
                    warn!(missed, "event pump lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
