//! Ports: the traits the application layer depends on, implemented by
//! adapters.

pub mod algorithm_client;
pub mod catalog;
pub mod experiment_repository;
pub mod job_provider;
pub mod metrics_sink;
pub mod suggestion_repository;
pub mod trial_repository;
pub mod worker_host;

pub use algorithm_client::{AlgorithmClient, WorkerEndpoint};
pub use catalog::{CollectorSidecarConfig, RuntimeCatalog, SuggestionWorkerConfig};
pub use experiment_repository::ExperimentRepository;
pub use job_provider::{JobProvider, WorkloadCondition};
pub use metrics_sink::MetricsSink;
pub use suggestion_repository::SuggestionRepository;
pub use trial_repository::TrialRepository;
pub use worker_host::WorkerHost;
