//! SQLite adapters: the versioned resource store and the metrics sink.

pub mod connection;
pub mod experiment_repository;
pub mod migrations;
pub mod observation_log;
pub mod suggestion_repository;
pub mod trial_repository;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use experiment_repository::SqliteExperimentRepository;
pub use migrations::{all_embedded_migrations, initial_schema_migration, Migration, Migrator};
pub use observation_log::SqliteMetricsSink;
pub use suggestion_repository::SqliteSuggestionRepository;
pub use trial_repository::SqliteTrialRepository;
