//! Worker hosts: lifecycle of the per-suggestion algorithm worker.

pub mod local;
pub mod mock;

pub use local::{LocalWorkerHost, LocalWorkerHostConfig};
pub use mock::MockWorkerHost;
