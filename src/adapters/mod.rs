//! Adapters: concrete implementations of the domain ports.

pub mod algorithms;
pub mod catalog;
pub mod jobs;
pub mod metrics;
pub mod sqlite;
pub mod workers;

pub use catalog::ConfigCatalog;
