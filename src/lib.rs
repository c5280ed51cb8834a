//! Tunelab - hyperparameter-search and NAS orchestrator.

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod services;

pub use domain::{DomainError, DomainResult};
pub use services::{Config, ConfigError};
