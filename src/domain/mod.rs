//! Domain layer: models, ports and errors.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
