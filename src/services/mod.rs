//! Cross-cutting services: configuration, events, counters.

pub mod config;
pub mod event_bus;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use event_bus::{EventAction, EventBus, ResourceEvent, ResourceKind};
pub use telemetry::{Telemetry, TelemetrySnapshot};
