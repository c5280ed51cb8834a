//! Metrics sinks.

pub mod memory;

pub use memory::MemoryMetricsSink;
