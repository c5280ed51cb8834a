//! Metrics-collector configuration attached to experiments and trials.

use serde::{Deserialize, Serialize};

/// Default path the wrapped primary command tees its output to.
pub const DEFAULT_METRICS_FILE: &str = "/var/log/tunelab/metrics.log";

/// Marker written next to the metrics file when the workload finishes.
pub const TRAINING_COMPLETED: &str = "completed";

/// Marker written by the early-stopping path; the wrapped command treats it
/// as a clean exit.
pub const TRAINING_EARLY_STOPPED: &str = "early-stopped";

/// How a trial's metrics are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectorKind {
    /// Scrape the primary container's stdout (the default).
    StdOut,
    /// Scrape a file the user script writes.
    File,
    /// Scrape a tf.event directory.
    TfEvent,
    /// Scrape an HTTP metrics endpoint.
    Prometheus,
    /// User-supplied sidecar.
    Custom,
}

impl Default for CollectorKind {
    fn default() -> Self {
        Self::StdOut
    }
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StdOut => "stdOut",
            Self::File => "file",
            Self::TfEvent => "tfEvent",
            Self::Prometheus => "prometheus",
            Self::Custom => "custom",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stdOut" | "stdout" => Some(Self::StdOut),
            "file" => Some(Self::File),
            "tfEvent" | "tfevent" => Some(Self::TfEvent),
            "prometheus" => Some(Self::Prometheus),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Whether this collector needs the primary container's command wrapped
    /// so output lands on the shared volume.
    pub fn wraps_primary_command(&self) -> bool {
        matches!(self, Self::StdOut | Self::File | Self::TfEvent)
    }
}

/// Whether a collected path is a single file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemPath {
    pub path: String,
    pub kind: FileSystemKind,
}

/// Regex filters applied to collected output. Each pattern must expose
/// exactly two capture groups: metric name and value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFilter {
    #[serde(default)]
    pub metrics_format: Vec<String>,
}

/// Endpoint scraped by the prometheus collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpGet {
    pub port: i32,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_path: Option<FileSystemPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<MetricsFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsCollectorSpec {
    #[serde(default)]
    pub kind: CollectorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CollectorSource>,
}

impl MetricsCollectorSpec {
    /// Path on the shared volume the collector scrapes, when file-based.
    pub fn mount_path(&self) -> Option<(String, FileSystemKind)> {
        match self.kind {
            CollectorKind::StdOut => {
                Some((DEFAULT_METRICS_FILE.to_string(), FileSystemKind::File))
            }
            CollectorKind::File | CollectorKind::TfEvent | CollectorKind::Custom => self
                .source
                .as_ref()
                .and_then(|s| s.file_system_path.as_ref())
                .map(|p| (p.path.clone(), p.kind)),
            CollectorKind::Prometheus => None,
        }
    }

    /// Metric-format regexes, empty when the default `name=value` parsing
    /// applies.
    pub fn metrics_formats(&self) -> &[String] {
        self.source
            .as_ref()
            .and_then(|s| s.filter.as_ref())
            .map(|f| f.metrics_format.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_collector_uses_default_path() {
        let spec = MetricsCollectorSpec::default();
        assert_eq!(spec.kind, CollectorKind::StdOut);
        assert_eq!(
            spec.mount_path(),
            Some((DEFAULT_METRICS_FILE.to_string(), FileSystemKind::File))
        );
    }

    #[test]
    fn test_file_collector_uses_source_path() {
        let spec = MetricsCollectorSpec {
            kind: CollectorKind::File,
            source: Some(CollectorSource {
                file_system_path: Some(FileSystemPath {
                    path: "/output/metrics.txt".to_string(),
                    kind: FileSystemKind::File,
                }),
                ..Default::default()
            }),
        };
        assert_eq!(
            spec.mount_path(),
            Some(("/output/metrics.txt".to_string(), FileSystemKind::File))
        );
    }

    #[test]
    fn test_prometheus_collector_has_no_mount_path() {
        let spec = MetricsCollectorSpec {
            kind: CollectorKind::Prometheus,
            source: Some(CollectorSource {
                http_get: Some(HttpGet {
                    port: 8080,
                    path: "/metrics".to_string(),
                }),
                ..Default::default()
            }),
        };
        assert_eq!(spec.mount_path(), None);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            CollectorKind::StdOut,
            CollectorKind::File,
            CollectorKind::TfEvent,
            CollectorKind::Prometheus,
            CollectorKind::Custom,
        ] {
            assert_eq!(CollectorKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(CollectorKind::from_str("bogus"), None);
    }
}
