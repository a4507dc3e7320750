//! Health aggregation over registered components.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::StatisticsReport;
use crate::coordinator::probe::ComponentProbe;
use crate::coordinator::registry::Component;

pub const RESOURCE_NOT_READY: &str = "resource not ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    Info,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    HealthyWithWarnings,
    Unhealthy,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallHealth::Healthy => "healthy",
            OverallHealth::HealthyWithWarnings => "healthy_with_warnings",
            OverallHealth::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Probe result for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub key: String,
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

impl HealthEntry {
    pub fn new(key: impl Into<String>, status: HealthStatus, issues: Vec<String>) -> Self {
        Self {
            key: key.into(),
            status,
            issues,
        }
    }

    fn summary(&self) -> String {
        format!("{}: {}", self.key, self.issues.join(", "))
    }
}

/// Aggregated health of the system. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub entries: Vec<HealthEntry>,
    /// Summaries of `Error` entries.
    pub issues: Vec<String>,
    /// Summaries of `Warning` entries.
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregate entries: any `Error` is unhealthy, warnings only annotate.
    pub fn from_entries(entries: Vec<HealthEntry>) -> Self {
        let issues: Vec<String> = entries
            .iter()
            .filter(|e| e.status == HealthStatus::Error)
            .map(HealthEntry::summary)
            .collect();
        let warnings: Vec<String> = entries
            .iter()
            .filter(|e| e.status == HealthStatus::Warning)
            .map(HealthEntry::summary)
            .collect();

        let overall = if !issues.is_empty() {
            OverallHealth::Unhealthy
        } else if !warnings.is_empty() {
            OverallHealth::HealthyWithWarnings
        } else {
            OverallHealth::Healthy
        };

        Self {
            overall,
            entries,
            issues,
            warnings,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall != OverallHealth::Unhealthy
    }

    pub fn entry(&self, key: &str) -> Option<&HealthEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

/// Probe one component. Never panics: a panicking probe becomes an `Error` entry.
pub fn check_component(key: &str, component: &Component) -> HealthEntry {
    let Some(probe) = component.probe() else {
        return HealthEntry::new(key, HealthStatus::Healthy, Vec::new());
    };

    match panic::catch_unwind(AssertUnwindSafe(|| probe_entry(key, probe))) {
        Ok(entry) => entry,
        Err(payload) => HealthEntry::new(
            key,
            HealthStatus::Error,
            vec![format!("probe panicked: {}", panic_message(payload.as_ref()))],
        ),
    }
}

fn probe_entry(key: &str, probe: &dyn ComponentProbe) -> HealthEntry {
    if let Some(status) = probe.status() {
        return match status {
            Ok(status) if status.loaded => HealthEntry::new(key, HealthStatus::Healthy, Vec::new()),
            Ok(_) => HealthEntry::new(
                key,
                HealthStatus::Warning,
                vec![RESOURCE_NOT_READY.to_string()],
            ),
            Err(e) => HealthEntry::new(key, HealthStatus::Error, vec![e.to_string()]),
        };
    }

    if let Some(statistics) = probe.statistics() {
        return match statistics {
            Ok(StatisticsReport::Empty { message }) => {
                HealthEntry::new(key, HealthStatus::Info, vec![message])
            }
            Ok(StatisticsReport::Available(_)) => {
                HealthEntry::new(key, HealthStatus::Healthy, Vec::new())
            }
            Err(e) => HealthEntry::new(key, HealthStatus::Error, vec![e.to_string()]),
        };
    }

    HealthEntry::new(key, HealthStatus::Healthy, Vec::new())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::HistoryStatistics;
    use crate::error::{CaptionError, CaptionResult};
    use crate::imaging::ResizePreprocessor;
    use crate::model::ResourceStatus;
    use std::sync::Arc;

    struct StatusProbe(bool);
    impl ComponentProbe for StatusProbe {
        fn status(&self) -> Option<CaptionResult<ResourceStatus>> {
            Some(Ok(ResourceStatus {
                loaded: self.0,
                device: None,
                model_id: "m".to_string(),
                has_model: self.0,
                has_codec: self.0,
            }))
        }
    }

    struct FailingProbe;
    impl ComponentProbe for FailingProbe {
        fn status(&self) -> Option<CaptionResult<ResourceStatus>> {
            Some(Err(CaptionError::NotReady("device lost".to_string())))
        }
    }

    struct PanickingProbe;
    impl ComponentProbe for PanickingProbe {
        fn statistics(&self) -> Option<CaptionResult<StatisticsReport>> {
            panic!("stats exploded")
        }
    }

    struct StatsProbe(StatisticsReport);
    impl ComponentProbe for StatsProbe {
        fn statistics(&self) -> Option<CaptionResult<StatisticsReport>> {
            Some(Ok(self.0.clone()))
        }
    }

    struct Plain;
    impl ComponentProbe for Plain {}

    fn aux(probe: impl ComponentProbe + 'static) -> Component {
        Component::Auxiliary(Arc::new(probe))
    }

    #[test]
    fn test_unloaded_resource_is_warning_only() {
        let entry = check_component("resourceManager", &aux(StatusProbe(false)));
        assert_eq!(entry.status, HealthStatus::Warning);
        assert_eq!(entry.issues, vec![RESOURCE_NOT_READY]);

        let report = HealthReport::from_entries(vec![entry]);
        assert_eq!(report.overall, OverallHealth::HealthyWithWarnings);
        assert!(report.is_healthy());
        assert_eq!(report.warnings, vec!["resourceManager: resource not ready"]);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_probe_error_is_unhealthy() {
        let entry = check_component("gpu", &aux(FailingProbe));
        assert_eq!(entry.status, HealthStatus::Error);
        assert!(entry.issues[0].contains("device lost"));

        let report = HealthReport::from_entries(vec![
            entry,
            check_component("ok", &aux(StatusProbe(true))),
        ]);
        assert_eq!(report.overall, OverallHealth::Unhealthy);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("gpu: "));
    }

    #[test]
    fn test_panicking_probe_captured() {
        let entry = check_component("stats", &aux(PanickingProbe));
        assert_eq!(entry.status, HealthStatus::Error);
        assert!(entry.issues[0].contains("stats exploded"));
    }

    #[test]
    fn test_statistics_probe_states() {
        let empty = check_component(
            "executor",
            &aux(StatsProbe(StatisticsReport::Empty {
                message: "No analysis history available".to_string(),
            })),
        );
        assert_eq!(empty.status, HealthStatus::Info);
        assert_eq!(empty.issues, vec!["No analysis history available"]);

        let available = check_component(
            "executor",
            &aux(StatsProbe(StatisticsReport::Available(HistoryStatistics {
                count: 1,
                success_count: 1,
                fail_count: 0,
                success_rate: 100.0,
                total_time_ms: 5.0,
                avg_time_ms: 5.0,
            }))),
        );
        assert_eq!(available.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_components_without_probes_are_healthy() {
        let plain = check_component("frontend", &aux(Plain));
        assert_eq!(plain.status, HealthStatus::Healthy);
        let preprocessor = check_component(
            "imagePreprocessor",
            &Component::Preprocessor(Arc::new(ResizePreprocessor::default())),
        );
        assert_eq!(preprocessor.status, HealthStatus::Healthy);
        assert!(preprocessor.issues.is_empty());

        let report = HealthReport::from_entries(vec![plain, preprocessor]);
        assert_eq!(report.overall, OverallHealth::Healthy);
    }

    #[test]
    fn test_empty_registry_is_healthy() {
        assert_eq!(
            HealthReport::from_entries(Vec::new()).overall,
            OverallHealth::Healthy
        );
    }
}
