//! System state machine and the status snapshot returned by the coordinator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::coordinator::registry::Component;

/// Startup state machine.
///
/// `Uninitialized -> Initializing -> Ready | Failed`; `Failed` may be
/// re-entered by another initialize, and cleanup returns to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Uninitialized => "uninitialized",
            SystemState::Initializing => "initializing",
            SystemState::Ready => "ready",
            SystemState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusView {
    pub state: SystemState,
    pub initialized: bool,
    pub total_operations: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub registered_components: Vec<String>,
    pub component_count: usize,
    pub component_statuses: BTreeMap<String, Value>,
}

/// Status of one component as JSON: the probed resource status, the
/// statistics report, or `{"status": "active"}`.
pub fn component_status(component: &Component) -> Value {
    let Some(probe) = component.probe() else {
        return active();
    };

    if let Some(status) = probe.status() {
        return match status {
            Ok(status) => serde_json::to_value(status).unwrap_or_else(|e| error_value(&e)),
            Err(e) => error_value(&e),
        };
    }
    if let Some(statistics) = probe.statistics() {
        return match statistics {
            Ok(report) => serde_json::to_value(report).unwrap_or_else(|e| error_value(&e)),
            Err(e) => error_value(&e),
        };
    }
    active()
}

fn active() -> Value {
    json!({ "status": "active" })
}

fn error_value(error: &dyn fmt::Display) -> Value {
    json!({ "status": "error", "error": error.to_string() })
}
