//! Component registry and the coordinator that drives it.
//!
//! Provides:
//! - [`registry::AgentRegistry`]: named components with a closed set of roles
//! - [`orchestrator::Coordinator`]: startup state machine and per-request workflow
//! - [`health`]: health aggregation over component probes
//! - [`status`]: system state and status snapshot

pub mod health;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod status;

pub use health::{HealthEntry, HealthReport, HealthStatus, OverallHealth};
pub use orchestrator::Coordinator;
pub use probe::ComponentProbe;
pub use registry::{
    AgentRegistry, Component, ComponentRole, EXECUTOR_KEY, PREPROCESSOR_KEY, REQUIRED_COMPONENTS,
    RESOURCE_MANAGER_KEY,
};
pub use status::{SystemState, SystemStatusView};
