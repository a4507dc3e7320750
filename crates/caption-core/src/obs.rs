//! Structured lifecycle events for the captioning workflow.
//!
//! Every event is emitted with an `event` field so log pipelines can filter
//! on it, e.g. `event = "workflow.finished"`.

use tracing::{field, info, warn, Span};

use crate::error::ErrorKind;

/// Workflow-scoped span carrying the operation number and, once known, the
/// record id. Attach it to the workflow future with `Instrument`.
pub struct WorkflowSpan {
    span: Span,
}

impl WorkflowSpan {
    pub fn new(operation: u64) -> Self {
        let span = tracing::info_span!(
            "caption.workflow",
            operation = operation,
            record_id = field::Empty,
        );
        Self { span }
    }

    pub fn record_id(&self, record_id: &str) {
        self.span.record("record_id", record_id);
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

pub fn emit_workflow_started(operation: u64, prompt: &str, max_tokens: u32) {
    info!(
        event = "workflow.started",
        operation = operation,
        prompt = %prompt,
        max_tokens = max_tokens,
    );
}

pub fn emit_workflow_finished(
    operation: u64,
    record_id: &str,
    duration_ms: f64,
    success: bool,
    error_kind: Option<ErrorKind>,
) {
    info!(
        event = "workflow.finished",
        operation = operation,
        record_id = %record_id,
        duration_ms = duration_ms,
        success = success,
        error_kind = ?error_kind,
    );
}

pub fn emit_model_loaded(model_id: &str, device: &str, duration_ms: u64) {
    info!(
        event = "model.loaded",
        model_id = %model_id,
        device = %device,
        duration_ms = duration_ms,
    );
}

pub fn emit_model_load_failed(model_id: &str, device: &str, error: &dyn std::fmt::Display) {
    warn!(event = "model.load_failed", model_id = %model_id, device = %device, error = %error);
}

pub fn emit_model_released(model_id: &str, device: &str) {
    info!(event = "model.released", model_id = %model_id, device = %device);
}

pub fn emit_system_initialized(success: bool, components: usize) {
    info!(event = "system.initialized", success = success, components = components);
}

pub fn emit_health_checked(overall: &str, issues: usize, warnings: usize) {
    info!(
        event = "health.checked",
        overall = %overall,
        issues = issues,
        warnings = warnings,
    );
}
