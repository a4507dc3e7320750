//! The coordinator: startup state machine, per-request workflow, status,
//! health and teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn, Instrument};

use crate::analysis::{
    AnalysisExecutor, AnalysisRecord, CancelSignal, HistoryLedger, WorkflowMetadata,
};
use crate::config::CaptionConfig;
use crate::coordinator::health::{check_component, HealthReport};
use crate::coordinator::registry::{
    AgentRegistry, Component, EXECUTOR_KEY, PREPROCESSOR_KEY, RESOURCE_MANAGER_KEY,
};
use crate::coordinator::status::{component_status, SystemState, SystemStatusView};
use crate::error::{CaptionError, CaptionResult};
use crate::imaging::{Image, Preprocessor};
use crate::metrics::METRICS;
use crate::model::{DeviceProbe, ModelLoader, ModelManager};
use crate::obs;

enum Prompts<'a> {
    Single(&'a str),
    Multi(&'a [String]),
}

impl Prompts<'_> {
    /// Prompt recorded on records produced before the executor runs.
    fn label(&self) -> &str {
        match self {
            Prompts::Single(prompt) => prompt,
            Prompts::Multi(prompts) => prompts.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// Sequences preprocess, inference and recording over registered components.
///
/// `run_workflow` may be called concurrently; the components share one model
/// and one history ledger.
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    state: Mutex<SystemState>,
    init_lock: tokio::sync::Mutex<()>,
    total_operations: AtomicU64,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl Coordinator {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(SystemState::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
            total_operations: AtomicU64::new(0),
            last_activity: Mutex::new(None),
        }
    }

    /// Register the three required components built from `config`.
    pub fn from_parts(
        config: &CaptionConfig,
        loader: Arc<dyn ModelLoader>,
        device_probe: Arc<dyn DeviceProbe>,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Self {
        let manager = Arc::new(ModelManager::new(config, loader, device_probe));
        let history = Arc::new(HistoryLedger::new(config.history_limit));
        let executor = AnalysisExecutor::new(Arc::clone(&manager), history)
            .with_inference_timeout(config.inference_timeout);

        let registry = Arc::new(AgentRegistry::new());
        registry.register(RESOURCE_MANAGER_KEY, Component::ResourceManager(manager));
        registry.register(PREPROCESSOR_KEY, Component::Preprocessor(preprocessor));
        registry.register(EXECUTOR_KEY, Component::Executor(Arc::new(executor)));
        Self::new(registry)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    fn state_guard(&self) -> MutexGuard<'_, SystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SystemState) {
        *self.state_guard() = state;
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn state(&self) -> SystemState {
        *self.state_guard()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == SystemState::Ready
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::SeqCst)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// History of the registered executor, if any.
    pub fn history(&self) -> Option<Arc<HistoryLedger>> {
        self.registry.executor().map(|e| Arc::clone(e.history()))
    }

    /// Verify required components and load the model. Returns overall success.
    pub async fn initialize(&self) -> bool {
        let result = self.try_initialize().await;
        let success = result.is_ok();
        if let Err(e) = &result {
            error!(error = %e, "system initialization failed");
        }
        obs::emit_system_initialized(success, self.registry.len());
        success
    }

    /// Like [`Coordinator::initialize`], with the failure reason.
    ///
    /// Concurrent calls are serialized; once `Ready`, later calls return
    /// immediately. A `Failed` system may be initialized again.
    pub async fn try_initialize(&self) -> CaptionResult<()> {
        let _init = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let missing = self.registry.missing_required();
        if !missing.is_empty() {
            warn!(missing = %missing.join(", "), "required components not registered");
            self.set_state(SystemState::Failed);
            return Err(CaptionError::MissingRequiredAgents { missing });
        }
        let Some(manager) = self.registry.resource_manager() else {
            self.set_state(SystemState::Failed);
            return Err(CaptionError::MissingRequiredAgents {
                missing: vec![RESOURCE_MANAGER_KEY.to_string()],
            });
        };

        self.set_state(SystemState::Initializing);
        info!(components = self.registry.len(), "initializing system");
        match manager.initialize().await {
            Ok(()) => {
                self.set_state(SystemState::Ready);
                self.touch();
                info!("system ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(SystemState::Failed);
                Err(e)
            }
        }
    }

    /// Preprocess `image`, caption it with `prompt` and record the outcome.
    ///
    /// Never fails outright: every failure is reported through the record.
    pub async fn run_workflow(
        &self,
        image: Image,
        prompt: &str,
        max_tokens: u32,
    ) -> AnalysisRecord {
        self.run_workflow_with_cancel(image, prompt, max_tokens, &CancelSignal::never())
            .await
    }

    pub async fn run_workflow_with_cancel(
        &self,
        image: Image,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancelSignal,
    ) -> AnalysisRecord {
        self.execute(image, Prompts::Single(prompt), max_tokens, cancel)
            .await
    }

    /// Preprocess once, then try `prompts` in order until one succeeds.
    pub async fn run_workflow_multi_prompt<S: AsRef<str>>(
        &self,
        image: Image,
        prompts: &[S],
        max_tokens: u32,
    ) -> AnalysisRecord {
        let prompts: Vec<String> = prompts.iter().map(|p| p.as_ref().to_string()).collect();
        self.execute(image, Prompts::Multi(&prompts), max_tokens, &CancelSignal::never())
            .await
    }

    async fn execute(
        &self,
        image: Image,
        prompts: Prompts<'_>,
        max_tokens: u32,
        cancel: &CancelSignal,
    ) -> AnalysisRecord {
        // Count the attempt before any work so failures are counted too.
        let operation = self.total_operations.fetch_add(1, Ordering::SeqCst) + 1;
        METRICS.inc_workflows_started();

        let span = obs::WorkflowSpan::new(operation);
        self.execute_steps(image, prompts, max_tokens, cancel, operation, &span)
            .instrument(span.span())
            .await
    }

    async fn execute_steps(
        &self,
        image: Image,
        prompts: Prompts<'_>,
        max_tokens: u32,
        cancel: &CancelSignal,
        operation: u64,
        span: &obs::WorkflowSpan,
    ) -> AnalysisRecord {
        let started = Instant::now();
        let label = prompts.label().to_string();
        let dims = image.dimensions();
        let early_failure = |error: CaptionError| {
            AnalysisRecord::failed(&error, &label, max_tokens, dims)
        };
        obs::emit_workflow_started(operation, &label, max_tokens);

        if !self.is_initialized() {
            let record = early_failure(CaptionError::NotReady(
                "system not initialized; call initialize first".to_string(),
            ));
            return self.finish(record, started, operation, span);
        }

        let (Some(preprocessor), Some(executor)) =
            (self.registry.preprocessor(), self.registry.executor())
        else {
            let record = early_failure(CaptionError::MissingRequiredAgents {
                missing: self.registry.missing_required(),
            });
            return self.finish(record, started, operation, span);
        };

        let image = match self.preprocess(preprocessor, image, cancel).await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "preprocessing did not complete");
                return self.finish(early_failure(e), started, operation, span);
            }
        };

        let record = match prompts {
            Prompts::Single(prompt) => {
                executor
                    .run_cancellable(&image, prompt, max_tokens, cancel)
                    .await
            }
            Prompts::Multi(prompts) => {
                executor
                    .run_multi_prompt_cancellable(&image, prompts, max_tokens, cancel)
                    .await
            }
        };

        self.touch();
        let record = self.finish(record, started, operation, span);
        executor.history().append(record.clone());
        record
    }

    /// Run the preprocessor off the async runtime, racing cancellation.
    async fn preprocess(
        &self,
        preprocessor: Arc<dyn Preprocessor>,
        image: Image,
        cancel: &CancelSignal,
    ) -> CaptionResult<Image> {
        if cancel.is_cancelled() {
            return Err(CaptionError::Cancelled(
                "cancelled before preprocessing".to_string(),
            ));
        }
        let task = tokio::task::spawn_blocking(move || preprocessor.normalize(image));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                METRICS.inc_cancellations();
                Err(CaptionError::Cancelled("cancelled during preprocessing".to_string()))
            }
            joined = task => joined.map_err(|e| CaptionError::PreprocessingFailure(e.to_string())),
        }
    }

    fn finish(
        &self,
        record: AnalysisRecord,
        started: Instant,
        operation: u64,
        span: &obs::WorkflowSpan,
    ) -> AnalysisRecord {
        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let record = record.with_workflow(WorkflowMetadata {
            total_time_ms,
            components_involved: self.registry.keys(),
            operation_count: operation,
            timestamp: Utc::now(),
        });

        let id = record.id.to_string();
        span.record_id(&id);
        obs::emit_workflow_finished(
            operation,
            &id,
            total_time_ms,
            record.success,
            record.error_kind,
        );
        record
    }

    pub fn get_status(&self) -> SystemStatusView {
        let components = self.registry.entries();
        let state = self.state();
        SystemStatusView {
            state,
            initialized: state == SystemState::Ready,
            total_operations: self.total_operations(),
            last_activity: self.last_activity(),
            registered_components: components.iter().map(|(k, _)| k.clone()).collect(),
            component_count: components.len(),
            component_statuses: components
                .iter()
                .map(|(k, c)| (k.clone(), component_status(c)))
                .collect(),
        }
    }

    /// Probe every registered component. Never panics.
    pub fn health_check(&self) -> HealthReport {
        let entries = self
            .registry
            .entries()
            .iter()
            .map(|(key, component)| check_component(key, component))
            .collect();
        let report = HealthReport::from_entries(entries);
        obs::emit_health_checked(
            &report.overall.to_string(),
            report.issues.len(),
            report.warnings.len(),
        );
        report
    }

    /// Release the model, clear history and reset counters.
    ///
    /// Idempotent. `last_activity` is left as it was.
    pub async fn cleanup(&self) {
        let _init = self.init_lock.lock().await;
        if let Some(manager) = self.registry.resource_manager() {
            manager.cleanup().await;
        }
        if let Some(history) = self.history() {
            history.clear();
        }
        self.set_state(SystemState::Uninitialized);
        self.total_operations.store(0, Ordering::SeqCst);
        info!("system cleaned up");
    }
}
