//! Single inference calls and the multi-prompt fallback policy.
//!
//! The executor never holds a lock across inference: it clones the shared
//! model handle and awaits the call, so overlapping requests run in parallel
//! and cancellation only has to drop the in-flight future.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::analysis::{AnalysisRecord, CancelSignal, HistoryLedger, StatisticsReport};
use crate::coordinator::probe::ComponentProbe;
use crate::error::{CaptionError, CaptionResult};
use crate::imaging::Image;
use crate::metrics::METRICS;
use crate::model::{LoadedModel, ModelManager};

/// Runs prompts against the model owned by a [`ModelManager`].
pub struct AnalysisExecutor {
    manager: Arc<ModelManager>,
    history: Arc<HistoryLedger>,
    inference_timeout: Option<Duration>,
}

impl AnalysisExecutor {
    pub fn new(manager: Arc<ModelManager>, history: Arc<HistoryLedger>) -> Self {
        Self {
            manager,
            history,
            inference_timeout: None,
        }
    }

    /// Bound every inference call; an expired call yields a `Cancelled` record.
    pub fn with_inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub async fn run(&self, image: &Image, prompt: &str, max_tokens: u32) -> AnalysisRecord {
        self.run_cancellable(image, prompt, max_tokens, &CancelSignal::never())
            .await
    }

    pub async fn run_cancellable(
        &self,
        image: &Image,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancelSignal,
    ) -> AnalysisRecord {
        let resource = self.manager.resource();
        self.run_on(resource.as_deref(), image, prompt, max_tokens, cancel)
            .await
    }

    /// Run one prompt against an explicit resource.
    ///
    /// `None` stands for a model that is not loaded and yields `NotReady`
    /// without calling anything.
    pub async fn run_on(
        &self,
        resource: Option<&LoadedModel>,
        image: &Image,
        prompt: &str,
        max_tokens: u32,
        cancel: &CancelSignal,
    ) -> AnalysisRecord {
        let dims = image.dimensions();
        let Some(resource) = resource else {
            return AnalysisRecord::failed(
                &CaptionError::NotReady(
                    "model not loaded; initialize the model first".to_string(),
                ),
                prompt,
                max_tokens,
                dims,
            );
        };

        let device = resource.device().id();
        let fail = |error: CaptionError, elapsed_ms: f64| {
            match &error {
                CaptionError::Cancelled(_) => METRICS.inc_cancellations(),
                _ => METRICS.inc_inference_failures(),
            }
            warn!(device, error = %error, "analysis failed");
            AnalysisRecord::failed(&error, prompt, max_tokens, dims)
                .with_processing_time(elapsed_ms)
                .served_by(resource.model_id(), device)
        };

        if cancel.is_cancelled() {
            return fail(
                CaptionError::Cancelled("cancelled before inference".to_string()),
                0.0,
            );
        }

        let prompt_tokens = match resource.codec().encode_prompt(prompt) {
            Ok(tokens) => tokens,
            Err(e) => {
                return fail(
                    CaptionError::InferenceFailure(format!("prompt encoding: {e}")),
                    0.0,
                )
            }
        };

        debug!(device, max_tokens, "generating caption");
        let started = Instant::now();
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(CaptionError::Cancelled("inference cancelled by caller".to_string()))
            }
            outcome = self.generate(resource, image, &prompt_tokens, max_tokens) => outcome,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let tokens = match generated {
            Ok(tokens) => tokens,
            Err(error) => return fail(error, elapsed_ms),
        };

        match resource.codec().decode(&tokens) {
            Ok(caption) => {
                info!(device, elapsed_ms, caption = %caption, "caption generated");
                AnalysisRecord::succeeded(caption, prompt, max_tokens, elapsed_ms, dims)
                    .served_by(resource.model_id(), device)
            }
            Err(e) => fail(
                CaptionError::InferenceFailure(format!("decoding output: {e}")),
                elapsed_ms,
            ),
        }
    }

    async fn generate(
        &self,
        resource: &LoadedModel,
        image: &Image,
        prompt_tokens: &[u32],
        max_tokens: u32,
    ) -> CaptionResult<Vec<u32>> {
        let call = resource.model().generate(image, prompt_tokens, max_tokens);
        let result = match self.inference_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CaptionError::Cancelled(format!(
                        "inference timed out after {}ms",
                        limit.as_millis()
                    )))
                }
            },
            None => call.await,
        };
        result.map_err(|e| CaptionError::InferenceFailure(e.to_string()))
    }

    pub async fn run_multi_prompt<S: AsRef<str>>(
        &self,
        image: &Image,
        prompts: &[S],
        max_tokens: u32,
    ) -> AnalysisRecord {
        self.run_multi_prompt_cancellable(image, prompts, max_tokens, &CancelSignal::never())
            .await
    }

    /// Try `prompts` in order and return the first success.
    ///
    /// When every prompt fails, the last attempted record is returned. A
    /// cancelled attempt stops the sequence. An empty list yields
    /// `NoPromptsProvided` without any call.
    pub async fn run_multi_prompt_cancellable<S: AsRef<str>>(
        &self,
        image: &Image,
        prompts: &[S],
        max_tokens: u32,
        cancel: &CancelSignal,
    ) -> AnalysisRecord {
        if prompts.is_empty() {
            return AnalysisRecord::failed(
                &CaptionError::NoPromptsProvided,
                "",
                max_tokens,
                image.dimensions(),
            );
        }

        let resource = self.manager.resource();
        let total = prompts.len();
        let mut last = None;
        for (idx, prompt) in prompts.iter().enumerate() {
            let prompt = prompt.as_ref();
            info!(attempt = idx + 1, total, prompt, "trying prompt");

            let record = self
                .run_on(resource.as_deref(), image, prompt, max_tokens, cancel)
                .await;
            if record.success || record.is_cancelled() {
                return record;
            }
            last = Some(record);
        }

        last.unwrap_or_else(|| {
            AnalysisRecord::failed(
                &CaptionError::NoPromptsProvided,
                "",
                max_tokens,
                image.dimensions(),
            )
        })
    }
}

impl ComponentProbe for AnalysisExecutor {
    fn statistics(&self) -> Option<CaptionResult<StatisticsReport>> {
        Some(Ok(self.history.statistics()))
    }
}
