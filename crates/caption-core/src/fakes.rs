//! In-memory stand-ins for the model runtime.
//!
//! Used by the test suites and by the CLI's placeholder backend. Nothing here
//! touches a real network or device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::imaging::Image;
use crate::model::{
    AcceleratorInfo, Device, DeviceProbe, InferenceCapability, ModelLoader, TextCodec,
};

/// Beginning-of-sequence marker emitted by [`ScriptedModel`].
pub const BOS_TOKEN: u32 = 0x11_0000;
/// End-of-sequence marker emitted by [`ScriptedModel`].
pub const EOS_TOKEN: u32 = 0x11_0001;

// ---------------------------------------------------------------------------
// CharCodec
// ---------------------------------------------------------------------------

/// One token per Unicode scalar. Special tokens fall outside the scalar
/// range and are dropped on decode.
#[derive(Debug, Default, Clone)]
pub struct CharCodec;

impl CharCodec {
    pub fn encode_text(text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    pub fn decode_text(tokens: &[u32]) -> String {
        tokens.iter().filter_map(|&t| char::from_u32(t)).collect()
    }
}

impl TextCodec for CharCodec {
    fn name(&self) -> &str {
        "char-codec"
    }

    fn encode_prompt(&self, prompt: &str) -> anyhow::Result<Vec<u32>> {
        Ok(Self::encode_text(prompt))
    }

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String> {
        Ok(Self::decode_text(tokens).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// One scripted reply of [`ScriptedModel`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Caption(String),
    Fail(String),
    /// Never returns; only cancellation or a timeout ends the call.
    Hang,
}

#[derive(Debug, Clone)]
enum Fallback {
    Caption(String),
    Dimensions,
}

/// Inference double that replays a script, then a fallback reply.
#[derive(Debug)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Fallback,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn with_fallback(fallback: Fallback) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `caption` once the script is exhausted.
    pub fn fixed(caption: impl Into<String>) -> Self {
        Self::with_fallback(Fallback::Caption(caption.into()))
    }

    /// Describes the image size, e.g. "an image of 640x480 pixels".
    pub fn describing_dimensions() -> Self {
        Self::with_fallback(Fallback::Dimensions)
    }

    pub fn with_script(self, replies: impl IntoIterator<Item = Scripted>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
        self
    }

    /// Simulated computation time per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceCapability for ScriptedModel {
    fn name(&self) -> &str {
        "scripted-model"
    }

    async fn generate(
        &self,
        image: &Image,
        prompt_tokens: &[u32],
        max_tokens: u32,
    ) -> anyhow::Result<Vec<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CharCodec::decode_text(prompt_tokens));

        let reply = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let caption = match reply {
            Some(Scripted::Caption(caption)) => caption,
            Some(Scripted::Fail(reason)) => anyhow::bail!(reason),
            Some(Scripted::Hang) => {
                std::future::pending::<()>().await;
                String::new()
            }
            None => match &self.fallback {
                Fallback::Caption(caption) => caption.clone(),
                Fallback::Dimensions => format!("an image of {} pixels", image.dimensions()),
            },
        };

        let mut tokens = vec![BOS_TOKEN];
        tokens.extend(
            CharCodec::encode_text(&caption)
                .into_iter()
                .take(max_tokens as usize),
        );
        tokens.push(EOS_TOKEN);
        Ok(tokens)
    }
}

// ---------------------------------------------------------------------------
// StaticLoader
// ---------------------------------------------------------------------------

/// Loader double that hands out one shared [`ScriptedModel`].
#[derive(Debug)]
pub struct StaticLoader {
    model: Arc<ScriptedModel>,
    fail_codec: bool,
    fail_model: bool,
    failures_left: AtomicUsize,
    load_delay: Option<Duration>,
    codec_loads: AtomicUsize,
    model_loads: AtomicUsize,
    releases: AtomicUsize,
}

impl StaticLoader {
    pub fn new(model: ScriptedModel) -> Self {
        Self::shared(Arc::new(model))
    }

    pub fn shared(model: Arc<ScriptedModel>) -> Self {
        Self {
            model,
            fail_codec: false,
            fail_model: false,
            failures_left: AtomicUsize::new(0),
            load_delay: None,
            codec_loads: AtomicUsize::new(0),
            model_loads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn failing_codec(mut self) -> Self {
        self.fail_codec = true;
        self
    }

    pub fn failing_model(mut self) -> Self {
        self.fail_model = true;
        self
    }

    /// Fail the first `n` model loads, then succeed.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn model(&self) -> &Arc<ScriptedModel> {
        &self.model
    }

    pub fn codec_loads(&self) -> usize {
        self.codec_loads.load(Ordering::SeqCst)
    }

    pub fn model_loads(&self) -> usize {
        self.model_loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for StaticLoader {
    async fn load_codec(&self, model_id: &str) -> anyhow::Result<Arc<dyn TextCodec>> {
        self.codec_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_codec {
            anyhow::bail!("codec for {model_id} unavailable");
        }
        Ok(Arc::new(CharCodec))
    }

    async fn load_model(
        &self,
        model_id: &str,
        device: &Device,
    ) -> anyhow::Result<Arc<dyn InferenceCapability>> {
        self.model_loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_model {
            anyhow::bail!("weights for {model_id} could not be placed on {device}");
        }
        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            anyhow::bail!("model store temporarily unavailable");
        }
        Ok(Arc::clone(&self.model) as Arc<dyn InferenceCapability>)
    }

    async fn release(&self, _device: &Device) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticDeviceProbe
// ---------------------------------------------------------------------------

/// Device probe with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticDeviceProbe(Option<AcceleratorInfo>);

impl StaticDeviceProbe {
    pub fn cpu() -> Self {
        Self(None)
    }

    pub fn gpu(name: &str, memory_gb: u64) -> Self {
        Self(Some(AcceleratorInfo::new(
            name,
            memory_gb * 1024 * 1024 * 1024,
        )))
    }
}

impl DeviceProbe for StaticDeviceProbe {
    fn accelerator(&self) -> Option<AcceleratorInfo> {
        self.0.clone()
    }
}
