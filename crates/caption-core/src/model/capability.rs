//! Seams to the external model runtime.
//!
//! The core never looks inside a model: it encodes a prompt, asks for tokens
//! and decodes them. Implementations wrap whatever runtime actually runs the
//! network.

use std::sync::Arc;

use async_trait::async_trait;

use crate::imaging::Image;
use crate::model::Device;

/// The opaque generation call.
///
/// May block for a long time. Implementations must tolerate being dropped
/// mid-call, which is how cancellation and timeouts are delivered.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    /// Short type name reported by model info.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        image: &Image,
        prompt_tokens: &[u32],
        max_tokens: u32,
    ) -> anyhow::Result<Vec<u32>>;
}

/// Text side of the model: prompt encoding and caption decoding.
pub trait TextCodec: Send + Sync {
    fn name(&self) -> &str;

    fn encode_prompt(&self, prompt: &str) -> anyhow::Result<Vec<u32>>;

    /// Decode generated tokens, skipping special tokens.
    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String>;
}

/// Builds the two halves of a model resource.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_codec(&self, model_id: &str) -> anyhow::Result<Arc<dyn TextCodec>>;

    async fn load_model(
        &self,
        model_id: &str,
        device: &Device,
    ) -> anyhow::Result<Arc<dyn InferenceCapability>>;

    /// Best-effort release of device memory after teardown.
    async fn release(&self, _device: &Device) -> anyhow::Result<()> {
        Ok(())
    }
}
