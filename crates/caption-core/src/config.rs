//! Runtime configuration for the caption core.
//!
//! Defaults match the interactive captioning setup; every field can be
//! overridden from the environment via [`CaptionConfig::from_env`] or with
//! the `with_*` builders.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptionError, CaptionResult};

pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-large";
pub const DEFAULT_PROMPT: &str = "a photography of";
pub const DEFAULT_MAX_TOKENS: u32 = 50;
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Device placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Accelerator when the probe reports one, CPU otherwise.
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = CaptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(CaptionError::InvalidConfig(format!(
                "unknown device preference '{other}' (expected auto, cpu or cuda)"
            ))),
        }
    }
}

/// Snapshot of configuration values consumed by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Identifier of the captioning model to load.
    pub model_id: String,
    pub device: DevicePreference,
    /// Longest side allowed after preprocessing.
    pub max_dimension: u32,
    /// Upload size limit enforced by the file image source.
    pub max_upload_bytes: u64,
    pub default_prompt: String,
    pub default_max_tokens: u32,
    /// Upper bound on a single inference call; `None` waits indefinitely.
    pub inference_timeout: Option<Duration>,
    /// Default cap for history retrieval.
    pub history_limit: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            device: DevicePreference::Auto,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_prompt: DEFAULT_PROMPT.to_string(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            inference_timeout: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl CaptionConfig {
    /// Load configuration from `CAPTION_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are rejected.
    pub fn from_env() -> CaptionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> CaptionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(model_id) = lookup("CAPTION_MODEL_ID") {
            cfg.model_id = model_id;
        }
        if let Some(device) = lookup("CAPTION_DEVICE") {
            cfg.device = device.parse()?;
        }
        if let Some(raw) = lookup("CAPTION_MAX_DIMENSION") {
            cfg.max_dimension = parse_number("CAPTION_MAX_DIMENSION", &raw)?;
        }
        if let Some(raw) = lookup("CAPTION_MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = parse_number("CAPTION_MAX_UPLOAD_BYTES", &raw)?;
        }
        if let Some(prompt) = lookup("CAPTION_DEFAULT_PROMPT") {
            cfg.default_prompt = prompt;
        }
        if let Some(raw) = lookup("CAPTION_MAX_TOKENS") {
            cfg.default_max_tokens = parse_number("CAPTION_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = lookup("CAPTION_INFERENCE_TIMEOUT_MS") {
            let ms: u64 = parse_number("CAPTION_INFERENCE_TIMEOUT_MS", &raw)?;
            cfg.inference_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("CAPTION_HISTORY_LIMIT") {
            cfg.history_limit = parse_number("CAPTION_HISTORY_LIMIT", &raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> CaptionResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(CaptionError::InvalidConfig("model_id must not be empty".into()));
        }
        if self.max_dimension == 0 {
            return Err(CaptionError::InvalidConfig(
                "max_dimension must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = Some(timeout);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> CaptionResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CaptionError::InvalidConfig(format!("{key} is not a valid number: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let cfg = CaptionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, CaptionConfig::default());
        assert_eq!(cfg.model_id, DEFAULT_MODEL_ID);
        assert_eq!(cfg.default_max_tokens, 50);
        assert!(cfg.inference_timeout.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let cfg = CaptionConfig::from_lookup(lookup_from(&[
            ("CAPTION_MODEL_ID", "tiny-captioner"),
            ("CAPTION_DEVICE", "cpu"),
            ("CAPTION_MAX_DIMENSION", "512"),
            ("CAPTION_INFERENCE_TIMEOUT_MS", "2500"),
            ("CAPTION_HISTORY_LIMIT", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.model_id, "tiny-captioner");
        assert_eq!(cfg.device, DevicePreference::Cpu);
        assert_eq!(cfg.max_dimension, 512);
        assert_eq!(cfg.inference_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(cfg.history_limit, 3);
    }

    #[test]
    fn test_malformed_number_is_invalid_config() {
        let err = CaptionConfig::from_lookup(lookup_from(&[("CAPTION_MAX_TOKENS", "many")]))
            .unwrap_err();
        assert!(matches!(err, CaptionError::InvalidConfig(_)));
        assert!(err.to_string().contains("CAPTION_MAX_TOKENS"));
    }

    #[test]
    fn test_unknown_device_rejected() {
        let err = "tpu".parse::<DevicePreference>().unwrap_err();
        assert!(err.to_string().contains("tpu"));
        assert_eq!("GPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
    }

    #[test]
    fn test_zero_dimension_fails_validation() {
        let cfg = CaptionConfig::default().with_max_dimension(0);
        assert!(cfg.validate().is_err());
    }
}
