//! Model lifecycle: device choice, memoized loading, status and teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{CaptionConfig, DevicePreference};
use crate::coordinator::probe::ComponentProbe;
use crate::error::{CaptionError, CaptionResult};
use crate::metrics::METRICS;
use crate::model::cache::ResourceCache;
use crate::model::capability::{InferenceCapability, ModelLoader, TextCodec};
use crate::model::device::{select_device, AcceleratorInfo, Device, DeviceProbe};
use crate::obs;

/// Memoization key: which model, on which device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub model_id: String,
    pub device: String,
}

impl ResourceKey {
    pub fn new(model_id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model_id, self.device)
    }
}

/// A loaded model bound to one device. Shared by reference, never copied.
pub struct LoadedModel {
    key: ResourceKey,
    device: Device,
    codec: Arc<dyn TextCodec>,
    model: Arc<dyn InferenceCapability>,
    loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    pub fn new(
        key: ResourceKey,
        device: Device,
        codec: Arc<dyn TextCodec>,
        model: Arc<dyn InferenceCapability>,
    ) -> Self {
        Self {
            key,
            device,
            codec,
            model,
            loaded_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn model_id(&self) -> &str {
        &self.key.model_id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn codec(&self) -> &dyn TextCodec {
        self.codec.as_ref()
    }

    pub fn model(&self) -> &dyn InferenceCapability {
        self.model.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("key", &self.key)
            .field("codec", &self.codec.name())
            .field("model", &self.model.name())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Side-effect free snapshot of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub loaded: bool,
    pub device: Option<String>,
    pub model_id: String,
    pub has_model: bool,
    pub has_codec: bool,
}

/// Details about the loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub device: String,
    pub model_type: String,
    pub codec_type: String,
    pub loaded_at: DateTime<Utc>,
    pub accelerator: Option<AcceleratorInfo>,
}

#[derive(Default)]
struct ManagerState {
    // Bumped by every cleanup; a load only publishes under the epoch it began in.
    epoch: u64,
    device: Option<Device>,
    key: Option<ResourceKey>,
    resource: Option<Arc<LoadedModel>>,
}

/// Owns the model resource for the process.
///
/// The model is built through a [`ResourceCache`], so repeated or concurrent
/// `initialize` calls construct it at most once per [`ResourceKey`].
pub struct ModelManager {
    model_id: String,
    preference: DevicePreference,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn DeviceProbe>,
    cache: Arc<ResourceCache<ResourceKey, LoadedModel>>,
    state: RwLock<ManagerState>,
}

impl ModelManager {
    pub fn new(
        config: &CaptionConfig,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        Self::with_cache(config, loader, probe, Arc::new(ResourceCache::new()))
    }

    /// Build a manager over an existing cache, e.g. one shared by several managers.
    pub fn with_cache(
        config: &CaptionConfig,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn DeviceProbe>,
        cache: Arc<ResourceCache<ResourceKey, LoadedModel>>,
    ) -> Self {
        Self {
            model_id: config.model_id.clone(),
            preference: config.device,
            loader,
            probe,
            cache,
            state: RwLock::new(ManagerState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn cache(&self) -> &Arc<ResourceCache<ResourceKey, LoadedModel>> {
        &self.cache
    }

    pub fn select_device(&self) -> Device {
        select_device(self.preference, self.probe.as_ref())
    }

    /// Select a device and obtain the model for it.
    ///
    /// Both halves (codec and model) must load; a partial load is a failure
    /// and leaves the manager not loaded. A `cleanup` that lands while the
    /// load is in flight wins: the late model is not published and the call
    /// returns `Cancelled`.
    #[instrument(skip(self), fields(model_id = %self.model_id))]
    pub async fn initialize(&self) -> CaptionResult<()> {
        let device = self.select_device();
        let key = ResourceKey::new(self.model_id.clone(), device.id());
        let epoch = {
            let mut state = self.write();
            state.device = Some(device.clone());
            state.key = Some(key.clone());
            state.epoch
        };

        info!(resource = %key, "loading model (this may take a while on first run)");
        let started = Instant::now();
        let built = AtomicBool::new(false);
        let loader = Arc::clone(&self.loader);
        let result = self
            .cache
            .get_or_create(&key, || {
                built.store(true, Ordering::SeqCst);
                build_model(loader, key.clone(), device.clone())
            })
            .await;
        let built = built.load(Ordering::SeqCst);

        match result {
            Ok(resource) => {
                let superseded = {
                    let mut state = self.write();
                    if state.epoch == epoch {
                        state.resource = Some(resource);
                        None
                    } else {
                        Some(state.key.is_none())
                    }
                };
                if let Some(abandoned) = superseded {
                    return Err(self.discard_superseded(&key, &device, built, abandoned).await);
                }

                if built {
                    METRICS.inc_model_loads();
                    obs::emit_model_loaded(
                        &self.model_id,
                        device.id(),
                        started.elapsed().as_millis() as u64,
                    );
                } else {
                    debug!(resource = %key, "model reused from cache");
                }
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.write();
                    if state.epoch == epoch {
                        state.resource = None;
                    }
                }
                obs::emit_model_load_failed(&self.model_id, device.id(), &e);
                Err(e)
            }
        }
    }

    /// A cleanup ran while `key` was loading. Release what this call built
    /// unless a newer `initialize` already owns the device.
    async fn discard_superseded(
        &self,
        key: &ResourceKey,
        device: &Device,
        built: bool,
        abandoned: bool,
    ) -> CaptionError {
        warn!(resource = %key, "model load superseded by cleanup; discarding");
        if built && abandoned {
            if let Err(e) = self.loader.release(device).await {
                warn!(resource = %key, error = %e, "device memory release failed");
            }
            obs::emit_model_released(&self.model_id, device.id());
        }
        CaptionError::Cancelled(format!("cleanup during load of {key}"))
    }

    /// `true` once both halves of the model are loaded.
    pub fn is_loaded(&self) -> bool {
        self.read().resource.is_some()
    }

    /// The loaded model, if any.
    pub fn resource(&self) -> Option<Arc<LoadedModel>> {
        self.read().resource.clone()
    }

    pub fn status(&self) -> ResourceStatus {
        let state = self.read();
        let loaded = state.resource.is_some();
        ResourceStatus {
            loaded,
            device: state.device.as_ref().map(|d| d.id().to_string()),
            model_id: self.model_id.clone(),
            has_model: loaded,
            has_codec: loaded,
        }
    }

    pub fn info(&self) -> CaptionResult<ModelInfo> {
        let state = self.read();
        let resource = state
            .resource
            .as_ref()
            .ok_or_else(|| CaptionError::NotReady("model not loaded".to_string()))?;
        Ok(ModelInfo {
            model_id: resource.model_id().to_string(),
            device: resource.device().id().to_string(),
            model_type: resource.model().name().to_string(),
            codec_type: resource.codec().name().to_string(),
            loaded_at: resource.loaded_at(),
            accelerator: resource.device().accelerator.clone(),
        })
    }

    /// Invalidate the cached model and release device memory.
    ///
    /// Idempotent: a second call finds nothing to release and returns quietly.
    /// Callers still holding the old model keep a working reference.
    pub async fn cleanup(&self) {
        let (key, device) = {
            let mut state = self.write();
            state.epoch += 1;
            state.resource = None;
            (state.key.take(), state.device.take())
        };

        let Some(key) = key else {
            debug!(model_id = %self.model_id, "cleanup: nothing loaded");
            return;
        };

        self.cache.invalidate(&key);
        if let Some(device) = device {
            if let Err(e) = self.loader.release(&device).await {
                warn!(resource = %key, error = %e, "device memory release failed");
            }
            obs::emit_model_released(&self.model_id, device.id());
        }
    }
}

impl ComponentProbe for ModelManager {
    fn status(&self) -> Option<CaptionResult<ResourceStatus>> {
        Some(Ok(ModelManager::status(self)))
    }
}

async fn build_model(
    loader: Arc<dyn ModelLoader>,
    key: ResourceKey,
    device: Device,
) -> CaptionResult<LoadedModel> {
    let failure = |stage: &str, e: anyhow::Error| CaptionError::ConstructionFailure {
        resource: key.to_string(),
        reason: format!("{stage}: {e}"),
    };

    let codec = loader
        .load_codec(&key.model_id)
        .await
        .map_err(|e| failure("codec", e))?;
    let model = loader
        .load_model(&key.model_id, &device)
        .await
        .map_err(|e| failure("model", e))?;

    Ok(LoadedModel::new(key.clone(), device, codec, model))
}
