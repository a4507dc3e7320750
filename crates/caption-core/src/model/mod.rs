//! Model resource management.
//!
//! Provides:
//! - [`capability`]: seams to the opaque model, codec and loader
//! - [`device::select_device`]: deterministic accelerator/CPU choice
//! - [`cache::ResourceCache`]: single-flight memoizer keyed by [`ResourceKey`]
//! - [`manager::ModelManager`]: lifecycle (initialize, status, cleanup) around the cache

pub mod cache;
pub mod capability;
pub mod device;
pub mod manager;

pub use cache::ResourceCache;
pub use capability::{InferenceCapability, ModelLoader, TextCodec};
pub use device::{select_device, AcceleratorInfo, Device, DeviceKind, DeviceProbe, EnvDeviceProbe};
pub use manager::{LoadedModel, ModelInfo, ModelManager, ResourceKey, ResourceStatus};
