//! Caption Core Library
//!
//! Orchestration for image captioning: a memoized model resource, a
//! component registry with a startup state machine, the per-request
//! preprocess → infer → record workflow, and history/health reporting.

pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fakes;
pub mod imaging;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod telemetry;

pub use analysis::{
    cancel_pair, AnalysisExecutor, AnalysisRecord, CancelHandle, CancelSignal, HistoryLedger,
    HistoryStatistics, StatisticsReport, WorkflowMetadata,
};
pub use config::{CaptionConfig, DevicePreference};
pub use coordinator::{
    AgentRegistry, Component, ComponentProbe, ComponentRole, Coordinator, HealthEntry,
    HealthReport, HealthStatus, OverallHealth, SystemState, SystemStatusView,
};
pub use error::{CaptionError, CaptionResult, ErrorKind};
pub use imaging::{
    FileImageSource, Image, ImageDimensions, ImageInfo, ImageRef, ImageSource, Preprocessor,
    ResizePreprocessor,
};
pub use telemetry::init_tracing;

pub use model::{
    AcceleratorInfo, Device, DeviceProbe, EnvDeviceProbe, InferenceCapability, LoadedModel,
    ModelInfo, ModelLoader, ModelManager, ResourceCache, ResourceKey, ResourceStatus, TextCodec,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
