//! Immutable analysis records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CaptionError, ErrorKind};
use crate::imaging::ImageDimensions;

/// Workflow-level context attached by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Wall time of the whole workflow, preprocessing included.
    pub total_time_ms: f64,
    /// Registry keys at the time the workflow ran.
    pub components_involved: Vec<String>,
    /// Value of the operation counter for this run.
    pub operation_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one analysis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub success: bool,
    pub caption: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    /// Duration of the inference call alone; zero when no call was made.
    pub processing_time_ms: f64,
    pub image_dimensions: ImageDimensions,
    pub device_used: Option<String>,
    pub model_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub workflow: Option<WorkflowMetadata>,
}

impl AnalysisRecord {
    pub fn succeeded(
        caption: String,
        prompt: &str,
        max_tokens: u32,
        processing_time_ms: f64,
        image_dimensions: ImageDimensions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            success: true,
            caption: Some(caption),
            error_kind: None,
            error_message: None,
            prompt: prompt.to_string(),
            max_tokens,
            processing_time_ms,
            image_dimensions,
            device_used: None,
            model_id: None,
            timestamp: Utc::now(),
            workflow: None,
        }
    }

    pub fn failed(
        error: &CaptionError,
        prompt: &str,
        max_tokens: u32,
        image_dimensions: ImageDimensions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            success: false,
            caption: None,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            prompt: prompt.to_string(),
            max_tokens,
            processing_time_ms: 0.0,
            image_dimensions,
            device_used: None,
            model_id: None,
            timestamp: Utc::now(),
            workflow: None,
        }
    }

    pub fn with_processing_time(mut self, processing_time_ms: f64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    /// Stamp the model and device that served the request.
    pub fn served_by(mut self, model_id: &str, device: &str) -> Self {
        self.model_id = Some(model_id.to_string());
        self.device_used = Some(device.to_string());
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowMetadata) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_record_preserves_error() {
        let err = CaptionError::InferenceFailure("CUDA out of memory".to_string());
        let record = AnalysisRecord::failed(&err, "describe", 20, ImageDimensions::new(4, 4));
        assert!(!record.success);
        assert!(record.caption.is_none());
        assert_eq!(record.error_kind, Some(ErrorKind::InferenceFailure));
        assert!(record.error_message.unwrap().contains("CUDA out of memory"));
        assert_eq!(record.processing_time_ms, 0.0);
    }

    #[test]
    fn test_record_serializes_to_json() {
        let record = AnalysisRecord::succeeded(
            "a red bicycle".to_string(),
            "a photography of",
            50,
            12.5,
            ImageDimensions::new(640, 480),
        )
        .served_by("blip", "cpu");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["caption"], "a red bicycle");
        assert_eq!(json["device_used"], "cpu");
        assert_eq!(json["image_dimensions"]["width"], 640);
        assert!(json["error_kind"].is_null());
    }
}
