//! Optional capabilities a registered component may expose to health checks.

use crate::analysis::StatisticsReport;
use crate::error::CaptionResult;
use crate::model::ResourceStatus;

/// Status and statistics probes, both optional.
///
/// `None` means the component does not offer that capability. Health checks
/// try `status` first, then `statistics`.
pub trait ComponentProbe: Send + Sync {
    fn status(&self) -> Option<CaptionResult<ResourceStatus>> {
        None
    }

    fn statistics(&self) -> Option<CaptionResult<StatisticsReport>> {
        None
    }
}
