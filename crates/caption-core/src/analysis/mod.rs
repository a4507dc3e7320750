//! Analysis: one inference call per record, plus the history ledger.

pub mod cancel;
pub mod executor;
pub mod history;
pub mod record;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use executor::AnalysisExecutor;
pub use history::{HistoryLedger, HistoryStatistics, StatisticsReport, NO_HISTORY_MESSAGE};
pub use record::{AnalysisRecord, WorkflowMetadata};
