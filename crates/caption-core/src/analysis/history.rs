//! Append-only history of analysis records with on-demand statistics.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisRecord;
use crate::config::DEFAULT_HISTORY_LIMIT;

/// Message carried by [`StatisticsReport::Empty`].
pub const NO_HISTORY_MESSAGE: &str = "No analysis history available";

/// Aggregates over the whole ledger.
///
/// Time totals and averages cover successful records only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub count: usize,
    pub success_count: usize,
    pub fail_count: usize,
    /// Percentage of successful records, 0–100.
    pub success_rate: f64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
}

/// Statistics, or an explicit marker that there is nothing to aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatisticsReport {
    Empty { message: String },
    Available(HistoryStatistics),
}

impl StatisticsReport {
    pub fn is_empty(&self) -> bool {
        matches!(self, StatisticsReport::Empty { .. })
    }

    pub fn stats(&self) -> Option<&HistoryStatistics> {
        match self {
            StatisticsReport::Available(stats) => Some(stats),
            StatisticsReport::Empty { .. } => None,
        }
    }
}

/// Chronological record log, safe to share between concurrent workflows.
#[derive(Debug)]
pub struct HistoryLedger {
    records: Mutex<Vec<AnalysisRecord>>,
    default_limit: usize,
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryLedger {
    /// `default_limit` caps [`HistoryLedger::recent`].
    pub fn new(default_limit: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            default_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AnalysisRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, record: AnalysisRecord) {
        self.lock().push(record);
    }

    /// The `n` most recent records, oldest first.
    pub fn tail(&self, n: usize) -> Vec<AnalysisRecord> {
        let records = self.lock();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }

    /// [`HistoryLedger::tail`] with the configured default limit.
    pub fn recent(&self) -> Vec<AnalysisRecord> {
        self.tail(self.default_limit)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Recompute statistics from the full sequence.
    pub fn statistics(&self) -> StatisticsReport {
        let records = self.lock();
        if records.is_empty() {
            return StatisticsReport::Empty {
                message: NO_HISTORY_MESSAGE.to_string(),
            };
        }

        let count = records.len();
        let (success_count, total_time_ms) = records
            .iter()
            .filter(|r| r.success)
            .fold((0usize, 0.0f64), |(n, total), r| (n + 1, total + r.processing_time_ms));
        let avg_time_ms = if success_count > 0 {
            total_time_ms / success_count as f64
        } else {
            0.0
        };

        StatisticsReport::Available(HistoryStatistics {
            count,
            success_count,
            fail_count: count - success_count,
            success_rate: success_count as f64 / count as f64 * 100.0,
            total_time_ms,
            avg_time_ms,
        })
    }
}
