//! Rolling execution window and health classification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::bus::BusMetrics;
use crate::cache::CacheMetrics;
use crate::config::ErrorRateThresholds;

/// One dispatched tool or agent call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    pub success: bool,
}

/// Aggregates over the records currently in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterMetrics {
    pub request_count: usize,
    /// Milliseconds.
    pub average_response_time: f64,
    /// 0.0–1.0; 0.0 for an empty window.
    pub error_rate: f64,
}

impl RouterMetrics {
    fn over<'a>(records: impl Iterator<Item = &'a ExecutionRecord>) -> Self {
        let (mut count, mut failures, mut total_ms) = (0usize, 0usize, 0.0f64);
        for record in records {
            count += 1;
            total_ms += record.response_time_ms;
            if !record.success {
                failures += 1;
            }
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            request_count: count,
            average_response_time: total_ms / count as f64,
            error_rate: failures as f64 / count as f64,
        }
    }
}

/// Most-recent-N buffer of execution records.
pub struct MetricsWindow {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, dropping the oldest once full.
    pub fn push(&mut self, record: ExecutionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn summary(&self) -> RouterMetrics {
        RouterMetrics::over(self.records.iter())
    }

    pub fn summary_for(&self, tool_name: &str) -> RouterMetrics {
        RouterMetrics::over(self.records.iter().filter(|r| r.tool_name == tool_name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Classify an error rate. Healthy only below `warning`; a degraded
    /// router past the `degraded` cut point also gets a warning.
    pub fn classify(error_rate: f64, thresholds: &ErrorRateThresholds) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let status = if error_rate >= thresholds.unhealthy {
            Self::Unhealthy
        } else if error_rate >= thresholds.warning {
            if error_rate >= thresholds.degraded {
                warnings.push(format!(
                    "error rate {:.1}% is above the {:.1}% degraded threshold",
                    error_rate * 100.0,
                    thresholds.degraded * 100.0
                ));
            }
            Self::Degraded
        } else {
            Self::Healthy
        };
        (status, warnings)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub state: String,
    pub error_rate: f64,
    pub window_size: usize,
    pub window_capacity: usize,
    pub average_response_time: f64,
    pub warnings: Vec<String>,
    pub cache: Option<CacheMetrics>,
    pub events: Option<BusMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}
