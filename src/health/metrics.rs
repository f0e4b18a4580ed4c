use super::models::{CategoryError, CheckResult, Status};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Healthy => self.healthy += 1,
            Status::Warning => self.warning += 1,
            Status::Critical => self.critical += 1,
        }
    }

    pub fn worst(&self) -> Status {
        if self.critical > 0 {
            Status::Critical
        } else if self.warning > 0 {
            Status::Warning
        } else {
            Status::Healthy
        }
    }

    /// Share of healthy results; 100 when nothing was checked.
    pub fn healthy_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.healthy as f64 / self.total as f64) * 100.0
    }
}

/// Derived counts over one run's results and category errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub totals: StatusCounts,
    /// (category, target) pairs without a result because their category failed.
    pub unknown: usize,
    pub category_errors: usize,
    pub worst_status: Status,
    pub by_category: IndexMap<String, StatusCounts>,
    /// Worst status per target across all categories.
    pub by_target: IndexMap<String, Status>,
}

impl FleetSummary {
    pub fn from_results(results: &[CheckResult], errors: &[CategoryError]) -> Self {
        let mut summary = FleetSummary {
            category_errors: errors.len(),
            unknown: errors.iter().map(|error| error.affected_targets).sum(),
            ..FleetSummary::default()
        };

        for result in results {
            summary.totals.record(result.status);
            summary
                .by_category
                .entry(result.category.clone())
                .or_default()
                .record(result.status);
            let worst = summary
                .by_target
                .entry(result.target.clone())
                .or_default();
            *worst = (*worst).max(result.status);
        }
        summary.worst_status = Status::worst_of(results.iter().map(|result| result.status));
        summary
    }
}
