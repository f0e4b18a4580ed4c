use super::metrics::FleetSummary;
use super::models::{CategoryError, CategoryErrorKind, CheckResult, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Configured,
    Running,
    Completed,
    CompletedWithCategoryErrors,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "configured"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithCategoryErrors => write!(f, "completed with category errors"),
        }
    }
}

/// Everything one run produced. Read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcome: RunState,
    summary: FleetSummary,
    results: Vec<CheckResult>,
    category_errors: Vec<CategoryError>,
}

impl FleetReport {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn outcome(&self) -> RunState {
        self.outcome
    }

    pub fn summary(&self) -> &FleetSummary {
        &self.summary
    }

    /// Results in configured category order, then target input order.
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn category_errors(&self) -> &[CategoryError] {
        &self.category_errors
    }

    pub fn worst_status(&self) -> Status {
        self.summary.worst_status
    }

    pub fn results_for<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a CheckResult> {
        self.results
            .iter()
            .filter(move |result| result.category == category)
    }

    /// Process exit code: worst status, raised to at least 1 when a category failed.
    pub fn exit_code(&self) -> i32 {
        let code = self.worst_status().exit_code();
        if self.category_errors.is_empty() {
            code
        } else {
            code.max(1)
        }
    }
}

/// What one category hands back to the report writer.
#[derive(Debug)]
pub enum CategoryCompletion {
    Results(Vec<CheckResult>),
    Failed(CategoryError),
}

/// Collects category completions into slots reserved in configured order.
///
/// Single writer: only the task that owns the builder records completions, so arrival
/// order never affects the final ordering.
#[derive(Debug)]
pub struct FleetReportBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    categories: Vec<String>,
    slots: Vec<Option<CategoryCompletion>>,
    resolved: Vec<usize>,
}

impl FleetReportBuilder {
    pub fn new(run_id: Uuid, categories: Vec<String>) -> Self {
        let slots = categories.iter().map(|_| None).collect();
        let resolved = vec![0; categories.len()];
        Self {
            run_id,
            started_at: Utc::now(),
            categories,
            slots,
            resolved,
        }
    }

    /// Notes how many targets the category at `index` will check, so an abandoned
    /// category still counts them as unknown.
    pub fn targets_resolved(&mut self, index: usize, count: usize) {
        match self.resolved.get_mut(index) {
            Some(resolved) => *resolved = count,
            None => tracing::error!("Target count for unknown category slot {}", index),
        }
    }

    /// Records the completion for the category at `index`. Later records for a filled slot are ignored.
    pub fn record(&mut self, index: usize, completion: CategoryCompletion) {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(completion),
            Some(_) => {
                tracing::warn!("Category {} reported twice; keeping the first report", index)
            }
            None => tracing::error!("Completion for unknown category slot {}", index),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Fills every empty slot with a category error of the given kind.
    pub fn abandon_pending(&mut self, kind: CategoryErrorKind, cause: &str) {
        let pending = self
            .categories
            .iter()
            .zip(self.slots.iter_mut())
            .zip(self.resolved.iter().copied());
        for ((name, slot), affected) in pending {
            if slot.is_none() {
                tracing::error!(category = %name, affected, "Category did not report: {}", cause);
                *slot = Some(CategoryCompletion::Failed(CategoryError::new(name, kind, cause, affected)));
            }
        }
    }

    pub fn build(mut self) -> FleetReport {
        self.abandon_pending(CategoryErrorKind::Internal, "category ended without reporting");

        let mut results = Vec::new();
        let mut category_errors = Vec::new();
        for completion in self.slots.into_iter().flatten() {
            match completion {
                CategoryCompletion::Results(batch) => results.extend(batch),
                CategoryCompletion::Failed(error) => category_errors.push(error),
            }
        }

        let outcome = if category_errors.is_empty() {
            RunState::Completed
        } else {
            RunState::CompletedWithCategoryErrors
        };
        let summary = FleetSummary::from_results(&results, &category_errors);

        FleetReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
            summary,
            results,
            category_errors,
        }
    }
}
