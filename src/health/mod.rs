pub mod categories;
mod checks;
mod classifier;
mod fleet;
mod metrics;
mod models;
mod orchestrator;
mod policy;

pub use categories::{builtin_categories, builtin_category, CategoryDefinition, Predicate, Rule};
pub use checks::{CheckRunner, RunnerOptions, DEFAULT_MAX_CONCURRENCY, DEFAULT_PROBE_TIMEOUT};
pub use classifier::{classify, Classification, Condition};
pub use fleet::{CategoryCompletion, FleetReport, FleetReportBuilder, RunState};
pub use metrics::{FleetSummary, StatusCounts};
pub use models::{
    CategoryError, CategoryErrorKind, CheckResult, FailureKind, Measurement, Measurements,
    ProbeFailure, ProbeOutcome, Status, Target,
};
pub use orchestrator::{CategoryPlan, Orchestrator, RunOptions, DEFAULT_DEADLINE_GRACE};
pub use policy::{Bounds, PolicyError, ThresholdPolicy, ThresholdPolicyBuilder};
