use super::categories::CategoryDefinition;
use super::checks::{within, CheckRunner, RunnerOptions, DEFAULT_MAX_CONCURRENCY, DEFAULT_PROBE_TIMEOUT};
use super::fleet::{CategoryCompletion, FleetReport, FleetReportBuilder, RunState};
use super::models::{CategoryError, CategoryErrorKind, Target};
use super::policy::{PolicyError, ThresholdPolicy};
use crate::discovery::{DiscoveryCache, DiscoveryError, TargetDiscovery};
use crate::error::ConfigError;
use crate::probes::{Credentials, Probe};
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// One configured category: its definition, merged policy and collaborators.
pub struct CategoryPlan {
    definition: Arc<CategoryDefinition>,
    policy: Arc<ThresholdPolicy>,
    probe: Option<Arc<dyn Probe>>,
    discovery: Option<Arc<dyn TargetDiscovery>>,
}

impl CategoryPlan {
    pub fn new(definition: CategoryDefinition, policy: ThresholdPolicy) -> Self {
        Self {
            definition: Arc::new(definition),
            policy: Arc::new(policy),
            probe: None,
            discovery: None,
        }
    }

    /// Plan using the category's own default thresholds and switches.
    pub fn with_default_policy(definition: CategoryDefinition) -> Result<Self, PolicyError> {
        let policy = definition.default_policy()?;
        Ok(Self::new(definition, policy))
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Targets for this category come from `discovery` instead of the run's target list.
    pub fn with_discovery(mut self, discovery: Arc<dyn TargetDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &CategoryDefinition {
        &self.definition
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub probe_timeout: Duration,
    /// Overall run deadline measured from the start of `run_all`.
    pub deadline: Option<Duration>,
    pub max_concurrency: usize,
    /// How long to wait past the deadline for categories to hand in their results.
    pub deadline_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            deadline: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline_grace: DEFAULT_DEADLINE_GRACE,
        }
    }
}

/// Runs every configured category across the fleet and merges the outcome into one report.
pub struct Orchestrator {
    plans: Vec<Arc<CategoryPlan>>,
    options: RunOptions,
    discovery: Option<Arc<dyn TargetDiscovery>>,
    credentials: Option<Arc<Credentials>>,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    pub fn new(plans: Vec<CategoryPlan>, options: RunOptions) -> Result<Self, ConfigError> {
        if plans.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        if options.probe_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        if options.max_concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "max concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = IndexSet::new();
        for plan in &plans {
            if !seen.insert(plan.definition.key.clone()) {
                return Err(ConfigError::DuplicateCategory(plan.definition.key.clone()));
            }
            plan.policy
                .validate()
                .map_err(|e| ConfigError::invalid_policy(plan.name(), e))?;
        }

        let (state, _) = watch::channel(RunState::Configured);
        Ok(Self {
            plans: plans.into_iter().map(Arc::new).collect(),
            options,
            discovery: None,
            credentials: None,
            state,
        })
    }

    /// Shared discovery source, used when a run gets no explicit targets.
    pub fn with_discovery(mut self, discovery: Arc<dyn TargetDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn plans(&self) -> impl Iterator<Item = &CategoryPlan> {
        self.plans.iter().map(|plan| plan.as_ref())
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Runs all categories. Always yields a report; failures become results or category errors.
    ///
    /// An empty target list is treated like no list at all and triggers discovery.
    pub async fn run_all(&self, targets: Option<Vec<Target>>) -> FleetReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("Fleet run", run_id = %run_id);
        self.execute(run_id, targets).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid, targets: Option<Vec<Target>>) -> FleetReport {
        self.state.send_replace(RunState::Running);
        tracing::info!(categories = self.plans.len(), "Starting fleet run");

        let deadline = self.options.deadline.map(|limit| Instant::now() + limit);
        let explicit: Option<Arc<[Target]>> = targets
            .filter(|targets| !targets.is_empty())
            .map(Arc::from);
        let cache = Arc::new(DiscoveryCache::new(self.discovery.clone()));
        let runner_options = RunnerOptions {
            probe_timeout: self.options.probe_timeout,
            max_concurrency: self.options.max_concurrency,
            deadline,
        };

        // Each job sends at most two events.
        let (sender, mut receiver) = mpsc::channel(self.plans.len() * 2);
        let mut jobs = JoinSet::new();
        for (index, plan) in self.plans.iter().enumerate() {
            let job = CategoryJob {
                index,
                plan: Arc::clone(plan),
                explicit: explicit.clone(),
                cache: Arc::clone(&cache),
                credentials: self.credentials.clone(),
                options: runner_options,
                events: sender.clone(),
            };
            jobs.spawn(job.run().in_current_span());
        }
        drop(sender);

        let names = self.plans.iter().map(|plan| plan.name().to_string()).collect();
        let mut builder = FleetReportBuilder::new(run_id, names);
        let collect = async {
            while let Some(event) = receiver.recv().await {
                match event {
                    JobEvent::TargetsResolved { index, count } => builder.targets_resolved(index, count),
                    JobEvent::Completed { index, completion } => builder.record(index, completion),
                }
            }
        };
        let cutoff = deadline.map(|deadline| deadline + self.options.deadline_grace);
        if within(cutoff, collect).await.is_none() {
            builder.abandon_pending(
                CategoryErrorKind::DeadlineExceeded,
                "category did not finish before the run deadline",
            );
        }
        jobs.abort_all();

        let report = builder.build();
        let summary = report.summary();
        tracing::info!(
            results = report.results().len(),
            category_errors = summary.category_errors,
            worst = %summary.worst_status,
            "Fleet run finished"
        );
        self.state.send_replace(report.outcome());
        report
    }
}

/// What a category job reports back to the single report writer.
enum JobEvent {
    TargetsResolved { index: usize, count: usize },
    Completed { index: usize, completion: CategoryCompletion },
}

/// Owned state for one category's part of a run.
struct CategoryJob {
    index: usize,
    plan: Arc<CategoryPlan>,
    explicit: Option<Arc<[Target]>>,
    cache: Arc<DiscoveryCache>,
    credentials: Option<Arc<Credentials>>,
    options: RunnerOptions,
    events: mpsc::Sender<JobEvent>,
}

impl CategoryJob {
    async fn run(self) {
        let index = self.index;
        let completion = self.complete().await;
        if self.events.send(JobEvent::Completed { index, completion }).await.is_err() {
            tracing::warn!("Category finished after the report was closed");
        }
    }

    async fn complete(&self) -> CategoryCompletion {
        let targets = match self.targets().await {
            Ok(targets) => targets,
            Err(error) => {
                tracing::error!(category = %self.plan.name(), "Category skipped: {}", error);
                return CategoryCompletion::Failed(error);
            }
        };
        let resolved = JobEvent::TargetsResolved {
            index: self.index,
            count: targets.len(),
        };
        if self.events.send(resolved).await.is_err() {
            tracing::warn!("Targets resolved after the report was closed");
        }

        let Some(probe) = self.plan.probe.clone() else {
            let error = CategoryError::new(
                self.plan.name(),
                CategoryErrorKind::ProbeUnavailable,
                "no probe is registered for this category",
                targets.len(),
            );
            tracing::error!(category = %self.plan.name(), "Category skipped: {}", error);
            return CategoryCompletion::Failed(error);
        };

        let runner = CheckRunner::new(Arc::clone(&self.plan.definition), probe, self.options)
            .with_credentials(self.credentials.clone());
        CategoryCompletion::Results(runner.run(&targets, Arc::clone(&self.plan.policy)).await)
    }

    /// Category discovery first, then the run's explicit targets, then shared discovery.
    ///
    /// Discovery is bounded by the run deadline, or by the probe timeout when the run has none.
    async fn targets(&self) -> Result<Arc<[Target]>, CategoryError> {
        let limit = Some(
            self.options
                .deadline
                .unwrap_or_else(|| Instant::now() + self.options.probe_timeout),
        );
        let resolved = if let Some(discovery) = &self.plan.discovery {
            within(limit, discovery.discover())
                .await
                .map(|discovered| discovered.map(Arc::from))
        } else if let Some(explicit) = &self.explicit {
            Some(Ok(Arc::clone(explicit)))
        } else {
            within(limit, self.cache.targets()).await
        };

        let name = self.plan.name();
        match resolved {
            None if self.options.deadline.is_some() => Err(CategoryError::new(
                name,
                CategoryErrorKind::DeadlineExceeded,
                "run deadline elapsed during target discovery",
                0,
            )),
            None => Err(CategoryError::new(
                name,
                CategoryErrorKind::Discovery,
                format!(
                    "target discovery did not finish within {} ms",
                    self.options.probe_timeout.as_millis()
                ),
                0,
            )),
            Some(Err(DiscoveryError::NotConfigured)) => Err(CategoryError::new(
                name,
                CategoryErrorKind::NoTargets,
                DiscoveryError::NotConfigured.to_string(),
                0,
            )),
            Some(Err(e)) => Err(CategoryError::new(
                name,
                CategoryErrorKind::Discovery,
                e.to_string(),
                0,
            )),
            Some(Ok(targets)) if targets.is_empty() => Err(CategoryError::new(
                name,
                CategoryErrorKind::NoTargets,
                "target discovery returned no targets",
                0,
            )),
            Some(Ok(targets)) => Ok(targets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use crate::health::categories::{self, measurements};
    use crate::health::models::{FailureKind, Measurements, ProbeOutcome, Status};
    use crate::health::policy::Bounds;
    use async_trait::async_trait;

    struct FixedProbe(Measurements);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn execute(&self, _target: &Target, _credentials: Option<&Credentials>) -> ProbeOutcome {
            ProbeOutcome::Measured(self.0.clone())
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl Probe for HangingProbe {
        async fn execute(&self, _target: &Target, _credentials: Option<&Credentials>) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ProbeOutcome::Measured(Measurements::new())
        }
    }

    struct HangingDiscovery;

    #[async_trait]
    impl TargetDiscovery for HangingDiscovery {
        async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn dns_plan() -> CategoryPlan {
        let reported = Measurements::new()
            .with(measurements::RESOLUTION_MS, 20u64)
            .with(measurements::PRIMARY_ADDRESS, "10.0.0.1");
        CategoryPlan::with_default_policy(categories::dns_health())
            .unwrap()
            .with_probe(Arc::new(FixedProbe(reported)))
    }

    fn targets(names: &[&str]) -> Option<Vec<Target>> {
        Some(names.iter().map(|name| Target::new(*name)).collect())
    }

    #[test]
    fn test_rejects_empty_category_list() {
        let result = Orchestrator::new(vec![], RunOptions::default());
        assert!(matches!(result, Err(ConfigError::NoCategories)));
    }

    #[test]
    fn test_rejects_duplicate_category() {
        let result = Orchestrator::new(vec![dns_plan(), dns_plan()], RunOptions::default());
        assert!(matches!(result, Err(ConfigError::DuplicateCategory(key)) if key == "dns"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let options = RunOptions {
            max_concurrency: 0,
            ..RunOptions::default()
        };
        let result = Orchestrator::new(vec![dns_plan()], options);
        assert!(matches!(result, Err(ConfigError::InvalidSetting(_))));
    }

    #[test]
    fn test_default_policy_follows_category_defaults() {
        let plan = dns_plan();
        assert_eq!(
            plan.policy().bounds(categories::metrics::RESOLUTION_TIME_MS),
            Some(Bounds::new(100.0, 500.0))
        );
    }

    #[tokio::test]
    async fn test_state_moves_to_completed() {
        let orchestrator = Orchestrator::new(vec![dns_plan()], RunOptions::default()).unwrap();
        let mut states = orchestrator.subscribe();
        assert_eq!(orchestrator.state(), RunState::Configured);

        let report = orchestrator.run_all(targets(&["dc01", "dc02"])).await;

        assert_eq!(report.results().len(), 2);
        assert_eq!(report.outcome(), RunState::Completed);
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_missing_probe_is_a_category_error() {
        let replication = CategoryPlan::with_default_policy(categories::replication()).unwrap();
        let orchestrator =
            Orchestrator::new(vec![replication, dns_plan()], RunOptions::default()).unwrap();

        let report = orchestrator.run_all(targets(&["dc01", "dc02", "dc03"])).await;

        assert_eq!(report.outcome(), RunState::CompletedWithCategoryErrors);
        assert_eq!(report.results().len(), 3);
        let error = &report.category_errors()[0];
        assert_eq!(error.kind, CategoryErrorKind::ProbeUnavailable);
        assert_eq!(error.category, "Replication");
        assert_eq!(report.summary().unknown, 3);
        assert_eq!(orchestrator.state(), RunState::CompletedWithCategoryErrors);
    }

    #[tokio::test]
    async fn test_no_targets_without_discovery() {
        let orchestrator = Orchestrator::new(vec![dns_plan()], RunOptions::default()).unwrap();
        let report = orchestrator.run_all(Some(Vec::new())).await;

        assert!(report.results().is_empty());
        assert_eq!(report.category_errors()[0].kind, CategoryErrorKind::NoTargets);
    }

    #[tokio::test]
    async fn test_shared_discovery_used_without_explicit_targets() {
        let orchestrator = Orchestrator::new(vec![dns_plan()], RunOptions::default())
            .unwrap()
            .with_discovery(Arc::new(StaticDiscovery::new(vec![
                Target::new("dc07"),
                Target::new("dc08"),
            ])));

        let report = orchestrator.run_all(None).await;
        let order: Vec<_> = report.results().iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["dc07", "dc08"]);
    }

    #[tokio::test]
    async fn test_category_discovery_overrides_run_targets() {
        let pdc_only = dns_plan().with_discovery(Arc::new(StaticDiscovery::new(vec![Target::new(
            "pdc01",
        )])));
        let orchestrator = Orchestrator::new(vec![pdc_only], RunOptions::default()).unwrap();

        let report = orchestrator.run_all(targets(&["dc01", "dc02"])).await;
        assert_eq!(report.results().len(), 1);
        assert_eq!(report.results()[0].target, "pdc01");
    }

    #[tokio::test]
    async fn test_deadline_finalizes_report() {
        let hanging = CategoryPlan::with_default_policy(categories::service_reachability())
            .unwrap()
            .with_probe(Arc::new(HangingProbe));
        let stuck_discovery = CategoryPlan::with_default_policy(categories::time_sync())
            .unwrap()
            .with_probe(Arc::new(HangingProbe))
            .with_discovery(Arc::new(HangingDiscovery));
        let options = RunOptions {
            probe_timeout: Duration::from_secs(60),
            deadline: Some(Duration::from_millis(300)),
            deadline_grace: Duration::from_millis(200),
            ..RunOptions::default()
        };
        let orchestrator =
            Orchestrator::new(vec![dns_plan(), hanging, stuck_discovery], options).unwrap();

        let started = Instant::now();
        let report = orchestrator.run_all(targets(&["dc01", "dc02"])).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let dns: Vec<_> = report.results_for("DNS Health").collect();
        assert!(dns.iter().all(|r| r.status == Status::Healthy));

        let ports: Vec<_> = report.results_for("Service Reachability").collect();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().all(|r| r.cause == Some(FailureKind::Timeout)));

        assert_eq!(report.category_errors().len(), 1);
        assert_eq!(
            report.category_errors()[0].kind,
            CategoryErrorKind::DeadlineExceeded
        );
        assert_eq!(report.worst_status(), Status::Critical);
    }

    #[tokio::test]
    async fn test_discovery_bounded_by_probe_timeout_without_deadline() {
        let stuck = dns_plan().with_discovery(Arc::new(HangingDiscovery));
        let options = RunOptions {
            probe_timeout: Duration::from_millis(200),
            deadline: None,
            ..RunOptions::default()
        };
        let orchestrator = Orchestrator::new(vec![stuck], options).unwrap();

        let started = Instant::now();
        let report = orchestrator.run_all(targets(&["dc01"])).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let error = &report.category_errors()[0];
        assert_eq!(error.kind, CategoryErrorKind::Discovery);
        assert!(error.cause.contains("did not finish within 200 ms"), "cause: {}", error.cause);
        assert_eq!(report.outcome(), RunState::CompletedWithCategoryErrors);
    }
}
