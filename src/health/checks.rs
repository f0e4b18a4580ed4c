use super::categories::CategoryDefinition;
use super::classifier::classify;
use super::models::{CheckResult, ProbeFailure, ProbeOutcome, Status, Target};
use super::policy::ThresholdPolicy;
use crate::probes::{Credentials, Probe};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub probe_timeout: Duration,
    pub max_concurrency: usize,
    /// Run-wide deadline; probes still running at this instant are abandoned.
    pub deadline: Option<Instant>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline: None,
        }
    }
}

/// Awaits `future`, giving up at `deadline` when one is set.
pub(crate) async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs one category's probe against every target and classifies each outcome.
pub struct CheckRunner {
    category: Arc<CategoryDefinition>,
    probe: Arc<dyn Probe>,
    credentials: Option<Arc<Credentials>>,
    options: RunnerOptions,
}

impl CheckRunner {
    pub fn new(category: Arc<CategoryDefinition>, probe: Arc<dyn Probe>, options: RunnerOptions) -> Self {
        Self {
            category,
            probe,
            credentials: None,
            options,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Arc<Credentials>>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Produces exactly one result per target, in target order.
    ///
    /// Probes run concurrently up to `max_concurrency`. A probe failure, timeout included,
    /// yields a critical result for its own target and nothing else.
    #[tracing::instrument(
        name = "Run category",
        skip_all,
        fields(category = %self.category.name, targets = targets.len())
    )]
    pub async fn run(&self, targets: &[Target], policy: Arc<ThresholdPolicy>) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().enumerate() {
            let task = ProbeTask {
                category: Arc::clone(&self.category),
                probe: Arc::clone(&self.probe),
                credentials: self.credentials.clone(),
                policy: Arc::clone(&policy),
                target: target.clone(),
                semaphore: Arc::clone(&semaphore),
                probe_timeout: self.options.probe_timeout,
                deadline: self.options.deadline,
            };
            tasks.spawn(async move { (index, task.execute().await) });
        }

        let mut slots: Vec<Option<CheckResult>> = targets.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!("Probe task for {} ended abnormally: {:?}", self.category.name, e),
            }
        }

        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    let outcome = ProbeOutcome::Failed(ProbeFailure::internal(
                        "probe task ended without reporting a result",
                    ));
                    let classification = classify(&self.category, &policy, &outcome);
                    CheckResult::new(&self.category.name, target, &outcome, classification, 0)
                })
            })
            .collect()
    }
}

/// Everything one target's probe execution needs, owned so it can move into a task.
struct ProbeTask {
    category: Arc<CategoryDefinition>,
    probe: Arc<dyn Probe>,
    credentials: Option<Arc<Credentials>>,
    policy: Arc<ThresholdPolicy>,
    target: Target,
    semaphore: Arc<Semaphore>,
    probe_timeout: Duration,
    deadline: Option<Instant>,
}

impl ProbeTask {
    async fn execute(self) -> CheckResult {
        let start = Instant::now();
        let outcome = self.collect().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let classification = classify(&self.category, &self.policy, &outcome);
        match classification.status {
            Status::Healthy => tracing::debug!(node = %self.target.name, "Check passed"),
            Status::Warning => tracing::warn!(
                node = %self.target.name,
                "{} warning: {}",
                self.category.name,
                classification.message()
            ),
            Status::Critical => tracing::error!(
                node = %self.target.name,
                "{} critical: {}",
                self.category.name,
                classification.message()
            ),
        }

        CheckResult::new(&self.category.name, &self.target, &outcome, classification, duration_ms)
    }

    async fn collect(&self) -> ProbeOutcome {
        let permit = match within(self.deadline, self.semaphore.acquire()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => {
                return ProbeOutcome::Failed(ProbeFailure::internal("probe scheduler closed"));
            }
            None => {
                return ProbeOutcome::Failed(ProbeFailure::timeout(
                    "run deadline elapsed before the probe could start",
                ));
            }
        };

        let probe_deadline = Instant::now() + self.probe_timeout;
        let (deadline, cause) = match self.deadline {
            Some(run_deadline) if run_deadline < probe_deadline => {
                (run_deadline, "run deadline elapsed while the probe was running".to_string())
            }
            _ => (
                probe_deadline,
                format!("no response within {} ms", self.probe_timeout.as_millis()),
            ),
        };

        let execution = AssertUnwindSafe(
            self.probe
                .execute(&self.target, self.credentials.as_deref()),
        )
        .catch_unwind();

        let outcome = match timeout_at(deadline, execution).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(payload)) => {
                let message = panic_message(&*payload);
                tracing::error!(node = %self.target.name, "Probe panicked: {}", message);
                ProbeOutcome::Failed(ProbeFailure::internal(format!("probe panicked: {message}")))
            }
            Err(_) => {
                tracing::warn!(node = %self.target.name, "Probe timed out: {}", cause);
                ProbeOutcome::Failed(ProbeFailure::timeout(cause))
            }
        };
        drop(permit);
        outcome
    }
}
