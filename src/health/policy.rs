use super::models::{format_number, Status};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("metric '{metric}': warning bound {warning} must be below critical bound {critical}")]
    BoundsOrder {
        metric: String,
        warning: f64,
        critical: f64,
    },
    #[error("metric '{metric}': {bound} bound must be a finite number")]
    NotFinite { metric: String, bound: &'static str },
    #[error("metric '{metric}' has neither a warning nor a critical bound")]
    Empty { metric: String },
}

/// Warning and critical boundaries for one measurable quantity.
///
/// A value strictly greater than a bound breaches it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

impl Bounds {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: Some(critical),
        }
    }

    pub fn warning_only(warning: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: None,
        }
    }

    pub fn critical_only(critical: f64) -> Self {
        Self {
            warning: None,
            critical: Some(critical),
        }
    }

    pub fn validate(&self, metric: &str) -> Result<(), PolicyError> {
        if self.warning.is_none() && self.critical.is_none() {
            return Err(PolicyError::Empty {
                metric: metric.to_string(),
            });
        }
        for (bound, value) in [("warning", self.warning), ("critical", self.critical)] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(PolicyError::NotFinite {
                    metric: metric.to_string(),
                    bound,
                });
            }
        }
        if let (Some(warning), Some(critical)) = (self.warning, self.critical) {
            if warning >= critical {
                return Err(PolicyError::BoundsOrder {
                    metric: metric.to_string(),
                    warning,
                    critical,
                });
            }
        }
        Ok(())
    }

    /// Which bound `value` breaches, with the bound itself.
    pub fn breach(&self, value: f64) -> Option<(Status, f64)> {
        if let Some(critical) = self.critical.filter(|c| value > *c) {
            return Some((Status::Critical, critical));
        }
        self.warning
            .filter(|w| value > *w)
            .map(|warning| (Status::Warning, warning))
    }

    /// Field-wise overlay: bounds set in `other` replace ours.
    pub fn overlay(&self, other: &Bounds) -> Bounds {
        Bounds {
            warning: other.warning.or(self.warning),
            critical: other.critical.or(self.critical),
        }
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<f64>| v.map(format_number).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "warning > {}, critical > {}",
            show(self.warning),
            show(self.critical)
        )
    }
}

/// Validated, immutable set of per-metric bounds and boolean switches.
///
/// Shared read-only across every probe execution of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdPolicy {
    metrics: IndexMap<String, Bounds>,
    switches: IndexMap<String, bool>,
}

impl ThresholdPolicy {
    pub fn builder() -> ThresholdPolicyBuilder {
        ThresholdPolicyBuilder::default()
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for (metric, bounds) in &self.metrics {
            bounds.validate(metric)?;
        }
        Ok(())
    }

    pub fn bounds(&self, metric: &str) -> Option<Bounds> {
        self.metrics.get(metric).copied()
    }

    /// Switches default to enabled when not configured.
    pub fn switch(&self, name: &str) -> bool {
        self.switches.get(name).copied().unwrap_or(true)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &Bounds)> {
        self.metrics.iter().map(|(name, bounds)| (name.as_str(), bounds))
    }

    pub fn switches(&self) -> impl Iterator<Item = (&str, bool)> {
        self.switches.iter().map(|(name, on)| (name.as_str(), *on))
    }

    /// Layers `metrics` and `switches` over this policy and validates the merge.
    pub fn overlay<'a, M, S>(&self, metrics: M, switches: S) -> Result<ThresholdPolicy, PolicyError>
    where
        M: IntoIterator<Item = (&'a String, &'a Bounds)>,
        S: IntoIterator<Item = (&'a String, &'a bool)>,
    {
        let mut merged = self.clone();
        for (metric, bounds) in metrics {
            let entry = merged.metrics.entry(metric.clone()).or_default();
            *entry = entry.overlay(bounds);
        }
        for (name, on) in switches {
            merged.switches.insert(name.clone(), *on);
        }
        merged.validate()?;
        Ok(merged)
    }
}

#[derive(Debug, Default)]
pub struct ThresholdPolicyBuilder {
    metrics: IndexMap<String, Bounds>,
    switches: IndexMap<String, bool>,
}

impl ThresholdPolicyBuilder {
    pub fn metric<S: Into<String>>(mut self, name: S, bounds: Bounds) -> Self {
        self.metrics.insert(name.into(), bounds);
        self
    }

    pub fn switch<S: Into<String>>(mut self, name: S, enabled: bool) -> Self {
        self.switches.insert(name.into(), enabled);
        self
    }

    pub fn build(self) -> Result<ThresholdPolicy, PolicyError> {
        let policy = ThresholdPolicy {
            metrics: self.metrics,
            switches: self.switches,
        };
        policy.validate()?;
        Ok(policy)
    }
}
