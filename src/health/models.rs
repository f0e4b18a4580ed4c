use super::classifier::{Classification, Condition};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state health of one check, ordered so that `max` yields the worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl Status {
    /// Worst status of the set; an empty set is healthy.
    pub fn worst_of<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        statuses.into_iter().max().unwrap_or_default()
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A node under diagnosis. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Target {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            site: None,
            role: None,
        }
    }

    pub fn with_site<S: Into<String>>(mut self, site: S) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = Some(role.into());
        self
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One raw value reported by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{}", format_number(*value)),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Measurement {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for Measurement {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for Measurement {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i64> for Measurement {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Measurement {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Measurement {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Measurement {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Renders whole numbers without a fractional part and everything else with two decimals.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Named measurements in the order the probe reported them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurements(IndexMap<String, Measurement>);

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Measurement>,
    {
        self.insert(name, value);
        self
    }

    pub fn insert<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<Measurement>,
    {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(Measurement::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(Measurement::Flag(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(Measurement::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Measurement)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Measurements
where
    K: Into<String>,
    V: Into<Measurement>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut measurements = Measurements::new();
        for (name, value) in iter {
            measurements.insert(name, value);
        }
        measurements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    Timeout,
    AuthFailure,
    MalformedResponse,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::Timeout => write!(f, "timeout"),
            Self::AuthFailure => write!(f, "authentication failure"),
            Self::MalformedResponse => write!(f, "malformed response"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Why a probe could not produce measurements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub cause: String,
}

impl ProbeFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, cause: S) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn unreachable<S: Into<String>>(cause: S) -> Self {
        Self::new(FailureKind::Unreachable, cause)
    }

    pub fn timeout<S: Into<String>>(cause: S) -> Self {
        Self::new(FailureKind::Timeout, cause)
    }

    pub fn auth_failure<S: Into<String>>(cause: S) -> Self {
        Self::new(FailureKind::AuthFailure, cause)
    }

    pub fn malformed<S: Into<String>>(cause: S) -> Self {
        Self::new(FailureKind::MalformedResponse, cause)
    }

    pub fn internal<S: Into<String>>(cause: S) -> Self {
        Self::new(FailureKind::Internal, cause)
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

/// What one probe execution against one target produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Measured(Measurements),
    Failed(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            Self::Measured(_) => None,
        }
    }
}

impl From<Measurements> for ProbeOutcome {
    fn from(measurements: Measurements) -> Self {
        Self::Measured(measurements)
    }
}

impl From<ProbeFailure> for ProbeOutcome {
    fn from(failure: ProbeFailure) -> Self {
        Self::Failed(failure)
    }
}

/// The classified outcome of one category against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub category: String,
    pub target: String,
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Measurements>,
    pub duration_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn new(
        category: &str,
        target: &Target,
        outcome: &ProbeOutcome,
        classification: Classification,
        duration_ms: u64,
    ) -> Self {
        let message = classification.message();
        let (cause, details) = match outcome {
            ProbeOutcome::Failed(failure) => (Some(failure.kind), None),
            ProbeOutcome::Measured(measurements) if measurements.is_empty() => (None, None),
            ProbeOutcome::Measured(measurements) => (None, Some(measurements.clone())),
        };

        Self {
            category: category.to_string(),
            target: target.name.clone(),
            status: classification.status,
            message,
            remediation: classification.remediation,
            conditions: classification.conditions,
            cause,
            details,
            duration_ms,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryErrorKind {
    Discovery,
    ProbeUnavailable,
    NoTargets,
    DeadlineExceeded,
    Internal,
}

impl fmt::Display for CategoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery failed"),
            Self::ProbeUnavailable => write!(f, "probe unavailable"),
            Self::NoTargets => write!(f, "no targets"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// A category that could not produce results at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryError {
    pub category: String,
    pub kind: CategoryErrorKind,
    pub cause: String,
    /// Targets left without a result, when the target list was known.
    pub affected_targets: usize,
    pub recorded_at: DateTime<Utc>,
}

impl CategoryError {
    pub fn new<S: Into<String>>(
        category: &str,
        kind: CategoryErrorKind,
        cause: S,
        affected_targets: usize,
    ) -> Self {
        Self {
            category: category.to_string(),
            kind,
            cause: cause.into(),
            affected_targets,
            recorded_at: Utc::now(),
        }
    }
}

impl fmt::Display for CategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.category, self.kind, self.cause)
    }
}
