use super::categories::{CategoryDefinition, Rule};
use super::models::{format_number, FailureKind, Measurement, ProbeOutcome, Status};
use super::policy::ThresholdPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured finding produced by the classifier. Message text is rendered from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    ProbeFailed {
        failure: FailureKind,
        cause: String,
    },
    MissingMeasurement {
        measurement: String,
        description: String,
    },
    /// A magnitude was reported, but not as a finite number.
    MalformedMeasurement {
        measurement: String,
        label: String,
        value: String,
    },
    HardFailure {
        rule: String,
        description: String,
    },
    ThresholdExceeded {
        metric: String,
        label: String,
        value: f64,
        bound: f64,
        level: Status,
        unit: String,
    },
    SoftCondition {
        rule: String,
        description: String,
    },
}

impl Condition {
    pub fn severity(&self) -> Status {
        match self {
            Self::ProbeFailed { .. }
            | Self::MissingMeasurement { .. }
            | Self::MalformedMeasurement { .. }
            | Self::HardFailure { .. } => Status::Critical,
            Self::ThresholdExceeded { level, .. } => *level,
            Self::SoftCondition { .. } => Status::Warning,
        }
    }

    fn from_rule(rule: &Rule, severity: Status) -> Self {
        match severity {
            Status::Critical => Self::HardFailure {
                rule: rule.id.clone(),
                description: rule.description.clone(),
            },
            _ => Self::SoftCondition {
                rule: rule.id.clone(),
                description: rule.description.clone(),
            },
        }
    }
}

fn with_unit(value: f64, unit: &str) -> String {
    match unit {
        "" => format_number(value),
        "%" => format!("{}%", format_number(value)),
        unit => format!("{} {unit}", format_number(value)),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProbeFailed { failure, cause } => write!(f, "probe failed ({failure}): {cause}"),
            Self::MissingMeasurement { description, .. } => {
                write!(f, "{description} could not be determined")
            }
            Self::MalformedMeasurement { label, value, .. } => {
                write!(f, "{label} reported as '{value}', expected a finite number")
            }
            Self::HardFailure { description, .. } | Self::SoftCondition { description, .. } => {
                write!(f, "{description}")
            }
            Self::ThresholdExceeded {
                label,
                value,
                bound,
                level,
                unit,
                ..
            } => write!(
                f,
                "{label} {} exceeds {level} threshold {}",
                with_unit(*value, unit),
                with_unit(*bound, unit)
            ),
        }
    }
}

/// Status, findings and remediation for one probe outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub conditions: Vec<Condition>,
    pub remediation: Option<String>,
}

impl Classification {
    fn healthy() -> Self {
        Self {
            status: Status::Healthy,
            conditions: Vec::new(),
            remediation: None,
        }
    }

    fn with(status: Status, conditions: Vec<Condition>, remediation: &str) -> Self {
        Self {
            status,
            conditions,
            remediation: Some(remediation.to_string()),
        }
    }

    pub fn message(&self) -> String {
        if self.conditions.is_empty() {
            return "All checks passed".to_string();
        }
        self.conditions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn enabled<'a>(rules: &'a [Rule], policy: &'a ThresholdPolicy) -> impl Iterator<Item = &'a Rule> {
    rules.iter().filter(move |rule| {
        rule.switch
            .as_deref()
            .map_or(true, |switch| policy.switch(switch))
    })
}

/// Maps a probe outcome to a status.
///
/// Precedence, first applicable step wins:
/// 1. probe failure, missing mandatory measurement or malformed magnitude: critical
/// 2. first matching hard-failure rule: critical
/// 3. any magnitude above its critical bound: critical
/// 4. magnitudes above warning bounds plus unmet soft rules: warning, all of them listed
/// 5. healthy
///
/// Several warning-level findings never add up to critical.
pub fn classify(
    category: &CategoryDefinition,
    policy: &ThresholdPolicy,
    outcome: &ProbeOutcome,
) -> Classification {
    let reported = match outcome {
        ProbeOutcome::Failed(failure) => {
            return Classification::with(
                Status::Critical,
                vec![Condition::ProbeFailed {
                    failure: failure.kind,
                    cause: failure.cause.clone(),
                }],
                &category.failure_remediation,
            );
        }
        ProbeOutcome::Measured(reported) => reported,
    };

    let missing: Vec<_> = category
        .mandatory
        .iter()
        .filter(|mandatory| !reported.contains(&mandatory.measurement))
        .collect();
    if let Some(first) = missing.first() {
        let conditions = missing
            .iter()
            .map(|mandatory| Condition::MissingMeasurement {
                measurement: mandatory.measurement.clone(),
                description: mandatory.description.clone(),
            })
            .collect();
        return Classification::with(Status::Critical, conditions, &first.remediation);
    }

    let malformed: Vec<_> = category
        .magnitudes
        .iter()
        .filter_map(|rule| match reported.get(&rule.measurement)? {
            Measurement::Number(value) if value.is_finite() => None,
            value => Some(Condition::MalformedMeasurement {
                measurement: rule.measurement.clone(),
                label: rule.label.clone(),
                value: value.to_string(),
            }),
        })
        .collect();
    if !malformed.is_empty() {
        return Classification::with(Status::Critical, malformed, &category.failure_remediation);
    }

    if let Some(rule) = enabled(&category.hard_failures, policy).find(|rule| rule.when.holds(reported)) {
        return Classification::with(
            Status::Critical,
            vec![Condition::from_rule(rule, Status::Critical)],
            &rule.remediation,
        );
    }

    let mut critical: Vec<(Condition, &str)> = Vec::new();
    let mut warnings: Vec<(Condition, &str)> = Vec::new();
    for rule in &category.magnitudes {
        let Some(bounds) = policy.bounds(&rule.metric) else {
            continue;
        };
        let Some(mut value) = reported.number(&rule.measurement) else {
            continue;
        };
        if rule.absolute {
            value = value.abs();
        }
        if let Some((level, bound)) = bounds.breach(value) {
            let condition = Condition::ThresholdExceeded {
                metric: rule.metric.clone(),
                label: rule.label.clone(),
                value,
                bound,
                level,
                unit: rule.unit.clone(),
            };
            match level {
                Status::Critical => critical.push((condition, rule.remediation.as_str())),
                _ => warnings.push((condition, rule.remediation.as_str())),
            }
        }
    }
    if !critical.is_empty() {
        return finding(Status::Critical, critical);
    }

    for rule in enabled(&category.soft_conditions, policy) {
        if rule.when.holds(reported) {
            warnings.push((Condition::from_rule(rule, Status::Warning), rule.remediation.as_str()));
        }
    }
    if warnings.is_empty() {
        return Classification::healthy();
    }
    finding(Status::Warning, warnings)
}

/// Remediation comes from the first (dominant) condition.
fn finding(status: Status, conditions: Vec<(Condition, &str)>) -> Classification {
    let remediation = conditions.first().map(|(_, remediation)| remediation.to_string());
    Classification {
        status,
        conditions: conditions.into_iter().map(|(condition, _)| condition).collect(),
        remediation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::categories::{self, measurements, metrics, Predicate};
    use crate::health::models::{Measurements, ProbeFailure};
    use crate::health::policy::Bounds;

    fn dns_policy() -> ThresholdPolicy {
        ThresholdPolicy::builder()
            .metric(metrics::RESOLUTION_TIME_MS, Bounds::new(100.0, 500.0))
            .build()
            .unwrap()
    }

    fn resolved(resolution_ms: u64) -> Measurements {
        Measurements::new()
            .with(measurements::RESOLUTION_MS, resolution_ms)
            .with(measurements::PRIMARY_ADDRESS, "10.0.0.5")
            .with(measurements::LDAP_SRV_PRESENT, true)
            .with(measurements::KERBEROS_SRV_PRESENT, true)
            .with(measurements::GC_SRV_PRESENT, true)
    }

    #[test]
    fn test_all_conditions_met_is_healthy() {
        let outcome = ProbeOutcome::Measured(resolved(50));
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Healthy);
        assert!(result.conditions.is_empty());
        assert_eq!(result.remediation, None);
        assert_eq!(result.message(), "All checks passed");
    }

    #[test]
    fn test_probe_failure_is_critical_with_category_remediation() {
        let category = categories::dns_health();
        let outcome = ProbeOutcome::Failed(ProbeFailure::unreachable("no route to host"));
        let result = classify(&category, &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Critical);
        assert_eq!(result.remediation.as_deref(), Some(category.failure_remediation.as_str()));
        assert!(result.message().contains("no route to host"));
    }

    #[test]
    fn test_missing_mandatory_measurement_is_critical_even_when_fast() {
        let outcome = ProbeOutcome::Measured(
            Measurements::new().with(measurements::RESOLUTION_MS, 5u64),
        );
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Critical);
        assert!(matches!(
            result.conditions[0],
            Condition::MissingMeasurement { .. }
        ));
        assert!(
            result.message().contains("primary address record"),
            "got: {}",
            result.message()
        );
    }

    #[test]
    fn test_first_hard_failure_wins_and_stops() {
        let outcome = ProbeOutcome::Measured(
            resolved(900)
                .with(measurements::LDAP_SRV_PRESENT, false)
                .with(measurements::KERBEROS_SRV_PRESENT, false),
        );
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Critical);
        assert_eq!(result.conditions.len(), 1);
        assert_eq!(
            result.conditions[0],
            Condition::HardFailure {
                rule: "ldap_srv_missing".to_string(),
                description: "LDAP SRV record not found".to_string(),
            }
        );
    }

    #[test]
    fn test_critical_magnitude_cites_value_and_threshold() {
        let outcome = ProbeOutcome::Measured(resolved(600));
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.message(),
            "resolution time 600 ms exceeds critical threshold 500 ms"
        );
    }

    #[test]
    fn test_critical_magnitude_is_not_downgraded_by_soft_conditions() {
        let outcome = ProbeOutcome::Measured(
            resolved(600).with(measurements::GC_SRV_PRESENT, false),
        );
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Critical);
        assert!(result
            .conditions
            .iter()
            .all(|condition| condition.severity() == Status::Critical));
    }

    #[test]
    fn test_two_soft_conditions_stay_warning_and_are_both_listed() {
        let outcome = ProbeOutcome::Measured(
            resolved(20)
                .with(measurements::GC_SRV_PRESENT, false)
                .with(measurements::REVERSE_LOOKUP_OK, false),
        );
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Warning);
        assert_eq!(result.conditions.len(), 2);
        let message = result.message();
        assert!(message.contains("Global Catalog SRV record not found"), "got: {message}");
        assert!(message.contains("reverse lookup"), "got: {message}");
    }

    #[test]
    fn test_warning_magnitude_and_soft_condition_are_reported_together() {
        let outcome = ProbeOutcome::Measured(
            resolved(250).with(measurements::GC_SRV_PRESENT, false),
        );
        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);

        assert_eq!(result.status, Status::Warning);
        assert_eq!(result.conditions.len(), 2);
        assert!(matches!(
            result.conditions[0],
            Condition::ThresholdExceeded { level: Status::Warning, .. }
        ));
        assert!(result
            .remediation
            .as_deref()
            .unwrap()
            .contains("DNS server load"));
    }

    #[test]
    fn test_disabled_switch_skips_rule() {
        let policy = ThresholdPolicy::builder()
            .metric(metrics::RESOLUTION_TIME_MS, Bounds::new(100.0, 500.0))
            .switch(categories::switches::REQUIRE_IPV6, false)
            .build()
            .unwrap();
        let outcome = ProbeOutcome::Measured(
            resolved(20).with(measurements::IPV6_PRESENT, false),
        );

        let result = classify(&categories::dns_health(), &policy, &outcome);
        assert_eq!(result.status, Status::Healthy);
    }

    #[test]
    fn test_unconfigured_metric_is_skipped() {
        let outcome = ProbeOutcome::Measured(resolved(10_000));
        let result = classify(&categories::dns_health(), &ThresholdPolicy::default(), &outcome);
        assert_eq!(result.status, Status::Healthy);
    }

    #[test]
    fn test_absolute_offset_breaches_on_negative_values() {
        let policy = ThresholdPolicy::builder()
            .metric(metrics::TIME_OFFSET_SECONDS, Bounds::new(1.0, 5.0))
            .build()
            .unwrap();
        let outcome = ProbeOutcome::Measured(
            Measurements::new()
                .with(measurements::TIME_OFFSET_SECONDS, -7.5)
                .with(measurements::TIME_SERVICE_RUNNING, true),
        );

        let result = classify(&categories::time_sync(), &policy, &outcome);
        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.message(),
            "clock offset 7.50 s exceeds critical threshold 5 s"
        );
    }

    #[test]
    fn test_nan_magnitude_is_critical() {
        let outcome = ProbeOutcome::Measured(
            Measurements::new()
                .with(measurements::RESOLUTION_MS, f64::NAN)
                .with(measurements::PRIMARY_ADDRESS, "10.0.0.5"),
        );

        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);
        assert_eq!(result.status, Status::Critical);
        assert!(matches!(
            &result.conditions[..],
            [Condition::MalformedMeasurement { measurement, .. }] if measurement == measurements::RESOLUTION_MS
        ));
        assert_eq!(
            result.remediation.as_deref(),
            Some(categories::dns_health().failure_remediation.as_str())
        );
    }

    #[test]
    fn test_text_magnitude_is_critical() {
        let outcome = ProbeOutcome::Measured(
            Measurements::new()
                .with(measurements::RESOLUTION_MS, "9000")
                .with(measurements::PRIMARY_ADDRESS, "10.0.0.5"),
        );

        let result = classify(&categories::dns_health(), &dns_policy(), &outcome);
        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.message(),
            "resolution time reported as '9000', expected a finite number"
        );
    }

    #[test]
    fn test_empty_resource_measurements_are_critical() {
        let category = categories::resource_usage();
        let policy = category.default_policy().unwrap();
        let outcome = ProbeOutcome::Measured(Measurements::new());

        let result = classify(&category, &policy, &outcome);
        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.message(),
            "CPU usage could not be determined; memory usage could not be determined"
        );
    }

    #[test]
    fn test_custom_category_rules() {
        let category = CategoryDefinition::new("custom", "Custom", "check the agent")
            .soft_condition(Rule::new(
                "stale",
                "agent data is stale",
                Predicate::above("age_hours", 24.0),
                "restart the agent",
            ));
        let outcome = ProbeOutcome::Measured(Measurements::new().with("age_hours", 30u64));

        let result = classify(&category, &ThresholdPolicy::default(), &outcome);
        assert_eq!(result.status, Status::Warning);
        assert_eq!(result.remediation.as_deref(), Some("restart the agent"));
    }
}
