//! Diagnostic categories as data.
//!
//! Every category shares one control flow (see [`classify`](super::classify)); what differs
//! is the set of mandatory measurements, ordered hard-failure rules, magnitude rules and soft
//! rules, each carrying its own remediation template.

use super::models::Measurements;
use super::policy::{Bounds, PolicyError, ThresholdPolicy};
use crate::probes::PortCheck;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Measurement names reported by the built-in probes and read by the built-in categories.
pub mod measurements {
    pub const RESOLUTION_MS: &str = "resolution_ms";
    pub const PRIMARY_ADDRESS: &str = "primary_address";
    pub const ADDRESS_COUNT: &str = "address_count";
    pub const IPV6_PRESENT: &str = "ipv6_present";
    pub const RESOLUTION_ERROR: &str = "resolution_error";
    pub const LDAP_SRV_PRESENT: &str = "ldap_srv_present";
    pub const KERBEROS_SRV_PRESENT: &str = "kerberos_srv_present";
    pub const GC_SRV_PRESENT: &str = "gc_srv_present";
    pub const REVERSE_LOOKUP_OK: &str = "reverse_lookup_ok";

    pub const CONNECT_MS: &str = "connect_ms";
    pub const OPEN_PORT_COUNT: &str = "open_port_count";

    pub const REPLICATION_LAST_ERROR: &str = "last_error_code";
    pub const REPLICATION_FAILED_PARTNERS: &str = "failed_partner_count";
    pub const REPLICATION_LAG_MINUTES: &str = "lag_minutes";
    pub const REPLICATION_BACKLOG: &str = "backlog_count";
    pub const INBOUND_DISABLED: &str = "inbound_disabled";

    pub const TIME_OFFSET_SECONDS: &str = "offset_seconds";
    pub const TIME_SERVICE_RUNNING: &str = "time_service_running";
    pub const TIME_SOURCE: &str = "time_source";

    pub const NTDS_RUNNING: &str = "ntds_running";
    pub const KDC_RUNNING: &str = "kdc_running";
    pub const NETLOGON_RUNNING: &str = "netlogon_running";
    pub const DNS_SERVER_RUNNING: &str = "dns_server_running";
    pub const DFSR_RUNNING: &str = "dfsr_running";
    pub const SYSVOL_SHARED: &str = "sysvol_shared";

    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const DISK_USED_PERCENT: &str = "disk_used_percent";
    pub const DATABASE_DISK_USED_PERCENT: &str = "database_disk_used_percent";

    /// Flag reported by the port probe for each probed port.
    pub fn port_open(port: u16) -> String {
        format!("port_{port}_open")
    }
}

/// Policy metric names used by the built-in categories.
pub mod metrics {
    pub const RESOLUTION_TIME_MS: &str = "resolution_time_ms";
    pub const CONNECT_TIME_MS: &str = "connect_time_ms";
    pub const REPLICATION_LAG_MINUTES: &str = "replication_lag_minutes";
    pub const REPLICATION_BACKLOG: &str = "replication_backlog_count";
    pub const TIME_OFFSET_SECONDS: &str = "time_offset_seconds";
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const DISK_USED_PERCENT: &str = "disk_used_percent";
}

/// Policy switches used by the built-in categories.
pub mod switches {
    pub const REQUIRE_IPV6: &str = "require_ipv6";
    pub const REQUIRE_REVERSE_LOOKUP: &str = "require_reverse_lookup";
    pub const REQUIRE_DFSR: &str = "require_dfsr";
}

/// A boolean test over reported measurements.
///
/// Every predicate except `missing` is false when the measurement it reads was not reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Predicate {
    FlagIs { measurement: String, value: bool },
    Above { measurement: String, limit: f64 },
    TextIs { measurement: String, value: String },
    TextIsNot { measurement: String, value: String },
    Missing { measurement: String },
}

impl Predicate {
    pub fn flag_is<S: Into<String>>(measurement: S, value: bool) -> Self {
        Self::FlagIs {
            measurement: measurement.into(),
            value,
        }
    }

    pub fn above<S: Into<String>>(measurement: S, limit: f64) -> Self {
        Self::Above {
            measurement: measurement.into(),
            limit,
        }
    }

    pub fn text_is<S: Into<String>, V: Into<String>>(measurement: S, value: V) -> Self {
        Self::TextIs {
            measurement: measurement.into(),
            value: value.into(),
        }
    }

    pub fn text_is_not<S: Into<String>, V: Into<String>>(measurement: S, value: V) -> Self {
        Self::TextIsNot {
            measurement: measurement.into(),
            value: value.into(),
        }
    }

    pub fn missing<S: Into<String>>(measurement: S) -> Self {
        Self::Missing {
            measurement: measurement.into(),
        }
    }

    pub fn holds(&self, reported: &Measurements) -> bool {
        match self {
            Self::FlagIs { measurement, value } => reported.flag(measurement) == Some(*value),
            Self::Above { measurement, limit } => {
                reported.number(measurement).is_some_and(|v| v > *limit)
            }
            Self::TextIs { measurement, value } => {
                reported.text(measurement) == Some(value.as_str())
            }
            Self::TextIsNot { measurement, value } => reported
                .text(measurement)
                .is_some_and(|text| text != value.as_str()),
            Self::Missing { measurement } => !reported.contains(measurement),
        }
    }
}

/// A named condition with its remediation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub when: Predicate,
    pub remediation: String,
    /// Policy switch gating the rule; a disabled rule is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<String>,
}

impl Rule {
    pub fn new<I, D, R>(id: I, description: D, when: Predicate, remediation: R) -> Self
    where
        I: Into<String>,
        D: Into<String>,
        R: Into<String>,
    {
        Self {
            id: id.into(),
            description: description.into(),
            when,
            remediation: remediation.into(),
            switch: None,
        }
    }

    pub fn gated_by<S: Into<String>>(mut self, switch: S) -> Self {
        self.switch = Some(switch.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandatoryMeasurement {
    pub measurement: String,
    pub description: String,
    pub remediation: String,
}

/// Compares one reported number against a policy metric's bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeRule {
    pub metric: String,
    pub measurement: String,
    pub label: String,
    #[serde(default)]
    pub unit: String,
    /// Compare the absolute value, for signed quantities such as clock offset.
    #[serde(default)]
    pub absolute: bool,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    /// Configuration key, e.g. `dns`.
    pub key: String,
    /// Display name used in results, e.g. `DNS Health`.
    pub name: String,
    pub failure_remediation: String,
    #[serde(default)]
    pub mandatory: Vec<MandatoryMeasurement>,
    #[serde(default)]
    pub hard_failures: Vec<Rule>,
    #[serde(default)]
    pub magnitudes: Vec<MagnitudeRule>,
    #[serde(default)]
    pub soft_conditions: Vec<Rule>,
    #[serde(default)]
    pub default_thresholds: IndexMap<String, Bounds>,
    /// Switch values applied before any configured override.
    #[serde(default)]
    pub default_switches: IndexMap<String, bool>,
}

impl CategoryDefinition {
    pub fn new<K, N, R>(key: K, name: N, failure_remediation: R) -> Self
    where
        K: Into<String>,
        N: Into<String>,
        R: Into<String>,
    {
        Self {
            key: key.into(),
            name: name.into(),
            failure_remediation: failure_remediation.into(),
            mandatory: Vec::new(),
            hard_failures: Vec::new(),
            magnitudes: Vec::new(),
            soft_conditions: Vec::new(),
            default_thresholds: IndexMap::new(),
            default_switches: IndexMap::new(),
        }
    }

    pub fn mandatory<M, D, R>(mut self, measurement: M, description: D, remediation: R) -> Self
    where
        M: Into<String>,
        D: Into<String>,
        R: Into<String>,
    {
        self.mandatory.push(MandatoryMeasurement {
            measurement: measurement.into(),
            description: description.into(),
            remediation: remediation.into(),
        });
        self
    }

    pub fn hard_failure(mut self, rule: Rule) -> Self {
        self.hard_failures.push(rule);
        self
    }

    pub fn soft_condition(mut self, rule: Rule) -> Self {
        self.soft_conditions.push(rule);
        self
    }

    /// Adds a magnitude rule together with the metric's default bounds.
    pub fn magnitude(mut self, rule: MagnitudeRule, defaults: Bounds) -> Self {
        self.default_thresholds.insert(rule.metric.clone(), defaults);
        self.magnitudes.push(rule);
        self
    }

    pub fn default_switch<S: Into<String>>(mut self, name: S, enabled: bool) -> Self {
        self.default_switches.insert(name.into(), enabled);
        self
    }

    /// Policy built from the category's own default bounds and switches.
    pub fn default_policy(&self) -> Result<ThresholdPolicy, PolicyError> {
        ThresholdPolicy::default().overlay(&self.default_thresholds, &self.default_switches)
    }
}

fn magnitude(metric: &str, measurement: &str, label: &str, unit: &str, remediation: &str) -> MagnitudeRule {
    MagnitudeRule {
        metric: metric.to_string(),
        measurement: measurement.to_string(),
        label: label.to_string(),
        unit: unit.to_string(),
        absolute: false,
        remediation: remediation.to_string(),
    }
}

/// Well-known directory-server ports and whether the port probe treats them as required.
pub const SERVICE_PORTS: &[(u16, &str, bool)] = &[
    (53, "DNS", true),
    (88, "Kerberos", true),
    (389, "LDAP", true),
    (445, "SMB", true),
    (636, "LDAPS", false),
    (3268, "Global Catalog", false),
];

pub fn dns_health() -> CategoryDefinition {
    use measurements::*;
    CategoryDefinition::new(
        "dns",
        "DNS Health",
        "Verify the DNS server is reachable from this host and that the node is registered in DNS.",
    )
    .mandatory(
        PRIMARY_ADDRESS,
        "primary address record",
        "Register the node's A record (ipconfig /registerdns) and verify zone replication.",
    )
    .hard_failure(Rule::new(
        "ldap_srv_missing",
        "LDAP SRV record not found",
        Predicate::flag_is(LDAP_SRV_PRESENT, false),
        "Restart the Netlogon service to re-register SRV records (nltest /dsregdns).",
    ))
    .hard_failure(Rule::new(
        "kerberos_srv_missing",
        "Kerberos SRV record not found",
        Predicate::flag_is(KERBEROS_SRV_PRESENT, false),
        "Restart the Netlogon service to re-register SRV records (nltest /dsregdns).",
    ))
    .magnitude(
        magnitude(
            metrics::RESOLUTION_TIME_MS,
            RESOLUTION_MS,
            "resolution time",
            "ms",
            "Check DNS server load and forwarder configuration; slow resolution delays logons.",
        ),
        Bounds::new(100.0, 500.0),
    )
    .soft_condition(Rule::new(
        "gc_srv_missing",
        "Global Catalog SRV record not found",
        Predicate::flag_is(GC_SRV_PRESENT, false),
        "If this node is a Global Catalog, restart Netlogon to re-register its SRV records.",
    ))
    .soft_condition(
        Rule::new(
            "reverse_lookup_failed",
            "reverse lookup (PTR) did not resolve",
            Predicate::flag_is(REVERSE_LOOKUP_OK, false),
            "Create the PTR record in the matching reverse lookup zone.",
        )
        .gated_by(switches::REQUIRE_REVERSE_LOOKUP),
    )
    .soft_condition(
        Rule::new(
            "ipv6_missing",
            "no IPv6 address record",
            Predicate::flag_is(IPV6_PRESENT, false),
            "Register an AAAA record or disable the require_ipv6 switch.",
        )
        .gated_by(switches::REQUIRE_IPV6),
    )
    .default_switch(switches::REQUIRE_IPV6, false)
}

/// The service-port table as port checks.
pub fn default_ports() -> Vec<PortCheck> {
    SERVICE_PORTS
        .iter()
        .map(|(port, service, required)| PortCheck::new(*port, *service).required(*required))
        .collect()
}

pub fn service_reachability() -> CategoryDefinition {
    service_reachability_for(&default_ports())
}

/// Reachability rules for exactly the ports the port probe is given.
///
/// Required ports are hard failures, optional ones soft conditions.
pub fn service_reachability_for(ports: &[PortCheck]) -> CategoryDefinition {
    use measurements::*;
    let mut category = CategoryDefinition::new(
        "ports",
        "Service Reachability",
        "Confirm the node is powered on and that firewalls allow directory traffic from this host.",
    );
    for check in ports {
        let (port, service) = (check.port, &check.service);
        let rule = Rule::new(
            format!("port_{port}_closed"),
            format!("{service} port {port} is not accepting connections"),
            Predicate::flag_is(port_open(port), false),
            format!("Check that the {service} service is running and port {port} is open in the host firewall."),
        );
        category = if check.required {
            category.hard_failure(rule)
        } else {
            category.soft_condition(rule)
        };
    }
    category.magnitude(
        magnitude(
            metrics::CONNECT_TIME_MS,
            CONNECT_MS,
            "connect time",
            "ms",
            "Investigate network latency between this host and the node.",
        ),
        Bounds::new(200.0, 1000.0),
    )
}

pub fn replication() -> CategoryDefinition {
    use measurements::*;
    CategoryDefinition::new(
        "replication",
        "Replication",
        "Run repadmin /replsummary from another node to confirm replication metadata is readable.",
    )
    .mandatory(
        REPLICATION_LAST_ERROR,
        "last replication result",
        "Ensure the account used has rights to read replication metadata.",
    )
    .hard_failure(Rule::new(
        "replication_error",
        "replication error present",
        Predicate::above(REPLICATION_LAST_ERROR, 0.0),
        "Inspect repadmin /showrepl for the failing partner and resolve the reported error.",
    ))
    .hard_failure(Rule::new(
        "replication_partner_failures",
        "one or more replication partners failing",
        Predicate::above(REPLICATION_FAILED_PARTNERS, 0.0),
        "Check connectivity to the failing partners and their own replication status.",
    ))
    .magnitude(
        magnitude(
            metrics::REPLICATION_LAG_MINUTES,
            REPLICATION_LAG_MINUTES,
            "replication lag",
            "min",
            "Force replication (repadmin /syncall) and review site link schedules.",
        ),
        Bounds::new(60.0, 180.0),
    )
    .magnitude(
        magnitude(
            metrics::REPLICATION_BACKLOG,
            REPLICATION_BACKLOG,
            "replication backlog",
            "changes",
            "Review DFSR/AD replication backlog and bandwidth between sites.",
        ),
        Bounds::new(100.0, 1000.0),
    )
    .soft_condition(Rule::new(
        "inbound_replication_disabled",
        "inbound replication is disabled",
        Predicate::flag_is(INBOUND_DISABLED, true),
        "Re-enable inbound replication (repadmin /options -DISABLE_INBOUND_REPL).",
    ))
}

pub fn time_sync() -> CategoryDefinition {
    use measurements::*;
    let mut offset = magnitude(
        metrics::TIME_OFFSET_SECONDS,
        TIME_OFFSET_SECONDS,
        "clock offset",
        "s",
        "Resynchronise the clock (w32tm /resync) and verify the time source hierarchy.",
    );
    offset.absolute = true;

    CategoryDefinition::new(
        "time_sync",
        "Time Synchronization",
        "Verify the Windows Time service can be queried on the node (w32tm /query /status).",
    )
    .mandatory(
        TIME_OFFSET_SECONDS,
        "clock offset",
        "Ensure the Windows Time service is reachable and reporting an offset.",
    )
    .hard_failure(Rule::new(
        "time_service_stopped",
        "Windows Time service is not running",
        Predicate::flag_is(TIME_SERVICE_RUNNING, false),
        "Start the Windows Time service and set it to automatic start.",
    ))
    .magnitude(offset, Bounds::new(1.0, 5.0))
    .soft_condition(Rule::new(
        "local_clock_source",
        "time source is the local CMOS clock",
        Predicate::text_is(TIME_SOURCE, "Local CMOS Clock"),
        "Point the node at the domain hierarchy (w32tm /config /syncfromflags:domhier /update).",
    ))
}

pub fn core_services() -> CategoryDefinition {
    use measurements::*;
    CategoryDefinition::new(
        "services",
        "Core Services",
        "Verify the service control manager on the node is reachable with the supplied credentials.",
    )
    .mandatory(
        NTDS_RUNNING,
        "directory service status",
        "Ensure service status can be queried on the node.",
    )
    .hard_failure(Rule::new(
        "ntds_stopped",
        "Active Directory Domain Services is not running",
        Predicate::flag_is(NTDS_RUNNING, false),
        "Start NTDS and review the Directory Service event log for the cause of the stop.",
    ))
    .hard_failure(Rule::new(
        "kdc_stopped",
        "Kerberos Key Distribution Center is not running",
        Predicate::flag_is(KDC_RUNNING, false),
        "Start the KDC service; authentication fails on this node until it runs.",
    ))
    .hard_failure(Rule::new(
        "netlogon_stopped",
        "Netlogon is not running",
        Predicate::flag_is(NETLOGON_RUNNING, false),
        "Start Netlogon and confirm SYSVOL is shared.",
    ))
    .soft_condition(Rule::new(
        "dns_server_stopped",
        "DNS Server service is not running",
        Predicate::flag_is(DNS_SERVER_RUNNING, false),
        "Start the DNS Server service if this node hosts DNS.",
    ))
    .soft_condition(
        Rule::new(
            "dfsr_stopped",
            "DFS Replication is not running",
            Predicate::flag_is(DFSR_RUNNING, false),
            "Start DFS Replication so SYSVOL changes replicate.",
        )
        .gated_by(switches::REQUIRE_DFSR),
    )
    .soft_condition(Rule::new(
        "sysvol_not_shared",
        "SYSVOL share is not published",
        Predicate::flag_is(SYSVOL_SHARED, false),
        "Check SYSVOL replication state and the SysvolReady registry value.",
    ))
}

pub fn resource_usage() -> CategoryDefinition {
    use measurements::*;
    CategoryDefinition::new(
        "resources",
        "Resource Usage",
        "Verify performance counters can be read from the node.",
    )
    .mandatory(
        CPU_PERCENT,
        "CPU usage",
        "Check that the processor performance counters are enabled and readable remotely.",
    )
    .mandatory(
        MEMORY_PERCENT,
        "memory usage",
        "Check that the memory performance counters are enabled and readable remotely.",
    )
    .magnitude(
        magnitude(
            metrics::CPU_PERCENT,
            CPU_PERCENT,
            "CPU usage",
            "%",
            "Identify the processes consuming CPU (LSASS load often points to expensive LDAP queries).",
        ),
        Bounds::new(80.0, 95.0),
    )
    .magnitude(
        magnitude(
            metrics::MEMORY_PERCENT,
            MEMORY_PERCENT,
            "memory usage",
            "%",
            "Review memory consumers and consider adding memory to the node.",
        ),
        Bounds::new(85.0, 95.0),
    )
    .magnitude(
        magnitude(
            metrics::DISK_USED_PERCENT,
            DISK_USED_PERCENT,
            "system disk usage",
            "%",
            "Free space on the system volume.",
        ),
        Bounds::new(80.0, 90.0),
    )
    .magnitude(
        magnitude(
            metrics::DISK_USED_PERCENT,
            DATABASE_DISK_USED_PERCENT,
            "database disk usage",
            "%",
            "Free space on the volume hosting the directory database and logs.",
        ),
        Bounds::new(80.0, 90.0),
    )
}

/// All built-in categories in their default execution order.
pub fn builtin_categories() -> Vec<CategoryDefinition> {
    vec![
        dns_health(),
        service_reachability(),
        replication(),
        time_sync(),
        core_services(),
        resource_usage(),
    ]
}

pub fn builtin_category(key: &str) -> Option<CategoryDefinition> {
    builtin_categories()
        .into_iter()
        .find(|category| category.key == key)
}
