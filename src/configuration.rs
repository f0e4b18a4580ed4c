use crate::discovery::{DomainDiscovery, FileDiscovery, StaticDiscovery, TargetDiscovery};
use crate::error::ConfigError;
use crate::health::categories::service_reachability_for;
use crate::health::{
    builtin_categories, builtin_category, Bounds, CategoryPlan, Orchestrator, RunOptions, Target,
};
use crate::probes::{builtin_probe, Credentials, PortCheck};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_valid::Validate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_NAME: &str = "fleetcheck";
pub const ENV_PREFIX: &str = "FLEETCHECK";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate]
    pub run: RunSettings,
    /// Categories in execution order. All built-in categories when absent.
    #[serde(default)]
    pub categories: Option<Vec<CategorySettings>>,
    /// Fleet-wide threshold overrides, applied to every category.
    #[serde(default)]
    pub thresholds: IndexMap<String, Bounds>,
    #[serde(default)]
    pub switches: IndexMap<String, bool>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub discovery: Option<DiscoverySettings>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RunSettings {
    #[validate(minimum = 1)]
    #[validate(maximum = 3600)]
    pub probe_timeout_secs: u64,
    /// Overall run deadline; 0 disables it.
    pub deadline_secs: u64,
    #[validate(minimum = 1)]
    #[validate(maximum = 1024)]
    pub max_concurrency: usize,
    #[validate(maximum = 60000)]
    pub deadline_grace_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 30,
            deadline_secs: 600,
            max_concurrency: 16,
            deadline_grace_ms: 2000,
        }
    }
}

impl RunSettings {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            deadline: (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs)),
            max_concurrency: self.max_concurrency,
            deadline_grace: Duration::from_millis(self.deadline_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySettings {
    /// Built-in category key, e.g. `dns`.
    pub name: String,
    #[serde(default)]
    pub thresholds: IndexMap<String, Bounds>,
    #[serde(default)]
    pub switches: IndexMap<String, bool>,
    /// Targets for this category only, replacing the run's target list.
    #[serde(default)]
    pub discovery: Option<DiscoverySettings>,
    /// Ports checked by the `ports` category.
    #[serde(default)]
    pub ports: Option<Vec<PortCheck>>,
}

impl CategorySettings {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            thresholds: IndexMap::new(),
            switches: IndexMap::new(),
            discovery: None,
            ports: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscoverySettings {
    Static {
        targets: Vec<Target>,
    },
    File {
        path: PathBuf,
    },
    Domain {
        domain: String,
        #[serde(default = "default_ldap_port")]
        port: u16,
    },
}

fn default_ldap_port() -> u16 {
    389
}

impl DiscoverySettings {
    pub fn build(&self) -> Arc<dyn TargetDiscovery> {
        match self {
            Self::Static { targets } => Arc::new(StaticDiscovery::new(targets.clone())),
            Self::File { path } => Arc::new(FileDiscovery::new(path.clone())),
            Self::Domain { domain, port } => Arc::new(DomainDiscovery::new(domain.clone(), *port)),
        }
    }
}

impl Settings {
    /// Targets listed in configuration, if any.
    pub fn explicit_targets(&self) -> Option<Vec<Target>> {
        if self.targets.is_empty() {
            None
        } else {
            Some(self.targets.clone())
        }
    }

    pub fn selected_categories(&self) -> Vec<CategorySettings> {
        match &self.categories {
            Some(categories) => categories.clone(),
            None => builtin_categories()
                .into_iter()
                .map(|category| CategorySettings::new(category.key))
                .collect(),
        }
    }

    /// Builds the run plan. Every error here refuses the run.
    pub fn build_orchestrator(&self) -> Result<Orchestrator, ConfigError> {
        let plans = self
            .selected_categories()
            .iter()
            .map(|category| self.plan(category))
            .collect::<Result<Vec<_>, _>>()?;

        let mut orchestrator = Orchestrator::new(plans, self.run.options())?;
        if let Some(discovery) = &self.discovery {
            orchestrator = orchestrator.with_discovery(discovery.build());
        }
        if let Some(credentials) = &self.credentials {
            orchestrator = orchestrator.with_credentials(credentials.clone());
        }
        Ok(orchestrator)
    }

    /// Policy layering: category defaults, then fleet-wide overrides, then category overrides.
    fn plan(&self, category: &CategorySettings) -> Result<CategoryPlan, ConfigError> {
        let definition = match (category.name.as_str(), &category.ports) {
            (_, Some(ports)) if ports.is_empty() => {
                return Err(ConfigError::InvalidSetting(format!(
                    "category '{}' lists no ports",
                    category.name
                )))
            }
            // The rules must cover exactly the ports the probe connects to.
            ("ports", Some(ports)) => service_reachability_for(ports),
            (_, Some(_)) => {
                return Err(ConfigError::InvalidSetting(format!(
                    "category '{}' does not take a port list",
                    category.name
                )))
            }
            (_, None) => builtin_category(&category.name)
                .ok_or_else(|| ConfigError::UnknownCategory(category.name.clone()))?,
        };

        let policy = definition
            .default_policy()
            .and_then(|policy| policy.overlay(&self.thresholds, &self.switches))
            .and_then(|policy| policy.overlay(&category.thresholds, &category.switches))
            .map_err(|e| ConfigError::invalid_policy(&definition.name, e))?;

        let mut plan = CategoryPlan::new(definition, policy);
        if let Some(probe) = builtin_probe(&category.name, category.ports.clone()) {
            plan = plan.with_probe(probe);
        }
        if let Some(discovery) = &category.discovery {
            plan = plan.with_discovery(discovery.build());
        }
        Ok(plan)
    }
}

fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Settings, ConfigError> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings
        .validate()
        .map_err(|errors| ConfigError::Validation(errors.to_string()))?;
    Ok(settings)
}

/// Loads settings from `path` (or `fleetcheck.{yaml,toml,json}` when present) and
/// `FLEETCHECK__*` environment variables, e.g. `FLEETCHECK__RUN__PROBE_TIMEOUT_SECS=10`.
pub fn get_configuration(path: Option<&Path>) -> Result<Settings, ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let builder = config::Config::builder().add_source(file).add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );
    finish(builder)
}

pub fn load_from_str(yaml: &str) -> Result<Settings, ConfigError> {
    finish(
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::categories::metrics;

    #[test]
    fn test_defaults_select_every_builtin_category() {
        let settings = load_from_str("{}").unwrap();
        assert_eq!(settings.run.probe_timeout_secs, 30);
        assert_eq!(settings.selected_categories().len(), builtin_categories().len());
        assert!(settings.explicit_targets().is_none());

        let orchestrator = settings.build_orchestrator().unwrap();
        let names: Vec<_> = orchestrator.plans().map(|plan| plan.name().to_string()).collect();
        assert_eq!(names[0], "DNS Health");
        let dns = orchestrator.plans().next().unwrap().policy();
        assert!(!dns.switch("require_ipv6"));
        assert_eq!(orchestrator.options().deadline, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_full_settings() {
        let settings = load_from_str(
            r#"
run:
  probe_timeout_secs: 5
  deadline_secs: 0
  max_concurrency: 4
targets:
  - name: dc01.corp.example
    site: HQ
  - name: dc02.corp.example
thresholds:
  resolution_time_ms:
    warning: 150
switches:
  require_ipv6: true
categories:
  - name: ports
    ports:
      - port: 389
        service: LDAP
  - name: dns
    thresholds:
      resolution_time_ms:
        critical: 800
  - name: replication
    discovery:
      source: static
      targets:
        - name: pdc01
credentials:
  username: CORP\svc-health
  password: secret
"#,
        )
        .unwrap();

        assert_eq!(settings.run.options().deadline, None);
        assert_eq!(settings.explicit_targets().unwrap().len(), 2);
        assert_eq!(settings.credentials.as_ref().unwrap().password(), Some("secret"));

        let orchestrator = settings.build_orchestrator().unwrap();
        let plans: Vec<_> = orchestrator.plans().collect();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].name(), "Service Reachability");
        assert!(plans[0].has_probe());
        assert!(!plans[2].has_probe());

        let dns = plans[1].policy();
        assert_eq!(
            dns.bounds(metrics::RESOLUTION_TIME_MS),
            Some(Bounds::new(150.0, 800.0))
        );
        assert!(dns.switch("require_ipv6"));
        assert!(dns.switch("require_reverse_lookup"));
    }

    #[test]
    fn test_discovery_source_variants() {
        let settings = load_from_str(
            r#"
discovery:
  source: domain
  domain: corp.example
"#,
        )
        .unwrap();
        assert_eq!(
            settings.discovery,
            Some(DiscoverySettings::Domain {
                domain: "corp.example".to_string(),
                port: 389
            })
        );

        let settings = load_from_str("discovery:\n  source: file\n  path: dcs.txt\n").unwrap();
        assert_eq!(
            settings.discovery,
            Some(DiscoverySettings::File {
                path: PathBuf::from("dcs.txt")
            })
        );
    }

    #[test]
    fn test_warning_not_below_critical_is_refused() {
        let settings = load_from_str(
            r#"
categories:
  - name: dns
    thresholds:
      resolution_time_ms:
        warning: 500
        critical: 100
"#,
        )
        .unwrap();

        let err = settings.build_orchestrator().err().unwrap();
        assert!(
            matches!(err, ConfigError::InvalidPolicy { ref category, .. } if category == "DNS Health"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_empty_category_list_is_refused() {
        let settings = load_from_str("categories: []\n").unwrap();
        assert!(matches!(
            settings.build_orchestrator(),
            Err(ConfigError::NoCategories)
        ));
    }

    #[test]
    fn test_unknown_category_is_refused() {
        let settings = load_from_str("categories:\n  - name: certificates\n").unwrap();
        assert!(matches!(
            settings.build_orchestrator(),
            Err(ConfigError::UnknownCategory(name)) if name == "certificates"
        ));
    }

    #[test]
    fn test_configured_ports_get_matching_rules() {
        let settings = load_from_str(
            r#"
categories:
  - name: ports
    ports:
      - port: 389
        service: LDAP
      - port: 5985
        service: WinRM
      - port: 636
        service: LDAPS
        required: false
"#,
        )
        .unwrap();

        let orchestrator = settings.build_orchestrator().unwrap();
        let plan = orchestrator.plans().next().unwrap();
        let hard: Vec<_> = plan.definition().hard_failures.iter().map(|r| r.id.as_str()).collect();
        let soft: Vec<_> = plan.definition().soft_conditions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(hard, ["port_389_closed", "port_5985_closed"]);
        assert_eq!(soft, ["port_636_closed"]);
    }

    #[test]
    fn test_empty_port_list_is_refused() {
        let settings = load_from_str("categories:\n  - name: ports\n    ports: []\n").unwrap();
        let err = settings.build_orchestrator().err().unwrap();
        assert!(
            matches!(err, ConfigError::InvalidSetting(ref message) if message.contains("no ports")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_port_list_on_other_category_is_refused() {
        let settings =
            load_from_str("categories:\n  - name: dns\n    ports:\n      - port: 53\n        service: DNS\n")
                .unwrap();
        assert!(matches!(
            settings.build_orchestrator(),
            Err(ConfigError::InvalidSetting(_))
        ));
    }

    #[test]
    fn test_zero_concurrency_fails_validation() {
        let result = load_from_str("run:\n  max_concurrency: 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_a_load_error() {
        let result = get_configuration(Some(Path::new("/nonexistent/fleetcheck.yaml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
