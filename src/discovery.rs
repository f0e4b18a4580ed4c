//! Target discovery.
//!
//! Used when a run is started without an explicit target list, or for categories that
//! check only a subset of the fleet (role holders, one site).

use crate::health::Target;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no targets were supplied and no discovery source is configured")]
    NotConfigured,
    #[error("failed to read target list {path}: {cause}")]
    Io { path: PathBuf, cause: String },
    #[error("line {line} of {path} is not a valid target entry")]
    Malformed { path: PathBuf, line: usize },
    #[error("target discovery failed: {0}")]
    Failed(String),
}

/// Produces the list of targets for a run.
#[async_trait]
pub trait TargetDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError>;
}

/// A fixed target list, typically from configuration.
pub struct StaticDiscovery {
    targets: Vec<Target>,
}

impl StaticDiscovery {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl TargetDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        Ok(self.targets.clone())
    }
}

/// Reads targets from a text file, one per line: `name[,site[,role]]`.
/// Blank lines and `#` comments are ignored.
pub struct FileDiscovery {
    path: PathBuf,
}

impl FileDiscovery {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(&self, content: &str) -> Result<Vec<Target>, DiscoveryError> {
        let mut targets = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(',').map(str::trim);
            let name = fields.next().filter(|name| !name.is_empty()).ok_or_else(|| {
                DiscoveryError::Malformed {
                    path: self.path.clone(),
                    line: index + 1,
                }
            })?;
            let mut target = Target::new(name);
            if let Some(site) = fields.next().filter(|site| !site.is_empty()) {
                target = target.with_site(site);
            }
            if let Some(role) = fields.next().filter(|role| !role.is_empty()) {
                target = target.with_role(role);
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

#[async_trait]
impl TargetDiscovery for FileDiscovery {
    #[tracing::instrument(name = "Discover targets from file", skip(self), fields(path = %self.path.display()))]
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DiscoveryError::Io {
                path: self.path.clone(),
                cause: e.to_string(),
            })?;
        self.parse(&content)
    }
}

/// Resolves a domain name; every distinct address it resolves to becomes a target.
///
/// In a directory domain the bare domain name carries an address record for each
/// domain controller.
pub struct DomainDiscovery {
    domain: String,
    port: u16,
}

impl DomainDiscovery {
    pub fn new<S: Into<String>>(domain: S, port: u16) -> Self {
        Self {
            domain: domain.into(),
            port,
        }
    }
}

#[async_trait]
impl TargetDiscovery for DomainDiscovery {
    #[tracing::instrument(name = "Discover targets from domain", skip(self), fields(domain = %self.domain))]
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        let addresses = tokio::net::lookup_host((self.domain.as_str(), self.port))
            .await
            .map_err(|e| DiscoveryError::Failed(format!("resolving {}: {}", self.domain, e)))?;

        let mut seen = HashSet::new();
        let targets = addresses
            .map(|address| address.ip())
            .filter(|ip| seen.insert(*ip))
            .map(|ip| Target::new(ip.to_string()).with_role("domain controller"))
            .collect();
        Ok(targets)
    }
}

/// Memoises the shared discovery source for the duration of one run.
///
/// Built fresh by every run; nothing carries over between runs.
pub struct DiscoveryCache {
    source: Option<Arc<dyn TargetDiscovery>>,
    targets: OnceCell<Result<Arc<[Target]>, DiscoveryError>>,
}

impl DiscoveryCache {
    pub fn new(source: Option<Arc<dyn TargetDiscovery>>) -> Self {
        Self {
            source,
            targets: OnceCell::new(),
        }
    }

    pub async fn targets(&self) -> Result<Arc<[Target]>, DiscoveryError> {
        self.targets
            .get_or_init(|| async {
                let Some(source) = &self.source else {
                    return Err(DiscoveryError::NotConfigured);
                };
                let discovered = source.discover().await;
                match &discovered {
                    Ok(targets) => tracing::info!(count = targets.len(), "Discovered targets"),
                    Err(e) => tracing::error!("Target discovery failed: {}", e),
                }
                discovered.map(Arc::from)
            })
            .await
            .clone()
    }
}
