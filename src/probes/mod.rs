//! Probe collaborators.
//!
//! A probe measures one aspect of one target. Expected failures are returned as
//! [`ProbeOutcome::Failed`](crate::health::ProbeOutcome) values, never as panics; the check
//! runner still contains panics so a broken probe only costs its own target.

mod dns;
mod ports;

pub use dns::DnsProbe;
pub use ports::{PortCheck, PortProbe};

use crate::health::{ProbeOutcome, Target};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Credentials handed to probes that need an authenticated session.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    password: Option<String>,
}

impl Credentials {
    pub fn new<U: Into<String>>(username: U, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Measures one category of health data on one target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn execute(&self, target: &Target, credentials: Option<&Credentials>) -> ProbeOutcome;
}

/// Probe implementations that ship with the crate, keyed by category.
///
/// Categories without a built-in probe need one registered by the embedding application.
pub fn builtin_probe(category_key: &str, ports: Option<Vec<PortCheck>>) -> Option<Arc<dyn Probe>> {
    match category_key {
        "dns" => Some(Arc::new(DnsProbe::default())),
        "ports" => Some(Arc::new(match ports {
            Some(ports) => PortProbe::new(ports),
            None => PortProbe::default(),
        })),
        _ => None,
    }
}
