use super::{Credentials, Probe};
use crate::health::categories::{default_ports, measurements};
use crate::health::{Measurements, ProbeFailure, ProbeOutcome, Target};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheck {
    pub port: u16,
    pub service: String,
    /// A closed required port is critical; a closed optional one only warns.
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

impl PortCheck {
    pub fn new<S: Into<String>>(port: u16, service: S) -> Self {
        Self {
            port,
            service: service.into(),
            required: true,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// Opens a TCP connection to each configured port and reports which accepted.
///
/// A target where no port accepts a connection is reported as unreachable.
pub struct PortProbe {
    ports: Vec<PortCheck>,
    connect_timeout: Duration,
}

impl PortProbe {
    pub fn new(ports: Vec<PortCheck>) -> Self {
        Self {
            ports,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    async fn connect(&self, host: &str, check: &PortCheck) -> Result<u64, String> {
        let start = Instant::now();
        match timeout(self.connect_timeout, TcpStream::connect((host, check.port))).await {
            Ok(Ok(_stream)) => Ok(start.elapsed().as_millis() as u64),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no answer within {:?}", self.connect_timeout)),
        }
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(default_ports())
    }
}

#[async_trait]
impl Probe for PortProbe {
    #[tracing::instrument(name = "Port probe", skip(self, _credentials), fields(node = %target.name))]
    async fn execute(&self, target: &Target, _credentials: Option<&Credentials>) -> ProbeOutcome {
        if self.ports.is_empty() {
            return ProbeOutcome::Failed(ProbeFailure::internal("no service ports are configured"));
        }
        let attempts = self
            .ports
            .iter()
            .map(|check| self.connect(&target.name, check));
        let results = futures::future::join_all(attempts).await;

        let mut reported = Measurements::new();
        let mut slowest: Option<u64> = None;
        let mut open = 0usize;
        let mut last_error = None;
        for (check, result) in self.ports.iter().zip(results) {
            match result {
                Ok(elapsed) => {
                    open += 1;
                    slowest = Some(slowest.map_or(elapsed, |s| s.max(elapsed)));
                    reported.insert(measurements::port_open(check.port), true);
                }
                Err(e) => {
                    tracing::debug!("{} port {} on {}: {}", check.service, check.port, target.name, e);
                    reported.insert(measurements::port_open(check.port), false);
                    last_error = Some(e);
                }
            }
        }

        if open == 0 {
            let cause = last_error.unwrap_or_else(|| "no port accepted a connection".to_string());
            return ProbeOutcome::Failed(ProbeFailure::unreachable(format!(
                "none of {} service ports accepted a connection ({})",
                self.ports.len(),
                cause
            )));
        }

        reported.insert(measurements::OPEN_PORT_COUNT, open);
        if let Some(slowest) = slowest {
            reported.insert(measurements::CONNECT_MS, slowest);
        }
        ProbeOutcome::Measured(reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FailureKind;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_reports_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let probe = PortProbe::new(vec![
            PortCheck::new(open_port, "LDAP"),
            PortCheck::new(closed, "LDAPS"),
        ]);
        let outcome = probe.execute(&Target::new("127.0.0.1"), None).await;

        let ProbeOutcome::Measured(reported) = outcome else {
            panic!("expected measurements");
        };
        assert_eq!(reported.flag(&measurements::port_open(open_port)), Some(true));
        assert_eq!(reported.flag(&measurements::port_open(closed)), Some(false));
        assert_eq!(reported.number(measurements::OPEN_PORT_COUNT), Some(1.0));
        assert!(reported.number(measurements::CONNECT_MS).is_some());
    }

    #[tokio::test]
    async fn test_no_open_port_is_unreachable() {
        let closed = closed_port().await;
        let probe = PortProbe::new(vec![PortCheck::new(closed, "LDAP")]);

        let outcome = probe.execute(&Target::new("127.0.0.1"), None).await;
        assert_eq!(
            outcome.failure().map(|failure| failure.kind),
            Some(FailureKind::Unreachable)
        );
    }

    #[tokio::test]
    async fn test_empty_port_list_is_not_measured() {
        let outcome = PortProbe::new(Vec::new())
            .execute(&Target::new("127.0.0.1"), None)
            .await;
        assert_eq!(
            outcome.failure().map(|failure| failure.kind),
            Some(FailureKind::Internal)
        );
    }

    #[test]
    fn test_port_check_is_required_unless_configured() {
        let checks: Vec<PortCheck> = serde_yaml::from_str(
            "- port: 5985\n  service: WinRM\n- port: 636\n  service: LDAPS\n  required: false\n",
        )
        .unwrap();
        assert!(checks[0].required);
        assert!(!checks[1].required);
    }
}
