use super::{Credentials, Probe};
use crate::health::categories::measurements;
use crate::health::{Measurements, ProbeOutcome, Target};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Resolves the target name through the system resolver and times the lookup.
///
/// A lookup that returns no address still yields measurements, just without
/// `primary_address`, so the classifier reports the missing record.
pub struct DnsProbe {
    port: u16,
}

impl DnsProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for DnsProbe {
    fn default() -> Self {
        Self::new(389)
    }
}

#[async_trait]
impl Probe for DnsProbe {
    #[tracing::instrument(name = "DNS probe", skip(self, _credentials), fields(node = %target.name))]
    async fn execute(&self, target: &Target, _credentials: Option<&Credentials>) -> ProbeOutcome {
        let start = Instant::now();
        let lookup = tokio::net::lookup_host((target.name.as_str(), self.port)).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let mut reported = Measurements::new().with(measurements::RESOLUTION_MS, elapsed);
        match lookup {
            Ok(addresses) => {
                let addresses: Vec<SocketAddr> = addresses.collect();
                reported.insert(measurements::ADDRESS_COUNT, addresses.len());
                let primary = addresses
                    .iter()
                    .find(|address| address.is_ipv4())
                    .or_else(|| addresses.first());
                if let Some(primary) = primary {
                    reported.insert(measurements::PRIMARY_ADDRESS, primary.ip().to_string());
                }
                reported.insert(
                    measurements::IPV6_PRESENT,
                    addresses.iter().any(SocketAddr::is_ipv6),
                );
            }
            Err(e) => {
                tracing::warn!("DNS lookup for {} failed: {:?}", target.name, e);
                reported.insert(measurements::RESOLUTION_ERROR, e.to_string());
            }
        }

        ProbeOutcome::Measured(reported)
    }
}
