use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, info};

use super::{Capability, ChallengeProvider, ChallengeResponse, required_option};
use crate::{
    core::types::DomainPolicy,
    domain::normalize_domain_suffix,
    error::ProviderError,
    issuance::dns_providers::{
        CloudflareDns, DigitalOceanDns, DnsProviderAdapter, PropagationState, poll_dns_propagation,
        record_name,
    },
};

const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(120);
const PROPAGATION_INTERVAL: Duration = Duration::from_secs(5);

/// DNS-01 solver backed by a hosting provider's API.
pub struct DnsChallenge {
    adapter: Box<dyn DnsProviderAdapter>,
    propagation_timeout: Duration,
}

impl DnsChallenge {
    pub fn new(adapter: Box<dyn DnsProviderAdapter>, propagation_timeout: Duration) -> Self {
        Self {
            adapter,
            propagation_timeout,
        }
    }

    fn wait_for_propagation(&self, record: &str, value: &str) -> Result<()> {
        if self.propagation_timeout.is_zero() {
            return Ok(());
        }
        info!(
            "[dns] waiting up to {}s for {record} to propagate",
            self.propagation_timeout.as_secs()
        );
        let result =
            poll_dns_propagation(record, value, self.propagation_timeout, PROPAGATION_INTERVAL)?;
        match result.state {
            PropagationState::Found => Ok(()),
            PropagationState::WrongContent => Err(anyhow!(
                "{record} resolves to {:?} instead of the challenge value",
                result.observed_values
            )),
            state => Err(anyhow!(
                "{record} not visible after {}s ({state:?})",
                self.propagation_timeout.as_secs()
            )),
        }
    }
}

impl ChallengeProvider for DnsChallenge {
    fn capability(&self) -> Capability {
        Capability::Dns01
    }

    fn present(&mut self, challenge: &ChallengeResponse) -> Result<()> {
        let record = record_name(&challenge.domain);
        debug!("[dns] {} creating TXT {record}", self.adapter.name());
        self.adapter.create_txt(&record, &challenge.proof)?;
        self.wait_for_propagation(&record, &challenge.proof)
    }

    fn cleanup(&mut self, challenge: &ChallengeResponse) -> Result<()> {
        let record = record_name(&challenge.domain);
        debug!("[dns] {} removing TXT {record}", self.adapter.name());
        self.adapter.cleanup_txt(&record)
    }
}

pub(super) fn cloudflare_from_policy(
    policy: &DomainPolicy,
) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
    let (token, zone, timeout) = dns_options(policy, "dns-cloudflare")?;
    Ok(Box::new(DnsChallenge::new(
        Box::new(CloudflareDns::new(token, zone)),
        timeout,
    )))
}

pub(super) fn digitalocean_from_policy(
    policy: &DomainPolicy,
) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
    let (token, zone, timeout) = dns_options(policy, "dns-digitalocean")?;
    Ok(Box::new(DnsChallenge::new(
        Box::new(DigitalOceanDns::new(token, zone)),
        timeout,
    )))
}

/// `token` (required), `zone` (defaults to the domain key) and
/// `propagation-timeout` in seconds (`0` skips the wait).
fn dns_options(
    policy: &DomainPolicy,
    provider: &str,
) -> Result<(String, String, Duration), ProviderError> {
    let invalid = |reason: String| ProviderError::InvalidOptions {
        provider: provider.to_string(),
        reason,
    };

    let token = required_option(policy, provider, "token")?.trim().to_string();
    let zone_raw = policy.option("zone").unwrap_or(&policy.domain_key);
    let zone = normalize_domain_suffix(zone_raw)
        .map_err(|err| invalid(format!("zone `{zone_raw}`: {err}")))?;
    if zone.is_empty() {
        return Err(invalid("zone must not be empty".to_string()));
    }
    let timeout = match policy.option("propagation-timeout") {
        None => DEFAULT_PROPAGATION_TIMEOUT,
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid(format!("propagation-timeout `{raw}` is not a number of seconds")))?,
    };
    Ok((token, zone, timeout))
}
