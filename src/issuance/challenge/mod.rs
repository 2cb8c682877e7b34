//! Challenge providers and the registry that maps a configured challenge name
//! to a constructor.
//!
//! The registry is assembled once at startup and only read afterwards. Each
//! registration declares the ACME capability its providers satisfy; a
//! constructor that hands back a provider for a different capability is a
//! programming error and panics.

use std::{collections::BTreeMap, fmt};

use log::debug;

use crate::{core::types::DomainPolicy, error::ProviderError};

mod dns;
mod http_port;
mod webroot;

pub use dns::DnsChallenge;
pub use http_port::HttpPortProvider;
pub use webroot::WebrootProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Http01,
    TlsAlpn01,
    Dns01,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Http01 => "http-01",
            Capability::TlsAlpn01 => "tls-alpn-01",
            Capability::Dns01 => "dns-01",
        })
    }
}

/// What the CA expects to find for one authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub domain: String,
    /// HTTP-01 token; other capabilities carry none.
    pub token: Option<String>,
    /// Key authorization (HTTP-01), TXT value (DNS-01) or hex SHA-256 digest
    /// of the key authorization (TLS-ALPN-01).
    pub proof: String,
}

pub trait ChallengeProvider: Send {
    fn capability(&self) -> Capability;
    fn present(&mut self, challenge: &ChallengeResponse) -> anyhow::Result<()>;
    fn cleanup(&mut self, challenge: &ChallengeResponse) -> anyhow::Result<()>;
}

pub type ProviderFactory =
    Box<dyn Fn(&DomainPolicy) -> Result<Box<dyn ChallengeProvider>, ProviderError> + Send + Sync>;

struct Registration {
    capability: Capability,
    factory: ProviderFactory,
}

pub struct ChallengeRegistry {
    entries: BTreeMap<String, Registration>,
}

impl ChallengeRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Every provider shipped with the crate.
    pub fn builtin() -> Self {
        Self::empty()
            .register("http-path", Capability::Http01, Box::new(WebrootProvider::from_policy))
            .register("http-port", Capability::Http01, Box::new(HttpPortProvider::from_policy))
            .register("dns-cloudflare", Capability::Dns01, Box::new(dns::cloudflare_from_policy))
            .register(
                "dns-digitalocean",
                Capability::Dns01,
                Box::new(dns::digitalocean_from_policy),
            )
    }

    pub fn register(mut self, name: &str, capability: Capability, factory: ProviderFactory) -> Self {
        let previous = self.entries.insert(
            name.to_string(),
            Registration {
                capability,
                factory,
            },
        );
        assert!(previous.is_none(), "challenge provider `{name}` registered twice");
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn capability(&self, name: &str) -> Result<Capability, ProviderError> {
        self.entries
            .get(name)
            .map(|entry| entry.capability)
            .ok_or_else(|| ProviderError::Unknown(name.to_string()))
    }

    /// Builds a fresh provider for one obtain/renew attempt.
    pub fn build(
        &self,
        policy: &DomainPolicy,
    ) -> Result<(Capability, Box<dyn ChallengeProvider>), ProviderError> {
        let name = policy.challenge_name.as_str();
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ProviderError::Unknown(name.to_string()))?;
        let provider = (entry.factory)(policy)?;
        assert_eq!(
            provider.capability(),
            entry.capability,
            "challenge provider `{name}` is registered for {} but built a {} provider",
            entry.capability,
            provider.capability()
        );
        debug!(
            "[challenge] built {name} ({}) for {}",
            entry.capability, policy.domain_key
        );
        Ok((entry.capability, provider))
    }
}

impl Default for ChallengeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn required_option<'a>(
    policy: &'a DomainPolicy,
    provider: &str,
    key: &str,
) -> Result<&'a str, ProviderError> {
    policy.option(key).ok_or_else(|| ProviderError::InvalidOptions {
        provider: provider.to_string(),
        reason: format!("option `{key}` is required for {}", policy.domain_key),
    })
}
