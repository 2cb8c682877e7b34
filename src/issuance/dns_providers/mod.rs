use anyhow::Result;

use crate::domain::normalize_domain_suffix;

mod cloudflare;
mod digitalocean;
pub mod doh;
pub(crate) mod http;
mod retry;

pub use cloudflare::CloudflareDns;
pub use digitalocean::DigitalOceanDns;
pub use doh::{PropagationResult, PropagationState};
pub use retry::{poll_dns_propagation, retry_provider_verification};

/// TXT record management against one DNS hosting API.
pub trait DnsProviderAdapter: Send {
    fn name(&self) -> &'static str;
    fn create_txt(&mut self, record_name: &str, value: &str) -> Result<()>;
    fn cleanup_txt(&mut self, record_name: &str) -> Result<()>;
}

/// `_acme-challenge.<domain>`; a wildcard shares the record of its base name.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim().trim_start_matches("*.").trim_end_matches('.');
    if trimmed.starts_with("_acme-challenge.") {
        trimmed.to_string()
    } else {
        format!("_acme-challenge.{trimmed}")
    }
}

pub(crate) fn matches_zone(domain_suffix: &str, zone_name: &str) -> bool {
    let (Ok(domain_suffix), Ok(zone_name)) = (
        normalize_domain_suffix(domain_suffix),
        normalize_domain_suffix(zone_name),
    ) else {
        return false;
    };
    if zone_name.is_empty() {
        return false;
    }
    zone_name == domain_suffix || domain_suffix.ends_with(&format!(".{zone_name}"))
}

#[cfg(test)]
mod tests {
    use super::{matches_zone, record_name};

    #[test]
    fn matches_exact_and_parent_zones() {
        assert!(matches_zone("example.com", "example.com"));
        assert!(matches_zone("*.sub.example.com", "example.com"));
        assert!(!matches_zone("example.com", "sub.example.com"));
        assert!(!matches_zone("badexample.com", "example.com"));
        assert!(!matches_zone("example.com", ""));
    }

    #[test]
    fn matches_idn_zones() {
        assert!(matches_zone("testé.fr", "xn--test-epa.fr"));
        assert!(matches_zone("www.xn--test-epa.fr", "testé.fr"));
    }

    #[test]
    fn record_names_drop_wildcards() {
        assert_eq!(record_name("example.com"), "_acme-challenge.example.com");
        assert_eq!(record_name("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(
            record_name("_acme-challenge.example.com."),
            "_acme-challenge.example.com"
        );
    }
}
