//! Obtain and renew, driven one (domain, key type) pair at a time.
//!
//! Both commands are strict: the first failing pair aborts the command.
//! The only non-error early exit is a renewal that is not due yet, which is
//! reported as a skip.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{info, warn};

use super::{
    acme::{AcmeClient, ObtainRequest},
    challenge::ChallengeRegistry,
    hook,
    keys::{check_private_key, generate_private_key},
};
use crate::{
    config::{ResolvedConfig, fallback_webroot_policy},
    core::types::{DomainPolicy, KeyType},
    error::{Error, Result, ResultExt},
    storage::certificates::{ArtifactPaths, CertificateStore},
};

/// A certificate written to the store by this run.
#[derive(Debug, Clone)]
pub struct Issued {
    pub domain: String,
    pub key_type: KeyType,
    pub not_after: DateTime<Utc>,
    pub paths: ArtifactPaths,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub domain: String,
    pub key_type: KeyType,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RenewOutcome {
    Renewed(Issued),
    NotDue { not_after: DateTime<Utc> },
}

#[derive(Debug, Default)]
pub struct ObtainReport {
    pub issued: Vec<Issued>,
}

#[derive(Debug, Default)]
pub struct RenewReport {
    pub renewed: Vec<Issued>,
    pub skipped: Vec<Skipped>,
    pub hook_ran: bool,
}

pub struct Lifecycle<'a> {
    config: &'a ResolvedConfig,
    registry: &'a ChallengeRegistry,
    client: &'a mut dyn AcmeClient,
    store: CertificateStore,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        config: &'a ResolvedConfig,
        registry: &'a ChallengeRegistry,
        client: &'a mut dyn AcmeClient,
    ) -> Self {
        Self {
            store: CertificateStore::new(&config.global.root_storage_dir),
            config,
            registry,
            client,
        }
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Issues fresh certificates for `domain`, or for every configured domain.
    ///
    /// A named domain outside the configuration is served by a one-off
    /// http-path policy rooted at `fallback_webroot`, which is then required.
    pub fn obtain(
        &mut self,
        domain: Option<&str>,
        fallback_webroot: Option<&Path>,
    ) -> Result<ObtainReport> {
        let policies = match domain {
            Some(domain) => match (self.config.domain(domain)?, fallback_webroot) {
                (Some(policy), _) => vec![policy.clone()],
                (None, Some(webroot)) => {
                    info!("[obtain] {domain} is not configured, using webroot {}", webroot.display());
                    vec![fallback_webroot_policy(domain, webroot)?]
                }
                (None, None) => return Err(Error::RequiredParam("http-path")),
            },
            None => self.all_policies(),
        };
        self.check_providers(&policies)?;

        let mut report = ObtainReport::default();
        for policy in &policies {
            for &key_type in &policy.key_types {
                let issued = self
                    .obtain_one(policy, key_type)
                    .context(|| format!("obtain {} ({key_type})", policy.domain_key))?;
                report.issued.push(issued);
            }
        }
        info!("[obtain] issued {} certificate(s)", report.issued.len());
        Ok(report)
    }

    /// Renews certificates that fall inside the expiry window, then runs the
    /// after-renew command once if anything was renewed.
    pub fn renew(&mut self, domain: Option<&str>) -> Result<RenewReport> {
        let policies = match domain {
            Some(domain) => match self.config.domain(domain)? {
                Some(policy) => vec![policy.clone()],
                None => return Err(Error::UnknownDomain(domain.to_string())),
            },
            None => self.all_policies(),
        };
        self.check_providers(&policies)?;

        let mut report = RenewReport::default();
        for policy in &policies {
            for &key_type in &policy.key_types {
                let outcome = self
                    .renew_one(policy, key_type)
                    .context(|| format!("renew {} ({key_type})", policy.domain_key))?;
                match outcome {
                    RenewOutcome::Renewed(issued) => report.renewed.push(issued),
                    RenewOutcome::NotDue { not_after } => report.skipped.push(Skipped {
                        domain: policy.domain_key.clone(),
                        key_type,
                        not_after,
                    }),
                }
            }
        }
        info!(
            "[renew] renewed {} certificate(s), {} not due",
            report.renewed.len(),
            report.skipped.len()
        );

        if !report.renewed.is_empty() {
            if let Some(command) = self.config.global.after_renew_command.as_deref() {
                hook::run_after_renew(command)?;
                report.hook_ran = true;
            }
        }
        Ok(report)
    }

    fn all_policies(&self) -> Vec<DomainPolicy> {
        if self.config.domains.is_empty() {
            warn!("[lifecycle] no domains configured");
        }
        self.config.domains.values().cloned().collect()
    }

    /// Unknown challenge names fail here, before any CA traffic.
    fn check_providers(&self, policies: &[DomainPolicy]) -> Result<()> {
        for policy in policies {
            self.registry
                .capability(&policy.challenge_name)
                .context(|| format!("domain {}", policy.domain_key))?;
        }
        Ok(())
    }

    fn obtain_one(&mut self, policy: &DomainPolicy, key_type: KeyType) -> Result<Issued> {
        self.install_provider(policy)?;
        let private_key_pem = generate_private_key(key_type)?;
        self.issue(policy, key_type, &private_key_pem)
    }

    fn renew_one(&mut self, policy: &DomainPolicy, key_type: KeyType) -> Result<RenewOutcome> {
        let domain = policy.domain_key.as_str();
        let current = self.store.inspect(domain, key_type)?;
        let deadline = Utc::now() + self.config.global.expiry_threshold;
        if current.not_after > deadline {
            info!(
                "[renew] {domain} ({key_type}) not due, valid until {}",
                current.not_after
            );
            return Ok(RenewOutcome::NotDue {
                not_after: current.not_after,
            });
        }

        info!("[renew] {domain} ({key_type}) expires {}, renewing", current.not_after);
        let private_key_pem = self.store.load_private_key(domain, key_type)?;
        check_private_key(
            &private_key_pem,
            key_type,
            &self.store.paths(domain, key_type).private_key,
        )?;
        self.install_provider(policy)?;
        self.issue(policy, key_type, &private_key_pem)
            .map(RenewOutcome::Renewed)
    }

    fn install_provider(&mut self, policy: &DomainPolicy) -> Result<()> {
        let (capability, provider) = self
            .registry
            .build(policy)
            .context(|| format!("setup challenge {}", policy.challenge_name))?;
        self.client.set_challenge_provider(capability, provider);
        Ok(())
    }

    fn issue(&mut self, policy: &DomainPolicy, key_type: KeyType, private_key_pem: &str) -> Result<Issued> {
        let request = ObtainRequest {
            domains: &policy.san_list,
            key_type,
            private_key_pem,
            bundle: true,
            must_staple: true,
        };
        let artifact = self.client.obtain_certificate(&request)?;

        let domain = policy.domain_key.as_str();
        self.store.ensure_domain_dir(domain)?;
        let paths = self.store.save(domain, key_type, &artifact)?;
        Ok(Issued {
            domain: domain.to_string(),
            key_type,
            not_after: artifact.metadata.not_after,
            paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{parse, resolve},
        core::types::CertificateArtifact,
        error::{AcmeError, ConfigError, ProviderError},
        issuance::challenge::{Capability, ChallengeProvider},
    };
    use serde_json::Value;

    /// Fails every call; the tests below must never reach the CA.
    #[derive(Default)]
    struct Unreachable {
        installs: usize,
    }

    impl AcmeClient for Unreachable {
        fn register(&mut self) -> Result<Value> {
            Err(AcmeError::Registration("unreachable".into()).into())
        }
        fn set_challenge_provider(&mut self, _: Capability, _: Box<dyn ChallengeProvider>) {
            self.installs += 1;
        }
        fn obtain_certificate(&mut self, _: &ObtainRequest<'_>) -> Result<CertificateArtifact> {
            Err(AcmeError::Order("unreachable".into()).into())
        }
    }

    fn config(body: &str) -> ResolvedConfig {
        let root = std::env::temp_dir().join(format!("acme-lego-flow-{}", uuid::Uuid::new_v4()));
        let path = root.join("config.toml");
        resolve(parse(body, &path).unwrap(), &path).unwrap()
    }

    #[test]
    fn unknown_provider_fails_before_any_install() {
        let config = config(
            r#"
            email = "ops@example.com"
            [domain-group."a.example"]
            challenge = "http-path"
            options = { public = "/srv/www" }
            [domain-group."b.example"]
            challenge = "dns-nowhere"
            "#,
        );
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let err = Lifecycle::new(&config, &registry, &mut client)
            .obtain(None, None)
            .unwrap_err();

        assert!(matches!(err.origin(), Error::Provider(ProviderError::Unknown(name)) if name == "dns-nowhere"));
        assert_eq!(client.installs, 0);
    }

    #[test]
    fn unconfigured_domain_needs_fallback_webroot() {
        let config = config("email = \"ops@example.com\"\n");
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let mut lifecycle = Lifecycle::new(&config, &registry, &mut client);

        assert!(matches!(
            lifecycle.obtain(Some("adhoc.example"), None).unwrap_err(),
            Error::RequiredParam("http-path")
        ));

        let err = lifecycle
            .obtain(Some("adhoc.example"), Some(Path::new("/srv/www")))
            .unwrap_err();
        assert!(err.report().contains("obtain adhoc.example (rsa-2048)"));
        assert!(matches!(err.origin(), Error::Acme(AcmeError::Order(_))));
        assert_eq!(client.installs, 1);
    }

    #[test]
    fn renew_rejects_unconfigured_domain() {
        let config = config("email = \"ops@example.com\"\n");
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let err = Lifecycle::new(&config, &registry, &mut client)
            .renew(Some("ghost.example"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDomain(domain) if domain == "ghost.example"));
    }

    #[test]
    fn named_domain_matches_its_group_in_any_spelling() {
        let config = config(
            r#"
            email = "ops@example.com"
            [domain-group."testé.fr"]
            options = { public = "/srv/www" }
            "#,
        );
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let mut lifecycle = Lifecycle::new(&config, &registry, &mut client);

        // Found without a fallback webroot, so the configured group is used.
        let err = lifecycle.obtain(Some("TESTÉ.fr."), None).unwrap_err();
        assert!(err.report().contains("obtain xn--test-epa.fr (rsa-2048)"));
        assert!(matches!(err.origin(), Error::Acme(AcmeError::Order(_))));

        let err = lifecycle.renew(Some("testé.fr")).unwrap_err();
        assert!(err.report().contains("renew xn--test-epa.fr (rsa-2048)"));
        assert!(matches!(
            err.origin(),
            Error::Storage(crate::error::StorageError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_domain_argument_is_a_config_error() {
        let config = config("email = \"ops@example.com\"\n");
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let mut lifecycle = Lifecycle::new(&config, &registry, &mut client);

        for err in [
            lifecycle.obtain(Some("bad/example"), Some(Path::new("/srv/www"))).unwrap_err(),
            lifecycle.renew(Some("bad/example")).unwrap_err(),
        ] {
            assert!(matches!(err, Error::Config(ConfigError::InvalidName { .. })));
        }
        assert_eq!(client.installs, 0);
    }

    #[test]
    fn renew_without_stored_certificate_is_not_found() {
        let config = config(
            r#"
            email = "ops@example.com"
            [domain-group."a.example"]
            options = { public = "/srv/www" }
            "#,
        );
        let registry = ChallengeRegistry::builtin();
        let mut client = Unreachable::default();
        let err = Lifecycle::new(&config, &registry, &mut client)
            .renew(None)
            .unwrap_err();
        assert!(matches!(
            err.origin(),
            Error::Storage(crate::error::StorageError::NotFound(_))
        ));
        assert_eq!(client.installs, 0);
    }
}
