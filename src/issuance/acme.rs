//! The boundary to the ACME protocol.
//!
//! [`AcmeClient`] is what the lifecycle code drives; [`LegoClient`] implements
//! it on top of `acme-lib`, which owns directory discovery, nonces, JWS
//! signing and the order/authorization/finalize exchanges.

use acme_lib::{
    Account as LibAccount, Directory, DirectoryUrl,
    order::{Auth, NewOrder},
};
use anyhow::anyhow;
use chrono::Utc;
use log::{debug, info, warn};
use pem::Pem;
use serde_json::Value;

use super::{
    challenge::{Capability, ChallengeProvider, ChallengeResponse},
    persist::AccountPersist,
};
use crate::{
    core::{
        types::{CertificateArtifact, CertificateMetadata, GlobalPolicy, KeyType},
        x509::inspect_leaf,
    },
    error::{AcmeError, Error, ProviderError, Result},
    storage::account::Account,
};

const VALIDATE_DELAY_MS: u64 = 5000;
const FINALIZE_DELAY_MS: u64 = 5000;
const MAX_ORDER_ROUNDS: usize = 10;

/// One certificate request for a (SAN list, key type) pair.
#[derive(Debug, Clone)]
pub struct ObtainRequest<'a> {
    pub domains: &'a [String],
    pub key_type: KeyType,
    pub private_key_pem: &'a str,
    /// Write leaf and issuers together as the certificate file.
    pub bundle: bool,
    pub must_staple: bool,
}

pub trait AcmeClient {
    /// Registers (or looks up) the account and returns the registration resource.
    fn register(&mut self) -> Result<Value>;

    /// Installs `provider` in the slot for `capability`. The most recent
    /// installation decides how the next order is solved.
    fn set_challenge_provider(&mut self, capability: Capability, provider: Box<dyn ChallengeProvider>);

    fn obtain_certificate(&mut self, request: &ObtainRequest<'_>) -> Result<CertificateArtifact>;
}

/// Connection settings resolved from the global policy.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub directory_url: String,
    pub user_agent: String,
    pub http_timeout: std::time::Duration,
}

impl From<&GlobalPolicy> for ClientSettings {
    fn from(global: &GlobalPolicy) -> Self {
        Self {
            directory_url: global.acme_directory_url.clone(),
            user_agent: global.user_agent.clone(),
            http_timeout: global.http_timeout,
        }
    }
}

#[derive(Default)]
struct ProviderSlots {
    http01: Option<Box<dyn ChallengeProvider>>,
    tls_alpn01: Option<Box<dyn ChallengeProvider>>,
    dns01: Option<Box<dyn ChallengeProvider>>,
    active: Option<Capability>,
}

impl ProviderSlots {
    fn slot(&mut self, capability: Capability) -> &mut Option<Box<dyn ChallengeProvider>> {
        match capability {
            Capability::Http01 => &mut self.http01,
            Capability::TlsAlpn01 => &mut self.tls_alpn01,
            Capability::Dns01 => &mut self.dns01,
        }
    }

    fn install(&mut self, capability: Capability, provider: Box<dyn ChallengeProvider>) {
        assert_eq!(
            provider.capability(),
            capability,
            "a {} provider cannot be installed in the {capability} slot",
            provider.capability()
        );
        *self.slot(capability) = Some(provider);
        self.active = Some(capability);
    }

    fn active(&mut self) -> Option<(Capability, &mut Box<dyn ChallengeProvider>)> {
        let capability = self.active?;
        self.slot(capability).as_mut().map(|provider| (capability, provider))
    }
}

/// Production client over `acme-lib`. Nothing touches the network until the
/// first [`AcmeClient::register`] or [`AcmeClient::obtain_certificate`].
pub struct LegoClient {
    settings: ClientSettings,
    email: String,
    persist: AccountPersist,
    directory: Option<Directory<AccountPersist>>,
    providers: ProviderSlots,
}

impl LegoClient {
    pub fn new(account: &Account, settings: ClientSettings) -> Result<Self> {
        if settings.directory_url.trim().is_empty() {
            return Err(AcmeError::Directory {
                url: settings.directory_url,
                reason: "directory URL is empty".to_string(),
            }
            .into());
        }
        let persist = AccountPersist::seeded(account.email(), account.private_key_pem()).map_err(
            |err| AcmeError::Registration(format!("failed to load account key: {err}")),
        )?;
        // acme-lib builds its own agent; the timeout and user agent are informational.
        debug!(
            "[acme] client for {} at {} (user agent {}, timeout {}s)",
            account.email(),
            settings.directory_url,
            settings.user_agent,
            settings.http_timeout.as_secs()
        );
        Ok(Self {
            settings,
            email: account.email().to_string(),
            persist,
            directory: None,
            providers: ProviderSlots::default(),
        })
    }

    fn directory(&mut self) -> Result<&Directory<AccountPersist>> {
        if self.directory.is_none() {
            let url = self.settings.directory_url.as_str();
            let directory = Directory::from_url(self.persist.clone(), DirectoryUrl::Other(url))
                .map_err(|err| AcmeError::Directory {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            info!("[acme] using directory {url}");
            self.directory = Some(directory);
        }
        self.directory
            .as_ref()
            .ok_or_else(|| AcmeError::Directory {
                url: self.settings.directory_url.clone(),
                reason: "directory unavailable".to_string(),
            }.into())
    }

    fn account(&mut self) -> Result<LibAccount<AccountPersist>> {
        let email = self.email.clone();
        let directory = self.directory()?;
        directory
            .account_with_realm(&email, Some(vec![format!("mailto:{email}")]))
            .map_err(|err| AcmeError::Registration(err.to_string()).into())
    }

    fn solve(&mut self, auth: &Auth<AccountPersist>) -> Result<()> {
        let domain = auth.domain_name().to_string();
        let Some((capability, provider)) = self.providers.active() else {
            return Err(AcmeError::NoProvider(domain).into());
        };
        debug!("[acme] solving {capability} for {domain}");

        match capability {
            Capability::Http01 => {
                let challenge = auth.http_challenge();
                let response = ChallengeResponse {
                    domain,
                    token: Some(challenge.http_token().to_string()),
                    proof: challenge.http_proof(),
                };
                run_challenge(&mut **provider, &response, || challenge.validate(VALIDATE_DELAY_MS))
            }
            Capability::Dns01 => {
                let challenge = auth.dns_challenge();
                let response = ChallengeResponse {
                    domain,
                    token: None,
                    proof: challenge.dns_proof(),
                };
                run_challenge(&mut **provider, &response, || challenge.validate(VALIDATE_DELAY_MS))
            }
            Capability::TlsAlpn01 => {
                let challenge = auth.tls_alpn_challenge();
                let response = ChallengeResponse {
                    domain,
                    token: None,
                    proof: hex::encode(challenge.tls_alpn_proof()),
                };
                run_challenge(&mut **provider, &response, || challenge.validate(VALIDATE_DELAY_MS))
            }
        }
    }

    fn authorize(&mut self, order: &mut NewOrder<AccountPersist>) -> Result<()> {
        for round in 1..=MAX_ORDER_ROUNDS {
            if order.confirm_validations().is_some() {
                return Ok(());
            }
            let auths = order
                .authorizations()
                .map_err(|err| AcmeError::Order(err.to_string()))?;
            for auth in auths.iter().filter(|auth| auth.need_challenge()) {
                self.solve(auth)?;
            }
            debug!("[acme] refreshing order after round {round}");
            order
                .refresh()
                .map_err(|err| AcmeError::Order(err.to_string()))?;
        }
        Err(AcmeError::Order(format!(
            "authorizations still pending after {MAX_ORDER_ROUNDS} rounds"
        ))
        .into())
    }
}

/// present, validate, then clean up on every path.
fn run_challenge<F>(
    provider: &mut dyn ChallengeProvider,
    response: &ChallengeResponse,
    validate: F,
) -> Result<()>
where
    F: FnOnce() -> acme_lib::Result<()>,
{
    let presented = provider.present(response);
    let validated = match presented {
        Ok(()) => validate().map_err(|err| anyhow!(err.to_string())),
        Err(err) => Err(err),
    };
    let cleaned = provider.cleanup(response);

    if let Err(err) = validated {
        if let Err(cleanup_err) = cleaned {
            warn!("[acme] cleanup for {} failed: {cleanup_err}", response.domain);
        }
        return Err(challenge_error(&response.domain, err));
    }
    if let Err(err) = cleaned {
        warn!("[acme] cleanup for {} failed: {err}", response.domain);
    }
    Ok(())
}

fn challenge_error(domain: &str, err: anyhow::Error) -> Error {
    match err.downcast::<ProviderError>() {
        Ok(provider_err) => provider_err.into(),
        Err(err) => AcmeError::Challenge {
            domain: domain.to_string(),
            source: err,
        }
        .into(),
    }
}

/// Splits a downloaded chain into (leaf, issuers).
pub fn split_chain(chain_pem: &str) -> anyhow::Result<(String, Option<String>)> {
    let blocks: Vec<Pem> = pem::parse_many(chain_pem)
        .map_err(|err| anyhow!("failed to parse certificate chain: {err}"))?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .collect();
    let Some((leaf, issuers)) = blocks.split_first() else {
        return Err(anyhow!("certificate chain contains no certificates"));
    };
    let issuers = (!issuers.is_empty()).then(|| issuers.iter().map(pem::encode).collect::<String>());
    Ok((pem::encode(leaf), issuers))
}

/// Assembles the stored artifact from a downloaded chain.
pub fn build_artifact(
    chain_pem: &str,
    private_key_pem: Option<&str>,
    request: &ObtainRequest<'_>,
) -> anyhow::Result<CertificateArtifact> {
    let (leaf, issuers) = split_chain(chain_pem)?;
    let info = inspect_leaf(leaf.as_bytes())?;
    let certificate_pem = match (&issuers, request.bundle) {
        (Some(issuers), true) => format!("{leaf}{issuers}"),
        _ => leaf,
    };
    let primary = request
        .domains
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("certificate request has no domains"))?;

    Ok(CertificateArtifact {
        certificate_pem: certificate_pem.into_bytes(),
        issuer_pem: issuers.map(String::into_bytes),
        private_key_pem: private_key_pem.map(|pem| pem.as_bytes().to_vec()),
        metadata: CertificateMetadata {
            domain: primary,
            domains: request.domains.to_vec(),
            key_type: request.key_type,
            serial: info.serial,
            not_before: info.not_before,
            not_after: info.not_after,
            fingerprint_sha256: info.fingerprint_sha256,
            issued_at: Utc::now(),
            must_staple: request.must_staple,
        },
    })
}

impl AcmeClient for LegoClient {
    fn register(&mut self) -> Result<Value> {
        let account = self.account()?;
        let registration = serde_json::to_value(account.api_account())
            .map_err(|err| AcmeError::Registration(format!("unreadable account resource: {err}")))?;
        info!("[acme] account for {} is registered", self.email);
        Ok(registration)
    }

    fn set_challenge_provider(&mut self, capability: Capability, provider: Box<dyn ChallengeProvider>) {
        self.providers.install(capability, provider);
    }

    fn obtain_certificate(&mut self, request: &ObtainRequest<'_>) -> Result<CertificateArtifact> {
        let Some((primary, alt_names)) = request.domains.split_first() else {
            return Err(AcmeError::Order("no domains requested".to_string()).into());
        };
        if request.must_staple {
            // acme-lib builds the CSR itself and has no hook for extensions.
            debug!("[acme] must-staple requested for {primary}; the CSR is sent without the extension");
        }

        let account = self.account()?;
        let alt_names: Vec<&str> = alt_names.iter().map(String::as_str).collect();
        let mut order = account
            .new_order(primary, &alt_names)
            .map_err(|err| AcmeError::Order(err.to_string()))?;
        info!(
            "[acme] ordering {primary} ({}) with {} alternative name(s)",
            request.key_type,
            alt_names.len()
        );

        self.authorize(&mut order)?;
        let csr = order
            .confirm_validations()
            .ok_or_else(|| AcmeError::Order("order not ready after validation".to_string()))?;
        let certificate = csr
            .finalize(request.private_key_pem, FINALIZE_DELAY_MS)
            .map_err(|err| AcmeError::Finalize(err.to_string()))?
            .download_and_save_cert()
            .map_err(|err| AcmeError::Download(err.to_string()))?;

        build_artifact(certificate.certificate(), Some(certificate.private_key()), request)
            .map_err(|err| AcmeError::Download(err.to_string()).into())
    }
}
