use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::debug;

use super::{Capability, ChallengeProvider, ChallengeResponse, required_option};
use crate::{core::types::DomainPolicy, error::ProviderError};

const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Publishes HTTP-01 proofs as files under a web server's document root.
/// The existing server answers for every domain, so the host is not checked.
pub struct WebrootProvider {
    public: PathBuf,
}

impl WebrootProvider {
    pub fn new(public: impl Into<PathBuf>) -> Self {
        Self {
            public: public.into(),
        }
    }

    pub fn from_policy(policy: &DomainPolicy) -> Result<Box<dyn ChallengeProvider>, ProviderError> {
        let public = required_option(policy, "http-path", "public")?;
        Ok(Box::new(Self::new(public)))
    }

    pub fn challenge_path(&self, token: &str) -> Result<PathBuf> {
        if token.is_empty() || token.contains(['/', '\\']) || token.starts_with('.') {
            return Err(anyhow!("refusing unsafe challenge token `{token}`"));
        }
        Ok(self.public.join(CHALLENGE_DIR).join(token))
    }
}

fn token(challenge: &ChallengeResponse) -> Result<&str> {
    challenge
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("HTTP-01 challenge for {} carries no token", challenge.domain))
}

impl ChallengeProvider for WebrootProvider {
    fn capability(&self) -> Capability {
        Capability::Http01
    }

    fn present(&mut self, challenge: &ChallengeResponse) -> Result<()> {
        let path = self.challenge_path(token(challenge)?)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(&path, challenge.proof.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("[webroot] wrote {} for {}", path.display(), challenge.domain);
        Ok(())
    }

    fn cleanup(&mut self, challenge: &ChallengeResponse) -> Result<()> {
        let path = self.challenge_path(token(challenge)?)?;
        remove_if_present(&path)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
