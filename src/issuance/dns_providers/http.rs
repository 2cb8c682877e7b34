use std::sync::OnceLock;
use std::time::Duration;

use anyhow::anyhow;
use log::warn;
use reqwest::StatusCode;
use reqwest::blocking::Client;

/// Matches the static request timeout the ACME side runs with.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpClient;

impl HttpClient {
    pub fn shared() -> &'static Client {
        static CLIENT: OnceLock<Client> = OnceLock::new();
        CLIENT.get_or_init(|| {
            Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(concat!("acme-lego/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|err| {
                    warn!("[dns-http] failed to build shared client: {err}");
                    Client::new()
                })
        })
    }
}

pub fn status_error(provider: &str, status: StatusCode, body: Option<String>) -> anyhow::Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            anyhow!("{provider} rejected the API token ({status})")
        }
        StatusCode::TOO_MANY_REQUESTS => anyhow!("{provider} rate limit exceeded"),
        _ => match body.filter(|body| !body.trim().is_empty()) {
            Some(body) => anyhow!("{provider} API error ({status}): {body}"),
            None => anyhow!("{provider} API error: {status}"),
        },
    }
}
