//! Public-resolver lookups used to confirm a challenge TXT record is visible
//! before the CA is asked to validate it.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;

const GOOGLE_DOH: &str = "https://dns.google/resolve";
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    Pending,
    Found,
    NxDomain,
    WrongContent,
    Error,
}

#[derive(Debug, Clone)]
pub struct PropagationResult {
    pub state: PropagationState,
    pub observed_values: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DohAnswer {
    pub data: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DohResponse {
    #[serde(rename = "Status")]
    pub status: u32,
    #[serde(rename = "Answer")]
    pub answer: Option<Vec<DohAnswer>>,
}

pub fn normalize_txt(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

/// Single TXT lookup against Google's JSON resolver.
pub fn lookup_txt(record_name: &str, expected_value: &str) -> Result<PropagationResult> {
    let agent = ureq::AgentBuilder::new().timeout(QUERY_TIMEOUT).build();
    let body = agent
        .get(GOOGLE_DOH)
        .query("name", record_name)
        .query("type", "TXT")
        .set("Accept", "application/dns-json")
        .call()
        .context("DNS-over-HTTPS query failed")?
        .into_string()
        .context("failed to read DNS-over-HTTPS response")?;
    let response: DohResponse =
        serde_json::from_str(&body).context("failed to parse DNS-over-HTTPS response")?;
    debug!(
        "[doh] {record_name}: status={} answers={}",
        response.status,
        response.answer.as_ref().map_or(0, Vec::len)
    );
    Ok(interpret(&response, record_name, expected_value))
}

pub fn interpret(response: &DohResponse, record_name: &str, expected_value: &str) -> PropagationResult {
    let expected = normalize_txt(expected_value);
    let observed_values: Vec<String> = response
        .answer
        .iter()
        .flatten()
        .filter_map(|answer| answer.data.as_deref())
        .map(normalize_txt)
        .collect();

    let state = if observed_values.iter().any(|value| *value == expected) {
        PropagationState::Found
    } else if !observed_values.is_empty() {
        PropagationState::WrongContent
    } else {
        match response.status {
            0 => PropagationState::Pending,
            3 => PropagationState::NxDomain,
            status => {
                warn!("[doh] unexpected resolver status {status} for {record_name}");
                PropagationState::Error
            }
        }
    };

    PropagationResult {
        state,
        observed_values,
    }
}
