use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::{DnsProviderAdapter, doh::normalize_txt, http, retry_provider_verification};

const API_BASE: &str = "https://api.digitalocean.com/v2";
const RECORD_TTL: u32 = 300;

pub struct DigitalOceanDns {
    api_token: String,
    domain: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    data: &'a str,
    ttl: u32,
}

#[derive(Deserialize)]
struct RecordList {
    domain_records: Vec<Record>,
}

#[derive(Deserialize)]
struct RecordEnvelope {
    domain_record: Record,
}

#[derive(Deserialize)]
struct Record {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: Option<String>,
}

impl DigitalOceanDns {
    pub fn new(api_token: String, domain: String) -> Self {
        Self {
            api_token,
            domain: domain.trim_end_matches('.').to_string(),
        }
    }

    /// DigitalOcean addresses records relative to the managed domain:
    /// `_acme-challenge.example.com` under `example.com` is `_acme-challenge`.
    fn relative_name(&self, record_name: &str) -> String {
        let record_name = record_name.trim_end_matches('.');
        if record_name == self.domain {
            return "@".to_string();
        }
        record_name
            .strip_suffix(&format!(".{}", self.domain))
            .unwrap_or(record_name)
            .to_string()
    }

    fn records_url(&self) -> String {
        format!("{API_BASE}/domains/{}/records", self.domain)
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .with_context(|| format!("DigitalOcean request failed: {what}"))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().ok();
        Err(http::status_error("DigitalOcean", status, body))
    }

    fn list_records(&self, record_name: &str) -> Result<Vec<Record>> {
        let relative = self.relative_name(record_name);
        let client = http::HttpClient::shared();
        // The name filter expects the fully qualified name; filter again locally
        // because older accounts answer with every TXT record in the domain.
        let list: RecordList = self
            .send(
                client
                    .get(self.records_url())
                    .query(&[("type", "TXT"), ("name", record_name), ("per_page", "200")]),
                "list TXT records",
            )?
            .json()
            .context("failed to parse DigitalOcean record list")?;
        Ok(list
            .domain_records
            .into_iter()
            .filter(|record| record.name == relative || record.name == record_name)
            .collect())
    }

    fn create_record(&self, record_name: &str, value: &str) -> Result<u64> {
        let relative = self.relative_name(record_name);
        let client = http::HttpClient::shared();
        let created: RecordEnvelope = self
            .send(
                client.post(self.records_url()).json(&RecordBody {
                    record_type: "TXT",
                    name: &relative,
                    data: value,
                    ttl: RECORD_TTL,
                }),
                "create TXT record",
            )?
            .json()
            .context("failed to parse DigitalOcean record response")?;
        Ok(created.domain_record.id)
    }

    fn fetch_data(&self, record_id: u64) -> Result<Option<String>> {
        let client = http::HttpClient::shared();
        let response = client
            .get(format!("{}/{record_id}", self.records_url()))
            .bearer_auth(&self.api_token)
            .send()
            .context("DigitalOcean request failed: fetch TXT record")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(http::status_error("DigitalOcean", response.status(), None));
        }
        let record: RecordEnvelope = response
            .json()
            .context("failed to parse DigitalOcean record response")?;
        Ok(record.domain_record.data)
    }
}

impl DnsProviderAdapter for DigitalOceanDns {
    fn name(&self) -> &'static str {
        "digitalocean"
    }

    fn create_txt(&mut self, record_name: &str, value: &str) -> Result<()> {
        let value = normalize_txt(value);
        let existing = self.list_records(record_name)?;
        let record_id = match existing
            .iter()
            .find(|record| record.data.as_deref().map(normalize_txt).as_deref() == Some(value.as_str()))
        {
            Some(record) => record.id,
            None => self.create_record(record_name, &value)?,
        };

        retry_provider_verification(
            record_name,
            "DigitalOcean read-back",
            Duration::from_secs(3),
            Duration::from_millis(500),
            || {
                Ok(self
                    .fetch_data(record_id)?
                    .is_some_and(|data| normalize_txt(&data) == value))
            },
        )?;
        debug!("[digitalocean] TXT {record_name} ready (id {record_id})");
        Ok(())
    }

    fn cleanup_txt(&mut self, record_name: &str) -> Result<()> {
        let client = http::HttpClient::shared();
        let records = self.list_records(record_name)?;
        for record in &records {
            let response = client
                .delete(format!("{}/{}", self.records_url(), record.id))
                .bearer_auth(&self.api_token)
                .send()
                .context("DigitalOcean request failed: delete TXT record")?;
            let status = response.status();
            if !status.is_success() && status != StatusCode::NOT_FOUND {
                return Err(http::status_error("DigitalOcean", status, None));
            }
        }
        debug!("[digitalocean] removed {} TXT record(s) at {record_name}", records.len());
        Ok(())
    }
}
