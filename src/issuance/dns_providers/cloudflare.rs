use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DnsProviderAdapter, http, matches_zone, retry_provider_verification};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 120;
const RECORD_EXISTS: u32 = 81058;

pub struct CloudflareDns {
    api_token: String,
    zone: String,
    zone_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct ApiMessage {
    code: u32,
    message: String,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TxtRecord {
    id: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct NewTxtRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
}

impl<T> Envelope<T> {
    fn has_error(&self, code: u32) -> bool {
        self.errors.iter().any(|err| err.code == code)
    }

    fn describe_errors(&self) -> String {
        if self.errors.is_empty() {
            return "unknown error".to_string();
        }
        self.errors
            .iter()
            .map(|err| format!("{}: {}", err.code, err.message))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn into_result(self) -> Result<T> {
        if !self.success {
            return Err(anyhow!("Cloudflare API error: {}", self.describe_errors()));
        }
        self.result
            .ok_or_else(|| anyhow!("Cloudflare API response carried no result"))
    }
}

impl CloudflareDns {
    pub fn new(api_token: String, zone: String) -> Self {
        Self {
            api_token,
            zone,
            zone_id: None,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<Envelope<T>> {
        let response = self
            .authorized(request)
            .send()
            .with_context(|| format!("Cloudflare request failed: {what}"))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(http::status_error("Cloudflare", status, Some(body))),
            Err(err) => Err(anyhow!("failed to parse Cloudflare response to {what}: {err}")),
        }
    }

    fn zone_id(&mut self) -> Result<String> {
        if let Some(zone_id) = &self.zone_id {
            return Ok(zone_id.clone());
        }
        let client = http::HttpClient::shared();
        let zones: Vec<Zone> = self
            .send(
                client.get(format!("{API_BASE}/zones")).query(&[("per_page", "50")]),
                "list zones",
            )?
            .into_result()?;

        // Longest matching zone wins so delegated subzones are preferred.
        let zone = zones
            .into_iter()
            .filter(|zone| matches_zone(&self.zone, &zone.name))
            .max_by_key(|zone| zone.name.len())
            .ok_or_else(|| anyhow!("no Cloudflare zone visible to this token matches {}", self.zone))?;
        debug!("[cloudflare] using zone {} ({})", zone.name, zone.id);
        self.zone_id = Some(zone.id.clone());
        Ok(zone.id)
    }

    fn list_records(&self, zone_id: &str, record_name: &str) -> Result<Vec<TxtRecord>> {
        let client = http::HttpClient::shared();
        self.send(
            client
                .get(format!("{API_BASE}/zones/{zone_id}/dns_records"))
                .query(&[("type", "TXT"), ("name", record_name)]),
            "list TXT records",
        )?
        .into_result()
    }

    fn upsert_record(&mut self, record_name: &str, value: &str) -> Result<String> {
        let zone_id = self.zone_id()?;
        let content = quoted(value);

        let existing = self.list_records(&zone_id, record_name)?;
        if let Some(record) = existing
            .iter()
            .find(|record| record.content.as_deref() == Some(content.as_str()))
        {
            debug!("[cloudflare] {record_name} already carries the challenge value");
            return Ok(record.id.clone());
        }

        let client = http::HttpClient::shared();
        let body = NewTxtRecord {
            record_type: "TXT",
            name: record_name,
            content: content.clone(),
            ttl: RECORD_TTL,
        };
        let envelope: Envelope<TxtRecord> = self.send(
            client
                .post(format!("{API_BASE}/zones/{zone_id}/dns_records"))
                .json(&body),
            "create TXT record",
        )?;
        if envelope.has_error(RECORD_EXISTS) {
            debug!("[cloudflare] {record_name} exists, updating in place");
            return self.update_records(&zone_id, record_name, &content);
        }
        let record = envelope.into_result()?;
        self.verify_content(&zone_id, &record.id, &content)?;
        Ok(record.id)
    }

    fn update_records(&self, zone_id: &str, record_name: &str, content: &str) -> Result<String> {
        let records = self.list_records(zone_id, record_name)?;
        let first = records
            .first()
            .map(|record| record.id.clone())
            .ok_or_else(|| anyhow!("Cloudflare reported a conflict but {record_name} has no TXT records"))?;

        let client = http::HttpClient::shared();
        for record in &records {
            let body = NewTxtRecord {
                record_type: "TXT",
                name: record_name,
                content: content.to_string(),
                ttl: RECORD_TTL,
            };
            let _: TxtRecord = self
                .send(
                    client
                        .put(format!("{API_BASE}/zones/{zone_id}/dns_records/{}", record.id))
                        .json(&body),
                    "update TXT record",
                )?
                .into_result()?;
        }
        self.verify_content(zone_id, &first, content)?;
        Ok(first)
    }

    fn verify_content(&self, zone_id: &str, record_id: &str, expected: &str) -> Result<()> {
        let client = http::HttpClient::shared();
        retry_provider_verification(
            record_id,
            "Cloudflare read-back",
            Duration::from_secs(2),
            Duration::from_millis(300),
            || {
                let envelope: Envelope<TxtRecord> = self.send(
                    client.get(format!("{API_BASE}/zones/{zone_id}/dns_records/{record_id}")),
                    "fetch TXT record",
                )?;
                Ok(envelope
                    .result
                    .and_then(|record| record.content)
                    .is_some_and(|content| content == expected))
            },
        )
    }

    fn delete_records(&mut self, record_name: &str) -> Result<usize> {
        let zone_id = self.zone_id()?;
        let records = self.list_records(&zone_id, record_name)?;
        let client = http::HttpClient::shared();

        let mut failures = Vec::new();
        for record in &records {
            let response = self
                .authorized(client.delete(format!("{API_BASE}/zones/{zone_id}/dns_records/{}", record.id)))
                .send();
            match response {
                Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {}
                Ok(resp) => failures.push(format!("{}: {}", record.id, resp.status())),
                Err(err) => failures.push(format!("{}: {err}", record.id)),
            }
        }
        if !failures.is_empty() {
            return Err(anyhow!(
                "failed to delete {} Cloudflare record(s): {}",
                failures.len(),
                failures.join(", ")
            ));
        }
        Ok(records.len())
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.trim().trim_matches('"'))
}

impl DnsProviderAdapter for CloudflareDns {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn create_txt(&mut self, record_name: &str, value: &str) -> Result<()> {
        let id = self.upsert_record(record_name, value)?;
        debug!("[cloudflare] TXT {record_name} ready (id {id})");
        Ok(())
    }

    fn cleanup_txt(&mut self, record_name: &str) -> Result<()> {
        let removed = self.delete_records(record_name)?;
        debug!("[cloudflare] removed {removed} TXT record(s) at {record_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_quoted_once() {
        assert_eq!(quoted("abc"), "\"abc\"");
        assert_eq!(quoted(" \"abc\" "), "\"abc\"");
    }

    #[test]
    fn conflict_code_is_detected() {
        let envelope: Envelope<TxtRecord> = serde_json::from_str(
            r#"{"success":false,"errors":[{"code":81058,"message":"An identical record already exists."}],"result":null}"#,
        )
        .unwrap();
        assert!(envelope.has_error(RECORD_EXISTS));
        let err = envelope.into_result().unwrap_err();
        assert!(err.to_string().contains("81058"));
    }

    #[test]
    fn successful_envelope_yields_result() {
        let envelope: Envelope<Vec<Zone>> = serde_json::from_str(
            r#"{"success":true,"errors":[],"result":[{"id":"z1","name":"example.com"}]}"#,
        )
        .unwrap();
        let zones = envelope.into_result().unwrap();
        assert_eq!(zones[0].id, "z1");
        assert_eq!(zones[0].name, "example.com");
    }
}
