use anyhow::{Result, anyhow};

/// Lowercased ASCII form of a domain name; a leading `*.` wildcard label is kept.
pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    if let Some(rest) = trimmed.strip_prefix("*.") {
        return Ok(format!("*.{}", to_ascii(rest)?));
    }
    to_ascii(trimmed)
}

/// Zone-style form used for provider zone matching: no wildcard, no leading dot.
pub fn normalize_domain_suffix(raw: &str) -> Result<String> {
    let stripped = raw
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.');
    if stripped.is_empty() {
        return Ok(String::new());
    }
    to_ascii(stripped)
}

fn to_ascii(name: &str) -> Result<String> {
    let ascii =
        idna::domain_to_ascii(name).map_err(|err| anyhow!("invalid domain name: {err}"))?;
    if ascii.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    Ok(ascii.to_lowercase())
}
