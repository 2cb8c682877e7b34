use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{debug, warn};

use super::doh::{self, PropagationResult, PropagationState};

/// Polls public DNS until `expected_value` shows up at `record_name`.
///
/// Pending, NXDOMAIN, a stale value and resolver errors are all retried until
/// `timeout`: a resolver may keep serving the proof of an earlier attempt for
/// its TTL. The last observation is returned either way and the caller decides
/// what a non-`Found` state means.
pub fn poll_dns_propagation(
    record_name: &str,
    expected_value: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<PropagationResult> {
    poll_with(record_name, timeout, interval, || {
        doh::lookup_txt(record_name, expected_value)
    })
}

fn poll_with<F>(
    record_name: &str,
    timeout: Duration,
    interval: Duration,
    mut lookup: F,
) -> Result<PropagationResult>
where
    F: FnMut() -> Result<PropagationResult>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = lookup();
        let expired = started.elapsed() >= timeout;
        match outcome {
            Ok(result) if result.state == PropagationState::Found => {
                debug!(
                    "[dns-retry] {record_name} visible after {}ms (attempt {attempt})",
                    started.elapsed().as_millis()
                );
                return Ok(result);
            }
            Ok(result) if expired => {
                warn!(
                    "[dns-retry] gave up on {record_name} after {attempt} attempts, last state {:?}",
                    result.state
                );
                return Ok(result);
            }
            Err(err) if expired => return Err(err),
            Ok(result) if result.state == PropagationState::WrongContent => debug!(
                "[dns-retry] {record_name} still serves {:?}, retrying in {}s",
                result.observed_values,
                interval.as_secs()
            ),
            Ok(result) => debug!(
                "[dns-retry] {record_name} not visible yet ({:?}), retrying in {}s",
                result.state,
                interval.as_secs()
            ),
            Err(err) => debug!("[dns-retry] lookup of {record_name} failed, retrying: {err}"),
        }
        thread::sleep(interval);
    }
}

/// Retries a provider-side read-back until it reports `true`.
/// `Err` from `verify` stops immediately.
pub fn retry_provider_verification<F>(
    subject: &str,
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut verify: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if verify()? {
            debug!("[provider-retry] {operation} confirmed {subject} on attempt {attempt}");
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(anyhow!(
                "{operation} could not confirm {subject} within {}ms",
                timeout.as_millis()
            ));
        }
        thread::sleep(interval);
    }
}
