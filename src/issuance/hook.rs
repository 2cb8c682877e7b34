use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::{Error, Result};

/// Runs the after-renew command through `sh -c`, waiting for it to finish.
/// Combined output is logged at debug level; a non-zero exit is an error.
pub fn run_after_renew(command: &str) -> Result<()> {
    info!("[hook] running after-renew command");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| Error::Hook {
            command: command.to_string(),
            status: "not started".to_string(),
            output: err.to_string(),
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();
    if !combined.is_empty() {
        debug!("[hook] output:\n{combined}");
    }

    if !output.status.success() {
        return Err(Error::Hook {
            command: command.to_string(),
            status: output.status.to_string(),
            output: combined,
        });
    }
    info!("[hook] after-renew command finished");
    Ok(())
}
