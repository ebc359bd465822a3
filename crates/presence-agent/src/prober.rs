/// Layer-2 sweep of the local subnet.
///
/// One `arp-scan` invocation covers the whole CIDR in a single shot --
/// devices are never polled in series. The caller supplies the set of
/// MACs it cares about, so the result is bounded by the roster. Every
/// failure mode (missing tool, non-zero exit, timeout) collapses to the
/// empty set: indistinguishable from "everyone is offline this tick",
/// which the scan loop's debounce absorbs.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use presence_core::mac;
use presence_core::PROBE_TIMEOUT_SECONDS;

pub async fn sweep(interface: &str, subnet: &str, wanted: &HashSet<String>) -> HashSet<String> {
    let mut command = Command::new("arp-scan");
    command
        .arg("--interface")
        .arg(interface)
        .arg("--retry")
        .arg("4")
        .arg("--timeout")
        .arg("500")
        .arg(subnet)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let timeout = Duration::from_secs(PROBE_TIMEOUT_SECONDS);
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to run arp-scan");
            return HashSet::new();
        }
        Err(_) => {
            warn!(timeout_secs = PROBE_TIMEOUT_SECONDS, "arp-scan timed out, killing it");
            return HashSet::new();
        }
    };

    if !output.status.success() {
        warn!(
            code = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "arp-scan exited with an error"
        );
        return HashSet::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let found = mac::extract_macs(&stdout, wanted);
    debug!(online = found.len(), probed = wanted.len(), "Sweep finished");
    found
}
