//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Stage A: graceful libvirt guest shutdown with forced fallback."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use upswatch_common::config::VmConfig;

use crate::proc::{self, command_exists};

const LIST_TIMEOUT: Duration = Duration::from_secs(15);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_EVERY: Duration = Duration::from_secs(2);

/// Gracefully stop every running libvirt guest, then destroy whatever is
/// still up once the drain window closes.
pub async fn run(config: &VmConfig, dry_run: bool) {
    if !command_exists("virsh").await {
        info!("virsh not available; skipping VM shutdown");
        return;
    }

    let running = match list_running().await {
        Some(vms) => vms,
        None => {
            warn!("failed to list running VMs");
            return;
        }
    };
    if running.is_empty() {
        info!("no running VMs found");
        return;
    }

    for vm in &running {
        if dry_run {
            info!(vm = %vm, "[DRY-RUN] would request VM shutdown");
            continue;
        }
        info!(vm = %vm, "requesting VM shutdown");
        let outcome = proc::run("virsh", &["shutdown", vm.as_str()], COMMAND_TIMEOUT).await;
        if !outcome.success() {
            warn!(vm = %vm, outcome = %outcome.describe(), "virsh shutdown failed");
        }
    }
    if dry_run {
        return;
    }

    info!(
        max_wait_s = config.max_wait.as_secs(),
        "waiting for VMs to drain"
    );
    let deadline = Instant::now() + config.max_wait;
    let mut remaining = running.clone();
    while Instant::now() < deadline {
        tokio::time::sleep(POLL_EVERY).await;
        let still_running: HashSet<String> = match list_running().await {
            Some(vms) => vms.into_iter().collect(),
            None => continue,
        };
        remaining.retain(|vm| still_running.contains(vm));
        if remaining.is_empty() {
            info!("all VMs stopped gracefully");
            return;
        }
        debug!(waiting_for = %remaining.join(" "), "VMs still draining");
    }

    warn!(
        remaining = remaining.len(),
        "drain window expired; force destroying remaining VMs"
    );
    for vm in &remaining {
        warn!(vm = %vm, "force destroying VM");
        let outcome = proc::run("virsh", &["destroy", vm.as_str()], COMMAND_TIMEOUT).await;
        if !outcome.success() {
            warn!(vm = %vm, outcome = %outcome.describe(), "virsh destroy failed");
        }
    }
}

async fn list_running() -> Option<Vec<String>> {
    let outcome = proc::run(
        "virsh",
        &["list", "--state-running", "--name"],
        LIST_TIMEOUT,
    )
    .await;
    if !outcome.success() {
        return None;
    }
    Some(
        outcome
            .stdout()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}
