//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Stage C: filesystem sync and bounded unmounts."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::time::Duration;

use tracing::{info, warn};

use upswatch_common::config::FilesystemsConfig;

use crate::proc::{self, CommandOutcome};

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const MOUNTPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sync, settle, then unmount the configured mounts in order. Timeouts and
/// failures are logged and never abort the stage.
pub async fn run(config: &FilesystemsConfig, dry_run: bool) {
    if config.sync_enabled {
        sync_once(dry_run).await;
        if !dry_run && !config.sync_settle.is_zero() {
            // Give battery-backed controller caches a moment to flush.
            tokio::time::sleep(config.sync_settle).await;
        }
    }

    if !config.unmount.enabled || config.unmount.mounts.is_empty() {
        return;
    }
    let timeout = config.unmount.timeout;
    info!(
        mounts = config.unmount.mounts.len(),
        timeout_s = timeout.as_secs(),
        "unmounting filesystems"
    );

    for mount in &config.unmount.mounts {
        let path = mount.path.display().to_string();
        if dry_run {
            info!(
                mount = %path,
                flags = %mount.flags.join(" "),
                "[DRY-RUN] would unmount"
            );
            continue;
        }

        let mut args = mount.flags.clone();
        args.push(path.clone());
        match proc::run("umount", &args, timeout).await {
            outcome if outcome.success() => info!(mount = %path, "unmounted"),
            CommandOutcome::TimedOut => warn!(
                mount = %path,
                "unmount timed out (device may be busy or unreachable); proceeding"
            ),
            outcome => {
                // Distinguish a real failure from a target that was never
                // mounted in the first place.
                let check = proc::run("mountpoint", &["-q", path.as_str()], MOUNTPOINT_TIMEOUT).await;
                if check.success() {
                    warn!(
                        mount = %path,
                        outcome = %outcome.describe(),
                        "failed to unmount; proceeding"
                    );
                } else {
                    info!(mount = %path, "was not mounted");
                }
            }
        }
    }
}

/// Second sync pass after the remote stage, ahead of the final grace.
pub async fn final_sync(config: &FilesystemsConfig, dry_run: bool) {
    if !config.sync_enabled {
        return;
    }
    info!("final filesystem sync");
    sync_once(dry_run).await;
}

async fn sync_once(dry_run: bool) {
    if dry_run {
        info!("[DRY-RUN] would sync filesystems");
        return;
    }
    let outcome = proc::run("sync", &[] as &[&str], SYNC_TIMEOUT).await;
    if outcome.success() {
        info!("filesystems synced");
    } else {
        warn!(outcome = %outcome.describe(), "filesystem sync failed");
    }
}
