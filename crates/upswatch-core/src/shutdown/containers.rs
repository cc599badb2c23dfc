//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Stage B: compose projects and remaining containers on Docker or Podman."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::time::Duration;

use tracing::{info, warn};

use upswatch_common::config::{ContainerRuntime, ContainersConfig};

use crate::proc::{self, command_exists};

const LIST_TIMEOUT: Duration = Duration::from_secs(15);
/// Slack on top of the configured stop timeout before the invocation
/// itself is killed.
const STOP_MARGIN: Duration = Duration::from_secs(30);

/// Stop compose projects in order, then any remaining containers, then
/// (Podman only, when configured) rootless containers of lingering users.
pub async fn run(config: &ContainersConfig, dry_run: bool) {
    let Some(runtime) = resolve_runtime(config).await else {
        info!("no container runtime available; skipping container shutdown");
        return;
    };
    info!(runtime, "stopping containers");

    for compose in &config.compose_files {
        let timeout = compose.stop_timeout.unwrap_or(config.stop_timeout);
        let path = compose.path.display().to_string();
        if dry_run {
            info!(compose = %path, "[DRY-RUN] would stop compose project");
            continue;
        }
        info!(compose = %path, timeout_s = timeout.as_secs(), "stopping compose project");
        let args = vec![
            "compose".to_owned(),
            "-f".to_owned(),
            path.clone(),
            "down".to_owned(),
            "--timeout".to_owned(),
            timeout.as_secs().to_string(),
        ];
        let outcome = proc::run(runtime, &args, timeout + STOP_MARGIN).await;
        if !outcome.success() {
            warn!(compose = %path, outcome = %outcome.describe(), "compose down failed");
        }
    }

    if config.shutdown_all_remaining {
        stop_remaining(runtime, config, dry_run).await;
    }

    if runtime == "podman" && config.include_user_containers {
        stop_user_containers(config, dry_run).await;
    }
}

/// Resolve the runtime binary: explicit choices are used as-is, `auto`
/// probes Podman first, then Docker.
pub async fn resolve_runtime(config: &ContainersConfig) -> Option<&'static str> {
    match config.runtime {
        ContainerRuntime::Docker => {
            if command_exists("docker").await {
                Some("docker")
            } else {
                warn!("docker requested but not found");
                None
            }
        }
        ContainerRuntime::Podman => {
            if command_exists("podman").await {
                Some("podman")
            } else {
                warn!("podman requested but not found");
                None
            }
        }
        ContainerRuntime::Auto => {
            if command_exists("podman").await {
                Some("podman")
            } else if command_exists("docker").await {
                Some("docker")
            } else {
                None
            }
        }
    }
}

async fn stop_remaining(runtime: &str, config: &ContainersConfig, dry_run: bool) {
    let outcome = proc::run(runtime, &["ps", "--format", "{{.ID}}"], LIST_TIMEOUT).await;
    if !outcome.success() {
        warn!(runtime, outcome = %outcome.describe(), "failed to list running containers");
        return;
    }
    let ids: Vec<String> = outcome
        .stdout()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    if ids.is_empty() {
        info!(runtime, "no remaining containers");
        return;
    }

    if dry_run {
        let names = proc::run(runtime, &["ps", "--format", "{{.Names}}"], LIST_TIMEOUT).await;
        info!(
            runtime,
            containers = %names.stdout().split_whitespace().collect::<Vec<_>>().join(" "),
            "[DRY-RUN] would stop remaining containers"
        );
        return;
    }

    info!(runtime, count = ids.len(), "stopping remaining containers");
    let mut args = vec![
        "stop".to_owned(),
        "--time".to_owned(),
        config.stop_timeout.as_secs().to_string(),
    ];
    args.extend(ids);
    let outcome = proc::run(runtime, &args, config.stop_timeout + STOP_MARGIN).await;
    if !outcome.success() {
        warn!(runtime, outcome = %outcome.describe(), "container stop failed");
    }
}

/// Enumerate lingering users and stop their rootless Podman containers.
async fn stop_user_containers(config: &ContainersConfig, dry_run: bool) {
    info!("checking for rootless podman containers");
    if dry_run {
        info!("[DRY-RUN] would stop rootless podman containers for all users");
        return;
    }

    let outcome = proc::run("loginctl", &["list-users", "--no-legend"], LIST_TIMEOUT).await;
    if !outcome.success() {
        warn!("failed to list users for rootless container check");
        return;
    }

    for line in outcome.stdout().lines() {
        let mut parts = line.split_whitespace();
        let (Some(uid), Some(user)) = (parts.next(), parts.next()) else {
            continue;
        };
        // System accounts never run lingering rootless containers.
        if uid.parse::<u32>().map(|uid| uid < 1000).unwrap_or(true) {
            continue;
        }

        let listing = proc::run("sudo", &["-u", user, "podman", "ps", "-q"], LIST_TIMEOUT).await;
        if !listing.success() {
            continue;
        }
        let ids: Vec<String> = listing
            .stdout()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        if ids.is_empty() {
            continue;
        }

        info!(user, count = ids.len(), "stopping rootless containers");
        let mut args = vec![
            "-u".to_owned(),
            user.to_owned(),
            "podman".to_owned(),
            "stop".to_owned(),
            "--time".to_owned(),
            config.stop_timeout.as_secs().to_string(),
        ];
        args.extend(ids);
        let outcome = proc::run("sudo", &args, config.stop_timeout + STOP_MARGIN).await;
        if !outcome.success() {
            warn!(user, outcome = %outcome.describe(), "rootless container stop failed");
        }
    }
}
