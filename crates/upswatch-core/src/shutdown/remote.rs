//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Stage D: remote host shutdown over SSH, sequential then parallel."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Hosts with `parallel = false` run first, strictly in configuration
//! order; the rest run concurrently. A single stuck host can only stall
//! its own task: every SSH invocation carries a hard deadline.

use std::path::Path;

use tokio::task::JoinSet;
use tracing::{info, warn};

use upswatch_common::config::{PredefinedAction, PreShutdownStep, RemoteServerConfig};

use crate::proc::{self, command_exists};

/// Run the two-phase remote shutdown across all enabled servers. Returns
/// the server labels in completion order.
pub async fn run(servers: &[RemoteServerConfig], dry_run: bool) -> Vec<String> {
    let enabled: Vec<&RemoteServerConfig> = servers.iter().filter(|s| s.enabled).collect();
    if enabled.is_empty() {
        return Vec::new();
    }
    if !dry_run && !command_exists("ssh").await {
        warn!("ssh not available; skipping remote server shutdown");
        return Vec::new();
    }

    let mut completed = Vec::new();

    // Sequential phase: completes fully before any parallel job starts.
    for server in enabled.iter().filter(|s| !s.parallel) {
        shutdown_server(server, dry_run).await;
        completed.push(server.label().to_owned());
    }

    let mut jobs = JoinSet::new();
    for server in enabled.iter().filter(|s| s.parallel) {
        let server = (*server).clone();
        jobs.spawn(async move {
            shutdown_server(&server, dry_run).await;
            server.label().to_owned()
        });
    }
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(label) => completed.push(label),
            Err(err) => warn!(error = %err, "remote shutdown task failed to join"),
        }
    }
    completed
}

/// Per-host procedure: pre-shutdown steps in order (best-effort), then the
/// shutdown command.
pub async fn shutdown_server(server: &RemoteServerConfig, dry_run: bool) {
    info!(
        server = server.label(),
        host = %server.host,
        "initiating remote shutdown"
    );

    for (index, pre) in server.pre_shutdown_commands.iter().enumerate() {
        let script = realize_step(&pre.step);
        let timeout = pre.timeout.unwrap_or(server.command_timeout);
        let what = format!("pre-shutdown step {}", index + 1);
        ssh_exec(server, &script, timeout, dry_run, &what).await;
    }

    ssh_exec(
        server,
        &server.shutdown_command,
        server.command_timeout,
        dry_run,
        "shutdown command",
    )
    .await;
}

fn realize_step(step: &PreShutdownStep) -> String {
    match step {
        PreShutdownStep::Raw(command) => command.clone(),
        PreShutdownStep::Predefined { action, path } => {
            action_script(*action, path.as_deref())
        }
    }
}

/// Expand a predefined action into the short script executed over SSH.
pub fn action_script(action: PredefinedAction, path: Option<&Path>) -> String {
    match action {
        PredefinedAction::StopContainers => "if command -v podman >/dev/null 2>&1; then podman stop --all; elif command -v docker >/dev/null 2>&1; then docker ps -q | xargs -r docker stop; fi".to_owned(),
        PredefinedAction::StopVms => {
            "virsh list --state-running --name | xargs -r -n1 virsh shutdown".to_owned()
        }
        PredefinedAction::StopProxmoxVms => {
            "qm list | awk 'NR>1 && $3==\"running\" {print $1}' | xargs -r -n1 qm shutdown".to_owned()
        }
        PredefinedAction::StopProxmoxCts => {
            "pct list | awk 'NR>1 && $2==\"running\" {print $1}' | xargs -r -n1 pct shutdown".to_owned()
        }
        PredefinedAction::StopXcpngVms => {
            "xe vm-shutdown power-state=running --multiple".to_owned()
        }
        PredefinedAction::StopEsxiVms => {
            "vim-cmd vmsvc/getallvms | awk 'NR>1 {print $1}' | xargs -r -n1 vim-cmd vmsvc/power.shutdown".to_owned()
        }
        PredefinedAction::StopCompose => {
            let path = path.map(|p| p.display().to_string()).unwrap_or_default();
            format!("docker compose -f {path} down || docker-compose -f {path} down")
        }
        PredefinedAction::Sync => "sync".to_owned(),
    }
}

fn ssh_args(server: &RemoteServerConfig, remote_command: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_owned(),
        format!("ConnectTimeout={}", server.connect_timeout.as_secs()),
    ];
    args.extend(server.ssh_options.iter().cloned());
    args.push(format!("{}@{}", server.user, server.host));
    args.push(remote_command.to_owned());
    args
}

async fn ssh_exec(
    server: &RemoteServerConfig,
    command: &str,
    timeout: std::time::Duration,
    dry_run: bool,
    what: &str,
) {
    if dry_run {
        info!(
            server = server.label(),
            what,
            command,
            "[DRY-RUN] would execute over ssh"
        );
        return;
    }

    // The configured timeout bounds the remote command; connection setup
    // gets its own allowance on top.
    let deadline = server.connect_timeout + timeout;
    let outcome = proc::run("ssh", &ssh_args(server, command), deadline).await;
    if outcome.success() {
        info!(server = server.label(), what, "remote command succeeded");
    } else {
        warn!(
            server = server.label(),
            what,
            outcome = %outcome.describe(),
            "remote command failed; continuing"
        );
        let stderr = outcome.stderr().trim();
        if !stderr.is_empty() {
            warn!(server = server.label(), stderr, "remote command stderr");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn server() -> RemoteServerConfig {
        RemoteServerConfig {
            name: "nas".to_owned(),
            enabled: true,
            host: "nas.lan".to_owned(),
            user: "admin".to_owned(),
            connect_timeout: Duration::from_secs(7),
            command_timeout: Duration::from_secs(30),
            shutdown_command: "sudo shutdown -h now".to_owned(),
            ssh_options: vec!["-o".to_owned(), "StrictHostKeyChecking=no".to_owned()],
            parallel: true,
            pre_shutdown_commands: Vec::new(),
        }
    }

    #[test]
    fn ssh_args_carry_connect_timeout_and_options_verbatim() {
        let args = ssh_args(&server(), "sync");
        assert_eq!(
            args,
            vec![
                "-o".to_owned(),
                "ConnectTimeout=7".to_owned(),
                "-o".to_owned(),
                "StrictHostKeyChecking=no".to_owned(),
                "admin@nas.lan".to_owned(),
                "sync".to_owned(),
            ]
        );
    }

    #[test]
    fn compose_action_requires_its_path() {
        let script = action_script(
            PredefinedAction::StopCompose,
            Some(&PathBuf::from("/srv/stack/docker-compose.yml")),
        );
        assert!(script.contains("-f /srv/stack/docker-compose.yml"));
    }

    #[test]
    fn predefined_actions_expand_to_shell_scripts() {
        assert_eq!(action_script(PredefinedAction::Sync, None), "sync");
        assert!(action_script(PredefinedAction::StopVms, None).contains("virsh"));
        assert!(action_script(PredefinedAction::StopProxmoxVms, None).contains("qm"));
        assert!(action_script(PredefinedAction::StopProxmoxCts, None).contains("pct"));
        assert!(action_script(PredefinedAction::StopXcpngVms, None).contains("xe"));
        assert!(action_script(PredefinedAction::StopEsxiVms, None).contains("vim-cmd"));
    }

    #[test]
    fn raw_steps_pass_through_unchanged() {
        let step = PreShutdownStep::Raw("systemctl stop postgresql".to_owned());
        assert_eq!(realize_step(&step), "systemctl stop postgresql");
    }
}
