//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Stage ordering and dry-run properties of the orchestrator."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! All tests run in dry-run mode so no external command is ever executed;
//! sequencing, marker handling, and reports are exercised for real.

use std::time::Duration;

use tempfile::tempdir;

use upswatch_common::config::{AppConfig, RemoteServerConfig};
use upswatch_core::shutdown::{remote, Orchestrator, Stage};
use upswatch_core::triggers::ShutdownCause;
use upswatch_notify::Notifier;

fn dry_run_config(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.behavior.dry_run = true;
    config.logging.state_file = dir.join("ups.state");
    config.logging.battery_history_file = dir.join("history");
    config.logging.shutdown_marker_file = dir.join("scheduled");
    config
}

fn server(name: &str, parallel: bool) -> RemoteServerConfig {
    RemoteServerConfig {
        name: name.to_owned(),
        enabled: true,
        host: format!("{name}.lan"),
        user: "root".to_owned(),
        connect_timeout: Duration::from_secs(1),
        command_timeout: Duration::from_secs(1),
        shutdown_command: "sudo shutdown -h now".to_owned(),
        ssh_options: Vec::new(),
        parallel,
        pre_shutdown_commands: Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stages_run_in_fixed_order() {
    let dir = tempdir().unwrap();
    let mut config = dry_run_config(dir.path());
    config.virtual_machines.enabled = true;
    config.containers.enabled = true;
    config.filesystems.unmount.enabled = true;
    config.remote_servers = vec![server("nas", true)];

    let orchestrator = Orchestrator::new(config, Notifier::disabled());
    let report = orchestrator
        .execute(ShutdownCause::LowBattery {
            percent: 19.0,
            threshold: 20.0,
        })
        .await;

    assert!(report.dry_run);
    assert_eq!(
        report.executed(),
        vec![
            Stage::VirtualMachines,
            Stage::Containers,
            Stage::Filesystems,
            Stage::RemoteServers,
            Stage::FinalGrace,
            Stage::LocalShutdown,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn skipped_stages_do_not_perturb_order() {
    let dir = tempdir().unwrap();
    // Defaults: VMs, containers, unmount, and remote all disabled; sync
    // and local shutdown enabled.
    let config = dry_run_config(dir.path());

    let orchestrator = Orchestrator::new(config, Notifier::disabled());
    let report = orchestrator.execute(ShutdownCause::ForcedShutdown).await;

    assert_eq!(
        report.executed(),
        vec![Stage::Filesystems, Stage::FinalGrace, Stage::LocalShutdown]
    );
    // The full stage record still lists every stage once, in order.
    let all: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        all,
        vec![
            Stage::VirtualMachines,
            Stage::Containers,
            Stage::Filesystems,
            Stage::RemoteServers,
            Stage::FinalGrace,
            Stage::LocalShutdown,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dry_run_clears_the_shutdown_marker() {
    let dir = tempdir().unwrap();
    let config = dry_run_config(dir.path());
    let marker_path = config.logging.shutdown_marker_file.clone();

    let orchestrator = Orchestrator::new(config, Notifier::disabled());
    orchestrator.execute(ShutdownCause::ForcedShutdown).await;

    assert!(
        !marker_path.exists(),
        "dry-run must not leave the shutdown marker behind"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequential_servers_complete_before_parallel_ones() {
    let servers = vec![
        server("web", true),
        server("db", false),
        server("cache", true),
        server("backup", false),
    ];

    let completed = remote::run(&servers, true).await;
    assert_eq!(completed.len(), 4);
    // Sequential phase in configuration order, then the parallel phase in
    // whatever order it finishes.
    assert_eq!(&completed[..2], &["db".to_owned(), "backup".to_owned()]);
    assert!(completed[2..].contains(&"web".to_owned()));
    assert!(completed[2..].contains(&"cache".to_owned()));
}
