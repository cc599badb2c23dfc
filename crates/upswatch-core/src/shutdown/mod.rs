//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Multi-stage shutdown sequencing across VMs, containers, filesystems, remote hosts, and the local host."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! The orchestrator runs at most once per process lifetime. Stages execute
//! strictly in order; a disabled stage is skipped without perturbing the
//! rest, and per-item failures never abort a stage. Dry-run preserves
//! sequencing, logging, and notifications while suppressing every external
//! side effect.

use std::time::Duration;

use tracing::{info, warn};

use upswatch_common::config::AppConfig;
use upswatch_notify::{Notifier, Severity};

use crate::persist::ShutdownMarker;
use crate::proc;
use crate::triggers::ShutdownCause;

pub mod containers;
pub mod filesystems;
pub mod remote;
pub mod vms;

/// Stage E window for the notification worker to drain if the network
/// recovered. Never waits for empty-queue confirmation.
pub const FINAL_GRACE: Duration = Duration::from_secs(5);

const WALL_TIMEOUT: Duration = Duration::from_secs(10);
const LOCAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// The ordered shutdown stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VirtualMachines,
    Containers,
    Filesystems,
    RemoteServers,
    FinalGrace,
    LocalShutdown,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::VirtualMachines => "virtual machines",
            Stage::Containers => "containers",
            Stage::Filesystems => "filesystems",
            Stage::RemoteServers => "remote servers",
            Stage::FinalGrace => "final grace",
            Stage::LocalShutdown => "local shutdown",
        }
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageOutcome {
    pub stage: Stage,
    pub skipped: bool,
}

/// Record of one completed orchestration.
#[derive(Debug)]
pub struct ShutdownReport {
    pub cause: ShutdownCause,
    pub dry_run: bool,
    pub stages: Vec<StageOutcome>,
}

impl ShutdownReport {
    /// Stages that actually ran, in execution order.
    pub fn executed(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|s| !s.skipped)
            .map(|s| s.stage)
            .collect()
    }
}

/// Drives the staged shutdown sequence.
pub struct Orchestrator {
    config: AppConfig,
    notifier: Notifier,
    marker: ShutdownMarker,
}

impl Orchestrator {
    pub fn new(config: AppConfig, notifier: Notifier) -> Self {
        let marker = ShutdownMarker::new(config.logging.shutdown_marker_file.clone());
        Self {
            config,
            notifier,
            marker,
        }
    }

    /// Run the full sequence for `cause`. Once entered, this runs to
    /// completion; interrupt requests are not observed here.
    pub async fn execute(&self, cause: ShutdownCause) -> ShutdownReport {
        let dry_run = self.config.behavior.dry_run;

        // The sentinel goes down before any side effect so a restart can
        // tell that an orchestration was already in flight.
        if let Err(err) = self.marker.arm(&cause) {
            warn!(error = %err, "unable to write shutdown marker; continuing");
        }

        info!(
            cause = cause.tag(),
            dry_run,
            "========== initiating emergency shutdown sequence =========="
        );
        self.notifier.enqueue(
            Severity::Crisis,
            format!(
                "EMERGENCY SHUTDOWN INITIATED\nReason: {}",
                cause.describe()
            ),
        );
        self.broadcast(&format!(
            "CRITICAL: UPS emergency shutdown initiated. Reason: {}",
            cause.describe()
        ))
        .await;

        let mut stages = Vec::new();

        if self.stage_begin(Stage::VirtualMachines, self.config.virtual_machines.enabled, &mut stages) {
            vms::run(&self.config.virtual_machines, dry_run).await;
            self.stage_done(Stage::VirtualMachines, &mut stages);
        }

        if self.stage_begin(Stage::Containers, self.config.containers.enabled, &mut stages) {
            containers::run(&self.config.containers, dry_run).await;
            self.stage_done(Stage::Containers, &mut stages);
        }

        let fs = &self.config.filesystems;
        let fs_active = fs.sync_enabled || (fs.unmount.enabled && !fs.unmount.mounts.is_empty());
        if self.stage_begin(Stage::Filesystems, fs_active, &mut stages) {
            filesystems::run(fs, dry_run).await;
            self.stage_done(Stage::Filesystems, &mut stages);
        }

        let remote_active = self.config.enabled_remote_servers().next().is_some();
        if self.stage_begin(Stage::RemoteServers, remote_active, &mut stages) {
            let completed = remote::run(&self.config.remote_servers, dry_run).await;
            info!(servers = completed.len(), "remote shutdown phase finished");
            self.stage_done(Stage::RemoteServers, &mut stages);
        }

        filesystems::final_sync(fs, dry_run).await;

        info!(
            grace_s = FINAL_GRACE.as_secs(),
            "final grace window for notification delivery"
        );
        tokio::time::sleep(FINAL_GRACE).await;
        stages.push(StageOutcome {
            stage: Stage::FinalGrace,
            skipped: false,
        });

        self.local_shutdown(dry_run, &mut stages).await;

        if dry_run || !self.config.local_shutdown.enabled {
            // The host stays up; leaving the sentinel behind would read as
            // an interrupted orchestration on the next start.
            if let Err(err) = self.marker.clear() {
                warn!(error = %err, "unable to clear shutdown marker");
            }
        }

        info!("========== shutdown sequence complete ==========");
        ShutdownReport {
            cause,
            dry_run,
            stages,
        }
    }

    /// Log the stage boundary and record a skip when inactive. Returns
    /// whether the stage body should run.
    fn stage_begin(&self, stage: Stage, active: bool, stages: &mut Vec<StageOutcome>) -> bool {
        if !active {
            info!(stage = stage.label(), "stage disabled; skipping");
            stages.push(StageOutcome {
                stage,
                skipped: true,
            });
            return false;
        }
        info!(stage = stage.label(), "stage starting");
        true
    }

    fn stage_done(&self, stage: Stage, stages: &mut Vec<StageOutcome>) {
        info!(stage = stage.label(), "stage complete");
        self.notifier.enqueue(
            Severity::Crisis,
            format!("Shutdown progress: {} stage complete.", stage.label()),
        );
        stages.push(StageOutcome {
            stage,
            skipped: false,
        });
    }

    async fn local_shutdown(&self, dry_run: bool, stages: &mut Vec<StageOutcome>) {
        let local = &self.config.local_shutdown;
        if !local.enabled {
            info!("local shutdown disabled; host stays up");
            stages.push(StageOutcome {
                stage: Stage::LocalShutdown,
                skipped: true,
            });
            return;
        }

        let mut parts: Vec<String> = local.command.split_whitespace().map(str::to_owned).collect();
        if let Some(message) = &local.message {
            parts.push(message.clone());
        }
        self.notifier.enqueue(
            Severity::Crisis,
            "Shutdown sequence complete. Powering off the local host NOW.",
        );

        if dry_run {
            info!(command = %parts.join(" "), "[DRY-RUN] would execute local shutdown");
        } else if let Some((program, args)) = parts.split_first() {
            info!(command = %parts.join(" "), "powering off local host");
            let outcome = proc::run(program, args, LOCAL_SHUTDOWN_TIMEOUT).await;
            if !outcome.success() {
                warn!(outcome = %outcome.describe(), "local shutdown command failed");
            }
        } else {
            warn!("local shutdown enabled but command is empty");
        }
        stages.push(StageOutcome {
            stage: Stage::LocalShutdown,
            skipped: false,
        });
    }

    async fn broadcast(&self, message: &str) {
        if self.config.behavior.dry_run {
            info!(text = message, "[DRY-RUN] would broadcast via wall");
            return;
        }
        let outcome = proc::run("wall", &[message], WALL_TIMEOUT).await;
        if !outcome.success() {
            tracing::debug!(outcome = %outcome.describe(), "wall broadcast failed");
        }
    }
}
