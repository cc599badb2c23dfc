//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Main monitoring loop: poll, track, evaluate, orchestrate."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! The tick loop runs poller, state tracker, and trigger evaluator
//! synchronously; there is no interleaving among the three. A stop signal
//! is honoured between ticks so the poll in progress always completes.
//! Once the orchestrator starts, interrupts are ignored and the sequence
//! runs to completion.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use upswatch_common::config::AppConfig;
use upswatch_common::time::{format_duration, format_opt_seconds};
use upswatch_notify::{Notifier, Severity};

use crate::nut::UpsClient;
use crate::persist::{BatteryHistoryFile, ShutdownMarker, StateFile};
use crate::proc::command_exists;
use crate::shutdown::{Orchestrator, ShutdownReport};
use crate::state::{DerivedState, MonitorEvent, StateTracker, VoltageThresholds};
use crate::triggers::{self, ShutdownCause};

const INITIAL_CONNECT_WAIT: Duration = Duration::from_secs(30);
const INITIAL_CONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// Cadence of the on-battery status summary line.
const ON_BATTERY_LOG_EVERY: Duration = Duration::from_secs(5);

/// How a monitoring run ended.
#[derive(Debug)]
pub enum MonitorExit {
    /// Clean stop on SIGINT/SIGTERM before any shutdown was armed.
    SignalStop,
    /// A shutdown sequence ran to completion.
    ShutdownComplete(ShutdownReport),
}

/// Long-lived daemon object owning the monitor state and the tick loop.
pub struct UpsMonitor {
    config: AppConfig,
    client: UpsClient,
    tracker: StateTracker,
    notifier: Notifier,
    state_file: StateFile,
    history_file: BatteryHistoryFile,
    marker: ShutdownMarker,
    exit_after_shutdown: bool,
    last_battery_log: Option<tokio::time::Instant>,
}

impl UpsMonitor {
    pub fn new(config: AppConfig, notifier: Notifier, exit_after_shutdown: bool) -> Self {
        let client = UpsClient::new(&config.ups);
        let tracker = StateTracker::new(&config.ups, &config.triggers.depletion);
        let state_file = StateFile::new(config.logging.state_file.clone());
        let history_file = BatteryHistoryFile::new(config.logging.battery_history_file.clone());
        let marker = ShutdownMarker::new(config.logging.shutdown_marker_file.clone());
        Self {
            config,
            client,
            tracker,
            notifier,
            state_file,
            history_file,
            marker,
            exit_after_shutdown,
            last_battery_log: None,
        }
    }

    /// Run until a stop signal or a completed shutdown sequence.
    pub async fn run(mut self) -> Result<MonitorExit> {
        self.startup().await?;

        let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

        loop {
            // The in-flight poll always completes; signals are observed
            // only between ticks.
            let reading = self.client.poll().await;
            if let Some(cause) = self.process_tick(&reading) {
                let report = self.orchestrate(cause).await;
                if self.exit_after_shutdown {
                    return Ok(MonitorExit::ShutdownComplete(report));
                }
                if !self.config.behavior.dry_run && self.config.local_shutdown.enabled {
                    info!("local shutdown issued; waiting for the host to power off");
                    std::future::pending::<()>().await;
                }
                info!("shutdown sequence finished; monitoring continues with shutdown latched");
            }

            tokio::select! {
                _ = sigint.recv() => return self.clean_stop("SIGINT"),
                _ = sigterm.recv() => return self.clean_stop("SIGTERM"),
                _ = tokio::time::sleep(self.config.ups.check_interval) => {}
            }
        }
    }

    async fn startup(&mut self) -> Result<()> {
        if self.marker.exists() {
            warn!(
                marker = %self.marker.path().display(),
                "shutdown marker present at startup; a previous run armed but did not complete"
            );
            if let Err(err) = self.marker.clear() {
                warn!(error = %err, "cannot remove stale shutdown marker");
            }
        }
        if let Err(err) = self.history_file.truncate() {
            warn!(error = %err, "cannot reset battery history file");
        }

        self.check_dependencies().await?;

        info!(ups = %self.config.ups.name, "UPS monitor starting");
        self.notifier.enqueue(
            Severity::Info,
            format!(
                "UPS Monitor Service Started.\nMonitoring {}.",
                self.config.ups.name
            ),
        );
        if self.config.behavior.dry_run {
            info!("*** running in dry-run mode - no actual shutdown will occur ***");
        }
        self.log_enabled_features();

        self.wait_for_initial_connection().await;
        self.init_voltage_thresholds().await;
        Ok(())
    }

    async fn check_dependencies(&mut self) -> Result<()> {
        if !command_exists("upsc").await {
            self.notifier.enqueue(
                Severity::Crisis,
                "FATAL: required command 'upsc' not found. Monitor cannot start.",
            );
            anyhow::bail!("required command 'upsc' not found in PATH");
        }
        for tool in ["sync", "shutdown", "wall"] {
            if !command_exists(tool).await {
                warn!(tool, "command not found; related functionality degraded");
            }
        }

        if self.config.virtual_machines.enabled && !command_exists("virsh").await {
            warn!("'virsh' not found but VM shutdown is enabled; VMs will be skipped");
            self.config.virtual_machines.enabled = false;
        }
        if self.config.containers.enabled {
            match crate::shutdown::containers::resolve_runtime(&self.config.containers).await {
                Some(runtime) => info!(runtime, "container runtime detected"),
                None => {
                    warn!("no container runtime found; container shutdown will be skipped");
                    self.config.containers.enabled = false;
                }
            }
        }
        if self.config.enabled_remote_servers().next().is_some() && !command_exists("ssh").await {
            warn!("'ssh' not found but remote servers are configured; remote shutdown disabled");
            for server in &mut self.config.remote_servers {
                server.enabled = false;
            }
        }
        Ok(())
    }

    fn log_enabled_features(&self) {
        let mut features = Vec::new();
        if self.config.virtual_machines.enabled {
            features.push("VMs".to_owned());
        }
        if self.config.containers.enabled {
            features.push(format!("containers ({:?})", self.config.containers.runtime));
        }
        if self.config.filesystems.sync_enabled {
            features.push("fs sync".to_owned());
        }
        if self.config.filesystems.unmount.enabled {
            features.push(format!(
                "unmount ({} mounts)",
                self.config.filesystems.unmount.mounts.len()
            ));
        }
        let remote = self.config.enabled_remote_servers().count();
        if remote > 0 {
            features.push(format!("remote ({remote} servers)"));
        }
        if self.config.local_shutdown.enabled {
            features.push("local shutdown".to_owned());
        }
        if self.notifier.enabled() {
            features.push("notifications".to_owned());
        }
        info!(features = %features.join(", "), "enabled features");
    }

    async fn wait_for_initial_connection(&self) {
        info!(ups = %self.config.ups.name, "checking initial connection");
        let deadline = tokio::time::Instant::now() + INITIAL_CONNECT_WAIT;
        loop {
            if self.client.poll().await.is_ok() {
                info!("initial connection successful");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    waited_s = INITIAL_CONNECT_WAIT.as_secs(),
                    "failed to reach UPS during startup; proceeding with default thresholds"
                );
                return;
            }
            tokio::time::sleep(INITIAL_CONNECT_INTERVAL).await;
        }
    }

    async fn init_voltage_thresholds(&mut self) {
        let nominal = self.query_numeric("input.voltage.nominal").await;
        let transfer_low = self.query_numeric("input.transfer.low").await;
        let transfer_high = self.query_numeric("input.transfer.high").await;
        let thresholds = VoltageThresholds::from_probe(nominal, transfer_low, transfer_high);
        info!(
            nominal = thresholds.nominal,
            warn_low = thresholds.warn_low,
            warn_high = thresholds.warn_high,
            "voltage monitoring active"
        );
        self.tracker.set_thresholds(thresholds);
    }

    async fn query_numeric(&self, variable: &str) -> Option<f64> {
        self.client
            .query_var(variable)
            .await
            .and_then(|v| v.parse().ok())
    }

    /// One synchronous tick: track, log, persist, evaluate.
    fn process_tick(&mut self, reading: &crate::nut::UpsReading) -> Option<ShutdownCause> {
        let events = self.tracker.apply(reading);
        for event in &events {
            self.handle_event(event);
        }

        if reading.is_ok() {
            if let Err(err) = self.state_file.write(reading) {
                warn!(error = %err, "failed to write state file");
            }
            let state = self.tracker.state();
            if state.derived == DerivedState::OnBattery {
                if !state.history.is_empty() {
                    if let Err(err) = self.history_file.write(&state.history) {
                        tracing::debug!(error = %err, "failed to mirror battery history");
                    }
                }
                self.log_on_battery_status(reading);
            }
        }

        if self.tracker.state().shutdown_armed {
            return None;
        }

        let verdict = triggers::evaluate(
            reading,
            self.tracker.state(),
            &self.config.ups,
            &self.config.triggers,
        );

        // The extended-time rule logs once per outage when it matches but
        // is configured off.
        if verdict.is_none()
            && !self.config.triggers.extended_time.enabled
            && !self.tracker.state().extended_time_logged
        {
            if let Some(elapsed) = triggers::extended_time_elapsed(
                self.tracker.state(),
                &self.config.triggers,
                reading.fetched_at,
            ) {
                info!(
                    on_battery = %format_duration(elapsed),
                    threshold = %format_duration(self.config.triggers.extended_time.threshold),
                    "time on battery exceeded threshold; extended-time shutdown disabled"
                );
                self.tracker.note_extended_time_logged();
            }
        }

        verdict
    }

    fn handle_event(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::OnBattery {
                battery,
                runtime,
                load,
            } => {
                let details = format!(
                    "Battery: {}%, Runtime: {}, Load: {}%",
                    battery.map(|b| b.to_string()).unwrap_or_else(|| "N/A".into()),
                    format_opt_seconds(*runtime),
                    load.map(|l| l.to_string()).unwrap_or_else(|| "N/A".into()),
                );
                warn!(%details, "POWER EVENT: ON_BATTERY");
                self.notifier.enqueue(
                    Severity::Warning,
                    format!("POWER FAILURE DETECTED!\nSystem running on battery.\n{details}"),
                );
                self.broadcast_wall(format!(
                    "WARNING: Power failure detected! System running on UPS battery ({details})"
                ));
            }
            MonitorEvent::PowerRestored { outage, battery } => {
                let details = format!(
                    "Battery: {}%, Outage duration: {}",
                    battery.map(|b| b.to_string()).unwrap_or_else(|| "N/A".into()),
                    format_duration(*outage),
                );
                info!(%details, "POWER EVENT: POWER_RESTORED");
                self.notifier.enqueue(
                    Severity::Success,
                    format!("POWER RESTORED.\nSystem back on line power.\n{details}"),
                );
                self.broadcast_wall(format!("Power has been restored. {details}"));
            }
            MonitorEvent::ConnectionLost { consecutive_stale } => {
                error!(
                    consecutive_stale,
                    ups = %self.config.ups.name,
                    "POWER EVENT: CONNECTION_LOST; monitoring is inactive"
                );
                self.notifier.enqueue(
                    Severity::Crisis,
                    format!(
                        "ERROR: Connection Lost\nData from UPS {} is persistently unavailable.",
                        self.config.ups.name
                    ),
                );
            }
            MonitorEvent::ConnectionRestored => {
                info!(ups = %self.config.ups.name, "POWER EVENT: CONNECTION_RESTORED");
                self.notifier.enqueue(
                    Severity::Success,
                    format!(
                        "Connection Restored.\nUPS {} is reachable again; monitoring is active.",
                        self.config.ups.name
                    ),
                );
            }
            MonitorEvent::RegimeEntered { regime, detail } => {
                warn!(regime = regime.label(), detail = %detail, "power quality event");
                let severity = match regime {
                    crate::state::VoltageRegime::Bypass
                    | crate::state::VoltageRegime::Overload => Severity::Crisis,
                    _ => Severity::Warning,
                };
                self.notifier
                    .enqueue(severity, format!("{}: {detail}", regime.label()));
            }
            MonitorEvent::RegimeCleared { regime } => {
                info!(regime = regime.label(), "power quality event cleared");
                match regime {
                    crate::state::VoltageRegime::Bypass => self.notifier.enqueue(
                        Severity::Success,
                        "Bypass mode inactive. Protection restored.",
                    ),
                    crate::state::VoltageRegime::Overload => self
                        .notifier
                        .enqueue(Severity::Success, "UPS overload resolved."),
                    _ => {}
                }
            }
            MonitorEvent::StatusChanged { from, to } => {
                info!(from = %from, to = %to, "UPS status changed");
            }
        }
    }

    /// Fire-and-forget `wall` broadcast; never blocks the tick.
    fn broadcast_wall(&self, message: String) {
        tokio::spawn(async move {
            let _ = crate::proc::run("wall", &[message.as_str()], Duration::from_secs(10)).await;
        });
    }

    fn log_on_battery_status(&mut self, reading: &crate::nut::UpsReading) {
        let now = tokio::time::Instant::now();
        if let Some(last) = self.last_battery_log {
            if now.duration_since(last) < ON_BATTERY_LOG_EVERY {
                return;
            }
        }
        self.last_battery_log = Some(now);

        let state = self.tracker.state();
        let rate = triggers::depletion_rate(&state.history, 2).unwrap_or(0.0);
        let on_battery = state
            .time_on_battery(reading.fetched_at)
            .unwrap_or_default();
        info!(
            battery = %reading.battery_percent.map(|b| b.to_string()).unwrap_or_else(|| "N/A".into()),
            runtime = %format_opt_seconds(reading.runtime_seconds),
            load = %reading.load_percent.map(|l| l.to_string()).unwrap_or_else(|| "N/A".into()),
            depletion_rate = %format!("{rate:.2}"),
            time_on_battery = %format_duration(on_battery),
            "on battery"
        );
    }

    async fn orchestrate(&mut self, cause: ShutdownCause) -> ShutdownReport {
        error!(cause = cause.tag(), reason = %cause.describe(), "shutdown trigger fired");
        self.tracker.arm_shutdown();
        let orchestrator = Orchestrator::new(self.config.clone(), self.notifier.clone());
        orchestrator.execute(cause).await
    }

    fn clean_stop(&self, signal_name: &str) -> Result<MonitorExit> {
        info!(signal = signal_name, "service stopped by signal; monitoring is inactive");
        self.notifier.enqueue(
            Severity::Warning,
            "UPS Monitor Service Stopped.\nMonitoring is now inactive.",
        );
        Ok(MonitorExit::SignalStop)
    }
}
