//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Configuration model and loading for the upswatch daemon."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_ups_name() -> String {
    "UPS@localhost".to_owned()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_stale_tolerance() -> u32 {
    3
}

fn default_low_battery_percent() -> f64 {
    20.0
}

fn default_critical_runtime() -> Duration {
    Duration::from_secs(600)
}

fn default_depletion_window() -> Duration {
    Duration::from_secs(300)
}

fn default_depletion_rate() -> f64 {
    15.0
}

fn default_depletion_grace() -> Duration {
    Duration::from_secs(90)
}

fn default_depletion_min_samples() -> usize {
    30
}

fn default_extended_threshold() -> Duration {
    Duration::from_secs(900)
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_vm_max_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_container_stop_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_unmount_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_sync_settle() -> Duration {
    Duration::from_secs(2)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_remote_shutdown_command() -> String {
    "sudo shutdown -h now".to_owned()
}

fn default_local_shutdown_command() -> String {
    "shutdown -h now".to_owned()
}

fn default_local_shutdown_message() -> Option<String> {
    Some("UPS battery critical - emergency shutdown".to_owned())
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/upswatch")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/run/ups-monitor.state")
}

fn default_battery_history_file() -> PathBuf {
    PathBuf::from("/var/run/ups-battery-history")
}

fn default_shutdown_marker_file() -> PathBuf {
    PathBuf::from("/var/run/ups-shutdown-scheduled")
}

fn default_true() -> bool {
    true
}

/// Primary configuration object for the upswatch daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub ups: UpsConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub virtual_machines: VmConfig,
    #[serde(default)]
    pub containers: ContainersConfig,
    #[serde(default)]
    pub filesystems: FilesystemsConfig,
    #[serde(default)]
    pub remote_servers: Vec<RemoteServerConfig>,
    #[serde(default)]
    pub local_shutdown: LocalShutdownConfig,
    /// Legacy `[docker]` table kept only long enough for [`AppConfig::normalize`]
    /// to fold it into `containers`.
    #[serde(default, rename = "docker", skip_serializing)]
    legacy_docker: Option<LegacyDockerConfig>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "UPSWATCH_CONFIG";

    /// Decide which configuration file to use: a non-empty
    /// `UPSWATCH_CONFIG` wins outright, otherwise the first candidate that
    /// exists on disk.
    pub fn resolve_path(candidates: &[PathBuf]) -> Result<PathBuf> {
        match std::env::var(Self::ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => candidates.iter().find(|p| p.exists()).cloned().ok_or_else(|| {
                let checked: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                anyhow!(
                    "no configuration file found (checked: {}); pass --config or set {}",
                    checked.join(", "),
                    Self::ENV_CONFIG_PATH
                )
            }),
        }
    }

    /// Read, parse, normalize, and validate the file at `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("in config file {}", path.display()))
    }

    /// Fold legacy configuration shapes into their canonical form.
    ///
    /// Core types carry only canonical shapes; everything legacy is
    /// translated here, at load time.
    pub fn normalize(&mut self) {
        if let Some(docker) = self.legacy_docker.take() {
            if self.containers == ContainersConfig::default() {
                self.containers = ContainersConfig {
                    enabled: docker.enabled,
                    runtime: ContainerRuntime::Docker,
                    stop_timeout: docker.stop_timeout,
                    ..ContainersConfig::default()
                };
            }
        }

        if let Some(discord) = self.notifications.legacy_discord.take() {
            if self.notifications.urls.is_empty() && !discord.webhook_url.trim().is_empty() {
                self.notifications.urls.push(discord.webhook_url);
            }
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ups.name.trim().is_empty() {
            return Err(anyhow!("ups.name must not be empty (expected NAME@HOST)"));
        }
        if self.ups.check_interval.is_zero() {
            return Err(anyhow!("ups.check_interval_s must be at least 1"));
        }
        self.triggers.validate()?;
        for (index, compose) in self.containers.compose_files.iter().enumerate() {
            if compose.path.as_os_str().is_empty() {
                return Err(anyhow!("containers.compose_files[{}] has an empty path", index));
            }
        }
        for (index, mount) in self.filesystems.unmount.mounts.iter().enumerate() {
            if mount.path.as_os_str().is_empty() {
                return Err(anyhow!(
                    "filesystems.unmount.mounts[{}] has an empty path",
                    index
                ));
            }
        }
        for server in &self.remote_servers {
            server.validate()?;
        }
        Ok(())
    }

    /// Enabled remote servers in configuration order.
    pub fn enabled_remote_servers(&self) -> impl Iterator<Item = &RemoteServerConfig> {
        self.remote_servers.iter().filter(|s| s.enabled)
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let mut config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }
}

/// NUT connection settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpsConfig {
    /// UPS identifier in NUT `NAME@HOST` form.
    #[serde(default = "default_ups_name")]
    pub name: String,
    #[serde(default = "default_check_interval", rename = "check_interval_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    /// Consecutive stale polls tolerated before the connection is declared lost.
    #[serde(default = "default_max_stale_tolerance")]
    pub max_stale_tolerance: u32,
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self {
            name: default_ups_name(),
            check_interval: default_check_interval(),
            max_stale_tolerance: default_max_stale_tolerance(),
        }
    }
}

/// Shutdown trigger thresholds.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggersConfig {
    #[serde(default = "default_low_battery_percent")]
    pub low_battery_percent: f64,
    #[serde(default = "default_critical_runtime", rename = "critical_runtime_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub critical_runtime: Duration,
    #[serde(default)]
    pub depletion: DepletionConfig,
    #[serde(default)]
    pub extended_time: ExtendedTimeConfig,
}

impl TriggersConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.low_battery_percent) {
            return Err(anyhow!(
                "triggers.low_battery_percent must be within [0, 100], got {}",
                self.low_battery_percent
            ));
        }
        if self.depletion.critical_rate <= 0.0 {
            return Err(anyhow!(
                "triggers.depletion.critical_rate_pct_per_min must be positive"
            ));
        }
        if self.depletion.min_samples < 2 {
            return Err(anyhow!(
                "triggers.depletion.min_samples must be at least 2 to form a slope"
            ));
        }
        Ok(())
    }
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            low_battery_percent: default_low_battery_percent(),
            critical_runtime: default_critical_runtime(),
            depletion: DepletionConfig::default(),
            extended_time: ExtendedTimeConfig::default(),
        }
    }
}

/// Rolling depletion-rate estimator settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepletionConfig {
    #[serde(default = "default_depletion_window", rename = "window_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub window: Duration,
    #[serde(default = "default_depletion_rate", rename = "critical_rate_pct_per_min")]
    pub critical_rate: f64,
    /// Initial on-battery window during which the rate rule is suspended.
    #[serde(default = "default_depletion_grace", rename = "grace_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub grace: Duration,
    #[serde(default = "default_depletion_min_samples")]
    pub min_samples: usize,
}

impl Default for DepletionConfig {
    fn default() -> Self {
        Self {
            window: default_depletion_window(),
            critical_rate: default_depletion_rate(),
            grace: default_depletion_grace(),
            min_samples: default_depletion_min_samples(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtendedTimeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_extended_threshold", rename = "threshold_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub threshold: Duration,
}

impl Default for ExtendedTimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_extended_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub dry_run: bool,
}

/// Logging output plus the persisted-state file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Atomically rewritten on every successful poll.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Rolling battery history mirror; best-effort, not a durability contract.
    #[serde(default = "default_battery_history_file")]
    pub battery_history_file: PathBuf,
    /// Sentinel present while a shutdown orchestration is in flight.
    #[serde(default = "default_shutdown_marker_file")]
    pub shutdown_marker_file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            state_file: default_state_file(),
            battery_history_file: default_battery_history_file(),
            shutdown_marker_file: default_shutdown_marker_file(),
        }
    }
}

/// Notification sink settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    /// Opaque sink URLs; delivery semantics are decided per URL by the dispatcher.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_send_timeout", rename = "send_timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub send_timeout: Duration,
    #[serde(default = "default_retry_interval", rename = "retry_interval_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_interval: Duration,
    /// Legacy single-webhook shape, folded into `urls` by [`AppConfig::normalize`].
    #[serde(default, rename = "discord", skip_serializing)]
    legacy_discord: Option<LegacyDiscordConfig>,
}

impl NotificationsConfig {
    pub fn enabled(&self) -> bool {
        !self.urls.is_empty()
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            title: None,
            avatar_url: None,
            send_timeout: default_send_timeout(),
            retry_interval: default_retry_interval(),
            legacy_discord: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LegacyDiscordConfig {
    #[serde(default)]
    webhook_url: String,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LegacyDockerConfig {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_container_stop_timeout", rename = "stop_timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    stop_timeout: Duration,
}

/// Stage A: libvirt guests.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Graceful-shutdown drain window before remaining guests are destroyed.
    #[serde(default = "default_vm_max_wait", rename = "max_wait_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_wait: Duration,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_wait: default_vm_max_wait(),
        }
    }
}

/// Container runtime selection for stage B.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Auto,
    Docker,
    Podman,
}

/// Stage B: container runtimes and compose projects.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainersConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub runtime: ContainerRuntime,
    #[serde(default = "default_container_stop_timeout", rename = "stop_timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stop_timeout: Duration,
    /// Compose projects stopped in order before any remaining containers.
    #[serde(default)]
    pub compose_files: Vec<ComposeFile>,
    #[serde(default = "default_true")]
    pub shutdown_all_remaining: bool,
    /// Podman only: also stop rootless containers of lingering users.
    #[serde(default)]
    pub include_user_containers: bool,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            runtime: ContainerRuntime::Auto,
            stop_timeout: default_container_stop_timeout(),
            compose_files: Vec::new(),
            shutdown_all_remaining: true,
            include_user_containers: false,
        }
    }
}

/// One compose project; either a bare path or `{ path, stop_timeout_s }`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "ComposeFileDe")]
pub struct ComposeFile {
    pub path: PathBuf,
    #[serde(rename = "stop_timeout_s")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub stop_timeout: Option<Duration>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ComposeFileDe {
    Bare(PathBuf),
    Detailed {
        path: PathBuf,
        #[serde(default, rename = "stop_timeout_s")]
        #[serde_as(as = "Option<DurationSeconds<u64>>")]
        stop_timeout: Option<Duration>,
    },
}

impl From<ComposeFileDe> for ComposeFile {
    fn from(value: ComposeFileDe) -> Self {
        match value {
            ComposeFileDe::Bare(path) => Self {
                path,
                stop_timeout: None,
            },
            ComposeFileDe::Detailed { path, stop_timeout } => Self { path, stop_timeout },
        }
    }
}

/// Stage C: sync and unmount settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemsConfig {
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    /// Post-sync settle window for battery-backed controller caches.
    #[serde(default = "default_sync_settle", rename = "sync_settle_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sync_settle: Duration,
    #[serde(default)]
    pub unmount: UnmountConfig,
}

impl Default for FilesystemsConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            sync_settle: default_sync_settle(),
            unmount: UnmountConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnmountConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_unmount_timeout", rename = "timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    #[serde(default)]
    pub mounts: Vec<MountPoint>,
}

impl Default for UnmountConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: default_unmount_timeout(),
            mounts: Vec::new(),
        }
    }
}

/// One unmount target; either a bare path or `{ path, flags }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "MountPointDe")]
pub struct MountPoint {
    pub path: PathBuf,
    /// Raw flags passed to `umount`, e.g. `-l` or `-f`.
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MountPointDe {
    Bare(PathBuf),
    Detailed {
        path: PathBuf,
        #[serde(default)]
        flags: MountFlagsDe,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(untagged)]
enum MountFlagsDe {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl From<MountPointDe> for MountPoint {
    fn from(value: MountPointDe) -> Self {
        match value {
            MountPointDe::Bare(path) => Self {
                path,
                flags: Vec::new(),
            },
            MountPointDe::Detailed { path, flags } => Self {
                path,
                flags: match flags {
                    MountFlagsDe::None => Vec::new(),
                    MountFlagsDe::One(s) => s.split_whitespace().map(str::to_owned).collect(),
                    MountFlagsDe::Many(v) => v,
                },
            },
        }
    }
}

/// Stage D: one remote host reached over SSH.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteServerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    pub user: String,
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default = "default_command_timeout", rename = "command_timeout_s")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
    #[serde(default = "default_remote_shutdown_command")]
    pub shutdown_command: String,
    /// Appended verbatim to every ssh invocation for this host.
    #[serde(default)]
    pub ssh_options: Vec<String>,
    /// `false` places the host in the strictly ordered sequential phase.
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub pre_shutdown_commands: Vec<PreShutdownCommand>,
}

impl RemoteServerConfig {
    /// Display label for log lines.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("remote server '{}' has no host", self.name));
        }
        if self.user.trim().is_empty() {
            return Err(anyhow!("remote server '{}' has no user", self.label()));
        }
        for command in &self.pre_shutdown_commands {
            if let PreShutdownStep::Predefined {
                action: PredefinedAction::StopCompose,
                path,
            } = &command.step
            {
                if path.is_none() {
                    return Err(anyhow!(
                        "remote server '{}': stop_compose action requires a path",
                        self.label()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Named remote pre-shutdown templates expanded to SSH-executed scripts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredefinedAction {
    StopContainers,
    StopVms,
    StopProxmoxVms,
    StopProxmoxCts,
    StopXcpngVms,
    StopEsxiVms,
    StopCompose,
    Sync,
}

/// One pre-shutdown step; either a raw command string, `{ command, timeout_s }`,
/// or `{ action, path?, timeout_s }`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "PreShutdownCommandDe")]
pub struct PreShutdownCommand {
    pub step: PreShutdownStep,
    #[serde(rename = "timeout_s")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum PreShutdownStep {
    Predefined {
        action: PredefinedAction,
        path: Option<PathBuf>,
    },
    Raw(String),
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PreShutdownCommandDe {
    Bare(String),
    Predefined {
        action: PredefinedAction,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default, rename = "timeout_s")]
        #[serde_as(as = "Option<DurationSeconds<u64>>")]
        timeout: Option<Duration>,
    },
    Raw {
        command: String,
        #[serde(default, rename = "timeout_s")]
        #[serde_as(as = "Option<DurationSeconds<u64>>")]
        timeout: Option<Duration>,
    },
}

impl From<PreShutdownCommandDe> for PreShutdownCommand {
    fn from(value: PreShutdownCommandDe) -> Self {
        match value {
            PreShutdownCommandDe::Bare(command) => Self {
                step: PreShutdownStep::Raw(command),
                timeout: None,
            },
            PreShutdownCommandDe::Predefined {
                action,
                path,
                timeout,
            } => Self {
                step: PreShutdownStep::Predefined { action, path },
                timeout,
            },
            PreShutdownCommandDe::Raw { command, timeout } => Self {
                step: PreShutdownStep::Raw(command),
                timeout,
            },
        }
    }
}

/// Stage F: the host's own shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalShutdownConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_local_shutdown_command")]
    pub command: String,
    #[serde(default = "default_local_shutdown_message")]
    pub message: Option<String>,
}

impl Default for LocalShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_local_shutdown_command(),
            message: default_local_shutdown_message(),
        }
    }
}
