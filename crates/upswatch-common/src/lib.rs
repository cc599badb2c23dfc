//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Shared primitives and utilities for the upswatch workspace."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Shared primitives for the upswatch daemon workspace.
//! This crate exposes configuration loading, logging setup, and time
//! formatting utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BehaviorConfig, ComposeFile, ContainerRuntime, ContainersConfig, DepletionConfig,
    ExtendedTimeConfig, FilesystemsConfig, LocalShutdownConfig, LoggingConfig, MountPoint,
    NotificationsConfig, PreShutdownCommand, PreShutdownStep, PredefinedAction,
    RemoteServerConfig, TriggersConfig, UnmountConfig, UpsConfig, VmConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{format_duration, format_opt_seconds};
