//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Atomic state file, battery history mirror, and shutdown marker."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};

use crate::nut::UpsReading;
use crate::triggers::ShutdownCause;

/// Write `contents` at `path` via a temp file and rename, so readers never
/// observe a half-written file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .with_context(|| format!("unable to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("unable to move {} into place", path.display()))?;
    Ok(())
}

fn render_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Current-status file, rewritten atomically on every successful poll.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn write(&self, reading: &UpsReading) -> Result<()> {
        let mut contents = String::new();
        let _ = writeln!(contents, "STATUS={}", reading.status_flags.raw());
        let _ = writeln!(contents, "BATTERY={}", render_opt(reading.battery_percent));
        let _ = writeln!(contents, "RUNTIME={}", render_opt(reading.runtime_seconds));
        let _ = writeln!(contents, "LOAD={}", render_opt(reading.load_percent));
        let _ = writeln!(
            contents,
            "INPUT_VOLTAGE={}",
            render_opt(reading.input_voltage)
        );
        let _ = writeln!(
            contents,
            "OUTPUT_VOLTAGE={}",
            render_opt(reading.output_voltage)
        );
        let _ = writeln!(
            contents,
            "TIMESTAMP={}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        write_atomic(&self.path, &contents)
    }
}

/// Battery-history mirror as `unix_ts:percent` lines. Best-effort; the
/// authoritative history lives in memory.
#[derive(Debug, Clone)]
pub struct BatteryHistoryFile {
    path: PathBuf,
}

impl BatteryHistoryFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn truncate(&self) -> Result<()> {
        fs::write(&self.path, "")
            .with_context(|| format!("unable to truncate {}", self.path.display()))
    }

    pub fn write(&self, history: &VecDeque<(DateTime<Utc>, f64)>) -> Result<()> {
        let mut contents = String::new();
        for (at, percent) in history {
            let _ = writeln!(contents, "{}:{}", at.timestamp(), percent);
        }
        write_atomic(&self.path, &contents)
    }
}

/// Sentinel present while a shutdown orchestration is in flight. Written
/// before any side effect; its presence at startup is informational only.
#[derive(Debug, Clone)]
pub struct ShutdownMarker {
    path: PathBuf,
}

impl ShutdownMarker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arm(&self, cause: &ShutdownCause) -> Result<()> {
        let contents = format!(
            "cause={}\narmed_at={}\n",
            cause.tag(),
            Utc::now().to_rfc3339()
        );
        fs::write(&self.path, contents)
            .with_context(|| format!("unable to write {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("unable to remove {}", self.path.display()))
            }
        }
    }
}
