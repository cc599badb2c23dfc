//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Pure shutdown-trigger evaluation over reading and state."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! [`evaluate`] is a pure function: no I/O, no clock reads, identical
//! inputs always produce identical output. First match wins, in the order
//! written here.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use upswatch_common::config::{TriggersConfig, UpsConfig};
use upswatch_common::time::format_duration;

use crate::nut::{StatusFlag, UpsReading};
use crate::state::{DerivedState, MonitorState};

/// Why the shutdown sequence is being started, with the triggering values.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownCause {
    /// The UPS itself asserted the forced-shutdown flag.
    ForcedShutdown,
    LowBattery {
        percent: f64,
        threshold: f64,
    },
    CriticalRuntime {
        runtime_seconds: u64,
        threshold: Duration,
    },
    DepletionRate {
        rate_pct_per_min: f64,
        threshold: f64,
    },
    ExtendedTime {
        on_battery: Duration,
        threshold: Duration,
    },
    /// Visibility into the UPS was lost while on battery; assume the worst.
    FailsafeConnectionLost {
        consecutive_stale: u32,
    },
}

impl ShutdownCause {
    /// Stable tag for logs and the shutdown marker file.
    pub fn tag(&self) -> &'static str {
        match self {
            ShutdownCause::ForcedShutdown => "FSD",
            ShutdownCause::LowBattery { .. } => "LOW_BATTERY",
            ShutdownCause::CriticalRuntime { .. } => "CRITICAL_RUNTIME",
            ShutdownCause::DepletionRate { .. } => "DEPLETION_RATE",
            ShutdownCause::ExtendedTime { .. } => "EXTENDED_TIME",
            ShutdownCause::FailsafeConnectionLost { .. } => "FAILSAFE_CONNECTION_LOST",
        }
    }

    /// Operator-facing reason text.
    pub fn describe(&self) -> String {
        match self {
            ShutdownCause::ForcedShutdown => {
                "UPS signalled FSD (forced shutdown) flag".to_owned()
            }
            ShutdownCause::LowBattery { percent, threshold } => {
                format!("battery charge {percent}% below threshold {threshold}%")
            }
            ShutdownCause::CriticalRuntime {
                runtime_seconds,
                threshold,
            } => format!(
                "runtime {} below threshold {}",
                format_duration(Duration::from_secs(*runtime_seconds)),
                format_duration(*threshold)
            ),
            ShutdownCause::DepletionRate {
                rate_pct_per_min,
                threshold,
            } => format!(
                "depletion rate {rate_pct_per_min:.2}%/min above threshold {threshold}%/min after grace period"
            ),
            ShutdownCause::ExtendedTime {
                on_battery,
                threshold,
            } => format!(
                "time on battery {} exceeded threshold {}",
                format_duration(*on_battery),
                format_duration(*threshold)
            ),
            ShutdownCause::FailsafeConnectionLost { consecutive_stale } => format!(
                "connection to UPS lost while on battery ({consecutive_stale} stale polls); assuming critical failure"
            ),
        }
    }
}

/// Evaluate one tick. Returns `None` for no action.
pub fn evaluate(
    reading: &UpsReading,
    state: &MonitorState,
    ups: &UpsConfig,
    triggers: &TriggersConfig,
) -> Option<ShutdownCause> {
    // 1. FSD overrides everything else on a valid reading.
    if reading.is_ok() && reading.has(&StatusFlag::ForcedShutdown) {
        return Some(ShutdownCause::ForcedShutdown);
    }

    // 2. Failsafe: sustained unreachability while on battery.
    if !reading.is_ok()
        && state.derived == DerivedState::OnBattery
        && state.consecutive_stale > ups.max_stale_tolerance
    {
        return Some(ShutdownCause::FailsafeConnectionLost {
            consecutive_stale: state.consecutive_stale,
        });
    }

    if !reading.is_ok() || state.derived != DerivedState::OnBattery {
        return None;
    }
    let now = reading.fetched_at;

    // 3a. Battery charge below threshold (strict).
    if let Some(percent) = reading.battery_percent {
        if percent < triggers.low_battery_percent {
            return Some(ShutdownCause::LowBattery {
                percent,
                threshold: triggers.low_battery_percent,
            });
        }
    }

    // 3b. Remaining runtime below threshold (strict).
    if let Some(runtime) = reading.runtime_seconds {
        if runtime < triggers.critical_runtime.as_secs() {
            return Some(ShutdownCause::CriticalRuntime {
                runtime_seconds: runtime,
                threshold: triggers.critical_runtime,
            });
        }
    }

    // 3c. Depletion rate, suspended during the post-outage grace window.
    if let Some(rate) = depletion_rate(&state.history, triggers.depletion.min_samples) {
        if rate > triggers.depletion.critical_rate {
            let elapsed = state.time_on_battery(now).unwrap_or_default();
            if elapsed > triggers.depletion.grace {
                return Some(ShutdownCause::DepletionRate {
                    rate_pct_per_min: rate,
                    threshold: triggers.depletion.critical_rate,
                });
            }
        }
    }

    // 3d. Extended time on battery.
    if triggers.extended_time.enabled {
        if let Some(elapsed) = extended_time_elapsed(state, triggers, now) {
            return Some(ShutdownCause::ExtendedTime {
                on_battery: elapsed,
                threshold: triggers.extended_time.threshold,
            });
        }
    }

    None
}

/// Observed battery decline in %/min over the rolling history, or `None`
/// when there are fewer than `min_samples` samples or no time span.
pub fn depletion_rate(
    history: &VecDeque<(DateTime<Utc>, f64)>,
    min_samples: usize,
) -> Option<f64> {
    if history.len() < min_samples {
        return None;
    }
    let (oldest_at, oldest_pct) = history.front()?;
    let (newest_at, newest_pct) = history.back()?;
    let span = (*newest_at - *oldest_at).num_milliseconds() as f64 / 1000.0;
    if span <= 0.0 {
        return None;
    }
    Some((oldest_pct - newest_pct) / span * 60.0)
}

/// Elapsed on-battery time once past the extended-time threshold,
/// independent of whether the rule is enabled. The monitor uses this for
/// the once-per-outage notice when the rule is configured off.
pub fn extended_time_elapsed(
    state: &MonitorState,
    triggers: &TriggersConfig,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let elapsed = state.time_on_battery(now)?;
    if elapsed > triggers.extended_time.threshold {
        Some(elapsed)
    } else {
        None
    }
}
