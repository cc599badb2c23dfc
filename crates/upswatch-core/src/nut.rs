//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "NUT polling and upsc output parsing."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! The `upsc` binary is the sole NUT interface: one invocation per tick,
//! its output parsed into a typed [`UpsReading`]. The poller is stateless
//! and never fails to its caller; connectivity problems are encoded in
//! [`FetchOutcome`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use upswatch_common::config::UpsConfig;

use crate::proc::{self, CommandOutcome};

/// Extra wall-clock allowance on top of the check interval for one poll.
pub const POLL_MARGIN: Duration = Duration::from_secs(2);

/// How the last poll went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Parsed output with `ups.status` present.
    Ok,
    /// The tool answered but NUT flagged the data as stale.
    Stale,
    /// The tool failed, timed out, or returned nothing usable.
    Unreachable,
}

/// One `ups.status` token. Unknown tokens are preserved but never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFlag {
    OnLine,
    OnBattery,
    Charging,
    Discharging,
    LowBattery,
    HighBattery,
    ForcedShutdown,
    Bypass,
    Overload,
    Calibration,
    Trim,
    Boost,
    ReplaceBattery,
    Off,
    Other(String),
}

impl StatusFlag {
    pub fn from_token(token: &str) -> Self {
        match token {
            "OL" => StatusFlag::OnLine,
            "OB" => StatusFlag::OnBattery,
            "CHRG" => StatusFlag::Charging,
            "DISCHRG" => StatusFlag::Discharging,
            "LB" => StatusFlag::LowBattery,
            "HB" => StatusFlag::HighBattery,
            "FSD" => StatusFlag::ForcedShutdown,
            "BYPASS" => StatusFlag::Bypass,
            "OVER" => StatusFlag::Overload,
            "CAL" => StatusFlag::Calibration,
            "TRIM" => StatusFlag::Trim,
            "BOOST" => StatusFlag::Boost,
            "RB" => StatusFlag::ReplaceBattery,
            "OFF" => StatusFlag::Off,
            other => StatusFlag::Other(other.to_owned()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            StatusFlag::OnLine => "OL",
            StatusFlag::OnBattery => "OB",
            StatusFlag::Charging => "CHRG",
            StatusFlag::Discharging => "DISCHRG",
            StatusFlag::LowBattery => "LB",
            StatusFlag::HighBattery => "HB",
            StatusFlag::ForcedShutdown => "FSD",
            StatusFlag::Bypass => "BYPASS",
            StatusFlag::Overload => "OVER",
            StatusFlag::Calibration => "CAL",
            StatusFlag::Trim => "TRIM",
            StatusFlag::Boost => "BOOST",
            StatusFlag::ReplaceBattery => "RB",
            StatusFlag::Off => "OFF",
            StatusFlag::Other(token) => token,
        }
    }
}

/// Ordered token set from `ups.status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFlags(Vec<StatusFlag>);

impl StatusFlags {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split_whitespace()
                .map(StatusFlag::from_token)
                .collect(),
        )
    }

    pub fn contains(&self, flag: &StatusFlag) -> bool {
        self.0.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-joined token string, as NUT reported it.
    pub fn raw(&self) -> String {
        self.0
            .iter()
            .map(StatusFlag::token)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Typed snapshot produced by one poll.
///
/// Invariant: a reading whose `fetch_outcome` is not [`FetchOutcome::Ok`]
/// carries no flags and no numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsReading {
    pub status_flags: StatusFlags,
    pub battery_percent: Option<f64>,
    pub runtime_seconds: Option<u64>,
    pub load_percent: Option<f64>,
    pub input_voltage: Option<f64>,
    pub output_voltage: Option<f64>,
    pub input_frequency: Option<f64>,
    pub nominal_voltage: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    pub fetch_outcome: FetchOutcome,
}

impl UpsReading {
    pub fn unreachable(fetched_at: DateTime<Utc>) -> Self {
        Self::empty(fetched_at, FetchOutcome::Unreachable)
    }

    pub fn stale(fetched_at: DateTime<Utc>) -> Self {
        Self::empty(fetched_at, FetchOutcome::Stale)
    }

    fn empty(fetched_at: DateTime<Utc>, fetch_outcome: FetchOutcome) -> Self {
        Self {
            status_flags: StatusFlags::default(),
            battery_percent: None,
            runtime_seconds: None,
            load_percent: None,
            input_voltage: None,
            output_voltage: None,
            input_frequency: None,
            nominal_voltage: None,
            fetched_at,
            fetch_outcome,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fetch_outcome == FetchOutcome::Ok
    }

    pub fn has(&self, flag: &StatusFlag) -> bool {
        self.status_flags.contains(flag)
    }

    /// Numeric payload used for identical-reading staleness detection.
    pub fn numeric_key(&self) -> [Option<u64>; 6] {
        [
            self.battery_percent.map(f64::to_bits),
            self.runtime_seconds,
            self.load_percent.map(f64::to_bits),
            self.input_voltage.map(f64::to_bits),
            self.output_voltage.map(f64::to_bits),
            self.input_frequency.map(f64::to_bits),
        ]
    }

    /// Re-emit the recognized fields in `key=value` form. Parsing the
    /// result yields an equivalent reading.
    pub fn to_nut_lines(&self) -> String {
        let mut lines = Vec::new();
        if !self.status_flags.is_empty() {
            lines.push(format!("ups.status={}", self.status_flags.raw()));
        }
        if let Some(value) = self.battery_percent {
            lines.push(format!("battery.charge={value}"));
        }
        if let Some(value) = self.runtime_seconds {
            lines.push(format!("battery.runtime={value}"));
        }
        if let Some(value) = self.load_percent {
            lines.push(format!("ups.load={value}"));
        }
        if let Some(value) = self.input_voltage {
            lines.push(format!("input.voltage={value}"));
        }
        if let Some(value) = self.nominal_voltage {
            lines.push(format!("input.voltage.nominal={value}"));
        }
        if let Some(value) = self.input_frequency {
            lines.push(format!("input.frequency={value}"));
        }
        if let Some(value) = self.output_voltage {
            lines.push(format!("output.voltage={value}"));
        }
        lines.join("\n")
    }
}

/// Parse raw `upsc` output into a reading.
///
/// Lines are `key=value` or `key: value` with whitespace trimmed; unknown
/// keys are ignored. Output missing both `ups.status` and `battery.charge`
/// is treated as unreachable. A present `ups.status` with absent numeric
/// fields is still a valid reading.
pub fn parse_upsc_output(output: &str, fetched_at: DateTime<Utc>) -> UpsReading {
    let mut reading = UpsReading::empty(fetched_at, FetchOutcome::Ok);
    let mut saw_status = false;
    let mut saw_charge = false;

    for line in output.lines() {
        let Some((key, value)) = split_kv(line) else {
            continue;
        };
        match key {
            "ups.status" => {
                saw_status = true;
                reading.status_flags = StatusFlags::parse(value);
            }
            "battery.charge" => {
                saw_charge = true;
                reading.battery_percent = parse_bounded(value, 0.0, 100.0);
            }
            "battery.runtime" => {
                reading.runtime_seconds = value.parse::<f64>().ok().and_then(|v| {
                    if v >= 0.0 {
                        Some(v as u64)
                    } else {
                        None
                    }
                });
            }
            "ups.load" => reading.load_percent = parse_bounded(value, 0.0, 100.0),
            "input.voltage" => reading.input_voltage = value.parse().ok(),
            "input.voltage.nominal" => reading.nominal_voltage = value.parse().ok(),
            "input.frequency" => reading.input_frequency = value.parse().ok(),
            "output.voltage" => reading.output_voltage = value.parse().ok(),
            _ => {}
        }
    }

    if !saw_status && !saw_charge {
        return UpsReading::unreachable(fetched_at);
    }
    reading
}

fn split_kv(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line
        .split_once(':')
        .or_else(|| line.split_once('='))?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn parse_bounded(value: &str, min: f64, max: f64) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| (min..=max).contains(v))
}

/// Stateless poller wrapping the external `upsc` binary.
#[derive(Debug, Clone)]
pub struct UpsClient {
    name: String,
    deadline: Duration,
}

impl UpsClient {
    pub fn new(config: &UpsConfig) -> Self {
        Self {
            name: config.name.clone(),
            deadline: config.check_interval + POLL_MARGIN,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One poll; never fails. Launch failures, timeouts, and empty output
    /// all become [`FetchOutcome::Unreachable`].
    pub async fn poll(&self) -> UpsReading {
        let now = Utc::now();
        let outcome = proc::run("upsc", &[self.name.as_str()], self.deadline).await;
        match outcome {
            CommandOutcome::Completed { code: 0, stdout, stderr } => {
                if stdout.contains("Data stale") || stderr.contains("Data stale") {
                    return UpsReading::stale(now);
                }
                if stdout.trim().is_empty() {
                    return UpsReading::unreachable(now);
                }
                parse_upsc_output(&stdout, now)
            }
            CommandOutcome::Completed { stderr, .. } => {
                if stderr.contains("Data stale") {
                    UpsReading::stale(now)
                } else {
                    UpsReading::unreachable(now)
                }
            }
            CommandOutcome::TimedOut | CommandOutcome::LaunchFailed(_) => {
                UpsReading::unreachable(now)
            }
        }
    }

    /// Query a single variable, e.g. `input.transfer.low`.
    pub async fn query_var(&self, variable: &str) -> Option<String> {
        let outcome = proc::run("upsc", &[self.name.as_str(), variable], self.deadline).await;
        if outcome.success() {
            let value = outcome.stdout().trim().to_owned();
            if !value.is_empty() {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "battery.charge: 100\n\
                          battery.runtime: 1800\n\
                          input.voltage: 231.3\n\
                          input.voltage.nominal: 230\n\
                          input.frequency: 50.0\n\
                          output.voltage: 230.9\n\
                          ups.load: 23\n\
                          ups.status: OL CHRG\n\
                          ups.beeper.status: enabled\n";

    #[test]
    fn parses_full_output() {
        let reading = parse_upsc_output(SAMPLE, Utc::now());
        assert!(reading.is_ok());
        assert_eq!(reading.battery_percent, Some(100.0));
        assert_eq!(reading.runtime_seconds, Some(1800));
        assert_eq!(reading.load_percent, Some(23.0));
        assert_eq!(reading.input_voltage, Some(231.3));
        assert_eq!(reading.nominal_voltage, Some(230.0));
        assert!(reading.has(&StatusFlag::OnLine));
        assert!(reading.has(&StatusFlag::Charging));
        assert!(!reading.has(&StatusFlag::OnBattery));
    }

    #[test]
    fn key_equals_value_form_is_accepted() {
        let reading = parse_upsc_output("ups.status=OB DISCHRG\nbattery.charge=42", Utc::now());
        assert!(reading.is_ok());
        assert!(reading.has(&StatusFlag::OnBattery));
        assert_eq!(reading.battery_percent, Some(42.0));
    }

    #[test]
    fn unknown_tokens_are_preserved() {
        let reading = parse_upsc_output("ups.status: OL TEST FUTUREFLAG", Utc::now());
        let raw = reading.status_flags.raw();
        assert_eq!(raw, "OL TEST FUTUREFLAG");
        assert!(reading
            .status_flags
            .contains(&StatusFlag::Other("TEST".to_owned())));
    }

    #[test]
    fn output_without_status_or_charge_is_unreachable() {
        let reading = parse_upsc_output("ups.beeper.status: enabled", Utc::now());
        assert_eq!(reading.fetch_outcome, FetchOutcome::Unreachable);
        assert!(reading.numeric_key().iter().all(Option::is_none));
    }

    #[test]
    fn status_without_numerics_is_ok() {
        let reading = parse_upsc_output("ups.status: OL", Utc::now());
        assert!(reading.is_ok());
        assert_eq!(reading.battery_percent, None);
        assert_eq!(reading.runtime_seconds, None);
    }

    #[test]
    fn out_of_range_percentages_are_dropped() {
        let reading = parse_upsc_output("ups.status: OL\nbattery.charge: 130\nups.load: -5", Utc::now());
        assert_eq!(reading.battery_percent, None);
        assert_eq!(reading.load_percent, None);
    }

    #[test]
    fn kv_round_trip_preserves_recognized_fields() {
        let original = parse_upsc_output(SAMPLE, Utc::now());
        let reparsed = parse_upsc_output(&original.to_nut_lines(), original.fetched_at);
        assert_eq!(original, reparsed);
    }

    #[test]
    fn fsd_and_ol_together_do_not_panic() {
        let reading = parse_upsc_output("ups.status: OL FSD\nbattery.charge: 90", Utc::now());
        assert!(reading.has(&StatusFlag::OnLine));
        assert!(reading.has(&StatusFlag::ForcedShutdown));
    }
}
