//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Derived monitor state, edge events, and battery history."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! One [`StateTracker`] owns the derived power state for the single
//! monitored UPS. Each applied reading yields zero or more edge events;
//! repeats never re-fire. The rolling battery history kept here feeds the
//! depletion-rate estimator.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use upswatch_common::config::{DepletionConfig, UpsConfig};

use crate::nut::{FetchOutcome, StatusFlag, StatusFlags, UpsReading};

/// Derived power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedState {
    Unknown,
    Online,
    OnBattery,
    ShutdownArmed,
}

/// Power-quality regime, tracked for edge-triggered logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageRegime {
    Normal,
    Brownout,
    Surge,
    AvrBoost,
    AvrTrim,
    Bypass,
    Overload,
}

impl VoltageRegime {
    pub fn label(self) -> &'static str {
        match self {
            VoltageRegime::Normal => "NORMAL",
            VoltageRegime::Brownout => "BROWNOUT",
            VoltageRegime::Surge => "SURGE",
            VoltageRegime::AvrBoost => "AVR_BOOST",
            VoltageRegime::AvrTrim => "AVR_TRIM",
            VoltageRegime::Bypass => "BYPASS",
            VoltageRegime::Overload => "OVERLOAD",
        }
    }
}

/// Voltage warning thresholds, probed from the UPS at startup.
#[derive(Debug, Clone, Copy)]
pub struct VoltageThresholds {
    pub nominal: f64,
    pub warn_low: f64,
    pub warn_high: f64,
}

impl VoltageThresholds {
    pub const DEFAULT_NOMINAL: f64 = 230.0;
    /// Brownout factor applied when the UPS supplies no transfer points.
    pub const BROWNOUT_FACTOR: f64 = 0.76;
    /// Surge factor applied when the UPS supplies no transfer points.
    pub const SURGE_FACTOR: f64 = 1.20;
    /// Transfer points are widened toward nominal so warnings precede the
    /// actual transfer.
    pub const TRANSFER_MARGIN: f64 = 5.0;

    /// Derive thresholds from probed UPS variables, falling back to the
    /// nominal-voltage factors when the UPS reports no transfer points.
    pub fn from_probe(
        nominal: Option<f64>,
        transfer_low: Option<f64>,
        transfer_high: Option<f64>,
    ) -> Self {
        let nominal = nominal.unwrap_or(Self::DEFAULT_NOMINAL);
        let warn_low = transfer_low
            .map(|v| v + Self::TRANSFER_MARGIN)
            .unwrap_or(nominal * Self::BROWNOUT_FACTOR);
        let warn_high = transfer_high
            .map(|v| v - Self::TRANSFER_MARGIN)
            .unwrap_or(nominal * Self::SURGE_FACTOR);
        Self {
            nominal,
            warn_low,
            warn_high,
        }
    }
}

impl Default for VoltageThresholds {
    fn default() -> Self {
        Self::from_probe(None, None, None)
    }
}

/// Edge events raised by [`StateTracker::apply`]; consumed in production
/// order by the monitor loop.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    OnBattery {
        battery: Option<f64>,
        runtime: Option<u64>,
        load: Option<f64>,
    },
    PowerRestored {
        outage: Duration,
        battery: Option<f64>,
    },
    ConnectionLost {
        consecutive_stale: u32,
    },
    ConnectionRestored,
    RegimeEntered {
        regime: VoltageRegime,
        detail: String,
    },
    RegimeCleared {
        regime: VoltageRegime,
    },
    StatusChanged {
        from: String,
        to: String,
    },
}

/// Mutable monitor state; owned exclusively by the main task.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub derived: DerivedState,
    pub on_battery_since: Option<DateTime<Utc>>,
    pub consecutive_stale: u32,
    pub connection_lost: bool,
    /// Time-ordered (timestamp, battery %) samples bounded by the
    /// depletion window.
    pub history: VecDeque<(DateTime<Utc>, f64)>,
    pub last_status_flags: StatusFlags,
    /// Once set, never clears in-process.
    pub shutdown_armed: bool,
    pub last_voltage_regime: VoltageRegime,
    /// Latch for the once-per-outage "extended time disabled" notice.
    pub extended_time_logged: bool,
    last_ok_numerics: Option<[Option<u64>; 6]>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            derived: DerivedState::Unknown,
            on_battery_since: None,
            consecutive_stale: 0,
            connection_lost: false,
            history: VecDeque::new(),
            last_status_flags: StatusFlags::default(),
            shutdown_armed: false,
            last_voltage_regime: VoltageRegime::Normal,
            extended_time_logged: false,
            last_ok_numerics: None,
        }
    }

    /// Elapsed time on battery relative to `now`.
    pub fn time_on_battery(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.on_battery_since
            .map(|since| (now - since).to_std().unwrap_or_default())
    }
}

/// Converts raw readings into state updates and edge events.
#[derive(Debug)]
pub struct StateTracker {
    state: MonitorState,
    thresholds: VoltageThresholds,
    depletion_window: Duration,
    max_stale_tolerance: u32,
}

impl StateTracker {
    pub fn new(ups: &UpsConfig, depletion: &DepletionConfig) -> Self {
        Self {
            state: MonitorState::new(),
            thresholds: VoltageThresholds::default(),
            depletion_window: depletion.window,
            max_stale_tolerance: ups.max_stale_tolerance,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn thresholds(&self) -> VoltageThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: VoltageThresholds) {
        self.thresholds = thresholds;
    }

    /// Latch the shutdown-armed state; no further derived transitions occur.
    pub fn arm_shutdown(&mut self) {
        self.state.shutdown_armed = true;
        self.state.derived = DerivedState::ShutdownArmed;
    }

    /// Record that the extended-time-disabled notice was emitted this outage.
    pub fn note_extended_time_logged(&mut self) {
        self.state.extended_time_logged = true;
    }

    /// Apply one reading: update state, maintain history, emit edge events.
    pub fn apply(&mut self, reading: &UpsReading) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        if reading.fetch_outcome != FetchOutcome::Ok {
            self.bump_stale(&mut events);
            return events;
        }

        // Identical numeric payloads count toward staleness: a UPS that
        // answers with frozen data is as suspect as one that does not
        // answer at all.
        let numerics = reading.numeric_key();
        if self.state.last_ok_numerics.as_ref() == Some(&numerics) {
            self.bump_stale(&mut events);
        } else {
            self.state.consecutive_stale = 0;
            self.state.last_ok_numerics = Some(numerics);
            if self.state.connection_lost {
                self.state.connection_lost = false;
                events.push(MonitorEvent::ConnectionRestored);
            }
        }

        let raw = reading.status_flags.raw();
        let previous_raw = self.state.last_status_flags.raw();
        if !previous_raw.is_empty() && raw != previous_raw {
            events.push(MonitorEvent::StatusChanged {
                from: previous_raw,
                to: raw,
            });
        }

        self.apply_transition(reading, &mut events);
        self.maintain_history(reading);
        self.apply_regime(reading, &mut events);

        self.state.last_status_flags = reading.status_flags.clone();
        events
    }

    fn bump_stale(&mut self, events: &mut Vec<MonitorEvent>) {
        self.state.consecutive_stale = self.state.consecutive_stale.saturating_add(1);
        if self.state.consecutive_stale > self.max_stale_tolerance && !self.state.connection_lost {
            self.state.connection_lost = true;
            events.push(MonitorEvent::ConnectionLost {
                consecutive_stale: self.state.consecutive_stale,
            });
        }
    }

    fn apply_transition(&mut self, reading: &UpsReading, events: &mut Vec<MonitorEvent>) {
        let on_line = reading.has(&StatusFlag::OnLine);
        let on_battery = reading.has(&StatusFlag::OnBattery);

        match self.state.derived {
            DerivedState::Unknown => {
                if on_line && !on_battery {
                    self.state.derived = DerivedState::Online;
                } else {
                    self.enter_on_battery(reading, events);
                }
            }
            DerivedState::Online => {
                if on_battery {
                    self.enter_on_battery(reading, events);
                }
            }
            DerivedState::OnBattery => {
                if on_line && !on_battery {
                    let outage = self
                        .state
                        .time_on_battery(reading.fetched_at)
                        .unwrap_or_default();
                    self.state.derived = DerivedState::Online;
                    self.state.on_battery_since = None;
                    self.state.history.clear();
                    self.state.extended_time_logged = false;
                    events.push(MonitorEvent::PowerRestored {
                        outage,
                        battery: reading.battery_percent,
                    });
                }
            }
            DerivedState::ShutdownArmed => {}
        }
    }

    fn enter_on_battery(&mut self, reading: &UpsReading, events: &mut Vec<MonitorEvent>) {
        self.state.derived = DerivedState::OnBattery;
        self.state.on_battery_since = Some(reading.fetched_at);
        self.state.history.clear();
        self.state.extended_time_logged = false;
        events.push(MonitorEvent::OnBattery {
            battery: reading.battery_percent,
            runtime: reading.runtime_seconds,
            load: reading.load_percent,
        });
    }

    fn maintain_history(&mut self, reading: &UpsReading) {
        if self.state.derived != DerivedState::OnBattery {
            return;
        }
        let Some(percent) = reading.battery_percent else {
            return;
        };
        // Strict time ordering: drop out-of-order samples on the floor.
        if let Some((last, _)) = self.state.history.back() {
            if *last >= reading.fetched_at {
                return;
            }
        }
        self.state.history.push_back((reading.fetched_at, percent));
        let window = chrono::Duration::from_std(self.depletion_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = reading.fetched_at - window;
        while let Some((oldest, _)) = self.state.history.front() {
            if *oldest < cutoff {
                self.state.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn apply_regime(&mut self, reading: &UpsReading, events: &mut Vec<MonitorEvent>) {
        let regime = self.classify_regime(reading);
        if regime == self.state.last_voltage_regime {
            return;
        }
        let previous = self.state.last_voltage_regime;
        if previous != VoltageRegime::Normal {
            events.push(MonitorEvent::RegimeCleared { regime: previous });
        }
        if regime != VoltageRegime::Normal {
            events.push(MonitorEvent::RegimeEntered {
                regime,
                detail: self.regime_detail(regime, reading),
            });
        }
        self.state.last_voltage_regime = regime;
    }

    fn classify_regime(&self, reading: &UpsReading) -> VoltageRegime {
        if reading.has(&StatusFlag::Bypass) {
            return VoltageRegime::Bypass;
        }
        if reading.has(&StatusFlag::Overload) {
            return VoltageRegime::Overload;
        }
        if reading.has(&StatusFlag::Boost) {
            return VoltageRegime::AvrBoost;
        }
        if reading.has(&StatusFlag::Trim) {
            return VoltageRegime::AvrTrim;
        }
        // Input-voltage quality only means something on line power.
        if reading.has(&StatusFlag::OnLine) {
            if let Some(voltage) = reading.input_voltage {
                if voltage < self.thresholds.warn_low {
                    return VoltageRegime::Brownout;
                }
                if voltage > self.thresholds.warn_high {
                    return VoltageRegime::Surge;
                }
            }
        }
        VoltageRegime::Normal
    }

    fn regime_detail(&self, regime: VoltageRegime, reading: &UpsReading) -> String {
        let voltage = reading
            .input_voltage
            .map(|v| format!("{v}V"))
            .unwrap_or_else(|| "N/A".to_owned());
        match regime {
            VoltageRegime::Brownout => format!(
                "input voltage low: {voltage} (warning threshold {}V)",
                self.thresholds.warn_low
            ),
            VoltageRegime::Surge => format!(
                "input voltage high: {voltage} (warning threshold {}V)",
                self.thresholds.warn_high
            ),
            VoltageRegime::AvrBoost => format!("input voltage {voltage}; UPS boosting output"),
            VoltageRegime::AvrTrim => format!("input voltage {voltage}; UPS trimming output"),
            VoltageRegime::Bypass => "UPS in bypass mode; no protection active".to_owned(),
            VoltageRegime::Overload => format!(
                "UPS overload; load {}",
                reading
                    .load_percent
                    .map(|l| format!("{l}%"))
                    .unwrap_or_else(|| "N/A".to_owned())
            ),
            VoltageRegime::Normal => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nut::parse_upsc_output;
    use chrono::TimeZone;

    fn tracker() -> StateTracker {
        StateTracker::new(&UpsConfig::default(), &DepletionConfig::default())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reading(output: &str, secs: i64) -> UpsReading {
        parse_upsc_output(output, at(secs))
    }

    #[test]
    fn first_online_reading_settles_state() {
        let mut tracker = tracker();
        let events = tracker.apply(&reading("ups.status: OL CHRG\nbattery.charge: 100", 0));
        assert_eq!(tracker.state().derived, DerivedState::Online);
        assert!(events.is_empty());
    }

    #[test]
    fn power_failure_emits_on_battery_once() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100", 0));
        let events = tracker.apply(&reading(
            "ups.status: OB DISCHRG\nbattery.charge: 99\nbattery.runtime: 1700\nups.load: 30",
            1,
        ));
        assert_eq!(tracker.state().derived, DerivedState::OnBattery);
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::OnBattery {
                battery: Some(b),
                runtime: Some(1700),
                load: Some(l),
            } if *b == 99.0 && *l == 30.0
        )));

        let repeat = tracker.apply(&reading("ups.status: OB DISCHRG\nbattery.charge: 98", 2));
        assert!(!repeat
            .iter()
            .any(|e| matches!(e, MonitorEvent::OnBattery { .. })));
    }

    #[test]
    fn power_restore_reports_outage_duration_and_clears_history() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100", 0));
        tracker.apply(&reading("ups.status: OB DISCHRG\nbattery.charge: 100", 5));
        tracker.apply(&reading("ups.status: OB DISCHRG\nbattery.charge: 99", 20));
        assert!(!tracker.state().history.is_empty());

        let events = tracker.apply(&reading("ups.status: OL CHRG\nbattery.charge: 95", 35));
        let restored = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::PowerRestored { outage, .. } => Some(*outage),
                _ => None,
            })
            .expect("POWER_RESTORED event");
        assert_eq!(restored, Duration::from_secs(30));
        assert_eq!(tracker.state().derived, DerivedState::Online);
        assert!(tracker.state().history.is_empty());
        assert!(tracker.state().on_battery_since.is_none());
    }

    #[test]
    fn first_reading_without_ol_lands_on_battery() {
        let mut tracker = tracker();
        let events = tracker.apply(&reading("ups.status: OB DISCHRG\nbattery.charge: 80", 0));
        assert_eq!(tracker.state().derived, DerivedState::OnBattery);
        assert!(events
            .iter()
            .any(|e| matches!(e, MonitorEvent::OnBattery { .. })));
    }

    #[test]
    fn unreachable_readings_cross_tolerance_once() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100", 0));

        // Tolerance is 3: three stale polls stay quiet, the fourth fires.
        for i in 1..=3 {
            let events = tracker.apply(&UpsReading::unreachable(at(i)));
            assert!(events.is_empty(), "no event at stale count {i}");
        }
        let events = tracker.apply(&UpsReading::unreachable(at(4)));
        assert!(events
            .iter()
            .any(|e| matches!(e, MonitorEvent::ConnectionLost { consecutive_stale: 4 })));

        // Repeats stay silent until recovery.
        let events = tracker.apply(&UpsReading::unreachable(at(5)));
        assert!(events.is_empty());

        let events = tracker.apply(&reading("ups.status: OL\nbattery.charge: 99", 6));
        assert!(events
            .iter()
            .any(|e| matches!(e, MonitorEvent::ConnectionRestored)));
        assert_eq!(tracker.state().consecutive_stale, 0);
    }

    #[test]
    fn identical_numeric_payloads_count_as_stale() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100\nbattery.runtime: 1800", 0));
        for i in 1..=4 {
            tracker.apply(&reading(
                "ups.status: OL\nbattery.charge: 100\nbattery.runtime: 1800",
                i,
            ));
        }
        assert!(tracker.state().consecutive_stale > 3);
        assert!(tracker.state().connection_lost);
    }

    #[test]
    fn history_is_bounded_by_window_span() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OB\nbattery.charge: 100", 0));
        // Default window is 300 s; samples 400 s apart must evict the head.
        for i in 0..10 {
            let pct = 100 - i;
            tracker.apply(&reading(
                &format!("ups.status: OB\nbattery.charge: {pct}"),
                i as i64 * 50,
            ));
        }
        let state = tracker.state();
        let (oldest, _) = state.history.front().unwrap();
        let (newest, _) = state.history.back().unwrap();
        assert!((*newest - *oldest).to_std().unwrap() <= Duration::from_secs(300));
    }

    #[test]
    fn bypass_regime_fires_on_entry_and_exit() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100", 0));
        let events = tracker.apply(&reading("ups.status: OL BYPASS\nbattery.charge: 99", 1));
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::RegimeEntered {
                regime: VoltageRegime::Bypass,
                ..
            }
        )));

        let repeat = tracker.apply(&reading("ups.status: OL BYPASS\nbattery.charge: 98", 2));
        assert!(!repeat
            .iter()
            .any(|e| matches!(e, MonitorEvent::RegimeEntered { .. })));

        let events = tracker.apply(&reading("ups.status: OL\nbattery.charge: 97", 3));
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::RegimeCleared {
                regime: VoltageRegime::Bypass
            }
        )));
    }

    #[test]
    fn brownout_uses_probed_thresholds() {
        let mut tracker = tracker();
        tracker.set_thresholds(VoltageThresholds::from_probe(Some(230.0), None, None));
        tracker.apply(&reading("ups.status: OL\nbattery.charge: 100\ninput.voltage: 230", 0));
        // 0.76 * 230 = 174.8
        let events = tracker.apply(&reading(
            "ups.status: OL\nbattery.charge: 100\ninput.voltage: 170",
            1,
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::RegimeEntered {
                regime: VoltageRegime::Brownout,
                ..
            }
        )));
    }

    #[test]
    fn status_change_is_reported_with_context() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OL CHRG\nbattery.charge: 100", 0));
        let events = tracker.apply(&reading("ups.status: OL\nbattery.charge: 99", 1));
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::StatusChanged { from, to } if from == "OL CHRG" && to == "OL"
        )));
    }

    #[test]
    fn armed_state_never_transitions() {
        let mut tracker = tracker();
        tracker.apply(&reading("ups.status: OB\nbattery.charge: 15", 0));
        tracker.arm_shutdown();
        tracker.apply(&reading("ups.status: OL CHRG\nbattery.charge: 16", 1));
        assert_eq!(tracker.state().derived, DerivedState::ShutdownArmed);
        assert!(tracker.state().shutdown_armed);
    }

    #[test]
    fn transfer_points_win_over_factors() {
        let t = VoltageThresholds::from_probe(Some(230.0), Some(196.0), Some(253.0));
        assert_eq!(t.warn_low, 201.0);
        assert_eq!(t.warn_high, 248.0);

        let fallback = VoltageThresholds::from_probe(Some(230.0), None, None);
        assert!((fallback.warn_low - 174.8).abs() < 1e-9);
        assert!((fallback.warn_high - 276.0).abs() < 1e-9);
    }
}
