//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "End-to-end trigger scenarios over tracker and evaluator."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Drives the state tracker and trigger evaluator through reading
//! sequences the way the monitor loop does, one simulated tick at a time.

use chrono::{DateTime, TimeZone, Utc};

use upswatch_common::config::{TriggersConfig, UpsConfig};
use upswatch_core::nut::{parse_upsc_output, UpsReading};
use upswatch_core::state::{DerivedState, MonitorEvent, StateTracker};
use upswatch_core::triggers::{evaluate, ShutdownCause};

struct Harness {
    tracker: StateTracker,
    ups: UpsConfig,
    triggers: TriggersConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_triggers(TriggersConfig::default())
    }

    fn with_triggers(triggers: TriggersConfig) -> Self {
        let ups = UpsConfig::default();
        Self {
            tracker: StateTracker::new(&ups, &triggers.depletion),
            ups,
            triggers,
        }
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tick(&mut self, output: &str, secs: i64) -> (Vec<MonitorEvent>, Option<ShutdownCause>) {
        let reading = parse_upsc_output(output, self.at(secs));
        self.step(reading)
    }

    fn tick_unreachable(&mut self, secs: i64) -> (Vec<MonitorEvent>, Option<ShutdownCause>) {
        self.step(UpsReading::unreachable(self.at(secs)))
    }

    fn step(&mut self, reading: UpsReading) -> (Vec<MonitorEvent>, Option<ShutdownCause>) {
        let events = self.tracker.apply(&reading);
        let verdict = evaluate(&reading, self.tracker.state(), &self.ups, &self.triggers);
        (events, verdict)
    }
}

fn online(battery: u32, runtime: u32) -> String {
    format!("ups.status: OL CHRG\nbattery.charge: {battery}\nbattery.runtime: {runtime}")
}

fn on_battery(battery: f64, runtime: u32) -> String {
    format!("ups.status: OB DISCHRG\nbattery.charge: {battery}\nbattery.runtime: {runtime}")
}

#[test]
fn normal_operation_never_triggers() {
    // S1: steady on-line readings, no events, no verdicts.
    let mut h = Harness::new();
    for i in 0..120 {
        let (_, verdict) = h.tick(&online(100, 1800 + i as u32), i);
        assert_eq!(verdict, None, "tick {i}");
    }
    assert_eq!(h.tracker.state().derived, DerivedState::Online);
}

#[test]
fn short_outage_restores_cleanly() {
    // S2: 30 s outage, then power back; history cleared, no shutdown.
    let mut h = Harness::new();
    h.tick(&online(100, 1800), 0);

    let (events, verdict) = h.tick(&on_battery(100.0, 1800), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, MonitorEvent::OnBattery { .. })));
    assert_eq!(verdict, None);

    for i in 2..31 {
        let (_, verdict) = h.tick(&on_battery(100.0 - i as f64 * 0.01, 1790), i);
        assert_eq!(verdict, None);
    }

    let (events, verdict) = h.tick(&online(95, 1500), 31);
    let outage = events
        .iter()
        .find_map(|e| match e {
            MonitorEvent::PowerRestored { outage, .. } => Some(*outage),
            _ => None,
        })
        .expect("POWER_RESTORED");
    assert_eq!(outage.as_secs(), 30);
    assert_eq!(verdict, None);
    assert!(h.tracker.state().history.is_empty());
}

#[test]
fn low_battery_fires_on_strict_threshold_crossing() {
    // S3: battery drains 30 -> 19; the trigger fires exactly below 20.
    let mut h = Harness::new();
    h.tick(&online(35, 3000), 0);

    let mut fired = None;
    for i in 0..12 {
        let battery = 30.0 - i as f64;
        let (_, verdict) = h.tick(&on_battery(battery, 2500), 1 + i * 5);
        if verdict.is_some() {
            fired = Some((battery, verdict.unwrap()));
            break;
        }
    }
    let (battery, cause) = fired.expect("low battery trigger");
    assert_eq!(battery, 19.0);
    assert!(matches!(
        cause,
        ShutdownCause::LowBattery { percent, threshold } if percent == 19.0 && threshold == 20.0
    ));
}

#[test]
fn battery_exactly_at_threshold_does_not_trigger() {
    let mut h = Harness::new();
    h.tick(&online(100, 3000), 0);
    let (_, verdict) = h.tick(&on_battery(20.0, 2500), 1);
    assert_eq!(verdict, None);
}

#[test]
fn runtime_exactly_at_threshold_does_not_trigger() {
    let mut h = Harness::new();
    h.tick(&online(100, 3000), 0);
    let (_, verdict) = h.tick(&on_battery(90.0, 600), 1);
    assert_eq!(verdict, None);

    let (_, verdict) = h.tick(&on_battery(89.0, 599), 2);
    assert!(matches!(
        verdict,
        Some(ShutdownCause::CriticalRuntime {
            runtime_seconds: 599,
            ..
        })
    ));
}

#[test]
fn fsd_overrides_everything() {
    // S4: FSD on the very first reading, battery high, still fires.
    let mut h = Harness::new();
    let (_, verdict) = h.tick("ups.status: OL FSD\nbattery.charge: 90\nbattery.runtime: 1800", 0);
    assert_eq!(verdict, Some(ShutdownCause::ForcedShutdown));
}

#[test]
fn failsafe_fires_after_tolerance_exceeded_on_battery() {
    // S5: connection lost while on battery; tolerance is 3.
    let mut h = Harness::new();
    h.tick(&online(100, 1800), 0);
    h.tick(&on_battery(95.0, 1700), 1);

    // Exactly at tolerance: not yet.
    for i in 0..3 {
        let (_, verdict) = h.tick_unreachable(2 + i);
        assert_eq!(verdict, None, "stale poll {}", i + 1);
    }
    // Strictly greater: fires.
    let (_, verdict) = h.tick_unreachable(5);
    assert!(matches!(
        verdict,
        Some(ShutdownCause::FailsafeConnectionLost {
            consecutive_stale: 4
        })
    ));
}

#[test]
fn failsafe_requires_on_battery_state() {
    let mut h = Harness::new();
    h.tick(&online(100, 1800), 0);
    for i in 1..=10 {
        let (_, verdict) = h.tick_unreachable(i);
        assert_eq!(verdict, None, "online stale poll {i}");
    }
}

#[test]
fn depletion_rate_respects_grace_and_min_samples() {
    // S6: brutal depletion from the start of the outage. With the default
    // 90 s grace the rule must stay quiet until past it, regardless of how
    // bad the rate looks.
    let mut h = Harness::new();
    h.tick(&online(100, 3000), 0);

    let mut first_fire = None;
    for i in 1..=120 {
        // 0.5 %/s is 30 %/min, double the 15 %/min threshold, while
        // staying above the 20 % low-battery floor and the runtime floor.
        let battery = 100.0 - i as f64 * 0.5;
        let (_, verdict) = h.tick(&on_battery(battery, 2500), i);
        if let Some(cause) = verdict {
            first_fire = Some((i, cause));
            break;
        }
    }
    let (tick, cause) = first_fire.expect("depletion trigger");
    assert!(matches!(cause, ShutdownCause::DepletionRate { .. }));
    // on_battery_since is t=1; grace is strict, so the earliest legal fire
    // is tick 92 (elapsed 91 s > 90 s).
    assert!(tick > 91, "fired at tick {tick}, inside the grace window");
}

#[test]
fn depletion_needs_min_samples() {
    let mut triggers = TriggersConfig::default();
    triggers.depletion.grace = std::time::Duration::from_secs(0);
    let mut h = Harness::with_triggers(triggers);
    h.tick(&online(100, 3000), 0);

    // 29 samples with a savage slope: still below min_samples (30).
    for i in 1..=29 {
        let battery = 100.0 - i as f64;
        let (_, verdict) = h.tick(&on_battery(battery.max(30.0), 2500), i);
        assert_eq!(verdict, None, "sample {i}");
    }
    // Sample 30 completes the window and the rule may fire.
    let (_, verdict) = h.tick(&on_battery(65.0, 2500), 30);
    assert!(matches!(verdict, Some(ShutdownCause::DepletionRate { .. })));
}

#[test]
fn extended_time_fires_when_enabled() {
    let mut triggers = TriggersConfig::default();
    triggers.extended_time.threshold = std::time::Duration::from_secs(60);
    let mut h = Harness::with_triggers(triggers);
    h.tick(&online(100, 3000), 0);
    h.tick(&on_battery(99.0, 2900), 1);

    // Exactly at the threshold: strict comparison, no fire.
    let (_, verdict) = h.tick(&on_battery(98.0, 2900), 61);
    assert_eq!(verdict, None);

    let (_, verdict) = h.tick(&on_battery(97.0, 2900), 62);
    assert!(matches!(verdict, Some(ShutdownCause::ExtendedTime { .. })));
}

#[test]
fn extended_time_disabled_never_fires() {
    let mut triggers = TriggersConfig::default();
    triggers.extended_time.enabled = false;
    triggers.extended_time.threshold = std::time::Duration::from_secs(60);
    let mut h = Harness::with_triggers(triggers);
    h.tick(&online(100, 3000), 0);
    h.tick(&on_battery(99.0, 2900), 1);
    for i in 2..300 {
        let (_, verdict) = h.tick(&on_battery(99.0 - i as f64 * 0.01, 2900), i);
        assert_eq!(verdict, None, "tick {i}");
    }
}

#[test]
fn evaluator_is_pure() {
    // Identical inputs, identical outputs, no matter how often asked.
    let mut h = Harness::new();
    h.tick(&online(100, 3000), 0);
    h.tick(&on_battery(15.0, 2500), 1);

    let reading = parse_upsc_output(&on_battery(15.0, 2500), h.at(2));
    let first = evaluate(&reading, h.tracker.state(), &h.ups, &h.triggers);
    for _ in 0..10 {
        let again = evaluate(&reading, h.tracker.state(), &h.ups, &h.triggers);
        assert_eq!(first, again);
    }
}

#[test]
fn non_ok_readings_only_ever_yield_failsafe() {
    // Property: for fetch_outcome != OK the evaluator returns NO_ACTION or
    // FAILSAFE_CONNECTION_LOST, never a battery-derived cause.
    let mut h = Harness::new();
    h.tick(&online(100, 1800), 0);
    h.tick(&on_battery(5.0, 10), 1); // would trigger LOW_BATTERY if OK

    let stale = UpsReading::stale(h.at(2));
    let (_, verdict) = h.step(stale);
    assert!(matches!(
        verdict,
        None | Some(ShutdownCause::FailsafeConnectionLost { .. })
    ));
}
