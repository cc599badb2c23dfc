//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Time formatting helpers shared across the workspace."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::time::Duration;

/// Render a duration for log and notification text: `45s`, `3m 10s`, `2h 05m`.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Same rendering for an optional seconds value, `N/A` when absent.
pub fn format_opt_seconds(seconds: Option<u64>) -> String {
    match seconds {
        Some(secs) => format_duration(Duration::from_secs(secs)),
        None => "N/A".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sub_minute() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn renders_minutes() {
        assert_eq!(format_duration(Duration::from_secs(190)), "3m 10s");
    }

    #[test]
    fn renders_hours_with_padded_minutes() {
        assert_eq!(format_duration(Duration::from_secs(7500)), "2h 05m");
    }

    #[test]
    fn absent_seconds_render_na() {
        assert_eq!(format_opt_seconds(None), "N/A");
        assert_eq!(format_opt_seconds(Some(90)), "1m 30s");
    }
}
