//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Decision and orchestration engine for the upswatch daemon."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Core engine for the upswatch daemon: NUT polling, derived-state
//! tracking, pure trigger evaluation, and the staged shutdown
//! orchestrator.

pub mod monitor;
pub mod nut;
pub mod persist;
pub mod proc;
pub mod shutdown;
pub mod state;
pub mod triggers;

pub use monitor::{MonitorExit, UpsMonitor};
pub use nut::{parse_upsc_output, FetchOutcome, StatusFlag, StatusFlags, UpsClient, UpsReading};
pub use persist::{BatteryHistoryFile, ShutdownMarker, StateFile};
pub use shutdown::{Orchestrator, ShutdownReport, Stage, StageOutcome};
pub use state::{
    DerivedState, MonitorEvent, MonitorState, StateTracker, VoltageRegime, VoltageThresholds,
};
pub use triggers::{depletion_rate, evaluate, ShutdownCause};
