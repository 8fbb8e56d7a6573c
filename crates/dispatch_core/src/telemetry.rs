//! Periodic simulators for live case telemetry.
//!
//! Each simulator owns at most one repeating timer. Ticks mutate the case
//! through the controller, which reads the current value at fire time, so the
//! timer never needs re-arming when the value it drives changes.

use std::time::Duration;

use shared::domain::{AmbulanceRecord, CaseId, PositionUpdate};
use tracing::debug;

use crate::{
    case::{PendingWork, WorkKind},
    timer::{TimerHandle, TimerService},
};

/// Lowest ETA the countdown reports; the unit is "about to arrive", never overdue.
pub const ETA_FLOOR_MINUTES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorKind {
    EtaCountdown,
    CallClock,
}

impl SimulatorKind {
    fn work_kind(self) -> WorkKind {
        match self {
            SimulatorKind::EtaCountdown => WorkKind::EtaTick,
            SimulatorKind::CallClock => WorkKind::CallTick,
        }
    }
}

#[derive(Debug)]
pub struct Simulator {
    kind: SimulatorKind,
    interval: Duration,
    handle: Option<TimerHandle>,
}

impl Simulator {
    pub fn new(kind: SimulatorKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            handle: None,
        }
    }

    pub fn kind(&self) -> SimulatorKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.handle == Some(handle)
    }

    /// Arms the repeating tick. Returns `false` if this simulator is already running.
    pub fn start(&mut self, case_id: CaseId, timers: &mut TimerService<PendingWork>) -> bool {
        if self.handle.is_some_and(|handle| timers.is_armed(handle)) {
            debug!("telemetry: {:?} already running case={case_id}", self.kind);
            return false;
        }
        let work = PendingWork::new(case_id, self.kind.work_kind());
        self.handle = Some(timers.schedule_repeating(self.interval, work));
        debug!(
            "telemetry: started {:?} case={case_id} interval_ms={}",
            self.kind,
            self.interval.as_millis()
        );
        true
    }

    pub fn stop(&mut self, timers: &mut TimerService<PendingWork>) -> bool {
        match self.handle.take() {
            Some(handle) => timers.cancel(handle),
            None => false,
        }
    }
}

pub fn countdown_step(eta_minutes: u32) -> u32 {
    eta_minutes.saturating_sub(1).max(ETA_FLOOR_MINUTES)
}

/// Merges a feed report into the record. A reported ETA can only pull the
/// countdown down, never push it back up.
pub fn apply_position(record: &mut AmbulanceRecord, update: PositionUpdate) {
    if let Some(location) = update.location {
        record.location = location;
    }
    if let Some(distance_km) = update.distance_km {
        record.distance_km = distance_km;
    }
    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(eta_minutes) = update.eta_minutes {
        record.eta_minutes = record.eta_minutes.min(eta_minutes).max(ETA_FLOOR_MINUTES);
    }
}

#[cfg(test)]
#[path = "tests/telemetry_tests.rs"]
mod tests;
