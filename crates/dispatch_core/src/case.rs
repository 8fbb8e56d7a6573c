//! In-memory state of the one emergency case a controller owns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::{
    domain::{AmbulanceRecord, CallSession, CaseId, HospitalAssignment, Stage, TriageAssessment},
    protocol::{CaseFault, CaseSnapshot, FaultStep, StageTransition},
};

use crate::{
    config::DispatchSettings,
    error::DispatchError,
    telemetry::{Simulator, SimulatorKind},
    timer::TimerHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    RevealTriage,
    RevealHospitalMatch,
    EtaTick,
    CallTick,
}

/// Deferred work item carried by the timer service, tagged with its case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWork {
    pub case_id: CaseId,
    pub kind: WorkKind,
}

impl PendingWork {
    pub fn new(case_id: CaseId, kind: WorkKind) -> Self {
        Self { case_id, kind }
    }
}

pub fn is_workflow_edge(from: Stage, to: Stage) -> bool {
    matches!(
        (from, to),
        (Stage::Intake, Stage::Triage)
            | (Stage::Triage, Stage::HospitalMatch)
            | (Stage::HospitalMatch, Stage::AmbulanceDispatch)
            | (Stage::AmbulanceDispatch, Stage::VideoConsult)
            | (Stage::VideoConsult, Stage::AmbulanceDispatch)
    )
}

pub struct CaseState {
    pub(crate) id: CaseId,
    pub(crate) stage: Stage,
    pub(crate) processing: bool,
    pub(crate) submitted_at: DateTime<Utc>,
    submitted_offset: Duration,
    pub(crate) symptom_text: String,
    pub(crate) triage: Option<TriageAssessment>,
    pub(crate) hospital_match: Option<HospitalAssignment>,
    pub(crate) ambulance: Option<AmbulanceRecord>,
    pub(crate) call_session: Option<CallSession>,
    pub(crate) fault: Option<CaseFault>,
    pub(crate) transitions: Vec<StageTransition>,
    // Set once the matching sibling timer has fired.
    pub(crate) triage_released: bool,
    pub(crate) match_released: bool,
    pub(crate) triage_timer: Option<TimerHandle>,
    pub(crate) match_timer: Option<TimerHandle>,
    pub(crate) eta: Simulator,
    pub(crate) call_clock: Simulator,
}

impl CaseState {
    pub(crate) fn new(
        id: CaseId,
        symptom_text: String,
        submitted_at: DateTime<Utc>,
        submitted_offset: Duration,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            id,
            stage: Stage::Intake,
            processing: true,
            submitted_at,
            submitted_offset,
            symptom_text,
            triage: None,
            hospital_match: None,
            ambulance: None,
            call_session: None,
            fault: None,
            transitions: Vec::new(),
            triage_released: false,
            match_released: false,
            triage_timer: None,
            match_timer: None,
            eta: Simulator::new(SimulatorKind::EtaCountdown, settings.eta_tick()),
            call_clock: Simulator::new(SimulatorKind::CallClock, settings.call_tick()),
        }
    }

    pub fn id(&self) -> CaseId {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn symptom_text(&self) -> &str {
        &self.symptom_text
    }

    pub(crate) fn elapsed_ms(&self, now: Duration) -> u64 {
        now.saturating_sub(self.submitted_offset).as_millis() as u64
    }

    pub(crate) fn enter(
        &mut self,
        to: Stage,
        now: Duration,
    ) -> Result<StageTransition, DispatchError> {
        if !is_workflow_edge(self.stage, to) {
            return Err(DispatchError::InvalidTransition {
                stage: self.stage,
                operation: "enter_stage",
            });
        }
        let transition = StageTransition {
            from: self.stage,
            to,
            at_ms: self.elapsed_ms(now),
        };
        self.stage = to;
        self.transitions.push(transition);
        Ok(transition)
    }

    pub(crate) fn clear_fault(&mut self, step: FaultStep) {
        if self.fault.as_ref().is_some_and(|fault| fault.step == step) {
            self.fault = None;
        }
    }

    pub(crate) fn snapshot(&self, now: Duration) -> CaseSnapshot {
        CaseSnapshot {
            case_id: Some(self.id),
            stage: self.stage,
            processing: self.processing,
            submitted_at: Some(self.submitted_at),
            symptom_text: Some(self.symptom_text.clone()),
            triage: self.triage.clone(),
            hospital_match: self.hospital_match.clone(),
            ambulance: self.ambulance.clone(),
            call_session: self.call_session.clone(),
            fault: self.fault.clone(),
            transitions: self.transitions.clone(),
            elapsed_ms: self.elapsed_ms(now),
        }
    }
}
