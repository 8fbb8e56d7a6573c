use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AmbulanceRecord, CallSession, CaseId, HospitalAssignment, Stage, TriageAssessment},
    error::{CollaboratorError, ErrorReport},
};

/// Workflow step whose collaborator call failed and can be re-run with `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStep {
    Triage,
    HospitalMatch,
    AmbulanceDispatch,
    StartConsult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFault {
    pub step: FaultStep,
    pub error: CollaboratorError,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at_ms: u64,
}

/// Read-only view of the active case handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<CaseId>,
    pub stage: Stage,
    pub processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage: Option<TriageAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_match: Option<HospitalAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambulance: Option<AmbulanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_session: Option<CallSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<CaseFault>,
    #[serde(default)]
    pub transitions: Vec<StageTransition>,
    pub elapsed_ms: u64,
}

impl CaseSnapshot {
    pub fn is_idle(&self) -> bool {
        self.case_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CaseEvent {
    Submitted {
        case_id: CaseId,
    },
    StageChanged {
        case_id: CaseId,
        transition: StageTransition,
    },
    EtaUpdated {
        case_id: CaseId,
        eta_minutes: u32,
    },
    CallClockTick {
        case_id: CaseId,
        duration_seconds: u64,
    },
    Fault {
        case_id: CaseId,
        fault: CaseFault,
    },
    Disposed {
        case_id: CaseId,
    },
    Error(ErrorReport),
}
