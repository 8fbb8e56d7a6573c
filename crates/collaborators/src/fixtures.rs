//! Fixed-record collaborators for demos and tests.
//!
//! Each fixture answers every call with the record it was built with, so the
//! workflow can be driven end to end without any external service.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use shared::{
    domain::{
        AmbulanceId, AmbulanceRecord, AmbulanceStatus, Clinician, HospitalAssignment, MediaTrack,
        PositionUpdate, SessionHandle, Severity, TriageAssessment,
    },
    error::CollaboratorError,
};
use tokio::sync::Mutex;

use crate::{CollaboratorResult, DispatchFeed, HospitalMatcher, TelephonyProvider, TriageClassifier};

pub fn cardiac_assessment() -> TriageAssessment {
    TriageAssessment {
        category: "Cardiac Emergency".into(),
        severity: Severity::Critical,
        confidence_percent: 94,
        description: "Symptoms indicate potential cardiac event requiring immediate intervention"
            .into(),
    }
}

pub fn on_call_cardiologist() -> Clinician {
    Clinician {
        name: "Priya Sharma".into(),
        specialization: "Emergency Cardiologist".into(),
        experience_years: 12,
        rating: 4.8,
    }
}

pub fn nearest_cardiac_centre() -> HospitalAssignment {
    HospitalAssignment {
        facility: "KEM Hospital Mumbai".into(),
        address: "Parel, Mumbai, Maharashtra 400012".into(),
        distance_km: 2.4,
        eta_minutes: 8,
        clinician: on_call_cardiologist(),
        specializations: vec![
            "Cardiology".into(),
            "Emergency Medicine".into(),
            "Cardiac Surgery".into(),
        ],
        capacity: Some("Available - 3 ICU beds".into()),
        phone: Some("+91 22 2413 6051".into()),
    }
}

pub fn en_route_unit() -> AmbulanceRecord {
    AmbulanceRecord {
        ambulance_id: AmbulanceId("AMB-007".into()),
        driver: "Rajesh Kumar".into(),
        eta_minutes: 8,
        distance_km: 2.1,
        status: AmbulanceStatus::EnRoute,
        location: "Worli Sea Link, approaching Parel".into(),
        phone: Some("+91 98765 43210".into()),
    }
}

pub struct FixtureTriageClassifier {
    assessment: TriageAssessment,
}

impl FixtureTriageClassifier {
    pub fn new(assessment: TriageAssessment) -> Self {
        Self { assessment }
    }
}

impl Default for FixtureTriageClassifier {
    fn default() -> Self {
        Self::new(cardiac_assessment())
    }
}

#[async_trait]
impl TriageClassifier for FixtureTriageClassifier {
    async fn classify(&self, symptom_text: &str) -> CollaboratorResult<TriageAssessment> {
        if symptom_text.trim().is_empty() {
            return Err(CollaboratorError::ClassificationUnavailable(
                "no symptoms to classify".into(),
            ));
        }
        Ok(self.assessment.clone())
    }
}

pub struct FixtureHospitalMatcher {
    assignment: HospitalAssignment,
}

impl FixtureHospitalMatcher {
    pub fn new(assignment: HospitalAssignment) -> Self {
        Self { assignment }
    }
}

impl Default for FixtureHospitalMatcher {
    fn default() -> Self {
        Self::new(nearest_cardiac_centre())
    }
}

#[async_trait]
impl HospitalMatcher for FixtureHospitalMatcher {
    async fn match_facility(
        &self,
        _triage: &TriageAssessment,
    ) -> CollaboratorResult<HospitalAssignment> {
        Ok(self.assignment.clone())
    }
}

/// Dispatches a fixed unit and replays queued position reports, one per poll.
pub struct FixtureDispatchFeed {
    unit: AmbulanceRecord,
    positions: Mutex<VecDeque<PositionUpdate>>,
}

impl FixtureDispatchFeed {
    pub fn new(unit: AmbulanceRecord) -> Self {
        Self {
            unit,
            positions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_positions(unit: AmbulanceRecord, positions: Vec<PositionUpdate>) -> Self {
        Self {
            unit,
            positions: Mutex::new(positions.into()),
        }
    }
}

impl Default for FixtureDispatchFeed {
    fn default() -> Self {
        Self::new(en_route_unit())
    }
}

#[async_trait]
impl DispatchFeed for FixtureDispatchFeed {
    async fn dispatch(
        &self,
        _assignment: &HospitalAssignment,
    ) -> CollaboratorResult<AmbulanceRecord> {
        Ok(self.unit.clone())
    }

    async fn poll_position(
        &self,
        ambulance_id: &AmbulanceId,
    ) -> CollaboratorResult<Option<PositionUpdate>> {
        if *ambulance_id != self.unit.ambulance_id {
            return Err(CollaboratorError::DispatchUnavailable(format!(
                "unknown ambulance {ambulance_id}"
            )));
        }
        Ok(self.positions.lock().await.pop_front())
    }
}

/// Hands out sequential session handles and remembers which ones are live.
#[derive(Default)]
pub struct FixtureTelephonyProvider {
    next_session: AtomicU64,
    live: Mutex<Vec<SessionHandle>>,
}

impl FixtureTelephonyProvider {
    pub async fn live_sessions(&self) -> Vec<SessionHandle> {
        self.live.lock().await.clone()
    }
}

#[async_trait]
impl TelephonyProvider for FixtureTelephonyProvider {
    async fn start_session(&self, clinician: &Clinician) -> CollaboratorResult<SessionHandle> {
        let seq = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let slug = clinician.name.to_ascii_lowercase().replace(' ', "-");
        let handle = SessionHandle(format!("consult-{slug}-{seq}"));
        self.live.lock().await.push(handle.clone());
        Ok(handle)
    }

    async fn end_session(&self, handle: &SessionHandle) -> CollaboratorResult<()> {
        let mut live = self.live.lock().await;
        let before = live.len();
        live.retain(|existing| existing != handle);
        if live.len() == before {
            return Err(CollaboratorError::SessionUnavailable(format!(
                "session {handle} is not live"
            )));
        }
        Ok(())
    }

    async fn set_track_enabled(
        &self,
        handle: &SessionHandle,
        _track: MediaTrack,
        _enabled: bool,
    ) -> CollaboratorResult<()> {
        if !self.live.lock().await.contains(handle) {
            return Err(CollaboratorError::SessionUnavailable(format!(
                "session {handle} is not live"
            )));
        }
        Ok(())
    }
}
