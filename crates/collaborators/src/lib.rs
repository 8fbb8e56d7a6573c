use async_trait::async_trait;
use shared::{
    domain::{
        AmbulanceId, AmbulanceRecord, Clinician, HospitalAssignment, MediaTrack, PositionUpdate,
        SessionHandle, TriageAssessment,
    },
    error::CollaboratorError,
};

pub mod fixtures;

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[async_trait]
pub trait TriageClassifier: Send + Sync {
    async fn classify(&self, symptom_text: &str) -> CollaboratorResult<TriageAssessment>;
}

#[async_trait]
pub trait HospitalMatcher: Send + Sync {
    async fn match_facility(
        &self,
        triage: &TriageAssessment,
    ) -> CollaboratorResult<HospitalAssignment>;
}

#[async_trait]
pub trait DispatchFeed: Send + Sync {
    async fn dispatch(&self, assignment: &HospitalAssignment) -> CollaboratorResult<AmbulanceRecord>;

    /// Latest position report for a dispatched unit, `None` when nothing changed.
    async fn poll_position(
        &self,
        ambulance_id: &AmbulanceId,
    ) -> CollaboratorResult<Option<PositionUpdate>>;
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn start_session(&self, clinician: &Clinician) -> CollaboratorResult<SessionHandle>;
    async fn end_session(&self, handle: &SessionHandle) -> CollaboratorResult<()>;
    async fn set_track_enabled(
        &self,
        handle: &SessionHandle,
        track: MediaTrack,
        enabled: bool,
    ) -> CollaboratorResult<()>;
}

pub struct MissingTriageClassifier;

#[async_trait]
impl TriageClassifier for MissingTriageClassifier {
    async fn classify(&self, _symptom_text: &str) -> CollaboratorResult<TriageAssessment> {
        Err(CollaboratorError::ClassificationUnavailable(
            "triage classifier is not configured".into(),
        ))
    }
}

pub struct MissingHospitalMatcher;

#[async_trait]
impl HospitalMatcher for MissingHospitalMatcher {
    async fn match_facility(
        &self,
        _triage: &TriageAssessment,
    ) -> CollaboratorResult<HospitalAssignment> {
        Err(CollaboratorError::NoFacilityAvailable(
            "hospital matcher is not configured".into(),
        ))
    }
}

pub struct MissingDispatchFeed;

#[async_trait]
impl DispatchFeed for MissingDispatchFeed {
    async fn dispatch(
        &self,
        _assignment: &HospitalAssignment,
    ) -> CollaboratorResult<AmbulanceRecord> {
        Err(CollaboratorError::DispatchUnavailable(
            "dispatch feed is not configured".into(),
        ))
    }

    async fn poll_position(
        &self,
        _ambulance_id: &AmbulanceId,
    ) -> CollaboratorResult<Option<PositionUpdate>> {
        Err(CollaboratorError::DispatchUnavailable(
            "dispatch feed is not configured".into(),
        ))
    }
}

pub struct MissingTelephonyProvider;

#[async_trait]
impl TelephonyProvider for MissingTelephonyProvider {
    async fn start_session(&self, _clinician: &Clinician) -> CollaboratorResult<SessionHandle> {
        Err(CollaboratorError::SessionUnavailable(
            "telephony provider is not configured".into(),
        ))
    }

    async fn end_session(&self, _handle: &SessionHandle) -> CollaboratorResult<()> {
        Err(CollaboratorError::SessionUnavailable(
            "telephony provider is not configured".into(),
        ))
    }

    async fn set_track_enabled(
        &self,
        _handle: &SessionHandle,
        _track: MediaTrack,
        _enabled: bool,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::SessionUnavailable(
            "telephony provider is not configured".into(),
        ))
    }
}
