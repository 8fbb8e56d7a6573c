use super::*;

use std::sync::Arc;

use async_trait::async_trait;
use collaborators::{
    fixtures::{
        cardiac_assessment, en_route_unit, FixtureDispatchFeed, FixtureTelephonyProvider,
    },
    CollaboratorResult, MissingHospitalMatcher, TelephonyProvider, TriageClassifier,
};
use shared::domain::{
    AmbulanceStatus, Clinician, PositionUpdate, SessionHandle, TriageAssessment,
};
use tokio::sync::Mutex;

const SYMPTOMS: &str = "Severe chest pain, difficulty breathing, sweating";

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn fixture_controller() -> WorkflowController {
    WorkflowController::new(DispatchSettings::default(), Collaborators::fixtures())
}

async fn dispatched_controller(collaborators: Collaborators) -> WorkflowController {
    let mut controller = WorkflowController::new(DispatchSettings::default(), collaborators);
    controller.submit(SYMPTOMS).expect("submit");
    controller.advance(ms(4000)).await;
    assert_eq!(controller.stage(), Stage::AmbulanceDispatch);
    controller
}

struct CountingClassifier {
    failures_left: Mutex<u32>,
    calls: Arc<Mutex<u32>>,
}

impl CountingClassifier {
    fn failing_first(failures: u32) -> Self {
        Self {
            failures_left: Mutex::new(failures),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl TriageClassifier for CountingClassifier {
    async fn classify(&self, _symptom_text: &str) -> CollaboratorResult<TriageAssessment> {
        *self.calls.lock().await += 1;
        let mut failures_left = self.failures_left.lock().await;
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(CollaboratorError::ClassificationUnavailable(
                "inference backend timed out".into(),
            ));
        }
        Ok(cardiac_assessment())
    }
}

struct FlakyTelephony {
    start_failures_left: Mutex<u32>,
    inner: Arc<FixtureTelephonyProvider>,
}

#[async_trait]
impl TelephonyProvider for FlakyTelephony {
    async fn start_session(&self, clinician: &Clinician) -> CollaboratorResult<SessionHandle> {
        let mut failures_left = self.start_failures_left.lock().await;
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(CollaboratorError::SessionUnavailable(
                "video bridge is busy".into(),
            ));
        }
        self.inner.start_session(clinician).await
    }

    async fn end_session(&self, handle: &SessionHandle) -> CollaboratorResult<()> {
        self.inner.end_session(handle).await
    }

    async fn set_track_enabled(
        &self,
        handle: &SessionHandle,
        track: MediaTrack,
        enabled: bool,
    ) -> CollaboratorResult<()> {
        self.inner.set_track_enabled(handle, track, enabled).await
    }
}

#[tokio::test]
async fn submission_reaches_dispatch_after_both_sibling_delays() {
    let mut controller = fixture_controller();
    let case_id = controller.submit(SYMPTOMS).expect("submit");

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.case_id, Some(case_id));
    assert_eq!(snapshot.stage, Stage::Intake);
    assert!(snapshot.processing);
    assert_eq!(snapshot.symptom_text.as_deref(), Some(SYMPTOMS));
    assert_eq!(controller.armed_timers(), 2);

    controller.advance(ms(1999)).await;
    assert_eq!(controller.stage(), Stage::Intake);
    assert!(controller.snapshot().triage.is_none());

    controller.advance(ms(1)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::Triage);
    assert!(!snapshot.processing);
    assert_eq!(snapshot.triage, Some(cardiac_assessment()));
    assert!(snapshot.hospital_match.is_none());

    controller.advance(ms(2000)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::AmbulanceDispatch);
    assert!(snapshot.triage.is_some());
    assert!(snapshot.hospital_match.is_some());
    assert_eq!(
        snapshot.ambulance.as_ref().map(|unit| unit.eta_minutes),
        Some(8)
    );

    let edges: Vec<_> = snapshot
        .transitions
        .iter()
        .map(|transition| (transition.from, transition.to, transition.at_ms))
        .collect();
    assert_eq!(
        edges,
        vec![
            (Stage::Intake, Stage::Triage, 2000),
            (Stage::Triage, Stage::HospitalMatch, 4000),
            (Stage::HospitalMatch, Stage::AmbulanceDispatch, 4000),
        ]
    );
    assert_eq!(controller.leaked_timer_fires(), 0);
}

#[tokio::test]
async fn blank_symptoms_are_rejected_without_side_effects() {
    let mut controller = fixture_controller();

    for text in ["", "   ", "\n\t"] {
        assert_eq!(controller.submit(text), Err(DispatchError::InvalidInput));
    }

    assert_eq!(controller.stage(), Stage::Intake);
    assert!(controller.snapshot().is_idle());
    assert_eq!(controller.armed_timers(), 0);
    assert_eq!(controller.advance(ms(10_000)).await, 0);
}

#[tokio::test]
async fn second_submission_is_rejected_while_a_case_is_active() {
    let mut controller = fixture_controller();
    let case_id = controller.submit(SYMPTOMS).expect("submit");

    assert_eq!(
        controller.submit("Head injury from fall"),
        Err(DispatchError::CaseAlreadyActive(case_id))
    );
    assert_eq!(controller.armed_timers(), 2);
}

#[tokio::test]
async fn match_reveal_is_not_chained_off_triage_completion() {
    let classifier = Arc::new(CountingClassifier::failing_first(0));
    let calls = Arc::clone(&classifier.calls);
    let settings = DispatchSettings {
        triage_delay_ms: 3000,
        hospital_match_delay_ms: 2000,
        ..DispatchSettings::default()
    };
    let mut controller = WorkflowController::new(
        settings,
        Collaborators::fixtures().with_classifier(classifier),
    );
    controller.submit(SYMPTOMS).expect("submit");

    controller.advance(ms(2000)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::AmbulanceDispatch);
    assert!(snapshot.triage.is_some());
    assert_eq!(snapshot.transitions.len(), 3);
    assert!(snapshot.transitions.iter().all(|t| t.at_ms == 2000));

    controller.advance(ms(1000)).await;
    assert_eq!(controller.stage(), Stage::AmbulanceDispatch);
    assert_eq!(controller.snapshot().transitions.len(), 3);
    assert_eq!(*calls.lock().await, 1);
    assert_eq!(controller.leaked_timer_fires(), 0);
}

#[tokio::test]
async fn coinciding_reveals_settle_in_dispatch_with_one_classification() {
    let classifier = Arc::new(CountingClassifier::failing_first(0));
    let calls = Arc::clone(&classifier.calls);
    let settings = DispatchSettings {
        triage_delay_ms: 2000,
        hospital_match_delay_ms: 2000,
        ..DispatchSettings::default()
    };
    let mut controller = WorkflowController::new(
        settings,
        Collaborators::fixtures().with_classifier(classifier),
    );
    controller.submit(SYMPTOMS).expect("submit");

    controller.advance(ms(1999)).await;
    assert_eq!(controller.stage(), Stage::Intake);

    assert_eq!(controller.advance(ms(1)).await, 2);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::AmbulanceDispatch);
    assert!(snapshot.triage.is_some() && snapshot.hospital_match.is_some());
    assert_eq!(*calls.lock().await, 1);
}

#[tokio::test]
async fn eta_countdown_ticks_down_to_the_floor_on_one_stream() {
    let mut controller = dispatched_controller(Collaborators::fixtures()).await;
    let eta = |controller: &WorkflowController| {
        controller
            .snapshot()
            .ambulance
            .map(|unit| unit.eta_minutes)
            .expect("ambulance")
    };
    assert_eq!(eta(&controller), 8);
    assert_eq!(controller.running_simulators(), 1);

    controller.advance(ms(10_000)).await;
    assert_eq!(eta(&controller), 7);

    for _ in 0..6 {
        controller.advance(ms(10_000)).await;
        assert_eq!(controller.running_simulators(), 1);
    }
    assert_eq!(eta(&controller), 1);

    controller.advance(ms(10_000)).await;
    assert_eq!(eta(&controller), 1);
    assert_eq!(controller.running_simulators(), 1);
    assert_eq!(controller.armed_timers(), 1);
}

#[tokio::test]
async fn starting_the_countdown_again_is_a_no_op() {
    let mut controller = dispatched_controller(Collaborators::fixtures()).await;

    assert_eq!(controller.ensure_eta_countdown(), Ok(false));
    assert_eq!(controller.ensure_eta_countdown(), Ok(false));
    assert_eq!(controller.running_simulators(), 1);

    controller.advance(ms(10_000)).await;
    assert_eq!(
        controller.snapshot().ambulance.map(|unit| unit.eta_minutes),
        Some(7)
    );
}

#[tokio::test]
async fn countdown_cannot_start_before_dispatch() {
    let mut controller = fixture_controller();
    assert_eq!(
        controller.ensure_eta_countdown(),
        Err(DispatchError::NoActiveCase)
    );

    controller.submit(SYMPTOMS).expect("submit");
    assert!(matches!(
        controller.ensure_eta_countdown(),
        Err(DispatchError::InvalidTransition {
            stage: Stage::Intake,
            ..
        })
    ));
}

#[tokio::test]
async fn consult_round_trip_is_repeatable_and_restarts_the_clock() {
    let telephony = Arc::new(FixtureTelephonyProvider::default());
    let collaborators = Collaborators::fixtures().with_telephony(telephony.clone());
    let mut controller = dispatched_controller(collaborators).await;

    for _ in 0..3 {
        controller.request_video_consult().await.expect("consult");
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.stage, Stage::VideoConsult);
        let call = snapshot.call_session.expect("call session");
        assert!(call.active);
        assert_eq!(call.duration_seconds, 0);
        assert_eq!(call.clinician.name, "Priya Sharma");
        assert_eq!(telephony.live_sessions().await.len(), 1);
        assert_eq!(controller.running_simulators(), 2);

        controller.advance(ms(3000)).await;
        assert_eq!(
            controller
                .snapshot()
                .call_session
                .map(|call| call.duration_seconds),
            Some(3)
        );

        controller.end_call().await.expect("end call");
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.stage, Stage::AmbulanceDispatch);
        assert!(snapshot.call_session.is_none());
        assert!(telephony.live_sessions().await.is_empty());
        assert_eq!(controller.running_simulators(), 1);
    }
}

#[tokio::test]
async fn call_clock_starts_from_the_configured_offset() {
    let settings = DispatchSettings {
        call_duration_offset_seconds: 154,
        ..DispatchSettings::default()
    };
    let mut controller = WorkflowController::new(settings, Collaborators::fixtures());
    controller.submit(SYMPTOMS).expect("submit");
    controller.advance(ms(4000)).await;

    controller.request_video_consult().await.expect("consult");
    let call = controller.snapshot().call_session.expect("call");
    assert_eq!(call.formatted_duration(), "02:34");

    controller.advance(ms(1000)).await;
    let call = controller.snapshot().call_session.expect("call");
    assert_eq!(call.duration_seconds, 155);
}

#[tokio::test]
async fn ambulance_countdown_keeps_running_during_a_consult() {
    let mut controller = dispatched_controller(Collaborators::fixtures()).await;
    controller.request_video_consult().await.expect("consult");

    controller.advance(ms(20_000)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::VideoConsult);
    assert_eq!(snapshot.ambulance.map(|unit| unit.eta_minutes), Some(6));
    assert_eq!(snapshot.call_session.map(|call| call.duration_seconds), Some(20));

    controller.end_call().await.expect("end call");
    controller.advance(ms(10_000)).await;
    assert_eq!(
        controller.snapshot().ambulance.map(|unit| unit.eta_minutes),
        Some(5)
    );
}

#[tokio::test]
async fn user_triggered_edges_are_rejected_from_other_stages() {
    let mut controller = fixture_controller();
    assert_eq!(
        controller.request_video_consult().await,
        Err(DispatchError::NoActiveCase)
    );
    assert_eq!(controller.end_call().await, Err(DispatchError::NoActiveCase));

    controller.submit(SYMPTOMS).expect("submit");
    assert!(matches!(
        controller.request_video_consult().await,
        Err(DispatchError::InvalidTransition {
            stage: Stage::Intake,
            operation: "request_video_consult",
        })
    ));

    controller.advance(ms(4000)).await;
    assert!(matches!(
        controller.end_call().await,
        Err(DispatchError::InvalidTransition {
            stage: Stage::AmbulanceDispatch,
            ..
        })
    ));
    assert!(matches!(
        controller.toggle_microphone().await,
        Err(DispatchError::InvalidTransition { .. })
    ));
    assert_eq!(controller.stage(), Stage::AmbulanceDispatch);
}

#[tokio::test]
async fn media_toggles_flip_the_call_flags() {
    let mut controller = dispatched_controller(Collaborators::fixtures()).await;
    controller.request_video_consult().await.expect("consult");

    assert_eq!(controller.toggle_microphone().await, Ok(false));
    assert_eq!(controller.toggle_camera().await, Ok(false));
    assert_eq!(controller.toggle_microphone().await, Ok(true));

    let call = controller.snapshot().call_session.expect("call");
    assert!(call.microphone_on);
    assert!(!call.camera_on);
}

#[tokio::test]
async fn dispose_cancels_pending_reveals() {
    let mut controller = fixture_controller();
    let case_id = controller.submit(SYMPTOMS).expect("submit");
    controller.advance(ms(1000)).await;

    assert_eq!(controller.dispose().await, Some(case_id));
    assert_eq!(controller.armed_timers(), 0);
    assert!(controller.snapshot().is_idle());

    assert_eq!(controller.advance(ms(60_000)).await, 0);
    assert!(controller.snapshot().is_idle());
    assert_eq!(controller.leaked_timer_fires(), 0);
    assert_eq!(controller.dispose().await, None);
}

#[tokio::test]
async fn dispose_stops_simulators_and_ends_the_live_call() {
    let telephony = Arc::new(FixtureTelephonyProvider::default());
    let collaborators = Collaborators::fixtures().with_telephony(telephony.clone());
    let mut controller = dispatched_controller(collaborators).await;
    controller.request_video_consult().await.expect("consult");
    let mut events = controller.subscribe_events();

    controller.dispose().await.expect("disposed case");
    assert_eq!(controller.armed_timers(), 0);
    assert!(telephony.live_sessions().await.is_empty());

    assert_eq!(controller.advance(ms(120_000)).await, 0);
    assert!(matches!(events.try_recv(), Ok(CaseEvent::Disposed { .. })));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn a_new_case_can_start_after_dispose() {
    let mut controller = fixture_controller();
    let first = controller.submit(SYMPTOMS).expect("submit");
    controller.dispose().await;

    let second = controller.submit(SYMPTOMS).expect("resubmit");
    assert_ne!(first, second);
    controller.advance(ms(4000)).await;
    assert_eq!(controller.stage(), Stage::AmbulanceDispatch);
    assert_eq!(controller.snapshot().transitions[0].at_ms, 2000);
}

#[tokio::test]
async fn stale_work_for_a_released_case_is_suppressed() {
    let mut controller = dispatched_controller(Collaborators::fixtures()).await;
    let before = controller.snapshot();

    controller.timers.schedule(
        ms(10),
        PendingWork::new(CaseId::new(), WorkKind::EtaTick),
    );
    controller.advance(ms(10)).await;

    assert_eq!(controller.leaked_timer_fires(), 1);
    assert_eq!(
        controller.snapshot().ambulance.map(|unit| unit.eta_minutes),
        before.ambulance.map(|unit| unit.eta_minutes)
    );
    assert_eq!(controller.running_simulators(), 1);
}

#[tokio::test]
async fn triage_failure_holds_intake_until_retried() {
    let classifier = Arc::new(CountingClassifier::failing_first(2));
    let mut controller = WorkflowController::new(
        DispatchSettings::default(),
        Collaborators::fixtures().with_classifier(classifier),
    );
    let mut events = controller.subscribe_events();
    controller.submit(SYMPTOMS).expect("submit");

    controller.advance(ms(2000)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::Intake);
    assert!(snapshot.processing);
    assert_eq!(snapshot.fault.as_ref().map(|f| f.step), Some(FaultStep::Triage));

    controller.advance(ms(2000)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::Intake);
    assert_eq!(snapshot.fault.as_ref().map(|f| f.at_ms), Some(4000));

    assert_eq!(controller.retry().await, Ok(Stage::AmbulanceDispatch));
    let snapshot = controller.snapshot();
    assert!(snapshot.fault.is_none());
    assert!(!snapshot.processing);

    let mut faults = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CaseEvent::Fault { .. }) {
            faults += 1;
        }
    }
    assert_eq!(faults, 2);
}

#[tokio::test]
async fn missing_facility_is_a_retryable_fault() {
    let mut controller = WorkflowController::new(
        DispatchSettings::default(),
        Collaborators::fixtures().with_matcher(Arc::new(MissingHospitalMatcher)),
    );
    controller.submit(SYMPTOMS).expect("submit");
    controller.advance(ms(4000)).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::Triage);
    assert!(snapshot.hospital_match.is_none());
    assert_eq!(
        snapshot.fault.as_ref().map(|f| f.step),
        Some(FaultStep::HospitalMatch)
    );

    let err = controller.retry().await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Collaborator(CollaboratorError::NoFacilityAvailable(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(controller.stage(), Stage::Triage);
    assert!(controller.snapshot().fault.is_some());
}

#[tokio::test]
async fn consult_start_failure_keeps_dispatch_and_can_be_retried() {
    let telephony = Arc::new(FlakyTelephony {
        start_failures_left: Mutex::new(1),
        inner: Arc::new(FixtureTelephonyProvider::default()),
    });
    let mut controller =
        dispatched_controller(Collaborators::fixtures().with_telephony(telephony)).await;

    let err = controller.request_video_consult().await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Collaborator(CollaboratorError::SessionUnavailable(_))
    ));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stage, Stage::AmbulanceDispatch);
    assert!(snapshot.call_session.is_none());
    assert_eq!(
        snapshot.fault.as_ref().map(|f| f.step),
        Some(FaultStep::StartConsult)
    );
    assert_eq!(controller.running_simulators(), 1);

    assert_eq!(controller.retry().await, Ok(Stage::VideoConsult));
    assert!(controller.snapshot().fault.is_none());
}

#[tokio::test]
async fn arrival_report_stops_the_countdown() {
    let unit = en_route_unit();
    let feed = FixtureDispatchFeed::with_positions(
        unit,
        vec![
            PositionUpdate {
                location: Some("Haji Ali junction".into()),
                distance_km: Some(0.9),
                ..Default::default()
            },
            PositionUpdate {
                status: Some(AmbulanceStatus::Arrived),
                location: Some("KEM Hospital bay 2".into()),
                ..Default::default()
            },
        ],
    );
    let mut controller =
        dispatched_controller(Collaborators::fixtures().with_dispatch(Arc::new(feed))).await;

    controller.advance(ms(10_000)).await;
    let unit = controller.snapshot().ambulance.expect("unit");
    assert_eq!(unit.location, "Haji Ali junction");
    assert_eq!(unit.eta_minutes, 7);

    controller.advance(ms(10_000)).await;
    let unit = controller.snapshot().ambulance.expect("unit");
    assert_eq!(unit.status, AmbulanceStatus::Arrived);
    assert_eq!(unit.eta_minutes, 6);
    assert_eq!(controller.running_simulators(), 0);

    controller.advance(ms(60_000)).await;
    assert_eq!(
        controller.snapshot().ambulance.map(|unit| unit.eta_minutes),
        Some(6)
    );

    assert!(matches!(
        controller.ensure_eta_countdown(),
        Err(DispatchError::InvalidTransition {
            stage: Stage::AmbulanceDispatch,
            operation: "start_eta_countdown",
        })
    ));
    assert_eq!(controller.running_simulators(), 0);
    assert_eq!(controller.armed_timers(), 0);
}

#[tokio::test]
async fn stage_changes_are_broadcast_in_order() {
    let mut controller = fixture_controller();
    let mut events = controller.subscribe_events();
    controller.submit(SYMPTOMS).expect("submit");
    controller.advance(ms(4000)).await;
    controller.request_video_consult().await.expect("consult");
    controller.end_call().await.expect("end call");

    let mut stages = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CaseEvent::StageChanged { transition, .. } = event {
            stages.push(transition.to);
        }
    }
    assert_eq!(
        stages,
        vec![
            Stage::Triage,
            Stage::HospitalMatch,
            Stage::AmbulanceDispatch,
            Stage::VideoConsult,
            Stage::AmbulanceDispatch,
        ]
    );
}
