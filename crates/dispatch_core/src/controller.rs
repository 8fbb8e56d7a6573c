//! Finite-state machine driving one emergency case from intake to dispatch.
//!
//! The controller owns the case, its timers and the collaborator handles. It is
//! driven from a single task: user intents arrive as method calls and elapsed
//! time arrives through [`WorkflowController::advance_to`].

use std::time::Duration;

use chrono::Utc;
use shared::{
    domain::{AmbulanceStatus, CallSession, CaseId, MediaTrack, Stage},
    error::CollaboratorError,
    protocol::{CaseEvent, CaseFault, CaseSnapshot, FaultStep},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    case::{CaseState, PendingWork, WorkKind},
    config::DispatchSettings,
    error::DispatchError,
    telemetry::{apply_position, countdown_step},
    timer::{FiredTimer, TimerService},
    Collaborators,
};

pub struct WorkflowController {
    settings: DispatchSettings,
    collaborators: Collaborators,
    timers: TimerService<PendingWork>,
    case: Option<CaseState>,
    events: broadcast::Sender<CaseEvent>,
    leaked_timer_fires: u64,
}

impl WorkflowController {
    pub fn new(settings: DispatchSettings, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            settings,
            collaborators,
            timers: TimerService::new(),
            case: None,
            events,
            leaked_timer_fires: 0,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CaseEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CaseEvent> {
        self.events.clone()
    }

    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    pub fn next_due(&mut self) -> Option<Duration> {
        self.timers.next_due()
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.armed_count()
    }

    pub fn running_simulators(&self) -> usize {
        self.timers.repeating_count()
    }

    /// Timer firings that reached a released case and were suppressed.
    pub fn leaked_timer_fires(&self) -> u64 {
        self.leaked_timer_fires
    }

    pub fn stage(&self) -> Stage {
        self.case
            .as_ref()
            .map(CaseState::stage)
            .unwrap_or(Stage::Intake)
    }

    pub fn case(&self) -> Option<&CaseState> {
        self.case.as_ref()
    }

    pub fn snapshot(&self) -> CaseSnapshot {
        let now = self.timers.now();
        self.case
            .as_ref()
            .map(|case| case.snapshot(now))
            .unwrap_or_default()
    }

    /// Accepts a symptom description and schedules the two sibling reveals.
    ///
    /// Triage and hospital matching are both anchored to the submission
    /// instant; the match is not chained off triage completion.
    pub fn submit(&mut self, symptom_text: &str) -> Result<CaseId, DispatchError> {
        let text = symptom_text.trim();
        if text.is_empty() {
            return Err(DispatchError::InvalidInput);
        }
        if let Some(case) = &self.case {
            return Err(DispatchError::CaseAlreadyActive(case.id));
        }

        let id = CaseId::new();
        let mut case = CaseState::new(
            id,
            text.to_string(),
            Utc::now(),
            self.timers.now(),
            &self.settings,
        );
        case.triage_timer = Some(self.timers.schedule(
            self.settings.triage_delay(),
            PendingWork::new(id, WorkKind::RevealTriage),
        ));
        case.match_timer = Some(self.timers.schedule(
            self.settings.hospital_match_delay(),
            PendingWork::new(id, WorkKind::RevealHospitalMatch),
        ));
        self.case = Some(case);

        info!(
            "workflow: case submitted case={id} triage_delay_ms={} match_delay_ms={}",
            self.settings.triage_delay_ms, self.settings.hospital_match_delay_ms
        );
        let _ = self.events.send(CaseEvent::Submitted { case_id: id });
        Ok(id)
    }

    pub async fn advance(&mut self, by: Duration) -> usize {
        let target = self.timers.now() + by;
        self.advance_to(target).await
    }

    /// Runs every timer due at or before `now`, in due order. Returns how many fired.
    pub async fn advance_to(&mut self, now: Duration) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(now) {
            fired += 1;
            let handle = timer.handle;
            if let Err(err) = self.handle_fired(timer).await {
                self.leaked_timer_fires += 1;
                self.timers.cancel(handle);
                error!("workflow: suppressed stale timer err={err}");
            }
        }
        self.timers.settle(now);
        fired
    }

    pub(crate) fn broadcast_error(&self, err: &DispatchError) {
        let _ = self.events.send(CaseEvent::Error(err.report()));
    }

    /// Starts the ETA countdown for the dispatched unit. Returns `false` when
    /// it is already running.
    pub fn ensure_eta_countdown(&mut self) -> Result<bool, DispatchError> {
        let case = self.case.as_mut().ok_or(DispatchError::NoActiveCase)?;
        let dispatched = case
            .ambulance
            .as_ref()
            .is_some_and(|unit| unit.status != AmbulanceStatus::Arrived);
        if !case.stage.owns_ambulance() || !dispatched {
            return Err(DispatchError::InvalidTransition {
                stage: case.stage,
                operation: "start_eta_countdown",
            });
        }
        Ok(case.eta.start(case.id, &mut self.timers))
    }

    pub async fn request_video_consult(&mut self) -> Result<(), DispatchError> {
        let case = self.case.as_ref().ok_or(DispatchError::NoActiveCase)?;
        let invalid = DispatchError::InvalidTransition {
            stage: case.stage,
            operation: "request_video_consult",
        };
        if case.stage != Stage::AmbulanceDispatch {
            return Err(invalid);
        }
        let clinician = case
            .hospital_match
            .as_ref()
            .map(|assignment| assignment.clinician.clone())
            .ok_or(invalid)?;

        let handle = match self.collaborators.telephony.start_session(&clinician).await {
            Ok(handle) => handle,
            Err(err) => {
                self.record_fault(FaultStep::StartConsult, err.clone());
                return Err(err.into());
            }
        };

        let case = self.case.as_mut().ok_or(DispatchError::NoActiveCase)?;
        info!(
            "workflow: consult started case={} clinician={} session={handle}",
            case.id, clinician.name
        );
        case.call_session = Some(CallSession {
            active: true,
            duration_seconds: self.settings.call_duration_offset_seconds,
            microphone_on: true,
            camera_on: true,
            clinician,
            handle,
        });
        case.clear_fault(FaultStep::StartConsult);
        self.transition(Stage::VideoConsult);

        if let Some(case) = self.case.as_mut() {
            case.call_clock.start(case.id, &mut self.timers);
        }
        Ok(())
    }

    pub async fn end_call(&mut self) -> Result<(), DispatchError> {
        let case = self.case.as_mut().ok_or(DispatchError::NoActiveCase)?;
        if case.stage != Stage::VideoConsult {
            return Err(DispatchError::InvalidTransition {
                stage: case.stage,
                operation: "end_call",
            });
        }

        case.call_clock.stop(&mut self.timers);
        let call = case.call_session.take();
        let case_id = case.id;
        self.transition(Stage::AmbulanceDispatch);

        if let Some(call) = call {
            info!(
                "workflow: consult ended case={case_id} session={} duration={}",
                call.handle,
                call.formatted_duration()
            );
            if let Err(err) = self.collaborators.telephony.end_session(&call.handle).await {
                warn!("workflow: telephony teardown failed case={case_id} err={err}");
            }
        }
        Ok(())
    }

    pub async fn toggle_microphone(&mut self) -> Result<bool, DispatchError> {
        self.toggle_track(MediaTrack::Microphone, "toggle_microphone")
            .await
    }

    pub async fn toggle_camera(&mut self) -> Result<bool, DispatchError> {
        self.toggle_track(MediaTrack::Camera, "toggle_camera").await
    }

    /// Re-runs the step recorded in the case fault. Returns the resulting stage.
    pub async fn retry(&mut self) -> Result<Stage, DispatchError> {
        let case = self.case.as_mut().ok_or(DispatchError::NoActiveCase)?;
        let Some(fault) = case.fault.take() else {
            return Ok(case.stage);
        };
        info!(
            "workflow: retrying case={} step={:?} after err={}",
            case.id, fault.step, fault.error
        );

        match fault.step {
            FaultStep::StartConsult => self.request_video_consult().await?,
            FaultStep::Triage | FaultStep::HospitalMatch | FaultStep::AmbulanceDispatch => {
                self.run_pipeline().await;
                if let Some(fault) = self.case.as_ref().and_then(|case| case.fault.as_ref()) {
                    return Err(fault.error.clone().into());
                }
            }
        }
        Ok(self.stage())
    }

    /// Releases the case: cancels every timer and ends a live call.
    pub async fn dispose(&mut self) -> Option<CaseId> {
        let mut case = self.case.take()?;

        for handle in [case.triage_timer.take(), case.match_timer.take()]
            .into_iter()
            .flatten()
        {
            self.timers.cancel(handle);
        }
        case.eta.stop(&mut self.timers);
        case.call_clock.stop(&mut self.timers);

        let orphaned = self.timers.cancel_all();
        if orphaned > 0 {
            error!(
                "workflow: cancelled orphaned timers case={} count={orphaned}",
                case.id
            );
        }

        if let Some(call) = case.call_session.take() {
            if let Err(err) = self.collaborators.telephony.end_session(&call.handle).await {
                warn!(
                    "workflow: telephony teardown failed on dispose case={} err={err}",
                    case.id
                );
            }
        }

        info!(
            "workflow: case disposed case={} stage={:?}",
            case.id, case.stage
        );
        let _ = self.events.send(CaseEvent::Disposed { case_id: case.id });
        Some(case.id)
    }

    async fn handle_fired(&mut self, fired: FiredTimer<PendingWork>) -> Result<(), DispatchError> {
        let leak = DispatchError::TimerLeak {
            case_id: fired.work.case_id,
            handle: fired.handle,
        };
        let Some(case) = self.case.as_mut() else {
            return Err(leak);
        };
        if case.id != fired.work.case_id {
            return Err(leak);
        }

        match fired.work.kind {
            WorkKind::RevealTriage => {
                if case.triage_timer != Some(fired.handle) {
                    return Err(leak);
                }
                case.triage_timer = None;
                case.triage_released = true;
                self.run_pipeline().await;
            }
            WorkKind::RevealHospitalMatch => {
                if case.match_timer != Some(fired.handle) {
                    return Err(leak);
                }
                case.match_timer = None;
                case.match_released = true;
                self.run_pipeline().await;
            }
            WorkKind::EtaTick => {
                if !case.eta.owns(fired.handle) {
                    return Err(leak);
                }
                self.tick_eta().await;
            }
            WorkKind::CallTick => {
                if !case.call_clock.owns(fired.handle) {
                    return Err(leak);
                }
                self.tick_call_clock();
            }
        }
        Ok(())
    }

    fn next_pipeline_step(case: &CaseState) -> Option<FaultStep> {
        if case.triage.is_none() {
            // A released match reveal needs triage first.
            (case.triage_released || case.match_released).then_some(FaultStep::Triage)
        } else if case.hospital_match.is_none() {
            case.match_released.then_some(FaultStep::HospitalMatch)
        } else if case.ambulance.is_none() {
            Some(FaultStep::AmbulanceDispatch)
        } else {
            None
        }
    }

    /// Advances the intake pipeline as far as the released reveals allow,
    /// stopping at the first collaborator failure.
    async fn run_pipeline(&mut self) {
        while let Some(step) = self.case.as_ref().and_then(Self::next_pipeline_step) {
            if let Err(err) = self.run_step(step).await {
                self.record_fault(step, err);
                return;
            }
        }
    }

    async fn run_step(&mut self, step: FaultStep) -> Result<(), CollaboratorError> {
        let Some(case) = self.case.as_ref() else {
            return Ok(());
        };

        match step {
            FaultStep::Triage => {
                let symptom_text = case.symptom_text.clone();
                let assessment = self.collaborators.classifier.classify(&symptom_text).await?;
                let Some(case) = self.case.as_mut() else {
                    return Ok(());
                };
                info!(
                    "workflow: triage complete case={} category={} severity={:?} confidence={} immediate={}",
                    case.id,
                    assessment.category,
                    assessment.severity,
                    assessment.confidence_percent,
                    assessment.requires_immediate_dispatch()
                );
                case.triage = Some(assessment);
                case.processing = false;
                case.clear_fault(FaultStep::Triage);
                self.transition(Stage::Triage);
            }
            FaultStep::HospitalMatch => {
                let Some(triage) = case.triage.clone() else {
                    return Ok(());
                };
                let assignment = self.collaborators.matcher.match_facility(&triage).await?;
                let Some(case) = self.case.as_mut() else {
                    return Ok(());
                };
                info!(
                    "workflow: hospital matched case={} facility={} clinician={}",
                    case.id, assignment.facility, assignment.clinician.name
                );
                case.hospital_match = Some(assignment);
                case.clear_fault(FaultStep::HospitalMatch);
                self.transition(Stage::HospitalMatch);
            }
            FaultStep::AmbulanceDispatch => {
                let Some(assignment) = case.hospital_match.clone() else {
                    return Ok(());
                };
                let mut unit = self.collaborators.dispatch.dispatch(&assignment).await?;
                unit.eta_minutes = countdown_floor(unit.eta_minutes);
                let Some(case) = self.case.as_mut() else {
                    return Ok(());
                };
                info!(
                    "workflow: ambulance dispatched case={} unit={} eta_minutes={}",
                    case.id, unit.ambulance_id, unit.eta_minutes
                );
                case.ambulance = Some(unit);
                case.clear_fault(FaultStep::AmbulanceDispatch);
                self.transition(Stage::AmbulanceDispatch);
                if let Some(case) = self.case.as_mut() {
                    case.eta.start(case.id, &mut self.timers);
                }
            }
            FaultStep::StartConsult => {}
        }
        Ok(())
    }

    async fn tick_eta(&mut self) {
        let Some(case) = self.case.as_mut() else {
            return;
        };
        let ambulance_id = match &case.ambulance {
            Some(unit) if case.stage.owns_ambulance() => unit.ambulance_id.clone(),
            _ => {
                case.eta.stop(&mut self.timers);
                return;
            }
        };
        let case_id = case.id;

        let update = match self.collaborators.dispatch.poll_position(&ambulance_id).await {
            Ok(update) => update,
            Err(err) => {
                warn!("telemetry: position poll failed case={case_id} unit={ambulance_id} err={err}");
                None
            }
        };

        let Some(case) = self.case.as_mut() else {
            return;
        };
        let Some(unit) = case.ambulance.as_mut() else {
            return;
        };
        let before = unit.eta_minutes;
        unit.eta_minutes = countdown_step(before);
        if let Some(update) = update {
            apply_position(unit, update);
        }
        let eta_minutes = unit.eta_minutes;
        let arrived = unit.status == AmbulanceStatus::Arrived;
        debug!("telemetry: eta tick case={case_id} eta_minutes={eta_minutes}");

        if eta_minutes != before {
            let _ = self.events.send(CaseEvent::EtaUpdated {
                case_id,
                eta_minutes,
            });
        }
        if arrived {
            case.eta.stop(&mut self.timers);
            info!("telemetry: ambulance arrived case={case_id} unit={ambulance_id}");
        }
    }

    fn tick_call_clock(&mut self) {
        let Some(case) = self.case.as_mut() else {
            return;
        };
        let call = match case.call_session.as_mut() {
            Some(call) if case.stage == Stage::VideoConsult => call,
            _ => {
                case.call_clock.stop(&mut self.timers);
                return;
            }
        };
        call.duration_seconds += 1;
        let _ = self.events.send(CaseEvent::CallClockTick {
            case_id: case.id,
            duration_seconds: call.duration_seconds,
        });
    }

    async fn toggle_track(
        &mut self,
        track: MediaTrack,
        operation: &'static str,
    ) -> Result<bool, DispatchError> {
        let case = self.case.as_ref().ok_or(DispatchError::NoActiveCase)?;
        let call = match case.call_session.as_ref() {
            Some(call) if case.stage == Stage::VideoConsult => call,
            _ => {
                return Err(DispatchError::InvalidTransition {
                    stage: case.stage,
                    operation,
                })
            }
        };
        let enabled = match track {
            MediaTrack::Microphone => !call.microphone_on,
            MediaTrack::Camera => !call.camera_on,
        };
        let handle = call.handle.clone();

        self.collaborators
            .telephony
            .set_track_enabled(&handle, track, enabled)
            .await?;

        if let Some(call) = self
            .case
            .as_mut()
            .and_then(|case| case.call_session.as_mut())
        {
            match track {
                MediaTrack::Microphone => call.microphone_on = enabled,
                MediaTrack::Camera => call.camera_on = enabled,
            }
        }
        Ok(enabled)
    }

    fn transition(&mut self, to: Stage) {
        let now = self.timers.now();
        let Some(case) = self.case.as_mut() else {
            return;
        };
        match case.enter(to, now) {
            Ok(transition) => {
                info!(
                    "workflow: stage transition case={} from={:?} to={:?} at_ms={}",
                    case.id, transition.from, transition.to, transition.at_ms
                );
                let _ = self.events.send(CaseEvent::StageChanged {
                    case_id: case.id,
                    transition,
                });
            }
            Err(err) => error!("workflow: rejected stage change case={} err={err}", case.id),
        }
    }

    fn record_fault(&mut self, step: FaultStep, error: CollaboratorError) {
        let now = self.timers.now();
        let Some(case) = self.case.as_mut() else {
            return;
        };
        warn!(
            "workflow: collaborator failure case={} step={step:?} stage={:?} err={error}",
            case.id, case.stage
        );
        let fault = CaseFault {
            step,
            error,
            at_ms: case.elapsed_ms(now),
        };
        case.fault = Some(fault.clone());
        let _ = self.events.send(CaseEvent::Fault {
            case_id: case.id,
            fault,
        });
    }
}

fn countdown_floor(eta_minutes: u32) -> u32 {
    eta_minutes.max(crate::telemetry::ETA_FLOOR_MINUTES)
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
