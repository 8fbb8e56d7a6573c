//! Orchestration core for an emergency dispatch case: the stage machine,
//! its timers, the live telemetry simulators and the session runtime that
//! drives them from a single task.

use std::sync::Arc;

use collaborators::{
    fixtures::{
        FixtureDispatchFeed, FixtureHospitalMatcher, FixtureTelephonyProvider,
        FixtureTriageClassifier,
    },
    DispatchFeed, HospitalMatcher, MissingDispatchFeed, MissingHospitalMatcher,
    MissingTelephonyProvider, MissingTriageClassifier, TelephonyProvider, TriageClassifier,
};

pub mod case;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod timer;

pub use config::{load_settings, DispatchSettings};
pub use controller::WorkflowController;
pub use error::DispatchError;
pub use session::DispatchSession;

/// External services a controller calls while a case advances.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn TriageClassifier>,
    pub matcher: Arc<dyn HospitalMatcher>,
    pub dispatch: Arc<dyn DispatchFeed>,
    pub telephony: Arc<dyn TelephonyProvider>,
}

impl Collaborators {
    pub fn new(
        classifier: Arc<dyn TriageClassifier>,
        matcher: Arc<dyn HospitalMatcher>,
        dispatch: Arc<dyn DispatchFeed>,
        telephony: Arc<dyn TelephonyProvider>,
    ) -> Self {
        Self {
            classifier,
            matcher,
            dispatch,
            telephony,
        }
    }

    /// Every collaborator fails; useful as a base when only some are wired.
    pub fn missing() -> Self {
        Self::new(
            Arc::new(MissingTriageClassifier),
            Arc::new(MissingHospitalMatcher),
            Arc::new(MissingDispatchFeed),
            Arc::new(MissingTelephonyProvider),
        )
    }

    pub fn fixtures() -> Self {
        Self::new(
            Arc::new(FixtureTriageClassifier::default()),
            Arc::new(FixtureHospitalMatcher::default()),
            Arc::new(FixtureDispatchFeed::default()),
            Arc::new(FixtureTelephonyProvider::default()),
        )
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TriageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn HospitalMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_dispatch(mut self, dispatch: Arc<dyn DispatchFeed>) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_telephony(mut self, telephony: Arc<dyn TelephonyProvider>) -> Self {
        self.telephony = telephony;
        self
    }
}
