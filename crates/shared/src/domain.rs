use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(AmbulanceId);
id_newtype!(SessionHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Intake,
    Triage,
    HospitalMatch,
    AmbulanceDispatch,
    VideoConsult,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Intake,
        Stage::Triage,
        Stage::HospitalMatch,
        Stage::AmbulanceDispatch,
        Stage::VideoConsult,
    ];

    /// Position in the progress indicator, starting at 0 for `Intake`.
    pub fn ordinal(self) -> usize {
        match self {
            Stage::Intake => 0,
            Stage::Triage => 1,
            Stage::HospitalMatch => 2,
            Stage::AmbulanceDispatch => 3,
            Stage::VideoConsult => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Intake => "Symptom Input",
            Stage::Triage => "AI Triage",
            Stage::HospitalMatch => "Hospital Match",
            Stage::AmbulanceDispatch => "Ambulance Dispatch",
            Stage::VideoConsult => "Medical Consultation",
        }
    }

    /// Stages during which the ambulance countdown is allowed to run.
    pub fn owns_ambulance(self) -> bool {
        matches!(self, Stage::AmbulanceDispatch | Stage::VideoConsult)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageAssessment {
    pub category: String,
    pub severity: Severity,
    pub confidence_percent: u8,
    pub description: String,
}

impl TriageAssessment {
    pub fn requires_immediate_dispatch(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clinician {
    pub name: String,
    pub specialization: String,
    pub experience_years: u32,
    pub rating: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalAssignment {
    pub facility: String,
    pub address: String,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub clinician: Clinician,
    #[serde(default)]
    pub specializations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbulanceStatus {
    Dispatched,
    EnRoute,
    Arrived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbulanceRecord {
    pub ambulance_id: AmbulanceId,
    pub driver: String,
    pub eta_minutes: u32,
    pub distance_km: f64,
    pub status: AmbulanceStatus,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Position report from the dispatch feed. Fields left `None` are unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AmbulanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaTrack {
    Microphone,
    Camera,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub active: bool,
    pub duration_seconds: u64,
    pub microphone_on: bool,
    pub camera_on: bool,
    pub clinician: Clinician,
    pub handle: SessionHandle,
}

impl CallSession {
    /// `mm:ss` rendering of the running call clock.
    pub fn formatted_duration(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.duration_seconds / 60,
            self.duration_seconds % 60
        )
    }
}
