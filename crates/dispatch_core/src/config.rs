use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "dispatch.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub triage_delay_ms: u64,
    pub hospital_match_delay_ms: u64,
    pub eta_tick_ms: u64,
    pub call_tick_ms: u64,
    pub call_duration_offset_seconds: u64,
    pub event_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            triage_delay_ms: 2000,
            hospital_match_delay_ms: 4000,
            eta_tick_ms: 10_000,
            call_tick_ms: 1000,
            call_duration_offset_seconds: 0,
            event_capacity: 64,
        }
    }
}

impl DispatchSettings {
    pub fn triage_delay(&self) -> Duration {
        Duration::from_millis(self.triage_delay_ms)
    }

    pub fn hospital_match_delay(&self) -> Duration {
        Duration::from_millis(self.hospital_match_delay_ms)
    }

    pub fn eta_tick(&self) -> Duration {
        Duration::from_millis(self.eta_tick_ms)
    }

    pub fn call_tick(&self) -> Duration {
        Duration::from_millis(self.call_tick_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eta_tick_ms == 0 {
            return Err(ConfigError::Invalid("eta_tick_ms must be greater than 0".into()));
        }
        if self.call_tick_ms == 0 {
            return Err(ConfigError::Invalid("call_tick_ms must be greater than 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid dispatch settings: {0}")]
    Invalid(String),
}

/// Defaults, then the TOML file, then `APP__*` environment overrides.
///
/// An explicit `path` must exist; without one, `dispatch.toml` in the working
/// directory is used when present.
pub fn load_settings(path: Option<&Path>) -> Result<DispatchSettings, ConfigError> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_settings_file(default_path)?
            } else {
                DispatchSettings::default()
            }
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<DispatchSettings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<DispatchSettings>(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn apply_env_overrides(
    settings: &mut DispatchSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    override_u64(&lookup, "APP__TRIAGE_DELAY_MS", &mut settings.triage_delay_ms);
    override_u64(
        &lookup,
        "APP__HOSPITAL_MATCH_DELAY_MS",
        &mut settings.hospital_match_delay_ms,
    );
    override_u64(&lookup, "APP__ETA_TICK_MS", &mut settings.eta_tick_ms);
    override_u64(&lookup, "APP__CALL_TICK_MS", &mut settings.call_tick_ms);
    override_u64(
        &lookup,
        "APP__CALL_DURATION_OFFSET_SECONDS",
        &mut settings.call_duration_offset_seconds,
    );

    if let Some(raw) = lookup("APP__EVENT_CAPACITY") {
        match raw.trim().parse::<usize>() {
            Ok(parsed) => settings.event_capacity = parsed,
            Err(_) => warn!("config: ignoring malformed APP__EVENT_CAPACITY value={raw}"),
        }
    }
}

fn override_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("config: ignoring malformed {key} value={raw}"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
