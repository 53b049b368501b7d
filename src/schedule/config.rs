use crate::modem::dial::validate_number;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const POLL_INTERVAL_SECS: RangeInclusive<f64> = 1.0..=300.0;
pub const AUTO_DIAL_INTERVAL_SECS: RangeInclusive<u64> = 10..=86_400;
pub const AUTO_DIAL_DURATION_SECS: RangeInclusive<u64> = 5..=300;
pub const MANUAL_CALL_SECS: RangeInclusive<u64> = 0..=300;

pub const DEFAULT_CALL_NUMBER: &str = "+870772001899";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("poll interval must be between 1 and 300 seconds, got {0}")]
    PollInterval(f64),
    #[error("auto-dial interval must be between 10 and 86400 seconds, got {0}")]
    AutoDialInterval(u64),
    #[error("auto-dial call duration must be between 5 and 300 seconds, got {0}")]
    AutoDialDuration(u64),
    #[error("call duration must be at most 300 seconds, got {0}")]
    CallDuration(u64),
    #[error("invalid dial number {0:?}: only digits, '+', '*' and '#' are allowed")]
    DialNumber(String),
}

// Startup values; they pass through the same validation as runtime changes.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub poll_interval_secs: f64,
    pub auto_dial_enabled: bool,
    pub auto_dial_interval_secs: u64,
    pub auto_dial_duration_secs: u64,
    pub auto_dial_number: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10.0,
            auto_dial_enabled: false,
            auto_dial_interval_secs: 1_800,
            auto_dial_duration_secs: 15,
            auto_dial_number: DEFAULT_CALL_NUMBER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoDialStatus {
    #[serde(rename = "auto_call_enabled")]
    pub enabled: bool,
    pub interval: u64,
    pub duration: u64,
}

/// Cadence settings shared by both scheduler threads and the control surface.
///
/// Each field is an atomic read once at the top of a scheduler cycle, so a
/// change lands on the next cycle. Setters validate first and never store a
/// rejected value.
pub struct SchedulerConfig {
    poll_interval_bits: AtomicU64,
    auto_dial_enabled: AtomicBool,
    auto_dial_interval: AtomicU64,
    auto_dial_duration: AtomicU64,
    auto_dial_number: String,
}

impl SchedulerConfig {
    pub fn new(settings: ScheduleSettings) -> Result<Self, ConfigError> {
        check_poll_interval(settings.poll_interval_secs)?;
        check_auto_dial(
            settings.auto_dial_interval_secs,
            settings.auto_dial_duration_secs,
        )?;
        validate_number(&settings.auto_dial_number)?;

        Ok(Self {
            poll_interval_bits: AtomicU64::new(settings.poll_interval_secs.to_bits()),
            auto_dial_enabled: AtomicBool::new(settings.auto_dial_enabled),
            auto_dial_interval: AtomicU64::new(settings.auto_dial_interval_secs),
            auto_dial_duration: AtomicU64::new(settings.auto_dial_duration_secs),
            auto_dial_number: settings.auto_dial_number,
        })
    }

    pub fn poll_interval_secs(&self) -> f64 {
        f64::from_bits(self.poll_interval_bits.load(Ordering::SeqCst))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs())
    }

    pub fn set_poll_interval(&self, secs: f64) -> Result<f64, ConfigError> {
        check_poll_interval(secs)?;
        self.poll_interval_bits
            .store(secs.to_bits(), Ordering::SeqCst);
        Ok(secs)
    }

    pub fn start_auto_dial(
        &self,
        interval_secs: u64,
        duration_secs: u64,
    ) -> Result<AutoDialStatus, ConfigError> {
        check_auto_dial(interval_secs, duration_secs)?;
        self.auto_dial_interval
            .store(interval_secs, Ordering::SeqCst);
        self.auto_dial_duration
            .store(duration_secs, Ordering::SeqCst);
        self.auto_dial_enabled.store(true, Ordering::SeqCst);
        Ok(self.auto_dial_status())
    }

    pub fn stop_auto_dial(&self) -> AutoDialStatus {
        self.auto_dial_enabled.store(false, Ordering::SeqCst);
        self.auto_dial_status()
    }

    pub fn auto_dial_status(&self) -> AutoDialStatus {
        AutoDialStatus {
            enabled: self.auto_dial_enabled.load(Ordering::SeqCst),
            interval: self.auto_dial_interval.load(Ordering::SeqCst),
            duration: self.auto_dial_duration.load(Ordering::SeqCst),
        }
    }

    pub fn auto_dial_number(&self) -> &str {
        &self.auto_dial_number
    }
}

fn check_poll_interval(secs: f64) -> Result<(), ConfigError> {
    if POLL_INTERVAL_SECS.contains(&secs) {
        Ok(())
    } else {
        Err(ConfigError::PollInterval(secs))
    }
}

fn check_auto_dial(interval_secs: u64, duration_secs: u64) -> Result<(), ConfigError> {
    if !AUTO_DIAL_INTERVAL_SECS.contains(&interval_secs) {
        return Err(ConfigError::AutoDialInterval(interval_secs));
    }
    if !AUTO_DIAL_DURATION_SECS.contains(&duration_secs) {
        return Err(ConfigError::AutoDialDuration(duration_secs));
    }
    Ok(())
}

// Bound on a one-off call requested from the control surface.
pub fn check_manual_call(secs: u64) -> Result<Duration, ConfigError> {
    if MANUAL_CALL_SECS.contains(&secs) {
        Ok(Duration::from_secs(secs))
    } else {
        Err(ConfigError::CallDuration(secs))
    }
}
