use std::env;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub server_port: u16,
    pub scheduling: SchedulingConfig,
}

/// Clinic calendar rules shared by the slot grid, the validator and the
/// booking coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub slot_minutes: u32,
    pub opening_hour: u32,
    pub closing_hour: u32,
    /// Fixed offset of clinic local time from UTC.
    pub utc_offset_minutes: i32,
    pub booking_horizon_days: u32,
    pub max_commit_attempts: u32,
    pub booking_timeout_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            opening_hour: 8,
            closing_hour: 17,
            utc_offset_minutes: 0,
            booking_horizon_days: 7,
            max_commit_attempts: 3,
            booking_timeout_ms: 5000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulingConfig::default();

        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            server_port: parse_var("SERVER_PORT", 3000),
            scheduling: SchedulingConfig {
                slot_minutes: parse_var("SLOT_MINUTES", defaults.slot_minutes),
                opening_hour: parse_var("CLINIC_OPENING_HOUR", defaults.opening_hour),
                closing_hour: parse_var("CLINIC_CLOSING_HOUR", defaults.closing_hour),
                utc_offset_minutes: parse_var("CLINIC_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes),
                booking_horizon_days: parse_var("BOOKING_HORIZON_DAYS", defaults.booking_horizon_days),
                max_commit_attempts: parse_var("BOOKING_MAX_ATTEMPTS", defaults.max_commit_attempts),
                booking_timeout_ms: parse_var("BOOKING_TIMEOUT_MS", defaults.booking_timeout_ms),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - clinician routes will reject every token");
        }

        Self {
            scheduling: config.scheduling.checked(),
            ..config
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }
}

impl SchedulingConfig {
    /// Opening and closing must sit on the slot grid and leave room for at
    /// least one slot.
    pub fn is_consistent(&self) -> bool {
        self.slot_minutes > 0
            && 24 * 60 % self.slot_minutes == 0
            && self.opening_hour < self.closing_hour
            && self.closing_hour <= 24
            && (self.opening_hour * 60) % self.slot_minutes == 0
            && (self.closing_hour * 60) % self.slot_minutes == 0
            && self.utc_offset_minutes.unsigned_abs() < 24 * 60
            && self.booking_horizon_days <= 366
            && self.max_commit_attempts > 0
            && self.booking_timeout_ms > 0
    }

    /// This config if it is consistent, otherwise the clinic defaults.
    pub fn checked(&self) -> SchedulingConfig {
        if self.is_consistent() {
            self.clone()
        } else {
            warn!("Scheduling configuration is inconsistent, falling back to clinic defaults");
            SchedulingConfig::default()
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
