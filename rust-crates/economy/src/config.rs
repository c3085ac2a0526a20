use crate::clock::DayBoundary;
use anyhow::{
    anyhow,
    ensure,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

pub const DEFAULT_STAKE_PRICE: i64 = 8;
pub const DEFAULT_ATTEMPTS_LIMIT: u32 = 3;
pub const DEFAULT_CODE_GRANT_PROBABILITY: f64 = 0.1;
pub const DEFAULT_DAY_OFFSET_HOURS: i32 = 7;
pub const DEFAULT_KEY_NAMESPACE: &str = "season-1";
pub const DEFAULT_CAPTCHA_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CAPTCHA_ATTEMPTS: u8 = 1;
pub const DEFAULT_HIDE_AFTER_DAYS: i64 = 7;
pub const DEFAULT_STANDINGS_PLACES: usize = 15;

/// Flat commission added to the gas fee of a bonus attempt.
pub const EXTRA_ATTEMPT_COMMISSION: i64 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub stake_price: i64,
    pub attempts_limit: u32,
    pub code_grant_probability: f64,
    pub day_offset_hours: i32,
    pub key_namespace: String,
    pub captcha_timeout_secs: u64,
    pub captcha_attempts: u8,
    pub hide_after_days: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            stake_price: DEFAULT_STAKE_PRICE,
            attempts_limit: DEFAULT_ATTEMPTS_LIMIT,
            code_grant_probability: DEFAULT_CODE_GRANT_PROBABILITY,
            day_offset_hours: DEFAULT_DAY_OFFSET_HOURS,
            key_namespace: DEFAULT_KEY_NAMESPACE.to_string(),
            captcha_timeout_secs: DEFAULT_CAPTCHA_TIMEOUT_SECS,
            captcha_attempts: DEFAULT_CAPTCHA_ATTEMPTS,
            hide_after_days: DEFAULT_HIDE_AFTER_DAYS,
        }
    }
}

impl EconomyConfig {
    pub fn validate(&self) -> crate::Result<()> {
        ensure!(self.stake_price >= 0, "stake price must not be negative");
        ensure!(
            (0.0..=1.0).contains(&self.code_grant_probability),
            "code grant probability must be within [0, 1]"
        );
        ensure!(self.captcha_attempts >= 1, "captcha needs at least one attempt");
        ensure!(
            !self.key_namespace.is_empty(),
            "key namespace must not be empty"
        );
        self.day_boundary()?;
        Ok(())
    }

    pub fn day_boundary(&self) -> crate::Result<DayBoundary> {
        DayBoundary::from_hours(self.day_offset_hours).ok_or_else(|| {
            anyhow!(
                "day offset of {} hours is not a valid UTC offset",
                self.day_offset_hours
            )
        })
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }
}
