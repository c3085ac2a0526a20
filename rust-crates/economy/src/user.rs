use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const DEFAULT_BALANCE: i64 = 100;

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Issuer recorded on codes minted by an admin rather than a player.
    pub const HOUSE: UserId = UserId(0);
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct UserState {
    pub display_name: String,
    pub coins: i64,
    /// Epoch millis of the day boundary the counters below belong to.
    pub last_day_utc: i64,
    pub attempt_count: u32,
    #[serde(default)]
    pub extra_attempts: u32,
}

impl UserState {
    pub fn new(display_name: impl Into<String>, today: i64) -> Self {
        Self {
            display_name: display_name.into(),
            coins: DEFAULT_BALANCE,
            last_day_utc: today,
            attempt_count: 0,
            extra_attempts: 0,
        }
    }

    pub fn is_current_day(&self, today: i64) -> bool {
        self.last_day_utc == today
    }

    pub fn attempts_left(&self, limit: u32) -> u32 {
        (limit + self.extra_attempts).saturating_sub(self.attempt_count)
    }
}
