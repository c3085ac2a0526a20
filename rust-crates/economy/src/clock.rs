use chrono::{
    DateTime,
    Duration,
    FixedOffset,
    TimeZone,
    Utc,
};
use std::sync::{
    Arc,
    Mutex,
};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Midnight at a fixed UTC offset; quotas and idle days are counted between boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl DayBoundary {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn from_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(Self::new)
    }

    /// Epoch millis of the most recent boundary at or before `now`.
    pub fn day_start(&self, now: DateTime<Utc>) -> i64 {
        let local = now.with_timezone(&self.offset).date_naive();
        let midnight = local
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|start| start.timestamp_millis());
        // Fixed offsets have no gaps, so midnight always resolves.
        midnight.unwrap_or_else(|| now.timestamp_millis())
    }

    /// Whole days from `last_day` to `current_day`, both boundaries in epoch millis.
    pub fn days_between(current_day: i64, last_day: i64) -> i64 {
        (current_day - last_day).div_euclid(Duration::days(1).num_milliseconds())
    }
}
