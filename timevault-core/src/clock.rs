use std::sync::Mutex;

use time::{Duration, OffsetDateTime, UtcOffset};

use crate::time_expr::LocalZone;

/// Source of "now" for every time-dependent decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock. The instant is always the real UTC time; `offset` only controls
/// how it is rendered and how local dates are interpreted.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: UtcOffset,
    follow_local: bool,
}

impl SystemClock {
    pub fn utc() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self {
            offset,
            follow_local: false,
        }
    }

    /// Local time, with `offset` as the current one. As a [`LocalZone`] it asks
    /// the system for the offset of each date and falls back to `offset` when
    /// `time` refuses (the process has spawned threads).
    pub fn local(offset: UtcOffset) -> Self {
        Self {
            offset,
            follow_local: true,
        }
    }
}

impl LocalZone for SystemClock {
    fn offset_at(&self, instant: OffsetDateTime) -> UtcOffset {
        if self.follow_local {
            UtcOffset::local_offset_at(instant).unwrap_or(self.offset)
        } else {
            self.offset
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Whole milliseconds from `now` until `until`, zero if already passed.
pub fn millis_until(now: OffsetDateTime, until: OffsetDateTime) -> u64 {
    let ms = (until - now).whole_milliseconds();
    if ms <= 0 { 0 } else { ms.min(u64::MAX as i128) as u64 }
}
