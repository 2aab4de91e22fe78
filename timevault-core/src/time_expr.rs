//! Lock-time expressions: `5m`, `2 hours`, `30d`, `2026-07-01`, `2026-07-01 08:30`.

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::ParseError;

const DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_HM: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day] [hour]:[minute]");
const DATE_HMS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockTimeKind {
    Relative,
    Absolute,
}

/// A resolved lock time. `unlock_instant` is in UTC and strictly after `resolved_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockTimeSpec {
    pub canonical_duration_text: String,
    pub unlock_instant: OffsetDateTime,
    pub duration_ms: u64,
    pub resolved_at: OffsetDateTime,
    pub kind: LockTimeKind,
}

impl LockTimeSpec {
    /// A spec parsed earlier may have gone stale by the time it is used.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.unlock_instant <= now
    }

    /// Re-anchor a relative spec at `now` so `unlock_instant - resolved_at` stays
    /// the requested duration. Absolute specs are unchanged.
    pub fn rebased(&self, now: OffsetDateTime) -> LockTimeSpec {
        let Some(length) = (self.kind == LockTimeKind::Relative)
            .then(|| relative_duration(&self.canonical_duration_text))
            .flatten()
        else {
            return self.clone();
        };
        let now = now.replace_nanosecond(0).unwrap_or(now).to_offset(UtcOffset::UTC);
        match now.checked_add(length) {
            Some(unlock) => LockTimeSpec {
                unlock_instant: unlock,
                resolved_at: now,
                ..self.clone()
            },
            None => self.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Unit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl Unit {
    fn from_word(word: &str) -> Option<Self> {
        let unit = match word.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds,
            "m" | "min" | "mins" | "minute" | "minutes" => Unit::Minutes,
            "h" | "hr" | "hrs" | "hour" | "hours" => Unit::Hours,
            "d" | "day" | "days" => Unit::Days,
            "mo" | "mon" | "month" | "months" => Unit::Months,
            "y" | "yr" | "yrs" | "year" | "years" => Unit::Years,
            _ => return None,
        };
        Some(unit)
    }

    fn token(self) -> &'static str {
        match self {
            Unit::Seconds => "s",
            Unit::Minutes => "m",
            Unit::Hours => "h",
            Unit::Days => "d",
            Unit::Months => "mo",
            Unit::Years => "y",
        }
    }

    fn seconds(self) -> u64 {
        match self {
            Unit::Seconds => 1,
            Unit::Minutes => 60,
            Unit::Hours => 3_600,
            Unit::Days => 86_400,
            Unit::Months => 30 * 86_400,
            Unit::Years => 365 * 86_400,
        }
    }
}

/// Offset of local wall-clock time in effect at an instant.
pub trait LocalZone {
    fn offset_at(&self, instant: OffsetDateTime) -> UtcOffset;
}

/// A zone that never changes offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FixedZone(pub UtcOffset);

impl LocalZone for FixedZone {
    fn offset_at(&self, _instant: OffsetDateTime) -> UtcOffset {
        self.0
    }
}

/// Resolve `input` against `reference_now`, reading absolute dates in the
/// offset carried by `reference_now`.
pub fn parse(input: &str, reference_now: OffsetDateTime) -> Result<LockTimeSpec, ParseError> {
    parse_in(input, reference_now, &FixedZone(reference_now.offset()))
}

/// Resolve `input` against `reference_now`.
///
/// Relative durations are tried first, then absolute dates. Absolute dates are
/// local wall-clock times in `zone`, using the offset in effect on that date.
pub fn parse_in(
    input: &str,
    reference_now: OffsetDateTime,
    zone: &dyn LocalZone,
) -> Result<LockTimeSpec, ParseError> {
    let trimmed = input.trim();
    let now = reference_now
        .replace_nanosecond(0)
        .unwrap_or(reference_now);

    if let Some((count, unit)) = split_relative(trimmed) {
        return resolve_relative(input, count, unit, now);
    }
    if let Some((local, canonical)) = parse_absolute(trimmed) {
        let unlock = assume_local(local, zone, now.offset()).to_offset(UtcOffset::UTC);
        if unlock <= now {
            return Err(ParseError::NotInFuture {
                input: input.to_string(),
            });
        }
        let duration_ms = (unlock - now).whole_milliseconds() as u64;
        return Ok(LockTimeSpec {
            canonical_duration_text: canonical,
            unlock_instant: unlock,
            duration_ms,
            resolved_at: now.to_offset(UtcOffset::UTC),
            kind: LockTimeKind::Absolute,
        });
    }
    Err(invalid(input))
}

/// Pin a wall-clock time to the zone's offset on that date. Starts from `hint`
/// and re-checks once, which settles every time outside a transition gap.
fn assume_local(local: PrimitiveDateTime, zone: &dyn LocalZone, hint: UtcOffset) -> OffsetDateTime {
    let first = zone.offset_at(local.assume_offset(hint));
    let candidate = local.assume_offset(first);
    let second = zone.offset_at(candidate);
    if second == first {
        candidate
    } else {
        local.assume_offset(second)
    }
}

/// The length of a canonical relative token such as `5m` or `2mo`, if it is one.
pub fn relative_duration(text: &str) -> Option<Duration> {
    let (count, unit) = split_relative(text.trim())?;
    let secs = count.checked_mul(unit.seconds())?;
    i64::try_from(secs).ok().map(Duration::seconds)
}

fn invalid(input: &str) -> ParseError {
    ParseError::InvalidFormat {
        input: input.to_string(),
    }
}

fn split_relative(s: &str) -> Option<(u64, Unit)> {
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if digits_end == 0 {
        return None;
    }
    let (digits, rest) = s.split_at(digits_end);
    let unit = Unit::from_word(rest.trim_start())?;
    // Overlong digit runs are still a duration, just an unusable one.
    let count = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some((count, unit))
}

fn resolve_relative(
    input: &str,
    count: u64,
    unit: Unit,
    now: OffsetDateTime,
) -> Result<LockTimeSpec, ParseError> {
    if count == 0 {
        return Err(invalid(input));
    }
    let secs = count
        .checked_mul(unit.seconds())
        .and_then(|s| i64::try_from(s).ok())
        .ok_or_else(|| invalid(input))?;
    let unlock = now
        .checked_add(Duration::seconds(secs))
        .ok_or_else(|| invalid(input))?;
    let duration_ms = (secs as u64)
        .checked_mul(1000)
        .ok_or_else(|| invalid(input))?;
    Ok(LockTimeSpec {
        canonical_duration_text: format!("{count}{}", unit.token()),
        unlock_instant: unlock.to_offset(UtcOffset::UTC),
        duration_ms,
        resolved_at: now.to_offset(UtcOffset::UTC),
        kind: LockTimeKind::Relative,
    })
}

fn parse_absolute(s: &str) -> Option<(PrimitiveDateTime, String)> {
    if let Ok(dt) = PrimitiveDateTime::parse(s, DATE_HMS) {
        let text = dt.format(DATE_HMS).ok()?;
        return Some((dt, text));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, DATE_HM) {
        let text = dt.format(DATE_HMS).ok()?;
        return Some((dt, text));
    }
    if let Ok(date) = Date::parse(s, DATE) {
        let text = date.format(DATE).ok()?;
        return Some((date.midnight(), text));
    }
    None
}

/// Render a wait as `1d 02h 03m 04s`, dropping leading zero components.
pub fn format_countdown(remaining_ms: u64) -> String {
    let total = remaining_ms.div_ceil(1000);
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (mins, secs) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d {hours:02}h {mins:02}m {secs:02}s")
    } else if hours > 0 {
        format!("{hours}h {mins:02}m {secs:02}s")
    } else if mins > 0 {
        format!("{mins}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}
