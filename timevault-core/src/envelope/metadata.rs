use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::FrontMatter;
use crate::error::EnvelopeError;
use crate::stats::ArchiveStats;
use crate::time_expr::LockTimeSpec;

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");

pub mod keys {
    pub const LOCKED: &str = "locked";
    pub const CREATED: &str = "created";
    pub const UNLOCKS: &str = "unlocks";
    pub const DURATION: &str = "duration";
    pub const ORIGINAL_FILE: &str = "original_file";
    pub const UNLOCKED: &str = "unlocked";
    pub const UNLOCKED_TO: &str = "unlocked_to";
    pub const ORIGINAL_SIZE: &str = "original_size";
    pub const COMPRESSED_SIZE: &str = "compressed_size";
    pub const FILE_COUNT: &str = "file_count";
    pub const ARCHIVE: &str = "archive";
}

/// Metadata carried in front of every locked artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemMetadata {
    pub locked: bool,
    pub created: OffsetDateTime,
    pub unlocks: OffsetDateTime,
    pub duration_text: String,
    pub original_filename: String,
    pub unlocked_at: Option<OffsetDateTime>,
    /// Where the last successful unlock wrote its output.
    pub unlocked_to: Option<String>,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub file_count: Option<u32>,
    /// Legacy key files may name their archive explicitly.
    pub archive: Option<String>,
}

impl ItemMetadata {
    pub fn new_locked(
        spec: &LockTimeSpec,
        original_filename: impl Into<String>,
        created: OffsetDateTime,
        stats: Option<ArchiveStats>,
    ) -> Self {
        Self {
            locked: true,
            created: normalize(created),
            unlocks: normalize(spec.unlock_instant),
            duration_text: spec.canonical_duration_text.clone(),
            original_filename: original_filename.into(),
            unlocked_at: None,
            unlocked_to: None,
            original_size: stats.map(|s| s.original_size),
            compressed_size: stats.map(|s| s.compressed_size),
            file_count: stats.map(|s| s.file_count),
            archive: None,
        }
    }

    pub fn is_ready(&self, now: OffsetDateTime) -> bool {
        self.unlocks <= now
    }

    pub fn is_unlocked(&self) -> bool {
        !self.locked
    }

    pub fn mark_unlocked(&mut self, at: OffsetDateTime, output: impl Into<String>) {
        self.locked = false;
        self.unlocked_at = Some(normalize(at));
        self.unlocked_to = Some(output.into());
    }

    /// Back to the sealed state; the time lock itself is untouched.
    pub fn clear_unlock(&mut self) {
        self.locked = true;
        self.unlocked_at = None;
        self.unlocked_to = None;
    }

    /// Checks that hold for every envelope we read or write. Text values are
    /// single-line so they cannot end the header early.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if !self.locked && self.unlocked_at.is_none() {
            return Err(EnvelopeError::MissingUnlockTime);
        }
        let text = [
            (keys::DURATION, Some(self.duration_text.as_str())),
            (keys::ORIGINAL_FILE, Some(self.original_filename.as_str())),
            (keys::UNLOCKED_TO, self.unlocked_to.as_deref()),
            (keys::ARCHIVE, self.archive.as_deref()),
        ];
        for (field, value) in text {
            if let Some(value) = value.filter(|v| !is_single_line(v)) {
                return Err(invalid(field, value));
            }
        }
        Ok(())
    }

    pub fn to_front_matter(&self) -> FrontMatter {
        use keys::*;
        let mut fm = FrontMatter::default();
        fm.push(LOCKED, bool_text(self.locked));
        fm.push(CREATED, format_timestamp(self.created));
        fm.push(UNLOCKS, format_timestamp(self.unlocks));
        fm.push(DURATION, &self.duration_text);
        fm.push(ORIGINAL_FILE, &self.original_filename);
        if let Some(at) = self.unlocked_at {
            fm.push(UNLOCKED, format_timestamp(at));
        }
        if let Some(to) = &self.unlocked_to {
            fm.push(UNLOCKED_TO, to);
        }
        if let Some(n) = self.original_size {
            fm.push(ORIGINAL_SIZE, n.to_string());
        }
        if let Some(n) = self.compressed_size {
            fm.push(COMPRESSED_SIZE, n.to_string());
        }
        if let Some(n) = self.file_count {
            fm.push(FILE_COUNT, n.to_string());
        }
        if let Some(a) = &self.archive {
            fm.push(ARCHIVE, a);
        }
        fm
    }
}

impl FrontMatter {
    /// Validate the raw block as item metadata.
    pub fn to_metadata(&self) -> Result<ItemMetadata, EnvelopeError> {
        use keys::*;
        let meta = ItemMetadata {
            locked: parse_bool(LOCKED, self.require(LOCKED)?)?,
            created: parse_timestamp(CREATED, self.require(CREATED)?)?,
            unlocks: parse_timestamp(UNLOCKS, self.require(UNLOCKS)?)?,
            duration_text: self.require(DURATION)?.to_string(),
            original_filename: self.require(ORIGINAL_FILE)?.to_string(),
            unlocked_at: self
                .get(UNLOCKED)
                .map(|v| parse_timestamp(UNLOCKED, v))
                .transpose()?,
            unlocked_to: self.get(UNLOCKED_TO).map(str::to_string),
            original_size: self
                .get(ORIGINAL_SIZE)
                .map(|v| parse_int(ORIGINAL_SIZE, v))
                .transpose()?,
            compressed_size: self
                .get(COMPRESSED_SIZE)
                .map(|v| parse_int(COMPRESSED_SIZE, v))
                .transpose()?,
            file_count: self
                .get(FILE_COUNT)
                .map(|v| parse_int(FILE_COUNT, v))
                .transpose()?,
            archive: self.get(ARCHIVE).map(str::to_string),
        };
        meta.validate()?;
        Ok(meta)
    }

    fn require(&self, key: &'static str) -> Result<&str, EnvelopeError> {
        self.get(key).ok_or(EnvelopeError::MissingField(key))
    }
}

/// UTC, whole seconds: exactly what the text form can carry.
pub fn normalize(t: OffsetDateTime) -> OffsetDateTime {
    let t = t.to_offset(UtcOffset::UTC);
    t.replace_nanosecond(0).unwrap_or(t)
}

pub fn format_timestamp(t: OffsetDateTime) -> String {
    normalize(t)
        .format(TIMESTAMP)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}

pub fn parse_timestamp(field: &'static str, value: &str) -> Result<OffsetDateTime, EnvelopeError> {
    PrimitiveDateTime::parse(value, TIMESTAMP)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| invalid(field, value))
}

fn bool_text(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, EnvelopeError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(field, value)),
    }
}

/// No line breaks; such a value can be stored as one `key: value` line.
pub fn is_single_line(value: &str) -> bool {
    !value.contains(['\n', '\r'])
}

fn parse_int<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, EnvelopeError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn invalid(field: &'static str, value: &str) -> EnvelopeError {
    EnvelopeError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamps_render_in_utc() {
        let t = datetime!(2025-01-01 02:05:09.999 +02:00);
        assert_eq!(format_timestamp(t), "2025-01-01 00:05:09 UTC");
        assert_eq!(
            parse_timestamp("created", "2025-01-01 00:05:09 UTC").unwrap(),
            datetime!(2025-01-01 00:05:09 UTC)
        );
        assert!(parse_timestamp("created", "2025-01-01T00:05:09Z").is_err());
    }

    fn with_value(fm: &FrontMatter, key: &str, value: &str) -> FrontMatter {
        let mut out = FrontMatter::default();
        for (k, v) in fm.iter() {
            out.push(k, if k == key { value } else { v });
        }
        out
    }

    #[test]
    fn unexpected_boolean_literal_is_rejected() {
        let fm = with_value(&sample().to_front_matter(), keys::LOCKED, "yes");
        assert_eq!(
            fm.to_metadata(),
            Err(EnvelopeError::InvalidValue {
                field: "locked",
                value: "yes".into()
            })
        );
    }

    #[test]
    fn unlocked_requires_timestamp() {
        let fm = with_value(&sample().to_front_matter(), keys::LOCKED, "false");
        assert_eq!(fm.to_metadata(), Err(EnvelopeError::MissingUnlockTime));
    }

    #[test]
    fn line_breaks_in_text_values_are_rejected() {
        let mut meta = sample();
        meta.original_filename = "x\n---".into();
        assert_eq!(
            meta.validate(),
            Err(EnvelopeError::InvalidValue {
                field: "original_file",
                value: "x\n---".into()
            })
        );

        let mut meta = sample();
        meta.mark_unlocked(datetime!(2025-01-01 00:06:00 UTC), "out\rdir");
        assert!(matches!(
            meta.validate(),
            Err(EnvelopeError::InvalidValue { field: "unlocked_to", .. })
        ));

        assert!(sample().validate().is_ok());
    }

    #[test]
    fn missing_required_field() {
        let full = sample().to_front_matter();
        let mut fm = FrontMatter::default();
        for (k, v) in full.iter().filter(|(k, _)| *k != keys::DURATION) {
            fm.push(k, v);
        }
        assert_eq!(fm.to_metadata(), Err(EnvelopeError::MissingField("duration")));
    }

    fn sample() -> ItemMetadata {
        ItemMetadata {
            locked: true,
            created: datetime!(2025-01-01 00:00:00 UTC),
            unlocks: datetime!(2025-01-01 00:05:00 UTC),
            duration_text: "5m".into(),
            original_filename: "notes.txt".into(),
            unlocked_at: None,
            unlocked_to: None,
            original_size: Some(12),
            compressed_size: None,
            file_count: Some(1),
            archive: None,
        }
    }
}
