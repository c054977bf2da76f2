//! Core data model shared by sources, sinks and the pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A resolved, source-specific handle to a channel.
///
/// Fields are explicit options; identity derivation lives in
/// [`crate::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Source-assigned numeric identifier (0 when unknown).
    pub id: i64,
    /// Public username, without the leading `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Human readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ChannelRef {
    /// Create a reference carrying only the numeric id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            title: None,
        }
    }

    /// Builder: set the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Builder: set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Partition key in the sink and lookup key for watermarks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelIdentity(String);

impl ChannelIdentity {
    /// Literal used when nothing identifies the channel.
    pub const UNKNOWN: &'static str = "unknown";

    /// Wrap an already-normalized identity string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The `"unknown"` identity.
    #[must_use]
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Truncate an instant to whole milliseconds (the sink's precision).
#[must_use]
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// One row in the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    timestamp: DateTime<Utc>,
    channel: ChannelIdentity,
    text: String,
}

impl MessageRecord {
    /// Build a record; the timestamp is truncated to millisecond precision.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, channel: ChannelIdentity, text: impl Into<String>) -> Self {
        Self {
            timestamp: truncate_to_millis(timestamp),
            channel,
            text: text.into(),
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelIdentity {
        &self.channel
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Timestamp as delivered by a source: zoned, or naive (assumed UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTimestamp {
    Utc(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl SourceTimestamp {
    /// Normalize to a UTC instant with millisecond precision.
    #[must_use]
    pub fn to_utc(self) -> DateTime<Utc> {
        let ts = match self {
            Self::Utc(ts) => ts,
            Self::Naive(naive) => Utc.from_utc_datetime(&naive),
        };
        truncate_to_millis(ts)
    }
}

impl From<DateTime<Utc>> for SourceTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Utc(value)
    }
}

impl From<NaiveDateTime> for SourceTimestamp {
    fn from(value: NaiveDateTime) -> Self {
        Self::Naive(value)
    }
}

/// A message as produced by the source, before filtering and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Raw text (or caption); `None` for media-only messages.
    pub text: Option<String>,
    pub timestamp: SourceTimestamp,
    /// Originating channel, if the source attached one.
    pub channel: Option<ChannelRef>,
}

impl SourceMessage {
    #[must_use]
    pub fn new(
        channel: Option<ChannelRef>,
        timestamp: impl Into<SourceTimestamp>,
        text: Option<String>,
    ) -> Self {
        Self {
            text,
            timestamp: timestamp.into(),
            channel,
        }
    }

    /// Text with `None` mapped to the empty string.
    #[must_use]
    pub fn raw_text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// True when the text is absent or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.raw_text().trim().is_empty()
    }
}

/// Opaque continuation token for history paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageToken(pub u64);

/// One page of channel history in ascending timestamp order.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<SourceMessage>,
    /// Token for the next page; `None` once history is exhausted.
    pub next: Option<PageToken>,
}

impl HistoryPage {
    /// The final page.
    #[must_use]
    pub const fn last(messages: Vec<SourceMessage>) -> Self {
        Self {
            messages,
            next: None,
        }
    }

    /// A page followed by more history.
    #[must_use]
    pub const fn with_next(messages: Vec<SourceMessage>, next: PageToken) -> Self {
        Self {
            messages,
            next: Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn message_record_truncates_to_millis() {
        let ts = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let record = MessageRecord::new(ts, ChannelIdentity::new("@a"), "x");
        assert_eq!(record.timestamp().nanosecond(), 123_000_000);
    }

    #[test]
    fn naive_timestamp_is_interpreted_as_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 678)
            .unwrap();
        let zoned = Utc.from_utc_datetime(&naive);
        assert_eq!(SourceTimestamp::Naive(naive).to_utc(), zoned);
        assert_eq!(SourceTimestamp::Utc(zoned).to_utc(), zoned);
    }

    #[test]
    fn blank_detection_trims_whitespace() {
        let ts = Utc::now();
        assert!(SourceMessage::new(None, ts, None).is_blank());
        assert!(SourceMessage::new(None, ts, Some(" \n\t".into())).is_blank());
        assert!(!SourceMessage::new(None, ts, Some(" hi ".into())).is_blank());
    }
}
