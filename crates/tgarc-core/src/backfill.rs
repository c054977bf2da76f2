//! Historical replay for one channel.
//!
//! Pages are pulled lazily from the source, oldest first, starting at the
//! watermark (or `now - lookback` when the channel has none). Anything at or
//! before the watermark is already stored and gets dropped, so re-running a
//! backfill after a crash never duplicates rows.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::identity::channel_identity;
use crate::sink::MessageSink;
use crate::source::MessageSource;
use crate::types::{ChannelIdentity, ChannelRef, MessageRecord, SourceMessage};
use crate::writer::BatchWriter;

/// Knobs for the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillOptions {
    pub lookback: TimeDelta,
    pub store_empty: bool,
}

/// What one channel's backfill did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub channel: ChannelIdentity,
    pub watermark: Option<DateTime<Utc>>,
    pub start: DateTime<Utc>,
    pub pages: u64,
    pub messages_seen: u64,
    pub rows_written: u64,
    pub skipped_stale: u64,
    pub skipped_empty: u64,
    /// Stopped early on a shutdown signal.
    pub interrupted: bool,
}

impl BackfillReport {
    fn new(channel: ChannelIdentity, watermark: Option<DateTime<Utc>>, start: DateTime<Utc>) -> Self {
        Self {
            channel,
            watermark,
            start,
            pages: 0,
            messages_seen: 0,
            rows_written: 0,
            skipped_stale: 0,
            skipped_empty: 0,
            interrupted: false,
        }
    }
}

/// Where backfill starts for a channel.
#[must_use]
pub fn resume_point(
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback: TimeDelta,
) -> DateTime<Utc> {
    watermark.unwrap_or_else(|| now - lookback)
}

/// True when the message text passes the empty-message policy.
pub(crate) fn passes_empty_policy(message: &SourceMessage, store_empty: bool) -> bool {
    store_empty || !message.is_blank()
}

/// Replays history for one channel through a writer.
#[derive(Debug, Clone, Copy)]
pub struct BackfillScanner {
    options: BackfillOptions,
}

impl BackfillScanner {
    #[must_use]
    pub const fn new(options: BackfillOptions) -> Self {
        Self { options }
    }

    /// Backfill `channel` and flush whatever remains buffered.
    ///
    /// `shutdown` is checked before every page request; when set, the scan
    /// stops after flushing the rows appended so far.
    pub async fn scan<S, K>(
        &self,
        source: &mut S,
        writer: &mut BatchWriter<'_, K>,
        channel: &ChannelRef,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> IngestResult<BackfillReport>
    where
        S: MessageSource + ?Sized,
        K: MessageSink,
    {
        let identity = channel_identity(channel);
        let start = resume_point(watermark, now, self.options.lookback);
        let mut report = BackfillReport::new(identity.clone(), watermark, start);

        info!(
            channel = %identity,
            watermark = ?watermark,
            start = %start,
            "Backfill starting"
        );

        let mut page_token = None;
        loop {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!(channel = %identity, "Shutdown requested, stopping backfill early");
                report.interrupted = true;
                break;
            }

            let page = source
                .history_page(channel, start, page_token)
                .await
                .map_err(|e| IngestError::source_failure("backfill", e))?;
            report.pages += 1;
            debug!(
                channel = %identity,
                page = report.pages,
                messages = page.messages.len(),
                "History page received"
            );

            for message in page.messages {
                report.messages_seen += 1;
                let ts = message.timestamp.to_utc();

                if watermark.is_some_and(|mark| ts <= mark) {
                    report.skipped_stale += 1;
                    continue;
                }
                if !passes_empty_policy(&message, self.options.store_empty) {
                    report.skipped_empty += 1;
                    continue;
                }

                let text = message.text.unwrap_or_default();
                let record = MessageRecord::new(ts, identity.clone(), text);
                writer
                    .append(record)
                    .await
                    .map_err(|source| IngestError::ChannelWrite {
                        channel: identity.clone(),
                        source,
                    })?;
                report.rows_written += 1;
            }

            match page.next {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        writer
            .flush()
            .await
            .map_err(|source| IngestError::ChannelWrite {
                channel: identity.clone(),
                source,
            })?;

        info!(
            channel = %identity,
            pages = report.pages,
            seen = report.messages_seen,
            written = report.rows_written,
            skipped_stale = report.skipped_stale,
            skipped_empty = report.skipped_empty,
            "Backfill finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySink, MemorySource};
    use chrono::TimeZone;

    fn options(store_empty: bool) -> BackfillOptions {
        BackfillOptions {
            lookback: TimeDelta::days(7),
            store_empty,
        }
    }

    fn news() -> ChannelRef {
        ChannelRef::new(100).with_username("news")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn resume_point_prefers_watermark() {
        let mark = now() - TimeDelta::hours(1);
        assert_eq!(resume_point(Some(mark), now(), TimeDelta::days(7)), mark);
        assert_eq!(
            resume_point(None, now(), TimeDelta::days(7)),
            now() - TimeDelta::days(7)
        );
    }

    #[tokio::test]
    async fn watermark_boundary_is_inclusive() {
        let mark = now() - TimeDelta::days(1);
        let mut source = MemorySource::new().with_channel("@news", news());
        source.push_history(&news(), mark, "already stored");
        source.push_history(&news(), mark + TimeDelta::milliseconds(1), "new");

        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        let report = BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), Some(mark), now(), None)
            .await
            .unwrap();

        assert_eq!(report.skipped_stale, 1);
        assert_eq!(report.rows_written, 1);
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(), "new");
        assert_eq!(rows[0].timestamp(), mark + TimeDelta::milliseconds(1));
    }

    #[tokio::test]
    async fn empty_messages_follow_policy() {
        let t = now() - TimeDelta::hours(2);
        for (store_empty, expected) in [(false, 0), (true, 1)] {
            let mut source = MemorySource::new().with_channel("@news", news());
            source.push_history_message(&news(), t, Some("   ".into()));

            let sink = MemorySink::new();
            let mut writer = BatchWriter::new(&sink, 1000).unwrap();
            BackfillScanner::new(options(store_empty))
                .scan(&mut source, &mut writer, &news(), None, now(), None)
                .await
                .unwrap();

            let rows = sink.rows();
            assert_eq!(rows.len(), expected, "store_empty={store_empty}");
            if store_empty {
                assert_eq!(rows[0].text(), "   ");
            }
        }
    }

    #[tokio::test]
    async fn media_only_message_stored_as_empty_text_when_enabled() {
        let t = now() - TimeDelta::hours(2);
        let mut source = MemorySource::new().with_channel("@news", news());
        source.push_history_message(&news(), t, None);

        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        BackfillScanner::new(options(true))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap();
        assert_eq!(sink.rows()[0].text(), "");
    }

    #[tokio::test]
    async fn remainder_flushed_at_end_of_channel() {
        let mut source = MemorySource::new()
            .with_channel("@news", news())
            .with_page_size(100);
        let base = now() - TimeDelta::days(3);
        for i in 0..1037 {
            source.push_history(&news(), base + TimeDelta::seconds(i), format!("m{i}"));
        }

        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        let report = BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap();

        assert_eq!(report.rows_written, 1037);
        assert_eq!(report.pages, 11);
        assert_eq!(sink.batch_sizes(), vec![1000, 37]);
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn rows_appended_in_nondecreasing_order() {
        let mut source = MemorySource::new()
            .with_channel("@news", news())
            .with_page_size(2);
        let base = now() - TimeDelta::days(2);
        for i in [5, 1, 3, 2, 4] {
            source.push_history(&news(), base + TimeDelta::minutes(i), format!("m{i}"));
        }

        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap();

        let rows = sink.rows();
        assert!(rows.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert_eq!(rows.first().map(MessageRecord::text), Some("m1"));
    }

    #[tokio::test]
    async fn messages_older_than_lookback_are_not_replayed() {
        let mut source = MemorySource::new().with_channel("@news", news());
        source.push_history(&news(), now() - TimeDelta::days(8), "too old");
        source.push_history(&news(), now() - TimeDelta::days(6), "in window");

        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap();

        let texts: Vec<_> = sink.rows().iter().map(|r| r.text().to_string()).collect();
        assert_eq!(texts, vec!["in window"]);
    }

    #[tokio::test]
    async fn empty_history_is_noop_flush() {
        let mut source = MemorySource::new().with_channel("@news", news());
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        let report = BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap();
        assert_eq!(report.rows_written, 0);
        assert_eq!(report.pages, 1);
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_page() {
        let mut source = MemorySource::new()
            .with_channel("@news", news())
            .with_page_size(1);
        source.push_history(&news(), now() - TimeDelta::hours(3), "a");
        source.push_history(&news(), now() - TimeDelta::hours(2), "b");

        let (_tx, rx) = watch::channel(true);
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        let report = BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), Some(&rx))
            .await
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.pages, 0);
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_surfaces_with_channel() {
        let mut source = MemorySource::new().with_channel("@news", news());
        source.push_history(&news(), now() - TimeDelta::hours(1), "a");

        let sink = MemorySink::new();
        sink.fail_next_insert("table is read-only");
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        let err = BackfillScanner::new(options(false))
            .scan(&mut source, &mut writer, &news(), None, now(), None)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, IngestError::ChannelWrite { channel, .. } if channel.as_str() == "@news"),
            "unexpected error: {err:?}"
        );
    }
}
