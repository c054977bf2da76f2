//! Batched writes to the sink.
//!
//! Backfill uses a large threshold to amortize write overhead; the live path
//! uses threshold 1 so every message is written as soon as it arrives. The
//! two writers share the sink but not their buffers.

use tracing::{debug, warn};

use crate::error::{ConfigError, SinkResult};
use crate::sink::MessageSink;
use crate::types::MessageRecord;

/// Default flush threshold for backfill.
pub const DEFAULT_BACKFILL_BATCH_SIZE: usize = 1000;

/// Flush threshold for the live path.
pub const LIVE_BATCH_SIZE: usize = 1;

/// Result of a flush that reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub rows: usize,
}

/// Counters for one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub rows_appended: u64,
    pub rows_flushed: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

/// Buffers records and writes them as one `insert_batch` call.
#[derive(Debug)]
pub struct BatchWriter<'a, K: MessageSink> {
    sink: &'a K,
    threshold: usize,
    buffer: Vec<MessageRecord>,
    stats: WriterStats,
}

impl<'a, K: MessageSink> BatchWriter<'a, K> {
    /// Create a writer that flushes once `threshold` records are buffered.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `threshold` is zero.
    pub fn new(sink: &'a K, threshold: usize) -> Result<Self, ConfigError> {
        if threshold == 0 {
            return Err(ConfigError::Invalid {
                name: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            sink,
            threshold,
            buffer: Vec::with_capacity(threshold.min(DEFAULT_BACKFILL_BATCH_SIZE)),
            stats: WriterStats::default(),
        })
    }

    /// Writer for the live path (threshold 1).
    #[must_use]
    pub fn unbuffered(sink: &'a K) -> Self {
        Self {
            sink,
            threshold: LIVE_BATCH_SIZE,
            buffer: Vec::with_capacity(LIVE_BATCH_SIZE),
            stats: WriterStats::default(),
        }
    }

    /// Number of records waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Buffer a record, flushing when the threshold is reached.
    ///
    /// Returns the flush outcome when this append triggered one.
    pub async fn append(&mut self, record: MessageRecord) -> SinkResult<Option<FlushOutcome>> {
        self.buffer.push(record);
        self.stats.rows_appended += 1;
        if self.buffer.len() >= self.threshold {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Write everything buffered. An empty buffer does not touch the sink.
    ///
    /// On failure the buffer is kept intact; the caller decides what to do.
    pub async fn flush(&mut self) -> SinkResult<FlushOutcome> {
        if self.buffer.is_empty() {
            return Ok(FlushOutcome { rows: 0 });
        }

        let rows = self.buffer.len();
        match self.sink.insert_batch(&self.buffer).await {
            Ok(()) => {
                self.buffer.clear();
                self.stats.flushes += 1;
                self.stats.rows_flushed += rows as u64;
                debug!(rows, "Batch flushed");
                Ok(FlushOutcome { rows })
            }
            Err(err) => {
                self.stats.failed_flushes += 1;
                warn!(rows, error = %err, "Batch flush failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySink;
    use crate::types::ChannelIdentity;
    use chrono::{Duration, TimeZone, Utc};

    fn record(i: i64) -> MessageRecord {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        MessageRecord::new(
            base + Duration::milliseconds(i),
            ChannelIdentity::new("@news"),
            format!("m{i}"),
        )
    }

    #[tokio::test]
    async fn flushes_exactly_at_threshold() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();

        for i in 0..999 {
            assert_eq!(writer.append(record(i)).await.unwrap(), None);
        }
        assert!(sink.batch_sizes().is_empty());

        let outcome = writer.append(record(999)).await.unwrap();
        assert_eq!(outcome, Some(FlushOutcome { rows: 1000 }));
        assert_eq!(sink.batch_sizes(), vec![1000]);
        assert_eq!(writer.pending(), 0);

        assert_eq!(writer.append(record(1000)).await.unwrap(), None);
        assert_eq!(writer.pending(), 1);
        assert_eq!(sink.batch_sizes(), vec![1000]);
    }

    #[tokio::test]
    async fn explicit_flush_writes_remainder() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 1000).unwrap();
        for i in 0..1037 {
            writer.append(record(i)).await.unwrap();
        }
        let outcome = writer.flush().await.unwrap();
        assert_eq!(outcome.rows, 37);
        assert_eq!(sink.batch_sizes(), vec![1000, 37]);

        let stats = writer.stats();
        assert_eq!(stats.rows_appended, 1037);
        assert_eq!(stats.rows_flushed, 1037);
        assert_eq!(stats.flushes, 2);
    }

    #[tokio::test]
    async fn empty_flush_is_noop() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 10).unwrap();
        assert_eq!(writer.flush().await.unwrap(), FlushOutcome { rows: 0 });
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test]
    async fn unbuffered_writer_flushes_every_append() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::unbuffered(&sink);
        writer.append(record(1)).await.unwrap();
        writer.append(record(2)).await.unwrap();
        assert_eq!(sink.batch_sizes(), vec![1, 1]);
    }

    #[tokio::test]
    async fn failed_flush_keeps_buffer() {
        let sink = MemorySink::new();
        let mut writer = BatchWriter::new(&sink, 3).unwrap();
        writer.append(record(1)).await.unwrap();
        writer.append(record(2)).await.unwrap();

        sink.fail_next_insert("connection refused");
        assert!(writer.append(record(3)).await.is_err());
        assert_eq!(writer.pending(), 3);
        assert_eq!(writer.stats().failed_flushes, 1);
        assert!(sink.rows().is_empty());

        assert_eq!(writer.flush().await.unwrap().rows, 3);
        assert_eq!(sink.rows().len(), 3);
    }

    #[test]
    fn zero_threshold_rejected() {
        let sink = MemorySink::new();
        assert!(BatchWriter::new(&sink, 0).is_err());
    }
}
