//! Live tail: writes newly emitted messages as they arrive.
//!
//! Live delivery starts only after every channel has been backfilled up to
//! "now", and the source does not replay history through the subscription,
//! so no watermark check happens here.

use std::collections::HashSet;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::backfill::passes_empty_policy;
use crate::error::{IngestError, IngestResult};
use crate::identity::identity_or_unknown;
use crate::sink::MessageSink;
use crate::source::LiveFeed;
use crate::types::{ChannelRef, MessageRecord, SourceMessage};
use crate::writer::BatchWriter;

/// How the live phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown signal received.
    Shutdown,
    /// The source closed the subscription.
    Disconnected,
}

/// What happened to a single live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Written,
    SkippedEmpty,
    /// Emitted by a channel outside the subscribed set.
    SkippedForeign,
}

/// Counters for the live phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveReport {
    pub received: u64,
    pub written: u64,
    pub skipped_empty: u64,
    pub skipped_foreign: u64,
}

/// Converts live messages into rows and writes them immediately.
#[derive(Debug)]
pub struct LiveTailer<'a, K: MessageSink> {
    writer: BatchWriter<'a, K>,
    channel_ids: HashSet<i64>,
    store_empty: bool,
    report: LiveReport,
}

impl<'a, K: MessageSink> LiveTailer<'a, K> {
    #[must_use]
    pub fn new(sink: &'a K, channels: &[ChannelRef], store_empty: bool) -> Self {
        Self {
            writer: BatchWriter::unbuffered(sink),
            channel_ids: channels.iter().map(|c| c.id).collect(),
            store_empty,
            report: LiveReport::default(),
        }
    }

    #[must_use]
    pub const fn report(&self) -> LiveReport {
        self.report
    }

    /// Process one delivered message.
    pub async fn handle(&mut self, message: SourceMessage) -> IngestResult<LiveOutcome> {
        self.report.received += 1;

        // Messages without a channel are kept under "unknown".
        if let Some(channel) = &message.channel {
            if !self.channel_ids.contains(&channel.id) {
                debug!(channel_id = channel.id, "Ignoring message from unsubscribed channel");
                self.report.skipped_foreign += 1;
                return Ok(LiveOutcome::SkippedForeign);
            }
        }

        if !passes_empty_policy(&message, self.store_empty) {
            self.report.skipped_empty += 1;
            return Ok(LiveOutcome::SkippedEmpty);
        }

        let identity = identity_or_unknown(message.channel.as_ref());
        let ts = message.timestamp.to_utc();
        let record = MessageRecord::new(ts, identity.clone(), message.text.unwrap_or_default());
        self.writer
            .append(record)
            .await
            .map_err(|source| IngestError::ChannelWrite {
                channel: identity.clone(),
                source,
            })?;
        self.report.written += 1;
        debug!(channel = %identity, ts = %ts, "Live message stored");
        Ok(LiveOutcome::Written)
    }

    /// Consume `feed` until shutdown or disconnection.
    ///
    /// A source error delivered through the feed ends the run.
    pub async fn run(
        &mut self,
        feed: &mut LiveFeed,
        shutdown: &mut watch::Receiver<bool>,
    ) -> IngestResult<StopReason> {
        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Shutdown;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Shutdown;
                    }
                }
                next = feed.next() => match next {
                    Some(Ok(message)) => {
                        self.handle(message).await?;
                    }
                    Some(Err(err)) => {
                        return Err(IngestError::source_failure("live", err));
                    }
                    None => break StopReason::Disconnected,
                },
            }
        };

        self.finish().await?;
        info!(?reason, received = self.report.received, written = self.report.written, "Live tail stopped");
        Ok(reason)
    }

    /// Flush anything still buffered.
    pub async fn finish(&mut self) -> IngestResult<()> {
        self.writer
            .flush()
            .await
            .map(|_| ())
            .map_err(|e| IngestError::sink_failure("live flush", e))
    }
}
