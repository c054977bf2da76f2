//! In-memory source and sink.
//!
//! Used by tests and dry runs. The sink keeps rows in insertion order and can
//! be told to fail; the source serves scripted history and a live channel the
//! caller pushes into.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{SinkError, SinkResult, SourceError, SourceResult};
use crate::sink::MessageSink;
use crate::source::{LiveFeed, MessageSource};
use crate::types::{
    ChannelIdentity, ChannelRef, HistoryPage, MessageRecord, PageToken, SourceMessage,
};

const DEFAULT_PAGE_SIZE: usize = 100;
const LIVE_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct SinkState {
    schema_ready: bool,
    rows: Vec<MessageRecord>,
    batch_sizes: Vec<usize>,
    insert_calls: usize,
    /// Scripted outcomes for upcoming inserts; `None` lets one through.
    script: VecDeque<Option<String>>,
}

/// Sink that keeps rows in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `insert_batch` call fail with `message`.
    pub fn fail_next_insert(&self, message: impl Into<String>) {
        self.lock().script.push_back(Some(message.into()));
    }

    /// Let `successes` inserts through, then fail the one after with `message`.
    pub fn fail_insert_after(&self, successes: usize, message: impl Into<String>) {
        let mut state = self.lock();
        state.script.extend(std::iter::repeat_n(None, successes));
        state.script.push_back(Some(message.into()));
    }

    /// All stored rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<MessageRecord> {
        self.lock().rows.clone()
    }

    /// Stored rows for one channel.
    #[must_use]
    pub fn rows_for(&self, channel: &str) -> Vec<MessageRecord> {
        self.lock()
            .rows
            .iter()
            .filter(|r| r.channel().as_str() == channel)
            .cloned()
            .collect()
    }

    /// Sizes of the batches that were written successfully.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    /// Number of `insert_batch` calls, failed ones included.
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    #[must_use]
    pub fn schema_ready(&self) -> bool {
        self.lock().schema_ready
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn ensure_schema(&self) -> SinkResult<()> {
        self.lock().schema_ready = true;
        Ok(())
    }

    async fn max_timestamp(&self, channel: &ChannelIdentity) -> SinkResult<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|r| r.channel() == channel)
            .map(MessageRecord::timestamp)
            .max())
    }

    async fn insert_batch(&self, rows: &[MessageRecord]) -> SinkResult<()> {
        let mut state = self.lock();
        state.insert_calls += 1;
        if let Some(message) = state.script.pop_front().flatten() {
            return Err(SinkError::Write(message));
        }
        state.rows.extend_from_slice(rows);
        state.batch_sizes.push(rows.len());
        Ok(())
    }
}

/// Handle for pushing live messages into a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryLiveHandle {
    tx: mpsc::Sender<SourceResult<SourceMessage>>,
}

impl MemoryLiveHandle {
    /// Deliver a live message.
    ///
    /// # Errors
    /// Fails once the subscriber dropped its feed.
    pub async fn send(&self, message: SourceMessage) -> SourceResult<()> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| SourceError::Connection("live feed dropped".into()))
    }

    /// Deliver a source failure to the subscriber.
    ///
    /// # Errors
    /// Fails once the subscriber dropped its feed.
    pub async fn fail(&self, error: SourceError) -> SourceResult<()> {
        self.tx
            .send(Err(error))
            .await
            .map_err(|_| SourceError::Connection("live feed dropped".into()))
    }
}

/// Scripted messaging source.
#[derive(Debug)]
pub struct MemorySource {
    channels: HashMap<String, ChannelRef>,
    history: HashMap<i64, Vec<SourceMessage>>,
    page_size: usize,
    live_tx: Option<mpsc::Sender<SourceResult<SourceMessage>>>,
    live_rx: Option<mpsc::Receiver<SourceResult<SourceMessage>>>,
    connected: bool,
    page_requests: Vec<(i64, Option<PageToken>)>,
    subscribed: Vec<ChannelRef>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        let (live_tx, live_rx) = mpsc::channel(LIVE_BUFFER);
        Self {
            channels: HashMap::new(),
            history: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            live_tx: Some(live_tx),
            live_rx: Some(live_rx),
            connected: false,
            page_requests: Vec::new(),
            subscribed: Vec::new(),
        }
    }

    /// Builder: make `handle` resolve to `channel`.
    #[must_use]
    pub fn with_channel(mut self, handle: impl Into<String>, channel: ChannelRef) -> Self {
        self.channels.insert(handle.into(), channel);
        self
    }

    /// Builder: messages per history page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a text message to a channel's history.
    pub fn push_history(
        &mut self,
        channel: &ChannelRef,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) {
        self.push_history_message(channel, timestamp, Some(text.into()));
    }

    /// Add a message with optional text to a channel's history.
    pub fn push_history_message(
        &mut self,
        channel: &ChannelRef,
        timestamp: DateTime<Utc>,
        text: Option<String>,
    ) {
        let messages = self.history.entry(channel.id).or_default();
        let message = SourceMessage::new(Some(channel.clone()), timestamp, text);
        let at = messages.partition_point(|m| m.timestamp.to_utc() <= timestamp);
        messages.insert(at, message);
    }

    /// Handle for delivering live messages after `subscribe`.
    ///
    /// Take handles before subscribing; the feed reports a disconnect once
    /// every handle is dropped.
    #[must_use]
    pub fn live_handle(&self) -> MemoryLiveHandle {
        let tx = self
            .live_tx
            .clone()
            .unwrap_or_else(|| mpsc::channel(1).0);
        MemoryLiveHandle { tx }
    }

    /// `(channel id, page token)` for every history request, in order.
    #[must_use]
    pub fn page_requests(&self) -> &[(i64, Option<PageToken>)] {
        &self.page_requests
    }

    /// Channels passed to `subscribe`.
    #[must_use]
    pub fn subscribed(&self) -> &[ChannelRef] {
        &self.subscribed
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn connect(&mut self) -> SourceResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn resolve_channel(&mut self, handle: &str) -> SourceResult<ChannelRef> {
        self.channels
            .get(handle)
            .cloned()
            .ok_or_else(|| SourceError::Resolution {
                handle: handle.to_string(),
                reason: "no such channel".into(),
            })
    }

    async fn history_page(
        &mut self,
        channel: &ChannelRef,
        since: DateTime<Utc>,
        page: Option<PageToken>,
    ) -> SourceResult<HistoryPage> {
        self.page_requests.push((channel.id, page));

        let Some(messages) = self.history.get(&channel.id) else {
            return Ok(HistoryPage::default());
        };
        let eligible: Vec<&SourceMessage> = messages
            .iter()
            .filter(|m| m.timestamp.to_utc() >= since)
            .collect();

        let offset = page.map_or(0, |token| usize::try_from(token.0).unwrap_or(usize::MAX));
        let end = offset.saturating_add(self.page_size).min(eligible.len());
        let batch = eligible
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|m| (*m).clone())
            .collect();

        if end < eligible.len() {
            let next = PageToken(u64::try_from(end).unwrap_or(u64::MAX));
            Ok(HistoryPage::with_next(batch, next))
        } else {
            Ok(HistoryPage::last(batch))
        }
    }

    async fn subscribe(&mut self, channels: &[ChannelRef]) -> SourceResult<LiveFeed> {
        let rx = self
            .live_rx
            .take()
            .ok_or_else(|| SourceError::Connection("already subscribed".into()))?;
        self.live_tx = None;
        self.subscribed = channels.to_vec();
        Ok(LiveFeed::new(rx, None))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
