//! [`MessageSource`] backed by the Telegram Bot API.
//!
//! The Bot API has no history endpoint. What a bot can replay is its pending
//! update queue, which Telegram keeps for 24 hours. On the first history
//! request the queue is drained into per-chat backlogs; history pages are
//! served from there, and the live long-poll loop resumes at the offset the
//! drain left off, so no update is delivered twice.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tgarc_core::{
    ChannelRef, HistoryPage, LiveFeed, MessageSource, PageToken, SourceMessage, SourceResult,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{DEFAULT_API_BASE_URL, TelegramClient};
use crate::error::TelegramError;
use crate::handle::parse_handle;
use crate::types::{Chat, GetUpdatesRequest, Message, Update};

/// Messages per history page.
pub const HISTORY_PAGE_SIZE: usize = 100;
/// Updates requested per `getUpdates` call.
const UPDATES_LIMIT: u32 = 100;
const LIVE_BUFFER: usize = 256;

/// Retry behaviour of the live polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure; doubles per consecutive failure.
    pub base: Duration,
    pub max: Duration,
    /// Consecutive retryable failures tolerated before the feed fails.
    pub max_consecutive_failures: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_consecutive_failures: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-indexed). A server-provided
    /// `retry_after` wins when it is longer.
    #[must_use]
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.min(30);
        let computed = self.base.saturating_mul(1u32 << exp).min(self.max);
        retry_after.map_or(computed, |hint| hint.max(computed))
    }
}

/// Settings for [`TelegramSource`].
#[derive(Clone)]
pub struct TelegramSourceConfig {
    pub token: String,
    pub base_url: String,
    /// Long-poll timeout of live `getUpdates` calls, in seconds.
    pub poll_timeout_secs: u32,
    pub backoff: BackoffConfig,
}

impl std::fmt::Debug for TelegramSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSourceConfig")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl TelegramSourceConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
            poll_timeout_secs: 30,
            backoff: BackoffConfig::default(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub const fn with_poll_timeout_secs(mut self, secs: u32) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Channel reference for a Telegram chat.
#[must_use]
pub fn chat_to_channel(chat: &Chat) -> ChannelRef {
    let mut channel = ChannelRef::new(chat.id);
    if let Some(username) = chat.username.as_deref().filter(|u| !u.is_empty()) {
        channel = channel.with_username(username);
    }
    if let Some(title) = chat.title.as_deref().filter(|t| !t.is_empty()) {
        channel = channel.with_title(title);
    }
    channel
}

/// Convert a Bot API message. `None` when its date is out of range.
#[must_use]
pub fn to_source_message(message: &Message) -> Option<SourceMessage> {
    let timestamp = DateTime::<Utc>::from_timestamp(message.date, 0)?;
    Some(SourceMessage::new(
        Some(chat_to_channel(&message.chat)),
        timestamp,
        message.body().map(String::from),
    ))
}

/// Slice one page out of an ascending backlog.
#[must_use]
pub fn backlog_page(
    backlog: &[SourceMessage],
    since: DateTime<Utc>,
    page: Option<PageToken>,
    page_size: usize,
) -> HistoryPage {
    let eligible: Vec<&SourceMessage> = backlog
        .iter()
        .filter(|m| m.timestamp.to_utc() >= since)
        .collect();
    let offset = page.map_or(0, |token| usize::try_from(token.0).unwrap_or(usize::MAX));
    let end = offset.saturating_add(page_size).min(eligible.len());
    let messages = eligible
        .get(offset..end)
        .unwrap_or_default()
        .iter()
        .map(|m| (*m).clone())
        .collect();

    if end < eligible.len() {
        HistoryPage::with_next(messages, PageToken(u64::try_from(end).unwrap_or(u64::MAX)))
    } else {
        HistoryPage::last(messages)
    }
}

/// Telegram message source.
#[derive(Debug)]
pub struct TelegramSource {
    client: TelegramClient,
    config: TelegramSourceConfig,
    backlog: HashMap<i64, Vec<SourceMessage>>,
    drained: bool,
    next_offset: Option<i64>,
    connected: bool,
}

impl TelegramSource {
    /// Create a source. Nothing is requested until [`MessageSource::connect`].
    ///
    /// # Errors
    /// Returns a connection error if the HTTP client cannot be built.
    pub fn new(config: TelegramSourceConfig) -> SourceResult<Self> {
        let client = TelegramClient::new(config.token.clone())
            .map_err(TelegramError::into_source_error)?
            .with_base_url(config.base_url.clone());
        Ok(Self {
            client,
            config,
            backlog: HashMap::new(),
            drained: false,
            next_offset: None,
            connected: false,
        })
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Offset the next `getUpdates` call starts from.
    #[must_use]
    pub const fn next_offset(&self) -> Option<i64> {
        self.next_offset
    }

    /// Drain the pending update queue into per-chat backlogs. Runs once.
    async fn drain_pending(&mut self) -> SourceResult<()> {
        if self.drained {
            return Ok(());
        }

        let mut total = 0usize;
        loop {
            let request = GetUpdatesRequest::messages(self.next_offset, UPDATES_LIMIT, 0);
            let updates = self
                .client
                .get_updates(&request)
                .await
                .map_err(TelegramError::into_source_error)?;
            if updates.is_empty() {
                break;
            }
            for update in updates {
                self.next_offset = Some(update.update_id + 1);
                if let Some(message) = update_message(update) {
                    self.backlog
                        .entry(message.channel.as_ref().map_or(0, |c| c.id))
                        .or_default()
                        .push(message);
                    total += 1;
                }
            }
        }

        for messages in self.backlog.values_mut() {
            messages.sort_by_key(|m| m.timestamp.to_utc());
        }
        self.drained = true;
        info!(
            messages = total,
            chats = self.backlog.len(),
            next_offset = ?self.next_offset,
            "Pending updates drained"
        );
        Ok(())
    }
}

fn update_message(update: Update) -> Option<SourceMessage> {
    let update_id = update.update_id;
    let message = update.into_message()?;
    let converted = to_source_message(&message);
    if converted.is_none() {
        warn!(update_id, date = message.date, "Dropping message with invalid date");
    }
    converted
}

#[async_trait]
impl MessageSource for TelegramSource {
    #[instrument(skip(self), fields(base_url = %self.client.base_url()))]
    async fn connect(&mut self) -> SourceResult<()> {
        let me = self
            .client
            .get_me()
            .await
            .map_err(TelegramError::into_source_error)?;
        info!(bot_id = me.id, bot_username = ?me.username, "Telegram bot verified");
        self.connected = true;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_channel(&mut self, handle: &str) -> SourceResult<ChannelRef> {
        let chat_id = parse_handle(handle).map_err(TelegramError::into_source_error)?;
        let chat = self
            .client
            .get_chat(chat_id)
            .await
            .map_err(|e| e.into_resolution_error(handle))?;
        // Groups still deliver posts as `message` updates, so they are archived too.
        if !chat.is_channel() {
            warn!(handle, chat_type = %chat.chat_type, "Resolved chat is not a channel");
        }
        Ok(chat_to_channel(&chat))
    }

    async fn history_page(
        &mut self,
        channel: &ChannelRef,
        since: DateTime<Utc>,
        page: Option<PageToken>,
    ) -> SourceResult<HistoryPage> {
        self.drain_pending().await?;
        let backlog = self
            .backlog
            .get(&channel.id)
            .map_or(&[][..], Vec::as_slice);
        Ok(backlog_page(backlog, since, page, HISTORY_PAGE_SIZE))
    }

    async fn subscribe(&mut self, channels: &[ChannelRef]) -> SourceResult<LiveFeed> {
        self.drain_pending().await?;

        let (tx, rx) = mpsc::channel(LIVE_BUFFER);
        let poller = LivePoller {
            client: self.client.clone(),
            chat_ids: channels.iter().map(|c| c.id).collect(),
            offset: self.next_offset,
            poll_timeout_secs: self.config.poll_timeout_secs,
            backoff: self.config.backoff,
        };
        info!(channels = channels.len(), offset = ?self.next_offset, "Starting live polling");
        let join_handle = tokio::spawn(poller.run(tx));
        Ok(LiveFeed::new(rx, Some(join_handle)))
    }

    async fn disconnect(&mut self) {
        if self.connected {
            info!("Telegram source disconnected");
        }
        self.connected = false;
    }
}

/// Long-poll loop feeding a [`LiveFeed`].
struct LivePoller {
    client: TelegramClient,
    chat_ids: HashSet<i64>,
    offset: Option<i64>,
    poll_timeout_secs: u32,
    backoff: BackoffConfig,
}

impl LivePoller {
    async fn run(mut self, tx: mpsc::Sender<SourceResult<SourceMessage>>) {
        let mut consecutive_failures: u32 = 0;

        loop {
            let request =
                GetUpdatesRequest::messages(self.offset, UPDATES_LIMIT, self.poll_timeout_secs);
            let result = tokio::select! {
                () = tx.closed() => {
                    debug!("Live feed dropped, stopping poller");
                    return;
                }
                result = self.client.get_updates(&request) => result,
            };

            match result {
                Ok(updates) => {
                    consecutive_failures = 0;
                    debug!(updates = updates.len(), offset = ?self.offset, "Poll completed");
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        let Some(message) = update_message(update) else {
                            continue;
                        };
                        let subscribed = message
                            .channel
                            .as_ref()
                            .is_some_and(|c| self.chat_ids.contains(&c.id));
                        if !subscribed {
                            continue;
                        }
                        if tx.send(Ok(message)).await.is_err() {
                            debug!("Live feed dropped, stopping poller");
                            return;
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(error = %err, consecutive_failures, "Poll failed with recoverable error");

                    if consecutive_failures >= self.backoff.max_consecutive_failures {
                        error!(
                            failures = consecutive_failures,
                            max = self.backoff.max_consecutive_failures,
                            "Maximum consecutive failures reached"
                        );
                        let _ = tx.send(Err(err.into_source_error())).await;
                        return;
                    }

                    let delay = self.backoff.delay(consecutive_failures - 1, err.retry_after());
                    info!(delay_ms = delay.as_millis(), attempt = consecutive_failures, "Backing off before retry");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = tx.closed() => return,
                    }
                }
                Err(err) => {
                    error!(error = %err, "Poll failed with fatal error");
                    let _ = tx.send(Err(err.into_source_error())).await;
                    return;
                }
            }
        }
    }
}
