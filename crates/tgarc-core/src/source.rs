//! Messaging-source collaborator.
//!
//! A source offers two separate APIs: paged history in ascending order and a
//! push-driven live subscription. There is no unified cursor between them;
//! the pipeline stitches them together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SourceResult;
use crate::types::{ChannelRef, HistoryPage, PageToken, SourceMessage};

/// Live messages delivered by a subscription.
///
/// The producing task is aborted when the feed is dropped.
pub struct LiveFeed {
    messages: mpsc::Receiver<SourceResult<SourceMessage>>,
    join_handle: Option<JoinHandle<()>>,
}

impl LiveFeed {
    /// Wrap a receiver fed by `join_handle`.
    #[must_use]
    pub const fn new(
        messages: mpsc::Receiver<SourceResult<SourceMessage>>,
        join_handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            messages,
            join_handle,
        }
    }

    /// Wait for the next live message. `None` once the source closed the feed.
    pub async fn next(&mut self) -> Option<SourceResult<SourceMessage>> {
        self.messages.recv().await
    }

    /// Stop the producing task.
    pub fn close(&mut self) {
        self.messages.close();
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("has_task", &self.join_handle.is_some())
            .finish_non_exhaustive()
    }
}

/// The messaging platform as seen by the pipeline.
#[async_trait]
pub trait MessageSource: Send {
    /// Establish the connection and verify credentials.
    async fn connect(&mut self) -> SourceResult<()>;

    /// Resolve a configured handle (username, link or numeric id).
    async fn resolve_channel(&mut self, handle: &str) -> SourceResult<ChannelRef>;

    /// Fetch one page of history for `channel`, oldest first, starting at
    /// `since`. Pass the previous page's `next` token to continue.
    async fn history_page(
        &mut self,
        channel: &ChannelRef,
        since: DateTime<Utc>,
        page: Option<PageToken>,
    ) -> SourceResult<HistoryPage>;

    /// Subscribe to new messages across `channels`.
    async fn subscribe(&mut self, channels: &[ChannelRef]) -> SourceResult<LiveFeed>;

    /// Release the connection.
    async fn disconnect(&mut self);
}
