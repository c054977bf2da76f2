//! Durable store collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SinkResult;
use crate::types::{ChannelIdentity, MessageRecord};

/// Append-only store partitioned and ordered by `(channel, timestamp)`.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Create database and table if absent. Safe to call concurrently.
    async fn ensure_schema(&self) -> SinkResult<()>;

    /// Maximum stored timestamp for `channel`, `None` when it has no rows.
    async fn max_timestamp(&self, channel: &ChannelIdentity) -> SinkResult<Option<DateTime<Utc>>>;

    /// Write all rows or none of them.
    async fn insert_batch(&self, rows: &[MessageRecord]) -> SinkResult<()>;
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for std::sync::Arc<T> {
    async fn ensure_schema(&self) -> SinkResult<()> {
        (**self).ensure_schema().await
    }

    async fn max_timestamp(&self, channel: &ChannelIdentity) -> SinkResult<Option<DateTime<Utc>>> {
        (**self).max_timestamp(channel).await
    }

    async fn insert_batch(&self, rows: &[MessageRecord]) -> SinkResult<()> {
        (**self).insert_batch(rows).await
    }
}
