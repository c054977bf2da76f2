//! Watermark lookup against the sink.
//!
//! There is no separate ledger: the watermark is the maximum timestamp the
//! sink already holds for a channel. It is read fresh for every backfill and
//! never cached.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::SinkResult;
use crate::sink::MessageSink;
use crate::types::{ChannelIdentity, truncate_to_millis};

/// Reads resume points from the sink.
#[derive(Debug)]
pub struct WatermarkStore<'a, K: MessageSink> {
    sink: &'a K,
}

impl<'a, K: MessageSink> WatermarkStore<'a, K> {
    #[must_use]
    pub const fn new(sink: &'a K) -> Self {
        Self { sink }
    }

    /// Latest durably stored timestamp for `channel`.
    pub async fn last_timestamp(
        &self,
        channel: &ChannelIdentity,
    ) -> SinkResult<Option<DateTime<Utc>>> {
        let watermark = self
            .sink
            .max_timestamp(channel)
            .await?
            .map(truncate_to_millis);
        debug!(channel = %channel, watermark = ?watermark, "Watermark read");
        Ok(watermark)
    }
}
