//! Channel identity normalization.
//!
//! Precedence: `@username`, then title, then the numeric id, then `"unknown"`.
//! Backfill and live tail both go through [`channel_identity`]; a mismatch
//! would partition live rows away from their watermark.

use crate::types::{ChannelIdentity, ChannelRef};

/// Derive the identity for a resolved channel.
#[must_use]
pub fn channel_identity(channel: &ChannelRef) -> ChannelIdentity {
    if let Some(username) = non_empty(channel.username.as_deref()) {
        return ChannelIdentity::new(format!("@{}", username.trim_start_matches('@')));
    }
    if let Some(title) = non_empty(channel.title.as_deref()) {
        return ChannelIdentity::new(title);
    }
    if channel.id != 0 {
        return ChannelIdentity::new(channel.id.to_string());
    }
    ChannelIdentity::unknown()
}

/// Like [`channel_identity`], for messages that may carry no channel at all.
#[must_use]
pub fn identity_or_unknown(channel: Option<&ChannelRef>) -> ChannelIdentity {
    channel.map_or_else(ChannelIdentity::unknown, channel_identity)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
