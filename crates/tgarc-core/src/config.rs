//! Pipeline configuration.
//!
//! Built once at startup and handed to the coordinator by value; components
//! never consult the environment themselves.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::writer::DEFAULT_BACKFILL_BATCH_SIZE;

/// Default backfill window when a channel has no watermark.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// What to do when some configured channels fail to resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPolicy {
    /// Log the failure and ingest the channels that did resolve.
    #[default]
    Skip,
    /// Stop the run if any channel fails to resolve.
    Abort,
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for ResolutionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(ConfigError::Invalid {
                name: "resolution_policy",
                reason: format!("expected 'skip' or 'abort', got '{other}'"),
            }),
        }
    }
}

/// Immutable settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Channel handles as configured (usernames, links or numeric ids).
    pub channels: Vec<String>,
    /// Store messages whose text is empty after trimming.
    pub store_empty: bool,
    /// Backfill window used when a channel has no watermark.
    pub lookback: TimeDelta,
    /// Flush threshold for backfill writes.
    pub backfill_batch_size: usize,
    pub resolution_policy: ResolutionPolicy,
}

impl IngestConfig {
    /// Config with defaults for everything but the channel list.
    #[must_use]
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            channels,
            store_empty: false,
            lookback: TimeDelta::days(DEFAULT_LOOKBACK_DAYS),
            backfill_batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
            resolution_policy: ResolutionPolicy::default(),
        }
    }

    /// Builder: toggle storing empty messages.
    #[must_use]
    pub const fn with_store_empty(mut self, store_empty: bool) -> Self {
        self.store_empty = store_empty;
        self
    }

    /// Builder: set the default lookback window.
    #[must_use]
    pub const fn with_lookback(mut self, lookback: TimeDelta) -> Self {
        self.lookback = lookback;
        self
    }

    /// Builder: set the backfill flush threshold.
    #[must_use]
    pub const fn with_backfill_batch_size(mut self, size: usize) -> Self {
        self.backfill_batch_size = size;
        self
    }

    /// Builder: set the resolution policy.
    #[must_use]
    pub const fn with_resolution_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution_policy = policy;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Missing("channels"));
        }
        if let Some(blank) = self.channels.iter().find(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                name: "channels",
                reason: format!("blank channel handle {blank:?}"),
            });
        }
        if self.lookback <= TimeDelta::zero() {
            return Err(ConfigError::Invalid {
                name: "lookback",
                reason: "must be positive".into(),
            });
        }
        if self.backfill_batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "backfill_batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Split a comma separated handle list, dropping blanks.
#[must_use]
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_channel_list(" @news, ,durov ,-100123,"),
            vec!["@news", "durov", "-100123"]
        );
        assert!(parse_channel_list("").is_empty());
    }

    #[test]
    fn defaults_match_reference_behavior() {
        let config = IngestConfig::new(vec!["@news".into()]);
        assert!(!config.store_empty);
        assert_eq!(config.lookback, TimeDelta::days(7));
        assert_eq!(config.backfill_batch_size, 1000);
        assert_eq!(config.resolution_policy, ResolutionPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_settings() {
        assert_eq!(
            IngestConfig::new(vec![]).validate(),
            Err(ConfigError::Missing("channels"))
        );
        assert!(
            IngestConfig::new(vec!["@a".into()])
                .with_backfill_batch_size(0)
                .validate()
                .is_err()
        );
        assert!(
            IngestConfig::new(vec!["@a".into()])
                .with_lookback(TimeDelta::zero())
                .validate()
                .is_err()
        );
    }

    #[test]
    fn resolution_policy_parses() {
        assert_eq!("Abort".parse::<ResolutionPolicy>(), Ok(ResolutionPolicy::Abort));
        assert_eq!(" skip ".parse::<ResolutionPolicy>(), Ok(ResolutionPolicy::Skip));
        assert!("retry".parse::<ResolutionPolicy>().is_err());
    }
}
