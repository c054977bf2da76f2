//! Telegram-specific error types.

use std::time::Duration;

use tgarc_core::SourceError;
use thiserror::Error;

/// Telegram-specific errors.
///
/// Display strings never contain the bot token: request URLs are stripped
/// from transport errors before they are wrapped.
#[derive(Error, Debug)]
pub enum TelegramError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// Response body was not valid JSON for the expected type
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bot API returned `ok: false`
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    /// Handle cannot name a public channel
    #[error("invalid channel handle '{handle}': {reason}")]
    InvalidHandle { handle: String, reason: String },
}

pub type TelegramResult<T> = Result<T, TelegramError>;

impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

impl TelegramError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Get the suggested retry delay.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }

    /// Convert to the pipeline's source error.
    #[must_use]
    pub fn into_source_error(self) -> SourceError {
        match self {
            Self::Api { code: 401, description, .. } => SourceError::Authentication(description),
            Self::Api {
                code,
                description,
                retry_after,
            } => SourceError::Api {
                code,
                description,
                retry_after: retry_after.map(Duration::from_secs),
            },
            Self::Http(e) => SourceError::Connection(e.to_string()),
            Self::Json(e) => SourceError::Decode(e.to_string()),
            Self::InvalidHandle { handle, reason } => SourceError::Resolution { handle, reason },
        }
    }

    /// Convert a failed `getChat` for `handle`: chat-level rejections become
    /// resolution failures, everything else keeps its kind.
    #[must_use]
    pub fn into_resolution_error(self, handle: &str) -> SourceError {
        match self {
            Self::Api {
                code: 400 | 403 | 404,
                description,
                ..
            } => SourceError::Resolution {
                handle: handle.to_string(),
                reason: description,
            },
            other => other.into_source_error(),
        }
    }
}
