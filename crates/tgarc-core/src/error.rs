//! Error types for the ingestion pipeline and its collaborators.

use std::time::Duration;

use thiserror::Error;

use crate::types::ChannelIdentity;

/// Invalid or missing configuration. Always fatal, raised before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Errors raised by a message source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The handle is invalid or the account has no access to it.
    #[error("cannot resolve channel '{handle}': {reason}")]
    Resolution { handle: String, reason: String },

    /// Credentials were rejected; needs operator intervention.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transport-level failure talking to the source.
    #[error("source connection error: {0}")]
    Connection(String),

    /// The source answered with an error.
    #[error("source API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<Duration>,
    },

    /// Response could not be decoded.
    #[error("source decode error: {0}")]
    Decode(String),
}

/// Errors raised by the sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink write rejected: {0}")]
    Write(String),

    #[error("sink query failed: {0}")]
    Query(String),

    #[error("sink schema setup failed: {0}")]
    Schema(String),

    #[error("sink returned an unreadable response: {0}")]
    Decode(String),

    #[error("sink unreachable: {0}")]
    Unavailable(String),
}

/// Pipeline-level errors. Every variant ends the run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source error during {phase}: {source}")]
    Source {
        phase: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("sink error during {phase}: {source}")]
    Sink {
        phase: &'static str,
        #[source]
        source: SinkError,
    },

    #[error("write for channel {channel} failed: {source}")]
    ChannelWrite {
        channel: ChannelIdentity,
        #[source]
        source: SinkError,
    },

    #[error("{} channel(s) failed to resolve: {}", .failures.len(), .failures.join("; "))]
    Resolution { failures: Vec<String> },

    #[error("no configured channel could be resolved")]
    NoChannelsResolved,
}

impl IngestError {
    pub(crate) const fn source_failure(phase: &'static str, source: SourceError) -> Self {
        Self::Source { phase, source }
    }

    pub(crate) const fn sink_failure(phase: &'static str, source: SinkError) -> Self {
        Self::Sink { phase, source }
    }
}

/// Result type for pipeline operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = SourceError::Api {
            code: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.to_string(), "source API error 429: Too Many Requests");
    }

    #[test]
    fn resolution_error_lists_failures() {
        let err = IngestError::Resolution {
            failures: vec!["@a: nope".into(), "@b: gone".into()],
        };
        assert_eq!(
            err.to_string(),
            "2 channel(s) failed to resolve: @a: nope; @b: gone"
        );
    }
}
