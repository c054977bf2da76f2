//! ClickHouse-specific error types.

use tgarc_core::SinkError;
use thiserror::Error;

/// Errors from the ClickHouse HTTP interface.
#[derive(Error, Debug)]
pub enum ClickHouseError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("ClickHouse error {status}{}: {message}", code_suffix(.code.as_deref()))]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Response body could not be interpreted.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Row serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn code_suffix(code: Option<&str>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

pub type ClickHouseResult<T> = Result<T, ClickHouseError>;

impl ClickHouseError {
    /// Convert into the pipeline's sink error. `kind` classifies failures the
    /// server reported for this operation.
    #[must_use]
    pub fn into_sink_error(self, kind: fn(String) -> SinkError) -> SinkError {
        match &self {
            Self::Http(e) if e.is_connect() || e.is_timeout() => {
                SinkError::Unavailable(self.to_string())
            }
            Self::Decode(_) => SinkError::Decode(self.to_string()),
            _ => kind(self.to_string()),
        }
    }
}
