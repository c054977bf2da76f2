//! Connection settings for the ClickHouse sink.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tgarc_core::ConfigError;
use url::Url;

pub const DEFAULT_URL: &str = "http://localhost:8123";
pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_DATABASE: &str = "tg";
pub const DEFAULT_TABLE: &str = "channel_messages";

/// ClickHouse HTTP interface settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// Base URL of the HTTP interface.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_table")]
    pub table: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_url() -> String {
    DEFAULT_URL.into()
}

fn default_user() -> String {
    DEFAULT_USER.into()
}

fn default_database() -> String {
    DEFAULT_DATABASE.into()
}

fn default_table() -> String {
    DEFAULT_TABLE.into()
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            table: default_table(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl ClickHouseConfig {
    /// Builder: set the HTTP endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Builder: set user and password.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Builder: set database and table.
    #[must_use]
    pub fn with_table(mut self, database: impl Into<String>, table: impl Into<String>) -> Self {
        self.database = database.into();
        self.table = table.into();
        self
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `database.table`, only meaningful after [`validate`](Self::validate).
    #[must_use]
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Parse the endpoint URL.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for unparseable or non-HTTP URLs.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::Invalid {
            name: "clickhouse url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: "clickhouse url",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// Validate the configuration.
    ///
    /// Database and table names are interpolated into SQL, so only plain
    /// identifiers are accepted.
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        if self.user.is_empty() {
            return Err(ConfigError::Missing("clickhouse user"));
        }
        validate_identifier("clickhouse database", &self.database)?;
        validate_identifier("clickhouse table", &self.table)?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "clickhouse request timeout",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`.
///
/// # Errors
/// Returns [`ConfigError::Invalid`] naming `name` when `value` is not a plain
/// identifier.
pub fn validate_identifier(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            name,
            reason: format!("'{value}' is not a plain identifier"),
        })
    }
}
