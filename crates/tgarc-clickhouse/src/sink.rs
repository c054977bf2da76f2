//! [`MessageSink`] over the ClickHouse HTTP interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tgarc_core::{ChannelIdentity, MessageRecord, MessageSink, SinkError, SinkResult};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ClickHouseConfig;
use crate::error::{ClickHouseError, ClickHouseResult};

const USER_HEADER: &str = "X-ClickHouse-User";
const KEY_HEADER: &str = "X-ClickHouse-Key";
const EXCEPTION_CODE_HEADER: &str = "X-ClickHouse-Exception-Code";
const NULL_MARKER: &str = "\\N";

/// One row in `JSONEachRow` form.
#[derive(Serialize)]
struct Row<'a> {
    ts: String,
    channel: &'a str,
    msg: &'a str,
}

impl<'a> From<&'a MessageRecord> for Row<'a> {
    fn from(record: &'a MessageRecord) -> Self {
        Self {
            ts: format_timestamp(record.timestamp()),
            channel: record.channel().as_str(),
            msg: record.text(),
        }
    }
}

/// `DateTime64(3)` text form, always UTC.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Parse the watermark query result: epoch milliseconds or `\N`.
///
/// # Errors
/// Returns [`ClickHouseError::Decode`] for anything else.
pub fn parse_watermark(body: &str) -> ClickHouseResult<Option<DateTime<Utc>>> {
    let value = body.trim();
    if value.is_empty() || value == NULL_MARKER {
        return Ok(None);
    }
    let millis: i64 = value
        .parse()
        .map_err(|_| ClickHouseError::Decode(format!("expected epoch millis, got '{value}'")))?;
    DateTime::from_timestamp_millis(millis)
        .map(Some)
        .ok_or_else(|| ClickHouseError::Decode(format!("timestamp {millis} out of range")))
}

/// ClickHouse-backed sink.
#[derive(Debug, Clone)]
pub struct ClickHouseSink {
    client: reqwest::Client,
    endpoint: Url,
    config: ClickHouseConfig,
}

impl ClickHouseSink {
    /// Create a sink. No request is made until the first operation.
    ///
    /// # Errors
    /// Returns an error for invalid settings or if the HTTP client cannot be
    /// built.
    pub fn new(config: ClickHouseConfig) -> Result<Self, tgarc_core::ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| tgarc_core::ConfigError::Invalid {
                name: "clickhouse client",
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// POST `body` with the given URL parameters and return the response text.
    async fn post(&self, params: &[(&str, &str)], body: String) -> ClickHouseResult<String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(USER_HEADER, &self.config.user)
            .header(KEY_HEADER, &self.config.password)
            .query(params)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let code = response
                .headers()
                .get(EXCEPTION_CODE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let message = response.text().await.unwrap_or_default().trim().to_string();
            return Err(ClickHouseError::Server {
                status: status.as_u16(),
                code,
                message,
            });
        }
        Ok(response.text().await?)
    }

    fn create_database_sql(&self) -> String {
        format!("CREATE DATABASE IF NOT EXISTS {}", self.config.database)
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (ts DateTime64(3, 'UTC'), channel String, msg String) \
             ENGINE = MergeTree ORDER BY (channel, ts)",
            self.config.qualified_table()
        )
    }

    fn watermark_sql(&self) -> String {
        format!(
            "SELECT toUnixTimestamp64Milli(maxOrNull(ts)) FROM {} \
             WHERE channel = {{channel:String}} FORMAT TabSeparated",
            self.config.qualified_table()
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (ts, channel, msg) FORMAT JSONEachRow",
            self.config.qualified_table()
        )
    }
}

/// Newline-delimited JSON body for an insert.
///
/// # Errors
/// Returns [`ClickHouseError::Json`] if a row cannot be serialized.
pub fn encode_rows(rows: &[MessageRecord]) -> ClickHouseResult<String> {
    let mut body = String::with_capacity(rows.len() * 96);
    for record in rows {
        body.push_str(&serde_json::to_string(&Row::from(record))?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl MessageSink for ClickHouseSink {
    #[instrument(skip(self), fields(table = %self.config.qualified_table()))]
    async fn ensure_schema(&self) -> SinkResult<()> {
        self.post(&[], self.create_database_sql())
            .await
            .map_err(|e| e.into_sink_error(SinkError::Schema))?;
        self.post(&[], self.create_table_sql())
            .await
            .map_err(|e| e.into_sink_error(SinkError::Schema))?;
        info!("ClickHouse schema ready");
        Ok(())
    }

    #[instrument(skip(self, channel), fields(channel = %channel))]
    async fn max_timestamp(&self, channel: &ChannelIdentity) -> SinkResult<Option<DateTime<Utc>>> {
        let body = self
            .post(&[("param_channel", channel.as_str())], self.watermark_sql())
            .await
            .map_err(|e| e.into_sink_error(SinkError::Query))?;
        let watermark = parse_watermark(&body).map_err(|e| e.into_sink_error(SinkError::Query))?;
        debug!(?watermark, "Watermark query returned");
        Ok(watermark)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_batch(&self, rows: &[MessageRecord]) -> SinkResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = encode_rows(rows).map_err(|e| e.into_sink_error(SinkError::Write))?;
        let query = self.insert_sql();
        self.post(&[("query", query.as_str()), ("wait_end_of_query", "1")], body)
            .await
            .map_err(|e| e.into_sink_error(SinkError::Write))?;
        debug!("Batch inserted");
        Ok(())
    }
}
