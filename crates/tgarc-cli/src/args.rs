//! Command-line and environment configuration.

use chrono::TimeDelta;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use tgarc_clickhouse::ClickHouseConfig;
use tgarc_core::{IngestConfig, ResolutionPolicy, parse_channel_list};
use tgarc_telegram::{DEFAULT_API_BASE_URL, TelegramSourceConfig};

/// Archive Telegram channels into ClickHouse.
///
/// Backfills each channel from its last stored message, then keeps ingesting
/// new posts until interrupted. Every option can also be set through the
/// environment variable shown next to it.
#[derive(Parser, Debug)]
#[command(name = "tgarc")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Bot API token.
    #[arg(long, env = "TG_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Bot API server.
    #[arg(long, env = "TG_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Comma separated channel handles (`@name`, `t.me/name` or numeric id).
    #[arg(long, env = "TG_CHANNELS")]
    pub channels: String,

    /// Long-poll timeout for live updates, in seconds.
    #[arg(long, env = "TG_POLL_TIMEOUT_SECS", default_value_t = 30)]
    pub poll_timeout_secs: u32,

    /// ClickHouse HTTP interface.
    #[arg(long, env = "CH_URL", default_value = tgarc_clickhouse::config::DEFAULT_URL)]
    pub clickhouse_url: String,

    #[arg(long, env = "CH_USER", default_value = tgarc_clickhouse::config::DEFAULT_USER)]
    pub clickhouse_user: String,

    #[arg(long, env = "CH_PASSWORD", default_value = "", hide_env_values = true)]
    pub clickhouse_password: String,

    #[arg(long, env = "CH_DATABASE", default_value = tgarc_clickhouse::config::DEFAULT_DATABASE)]
    pub clickhouse_database: String,

    #[arg(long, env = "CH_TABLE", default_value = tgarc_clickhouse::config::DEFAULT_TABLE)]
    pub clickhouse_table: String,

    /// Also store messages without text (`1`, `true`, `yes` or `on`).
    #[arg(
        long,
        env = "STORE_EMPTY",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub store_empty: bool,

    /// Backfill window for channels with nothing stored yet, in days.
    #[arg(
        long,
        env = "BACKFILL_LOOKBACK_DAYS",
        default_value_t = tgarc_core::DEFAULT_LOOKBACK_DAYS,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub lookback_days: i64,

    /// Rows per backfill insert.
    #[arg(long, env = "BACKFILL_BATCH_SIZE", default_value_t = tgarc_core::DEFAULT_BACKFILL_BATCH_SIZE)]
    pub batch_size: usize,

    /// What to do when a channel cannot be resolved: `skip` or `abort`.
    #[arg(long, env = "RESOLUTION_POLICY", default_value_t = ResolutionPolicy::Skip)]
    pub resolution_policy: ResolutionPolicy,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(
        long,
        env = "LOG_JSON",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub log_json: bool,
}

impl Args {
    #[must_use]
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig::new(parse_channel_list(&self.channels))
            .with_store_empty(self.store_empty)
            .with_lookback(TimeDelta::days(self.lookback_days))
            .with_backfill_batch_size(self.batch_size)
            .with_resolution_policy(self.resolution_policy)
    }

    #[must_use]
    pub fn clickhouse_config(&self) -> ClickHouseConfig {
        ClickHouseConfig::default()
            .with_url(&self.clickhouse_url)
            .with_credentials(&self.clickhouse_user, &self.clickhouse_password)
            .with_table(&self.clickhouse_database, &self.clickhouse_table)
    }

    #[must_use]
    pub fn telegram_config(&self) -> TelegramSourceConfig {
        TelegramSourceConfig::new(&self.bot_token)
            .with_base_url(&self.api_base_url)
            .with_poll_timeout_secs(self.poll_timeout_secs)
    }
}
