//! ClickHouse sink for tgarc.
//!
//! Rows land in a `MergeTree` table ordered by `(channel, ts)`; the per-channel
//! watermark is the table's maximum `ts` for that channel.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sink;

pub use config::{ClickHouseConfig, validate_identifier};
pub use error::{ClickHouseError, ClickHouseResult};
pub use sink::{ClickHouseSink, encode_rows, format_timestamp, parse_watermark};
