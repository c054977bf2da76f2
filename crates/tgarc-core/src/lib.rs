//! Resumable channel ingestion.
//!
//! A run resolves the configured channels, replays each channel's history
//! from its stored watermark, then tails new messages until shutdown. The
//! messaging platform and the analytical store sit behind the
//! [`MessageSource`] and [`MessageSink`] traits.

#![forbid(unsafe_code)]

pub mod backfill;
pub mod config;
pub mod error;
pub mod identity;
pub mod live;
pub mod memory;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod types;
pub mod watermark;
pub mod writer;

pub use backfill::{BackfillOptions, BackfillReport, BackfillScanner, resume_point};
pub use config::{DEFAULT_LOOKBACK_DAYS, IngestConfig, ResolutionPolicy, parse_channel_list};
pub use error::{
    ConfigError, IngestError, IngestResult, SinkError, SinkResult, SourceError, SourceResult,
};
pub use identity::{channel_identity, identity_or_unknown};
pub use live::{LiveOutcome, LiveReport, LiveTailer, StopReason};
pub use memory::{MemoryLiveHandle, MemorySink, MemorySource};
pub use pipeline::{Pipeline, PipelinePhase, Resolution, ResolvedChannel, RunReport};
pub use sink::MessageSink;
pub use source::{LiveFeed, MessageSource};
pub use types::{
    ChannelIdentity, ChannelRef, HistoryPage, MessageRecord, PageToken, SourceMessage,
    SourceTimestamp, truncate_to_millis,
};
pub use watermark::WatermarkStore;
pub use writer::{BatchWriter, DEFAULT_BACKFILL_BATCH_SIZE, FlushOutcome, LIVE_BATCH_SIZE, WriterStats};
