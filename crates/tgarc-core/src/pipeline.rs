//! Pipeline coordinator.
//!
//! Sequences one process run:
//!
//! ```text
//! START -> RESOLVING -> BACKFILLING(c1) -> ... -> BACKFILLING(cn) -> LIVE -> STOPPED
//! ```
//!
//! Everything runs on a single logical flow: channels are backfilled one at a
//! time and the live subscription opens only after the last backfill drained.

use std::collections::HashSet;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backfill::{BackfillOptions, BackfillReport, BackfillScanner};
use crate::config::{IngestConfig, ResolutionPolicy};
use crate::error::{IngestError, IngestResult};
use crate::identity::channel_identity;
use crate::live::{LiveReport, LiveTailer, StopReason};
use crate::sink::MessageSink;
use crate::source::MessageSource;
use crate::types::{ChannelIdentity, ChannelRef};
use crate::watermark::WatermarkStore;
use crate::writer::BatchWriter;

/// Coordinator state, observable through [`Pipeline::phase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelinePhase {
    Start,
    Resolving,
    Backfilling { channel: ChannelIdentity },
    Live,
    Stopped,
}

impl PipelinePhase {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resolving => "resolving",
            Self::Backfilling { .. } => "backfilling",
            Self::Live => "live",
            Self::Stopped => "stopped",
        }
    }
}

/// A configured handle together with what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub handle: String,
    pub channel: ChannelRef,
    pub identity: ChannelIdentity,
}

/// Outcome of the resolution phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub resolved: Vec<ResolvedChannel>,
    /// `"handle: reason"` for every handle that failed.
    pub failures: Vec<String>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub channels: Vec<ChannelIdentity>,
    pub skipped_handles: Vec<String>,
    pub backfill: Vec<BackfillReport>,
    pub live: LiveReport,
    pub stop_reason: StopReason,
}

impl RunReport {
    /// Rows written by all backfills.
    #[must_use]
    pub fn backfilled_rows(&self) -> u64 {
        self.backfill.iter().map(|r| r.rows_written).sum()
    }
}

/// Owns the source, the sink and the run's configuration.
pub struct Pipeline<S: MessageSource, K: MessageSink> {
    config: IngestConfig,
    source: S,
    sink: K,
    phase_tx: watch::Sender<PipelinePhase>,
}

impl<S: MessageSource, K: MessageSink> Pipeline<S, K> {
    /// Build a pipeline. The config is validated here.
    ///
    /// # Errors
    /// Returns [`IngestError::Config`] for invalid settings.
    pub fn new(config: IngestConfig, source: S, sink: K) -> IngestResult<Self> {
        config.validate()?;
        let (phase_tx, _) = watch::channel(PipelinePhase::Start);
        Ok(Self {
            config,
            source,
            sink,
            phase_tx,
        })
    }

    /// Subscribe to phase transitions.
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<PipelinePhase> {
        self.phase_tx.subscribe()
    }

    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    #[must_use]
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    fn enter(&self, phase: PipelinePhase) {
        info!(phase = phase.name(), "Pipeline phase");
        self.phase_tx.send_replace(phase);
    }

    /// Run to completion: schema, resolution, backfill, live tail.
    ///
    /// Returns when `shutdown` flips to `true`, when the source disconnects,
    /// or on the first fatal error. The source is disconnected in every case.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> IngestResult<RunReport> {
        let result = self.run_phases(&mut shutdown).await;
        self.source.disconnect().await;
        self.enter(PipelinePhase::Stopped);
        match &result {
            Ok(report) => info!(
                stop_reason = ?report.stop_reason,
                backfilled = report.backfilled_rows(),
                live = report.live.written,
                "Disconnected"
            ),
            Err(err) => error!(error = %err, "Pipeline stopped with error"),
        }
        result
    }

    async fn run_phases(&mut self, shutdown: &mut watch::Receiver<bool>) -> IngestResult<RunReport> {
        self.prepare().await?;

        let resolution = self.resolve_channels().await?;
        let channels: Vec<ChannelRef> = resolution
            .resolved
            .iter()
            .map(|r| r.channel.clone())
            .collect();

        let mut report = RunReport {
            channels: resolution.resolved.iter().map(|r| r.identity.clone()).collect(),
            skipped_handles: resolution.failures,
            backfill: Vec::with_capacity(channels.len()),
            live: LiveReport::default(),
            stop_reason: StopReason::Shutdown,
        };

        for resolved in &resolution.resolved {
            let channel_report = self.backfill_channel(resolved, Some(&*shutdown)).await?;
            let interrupted = channel_report.interrupted;
            report.backfill.push(channel_report);
            if interrupted {
                return Ok(report);
            }
        }

        if *shutdown.borrow() {
            return Ok(report);
        }

        let (live, stop_reason) = self.tail(&channels, shutdown).await?;
        report.live = live;
        report.stop_reason = stop_reason;
        Ok(report)
    }

    /// START: connect the source and make sure the sink schema exists.
    pub async fn prepare(&mut self) -> IngestResult<()> {
        self.enter(PipelinePhase::Start);
        self.sink
            .ensure_schema()
            .await
            .map_err(|e| IngestError::sink_failure("schema setup", e))?;
        self.source
            .connect()
            .await
            .map_err(|e| IngestError::source_failure("connect", e))?;
        info!("Connected");
        Ok(())
    }

    /// RESOLVING: resolve every configured handle, then apply the policy.
    ///
    /// Every handle is attempted even when an earlier one failed, so all
    /// problems are logged in a single run.
    pub async fn resolve_channels(&mut self) -> IngestResult<Resolution> {
        self.enter(PipelinePhase::Resolving);

        let mut resolution = Resolution::default();
        let mut seen = HashSet::new();

        for handle in &self.config.channels {
            match self.source.resolve_channel(handle).await {
                Ok(channel) => {
                    let identity = channel_identity(&channel);
                    if !seen.insert(identity.clone()) {
                        warn!(handle = %handle, channel = %identity, "Duplicate channel handle ignored");
                        continue;
                    }
                    info!(handle = %handle, channel = %identity, id = channel.id, "Channel resolved");
                    resolution.resolved.push(ResolvedChannel {
                        handle: handle.clone(),
                        channel,
                        identity,
                    });
                }
                Err(err) => {
                    warn!(handle = %handle, error = %err, "Channel resolution failed");
                    resolution.failures.push(format!("{handle}: {err}"));
                }
            }
        }

        if !resolution.failures.is_empty()
            && self.config.resolution_policy == ResolutionPolicy::Abort
        {
            return Err(IngestError::Resolution {
                failures: resolution.failures,
            });
        }
        if resolution.resolved.is_empty() {
            return Err(IngestError::NoChannelsResolved);
        }

        let names: Vec<&str> = resolution
            .resolved
            .iter()
            .map(|r| r.identity.as_str())
            .collect();
        info!(
            count = resolution.resolved.len(),
            channels = %names.join(", "),
            skipped = resolution.failures.len(),
            "Listening to channels"
        );
        Ok(resolution)
    }

    /// BACKFILLING: replay one channel from its watermark.
    pub async fn backfill_channel(
        &mut self,
        resolved: &ResolvedChannel,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> IngestResult<BackfillReport> {
        self.enter(PipelinePhase::Backfilling {
            channel: resolved.identity.clone(),
        });

        let watermark = WatermarkStore::new(&self.sink)
            .last_timestamp(&resolved.identity)
            .await
            .map_err(|e| IngestError::sink_failure("watermark read", e))?;

        let mut writer = BatchWriter::new(&self.sink, self.config.backfill_batch_size)?;
        let scanner = BackfillScanner::new(BackfillOptions {
            lookback: self.config.lookback,
            store_empty: self.config.store_empty,
        });
        scanner
            .scan(
                &mut self.source,
                &mut writer,
                &resolved.channel,
                watermark,
                Utc::now(),
                shutdown,
            )
            .await
    }

    /// LIVE: subscribe and write new messages until shutdown or disconnect.
    pub async fn tail(
        &mut self,
        channels: &[ChannelRef],
        shutdown: &mut watch::Receiver<bool>,
    ) -> IngestResult<(LiveReport, StopReason)> {
        self.enter(PipelinePhase::Live);

        let mut feed = self
            .source
            .subscribe(channels)
            .await
            .map_err(|e| IngestError::source_failure("subscribe", e))?;

        let mut tailer = LiveTailer::new(&self.sink, channels, self.config.store_empty);
        let outcome = tailer.run(&mut feed, shutdown).await;
        feed.close();
        let reason = outcome?;
        Ok((tailer.report(), reason))
    }
}

impl<S: MessageSource, K: MessageSink> std::fmt::Debug for Pipeline<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("phase", &*self.phase_tx.borrow())
            .finish_non_exhaustive()
    }
}
