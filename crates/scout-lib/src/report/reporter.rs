//! Fan-in of pod reports to a single output sink
//!
//! The reporter is the only task that writes to the sink. In batch mode it
//! waits for every pod's final report and writes one table. In live mode it
//! redraws the table from snapshots on a fixed cadence until cancelled, then
//! writes a last frame from the final reports.

use super::table::render_table;
use crate::collector::SnapshotReader;
use crate::error::WriteError;
use crate::models::{Entity, EntityReport};
use crate::observability::SpyMetrics;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Moves the cursor home and clears the terminal
pub const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

const MIN_REDRAW_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One table once every pod is final
    Batch,
    /// Redraw in place until cancelled
    Live { redraw_interval: Duration },
}

/// Where the table is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSink {
    Stdout,
    File(PathBuf),
}

impl ReportSink {
    pub fn target(&self) -> String {
        match self {
            ReportSink::Stdout => "stdout".to_string(),
            ReportSink::File(path) => path.display().to_string(),
        }
    }

    /// Open the sink for writing, truncating an existing file
    pub async fn open(&self) -> Result<Box<dyn AsyncWrite + Send + Unpin>, WriteError> {
        match self {
            ReportSink::Stdout => Ok(Box::new(tokio::io::stdout())),
            ReportSink::File(path) => {
                let file = tokio::fs::File::create(path)
                    .await
                    .map_err(|source| WriteError::Open {
                        target: self.target(),
                        source,
                    })?;
                Ok(Box::new(file))
            }
        }
    }
}

/// What the reporter leaves behind
pub struct ReporterOutcome<W> {
    pub sink: W,
    /// Last rendered reports, in discovery order
    pub reports: Vec<EntityReport>,
    pub table: String,
    pub write_error: Option<WriteError>,
    pub redraws: u64,
}

pub struct Reporter<W> {
    sink: W,
    target: String,
    mode: RenderMode,
    readers: Vec<SnapshotReader>,
    metrics: SpyMetrics,
    write_error: Option<WriteError>,
    redraws: u64,
}

impl<W: AsyncWrite + Unpin + Send> Reporter<W> {
    /// `readers` fixes the row order of every rendered table
    pub fn new(
        sink: W,
        target: impl Into<String>,
        mode: RenderMode,
        readers: Vec<SnapshotReader>,
        metrics: SpyMetrics,
    ) -> Self {
        Self {
            sink,
            target: target.into(),
            mode,
            readers,
            metrics,
            write_error: None,
            redraws: 0,
        }
    }

    /// Collect final reports until every pod has one or `close` fires.
    ///
    /// Pods whose final report never arrived are rendered from their last
    /// snapshot.
    pub async fn run(
        mut self,
        mut finalized: mpsc::Receiver<EntityReport>,
        cancel: CancellationToken,
        mut close: oneshot::Receiver<()>,
    ) -> ReporterOutcome<W> {
        let expected = self.readers.len();
        let mut finals: HashMap<Entity, EntityReport> = HashMap::with_capacity(expected);

        let (mut redrawing, period) = match self.mode {
            RenderMode::Live { redraw_interval } => (true, redraw_interval.max(MIN_REDRAW_INTERVAL)),
            RenderMode::Batch => (false, MIN_REDRAW_INTERVAL),
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while finals.len() < expected {
            tokio::select! {
                report = finalized.recv() => match report {
                    Some(report) => {
                        debug!(entity = %report.entity, "Final report received");
                        finals.insert(report.entity.clone(), report);
                    }
                    None => break,
                },
                _ = &mut close => break,
                _ = cancel.cancelled(), if redrawing => {
                    redrawing = false;
                }
                _ = ticker.tick(), if redrawing => {
                    let snapshots = self.snapshots();
                    self.draw(&snapshots).await;
                }
            }
        }

        while let Ok(report) = finalized.try_recv() {
            finals.insert(report.entity.clone(), report);
        }

        let reports: Vec<EntityReport> = self
            .readers
            .iter()
            .map(|reader| {
                let snapshot = reader.snapshot();
                finals.remove(&snapshot.entity).unwrap_or(snapshot)
            })
            .collect();

        let table = self.draw(&reports).await;
        self.close_sink().await;

        ReporterOutcome {
            sink: self.sink,
            reports,
            table,
            write_error: self.write_error,
            redraws: self.redraws,
        }
    }

    fn snapshots(&self) -> Vec<EntityReport> {
        self.readers.iter().map(SnapshotReader::snapshot).collect()
    }

    async fn draw(&mut self, reports: &[EntityReport]) -> String {
        let table = render_table(reports);
        let frame = match self.mode {
            RenderMode::Live { .. } => format!("{}{}\n", CLEAR_SCREEN, table),
            RenderMode::Batch => format!("{}\n", table),
        };

        self.write(&frame).await;
        self.redraws += 1;
        self.metrics.inc_redraws();
        table
    }

    /// Write a frame; after the first failure the sink is left alone
    async fn write(&mut self, frame: &str) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(source) = write_frame(&mut self.sink, frame).await {
            warn!(target_sink = %self.target, error = %source, "Report write failed");
            self.write_error = Some(WriteError::Io {
                target: self.target.clone(),
                source,
            });
        }
    }

    async fn close_sink(&mut self) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(source) = self.sink.shutdown().await {
            self.write_error = Some(WriteError::Io {
                target: self.target.clone(),
                source,
            });
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(sink: &mut W, frame: &str) -> std::io::Result<()> {
    sink.write_all(frame.as_bytes()).await?;
    sink.flush().await
}
