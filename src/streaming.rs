use crate::finalizer::{PendingTurn, PersistOutcome};
use crate::metrics::MetricsAggregator;
use crate::sse::{decode_stream, SseDecodeError, SseFrame};
use crate::upstream::ByteStream;
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One chunk of the client-facing body. The body never errors; truncation is
/// signalled by the body ending early.
pub type ClientChunk = std::result::Result<Bytes, Infallible>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Upstream sent `data: [DONE]`.
    DoneMarker,
    /// Upstream closed the body without a terminator.
    SourceClosed,
    /// Read or decode failure mid-stream. Already-forwarded text stands.
    SourceFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub deltas: usize,
    pub forwarded: usize,
    pub client_disconnected: bool,
    pub end: StreamEnd,
}

pub struct StreamHandler;

impl StreamHandler {
    /// Forwards decoded deltas to the client sink in arrival order.
    ///
    /// Each delta is accumulated before it is sent, and the send is awaited
    /// before the next frame is pulled, so a slow client pauses the upstream
    /// read. Once the client is gone, decoding continues without forwarding so
    /// the accumulator still holds the complete reply.
    pub async fn relay<S>(
        frames: &mut S,
        tx: &mpsc::Sender<ClientChunk>,
        turn: &mut PendingTurn,
    ) -> RelayReport
    where
        S: Stream<Item = std::result::Result<SseFrame, SseDecodeError>> + Unpin,
    {
        let mut report = RelayReport {
            deltas: 0,
            forwarded: 0,
            client_disconnected: false,
            end: StreamEnd::SourceClosed,
        };

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(SseFrame::Delta(text)) => {
                    report.deltas += 1;
                    turn.push_delta(&text);

                    if report.client_disconnected {
                        continue;
                    }
                    if tx.send(Ok(Bytes::from(text))).await.is_err() {
                        tracing::warn!(
                            "[⚙️  -> 🖥️ ] Client disconnected after {} deltas; draining upstream",
                            report.forwarded
                        );
                        report.client_disconnected = true;
                    } else {
                        report.forwarded += 1;
                    }
                }
                Ok(SseFrame::Done) => {
                    tracing::debug!("[☁️  -> ⚙️ ] Received [DONE]");
                    report.end = StreamEnd::DoneMarker;
                    break;
                }
                Err(e) => {
                    tracing::error!("[☁️  -> ⚙️ ] Stream error: {}", e);
                    report.end = StreamEnd::SourceFailed(e.to_string());
                    break;
                }
            }
        }

        report
    }

    /// Drives one upstream body to completion, then finalizes the turn.
    ///
    /// `tx` is dropped before persistence starts so the client sees the end
    /// of the body without waiting on the store.
    pub async fn handle_stream(
        body: ByteStream,
        tx: mpsc::Sender<ClientChunk>,
        mut turn: PendingTurn,
        metrics: Arc<MetricsAggregator>,
        model: String,
    ) -> PersistOutcome {
        let start_time = std::time::Instant::now();
        let mut frames = decode_stream(body);

        let report = Self::relay(&mut frames, &tx, &mut turn).await;
        drop(tx);

        let skipped = frames.decoder().skipped_frames();
        metrics.record_stream(&model, &report, skipped).await;
        Self::log_summary(&report, skipped, turn.full_text().len(), start_time.elapsed());

        turn.finish().await
    }

    fn log_summary(
        report: &RelayReport,
        skipped: u64,
        text_bytes: usize,
        latency: std::time::Duration,
    ) {
        let end = match &report.end {
            StreamEnd::DoneMarker => "DONE",
            StreamEnd::SourceClosed => "EOF",
            StreamEnd::SourceFailed(_) => "FAILED",
        };
        tracing::info!(
            target: "flight_recorder",
            "[STREAM END] End: {} | Deltas: {} | Forwarded: {} | Skipped: {} | Text: {} bytes | Client: {} | Latency: {:?}",
            end,
            report.deltas,
            report.forwarded,
            skipped,
            text_bytes,
            if report.client_disconnected { "gone" } else { "ok" },
            latency
        );
        if skipped > 0 {
            tracing::warn!("[☁️  -> ⚙️ ] Dropped {} unparseable frames", skipped);
        }
    }
}
