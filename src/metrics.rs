//! Relay Metrics
//!
//! Per-model counters for relayed streams. Skipped frames are tracked here so a
//! provider that systematically emits malformed frames is visible even though
//! the decoder itself never fails the stream.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::finalizer::PersistOutcome;
use crate::streaming::{RelayReport, StreamEnd};

/// Metrics for one upstream model
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelMetrics {
    pub streams: u64,
    pub deltas: u64,
    pub skipped_frames: u64,
    pub client_disconnects: u64,
    pub truncated_streams: u64,
    pub finalized: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
}

pub struct MetricsAggregator {
    metrics: Arc<RwLock<HashMap<String, ModelMetrics>>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record the end of one relayed stream
    pub async fn record_stream(&self, model: &str, report: &RelayReport, skipped_frames: u64) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(model.to_string()).or_default();
        entry.streams += 1;
        entry.deltas += report.deltas as u64;
        entry.skipped_frames += skipped_frames;
        if report.client_disconnected {
            entry.client_disconnects += 1;
        }
        if matches!(report.end, StreamEnd::SourceFailed(_)) {
            entry.truncated_streams += 1;
        }
    }

    /// Record a finalizer run
    pub async fn record_finalized(&self, model: &str, outcome: &PersistOutcome) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(model.to_string()).or_default();
        entry.finalized += 1;
        match outcome {
            PersistOutcome::Created(_) | PersistOutcome::Appended(_) => entry.persisted += 1,
            PersistOutcome::Failed => entry.persistence_failures += 1,
            PersistOutcome::Ephemeral | PersistOutcome::SkippedEmptyReply => {}
        }
    }

    pub async fn get_metrics(&self, model: &str) -> Option<ModelMetrics> {
        self.metrics.read().await.get(model).cloned()
    }

    pub async fn get_all_metrics(&self) -> HashMap<String, ModelMetrics> {
        self.metrics.read().await.clone()
    }

    /// Finalizer runs across every model.
    pub async fn total_finalized(&self) -> u64 {
        self.metrics.read().await.values().map(|m| m.finalized).sum()
    }

    pub async fn log_summary(&self) {
        let metrics = self.metrics.read().await;
        if metrics.is_empty() {
            return;
        }

        tracing::info!("=== RELAY METRICS ===");
        for (model, m) in metrics.iter() {
            tracing::info!(
                "Model {}: {} streams | {} deltas | {} skipped frames | {} disconnects | {} truncated | {}/{} persisted ({} failed)",
                model,
                m.streams,
                m.deltas,
                m.skipped_frames,
                m.client_disconnects,
                m.truncated_streams,
                m.persisted,
                m.finalized,
                m.persistence_failures
            );
        }
        tracing::info!("=====================");
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
