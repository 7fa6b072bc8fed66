//! Observation worker - moves exchanges off the caller's path
//!
//! Hosts enqueue `(text, subordinate match)` pairs and return at once. One
//! consumer task parses each text, hands it to the orchestrator, and nudges
//! the consolidation pipeline when a turn asks for synthesis. On shutdown the
//! queue is closed and whatever is already in it is still processed.

use glyph_affect::AffectParser;
use glyph_core::SubordinateMatch;
use glyph_learning::{ConsolidationPipeline, DominantOrchestrator};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One subordinate turn waiting to be observed.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub text: String,
    pub subordinate: SubordinateMatch,
}

/// Queue counters since the core was opened.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Default)]
pub(crate) struct WorkerCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerCounters {
    pub(crate) fn enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct ObservationWorker {
    pub parser: Arc<AffectParser>,
    pub orchestrator: Arc<DominantOrchestrator>,
    pub pipeline: Arc<ConsolidationPipeline>,
    pub counters: Arc<WorkerCounters>,
}

impl ObservationWorker {
    pub(crate) fn spawn(
        self,
        mut rx: mpsc::Receiver<Exchange>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(exchange) => self.handle(exchange).await,
                        None => break,
                    },
                }
            }

            rx.close();
            let mut drained = 0usize;
            while let Ok(exchange) = rx.try_recv() {
                self.handle(exchange).await;
                drained += 1;
            }
            info!(drained, "Observation worker stopped");
        })
    }

    async fn handle(&self, exchange: Exchange) {
        let analysis = self.parser.parse(&exchange.text);
        match self
            .orchestrator
            .observe(&exchange.text, &exchange.subordinate, &analysis.vector)
            .await
        {
            Ok(outcome) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                debug!(action = ?outcome.action, mismatch = outcome.mismatch, "Exchange observed");
                if outcome.should_synthesize && !self.pipeline.is_shutting_down() {
                    self.pipeline.nudge();
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(chars = exchange.text.chars().count(), "Observation failed: {}", e);
            }
        }
    }
}
