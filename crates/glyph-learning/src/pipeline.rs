//! ConsolidationPipeline - periodic cluster → synthesize → promote
//!
//! One background task per pipeline. Between passes it sleeps on the
//! configured interval (or the retry back-off after a failed pass) and wakes
//! early on `nudge` or shutdown. Shutdown never interrupts a cluster that is
//! already being promoted: the pass stops at the next cluster boundary, state
//! is flushed, and the task exits.

use crate::proto::ProtoGlyphManager;
use crate::registry::GlyphRegistry;
use crate::synthesizer::{GlyphSummary, SynthesisRequest, Synthesizer};
use chrono::{DateTime, Utc};
use glyph_core::config::{ClusteringConfig, PipelineConfig};
use glyph_core::{Cluster, Error, Glyph, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Published on the pipeline's broadcast channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PassStarted {
        pass: u64,
    },
    Promoted {
        pass: u64,
        glyph: Glyph,
        cluster_id: String,
        proto_ids: Vec<String>,
    },
    Deferred {
        pass: u64,
        cluster_id: String,
        reason: String,
        recoverable: bool,
    },
    PassFinished {
        pass: u64,
        promoted: usize,
        deferred: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub passes: u64,
    pub failed_passes: u64,
    pub promotions: u64,
    pub deferrals: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            passes: 0,
            failed_passes: 0,
            promotions: 0,
            deferrals: 0,
            last_pass_at: None,
        }
    }
}

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub pass: u64,
    pub clusters: usize,
    pub stable: usize,
    pub promoted: Vec<String>,
    pub deferred: Vec<String>,
    /// Stable clusters left untouched because shutdown was requested.
    pub skipped: usize,
}

struct PipelineInner {
    protos: Arc<ProtoGlyphManager>,
    registry: Arc<GlyphRegistry>,
    synthesizer: Arc<dyn Synthesizer>,
    clustering: ClusteringConfig,
    config: PipelineConfig,
    /// Registry is saved here after promotions and on shutdown.
    registry_snapshot: Option<PathBuf>,
    events: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
    wake: Notify,
    status: RwLock<PipelineStatus>,
    /// Serializes passes from the loop and from `run_pass_now`.
    pass_lock: Mutex<()>,
}

pub struct ConsolidationPipeline {
    inner: Arc<PipelineInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConsolidationPipeline {
    pub fn new(
        protos: Arc<ProtoGlyphManager>,
        registry: Arc<GlyphRegistry>,
        synthesizer: Arc<dyn Synthesizer>,
        clustering: ClusteringConfig,
        config: PipelineConfig,
        registry_snapshot: Option<PathBuf>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(PipelineInner {
                protos,
                registry,
                synthesizer,
                clustering,
                config,
                registry_snapshot,
                events,
                cancel: CancellationToken::new(),
                wake: Notify::new(),
                status: RwLock::new(PipelineStatus::default()),
                pass_lock: Mutex::new(()),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub async fn status(&self) -> PipelineStatus {
        self.inner.status.read().await.clone()
    }

    /// Spawn the background loop. A pipeline runs at most once.
    pub async fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(Error::invalid_request("pipeline already started"));
        }
        self.inner.status.write().await.state = PipelineState::Running;
        let inner = self.inner.clone();
        *handle = Some(tokio::spawn(async move { run_loop(inner).await }));
        info!(
            interval_secs = self.inner.config.interval_secs,
            synthesizer = self.inner.synthesizer.name(),
            "Consolidation pipeline started"
        );
        Ok(())
    }

    /// Request shutdown and wait for the loop to flush and exit.
    pub async fn stop(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let handle = self.handle.lock().await.take();
        match handle {
            Some(h) => {
                self.inner.status.write().await.state = PipelineState::Stopping;
                if let Err(e) = h.await {
                    error!("Consolidation task ended abnormally: {}", e);
                }
            }
            None => {
                // Never started: still leave a flushed store behind.
                let _guard = self.inner.pass_lock.lock().await;
                finish(&self.inner).await;
            }
        }
        self.inner.status.write().await.state = PipelineState::Stopped;
        Ok(())
    }

    /// Run one pass in the caller's task.
    pub async fn run_pass_now(&self) -> Result<PassReport> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        run_pass(&self.inner).await
    }

    /// Wake the loop early for a pass.
    pub fn nudge(&self) {
        self.inner.wake.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

async fn run_loop(inner: Arc<PipelineInner>) {
    let mut last_failed = false;
    loop {
        let wait = if last_failed {
            inner.config.retry_backoff()
        } else {
            inner.config.interval()
        };
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
            _ = inner.wake.notified() => debug!("Consolidation nudged"),
        }
        if inner.cancel.is_cancelled() {
            break;
        }
        match run_pass(&inner).await {
            Ok(_) => last_failed = false,
            Err(e) => {
                warn!(
                    backoff_secs = inner.config.retry_backoff_secs,
                    "Consolidation pass failed: {}", e
                );
                inner.status.write().await.failed_passes += 1;
                last_failed = true;
            }
        }
    }

    let _guard = inner.pass_lock.lock().await;
    finish(&inner).await;
    info!("Consolidation pipeline stopped");
}

async fn finish(inner: &PipelineInner) {
    if let Err(e) = inner.protos.flush().await {
        error!("Final proto flush failed: {}", e);
    }
    save_registry(inner).await;
}

async fn save_registry(inner: &PipelineInner) {
    if let Some(path) = &inner.registry_snapshot {
        if let Err(e) = inner.registry.save_snapshot(path).await {
            error!(path = %path.display(), "Failed to save registry snapshot: {}", e);
        }
    }
}

async fn run_pass(inner: &PipelineInner) -> Result<PassReport> {
    let _guard = inner.pass_lock.lock().await;
    let pass = {
        let mut status = inner.status.write().await;
        status.passes += 1;
        status.last_pass_at = Some(Utc::now());
        status.passes
    };
    let _ = inner.events.send(PipelineEvent::PassStarted { pass });

    let c = &inner.clustering;
    let clusters = inner.protos.cluster(c.similarity_threshold, c.min_cluster_size).await;
    let stable = inner
        .protos
        .stable_clusters(c.stability_threshold, c.stable_min_size, c.stable_min_evidence)
        .await;
    info!(pass, clusters = clusters.len(), stable = stable.len(), "Consolidation pass");

    let mut report = PassReport {
        pass,
        clusters: clusters.len(),
        stable: stable.len(),
        ..PassReport::default()
    };

    for (i, cluster) in stable.iter().enumerate() {
        if inner.cancel.is_cancelled() {
            report.skipped = stable.len() - i;
            info!(skipped = report.skipped, "Shutdown requested, leaving clusters for later");
            break;
        }
        match consolidate(inner, cluster).await {
            Ok(glyph) => {
                report.promoted.push(glyph.name.clone());
                inner.status.write().await.promotions += 1;
                let _ = inner.events.send(PipelineEvent::Promoted {
                    pass,
                    glyph,
                    cluster_id: cluster.id.clone(),
                    proto_ids: cluster.proto_ids.clone(),
                });
            }
            Err(e) => {
                let recoverable = e.is_recoverable();
                warn!(cluster = %cluster.id, recoverable, "Cluster deferred: {}", e);
                report.deferred.push(cluster.id.clone());
                inner.status.write().await.deferrals += 1;
                let _ = inner.events.send(PipelineEvent::Deferred {
                    pass,
                    cluster_id: cluster.id.clone(),
                    reason: e.to_string(),
                    recoverable,
                });
            }
        }
    }

    if !report.promoted.is_empty() {
        save_registry(inner).await;
    }
    let _ = inner.events.send(PipelineEvent::PassFinished {
        pass,
        promoted: report.promoted.len(),
        deferred: report.deferred.len(),
    });
    inner.protos.flush().await?;
    Ok(report)
}

/// Synthesize, check the name, then register and promote together. Nothing
/// is promoted unless the registry takes the glyph.
async fn consolidate(inner: &PipelineInner, cluster: &Cluster) -> Result<Glyph> {
    let space = inner.protos.space();
    let existing: Vec<GlyphSummary> = inner
        .registry
        .list()
        .await
        .iter()
        .map(|g| GlyphSummary::of(g, space))
        .collect();
    let request = SynthesisRequest {
        cluster: cluster.clone(),
        examples: inner.protos.cluster_examples(cluster).await,
        existing,
    };

    let proposal = inner.synthesizer.synthesize(&request).await?;
    if inner.registry.contains(&proposal.name).await {
        return Err(Error::DuplicateName(proposal.name));
    }
    inner
        .protos
        .promote_registered(cluster, &proposal, &inner.registry)
        .await
}
