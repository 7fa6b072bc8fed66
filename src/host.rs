//! GlyphCore - the facade a host process embeds
//!
//! Owns every collaborator explicitly: parser, registry, proto store,
//! orchestrator, synthesizer and pipeline. Nothing is global; two cores in
//! one process are independent as long as their store paths differ.

use crate::worker::{Exchange, ObservationWorker, WorkerCounters, WorkerStats};
use glyph_affect::AffectParser;
use glyph_core::config::SynthesizerMode;
use glyph_core::{AffectAnalysis, AffectSpace, EmotionVector, Error, GlyphConfig, Result, SubordinateMatch};
use glyph_learning::{
    ConsolidationPipeline, DominantOrchestrator, GlyphRegistry, JsonFileStore, LocalSynthesizer,
    ObservationAnalysis, OracleSynthesizer, PipelineEvent, ProtoGlyphManager, Synthesizer,
};
use glyph_llm::LlmProvider;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exchanges waiting for the observation worker before new ones are dropped.
const OBSERVATION_QUEUE_CAPACITY: usize = 1024;

pub struct GlyphCore {
    config: GlyphConfig,
    space: AffectSpace,
    parser: Arc<AffectParser>,
    registry: Arc<GlyphRegistry>,
    protos: Arc<ProtoGlyphManager>,
    orchestrator: Arc<DominantOrchestrator>,
    pipeline: Arc<ConsolidationPipeline>,
    queue: mpsc::Sender<Exchange>,
    counters: Arc<WorkerCounters>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl GlyphCore {
    /// Build a core with the local synthesizer, or fail if the config asks for the oracle.
    pub async fn open(config: GlyphConfig) -> Result<Self> {
        Self::open_with_provider(config, None).await
    }

    /// Build a core; `provider` backs oracle synthesis when the config selects it.
    /// Must be called inside a tokio runtime.
    pub async fn open_with_provider(
        config: GlyphConfig,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        let space = AffectSpace::new(config.vectors.labels.clone())?;
        let parser = Arc::new(AffectParser::from_config(space.clone(), &config.affect)?);

        let registry = Arc::new(GlyphRegistry::new(space.clone()));
        if let Some(path) = &config.registry.snapshot_path {
            registry.load_snapshot(path).await?;
        }

        let store = Arc::new(JsonFileStore::new(&config.protos.store_path));
        let protos = Arc::new(ProtoGlyphManager::open(
            space.clone(),
            config.protos.clone(),
            config.clustering.clone(),
            store,
        )?);

        let synthesizer: Arc<dyn Synthesizer> = match (config.synthesizer.mode, provider) {
            (SynthesizerMode::Local, _) => Arc::new(LocalSynthesizer::new(space.clone())),
            (SynthesizerMode::Oracle, Some(provider)) => Arc::new(OracleSynthesizer::new(
                provider,
                space.clone(),
                &config.synthesizer,
            )),
            (SynthesizerMode::Oracle, None) => {
                return Err(Error::Config(
                    "synthesizer.mode is oracle but no oracle provider was supplied".into(),
                ))
            }
        };

        let orchestrator = Arc::new(DominantOrchestrator::new(
            space.clone(),
            config.orchestrator.clone(),
            registry.clone(),
            protos.clone(),
        ));
        let pipeline = Arc::new(ConsolidationPipeline::new(
            protos.clone(),
            registry.clone(),
            synthesizer.clone(),
            config.clustering.clone(),
            config.pipeline.clone(),
            config.registry.snapshot_path.clone(),
        ));

        let (queue, rx) = mpsc::channel(OBSERVATION_QUEUE_CAPACITY);
        let counters = Arc::new(WorkerCounters::default());
        let cancel = CancellationToken::new();
        let worker = ObservationWorker {
            parser: parser.clone(),
            orchestrator: orchestrator.clone(),
            pipeline: pipeline.clone(),
            counters: counters.clone(),
        }
        .spawn(rx, cancel.clone());

        info!(
            dimensions = space.dims(),
            store = %config.protos.store_path.display(),
            synthesizer = synthesizer.name(),
            "Glyph core opened"
        );

        Ok(Self {
            config,
            space,
            parser,
            registry,
            protos,
            orchestrator,
            pipeline,
            queue,
            counters,
            worker: Mutex::new(Some(worker)),
            cancel,
        })
    }

    /// Parse a text. No side effects beyond the parser cache.
    pub fn analyze(&self, text: &str) -> AffectAnalysis {
        self.parser.parse(text)
    }

    /// Queue an exchange for observation without waiting. Returns false when
    /// the exchange was dropped because the queue is full or closed.
    pub fn observe_exchange(&self, text: &str, subordinate: SubordinateMatch) -> bool {
        if self.cancel.is_cancelled() {
            self.counters.dropped();
            return false;
        }
        let exchange = Exchange {
            text: text.to_string(),
            subordinate,
        };
        match self.queue.try_send(exchange) {
            Ok(()) => {
                self.counters.enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped();
                warn!(capacity = OBSERVATION_QUEUE_CAPACITY, "Observation queue full, exchange dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped();
                false
            }
        }
    }

    /// Parse and observe in the caller's task.
    pub async fn observe_now(&self, text: &str, subordinate: &SubordinateMatch) -> Result<ObservationAnalysis> {
        let analysis = self.parser.parse(text);
        self.observe_vector(text, subordinate, &analysis.vector).await
    }

    /// Observe with a vector the host computed itself.
    pub async fn observe_vector(
        &self,
        text: &str,
        subordinate: &SubordinateMatch,
        vector: &EmotionVector,
    ) -> Result<ObservationAnalysis> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let outcome = self.orchestrator.observe(text, subordinate, vector).await?;
        if outcome.should_synthesize {
            self.pipeline.nudge();
        }
        Ok(outcome)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.pipeline.subscribe()
    }

    /// Start periodic consolidation.
    pub async fn start(&self) -> Result<()> {
        self.pipeline.start().await
    }

    /// Drain queued exchanges, stop the pipeline, flush everything. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!("Observation worker ended abnormally: {}", e);
            }
        }
        self.pipeline.stop().await?;
        info!(stats = ?self.counters.snapshot(), "Glyph core shut down");
        Ok(())
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &GlyphConfig {
        &self.config
    }

    pub fn space(&self) -> &AffectSpace {
        &self.space
    }

    pub fn registry(&self) -> &Arc<GlyphRegistry> {
        &self.registry
    }

    pub fn protos(&self) -> &Arc<ProtoGlyphManager> {
        &self.protos
    }

    pub fn orchestrator(&self) -> &Arc<DominantOrchestrator> {
        &self.orchestrator
    }

    pub fn pipeline(&self) -> &Arc<ConsolidationPipeline> {
        &self.pipeline
    }
}

impl Drop for GlyphCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
