//! ProtoGlyphManager - provisional categories, clustering, promotion
//!
//! All mutations serialize on one async mutex and write through the
//! configured `ProtoStore` before the lock is released. A failed write is
//! logged and the in-memory state is kept; the next mutation (or `flush`)
//! writes the whole document again.

use crate::registry::GlyphRegistry;
use crate::store::{ProtoStore, StoreSnapshot, STORE_VERSION};
use crate::synthesizer::GlyphProposal;
use chrono::{DateTime, Utc};
use glyph_core::config::{ClusteringConfig, ProtoConfig};
use glyph_core::{
    AffectSpace, Cluster, EmotionVector, Error, GateRule, Glyph, PromotionRecord, ProtoGlyph,
    Result,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Counts reported by [`ProtoGlyphManager::stats`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProtoStats {
    pub total: usize,
    pub active: usize,
    pub promoted: usize,
    pub retained_examples: usize,
    pub promotions: usize,
    pub last_saved: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, PartialEq)]
struct ClusterParams {
    threshold: f64,
    min_size: usize,
}

struct ProtoState {
    /// Always sorted by `seq`.
    protos: Vec<ProtoGlyph>,
    index: HashMap<String, usize>,
    next_seq: u64,
    promotions: Vec<PromotionRecord>,
    last_saved: Option<DateTime<Utc>>,
    last_clusters: Option<(ClusterParams, Vec<Cluster>)>,
}

impl ProtoState {
    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut protos: Vec<ProtoGlyph> = snapshot.protos.into_values().collect();
        protos.sort_by_key(|p| p.seq);
        let mut state = Self {
            protos,
            index: HashMap::new(),
            next_seq: snapshot.next_seq,
            promotions: snapshot.promotions,
            last_saved: snapshot.last_saved,
            last_clusters: None,
        };
        state.reindex();
        state
    }

    fn reindex(&mut self) {
        self.index = self
            .protos
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
    }

    fn get(&self, id: &str) -> Option<&ProtoGlyph> {
        self.index.get(id).map(|&i| &self.protos[i])
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ProtoGlyph> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.protos[i]),
            None => Err(Error::not_found(format!("proto {}", id))),
        }
    }

    fn active(&self) -> impl Iterator<Item = &ProtoGlyph> {
        self.protos.iter().filter(|p| !p.promoted)
    }

    fn snapshot(&self, dims: usize, now: DateTime<Utc>) -> StoreSnapshot {
        StoreSnapshot {
            version: STORE_VERSION,
            vector_dimensions: dims,
            next_seq: self.next_seq,
            protos: self
                .protos
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            promotions: self.promotions.clone(),
            last_saved: Some(now),
        }
    }

    fn mutated(&mut self) {
        self.last_clusters = None;
    }
}

pub struct ProtoGlyphManager {
    space: AffectSpace,
    config: ProtoConfig,
    clustering: ClusteringConfig,
    store: Arc<dyn ProtoStore>,
    state: Mutex<ProtoState>,
}

impl ProtoGlyphManager {
    /// Load existing state from `store`, or start empty.
    pub fn open(
        space: AffectSpace,
        config: ProtoConfig,
        clustering: ClusteringConfig,
        store: Arc<dyn ProtoStore>,
    ) -> Result<Self> {
        let snapshot = match store.load(&space)? {
            Some(s) => {
                info!(
                    "Loaded {} protos and {} promotions from {}",
                    s.protos.len(),
                    s.promotions.len(),
                    store.describe()
                );
                s
            }
            None => StoreSnapshot::empty(space.dims()),
        };
        Ok(Self {
            space,
            config,
            clustering,
            store,
            state: Mutex::new(ProtoState::from_snapshot(snapshot)),
        })
    }

    pub fn space(&self) -> &AffectSpace {
        &self.space
    }

    pub fn clustering(&self) -> &ClusteringConfig {
        &self.clustering
    }

    /// Record a new single-example proto and return its id.
    pub async fn create(
        &self,
        vector: EmotionVector,
        example: &str,
        context: Option<String>,
        confidence: f64,
    ) -> Result<String> {
        self.space.check(&vector)?;
        let confidence = unit_confidence(confidence)?;
        let now = Utc::now();
        let id = format!("proto-{}", uuid::Uuid::new_v4().simple());

        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        let examples = match clip(example, self.config.example_max_chars) {
            Some(e) => vec![e],
            None => Vec::new(),
        };
        let proto = ProtoGlyph {
            id: id.clone(),
            seq,
            vector,
            examples,
            context,
            confidence,
            promoted: false,
            observation_count: 1,
            first_seen: now,
            last_seen: now,
        };
        let index = state.protos.len();
        state.index.insert(id.clone(), index);
        state.protos.push(proto);
        state.mutated();
        debug!(proto_id = %id, seq, confidence, "Created proto");
        self.persist(&mut state, now);
        Ok(id)
    }

    /// Append an example, optionally folding a new observation vector in.
    pub async fn add_example(
        &self,
        proto_id: &str,
        example: &str,
        vector: Option<&EmotionVector>,
    ) -> Result<()> {
        if let Some(v) = vector {
            self.space.check(v)?;
        }
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let cap = self.config.example_cap;
        let step = self.config.confidence_step;
        let proto = state.get_mut(proto_id)?;
        if proto.promoted {
            return Err(Error::invalid_request(format!(
                "proto {} is promoted and immutable",
                proto_id
            )));
        }
        if let Some(e) = clip(example, self.config.example_max_chars) {
            proto.examples.push(e);
        }
        if proto.examples.len() > cap {
            let excess = proto.examples.len() - cap;
            proto.examples.drain(..excess);
        }
        if let Some(v) = vector {
            if let Some(mean) = EmotionVector::mean([&proto.vector, v]) {
                proto.vector = mean;
            }
        }
        proto.confidence = (proto.confidence + step).min(1.0);
        proto.observation_count += 1;
        proto.last_seen = now;
        debug!(proto_id = %proto_id, confidence = proto.confidence, "Added example");
        state.mutated();
        self.persist(&mut state, now);
        Ok(())
    }

    /// Fold several protos into one survivor (`keep_id`, else the first id).
    /// The others stay in the store flagged as promoted.
    pub async fn merge(&self, proto_ids: &[String], keep_id: Option<&str>) -> Result<String> {
        let mut ids: Vec<&str> = Vec::new();
        for id in proto_ids {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        if ids.len() < 2 {
            return Err(Error::invalid_request("merge needs at least two distinct protos"));
        }
        let keep = keep_id.unwrap_or(ids[0]);
        if !ids.contains(&keep) {
            return Err(Error::invalid_request(format!(
                "survivor {} is not among the merged protos",
                keep
            )));
        }

        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut members = Vec::with_capacity(ids.len());
        for id in &ids {
            let proto = state
                .get(id)
                .ok_or_else(|| Error::not_found(format!("proto {}", id)))?;
            if proto.promoted {
                return Err(Error::invalid_request(format!("proto {} is already promoted", id)));
            }
            members.push(proto.clone());
        }

        let vector = EmotionVector::mean(members.iter().map(|p| &p.vector))
            .ok_or_else(|| Error::invalid_request("merge needs at least two distinct protos"))?;
        let confidence =
            members.iter().map(|p| p.confidence).sum::<f64>() / members.len() as f64;

        // Survivor's own examples first, then the absorbed ones in argument order.
        let mut examples = Vec::new();
        let mut observation_count = 0;
        let mut first_seen = now;
        let mut last_seen = DateTime::<Utc>::MIN_UTC;
        let ordered = members
            .iter()
            .filter(|p| p.id == keep)
            .chain(members.iter().filter(|p| p.id != keep));
        for p in ordered {
            examples.extend(p.examples.iter().cloned());
            observation_count += p.observation_count;
            first_seen = first_seen.min(p.first_seen);
            last_seen = last_seen.max(p.last_seen);
        }

        for id in ids.iter().filter(|id| **id != keep) {
            state.get_mut(id)?.promoted = true;
        }
        let survivor = state.get_mut(keep)?;
        survivor.vector = vector;
        survivor.confidence = confidence;
        survivor.examples = examples;
        survivor.observation_count = observation_count;
        survivor.first_seen = first_seen;
        survivor.last_seen = last_seen;

        info!(survivor = %keep, absorbed = ids.len() - 1, "Merged protos");
        state.mutated();
        self.persist(&mut state, now);
        Ok(keep.to_string())
    }

    /// Greedy single-pass clustering over unpromoted protos in creation order.
    pub async fn cluster(&self, similarity_threshold: f64, min_cluster_size: usize) -> Vec<Cluster> {
        let params = ClusterParams {
            threshold: similarity_threshold,
            min_size: min_cluster_size,
        };
        let mut state = self.state.lock().await;
        if let Some((cached, clusters)) = &state.last_clusters {
            if *cached == params {
                return clusters.clone();
            }
        }
        let active: Vec<&ProtoGlyph> = state.active().collect();
        let clusters = greedy_clusters(&active, params);
        debug!(
            active = active.len(),
            clusters = clusters.len(),
            threshold = similarity_threshold,
            "Clustered protos"
        );
        state.last_clusters = Some((params, clusters.clone()));
        clusters
    }

    /// Filter the last clustering (recomputed with configured defaults when
    /// there is none) down to clusters ready for promotion.
    pub async fn stable_clusters(
        &self,
        stability_threshold: f64,
        min_size: usize,
        min_evidence: usize,
    ) -> Vec<Cluster> {
        let cached = {
            let state = self.state.lock().await;
            state.last_clusters.as_ref().map(|(_, c)| c.clone())
        };
        let clusters = match cached {
            Some(c) => c,
            None => {
                self.cluster(
                    self.clustering.similarity_threshold,
                    self.clustering.min_cluster_size,
                )
                .await
            }
        };

        let state = self.state.lock().await;
        clusters
            .into_iter()
            .filter(|c| c.stability >= stability_threshold && c.size >= min_size)
            .filter(|c| {
                let evidence: usize = c
                    .proto_ids
                    .iter()
                    .filter_map(|id| state.get(id))
                    .map(|p| p.examples.len())
                    .sum();
                evidence >= min_evidence
            })
            .collect()
    }

    /// Promote with a bare name, symbol and gate rule.
    pub async fn promote(
        &self,
        cluster: &Cluster,
        name: &str,
        symbol: &str,
        gate: GateRule,
    ) -> Result<Glyph> {
        let bare = GlyphProposal {
            name: name.to_string(),
            symbol: symbol.to_string(),
            vector: cluster.centroid.clone(),
            gate,
            narrative: String::new(),
            activation_phrase: String::new(),
        };
        self.promote_inner(cluster, bare, None).await
    }

    /// Promote a synthesizer proposal and register the glyph in one step. The
    /// glyph vector is always the cluster centroid. Members are flagged only
    /// after `registry` accepted the glyph; a rejected glyph leaves every
    /// proto and the promotion history untouched.
    pub async fn promote_registered(
        &self,
        cluster: &Cluster,
        proposal: &GlyphProposal,
        registry: &GlyphRegistry,
    ) -> Result<Glyph> {
        self.promote_inner(cluster, proposal.clone(), Some(registry)).await
    }

    async fn promote_inner(
        &self,
        cluster: &Cluster,
        proposal: GlyphProposal,
        registry: Option<&GlyphRegistry>,
    ) -> Result<Glyph> {
        let GlyphProposal {
            name,
            symbol,
            gate,
            narrative,
            activation_phrase,
            ..
        } = proposal;
        if name.trim().is_empty() {
            return Err(Error::invalid_input("glyph name is empty"));
        }
        if symbol.trim().is_empty() {
            return Err(Error::invalid_input("glyph symbol is empty"));
        }
        if cluster.proto_ids.is_empty() {
            return Err(Error::invalid_request(format!("cluster {} has no members", cluster.id)));
        }
        self.space.check(&cluster.centroid)?;
        gate.validate(&self.space)?;

        let now = Utc::now();
        let mut state = self.state.lock().await;
        for id in &cluster.proto_ids {
            let proto = state
                .get(id)
                .ok_or_else(|| Error::not_found(format!("proto {}", id)))?;
            if proto.promoted {
                return Err(Error::invalid_request(format!(
                    "cluster {} is stale: proto {} is already promoted",
                    cluster.id, id
                )));
            }
        }

        let mut examples: Vec<String> = Vec::new();
        'members: for id in &cluster.proto_ids {
            if let Some(proto) = state.get(id) {
                for e in &proto.examples {
                    if examples.len() >= self.config.example_cap {
                        break 'members;
                    }
                    if !examples.contains(e) {
                        examples.push(e.clone());
                    }
                }
            }
        }

        let glyph = Glyph {
            name,
            symbol,
            vector: cluster.centroid.clone(),
            gate,
            narrative,
            activation_phrase,
            examples,
            confidence: cluster.stability.clamp(0.0, 1.0),
            origin_cluster: cluster.id.clone(),
            created_at: now,
        };

        // Registered before any member is flagged, so a rejection changes nothing here.
        if let Some(registry) = registry {
            registry.add(glyph.clone()).await?;
        }
        for id in &cluster.proto_ids {
            state.get_mut(id)?.promoted = true;
        }
        state.promotions.push(PromotionRecord {
            glyph_name: glyph.name.clone(),
            cluster_id: cluster.id.clone(),
            proto_ids: cluster.proto_ids.clone(),
            stability: cluster.stability,
            promoted_at: now,
        });
        info!(glyph = %glyph.name, cluster = %cluster.id, members = cluster.size, "Promoted cluster");
        state.mutated();
        self.persist(&mut state, now);
        Ok(glyph)
    }

    /// Examples retained by a cluster's members, in member order.
    pub async fn cluster_examples(&self, cluster: &Cluster) -> Vec<String> {
        let state = self.state.lock().await;
        cluster
            .proto_ids
            .iter()
            .filter_map(|id| state.get(id))
            .flat_map(|p| p.examples.iter().cloned())
            .collect()
    }

    /// Most similar unpromoted proto.
    pub async fn nearest_active(&self, vector: &EmotionVector) -> Option<(String, f64)> {
        let state = self.state.lock().await;
        let mut best: Option<(String, f64)> = None;
        for p in state.active() {
            let s = p.vector.cosine(vector);
            if best.as_ref().map_or(true, |(_, b)| s > *b) {
                best = Some((p.id.clone(), s));
            }
        }
        best
    }

    /// Drop unpromoted protos last seen before `older_than`. Returns how many.
    pub async fn prune_stale(&self, older_than: DateTime<Utc>) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let before = state.protos.len();
        state
            .protos
            .retain(|p| p.promoted || p.last_seen >= older_than);
        let removed = before - state.protos.len();
        if removed > 0 {
            state.reindex();
            state.mutated();
            info!(removed, "Pruned stale protos");
            self.persist(&mut state, now);
        }
        removed
    }

    pub async fn get(&self, proto_id: &str) -> Option<ProtoGlyph> {
        self.state.lock().await.get(proto_id).cloned()
    }

    /// All protos, promoted included, in creation order.
    pub async fn list(&self) -> Vec<ProtoGlyph> {
        self.state.lock().await.protos.clone()
    }

    pub async fn promotions(&self) -> Vec<PromotionRecord> {
        self.state.lock().await.promotions.clone()
    }

    pub async fn stats(&self) -> ProtoStats {
        let state = self.state.lock().await;
        let promoted = state.protos.iter().filter(|p| p.promoted).count();
        ProtoStats {
            total: state.protos.len(),
            active: state.protos.len() - promoted,
            promoted,
            retained_examples: state.protos.iter().map(|p| p.examples.len()).sum(),
            promotions: state.promotions.len(),
            last_saved: state.last_saved,
        }
    }

    /// Write the full state now, reporting failure to the caller.
    pub async fn flush(&self) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        self.store.save(&state.snapshot(self.space.dims(), now))?;
        state.last_saved = Some(now);
        Ok(())
    }

    fn persist(&self, state: &mut ProtoState, now: DateTime<Utc>) {
        match self.store.save(&state.snapshot(self.space.dims(), now)) {
            Ok(()) => state.last_saved = Some(now),
            Err(e) => error!(store = %self.store.describe(), "Failed to persist protos: {}", e),
        }
    }
}

fn greedy_clusters(active: &[&ProtoGlyph], params: ClusterParams) -> Vec<Cluster> {
    let mut assigned = vec![false; active.len()];
    let mut clusters = Vec::new();
    for i in 0..active.len() {
        if assigned[i] {
            continue;
        }
        let seed = active[i];
        let mut members = vec![i];
        for j in (i + 1)..active.len() {
            if !assigned[j] && seed.vector.cosine(&active[j].vector) >= params.threshold {
                members.push(j);
            }
        }
        if members.len() < params.min_size {
            continue;
        }
        for &m in &members {
            assigned[m] = true;
        }
        let vectors: Vec<&EmotionVector> = members.iter().map(|&m| &active[m].vector).collect();
        let Some(centroid) = EmotionVector::mean(vectors.iter().copied()) else {
            continue;
        };
        clusters.push(Cluster {
            id: format!("cluster-{}", seed.id),
            proto_ids: members.iter().map(|&m| active[m].id.clone()).collect(),
            centroid,
            size: members.len(),
            stability: mean_pairwise(&vectors),
        });
    }
    clusters
}

/// Mean cosine similarity over all member pairs; 1 for a single member.
fn mean_pairwise(vectors: &[&EmotionVector]) -> f64 {
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for (i, a) in vectors.iter().enumerate() {
        for b in &vectors[i + 1..] {
            sum += a.cosine(b);
            pairs += 1;
        }
    }
    if pairs == 0 {
        1.0
    } else {
        (sum / pairs as f64).clamp(0.0, 1.0)
    }
}

fn unit_confidence(confidence: f64) -> Result<f64> {
    if !confidence.is_finite() {
        return Err(Error::invalid_input("confidence is not finite"));
    }
    Ok(confidence.clamp(0.0, 1.0))
}

/// Trim and cap an example at `max_chars` characters. Blank examples are dropped.
fn clip(example: &str, max_chars: usize) -> Option<String> {
    let trimmed = example.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}
