//! Tests for glyph-learning: proto lifecycle, clustering, persistence,
//! synthesis with an oracle, and consolidation passes

use glyph_core::config::{ClusteringConfig, PipelineConfig, ProtoConfig, SynthesizerConfig};
use glyph_core::{AffectSpace, Cluster, EmotionVector, Error, GateRule};
use glyph_learning::synthesizer::GlyphSummary;
use glyph_learning::*;
use glyph_llm::{MockBehavior, MockProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn space() -> AffectSpace {
    AffectSpace::default()
}

fn v(raw: &[f64]) -> EmotionVector {
    let mut full = raw.to_vec();
    full.resize(8, 0.0);
    space().vector(full).unwrap()
}

fn manager_with(store: Arc<dyn ProtoStore>) -> ProtoGlyphManager {
    ProtoGlyphManager::open(space(), ProtoConfig::default(), ClusteringConfig::default(), store)
        .unwrap()
}

fn manager() -> ProtoGlyphManager {
    manager_with(Arc::new(MemoryStore::new()))
}

fn joy_gate() -> GateRule {
    GateRule {
        trigger_threshold: 0.7,
        primary_emotions: vec!["joy".into()],
        context_sensitive: false,
    }
}

/// Three protos with two examples each, pairwise similar at the given vectors.
async fn seed(m: &ProtoGlyphManager, vectors: &[EmotionVector]) -> Vec<String> {
    let mut ids = Vec::new();
    for (i, vector) in vectors.iter().enumerate() {
        let id = m.create(vector.clone(), &format!("seen {}", i), None, 0.5).await.unwrap();
        m.add_example(&id, &format!("again {}", i), None).await.unwrap();
        ids.push(id);
    }
    ids
}

// ===========================================================================
// Proto lifecycle
// ===========================================================================

#[tokio::test]
async fn create_rejects_wrong_shape() {
    let m = manager();
    let short = AffectSpace::new(vec!["joy".into()]).unwrap().vector(vec![1.0]).unwrap();
    let err = m.create(short, "x", None, 0.5).await.unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { expected: 8, actual: 1 }));
    assert_eq!(m.stats().await.total, 0);
}

#[tokio::test]
async fn add_example_unknown_id_is_not_found() {
    let m = manager();
    let err = m.add_example("proto-missing", "x", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn add_example_averages_vector_and_raises_confidence() {
    let m = manager();
    let id = m.create(v(&[1.0]), "first", None, 0.4).await.unwrap();
    m.add_example(&id, "second", Some(&v(&[0.0, 1.0]))).await.unwrap();
    let p = m.get(&id).await.unwrap();
    assert_eq!(p.vector, v(&[0.5, 0.5]));
    assert!((p.confidence - 0.45).abs() < 1e-12);
    assert_eq!(p.examples, ["first", "second"]);
}

#[tokio::test]
async fn examples_are_truncated_to_max_chars() {
    let m = manager();
    let long = "x".repeat(1000);
    let id = m.create(v(&[1.0]), &long, None, 0.4).await.unwrap();
    assert_eq!(m.get(&id).await.unwrap().examples[0].chars().count(), 280);
}

#[tokio::test]
async fn merge_conserves_examples_and_averages() {
    let m = manager();
    let a = m.create(v(&[1.0]), "a1", None, 0.6).await.unwrap();
    m.add_example(&a, "a2", None).await.unwrap();
    let b = m.create(v(&[0.95, 0.05]), "b1", None, 0.3).await.unwrap();
    let active_before = m.stats().await.active;

    let survivor = m.merge(&[a.clone(), b.clone()], None).await.unwrap();
    assert_eq!(survivor, a);
    let p = m.get(&a).await.unwrap();
    assert_eq!(p.examples, ["a1", "a2", "b1"]);
    assert!((p.vector.get(0) - 0.975).abs() < 1e-12);
    assert!((p.confidence - (0.65 + 0.3) / 2.0).abs() < 1e-12);
    assert_eq!(p.observation_count, 3);
    assert!(m.get(&b).await.unwrap().promoted);
    assert_eq!(m.stats().await.active, active_before - 1);
}

#[tokio::test]
async fn merge_validates_request() {
    let m = manager();
    let a = m.create(v(&[1.0]), "a", None, 0.5).await.unwrap();
    let b = m.create(v(&[1.0]), "b", None, 0.5).await.unwrap();

    let err = m.merge(&[a.clone(), a.clone()], None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = m.merge(&[a.clone(), b.clone()], Some("proto-other")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = m.merge(&[a.clone(), "proto-gone".into()], None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    m.merge(&[a.clone(), b.clone()], Some(&b)).await.unwrap();
    let err = m.merge(&[a.clone(), b.clone()], None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = m.add_example(&a, "late", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn prune_stale_removes_only_old_unpromoted() {
    let m = manager();
    let ids = seed(&m, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    m.promote(&cluster, "Radiance", "☀", joy_gate()).await.unwrap();
    let lone = m.create(v(&[0.0, 0.0, 0.0, 1.0]), "alone", None, 0.5).await.unwrap();

    assert_eq!(m.prune_stale(chrono::Utc::now() - chrono::Duration::hours(1)).await, 0);
    assert_eq!(m.prune_stale(chrono::Utc::now() + chrono::Duration::hours(1)).await, 1);
    assert!(m.get(&lone).await.is_none());
    for id in ids {
        assert!(m.get(&id).await.is_some());
    }
}

// ===========================================================================
// Clustering
// ===========================================================================

#[tokio::test]
async fn cluster_groups_similar_protos_in_seed_order() {
    let m = manager();
    let fear1 = m.create(v(&[0.0, 0.0, 0.0, 1.0]), "f1", None, 0.5).await.unwrap();
    let joy1 = m.create(v(&[0.0, 1.0]), "j1", None, 0.5).await.unwrap();
    let fear2 = m.create(v(&[0.0, 0.0, 0.0, 0.9, 0.1]), "f2", None, 0.5).await.unwrap();
    let joy2 = m.create(v(&[0.1, 0.9]), "j2", None, 0.5).await.unwrap();
    m.create(v(&[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]), "s", None, 0.5).await.unwrap();

    let clusters = m.cluster(0.8, 2).await;
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].proto_ids, [fear1.clone(), fear2]);
    assert_eq!(clusters[1].proto_ids, [joy1, joy2]);
    assert_eq!(clusters[0].id, format!("cluster-{}", fear1));
    assert_eq!(clusters[0].size, 2);
}

#[tokio::test]
async fn cluster_is_idempotent_without_mutation() {
    let m = manager();
    seed(&m, &[v(&[0.0, 1.0]), v(&[0.1, 0.9]), v(&[0.0, 0.95, 0.05])]).await;
    let first = m.cluster(0.8, 2).await;
    let second = m.cluster(0.8, 2).await;
    assert_eq!(first, second);
    let recomputed = m.cluster(0.81, 2).await;
    assert_eq!(first[0].proto_ids, recomputed[0].proto_ids);
}

#[tokio::test]
async fn merge_scenario_converges() {
    let m = manager();
    let a = m.create(v(&[1.0]), "one", None, 0.8).await.unwrap();
    let b = m.create(v(&[0.95, 0.05]), "two", None, 0.6).await.unwrap();

    let clusters = m.cluster(0.95, 2).await;
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].size, 2);

    let survivor = m.merge(&clusters[0].proto_ids, None).await.unwrap();
    assert_eq!(survivor, a);
    let p = m.get(&a).await.unwrap();
    assert_eq!(p.examples.len(), 2);
    assert!((p.vector.get(0) - 0.975).abs() < 1e-12);
    assert!((p.vector.get(1) - 0.025).abs() < 1e-12);
    assert!((p.confidence - 0.7).abs() < 1e-12);
    assert!(m.get(&b).await.unwrap().promoted);
    assert!(m.cluster(0.95, 2).await.is_empty());
}

#[tokio::test]
async fn stability_filter_scenario() {
    let m = manager();
    // Pairwise cosines 0.70 (a,b), 0.72 (a,c), 0.74 (b,c)
    seed(
        &m,
        &[
            v(&[1.0, 0.0, 0.0]),
            v(&[0.70, 0.714143, 0.0]),
            v(&[0.72, 0.330466, 0.610239]),
        ],
    )
    .await;
    let clusters = m.cluster(0.65, 2).await;
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].size, 3);
    assert!((clusters[0].stability - 0.72).abs() < 1e-4);

    assert!(m.stable_clusters(0.75, 3, 5).await.is_empty());
    assert_eq!(m.stable_clusters(0.70, 3, 5).await.len(), 1);
    assert!(m.stable_clusters(0.70, 3, 7).await.is_empty());
    assert!(m.stable_clusters(0.70, 4, 5).await.is_empty());
}

#[tokio::test]
async fn stable_clusters_recomputes_with_configured_defaults() {
    let m = manager();
    seed(&m, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let stable = m.stable_clusters(0.75, 3, 5).await;
    assert_eq!(stable.len(), 1);
}

// ===========================================================================
// Promotion
// ===========================================================================

#[tokio::test]
async fn promote_builds_glyph_from_cluster() {
    let m = manager();
    let ids = seed(&m, &[v(&[0.0, 1.0]), v(&[0.1, 0.9]), v(&[0.0, 0.9, 0.1])]).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    let glyph = m.promote(&cluster, "Radiance", "☀", joy_gate()).await.unwrap();

    assert_eq!(glyph.vector, cluster.centroid);
    assert_eq!(glyph.origin_cluster, cluster.id);
    assert_eq!(glyph.confidence, cluster.stability);
    assert_eq!(glyph.examples.len(), 6);
    let stats = m.stats().await;
    assert_eq!(stats.promoted, 3);
    assert_eq!(stats.promotions, 1);
    for id in &ids {
        assert!(m.get(id).await.unwrap().promoted);
    }
    assert!(m.cluster(0.8, 2).await.is_empty());
    let record = m.promotions().await.remove(0);
    assert_eq!(record.glyph_name, "Radiance");
    assert_eq!(record.proto_ids, ids);
}

#[tokio::test]
async fn promote_caps_examples() {
    let m = manager();
    let vectors = vec![v(&[0.0, 1.0]); 6];
    seed(&m, &vectors).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    let glyph = m.promote(&cluster, "Radiance", "☀", joy_gate()).await.unwrap();
    assert_eq!(glyph.examples.len(), 10);
}

#[tokio::test]
async fn promote_rejects_unknown_gate_emotion() {
    let m = manager();
    seed(&m, &[v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    let gate = GateRule {
        trigger_threshold: 0.7,
        primary_emotions: vec!["wistful".into()],
        context_sensitive: false,
    };
    assert!(matches!(
        m.promote(&cluster, "X", "x", gate).await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(m.stats().await.promoted, 0);
}

#[tokio::test]
async fn promote_registered_touches_nothing_when_registry_refuses() {
    let registry = GlyphRegistry::new(space());
    let local = LocalSynthesizer::new(space());
    let joy = [v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])];

    let earlier = manager();
    seed(&earlier, &joy).await;
    let first = earlier.cluster(0.8, 2).await.remove(0);
    let proposal = local
        .propose(&SynthesisRequest {
            examples: earlier.cluster_examples(&first).await,
            cluster: first.clone(),
            existing: vec![],
        })
        .unwrap();
    earlier.promote_registered(&first, &proposal, &registry).await.unwrap();
    assert!(registry.contains(&proposal.name).await);
    assert_eq!(earlier.stats().await.promoted, 3);

    let store = Arc::new(MemoryStore::new());
    let m = manager_with(store.clone());
    let ids = seed(&m, &joy).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    assert!(matches!(
        m.promote_registered(&cluster, &proposal, &registry).await,
        Err(Error::DuplicateName(_))
    ));
    let stats = m.stats().await;
    assert_eq!(stats.promoted, 0);
    assert_eq!(stats.promotions, 0);
    for id in &ids {
        assert!(!m.get(id).await.unwrap().promoted);
    }
    let saved = store.saved().unwrap();
    assert!(saved.protos.values().all(|p| !p.promoted));
    assert!(saved.promotions.is_empty());
    assert_eq!(registry.len().await, 1);

    // The same cluster still promotes under a free name.
    let renamed = GlyphProposal {
        name: "Second Light".into(),
        ..proposal
    };
    m.promote_registered(&cluster, &renamed, &registry).await.unwrap();
    assert_eq!(registry.len().await, 2);
    assert_eq!(store.saved().unwrap().promotions.len(), 1);
}

// ===========================================================================
// Persistence
// ===========================================================================

#[tokio::test]
async fn json_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("protos.json");
    let m = manager_with(Arc::new(JsonFileStore::new(&path)));
    let ids = seed(&m, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let cluster = m.cluster(0.8, 2).await.remove(0);
    m.promote(&cluster, "Radiance", "☀", joy_gate()).await.unwrap();
    let open_id = m.create(v(&[1.0]), "later", None, 0.2).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["vector_dimensions"], 8);
    assert!(raw["last_saved"].is_string());
    assert_eq!(raw["promotions"].as_array().unwrap().len(), 1);

    let reopened = manager_with(Arc::new(JsonFileStore::new(&path)));
    let before = m.list().await;
    let after = reopened.list().await;
    assert_eq!(after.len(), before.len());
    for (a, b) in after.iter().zip(&before) {
        assert_eq!((&a.id, a.seq, &a.examples, a.promoted), (&b.id, b.seq, &b.examples, b.promoted));
    }
    let promotions = reopened.promotions().await;
    assert_eq!(promotions[0].glyph_name, "Radiance");
    assert_eq!(promotions[0].proto_ids, ids);
    let listed: Vec<String> = after.into_iter().map(|p| p.id).collect();
    assert_eq!(&listed[..3], &ids[..]);
    assert_eq!(listed[3], open_id);

    let newer = reopened.create(v(&[1.0]), "newest", None, 0.2).await.unwrap();
    assert!(reopened.get(&newer).await.unwrap().seq > reopened.get(&open_id).await.unwrap().seq);
}

#[tokio::test]
async fn json_store_with_other_dimensions_fails_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protos.json");
    let m = manager_with(Arc::new(JsonFileStore::new(&path)));
    m.create(v(&[1.0]), "x", None, 0.2).await.unwrap();

    let small = AffectSpace::new(vec!["a".into(), "b".into()]).unwrap();
    let result = ProtoGlyphManager::open(
        small,
        ProtoConfig::default(),
        ClusteringConfig::default(),
        Arc::new(JsonFileStore::new(&path)),
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn corrupted_store_fails_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protos.json");
    std::fs::write(&path, "{ truncated").unwrap();
    let result = ProtoGlyphManager::open(
        space(),
        ProtoConfig::default(),
        ClusteringConfig::default(),
        Arc::new(JsonFileStore::new(&path)),
    );
    assert!(matches!(result, Err(Error::Persistence(_))));
}

// ===========================================================================
// Oracle synthesis
// ===========================================================================

fn stable_request() -> SynthesisRequest {
    SynthesisRequest {
        cluster: Cluster {
            id: "cluster-proto-a".into(),
            proto_ids: vec!["proto-a".into(), "proto-b".into(), "proto-c".into()],
            centroid: v(&[0.1, 0.7, 0.2, 0.0, 0.0, 0.1]),
            size: 3,
            stability: 0.92,
        },
        examples: vec!["it finally worked".into(), "so glad".into()],
        existing: vec![],
    }
}

fn oracle_config() -> SynthesizerConfig {
    SynthesizerConfig {
        min_call_interval_secs: 0,
        timeout_secs: 1,
        ..SynthesizerConfig::default()
    }
}

const GOOD_RECORD: &str = r#"Here you go:
{"name": "Sunlit Relief", "symbol": "☼", "narrative": "relief after effort",
 "activation_phrase": "when it finally works",
 "gate": {"threshold": 0.6, "primary_emotions": ["joy", "trust"], "context_sensitive": true}}"#;

#[tokio::test]
async fn oracle_proposal_is_used_when_valid() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text(GOOD_RECORD.into())));
    let oracle = OracleSynthesizer::new(mock.clone(), space(), &oracle_config());
    let p = oracle.synthesize(&stable_request()).await.unwrap();
    assert_eq!(p.name, "Sunlit Relief");
    assert!(p.gate.context_sensitive);
    assert_eq!(p.vector, stable_request().cluster.centroid);
    assert_eq!(oracle.stats().accepted, 1);
    assert_eq!(oracle.budget_usage().await.tokens, 150);

    let sent = mock.requests().await;
    assert!(sent[0].messages[0].content.contains("- joy: 0.70"));
    assert!(sent[0].system.is_some());
}

#[tokio::test]
async fn oracle_failure_falls_back_to_local() {
    let local = LocalSynthesizer::new(space()).propose(&stable_request()).unwrap();
    for behavior in [
        MockBehavior::Unavailable("overloaded".into()),
        MockBehavior::AuthFailure("bad key".into()),
        MockBehavior::Error("reset".into()),
        MockBehavior::Malformed("I would call it Joy.".into()),
        MockBehavior::Text(r#"{"name": "X", "symbol": "x", "gate": {"threshold": 0.5, "primary_emotions": ["bliss"]}}"#.into()),
    ] {
        let oracle = OracleSynthesizer::new(
            Arc::new(MockProvider::constant(behavior)),
            space(),
            &oracle_config(),
        );
        let p = oracle.synthesize(&stable_request()).await.unwrap();
        assert_eq!(p, local);
    }
}

#[tokio::test]
async fn oracle_classifies_failures() {
    let oracle = OracleSynthesizer::new(
        Arc::new(MockProvider::sequence(vec![
            MockBehavior::Unavailable("overloaded".into()),
            MockBehavior::Malformed("nope".into()),
        ])),
        space(),
        &oracle_config(),
    );
    oracle.synthesize(&stable_request()).await.unwrap();
    oracle.synthesize(&stable_request()).await.unwrap();
    let stats = oracle.stats();
    assert_eq!(stats.fallback_recoverable, 1);
    assert_eq!(stats.fallback_unknown, 1);
}

#[tokio::test]
async fn oracle_timeout_falls_back_to_local() {
    let slow = MockBehavior::Delayed(
        Duration::from_secs(30),
        Box::new(MockBehavior::Text(GOOD_RECORD.into())),
    );
    let oracle = OracleSynthesizer::new(
        Arc::new(MockProvider::constant(slow)),
        space(),
        &oracle_config(),
    );
    let started = std::time::Instant::now();
    let p = oracle.synthesize(&stable_request()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(p.name, "Radiance");
    assert_eq!(oracle.stats().fallback_recoverable, 1);
}

#[tokio::test]
async fn oracle_duplicate_name_falls_back_to_local() {
    let mut request = stable_request();
    request.existing.push(GlyphSummary {
        name: "Sunlit Relief".into(),
        symbol: "☼".into(),
        top_emotions: vec!["joy".into()],
    });
    let oracle = OracleSynthesizer::new(
        Arc::new(MockProvider::constant(MockBehavior::Text(GOOD_RECORD.into()))),
        space(),
        &oracle_config(),
    );
    let p = oracle.synthesize(&request).await.unwrap();
    assert_eq!(p.name, "Radiance");
}

#[tokio::test]
async fn oracle_defers_when_budget_is_spent() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text(GOOD_RECORD.into())));
    let oracle = OracleSynthesizer::new(mock.clone(), space(), &oracle_config())
        .with_budget(SynthesisBudget::new(1, 0, 10_000));
    oracle.synthesize(&stable_request()).await.unwrap();
    let err = oracle.synthesize(&stable_request()).await.unwrap_err();
    assert!(matches!(err, Error::SynthesisBudgetExceeded(_)));
    assert!(err.is_recoverable());
    assert_eq!(mock.call_count().await, 1);
    assert_eq!(oracle.stats().deferred, 1);
}

// ===========================================================================
// Consolidation passes
// ===========================================================================

fn pipeline_over(
    protos: Arc<ProtoGlyphManager>,
    registry: Arc<GlyphRegistry>,
    synthesizer: Arc<dyn Synthesizer>,
) -> ConsolidationPipeline {
    ConsolidationPipeline::new(
        protos,
        registry,
        synthesizer,
        ClusteringConfig::default(),
        PipelineConfig::default(),
        None,
    )
}

#[tokio::test]
async fn pass_promotes_stable_cluster_once() {
    let protos = Arc::new(manager());
    let registry = Arc::new(GlyphRegistry::new(space()));
    seed(&protos, &[v(&[0.0, 1.0]), v(&[0.05, 0.95]), v(&[0.0, 0.95, 0.05])]).await;
    let p = pipeline_over(protos.clone(), registry.clone(), Arc::new(LocalSynthesizer::new(space())));

    let first = p.run_pass_now().await.unwrap();
    assert_eq!(first.promoted, ["Radiance"]);
    let second = p.run_pass_now().await.unwrap();
    assert!(second.promoted.is_empty());
    assert_eq!(second.clusters, 0);
    assert_eq!(registry.len().await, 1);
    let status = p.status().await;
    assert_eq!(status.passes, 2);
    assert_eq!(status.promotions, 1);
}

#[tokio::test]
async fn pass_defers_budget_refusals_and_promotes_later() {
    let protos = Arc::new(manager());
    let registry = Arc::new(GlyphRegistry::new(space()));
    seed(&protos, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let oracle = OracleSynthesizer::new(
        Arc::new(MockProvider::constant(MockBehavior::Text(GOOD_RECORD.into()))),
        space(),
        &oracle_config(),
    )
    .with_budget(SynthesisBudget::new(0, 0, 0));
    let p = pipeline_over(protos.clone(), registry.clone(), Arc::new(oracle));
    let mut events = p.subscribe();

    let report = p.run_pass_now().await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    assert!(registry.is_empty().await);
    assert_eq!(protos.stats().await.promoted, 0);

    let _started = events.recv().await.unwrap();
    match events.recv().await.unwrap() {
        PipelineEvent::Deferred { recoverable, .. } => assert!(recoverable),
        other => panic!("expected Deferred, got {:?}", other),
    }
}

#[tokio::test]
async fn pass_defers_on_registry_name_collision() {
    struct FixedName;

    #[async_trait::async_trait]
    impl Synthesizer for FixedName {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn synthesize(&self, request: &SynthesisRequest) -> glyph_core::Result<GlyphProposal> {
            Ok(GlyphProposal {
                name: "Taken".into(),
                symbol: "t".into(),
                vector: request.cluster.centroid.clone(),
                gate: GateRule {
                    trigger_threshold: 0.5,
                    primary_emotions: vec![],
                    context_sensitive: false,
                },
                narrative: String::new(),
                activation_phrase: String::new(),
            })
        }
    }

    let protos = Arc::new(manager());
    let registry = Arc::new(GlyphRegistry::new(space()));
    let taken = ProtoGlyphManager::open(
        space(),
        ProtoConfig::default(),
        ClusteringConfig::default(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    seed(&taken, &[v(&[1.0]), v(&[1.0])]).await;
    let c = taken.cluster(0.8, 2).await.remove(0);
    let existing = taken
        .promote(&c, "Taken", "t", GateRule { trigger_threshold: 0.5, primary_emotions: vec![], context_sensitive: false })
        .await
        .unwrap();
    registry.add(existing).await.unwrap();

    seed(&protos, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    let p = pipeline_over(protos.clone(), registry.clone(), Arc::new(FixedName));
    let report = p.run_pass_now().await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(registry.len().await, 1);
    assert_eq!(protos.stats().await.promoted, 0);
}

/// Local naming behind a delay, announcing each call before it sleeps.
struct SlowLocal {
    inner: LocalSynthesizer,
    entered: Arc<Notify>,
    delay: Duration,
}

#[async_trait::async_trait]
impl Synthesizer for SlowLocal {
    fn name(&self) -> &str {
        "slow-local"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> glyph_core::Result<GlyphProposal> {
        self.entered.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.propose(request)
    }
}

#[tokio::test]
async fn stop_during_pass_finishes_current_cluster_only() {
    let store = Arc::new(MemoryStore::new());
    let protos = Arc::new(manager_with(store.clone()));
    let registry = Arc::new(GlyphRegistry::new(space()));
    seed(&protos, &[v(&[0.0, 1.0]), v(&[0.0, 1.0]), v(&[0.0, 1.0])]).await;
    seed(&protos, &[v(&[0.0, 0.0, 0.0, 1.0]), v(&[0.0, 0.0, 0.0, 1.0]), v(&[0.0, 0.0, 0.0, 1.0])])
        .await;
    let entered = Arc::new(Notify::new());
    let slow = SlowLocal {
        inner: LocalSynthesizer::new(space()),
        entered: entered.clone(),
        delay: Duration::from_millis(200),
    };
    let p = Arc::new(pipeline_over(protos.clone(), registry.clone(), Arc::new(slow)));

    let running = tokio::spawn({
        let p = p.clone();
        async move { p.run_pass_now().await }
    });
    entered.notified().await;
    tokio::time::timeout(Duration::from_secs(5), p.stop()).await.unwrap().unwrap();
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.stable, 2);
    assert_eq!(report.promoted.len(), 1);
    assert!(report.deferred.is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(registry.len().await, 1);
    assert!(registry.contains(&report.promoted[0]).await);

    let stats = protos.stats().await;
    assert_eq!(stats.promoted, 3);
    assert_eq!(stats.active, 3);
    assert_eq!(stats.promotions, 1);
    let saved = store.saved().unwrap();
    assert_eq!(saved.protos.values().filter(|p| p.promoted).count(), 3);
    assert_eq!(saved.promotions.len(), 1);
    assert_eq!(saved.promotions[0].glyph_name, report.promoted[0]);
    assert_eq!(p.status().await.state, PipelineState::Stopped);
}

#[tokio::test]
async fn failed_pass_retries_after_backoff() {
    let store = Arc::new(MemoryStore::new());
    let protos = Arc::new(manager_with(store.clone()));
    let registry = Arc::new(GlyphRegistry::new(space()));
    store.set_fail_writes(true);
    let p = ConsolidationPipeline::new(
        protos,
        registry,
        Arc::new(LocalSynthesizer::new(space())),
        ClusteringConfig::default(),
        PipelineConfig {
            interval_secs: 3600,
            retry_backoff_secs: 1,
            ..PipelineConfig::default()
        },
        None,
    );

    p.start().await.unwrap();
    p.nudge();
    tokio::time::timeout(Duration::from_secs(5), async {
        while p.status().await.failed_passes == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(store.saved().is_none());

    // No further nudge: only the back-off can bring the next pass this soon.
    store.set_fail_writes(false);
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.saved().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    p.stop().await.unwrap();
    let status = p.status().await;
    assert_eq!(status.failed_passes, 1);
    assert_eq!(status.passes, 2);
    assert_eq!(status.state, PipelineState::Stopped);
}
