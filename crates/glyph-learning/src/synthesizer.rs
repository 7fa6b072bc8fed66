//! Synthesizers turn a stable cluster into a proposed glyph
//!
//! `LocalSynthesizer` is a deterministic naming table. `OracleSynthesizer`
//! asks an `LlmProvider` for a richer record inside a call/token budget and a
//! hard timeout, and falls back to the local answer on any oracle failure.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use glyph_core::config::SynthesizerConfig;
use glyph_core::{AffectSpace, Cluster, EmotionVector, Error, GateRule, Glyph, Result};
use glyph_llm::{complete_text, LlmError, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Centroid weight a label needs to be mentioned to the oracle.
const PROMPT_LABEL_MIN_WEIGHT: f64 = 0.1;
const PROMPT_MAX_EXAMPLES: usize = 3;
const PROMPT_MAX_GLYPHS: usize = 5;

/// Trigger threshold of locally synthesized gate rules.
const LOCAL_TRIGGER_THRESHOLD: f64 = 0.7;

/// A second dimension at least this fraction of the first joins the name.
const SECONDARY_RATIO: f64 = 0.5;

// ---------------------------------------------------------------------------
// Request / proposal
// ---------------------------------------------------------------------------

/// Compact view of an existing glyph handed to synthesizers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlyphSummary {
    pub name: String,
    pub symbol: String,
    pub top_emotions: Vec<String>,
}

impl GlyphSummary {
    pub fn of(glyph: &Glyph, space: &AffectSpace) -> Self {
        Self {
            name: glyph.name.clone(),
            symbol: glyph.symbol.clone(),
            top_emotions: space.top_labels(&glyph.vector, 2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SynthesisRequest {
    pub cluster: Cluster,
    /// Retained examples of the cluster's members.
    pub examples: Vec<String>,
    /// Registry contents at request time, in insertion order.
    pub existing: Vec<GlyphSummary>,
}

/// Candidate glyph record. Promotion fills in examples, confidence and origin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlyphProposal {
    pub name: String,
    pub symbol: String,
    pub vector: EmotionVector,
    pub gate: GateRule,
    pub narrative: String,
    pub activation_phrase: String,
}

/// Schema and shape checks every proposal passes before it leaves a synthesizer.
pub fn validate_proposal(proposal: &GlyphProposal, space: &AffectSpace) -> Result<()> {
    if proposal.name.trim().is_empty() {
        return Err(Error::invalid_input("proposed name is empty"));
    }
    if proposal.symbol.trim().is_empty() {
        return Err(Error::invalid_input("proposed symbol is empty"));
    }
    space.check(&proposal.vector)?;
    proposal.gate.validate(space)
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<GlyphProposal>;
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// (label, noun, modifier, symbol)
const NAME_TABLE: [(&str, &str, &str, &str); 8] = [
    ("anger", "Ember", "Burning", "🜂"),
    ("joy", "Radiance", "Bright", "☀"),
    ("trust", "Anchor", "Steady", "⚓"),
    ("fear", "Tremor", "Trembling", "☍"),
    ("surprise", "Spark", "Sudden", "✶"),
    ("sadness", "Tide", "Quiet", "☾"),
    ("disgust", "Recoil", "Bitter", "⊘"),
    ("anticipation", "Horizon", "Waiting", "➶"),
];

const FALLBACK_SYMBOL: &str = "◇";

fn noun_for(label: &str) -> String {
    NAME_TABLE
        .iter()
        .find(|(l, ..)| *l == label)
        .map(|(_, noun, ..)| noun.to_string())
        .unwrap_or_else(|| capitalize(label))
}

fn modifier_for(label: &str) -> String {
    NAME_TABLE
        .iter()
        .find(|(l, ..)| *l == label)
        .map(|(_, _, modifier, _)| modifier.to_string())
        .unwrap_or_else(|| capitalize(label))
}

fn symbol_for(label: &str) -> &'static str {
    NAME_TABLE
        .iter()
        .find(|(l, ..)| *l == label)
        .map(|(.., symbol)| *symbol)
        .unwrap_or(FALLBACK_SYMBOL)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Deterministic synthesizer: the same request always yields the same proposal.
#[derive(Clone)]
pub struct LocalSynthesizer {
    space: AffectSpace,
}

impl LocalSynthesizer {
    pub fn new(space: AffectSpace) -> Self {
        Self { space }
    }

    pub fn propose(&self, request: &SynthesisRequest) -> Result<GlyphProposal> {
        let centroid = &request.cluster.centroid;
        self.space.check(centroid)?;
        let ranked = centroid.ranked();
        let top = match ranked.first() {
            Some(&i) if centroid.get(i) > 0.0 => i,
            _ => {
                return Err(Error::invalid_input(format!(
                    "cluster {} has an empty centroid",
                    request.cluster.id
                )))
            }
        };
        let secondary = ranked
            .get(1)
            .copied()
            .filter(|&i| centroid.get(i) > 0.0 && centroid.get(i) >= centroid.get(top) * SECONDARY_RATIO);

        let top_label = self.space.label(top).unwrap_or_default().to_string();
        let second_label = secondary.and_then(|i| self.space.label(i)).map(String::from);

        let (base_name, symbol, primary) = match &second_label {
            Some(second) => (
                format!("{} {}", modifier_for(second), noun_for(&top_label)),
                format!("{}{}", symbol_for(&top_label), symbol_for(second)),
                vec![top_label.clone(), second.clone()],
            ),
            None => (
                noun_for(&top_label),
                symbol_for(&top_label).to_string(),
                vec![top_label.clone()],
            ),
        };

        // Roman-numeral style suffix keeps names unique against the registry view.
        let taken = |n: &str| request.existing.iter().any(|g| g.name == n);
        let mut name = base_name.clone();
        let mut ordinal = 2;
        while taken(&name) {
            name = format!("{} {}", base_name, roman(ordinal));
            ordinal += 1;
        }

        let proposal = GlyphProposal {
            name,
            symbol,
            vector: centroid.clone(),
            gate: GateRule {
                trigger_threshold: LOCAL_TRIGGER_THRESHOLD,
                primary_emotions: primary.clone(),
                context_sensitive: false,
            },
            narrative: format!(
                "A recurring pattern led by {} across {} related moments.",
                primary.join(" and "),
                request.cluster.size
            ),
            activation_phrase: format!("when {} rises", top_label),
        };
        validate_proposal(&proposal, &self.space)?;
        Ok(proposal)
    }
}

fn roman(n: usize) -> String {
    const NUMERALS: [(usize, &str); 9] = [
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut n = n;
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

#[async_trait]
impl Synthesizer for LocalSynthesizer {
    fn name(&self) -> &str {
        "local"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<GlyphProposal> {
        self.propose(request)
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Snapshot of budget consumption for the current UTC day.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BudgetUsage {
    pub day: Option<NaiveDate>,
    pub calls: u32,
    pub tokens: u64,
    pub last_call: Option<DateTime<Utc>>,
}

/// Call-count, call-interval and token ceilings. The day window rolls over
/// at UTC midnight.
#[derive(Clone, Debug)]
pub struct SynthesisBudget {
    max_calls_per_day: u32,
    min_call_interval: ChronoDuration,
    max_tokens_per_day: u64,
    usage: BudgetUsage,
}

impl SynthesisBudget {
    pub fn new(max_calls_per_day: u32, min_call_interval_secs: u64, max_tokens_per_day: u64) -> Self {
        Self {
            max_calls_per_day,
            min_call_interval: ChronoDuration::seconds(
                i64::try_from(min_call_interval_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            max_tokens_per_day,
            usage: BudgetUsage::default(),
        }
    }

    pub fn from_config(config: &SynthesizerConfig) -> Self {
        Self::new(
            config.max_calls_per_day,
            config.min_call_interval_secs,
            config.max_tokens_per_day,
        )
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.usage.day != Some(today) {
            self.usage.day = Some(today);
            self.usage.calls = 0;
            self.usage.tokens = 0;
        }
    }

    /// Reserve one call at `now`, or explain which ceiling refuses it.
    pub fn try_begin(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.roll(now);
        if self.usage.calls >= self.max_calls_per_day {
            return Err(Error::SynthesisBudgetExceeded(format!(
                "{} oracle calls already made today",
                self.usage.calls
            )));
        }
        if self.usage.tokens >= self.max_tokens_per_day {
            return Err(Error::SynthesisBudgetExceeded(format!(
                "{} oracle tokens already spent today",
                self.usage.tokens
            )));
        }
        if let Some(last) = self.usage.last_call {
            if now - last < self.min_call_interval {
                return Err(Error::SynthesisBudgetExceeded(
                    "minimum interval between oracle calls not reached".into(),
                ));
            }
        }
        self.usage.calls += 1;
        self.usage.last_call = Some(now);
        Ok(())
    }

    pub fn record_tokens(&mut self, now: DateTime<Utc>, tokens: u64) {
        self.roll(now);
        self.usage.tokens = self.usage.tokens.saturating_add(tokens);
    }

    pub fn usage(&self) -> &BudgetUsage {
        &self.usage
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Outcome counters for oracle synthesis.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OracleStats {
    pub accepted: u64,
    pub fallback_recoverable: u64,
    pub fallback_unknown: u64,
    pub deferred: u64,
}

#[derive(Default)]
struct OracleCounters {
    accepted: AtomicU64,
    fallback_recoverable: AtomicU64,
    fallback_unknown: AtomicU64,
    deferred: AtomicU64,
}

pub struct OracleSynthesizer {
    provider: Arc<dyn LlmProvider>,
    local: LocalSynthesizer,
    space: AffectSpace,
    budget: Mutex<SynthesisBudget>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    counters: OracleCounters,
}

impl OracleSynthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>, space: AffectSpace, config: &SynthesizerConfig) -> Self {
        Self {
            provider,
            local: LocalSynthesizer::new(space.clone()),
            space,
            budget: Mutex::new(SynthesisBudget::from_config(config)),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            counters: OracleCounters::default(),
        }
    }

    pub fn with_budget(mut self, budget: SynthesisBudget) -> Self {
        self.budget = Mutex::new(budget);
        self
    }

    pub async fn budget_usage(&self) -> BudgetUsage {
        self.budget.lock().await.usage().clone()
    }

    pub fn stats(&self) -> OracleStats {
        OracleStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            fallback_recoverable: self.counters.fallback_recoverable.load(Ordering::Relaxed),
            fallback_unknown: self.counters.fallback_unknown.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
        }
    }

    /// One oracle round trip. Every failure comes back as `OracleUnavailable`.
    async fn ask_oracle(&self, request: &SynthesisRequest) -> Result<GlyphProposal> {
        let prompt = build_prompt(&self.space, request);
        let llm_request = LlmRequest {
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.4),
            system: Some(SYSTEM_PROMPT.to_string()),
            ..LlmRequest::prompt(self.model.clone(), prompt)
        };

        let completion = match tokio::time::timeout(
            self.timeout,
            complete_text(self.provider.as_ref(), llm_request, None),
        )
        .await
        {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return Err(map_llm_error(e)),
            Err(_elapsed) => {
                return Err(Error::oracle(
                    format!("no answer within {}s", self.timeout.as_secs()),
                    true,
                ))
            }
        };

        self.budget
            .lock()
            .await
            .record_tokens(Utc::now(), completion.usage.total());

        parse_response(&completion.text, &self.space, &request.cluster.centroid)
    }
}

#[async_trait]
impl Synthesizer for OracleSynthesizer {
    fn name(&self) -> &str {
        "oracle"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<GlyphProposal> {
        if let Err(e) = self.budget.lock().await.try_begin(Utc::now()) {
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
            debug!(cluster = %request.cluster.id, "Oracle budget refuses call: {}", e);
            return Err(e);
        }

        match self.ask_oracle(request).await {
            Ok(proposal) if !request.existing.iter().any(|g| g.name == proposal.name) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                info!(cluster = %request.cluster.id, glyph = %proposal.name, "Oracle named cluster");
                Ok(proposal)
            }
            outcome => {
                let err = match outcome {
                    Ok(p) => Error::DuplicateName(p.name),
                    Err(e) => e,
                };
                let recoverable = matches!(err, Error::OracleUnavailable { recoverable: true, .. });
                if recoverable {
                    self.counters.fallback_recoverable.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.fallback_unknown.fetch_add(1, Ordering::Relaxed);
                }
                warn!(
                    cluster = %request.cluster.id,
                    recoverable,
                    "Oracle synthesis failed, using local synthesis: {}", err
                );
                self.local.propose(request)
            }
        }
    }
}

const SYSTEM_PROMPT: &str = "You name recurring emotional patterns. \
Answer with a single JSON object and nothing else.";

/// Prompt describing the centroid, a few examples, and the glyphs already named.
pub fn build_prompt(space: &AffectSpace, request: &SynthesisRequest) -> String {
    let centroid = &request.cluster.centroid;
    let mut prompt = String::from("A cluster of similar emotional moments has stabilized.\n\n");

    prompt.push_str("Emotional profile (label: weight):\n");
    for i in centroid.ranked() {
        let weight = centroid.get(i);
        if weight < PROMPT_LABEL_MIN_WEIGHT {
            continue;
        }
        if let Some(label) = space.label(i) {
            prompt.push_str(&format!("- {}: {:.2}\n", label, weight));
        }
    }

    if !request.examples.is_empty() {
        prompt.push_str("\nRepresentative examples:\n");
        for example in request.examples.iter().take(PROMPT_MAX_EXAMPLES) {
            prompt.push_str(&format!("- \"{}\"\n", example));
        }
    }

    if !request.existing.is_empty() {
        prompt.push_str("\nExisting glyphs (do not reuse these names):\n");
        for g in request.existing.iter().take(PROMPT_MAX_GLYPHS) {
            prompt.push_str(&format!("- {} {} ({})\n", g.name, g.symbol, g.top_emotions.join(", ")));
        }
    }

    prompt.push_str(&format!(
        "\nPropose a new glyph as JSON with fields: name, symbol, narrative, \
         activation_phrase, gate {{threshold (0-1), primary_emotions (from: {}), \
         context_sensitive}}, and optionally vector ({} numbers in 0-1).\n",
        space.labels().join(", "),
        space.dims()
    ));
    prompt
}

#[derive(Deserialize)]
struct OracleRecord {
    name: String,
    symbol: String,
    #[serde(default)]
    narrative: String,
    #[serde(default)]
    activation_phrase: String,
    gate: OracleGate,
    #[serde(default)]
    vector: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct OracleGate {
    threshold: f64,
    primary_emotions: Vec<String>,
    #[serde(default)]
    context_sensitive: bool,
}

/// Parse the JSON object between the first `{` and the last `}` of `text`.
pub fn parse_response(text: &str, space: &AffectSpace, centroid: &EmotionVector) -> Result<GlyphProposal> {
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(Error::oracle("response holds no JSON object", false)),
    };
    let record: OracleRecord = serde_json::from_str(&text[start..=end])
        .map_err(|e| Error::oracle(format!("malformed glyph record: {}", e), false))?;

    let vector = match record.vector {
        Some(raw) => space
            .vector(raw)
            .map_err(|e| Error::oracle(format!("proposed vector rejected: {}", e), false))?,
        None => centroid.clone(),
    };
    let proposal = GlyphProposal {
        name: record.name.trim().to_string(),
        symbol: record.symbol.trim().to_string(),
        vector,
        gate: GateRule {
            trigger_threshold: record.gate.threshold,
            primary_emotions: record.gate.primary_emotions,
            context_sensitive: record.gate.context_sensitive,
        },
        narrative: record.narrative,
        activation_phrase: record.activation_phrase,
    };
    validate_proposal(&proposal, space)
        .map_err(|e| Error::oracle(format!("proposal failed validation: {}", e), false))?;
    Ok(proposal)
}

fn map_llm_error(e: LlmError) -> Error {
    let recoverable = e.is_recoverable();
    Error::oracle(e.to_string(), recoverable)
}
